//! Optional lifecycle callbacks invoked around windows and records.

use std::fmt;

use crate::Window;

/// Callback invoked before or after a window, with the window being processed.
pub type ChunkHook<E> = Box<dyn FnMut(&Window) -> Result<(), E> + Send>;

/// Callback turning a raw fetched row into the record handed to the caller.
pub type RecordMapHook<Raw, Rec, E> = Box<dyn FnMut(Raw) -> Result<Rec, E> + Send>;

/// Callback observing a record once it has been produced.
pub type RecordHook<Rec, E> = Box<dyn FnMut(&Rec) -> Result<(), E> + Send>;

/// Builder stage in which a before-record hook may still change the record type.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordOpen;

/// Builder stage in which the record type is fixed.
///
/// Reached by registering a before-record or an after-record hook; from here
/// on, only hooks observing the settled record type can be added.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordSettled;

/// Maps raw rows to records: a user hook, or identity when none is set.
enum RecordAdapter<Raw, Rec, E> {
    Identity(fn(Raw) -> Rec),
    Hook(RecordMapHook<Raw, Rec, E>),
}

/// The four lifecycle hook slots of a traversal.
///
/// Every slot is optional and only invoked when present. Without a
/// before-record hook, raw rows are yielded as records unchanged, which is
/// why [`Hooks::new`] is only available when both types coincide.
pub struct Hooks<Raw, Rec, E> {
    before_chunk: Option<ChunkHook<E>>,
    after_chunk: Option<ChunkHook<E>>,
    before_record: RecordAdapter<Raw, Rec, E>,
    after_record: Option<RecordHook<Rec, E>>,
}

impl<R, E> Hooks<R, R, E> {
    /// Creates an empty hook set.
    pub fn new() -> Self {
        Self {
            before_chunk: None,
            after_chunk: None,
            before_record: RecordAdapter::Identity(std::convert::identity),
            after_record: None,
        }
    }
}

impl<R, E> Default for Hooks<R, R, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Raw, Rec, E> Hooks<Raw, Rec, E> {
    /// Sets the hook run before each window is fetched.
    pub fn set_before_chunk(&mut self, hook: ChunkHook<E>) {
        self.before_chunk = Some(hook);
    }

    /// Sets the hook run after each window's records are exhausted.
    pub fn set_after_chunk(&mut self, hook: ChunkHook<E>) {
        self.after_chunk = Some(hook);
    }

    /// Sets the hook run for each produced record.
    pub fn set_after_record(&mut self, hook: RecordHook<Rec, E>) {
        self.after_record = Some(hook);
    }

    /// Replaces the record adapter, possibly changing the record type.
    ///
    /// The after-record hook observes the old record type and cannot be kept
    /// in the new hook set; it is handed back in the second tuple slot.
    pub fn with_before_record<T>(
        self,
        hook: RecordMapHook<Raw, T, E>,
    ) -> (Hooks<Raw, T, E>, Option<RecordHook<Rec, E>>) {
        let hooks = Hooks {
            before_chunk: self.before_chunk,
            after_chunk: self.after_chunk,
            before_record: RecordAdapter::Hook(hook),
            after_record: None,
        };

        (hooks, self.after_record)
    }

    /// Returns whether an after-record hook is set.
    #[inline]
    pub fn has_after_record(&self) -> bool {
        self.after_record.is_some()
    }

    /// Runs the before-chunk hook, if any.
    #[inline]
    pub fn before_chunk(&mut self, window: &Window) -> Result<(), E> {
        match &mut self.before_chunk {
            Some(hook) => hook(window),
            None => Ok(()),
        }
    }

    /// Runs the after-chunk hook, if any.
    #[inline]
    pub fn after_chunk(&mut self, window: &Window) -> Result<(), E> {
        match &mut self.after_chunk {
            Some(hook) => hook(window),
            None => Ok(()),
        }
    }

    /// Turns a raw row into a record.
    #[inline]
    pub fn before_record(&mut self, raw: Raw) -> Result<Rec, E> {
        match &mut self.before_record {
            RecordAdapter::Identity(identity) => Ok(identity(raw)),
            RecordAdapter::Hook(hook) => hook(raw),
        }
    }

    /// Runs the after-record hook, if any.
    #[inline]
    pub fn after_record(&mut self, record: &Rec) -> Result<(), E> {
        match &mut self.after_record {
            Some(hook) => hook(record),
            None => Ok(()),
        }
    }
}

impl<Raw, Rec, E> fmt::Debug for Hooks<Raw, Rec, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("before_chunk", &self.before_chunk.is_some())
            .field("after_chunk", &self.after_chunk.is_some())
            .field(
                "before_record",
                &matches!(self.before_record, RecordAdapter::Hook(_)),
            )
            .field("after_record", &self.after_record.is_some())
            .finish()
    }
}
