//! Assembly of [`ChunkIterator`]s from in-memory collections and custom fetchers.

use std::fmt;
use std::marker::PhantomData;

use crate::{
    ChunkError, ChunkIterator, Hooks, IdCursor, RecordOpen, RecordSettled, Result, SliceFetcher,
    TRACING_TARGET_BUILDER, VecFetcher, Window, WindowFetcher, WindowPlan,
};

/// Window width used when none is configured.
pub const DEFAULT_CHUNK_SIZE: u64 = 100;

/// Configures and builds a [`ChunkIterator`].
///
/// ## Example
///
/// ```rust
/// use chunkgen_core::{ChunkIteratorBuilder, Window};
///
/// let rows = ChunkIteratorBuilder::from_fn(250, |w: Window, _ids: Option<&[u64]>| {
///     Ok::<_, std::convert::Infallible>(w.start..=w.end)
/// })
/// .with_chunk_size(100)
/// .build()?;
///
/// assert_eq!(rows.count(), 250);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
///
/// The before-record hook fixes the record type, so it can only be registered
/// while the builder is still in the [`RecordOpen`] stage. Once an after-record
/// hook is set the builder is [`RecordSettled`] and the record type can no
/// longer change:
///
/// ```compile_fail
/// use chunkgen_core::ChunkIteratorBuilder;
///
/// let _ = ChunkIteratorBuilder::from_vec(vec![1u32, 2, 3])
///     .on_after_record(|_: &u32| Ok(()))
///     .on_before_record(|raw: u32| Ok(raw * 10));
/// ```
#[must_use = "builders do nothing unless built"]
pub struct ChunkIteratorBuilder<F: WindowFetcher, Rec = <F as WindowFetcher>::Raw, S = RecordOpen>
{
    chunk_size: u64,
    max: u64,
    fetcher: F,
    cursor: IdCursor,
    hooks: Hooks<F::Raw, Rec, F::Error>,
    _stage: PhantomData<S>,
}

impl<F: WindowFetcher> ChunkIteratorBuilder<F> {
    /// Creates a builder traversing `[1, max]` with `fetcher`.
    pub fn new(max: u64, fetcher: F) -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max,
            fetcher,
            cursor: IdCursor::unrestricted(),
            hooks: Hooks::new(),
            _stage: PhantomData,
        }
    }

    /// Sets the hook turning raw rows into records, possibly of another type.
    ///
    /// Only available before any record hook is registered; hooks added
    /// afterwards observe the new record type.
    pub fn on_before_record<T, H>(self, hook: H) -> ChunkIteratorBuilder<F, T, RecordSettled>
    where
        H: FnMut(F::Raw) -> Result<T, F::Error> + Send + 'static,
    {
        // Open builders never hold an after-record hook.
        let (hooks, _) = self.hooks.with_before_record(Box::new(hook));

        ChunkIteratorBuilder {
            chunk_size: self.chunk_size,
            max: self.max,
            fetcher: self.fetcher,
            cursor: self.cursor,
            hooks,
            _stage: PhantomData,
        }
    }
}

impl<F, I, E> ChunkIteratorBuilder<F>
where
    F: FnMut(Window, Option<&[u64]>) -> Result<I, E>,
    I: IntoIterator,
{
    /// Creates a builder traversing `[1, max]` with a fetch closure.
    pub fn from_fn(max: u64, fetch: F) -> Self {
        Self::new(max, fetch)
    }
}

impl<'a, T> ChunkIteratorBuilder<SliceFetcher<'a, T>> {
    /// Creates a builder over a borrowed slice.
    ///
    /// Items are addressed by 1-based position, so `max` is the slice length
    /// and each window yields a contiguous sub-slice in collection order.
    pub fn from_slice(items: &'a [T]) -> Self {
        Self::new(items.len() as u64, SliceFetcher::new(items))
    }
}

impl<T: Clone> ChunkIteratorBuilder<VecFetcher<T>> {
    /// Creates a builder over an owned vector, yielding clones of its items.
    pub fn from_vec(items: Vec<T>) -> Self {
        Self::new(items.len() as u64, VecFetcher::new(items))
    }
}

impl<F: WindowFetcher, Rec, S> ChunkIteratorBuilder<F, Rec, S> {
    /// Sets the maximum window width. Must be greater than zero.
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Overrides the highest identifier to traverse.
    pub fn with_max(mut self, max: u64) -> Self {
        self.max = max;
        self
    }

    /// Restricts the traversal to windows containing at least one of `ids`.
    ///
    /// Ids are sorted and deduplicated here. An empty set disables the filter.
    pub fn with_ids(mut self, ids: impl IntoIterator<Item = u64>) -> Self {
        self.cursor = IdCursor::new(ids);
        self
    }

    /// Uses an already prepared id cursor.
    pub fn with_cursor(mut self, cursor: IdCursor) -> Self {
        self.cursor = cursor;
        self
    }

    /// Sets the hook run before each window is fetched.
    pub fn on_before_chunk<H>(mut self, hook: H) -> Self
    where
        H: FnMut(&Window) -> Result<(), F::Error> + Send + 'static,
    {
        self.hooks.set_before_chunk(Box::new(hook));
        self
    }

    /// Sets the hook run after each window's records are exhausted.
    pub fn on_after_chunk<H>(mut self, hook: H) -> Self
    where
        H: FnMut(&Window) -> Result<(), F::Error> + Send + 'static,
    {
        self.hooks.set_after_chunk(Box::new(hook));
        self
    }

    /// Sets the hook run for every record.
    ///
    /// The hook runs inside [`Iterator::next`], before the record is returned,
    /// so it sees each record before the caller does. If it fails, the error
    /// is yielded in place of the record and the traversal ends.
    pub fn on_after_record<H>(mut self, hook: H) -> ChunkIteratorBuilder<F, Rec, RecordSettled>
    where
        H: FnMut(&Rec) -> Result<(), F::Error> + Send + 'static,
    {
        self.hooks.set_after_record(Box::new(hook));

        ChunkIteratorBuilder {
            chunk_size: self.chunk_size,
            max: self.max,
            fetcher: self.fetcher,
            cursor: self.cursor,
            hooks: self.hooks,
            _stage: PhantomData,
        }
    }

    /// Validates the configuration and builds the iterator.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::Config`] if the chunk size is zero.
    pub fn build(self) -> Result<ChunkIterator<F, Rec>> {
        if self.chunk_size == 0 {
            return Err(ChunkError::config("chunk_size must be greater than zero"));
        }

        let plan = WindowPlan::new(self.max, self.chunk_size);

        tracing::debug!(
            target: TRACING_TARGET_BUILDER,
            max = self.max,
            chunk_size = self.chunk_size,
            windows = plan.remaining(),
            restricted = self.cursor.is_restricted(),
            requested_ids = self.cursor.remaining().len(),
            "Built chunk iterator"
        );

        Ok(ChunkIterator::new(
            self.fetcher,
            plan,
            self.cursor,
            self.hooks,
        ))
    }
}

impl<F: WindowFetcher, Rec, S> fmt::Debug for ChunkIteratorBuilder<F, Rec, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkIteratorBuilder")
            .field("chunk_size", &self.chunk_size)
            .field("max", &self.max)
            .field("cursor", &self.cursor)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}
