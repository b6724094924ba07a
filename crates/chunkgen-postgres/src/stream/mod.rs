//! Async window-by-window traversal over a [`ChunkSource`].

use std::fmt;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_stream::try_stream;
use chunkgen_core::{
    ChunkError, DEFAULT_CHUNK_SIZE, Hooks, IdCursor, RecordOpen, RecordSettled, Window, WindowPlan,
};
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};

use crate::{ChunkSource, PgError, PgResult, TRACING_TARGET_STREAM};

/// Configures and builds a [`ChunkStream`].
///
/// Hooks share the [`PgError`] error type; an error from any hook ends the
/// traversal. The before-record hook is only available in the [`RecordOpen`]
/// stage, before any record hook has been set.
#[must_use = "builders do nothing unless built"]
pub struct ChunkStreamBuilder<S: ChunkSource, Rec = <S as ChunkSource>::Record, St = RecordOpen> {
    source: S,
    chunk_size: u64,
    cursor: IdCursor,
    hooks: Hooks<S::Record, Rec, PgError>,
    _stage: PhantomData<St>,
}

impl<S: ChunkSource> ChunkStreamBuilder<S> {
    /// Creates a builder traversing every row of `source`.
    pub fn new(source: S) -> Self {
        Self {
            source,
            chunk_size: DEFAULT_CHUNK_SIZE,
            cursor: IdCursor::unrestricted(),
            hooks: Hooks::new(),
            _stage: PhantomData,
        }
    }

    /// Sets the hook turning source rows into records, possibly of another type.
    pub fn on_before_record<T, H>(self, hook: H) -> ChunkStreamBuilder<S, T, RecordSettled>
    where
        H: FnMut(S::Record) -> PgResult<T> + Send + 'static,
    {
        // Open builders never hold an after-record hook.
        let (hooks, _) = self.hooks.with_before_record(Box::new(hook));

        ChunkStreamBuilder {
            source: self.source,
            chunk_size: self.chunk_size,
            cursor: self.cursor,
            hooks,
            _stage: PhantomData,
        }
    }
}

impl<S: ChunkSource, Rec: Send + 'static, St> ChunkStreamBuilder<S, Rec, St> {
    /// Sets the window width.
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Restricts the traversal to the given identifiers. An empty set means
    /// no restriction.
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
        H: FnMut(&Window) -> PgResult<()> + Send + 'static,
    {
        self.hooks.set_before_chunk(Box::new(hook));
        self
    }

    /// Sets the hook run after each window's rows are exhausted and its
    /// connection has been returned to the pool.
    pub fn on_after_chunk<H>(mut self, hook: H) -> Self
    where
        H: FnMut(&Window) -> PgResult<()> + Send + 'static,
    {
        self.hooks.set_after_chunk(Box::new(hook));
        self
    }

    /// Sets the hook run for every record.
    ///
    /// The hook runs while the stream is polled, before the record is
    /// yielded, so it sees each record before the caller does. If it fails,
    /// the error is yielded in place of the record and the stream ends.
    pub fn on_after_record<H>(mut self, hook: H) -> ChunkStreamBuilder<S, Rec, RecordSettled>
    where
        H: FnMut(&Rec) -> PgResult<()> + Send + 'static,
    {
        self.hooks.set_after_record(Box::new(hook));

        ChunkStreamBuilder {
            source: self.source,
            chunk_size: self.chunk_size,
            cursor: self.cursor,
            hooks: self.hooks,
            _stage: PhantomData,
        }
    }

    /// Derives the highest identifier from the source and builds the stream.
    ///
    /// # Errors
    ///
    /// Returns [`PgError::Chunk`] if the chunk size is zero, or the error of
    /// the max-id lookup.
    pub async fn build(self) -> PgResult<ChunkStream<Rec>> {
        if self.chunk_size == 0 {
            return Err(ChunkError::config("chunk_size must be greater than zero").into());
        }

        let max_id = self.source.max_id().await?;
        let plan = WindowPlan::new(max_id, self.chunk_size);
        let window_count = plan.remaining();

        tracing::debug!(
            target: TRACING_TARGET_STREAM,
            max_id,
            chunk_size = self.chunk_size,
            windows = window_count,
            restricted = self.cursor.is_restricted(),
            requested_ids = self.cursor.remaining().len(),
            "Built chunk stream"
        );

        let stream = traverse(self.source, plan, self.cursor, self.hooks).boxed();
        Ok(ChunkStream {
            stream,
            max_id,
            chunk_size: self.chunk_size,
            window_count,
        })
    }
}

impl<S: ChunkSource, Rec, St> fmt::Debug for ChunkStreamBuilder<S, Rec, St> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkStreamBuilder")
            .field("chunk_size", &self.chunk_size)
            .field("cursor", &self.cursor)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

/// Walks the window plan, fetching only windows that may hold requested ids.
fn traverse<S, Rec>(
    source: S,
    plan: WindowPlan,
    mut cursor: IdCursor,
    mut hooks: Hooks<S::Record, Rec, PgError>,
) -> impl Stream<Item = PgResult<Rec>> + Send + 'static
where
    S: ChunkSource,
    Rec: Send + 'static,
{
    try_stream! {
        for window in plan {
            hooks.before_chunk(&window)?;

            let ids = cursor.consume(&window);
            if ids.contains_any() {
                let ids = ids.as_slice().map(<[u64]>::to_vec);
                tracing::debug!(
                    target: TRACING_TARGET_STREAM,
                    window = %window,
                    requested_ids = ids.as_ref().map(Vec::len),
                    "Fetching window"
                );

                let mut rows = source.fetch_window(window, ids);
                let mut records = 0usize;
                while let Some(raw) = rows.next().await {
                    let record = hooks.before_record(raw?)?;
                    hooks.after_record(&record)?;
                    records += 1;
                    yield record;
                }

                // Release the window's connection before after-chunk and the next fetch.
                drop(rows);

                tracing::debug!(
                    target: TRACING_TARGET_STREAM,
                    window = %window,
                    records,
                    "Finished window"
                );
            } else {
                tracing::debug!(
                    target: TRACING_TARGET_STREAM,
                    window = %window,
                    "Skipping window without requested ids"
                );
            }

            hooks.after_chunk(&window)?;
        }
    }
}

/// A single forward pass over a source, yielding records window by window.
///
/// Nothing is fetched until the stream is polled. Dropping the stream ends
/// the traversal and returns any checked-out connection to the pool.
pub struct ChunkStream<R> {
    stream: BoxStream<'static, PgResult<R>>,
    max_id: u64,
    chunk_size: u64,
    window_count: u64,
}

impl<R> ChunkStream<R> {
    /// Returns the highest identifier derived from the source.
    #[inline]
    pub fn max_id(&self) -> u64 {
        self.max_id
    }

    /// Returns the window width.
    #[inline]
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Returns the number of windows in the traversal, skipped ones included.
    #[inline]
    pub fn window_count(&self) -> u64 {
        self.window_count
    }

    /// Consumes the stream and returns the inner boxed stream.
    pub fn into_inner(self) -> BoxStream<'static, PgResult<R>> {
        self.stream
    }
}

impl<R> Stream for ChunkStream<R> {
    type Item = PgResult<R>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.stream).poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.stream.size_hint()
    }
}

impl<R> fmt::Debug for ChunkStream<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkStream")
            .field("max_id", &self.max_id)
            .field("chunk_size", &self.chunk_size)
            .field("window_count", &self.window_count)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use futures::TryStreamExt;

    use super::*;
    use crate::RecordStream;

    /// Rows that report how many windows are alive at once.
    struct TrackedRows {
        rows: std::vec::IntoIter<u64>,
        alive: Arc<AtomicUsize>,
    }

    impl Drop for TrackedRows {
        fn drop(&mut self) {
            self.alive.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// In-memory table of identifiers.
    #[derive(Default)]
    struct MemorySource {
        ids: Vec<u64>,
        fail_at: Option<usize>,
        fetched: Arc<Mutex<Vec<(usize, Option<Vec<u64>>)>>>,
        alive: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl MemorySource {
        fn with_ids(ids: impl IntoIterator<Item = u64>) -> Self {
            Self {
                ids: ids.into_iter().collect(),
                ..Self::default()
            }
        }
    }

    #[async_trait::async_trait]
    impl ChunkSource for MemorySource {
        type Record = u64;

        async fn max_id(&self) -> PgResult<u64> {
            Ok(self.ids.iter().copied().max().unwrap_or(0))
        }

        fn fetch_window(&self, window: Window, ids: Option<Vec<u64>>) -> RecordStream<u64> {
            self.fetched
                .lock()
                .unwrap()
                .push((window.index, ids.clone()));

            if self.fail_at == Some(window.index) {
                let error = PgError::Unexpected("window fetch failed".into());
                return futures::stream::iter([Err(error)]).boxed();
            }

            let rows: Vec<u64> = self
                .ids
                .iter()
                .copied()
                .filter(|id| window.contains(*id))
                .filter(|id| ids.as_ref().is_none_or(|ids| ids.contains(id)))
                .collect();

            let alive = self.alive.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(alive, Ordering::SeqCst);
            let tracked = TrackedRows {
                rows: rows.into_iter(),
                alive: Arc::clone(&self.alive),
            };

            futures::stream::unfold(tracked, |mut tracked| async move {
                let row = tracked.rows.next()?;
                Some((Ok(row), tracked))
            })
            .boxed()
        }
    }

    #[tokio::test]
    async fn yields_every_row_in_order() {
        let stream = ChunkStreamBuilder::new(MemorySource::with_ids(1..=250))
            .with_chunk_size(100)
            .build()
            .await
            .unwrap();

        assert_eq!(stream.max_id(), 250);
        assert_eq!(stream.window_count(), 3);

        let rows: Vec<u64> = stream.try_collect().await.unwrap();
        assert_eq!(rows, (1..=250).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn skips_windows_without_requested_ids() {
        let source = MemorySource::with_ids(1..=400);
        let fetched = Arc::clone(&source.fetched);

        let rows: Vec<u64> = ChunkStreamBuilder::new(source)
            .with_chunk_size(100)
            .with_ids([400, 151, 5, 150])
            .build()
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        assert_eq!(rows, vec![5, 150, 151, 400]);
        assert_eq!(
            *fetched.lock().unwrap(),
            vec![
                (0, Some(vec![5])),
                (1, Some(vec![150, 151])),
                (3, Some(vec![400])),
            ]
        );
    }

    #[tokio::test]
    async fn empty_source_has_no_windows() {
        let chunks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&chunks);

        let source = MemorySource::default();
        let fetched = Arc::clone(&source.fetched);
        let stream = ChunkStreamBuilder::new(source)
            .on_before_chunk(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .build()
            .await
            .unwrap();

        assert_eq!(stream.max_id(), 0);
        assert_eq!(stream.window_count(), 0);

        let rows: Vec<u64> = stream.try_collect().await.unwrap();
        assert!(rows.is_empty());
        assert_eq!(chunks.load(Ordering::SeqCst), 0);
        assert!(fetched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn holds_one_window_at_a_time() {
        let source = MemorySource::with_ids((1..=1_000).step_by(3));
        let alive = Arc::clone(&source.alive);
        let peak = Arc::clone(&source.peak);

        let after_chunk_alive = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&after_chunk_alive);
        let window_alive = Arc::clone(&alive);

        let rows: Vec<u64> = ChunkStreamBuilder::new(source)
            .with_chunk_size(64)
            .on_after_chunk(move |_| {
                seen.lock().unwrap().push(window_alive.load(Ordering::SeqCst));
                Ok(())
            })
            .build()
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        assert_eq!(rows.len(), 334);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(alive.load(Ordering::SeqCst), 0);
        assert!(after_chunk_alive.lock().unwrap().iter().all(|n| *n == 0));
    }

    #[tokio::test]
    async fn hooks_run_in_order() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let (before, after, mapped, observed) = (
            Arc::clone(&events),
            Arc::clone(&events),
            Arc::clone(&events),
            Arc::clone(&events),
        );

        let rows: Vec<String> = ChunkStreamBuilder::new(MemorySource::with_ids([1, 2, 3]))
            .with_chunk_size(2)
            .on_before_chunk(move |w| {
                before.lock().unwrap().push(format!("before {}", w.index));
                Ok(())
            })
            .on_after_chunk(move |w| {
                after.lock().unwrap().push(format!("after {}", w.index));
                Ok(())
            })
            .on_before_record(move |raw: u64| {
                mapped.lock().unwrap().push(format!("map {raw}"));
                Ok(format!("row-{raw}"))
            })
            .on_after_record(move |record: &String| {
                observed.lock().unwrap().push(format!("seen {record}"));
                Ok(())
            })
            .build()
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        assert_eq!(rows, vec!["row-1", "row-2", "row-3"]);
        assert_eq!(
            *events.lock().unwrap(),
            vec![
                "before 0", "map 1", "seen row-1", "map 2", "seen row-2", "after 0",
                "before 1", "map 3", "seen row-3", "after 1",
            ]
        );
    }

    #[tokio::test]
    async fn after_record_runs_before_record_is_yielded() {
        let observed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&observed);

        let mut stream = ChunkStreamBuilder::new(MemorySource::with_ids(1..=5))
            .with_chunk_size(2)
            .on_after_record(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .build()
            .await
            .unwrap();

        let mut received = 0;
        while let Some(row) = stream.try_next().await.unwrap() {
            received += 1;
            assert_eq!(row, received as u64);
            assert_eq!(observed.load(Ordering::SeqCst), received);
        }
        assert_eq!(received, 5);
    }

    #[tokio::test]
    async fn skipped_windows_still_run_chunk_hooks() {
        let windows = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&windows);

        let rows: Vec<u64> = ChunkStreamBuilder::new(MemorySource::with_ids(1..=30))
            .with_chunk_size(10)
            .with_ids([25])
            .on_after_chunk(move |w| {
                seen.lock().unwrap().push(w.index);
                Ok(())
            })
            .build()
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        assert_eq!(rows, vec![25]);
        assert_eq!(*windows.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn fetch_error_ends_stream() {
        let source = MemorySource {
            fail_at: Some(1),
            ..MemorySource::with_ids(1..=30)
        };

        let mut stream = ChunkStreamBuilder::new(source)
            .with_chunk_size(10)
            .build()
            .await
            .unwrap();

        let mut rows = Vec::new();
        let error = loop {
            match stream.next().await {
                Some(Ok(row)) => rows.push(row),
                Some(Err(error)) => break error,
                None => panic!("stream ended without the fetch error"),
            }
        };

        assert_eq!(rows, (1..=10).collect::<Vec<_>>());
        assert!(matches!(error, PgError::Unexpected(_)));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn hook_error_halts_traversal() {
        let source = MemorySource::with_ids(1..=30);
        let fetched = Arc::clone(&source.fetched);

        let result: PgResult<Vec<u64>> = ChunkStreamBuilder::new(source)
            .with_chunk_size(10)
            .on_after_record(|row: &u64| {
                if *row == 12 {
                    return Err(PgError::Unexpected("rejected row".into()));
                }
                Ok(())
            })
            .build()
            .await
            .unwrap()
            .try_collect()
            .await;

        assert!(matches!(result, Err(PgError::Unexpected(_))));
        let windows: Vec<usize> = fetched.lock().unwrap().iter().map(|(index, _)| *index).collect();
        assert_eq!(windows, vec![0, 1]);
    }

    #[tokio::test]
    async fn nothing_is_fetched_before_polling() {
        let source = MemorySource::with_ids(1..=10);
        let fetched = Arc::clone(&source.fetched);

        let mut stream = ChunkStreamBuilder::new(source)
            .with_chunk_size(5)
            .build()
            .await
            .unwrap();
        assert!(fetched.lock().unwrap().is_empty());

        assert_eq!(stream.try_next().await.unwrap(), Some(1));
        assert_eq!(fetched.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejects_zero_chunk_size() {
        let result = ChunkStreamBuilder::new(MemorySource::with_ids(1..=10))
            .with_chunk_size(0)
            .build()
            .await;

        assert!(matches!(result, Err(PgError::Chunk(ChunkError::Config(_)))));
    }
}
