//! Lazy, window-by-window traversal of the identifier space.

use std::fmt;
use std::iter::FusedIterator;

use crate::{Hooks, IdCursor, TRACING_TARGET_ITERATOR, Window, WindowFetcher, WindowPlan};

/// Rows of the window currently being yielded.
struct OpenWindow<Rows> {
    window: Window,
    rows: Option<Rows>,
    yielded: usize,
}

/// A single forward pass over `[1, max]`, yielding records window by window.
///
/// Windows are fetched only when the caller advances past the previous
/// window's records, and the previous window's rows are dropped before the
/// next fetch, so at most one window of raw rows is alive at a time.
///
/// The first error from the fetcher or a hook is yielded as `Some(Err(_))`
/// and ends the traversal.
///
/// Built with [`ChunkIteratorBuilder`].
///
/// [`ChunkIteratorBuilder`]: crate::ChunkIteratorBuilder
pub struct ChunkIterator<F: WindowFetcher, Rec = <F as WindowFetcher>::Raw> {
    fetcher: F,
    plan: WindowPlan,
    cursor: IdCursor,
    hooks: Hooks<F::Raw, Rec, F::Error>,
    current: Option<OpenWindow<F::Rows>>,
    finished: bool,
}

impl<F: WindowFetcher, Rec> ChunkIterator<F, Rec> {
    pub(crate) fn new(
        fetcher: F,
        plan: WindowPlan,
        cursor: IdCursor,
        hooks: Hooks<F::Raw, Rec, F::Error>,
    ) -> Self {
        Self {
            fetcher,
            plan,
            cursor,
            hooks,
            current: None,
            finished: false,
        }
    }

    /// Returns the highest identifier covered by the traversal.
    #[inline]
    pub fn max_id(&self) -> u64 {
        self.plan.max_id()
    }

    /// Returns the maximum window width.
    #[inline]
    pub fn chunk_size(&self) -> u64 {
        self.plan.chunk_size()
    }

    /// Returns the number of windows not yet opened.
    #[inline]
    pub fn windows_remaining(&self) -> u64 {
        self.plan.remaining()
    }

    /// Ends the traversal after an error.
    fn fail(&mut self, error: F::Error) -> Option<Result<Rec, F::Error>> {
        self.finished = true;
        self.current = None;
        Some(Err(error))
    }

    /// Runs before-chunk and fetches the next window, skipping the fetch when
    /// the subset filter rules the window out.
    fn open(&mut self, window: Window) -> Result<OpenWindow<F::Rows>, F::Error> {
        self.hooks.before_chunk(&window)?;

        let ids = self.cursor.consume(&window);
        if !ids.contains_any() {
            tracing::debug!(
                target: TRACING_TARGET_ITERATOR,
                window = %window,
                "Skipping window without requested ids"
            );

            return Ok(OpenWindow {
                window,
                rows: None,
                yielded: 0,
            });
        }

        tracing::debug!(
            target: TRACING_TARGET_ITERATOR,
            window = %window,
            requested_ids = ids.as_slice().map(<[u64]>::len),
            "Fetching window"
        );

        let rows = self.fetcher.fetch(window, ids.as_slice())?;

        Ok(OpenWindow {
            window,
            rows: Some(rows),
            yielded: 0,
        })
    }
}

impl<F: WindowFetcher, Rec> Iterator for ChunkIterator<F, Rec> {
    type Item = Result<Rec, F::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.finished {
                return None;
            }

            let Some(open) = &mut self.current else {
                let Some(window) = self.plan.next() else {
                    self.finished = true;
                    return None;
                };

                match self.open(window) {
                    Ok(open) => self.current = Some(open),
                    Err(error) => return self.fail(error),
                }
                continue;
            };

            if let Some(raw) = open.rows.as_mut().and_then(Iterator::next) {
                open.yielded += 1;

                let record = match self.hooks.before_record(raw) {
                    Ok(record) => record,
                    Err(error) => return self.fail(error),
                };

                tracing::trace!(target: TRACING_TARGET_ITERATOR, window = %open.window, "Yielding record");

                if let Err(error) = self.hooks.after_record(&record) {
                    return self.fail(error);
                }

                return Some(Ok(record));
            }

            let Some(OpenWindow {
                window,
                rows,
                yielded,
            }) = self.current.take()
            else {
                continue;
            };

            // Release the exhausted window's rows before after-chunk and the next fetch.
            drop(rows);

            tracing::debug!(
                target: TRACING_TARGET_ITERATOR,
                window = %window,
                records = yielded,
                "Finished window"
            );

            if let Err(error) = self.hooks.after_chunk(&window) {
                return self.fail(error);
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.finished {
            return (0, Some(0));
        }

        (0, None)
    }
}

impl<F: WindowFetcher, Rec> FusedIterator for ChunkIterator<F, Rec> {}

impl<F: WindowFetcher, Rec> fmt::Debug for ChunkIterator<F, Rec> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkIterator")
            .field("max_id", &self.plan.max_id())
            .field("chunk_size", &self.plan.chunk_size())
            .field("windows_remaining", &self.plan.remaining())
            .field("restricted", &self.cursor.is_restricted())
            .field("hooks", &self.hooks)
            .field("current", &self.current.as_ref().map(|open| open.window))
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}
