//! The window fetch capability and its in-memory implementations.

use std::convert::Infallible;

use crate::Window;

/// Loads the raw rows of one window.
///
/// Implementations decide where rows come from; the traversal only asks for
/// each window once, in ascending order, after the previous window's rows have
/// been dropped. Rows are returned in the order they should be yielded.
///
/// Closures `FnMut(Window, Option<&[u64]>) -> Result<I, E>` implement this
/// trait directly.
pub trait WindowFetcher {
    /// A raw row as produced by the source.
    type Raw;
    /// Error raised by the source, returned unchanged by the traversal.
    type Error;
    /// Iterator over one window's rows.
    type Rows: Iterator<Item = Self::Raw>;

    /// Fetches the rows whose identifiers lie in `[window.start, window.end]`.
    ///
    /// `ids` holds the subset ids inside the window when a subset filter is
    /// configured, and is `None` otherwise. It is never an empty slice: windows
    /// without any subset id are skipped before reaching the fetcher.
    fn fetch(&mut self, window: Window, ids: Option<&[u64]>) -> Result<Self::Rows, Self::Error>;
}

impl<F, I, E> WindowFetcher for F
where
    F: FnMut(Window, Option<&[u64]>) -> Result<I, E>,
    I: IntoIterator,
{
    type Error = E;
    type Raw = I::Item;
    type Rows = I::IntoIter;

    #[inline]
    fn fetch(&mut self, window: Window, ids: Option<&[u64]>) -> Result<Self::Rows, E> {
        self(window, ids).map(IntoIterator::into_iter)
    }
}

/// Converts 1-based inclusive bounds into a 0-based range clamped to `len`.
fn position_range(window: &Window, len: usize) -> std::ops::Range<usize> {
    let to_offset = |position: u64| usize::try_from(position).map_or(len, |p| p.min(len));
    to_offset(window.start - 1)..to_offset(window.end)
}

/// Returns the 0-based offsets a window addresses, in ascending order.
///
/// With `ids`, only the positions listed there are addressed.
fn window_offsets(window: &Window, ids: Option<&[u64]>, len: usize) -> Vec<usize> {
    match ids {
        Some(ids) => ids
            .iter()
            .filter(|id| window.contains(**id))
            .filter_map(|id| usize::try_from(id - 1).ok())
            .filter(|offset| *offset < len)
            .collect(),
        None => position_range(window, len).collect(),
    }
}

/// Serves windows from a borrowed slice, addressing items by 1-based position.
///
/// When the traversal is restricted to a subset, only the listed positions
/// are returned.
#[derive(Debug, Clone, Copy)]
pub struct SliceFetcher<'a, T> {
    items: &'a [T],
}

impl<'a, T> SliceFetcher<'a, T> {
    /// Creates a fetcher over `items`.
    pub fn new(items: &'a [T]) -> Self {
        Self { items }
    }

    /// Returns the number of addressable positions.
    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns whether the slice is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<'a, T> WindowFetcher for SliceFetcher<'a, T> {
    type Error = Infallible;
    type Raw = &'a T;
    type Rows = std::vec::IntoIter<&'a T>;

    fn fetch(&mut self, window: Window, ids: Option<&[u64]>) -> Result<Self::Rows, Infallible> {
        let items: &'a [T] = self.items;
        let rows: Vec<&'a T> = window_offsets(&window, ids, items.len())
            .into_iter()
            .map(|offset| &items[offset])
            .collect();

        Ok(rows.into_iter())
    }
}

/// Serves windows from an owned vector, cloning the items of each window.
#[derive(Debug, Clone)]
pub struct VecFetcher<T> {
    items: Vec<T>,
}

impl<T> VecFetcher<T> {
    /// Creates a fetcher owning `items`.
    pub fn new(items: Vec<T>) -> Self {
        Self { items }
    }

    /// Returns the number of addressable positions.
    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns whether the vector is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T: Clone> WindowFetcher for VecFetcher<T> {
    type Error = Infallible;
    type Raw = T;
    type Rows = std::vec::IntoIter<T>;

    fn fetch(&mut self, window: Window, ids: Option<&[u64]>) -> Result<Self::Rows, Infallible> {
        let rows: Vec<T> = match ids {
            None => self.items[position_range(&window, self.items.len())].to_vec(),
            Some(_) => window_offsets(&window, ids, self.items.len())
                .into_iter()
                .map(|offset| self.items[offset].clone())
                .collect(),
        };

        Ok(rows.into_iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(start: u64, end: u64) -> Window {
        Window {
            index: 0,
            start,
            end,
        }
    }

    #[test]
    fn slice_windows_are_one_based() {
        let items = ["a", "b", "c", "d", "e"];
        let mut fetcher = SliceFetcher::new(&items);

        let first: Vec<_> = fetcher.fetch(window(1, 2), None).unwrap().collect();
        let last: Vec<_> = fetcher.fetch(window(5, 6), None).unwrap().collect();

        assert_eq!(first, vec![&"a", &"b"]);
        assert_eq!(last, vec![&"e"]);
    }

    #[test]
    fn out_of_bounds_window_is_empty() {
        let mut fetcher = VecFetcher::new(vec![1, 2, 3]);
        assert_eq!(fetcher.fetch(window(10, 20), None).unwrap().count(), 0);
    }

    #[test]
    fn vec_fetcher_clones_window() {
        let mut fetcher = VecFetcher::new(vec![10, 20, 30, 40]);
        let rows: Vec<i32> = fetcher.fetch(window(2, 3), None).unwrap().collect();

        assert_eq!(rows, vec![20, 30]);
        assert_eq!(fetcher.len(), 4);
    }

    #[test]
    fn subset_positions_only() {
        let items: Vec<u32> = (1..=10).collect();
        let mut slice = SliceFetcher::new(&items);
        let mut owned = VecFetcher::new(items.clone());

        let borrowed: Vec<&u32> = slice.fetch(window(1, 5), Some(&[2, 4])).unwrap().collect();
        let cloned: Vec<u32> = owned.fetch(window(6, 10), Some(&[7, 10])).unwrap().collect();

        assert_eq!(borrowed, vec![&2, &4]);
        assert_eq!(cloned, vec![7, 10]);
    }

    #[test]
    fn subset_positions_past_end_are_ignored() {
        let mut fetcher = VecFetcher::new(vec!["a", "b", "c"]);
        let rows: Vec<&str> = fetcher.fetch(window(1, 5), Some(&[3, 5])).unwrap().collect();

        assert_eq!(rows, vec!["c"]);
    }

    #[test]
    fn closures_are_fetchers() {
        let mut calls = 0;
        let mut fetcher = |w: Window, ids: Option<&[u64]>| -> Result<Vec<u64>, ()> {
            calls += 1;
            Ok(ids.map_or_else(|| (w.start..=w.end).collect(), <[u64]>::to_vec))
        };

        let all: Vec<u64> = WindowFetcher::fetch(&mut fetcher, window(1, 3), None)
            .unwrap()
            .collect();
        let some: Vec<u64> = WindowFetcher::fetch(&mut fetcher, window(4, 6), Some(&[5]))
            .unwrap()
            .collect();

        assert_eq!(all, vec![1, 2, 3]);
        assert_eq!(some, vec![5]);
        assert_eq!(calls, 2);
    }
}
