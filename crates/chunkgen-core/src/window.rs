//! Partitioning of the identifier space into windows.

use std::iter::FusedIterator;

use derive_more::Display;

/// One contiguous slice `[start, end]` of the identifier space.
///
/// Both bounds are inclusive and `start <= end` always holds. `index` is the
/// 0-based position of the window within its [`WindowPlan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display("#{index}[{start}, {end}]")]
pub struct Window {
    /// Position of this window in the plan, starting at 0.
    pub index: usize,
    /// First identifier covered by the window.
    pub start: u64,
    /// Last identifier covered by the window.
    pub end: u64,
}

impl Window {
    /// Returns the number of identifiers covered by the window.
    #[inline]
    pub fn width(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Returns whether `id` falls inside the window.
    #[inline]
    pub fn contains(&self, id: u64) -> bool {
        (self.start..=self.end).contains(&id)
    }
}

/// Returns the number of windows needed to cover `[1, max]`.
///
/// A `chunk_size` of zero yields zero windows.
#[inline]
pub fn window_count(max: u64, chunk_size: u64) -> u64 {
    if chunk_size == 0 {
        return 0;
    }

    max.div_ceil(chunk_size)
}

/// Ascending, non-overlapping windows jointly covering `[1, max]`.
///
/// Every window except possibly the last is exactly `chunk_size` wide.
#[derive(Debug, Clone)]
pub struct WindowPlan {
    max: u64,
    chunk_size: u64,
    next_start: Option<u64>,
    next_index: usize,
}

impl WindowPlan {
    /// Creates a plan over `[1, max]`.
    ///
    /// The plan is empty when `max` or `chunk_size` is zero.
    pub fn new(max: u64, chunk_size: u64) -> Self {
        let next_start = (max > 0 && chunk_size > 0).then_some(1);

        Self {
            max,
            chunk_size,
            next_start,
            next_index: 0,
        }
    }

    /// Returns the highest identifier covered by the plan.
    #[inline]
    pub fn max_id(&self) -> u64 {
        self.max
    }

    /// Returns the number of windows not yet produced.
    #[inline]
    pub fn remaining(&self) -> u64 {
        match self.next_start {
            Some(start) => window_count(self.max - start + 1, self.chunk_size),
            None => 0,
        }
    }

    /// Returns the maximum window width.
    #[inline]
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }
}

impl Iterator for WindowPlan {
    type Item = Window;

    fn next(&mut self) -> Option<Window> {
        let start = self.next_start?;
        let end = start.saturating_add(self.chunk_size - 1).min(self.max);

        self.next_start = end.checked_add(1).filter(|next| *next <= self.max);

        let window = Window {
            index: self.next_index,
            start,
            end,
        };
        self.next_index += 1;

        Some(window)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match usize::try_from(self.remaining()) {
            Ok(remaining) => (remaining, Some(remaining)),
            Err(_) => (usize::MAX, None),
        }
    }
}

impl FusedIterator for WindowPlan {}
