//! Forward-only intersection of a sorted id subset with ascending windows.

use crate::{ChunkError, Result, Window};

/// Subset ids that fall inside one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowIds<'a> {
    /// No subset filter is configured, so any window may hold data.
    Unrestricted,
    /// The subset ids inside the window, ascending. May be empty.
    Matched(&'a [u64]),
}

impl<'a> WindowIds<'a> {
    /// Returns whether the window may hold requested data.
    #[inline]
    pub fn contains_any(&self) -> bool {
        match self {
            Self::Unrestricted => true,
            Self::Matched(ids) => !ids.is_empty(),
        }
    }

    /// Returns the matched ids, or `None` when unrestricted.
    #[inline]
    pub fn as_slice(&self) -> Option<&'a [u64]> {
        match self {
            Self::Unrestricted => None,
            Self::Matched(ids) => Some(ids),
        }
    }
}

/// Cursor over an optional, ascending id subset.
///
/// Windows must be presented in ascending order. Each call moves the cursor
/// past every id at or below the window's end, so an id is inspected at most
/// once over a whole traversal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdCursor {
    ids: Option<Box<[u64]>>,
    position: usize,
}

impl IdCursor {
    /// Creates a cursor without a subset filter.
    pub fn unrestricted() -> Self {
        Self::default()
    }

    /// Creates a cursor over `ids`, sorting them ascending and dropping duplicates.
    ///
    /// An empty input means "no subset" and produces an unrestricted cursor.
    pub fn new(ids: impl IntoIterator<Item = u64>) -> Self {
        let mut ids: Vec<u64> = ids.into_iter().collect();
        if ids.is_empty() {
            return Self::unrestricted();
        }

        ids.sort_unstable();
        ids.dedup();

        Self {
            ids: Some(ids.into_boxed_slice()),
            position: 0,
        }
    }

    /// Creates a cursor over ids the caller guarantees to be ascending.
    ///
    /// Duplicates are accepted. An empty input produces an unrestricted cursor.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::UnsortedIds`] at the first id smaller than its predecessor.
    pub fn from_sorted(ids: Vec<u64>) -> Result<Self> {
        if let Some(position) = ids.windows(2).position(|pair| pair[0] > pair[1]) {
            return Err(ChunkError::UnsortedIds {
                position: position + 1,
            });
        }

        if ids.is_empty() {
            return Ok(Self::unrestricted());
        }

        Ok(Self {
            ids: Some(ids.into_boxed_slice()),
            position: 0,
        })
    }

    /// Returns whether a subset filter is configured.
    #[inline]
    pub fn is_restricted(&self) -> bool {
        self.ids.is_some()
    }

    /// Returns the ids not yet consumed by any window.
    #[inline]
    pub fn remaining(&self) -> &[u64] {
        match &self.ids {
            Some(ids) => &ids[self.position..],
            None => &[],
        }
    }

    /// Moves the cursor back to the first id, for a fresh traversal.
    #[inline]
    pub fn rewind(&mut self) {
        self.position = 0;
    }

    /// Consumes every id up to `window.end` and returns the ids inside the window.
    ///
    /// Ids below `window.start` are dropped since later windows only move forward.
    pub fn consume(&mut self, window: &Window) -> WindowIds<'_> {
        let Some(ids) = &self.ids else {
            return WindowIds::Unrestricted;
        };

        let rest = &ids[self.position..];
        let below = rest.partition_point(|id| *id < window.start);
        let through = rest.partition_point(|id| *id <= window.end);

        let matched = &rest[below..through];
        self.position += through;

        WindowIds::Matched(matched)
    }

    /// Returns whether any remaining subset id lies inside `window`, advancing the cursor.
    ///
    /// Always `true` without a subset filter.
    #[inline]
    pub fn contains_at_least_one(&mut self, window: &Window) -> bool {
        self.consume(window).contains_any()
    }
}
