//! Error types for iterator construction.

use std::borrow::Cow;

/// Errors raised while assembling a chunk iterator.
///
/// Traversal itself never produces a `ChunkError`: failures from the window
/// fetcher and the hooks are returned unchanged in their own error type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[must_use = "configuration errors should be handled appropriately"]
pub enum ChunkError {
    /// Invalid configuration, such as a zero chunk size.
    #[error("Configuration error: {0}")]
    Config(Cow<'static, str>),

    /// An id subset that was declared sorted is not in ascending order.
    ///
    /// `position` is the index of the first id smaller than its predecessor.
    #[error("Id subset is not sorted ascending at position {position}")]
    UnsortedIds { position: usize },
}

impl ChunkError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Config(message.into())
    }
}

/// Specialized [`Result`] type for iterator construction.
pub type Result<T, E = ChunkError> = std::result::Result<T, E>;
