#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

// Tracing target constants for consistent logging.

/// Tracing target for window traversal.
///
/// Use this target for logging window fetches, skipped windows and per-record progress.
pub const TRACING_TARGET_ITERATOR: &str = "chunkgen_core::iterator";

/// Tracing target for iterator assembly.
///
/// Use this target for logging builder configuration and validation.
pub const TRACING_TARGET_BUILDER: &str = "chunkgen_core::builder";

mod builder;
mod cursor;
mod error;
mod fetcher;
mod hooks;
mod iterator;
mod window;

pub use crate::builder::{ChunkIteratorBuilder, DEFAULT_CHUNK_SIZE};
pub use crate::cursor::{IdCursor, WindowIds};
pub use crate::error::{ChunkError, Result};
pub use crate::fetcher::{SliceFetcher, VecFetcher, WindowFetcher};
pub use crate::hooks::{ChunkHook, Hooks, RecordHook, RecordMapHook, RecordOpen, RecordSettled};
pub use crate::iterator::ChunkIterator;
pub use crate::window::{Window, WindowPlan, window_count};
