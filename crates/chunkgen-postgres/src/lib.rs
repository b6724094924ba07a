#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

// Tracing target constants for consistent logging.

/// Tracing target for client-related operations.
///
/// Use this target for logging client initialization, configuration, and lifecycle events.
pub const TRACING_TARGET_CLIENT: &str = "chunkgen_postgres::client";

/// Tracing target for database connection operations.
///
/// Use this target for logging connection establishment, pool management, and connection errors.
pub const TRACING_TARGET_CONNECTION: &str = "chunkgen_postgres::connection";

/// Tracing target for database query operations.
///
/// Use this target for logging max-id lookups and window queries.
pub const TRACING_TARGET_QUERY: &str = "chunkgen_postgres::queries";

/// Tracing target for chunk stream traversal.
///
/// Use this target for logging window progress of async traversals.
pub const TRACING_TARGET_STREAM: &str = "chunkgen_postgres::stream";

mod client;
mod query;
mod source;
mod stream;

use std::borrow::Cow;

use chunkgen_core::ChunkError;
use deadpool::managed::TimeoutType;
use diesel::ConnectionError;
use diesel::result::Error;

pub use crate::client::{ConnectionPool, PgClient, PgConfig, PgPoolStatus, PooledConnection};
pub use crate::query::TableQuery;
pub use crate::source::{ChunkSource, FetchMode, PgChunkSource, RecordStream};
pub use crate::stream::{ChunkStream, ChunkStreamBuilder};

pub mod error {
    //! Error types re-exported from the database stack.
    //!
    //! See [`PgError`] for the main error type used throughout this crate.
    //!
    //! [`PgError`]: crate::PgError

    pub use deadpool::managed::TimeoutType;
    pub use diesel::result::{ConnectionError as DieselConnectionError, Error as DieselError};
    pub use diesel_async::pooled_connection::PoolError as DieselPoolError;
    pub use diesel_async::pooled_connection::deadpool::PoolError as DeadpoolError;
}

/// Error type for chunked PostgreSQL traversals.
///
/// Covers invalid configuration, pool and connection failures, query failures
/// and errors raised by traversal hooks.
#[derive(Debug, thiserror::Error)]
#[must_use = "database errors should be handled appropriately"]
pub enum PgError {
    /// Configuration error.
    ///
    /// Invalid connection settings, or a table query without a resolvable
    /// table or identifier column.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Waiting for, creating or recycling a pooled connection timed out.
    #[error("Database operation timed out")]
    Timeout(TimeoutType),

    /// Failed to establish or maintain a database connection.
    #[error("Database connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Database query execution failed.
    #[error("Database query error: {0}")]
    Query(#[from] Error),

    /// Invalid traversal configuration, such as a zero chunk size.
    #[error(transparent)]
    Chunk(#[from] ChunkError),

    /// Unexpected error, including failures reported by traversal hooks.
    #[error("Unexpected error: {0}")]
    Unexpected(Cow<'static, str>),
}

impl PgError {
    /// Returns whether this error indicates a transient failure that might succeed on retry.
    ///
    /// Nothing in this crate retries; the flag is for callers that restart a traversal.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PgError::Timeout(_) | PgError::Connection(ConnectionError::BadConnection(_))
        )
    }
}

impl From<error::DeadpoolError> for PgError {
    fn from(value: error::DeadpoolError) -> Self {
        use error::{DeadpoolError, DieselPoolError};

        match value {
            DeadpoolError::Timeout(timeout) => Self::Timeout(timeout),
            DeadpoolError::Backend(DieselPoolError::QueryError(error)) => Self::Query(error),
            DeadpoolError::Backend(DieselPoolError::ConnectionError(error)) => {
                Self::Connection(error)
            }
            DeadpoolError::PostCreateHook(err) => {
                tracing::warn!(target: TRACING_TARGET_CONNECTION, "Unexpected post-create hook error: {}", err);
                Self::Unexpected(err.to_string().into())
            }
            DeadpoolError::NoRuntimeSpecified => {
                tracing::error!(target: TRACING_TARGET_CONNECTION, "No tokio runtime specified for connection pool");
                Self::Unexpected("No runtime specified".into())
            }
            DeadpoolError::Closed => Self::Connection(ConnectionError::InvalidConnectionUrl(
                "Connection pool is closed".into(),
            )),
        }
    }
}

/// Specialized [`Result`] type for database operations.
pub type PgResult<T, E = PgError> = Result<T, E>;
