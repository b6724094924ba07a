//! PostgreSQL client with connection pooling.
//!
//! Chunked traversals check a connection out of the pool for each window and
//! return it once the window's rows have been read.

mod custom_hooks;
mod pg_client;
mod pg_config;

use deadpool::managed::{Object, Pool};
use diesel_async::AsyncPgConnection;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
pub use pg_client::{PgClient, PgPoolStatus};
pub use pg_config::PgConfig;

/// Type alias for the connection pool used by [`PgClient`].
pub type ConnectionPool = Pool<AsyncDieselConnectionManager<AsyncPgConnection>>;

/// Type alias for a connection object from the pool.
pub type PooledConnection = Object<AsyncDieselConnectionManager<AsyncPgConnection>>;
