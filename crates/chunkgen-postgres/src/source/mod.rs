//! Window sources backed by a database.
//!
//! A [`ChunkSource`] knows the highest identifier it holds and returns the
//! rows of one window as a stream. [`PgChunkSource`] implements it for a
//! [`TableQuery`] on a pooled [`PgClient`].

use std::time::Instant;

use async_stream::try_stream;
use chunkgen_core::Window;
#[cfg(feature = "config")]
use clap::ValueEnum;
use diesel::pg::Pg;
use diesel::sql_types::{Array, BigInt, Nullable};
use diesel::{OptionalExtension, QueryableByName};
use diesel_async::RunQueryDsl;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::{PgClient, PgError, PgResult, TableQuery, TRACING_TARGET_QUERY};

/// A boxed stream of rows from one window.
pub type RecordStream<R> = BoxStream<'static, PgResult<R>>;

/// Source of identifier-ordered rows, fetched one window at a time.
#[async_trait::async_trait]
pub trait ChunkSource: Send + Sync + 'static {
    /// Row type produced by the source.
    type Record: Send + 'static;

    /// Returns the highest identifier, or 0 when the source holds no rows.
    async fn max_id(&self) -> PgResult<u64>;

    /// Returns the rows whose identifiers fall within `window`, ascending.
    ///
    /// With `ids`, only rows with one of those identifiers are returned. The
    /// ids are sorted and all lie inside the window. Nothing is read until
    /// the stream is polled, and resources held for the window are released
    /// when the stream ends or is dropped.
    fn fetch_window(&self, window: Window, ids: Option<Vec<u64>>) -> RecordStream<Self::Record>;
}

/// How rows of a window are read from the database.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(AsRefStr, Display, EnumString)]
#[derive(Serialize, Deserialize)]
#[cfg_attr(feature = "config", derive(ValueEnum))]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    /// Loads the whole window, then releases the connection before yielding.
    Buffered,
    /// Reads rows incrementally while holding the connection.
    #[default]
    Streamed,
}

/// [`ChunkSource`] over a table, yielding rows decoded as `R`.
pub struct PgChunkSource<R> {
    client: PgClient,
    query: TableQuery,
    fetch_mode: FetchMode,
    _record: std::marker::PhantomData<fn() -> R>,
}

impl<R> PgChunkSource<R>
where
    R: QueryableByName<Pg> + Send + 'static,
{
    /// Creates a source over `query`.
    ///
    /// # Errors
    ///
    /// Returns [`PgError::Config`] if the query's table or id column is not a
    /// valid identifier.
    pub fn new(client: PgClient, query: TableQuery) -> PgResult<Self> {
        query.validate()?;

        Ok(Self {
            client,
            query,
            fetch_mode: FetchMode::default(),
            _record: std::marker::PhantomData,
        })
    }

    /// Sets how window rows are read.
    pub fn with_fetch_mode(mut self, fetch_mode: FetchMode) -> Self {
        self.fetch_mode = fetch_mode;
        self
    }

    /// Returns the traversed query.
    #[inline]
    pub fn query(&self) -> &TableQuery {
        &self.query
    }

    /// Returns the fetch mode.
    #[inline]
    pub fn fetch_mode(&self) -> FetchMode {
        self.fetch_mode
    }
}

#[async_trait::async_trait]
impl<R> ChunkSource for PgChunkSource<R>
where
    R: QueryableByName<Pg> + Send + 'static,
{
    type Record = R;

    async fn max_id(&self) -> PgResult<u64> {
        #[derive(QueryableByName)]
        struct MaxIdRow {
            #[diesel(sql_type = Nullable<BigInt>)]
            max_id: Option<i64>,
        }

        let sql = self.query.max_id_sql();
        tracing::debug!(target: TRACING_TARGET_QUERY, sql = %sql, "Deriving max id");

        let mut conn = self.client.get_connection().await?;
        let row: Option<MaxIdRow> = diesel::sql_query(sql)
            .get_result(&mut *conn)
            .await
            .optional()
            .map_err(|e| {
                tracing::error!(target: TRACING_TARGET_QUERY, error = %e, "Max id lookup failed");
                PgError::from(e)
            })?;

        let max_id = row
            .and_then(|row| row.max_id)
            .and_then(|max_id| u64::try_from(max_id).ok())
            .unwrap_or(0);

        tracing::debug!(target: TRACING_TARGET_QUERY, max_id, "Derived max id");
        Ok(max_id)
    }

    fn fetch_window(&self, window: Window, ids: Option<Vec<u64>>) -> RecordStream<R> {
        let sql = self.query.window_sql(ids.is_some());
        window_rows(self.client.clone(), sql, window, ids, self.fetch_mode).boxed()
    }
}

impl<R> std::fmt::Debug for PgChunkSource<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgChunkSource")
            .field("query", &self.query)
            .field("fetch_mode", &self.fetch_mode)
            .finish_non_exhaustive()
    }
}

/// Reads one window, holding a pooled connection until its rows are read.
fn window_rows<R>(
    client: PgClient,
    sql: String,
    window: Window,
    ids: Option<Vec<u64>>,
    fetch_mode: FetchMode,
) -> impl Stream<Item = PgResult<R>> + Send + 'static
where
    R: QueryableByName<Pg> + Send + 'static,
{
    try_stream! {
        let started = Instant::now();
        let start = to_bigint(window.start)?;
        let end = to_bigint(window.end)?;
        let ids = ids
            .map(|ids| ids.into_iter().map(to_bigint).collect::<PgResult<Vec<_>>>())
            .transpose()?;

        tracing::trace!(
            target: TRACING_TARGET_QUERY,
            window = %window,
            restricted_ids = ids.as_ref().map(Vec::len),
            fetch_mode = %fetch_mode,
            sql = %sql,
            "Fetching window"
        );

        let mut query = diesel::sql_query(sql)
            .into_boxed::<Pg>()
            .bind::<BigInt, _>(start)
            .bind::<BigInt, _>(end);
        if let Some(ids) = ids {
            query = query.bind::<Array<BigInt>, _>(ids);
        }

        let mut conn = client.get_connection().await?;
        let mut row_count = 0usize;

        match fetch_mode {
            FetchMode::Buffered => {
                let rows: Vec<R> = query.load(&mut *conn).await?;
                drop(conn);

                for row in rows {
                    row_count += 1;
                    yield row;
                }
            }
            FetchMode::Streamed => {
                let rows = query.load_stream::<R>(&mut *conn).await?;
                for await row in rows {
                    row_count += 1;
                    yield row?;
                }
                drop(conn);
            }
        }

        tracing::trace!(
            target: TRACING_TARGET_QUERY,
            window = %window,
            row_count,
            elapsed = ?started.elapsed(),
            "Window read, connection released"
        );
    }
}

fn to_bigint(id: u64) -> PgResult<i64> {
    i64::try_from(id)
        .map_err(|_| PgError::Config(format!("identifier {id} exceeds the BIGINT range")))
}
