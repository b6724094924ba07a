//! Traversal configuration.

use anyhow::{Result as AnyhowResult, anyhow};
use chunkgen_core::DEFAULT_CHUNK_SIZE;
use chunkgen_postgres::{FetchMode, TableQuery};
use clap::Args;
use serde::{Deserialize, Serialize};

use crate::TRACING_TARGET_CONFIG;

/// Which table to export and how to window it.
///
/// # Environment Variables
///
/// - `CHUNKGEN_TABLE` - Table to export, optionally schema-qualified
/// - `CHUNKGEN_ID_COLUMN` - Integer identifier column (default: id)
/// - `CHUNKGEN_FILTER` - SQL condition rows must satisfy, columns as `t.<name>`
/// - `CHUNKGEN_CHUNK_SIZE` - Identifiers per window (default: 100)
/// - `CHUNKGEN_IDS` - Comma-separated identifiers to export instead of all rows
/// - `CHUNKGEN_FETCH_MODE` - `streamed` or `buffered` (default: streamed)
#[derive(Debug, Clone, Args, Serialize, Deserialize)]
#[must_use = "config does nothing unless you use it"]
pub struct ScanConfig {
    /// Table to export, optionally schema-qualified.
    #[arg(long, env = "CHUNKGEN_TABLE")]
    pub table: String,

    /// Integer identifier column the windows are laid over.
    #[arg(long, env = "CHUNKGEN_ID_COLUMN", default_value = "id")]
    pub id_column: String,

    /// SQL condition rows must satisfy; refer to columns as `t.<name>`.
    #[arg(long, env = "CHUNKGEN_FILTER")]
    pub filter: Option<String>,

    /// Number of identifiers covered by one window.
    #[arg(long, env = "CHUNKGEN_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: u64,

    /// Identifiers to export; all rows when empty.
    #[arg(long, env = "CHUNKGEN_IDS", value_delimiter = ',')]
    #[serde(default)]
    pub ids: Vec<u64>,

    /// Whether rows are streamed from the database or loaded per window.
    #[arg(long, env = "CHUNKGEN_FETCH_MODE", value_enum, default_value_t = FetchMode::Streamed)]
    #[serde(default)]
    pub fetch_mode: FetchMode,
}

impl ScanConfig {
    /// Validates the traversal settings.
    pub fn validate(&self) -> AnyhowResult<()> {
        if self.chunk_size == 0 {
            return Err(anyhow!("chunk size must be greater than zero"));
        }

        self.table_query().validate()?;
        Ok(())
    }

    /// Returns the query selecting each row as its id and a JSON document.
    pub fn table_query(&self) -> TableQuery {
        let select = format!("t.{}::BIGINT AS id, to_jsonb(t) AS data", self.id_column);
        let query = TableQuery::new(&self.table)
            .with_id_column(&self.id_column)
            .with_select(select);

        match &self.filter {
            Some(filter) => query.with_filter(filter),
            None => query,
        }
    }

    /// Logs the traversal settings.
    pub fn log(&self) {
        tracing::info!(
            target: TRACING_TARGET_CONFIG,
            table = %self.table,
            id_column = %self.id_column,
            filtered = self.filter.is_some(),
            chunk_size = self.chunk_size,
            requested_ids = self.ids.len(),
            fetch_mode = %self.fetch_mode,
            "Scan configuration"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ScanConfig {
        ScanConfig {
            table: "orders".to_owned(),
            id_column: "order_id".to_owned(),
            filter: Some("t.total > 0".to_owned()),
            chunk_size: 50,
            ids: Vec::new(),
            fetch_mode: FetchMode::Streamed,
        }
    }

    #[test]
    fn builds_json_projection() {
        let sql = config().table_query().window_sql(false);
        assert_eq!(
            sql,
            "SELECT t.order_id::BIGINT AS id, to_jsonb(t) AS data FROM orders AS t \
             WHERE (t.total > 0) AND t.order_id BETWEEN $1 AND $2 ORDER BY t.order_id ASC"
        );
    }

    #[test]
    fn rejects_zero_chunk_size() {
        let config = ScanConfig {
            chunk_size: 0,
            ..config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_invalid_table() {
        let config = ScanConfig {
            table: "orders; --".to_owned(),
            ..config()
        };
        assert!(config.validate().is_err());
    }
}
