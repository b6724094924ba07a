//! SQL text for max-id lookups and window fetches over one table.
//!
//! Every statement aliases the table as `t`, so filters, projections and
//! grouping expressions can refer to columns as `t.<column>`.

use std::fmt::Write;

use crate::{PgError, PgResult, TRACING_TARGET_QUERY};

/// Default identifier column.
const DEFAULT_ID_COLUMN: &str = "id";

/// Default projection.
const DEFAULT_SELECT: &str = "t.*";

/// A table traversed in windows over its identifier column.
///
/// The table and id column are validated identifiers. The projection, filter
/// and grouping expression are SQL fragments taken as given and must not be
/// built from untrusted input.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "table queries do nothing until handed to a chunk source"]
pub struct TableQuery {
    table: String,
    id_column: String,
    select: String,
    filter: Option<String>,
    group_by: Option<String>,
}

impl TableQuery {
    /// Creates a query over `table`, ordered by the `id` column.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            id_column: DEFAULT_ID_COLUMN.to_owned(),
            select: DEFAULT_SELECT.to_owned(),
            filter: None,
            group_by: None,
        }
    }

    /// Sets the identifier column the windows are laid over.
    pub fn with_id_column(mut self, id_column: impl Into<String>) -> Self {
        self.id_column = id_column.into();
        self
    }

    /// Sets the projection, `t.*` by default.
    pub fn with_select(mut self, select: impl Into<String>) -> Self {
        self.select = select.into();
        self
    }

    /// Restricts rows with a boolean SQL expression.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Groups rows; the max-id lookup then takes the largest group maximum.
    pub fn with_group_by(mut self, group_by: impl Into<String>) -> Self {
        self.group_by = Some(group_by.into());
        self
    }

    /// Returns the table name.
    #[inline]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Returns the identifier column.
    #[inline]
    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    /// Returns whether the query groups rows.
    #[inline]
    pub fn is_grouped(&self) -> bool {
        self.group_by.is_some()
    }

    /// Checks that the table and id column are plain SQL identifiers.
    ///
    /// # Errors
    ///
    /// Returns [`PgError::Config`] if either cannot be resolved.
    pub fn validate(&self) -> PgResult<()> {
        if !is_qualified_identifier(&self.table) {
            tracing::error!(target: TRACING_TARGET_QUERY, table = %self.table, "Invalid table name");
            return Err(PgError::Config(format!(
                "table must be a SQL identifier, got {:?}",
                self.table
            )));
        }

        if !is_identifier(&self.id_column) {
            tracing::error!(target: TRACING_TARGET_QUERY, id_column = %self.id_column, "Invalid id column");
            return Err(PgError::Config(format!(
                "id_column must be a SQL identifier, got {:?}",
                self.id_column
            )));
        }

        if self.select.trim().is_empty() {
            return Err(PgError::Config("select cannot be empty".to_string()));
        }

        Ok(())
    }

    /// Returns the statement deriving the highest identifier.
    ///
    /// The single result column is `max_id`, `NULL` when no row matches.
    pub fn max_id_sql(&self) -> String {
        let mut sql = format!(
            "SELECT MAX(t.{id}) AS max_id FROM {table} AS t",
            id = self.id_column,
            table = self.table,
        );

        if let Some(filter) = &self.filter {
            let _ = write!(sql, " WHERE ({filter})");
        }

        if let Some(group_by) = &self.group_by {
            let _ = write!(sql, " GROUP BY {group_by} ORDER BY max_id DESC LIMIT 1");
        }

        sql
    }

    /// Returns the statement fetching one window in ascending id order.
    ///
    /// Binds `$1` and `$2` as the inclusive window bounds (`BIGINT`) and, when
    /// `restricted`, `$3` as the `BIGINT[]` of requested ids inside the window.
    pub fn window_sql(&self, restricted: bool) -> String {
        let mut sql = format!(
            "SELECT {select} FROM {table} AS t WHERE ",
            select = self.select,
            table = self.table,
        );

        if let Some(filter) = &self.filter {
            let _ = write!(sql, "({filter}) AND ");
        }

        let _ = write!(sql, "t.{} BETWEEN $1 AND $2", self.id_column);

        if restricted {
            let _ = write!(sql, " AND t.{} = ANY($3)", self.id_column);
        }

        if let Some(group_by) = &self.group_by {
            let _ = write!(sql, " GROUP BY {group_by}");
        }

        let _ = write!(sql, " ORDER BY t.{} ASC", self.id_column);
        sql
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

fn is_qualified_identifier(name: &str) -> bool {
    match name.split_once('.') {
        Some((schema, table)) => is_identifier(schema) && is_identifier(table),
        None => is_identifier(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ungrouped_max_id() {
        let query = TableQuery::new("orders");
        assert_eq!(
            query.max_id_sql(),
            "SELECT MAX(t.id) AS max_id FROM orders AS t"
        );
    }

    #[test]
    fn filtered_max_id() {
        let query = TableQuery::new("orders").with_filter("t.status = 'open'");
        assert_eq!(
            query.max_id_sql(),
            "SELECT MAX(t.id) AS max_id FROM orders AS t WHERE (t.status = 'open')"
        );
    }

    #[test]
    fn grouped_max_id_orders_by_aggregate() {
        let query = TableQuery::new("events")
            .with_id_column("event_id")
            .with_group_by("t.account_id");
        assert_eq!(
            query.max_id_sql(),
            "SELECT MAX(t.event_id) AS max_id FROM events AS t \
             GROUP BY t.account_id ORDER BY max_id DESC LIMIT 1"
        );
    }

    #[test]
    fn unrestricted_window() {
        let query = TableQuery::new("public.orders");
        assert_eq!(
            query.window_sql(false),
            "SELECT t.* FROM public.orders AS t WHERE t.id BETWEEN $1 AND $2 ORDER BY t.id ASC"
        );
    }

    #[test]
    fn restricted_window_with_filter() {
        let query = TableQuery::new("orders")
            .with_select("t.id, t.total")
            .with_filter("t.total > 0");
        assert_eq!(
            query.window_sql(true),
            "SELECT t.id, t.total FROM orders AS t WHERE (t.total > 0) AND \
             t.id BETWEEN $1 AND $2 AND t.id = ANY($3) ORDER BY t.id ASC"
        );
    }

    #[test]
    fn grouped_window() {
        let query = TableQuery::new("orders")
            .with_select("MAX(t.id) AS id, t.customer_id")
            .with_group_by("t.customer_id, t.id");
        assert_eq!(
            query.window_sql(false),
            "SELECT MAX(t.id) AS id, t.customer_id FROM orders AS t WHERE \
             t.id BETWEEN $1 AND $2 GROUP BY t.customer_id, t.id ORDER BY t.id ASC"
        );
    }

    #[test]
    fn validates_identifiers() {
        assert!(TableQuery::new("orders").validate().is_ok());
        assert!(TableQuery::new("sales.orders_2024").validate().is_ok());
        assert!(TableQuery::new("_staging").validate().is_ok());

        assert!(TableQuery::new("").validate().is_err());
        assert!(TableQuery::new("1orders").validate().is_err());
        assert!(TableQuery::new("orders; DROP TABLE x").validate().is_err());
        assert!(TableQuery::new("a.b.c").validate().is_err());
        assert!(
            TableQuery::new("orders")
                .with_id_column("t.id")
                .validate()
                .is_err()
        );
        assert!(
            TableQuery::new("orders")
                .with_select("  ")
                .validate()
                .is_err()
        );
    }
}
