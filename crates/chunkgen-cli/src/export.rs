//! Streams the configured table to stdout as JSON lines.

use std::io::{self, BufWriter, Write};
use std::time::{Duration, Instant};

use anyhow::Context;
use chunkgen_core::Window;
use chunkgen_postgres::{ChunkStreamBuilder, PgChunkSource, PgClient};
use diesel::QueryableByName;
use diesel::sql_types::{BigInt, Jsonb};
use futures::TryStreamExt;
use serde::Serialize;

use crate::TRACING_TARGET_EXPORT;
use crate::config::ScanConfig;

/// One exported row: its identifier and the whole row as a JSON document.
#[derive(Debug, Clone, QueryableByName, Serialize)]
pub struct JsonRow {
    #[diesel(sql_type = BigInt)]
    pub id: i64,
    #[diesel(sql_type = Jsonb)]
    pub data: serde_json::Value,
}

/// Totals of a finished export.
#[derive(Debug, Clone, Copy)]
pub struct ExportSummary {
    pub rows: u64,
    pub windows: u64,
    pub max_id: u64,
    pub elapsed: Duration,
}

/// Exports every selected row of the configured table to stdout.
pub async fn export(client: &PgClient, config: &ScanConfig) -> anyhow::Result<ExportSummary> {
    let started = Instant::now();
    let source = PgChunkSource::<JsonRow>::new(client.clone(), config.table_query())?
        .with_fetch_mode(config.fetch_mode);

    let mut rows = ChunkStreamBuilder::new(source)
        .with_chunk_size(config.chunk_size)
        .with_ids(config.ids.iter().copied())
        .on_after_chunk(|window: &Window| {
            tracing::debug!(
                target: TRACING_TARGET_EXPORT,
                window = %window,
                "Window exported"
            );
            Ok(())
        })
        .build()
        .await?;

    let max_id = rows.max_id();
    let windows = rows.window_count();
    tracing::info!(
        target: TRACING_TARGET_EXPORT,
        max_id,
        windows,
        "Starting export"
    );

    let mut out = BufWriter::new(io::stdout());
    let mut count = 0u64;
    while let Some(row) = rows.try_next().await? {
        write_row(&mut out, &row)?;
        count += 1;
    }
    out.flush().context("failed to flush stdout")?;

    Ok(ExportSummary {
        rows: count,
        windows,
        max_id,
        elapsed: started.elapsed(),
    })
}

/// Writes one row as a single JSON line.
fn write_row(out: &mut impl Write, row: &JsonRow) -> anyhow::Result<()> {
    serde_json::to_writer(&mut *out, row).context("failed to serialize row")?;
    out.write_all(b"\n").context("failed to write row")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_json_lines() {
        let mut out = Vec::new();
        let rows = [
            JsonRow {
                id: 1,
                data: serde_json::json!({ "id": 1, "status": "open" }),
            },
            JsonRow {
                id: 2,
                data: serde_json::json!({ "id": 2, "status": null }),
            },
        ];

        for row in &rows {
            write_row(&mut out, row).unwrap();
        }

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["id"], 1);
        assert_eq!(first["data"]["status"], "open");
    }
}
