#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod config;
mod export;

use std::process;

use anyhow::Context;
use chunkgen_postgres::PgClient;

use crate::config::Cli;

// Tracing target constants
pub const TRACING_TARGET_STARTUP: &str = "chunkgen_cli::startup";
pub const TRACING_TARGET_CONFIG: &str = "chunkgen_cli::config";
pub const TRACING_TARGET_EXPORT: &str = "chunkgen_cli::export";

#[tokio::main]
async fn main() {
    let Err(error) = run().await else {
        process::exit(0);
    };

    if tracing::enabled!(tracing::Level::ERROR) {
        tracing::error!(
            target: TRACING_TARGET_STARTUP,
            error = %error,
            "export terminated with error"
        );
    } else {
        eprintln!("Error: {error:#}");
    }

    process::exit(1);
}

/// Main application entry point.
async fn run() -> anyhow::Result<()> {
    let cli = Cli::init();

    Cli::init_tracing();
    cli.log();
    cli.validate()?;

    let client = PgClient::new_with_test(cli.postgres.clone())
        .await
        .context("failed to connect to the database")?;

    let summary = export::export(&client, &cli.scan)
        .await
        .context("failed to export rows")?;

    tracing::info!(
        target: TRACING_TARGET_EXPORT,
        rows = summary.rows,
        windows = summary.windows,
        max_id = summary.max_id,
        elapsed = ?summary.elapsed,
        "export finished"
    );

    Ok(())
}
