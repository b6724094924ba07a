//! CLI configuration management.
//!
//! ```text
//! Cli
//! ├── postgres: PgConfig   # Connection URL and pool settings
//! └── scan: ScanConfig     # Table, id column, filter, chunking
//! ```
//!
//! All configuration can be provided via CLI arguments or environment variables.
//!
//! # Example
//!
//! ```bash
//! chunkgen --postgres-url "postgresql://..." --table orders --chunk-size 500
//!
//! # Or via environment variables
//! POSTGRES_URL="postgresql://..." CHUNKGEN_TABLE=orders chunkgen
//! ```

mod scan;

use std::process;

use anyhow::Context;
use chunkgen_postgres::PgConfig;
use clap::Parser;
pub use scan::ScanConfig;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::{TRACING_TARGET_CONFIG, TRACING_TARGET_STARTUP};

/// Complete CLI configuration.
#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
#[command(name = "chunkgen")]
#[command(about = "Stream a PostgreSQL table window by window as JSON lines")]
#[command(version)]
pub struct Cli {
    /// Database connection and pool configuration.
    #[clap(flatten)]
    pub postgres: PgConfig,

    /// Traversal configuration.
    #[clap(flatten)]
    pub scan: ScanConfig,
}

impl Cli {
    /// Loads environment variables from .env file (if enabled) and parses CLI arguments.
    pub fn init() -> Self {
        Self::load_dotenv();
        Self::parse()
    }

    /// Loads environment variables from .env file if the dotenv feature is enabled.
    ///
    /// Must run before parsing so that clap's `env` fallbacks see the values.
    #[cfg(feature = "dotenv")]
    fn load_dotenv() {
        if let Err(err) = dotenvy::dotenv()
            && !err.not_found()
        {
            eprintln!("Warning: failed to load .env file: {err}");
        }
    }

    /// No-op when dotenv feature is disabled.
    #[cfg(not(feature = "dotenv"))]
    fn load_dotenv() {}

    /// Initializes tracing with environment-based filtering.
    ///
    /// Logs go to stderr; stdout carries the exported rows.
    pub fn init_tracing() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    /// Validates all configuration values.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.postgres
            .validate()
            .context("invalid database configuration")?;
        self.scan.validate().context("invalid scan configuration")?;
        Ok(())
    }

    /// Logs configuration (no sensitive information).
    pub fn log(&self) {
        tracing::debug!(
            target: TRACING_TARGET_STARTUP,
            version = env!("CARGO_PKG_VERSION"),
            pid = process::id(),
            features = ?Self::enabled_features(),
            "Build information"
        );

        tracing::info!(
            target: TRACING_TARGET_CONFIG,
            postgres_url = %self.postgres.url_masked(),
            max_connections = self.postgres.max_connections,
            acquire_timeout_secs = self.postgres.acquire_timeout_secs,
            "Database configuration"
        );

        self.scan.log();
    }

    /// Returns a list of enabled compile-time features.
    fn enabled_features() -> Vec<&'static str> {
        [cfg!(feature = "dotenv").then_some("dotenv")]
            .into_iter()
            .flatten()
            .collect()
    }
}
