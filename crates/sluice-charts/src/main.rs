//! # sluice-charts
//!
//! Chart service binary: serves PNG time-series over HTTP from a sluice
//! statistics directory.
//!
//! ```bash
//! sluice-charts --statdir /var/lib/sluice --listen 127.0.0.1:8311
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sluice_charts::service::{router, ChartService};

/// Sluice statistics chart service.
#[derive(Parser, Debug)]
#[command(name = "sluice-charts", about = "Sluice statistics chart service")]
struct Cli {
    /// Directory holding the statistics day files.
    #[arg(long)]
    statdir: PathBuf,

    /// Listen address.
    #[arg(long, default_value = "127.0.0.1:8311")]
    listen: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let service = Arc::new(ChartService {
        statdir: cli.statdir.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&cli.listen)
        .await
        .with_context(|| format!("binding {}", cli.listen))?;
    info!(listen = %cli.listen, statdir = %cli.statdir.display(), "sluice-charts started");

    axum::serve(listener, router(service))
        .await
        .context("serving HTTP")?;
    Ok(())
}
