mod config;
mod cursor;
mod export;
mod notehub;
mod schema;

use crate::config::{CliOverrides, Config};
use crate::cursor::CursorStore;
use crate::notehub::NotehubClient;
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "notehub-exporter",
    version,
    about = "Incremental Notehub event export to CSV with per-device cursor checkpoints"
)]
struct Cli {
    /// Notehub project UID (app:...); overrides EXPORTER_PROJECT_UID
    #[arg(long)]
    project: Option<String>,
    /// Device UID to export; repeat for multiple devices
    #[arg(long = "device")]
    devices: Vec<String>,
    /// Output CSV path
    #[arg(long)]
    output: Option<PathBuf>,
    /// Cursor cache path
    #[arg(long)]
    cursor_cache: Option<PathBuf>,
    /// Cap on page requests per device per run
    #[arg(long)]
    max_pages: Option<u32>,
}

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,notehub_exporter=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let overrides = CliOverrides {
        project: args.project,
        devices: args.devices,
        output: args.output,
        cursor_cache: args.cursor_cache,
        max_pages: args.max_pages,
    };
    let config = Config::load(&overrides)?;
    init_tracing()?;

    tracing::info!(
        project = %config.project_uid,
        devices = config.device_uids.len(),
        max_pages = config.max_pages_per_device,
        "starting export"
    );

    let client = NotehubClient::new(&config)?;
    let mut store = CursorStore::load(&config.cursor_cache_path);

    let summary = export::run_export(&config, &client, &mut store).await?;

    tracing::info!(
        devices_ok = summary.devices_ok,
        devices_failed = summary.devices_failed,
        rows = summary.rows_written,
        pages = summary.pages_read,
        output = %config.output_path.display(),
        "export complete"
    );

    Ok(())
}
