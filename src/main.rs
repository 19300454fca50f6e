//! media_syncd CLI
//!
//! Background daemon mirroring a MySQL media table into a directory.

use clap::Parser;
use env_logger::Env;
use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;

use media_syncd::{heartbeat, scheduler, MediaStore, SyncConfig, SyncError};

/// Keep a media directory synchronized with a MySQL media table
#[derive(Parser)]
#[command(name = "media_syncd", version, about)]
struct Cli {
    /// Path to a JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory kept in sync with the media table
    #[arg(short, long)]
    media_path: Option<PathBuf>,

    /// Source table holding media records
    #[arg(short, long)]
    table: Option<String>,

    /// Seconds between the end of one pass and the start of the next
    #[arg(long)]
    interval: Option<u64>,

    /// Seconds between heartbeat probes
    #[arg(long)]
    heartbeat_interval: Option<u64>,

    /// Records fetched per query
    #[arg(short, long)]
    batch_size: Option<usize>,
}

impl Cli {
    /// Resolve the effective configuration: file, then flags, then
    /// environment variables winning over both.
    fn into_config(self) -> Result<SyncConfig, SyncError> {
        let mut config = match &self.config {
            Some(path) => SyncConfig::from_file(path)?,
            None => SyncConfig::default(),
        };
        if let Some(path) = self.media_path {
            config.media_path = path;
        }
        if let Some(table) = self.table {
            config.table = table;
        }
        if let Some(secs) = self.interval {
            config.update_interval_secs = secs;
        }
        if let Some(secs) = self.heartbeat_interval {
            config.heartbeat_interval_secs = secs;
        }
        if let Some(size) = self.batch_size {
            config.batch_size = size;
        }
        config.apply_env();
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), SyncError> {
    let config = cli.into_config()?;

    // Create the directory before the first pass.
    tokio::fs::create_dir_all(&config.media_path)
        .await
        .map_err(|e| SyncError::io_error(config.media_path.clone(), e.to_string()))?;

    let store = MediaStore::connect(&config).await?;
    info!(
        "syncing {} against table {} every {}s (heartbeat every {}s)",
        config.media_path.display(),
        config.table,
        config.update_interval_secs,
        config.heartbeat_interval_secs
    );

    // The first failure of either task takes the whole process down;
    // dropping the select cancels the surviving task.
    tokio::select! {
        err = scheduler::run(&store, &config.media_path, config.batch_size, config.poll_interval()) => Err(err),
        err = heartbeat::run(&store, config.heartbeat_interval()) => Err(err),
        _ = tokio::signal::ctrl_c() => {
            info!("received interrupt, shutting down");
            Ok(())
        }
    }
}
