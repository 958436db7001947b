//! Gridded-archive harvester.
//!
//! Walks THREDDS catalogs to find archive files not yet held locally,
//! downloads them with atomic publication, and converts them into spatially
//! binned CSV tables. Modes:
//! - no mode: dry run, report the frontier and exit
//! - `download`: fetch the frontier
//! - `convert`: poll the data directory and convert completed downloads
//! - `download-convert`: fetch and convert in one pass

mod config;
mod driver;
mod fetch;
mod frontier;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, ValueEnum};
use thredds_catalog::{CatalogWalker, HttpTransport, SnapshotCache};
use tokio::sync::broadcast;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use config::{ArchiveConfig, CatalogLayout};
use driver::{Driver, RunSummary};
use fetch::Fetcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RunMode {
    /// Fetch every frontier reference.
    Download,
    /// Convert completed downloads, polling until shutdown.
    Convert,
    /// Fetch each reference and convert it as soon as it lands.
    DownloadConvert,
}

#[derive(Parser, Debug)]
#[command(name = "harvester")]
#[command(about = "Fetch-convert pipeline for gridded model archives")]
struct Args {
    /// What to run; omit for a dry run that only reports the frontier
    #[arg(value_enum)]
    mode: Option<RunMode>,

    /// Restrict the run to one archive id
    #[arg(short, long)]
    archive: Option<String>,

    /// Root directory for downloaded and converted artifacts
    #[arg(long, env = "DATA_DIR", default_value = "/data/harvester")]
    data_dir: PathBuf,

    /// Directory for catalog snapshots
    #[arg(long, env = "CACHE_DIR", default_value = "/data/harvester/cache")]
    cache_dir: PathBuf,

    /// Snapshot epoch; bump to force a catalog re-walk
    #[arg(long, default_value = "0")]
    cache_epoch: u64,

    /// Always walk the catalog, ignoring snapshots
    #[arg(long)]
    no_cache: bool,

    /// Configuration directory (contains archives/*.yaml)
    #[arg(long, env = "CONFIG_DIR", default_value = "config")]
    config_dir: PathBuf,

    /// Maximum concurrent downloads
    #[arg(long, default_value = "8")]
    max_concurrent: usize,

    /// Concurrent conversion workers
    #[arg(long, default_value = "2")]
    convert_workers: usize,

    /// Seconds between convert-mode polls of the data directory
    #[arg(long, default_value = "60")]
    poll_interval_secs: u64,

    /// Only consider references strictly newer than this instant (RFC 3339)
    #[arg(long)]
    since: Option<DateTime<Utc>>,

    /// Whole-transfer timeout per download, in seconds
    #[arg(long, default_value = "100000")]
    fetch_timeout_secs: u64,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting harvester");

    let mut configs = config::load_archive_configs(&args.config_dir)?;
    if let Some(id) = &args.archive {
        configs.retain(|c| &c.archive.id == id);
        if configs.is_empty() {
            bail!("No enabled archive with id '{id}'");
        }
    }
    if configs.is_empty() {
        bail!("No enabled archives configured");
    }

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let shutdown_for_signal = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        shutdown_for_signal.send(()).ok();
    });

    let mut failures = 0;
    for archive in configs {
        let id = archive.archive.id.clone();
        match run_archive(&args, archive, &shutdown_tx).await {
            Ok(summary) => {
                info!(
                    archive = %id,
                    discovered = summary.discovered,
                    todo = summary.todo,
                    succeeded = summary.succeeded,
                    failed = summary.failed,
                    "Archive run complete"
                );
                failures += summary.failed;
            }
            Err(e) => {
                error!(archive = %id, error = %e, "Archive run failed");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        bail!("{failures} item(s) failed");
    }
    Ok(())
}

/// Run the selected mode for one archive.
async fn run_archive(
    args: &Args,
    archive: ArchiveConfig,
    shutdown_tx: &broadcast::Sender<()>,
) -> Result<RunSummary> {
    let data_dir = args.data_dir.join(&archive.archive.id);
    tokio::fs::create_dir_all(&data_dir).await?;

    // Discovery and the frontier check run in every mode, so an inconsistent
    // local state is caught before any work starts.
    let transport =
        HttpTransport::new(Duration::from_secs(30)).context("Failed to create catalog client")?;
    let walker = CatalogWalker::new(transport);
    let cache = SnapshotCache::new(args.cache_dir.clone());
    let cache_ref = if args.no_cache {
        None
    } else {
        Some((&cache, args.cache_epoch))
    };

    let discovered = walker
        .discover(
            &archive.archive.id,
            &archive.source.catalog_url,
            archive.source.layout == CatalogLayout::Nested,
            &archive.ref_spec(),
            args.since,
            cache_ref,
        )
        .await
        .context("Catalog discovery failed")?;

    let prefix = archive.reference.frontier_prefix;
    let materialized = frontier::materialized_keys(&data_dir, prefix)?;
    let todo = frontier::frontier(discovered.clone(), &materialized, prefix)?;

    info!(
        archive = %archive.archive.id,
        discovered = discovered.len(),
        materialized = materialized.len(),
        todo = todo.len(),
        "Frontier computed"
    );

    let mut summary = RunSummary {
        discovered: discovered.len(),
        todo: todo.len(),
        ..Default::default()
    };

    let Some(mode) = args.mode else {
        info!(archive = %archive.archive.id, "Dry run, nothing fetched");
        return Ok(summary);
    };

    let fetcher = Fetcher::new(
        data_dir.clone(),
        Duration::from_secs(args.fetch_timeout_secs),
    )?;
    let removed = fetcher.discard_stale_tmp().await?;
    if removed > 0 {
        info!(count = removed, "Removed stale partial downloads");
    }

    let driver = Driver::new(
        archive,
        fetcher,
        data_dir,
        args.max_concurrent,
        args.convert_workers,
        Duration::from_secs(args.poll_interval_secs),
    );

    let run = match mode {
        RunMode::Download => driver.download_all(&todo).await?,
        RunMode::Convert => driver.convert_loop(shutdown_tx.subscribe()).await?,
        RunMode::DownloadConvert => driver.download_and_convert(&todo).await?,
    };

    if mode == RunMode::Convert {
        // Convert mode works off the data directory, not the frontier.
        summary.todo = run.todo;
    }
    summary.succeeded = run.succeeded;
    summary.failed = run.failed;
    Ok(summary)
}
