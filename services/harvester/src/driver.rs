//! Pipeline driver: runs the download and convert stages over a frontier.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use grid_convert::{convert_artifact, ConvertOutcome};
use thredds_catalog::SourceRef;
use tokio::sync::broadcast;
use tracing::{error, info, instrument};

use crate::config::ArchiveConfig;
use crate::fetch::{FetchOutcome, Fetcher};
use crate::frontier::QUARANTINE_DIR;

/// Counts reported at the end of every run, whatever the mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunSummary {
    pub discovered: usize,
    pub todo: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Coordinates fetching and conversion for one archive.
pub struct Driver {
    config: Arc<ArchiveConfig>,
    fetcher: Arc<Fetcher>,
    data_dir: PathBuf,
    quarantine_dir: PathBuf,
    max_concurrent: usize,
    convert_workers: usize,
    poll_interval: Duration,
}

impl Driver {
    pub fn new(
        config: ArchiveConfig,
        fetcher: Fetcher,
        data_dir: PathBuf,
        max_concurrent: usize,
        convert_workers: usize,
        poll_interval: Duration,
    ) -> Self {
        let quarantine_dir = data_dir.join(QUARANTINE_DIR);
        Self {
            config: Arc::new(config),
            fetcher: Arc::new(fetcher),
            data_dir,
            quarantine_dir,
            max_concurrent,
            convert_workers,
            poll_interval,
        }
    }

    /// Download every frontier reference, bounded by `max_concurrent`.
    ///
    /// Individual failures are counted, not fatal: the remaining references
    /// stay on the frontier for the next run.
    #[instrument(skip(self, frontier), fields(archive = %self.config.archive.id))]
    pub async fn download_all(&self, frontier: &[SourceRef]) -> Result<RunSummary> {
        let outcomes = stream::iter(frontier)
            .map(|source| {
                let fetcher = self.fetcher.clone();
                async move { fetcher.fetch(source).await }
            })
            .buffer_unordered(self.max_concurrent)
            .collect::<Vec<_>>()
            .await;

        let mut summary = RunSummary {
            todo: frontier.len(),
            ..Default::default()
        };
        for outcome in outcomes {
            match outcome? {
                FetchOutcome::Fetched(_) => summary.succeeded += 1,
                FetchOutcome::Failed { .. } => summary.failed += 1,
            }
        }

        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Download stage complete"
        );
        Ok(summary)
    }

    /// Download each frontier reference and convert it as soon as it lands.
    ///
    /// Conversion is CPU- and filesystem-bound, so it runs on the blocking
    /// pool while other downloads keep streaming.
    #[instrument(skip(self, frontier), fields(archive = %self.config.archive.id))]
    pub async fn download_and_convert(&self, frontier: &[SourceRef]) -> Result<RunSummary> {
        let outcomes = stream::iter(frontier)
            .map(|source| {
                let fetcher = self.fetcher.clone();
                let config = self.config.clone();
                let data_dir = self.data_dir.clone();
                let quarantine_dir = self.quarantine_dir.clone();
                let key = source.key.clone();
                async move {
                    match fetcher.fetch(source).await? {
                        FetchOutcome::Fetched(path) => {
                            let opts = config.convert_options(data_dir, key);
                            let outcome = tokio::task::spawn_blocking(move || {
                                convert_artifact(&path, &quarantine_dir, &opts)
                            })
                            .await
                            .context("Conversion task panicked")?;
                            Ok::<bool, anyhow::Error>(matches!(
                                outcome,
                                ConvertOutcome::Converted(_)
                            ))
                        }
                        FetchOutcome::Failed { .. } => Ok(false),
                    }
                }
            })
            .buffer_unordered(self.max_concurrent)
            .collect::<Vec<_>>()
            .await;

        let mut summary = RunSummary {
            todo: frontier.len(),
            ..Default::default()
        };
        for outcome in outcomes {
            if outcome? {
                summary.succeeded += 1;
            } else {
                summary.failed += 1;
            }
        }

        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Download-and-convert stage complete"
        );
        Ok(summary)
    }

    /// Convert every complete artifact currently on disk, then keep polling
    /// for more until shutdown.
    ///
    /// Only whole `.nc` files are picked up; in-flight `.tmp` downloads are
    /// invisible to this loop. The idle wait is interruptible so Ctrl+C does
    /// not hang for a full poll interval.
    #[instrument(skip(self, shutdown), fields(archive = %self.config.archive.id))]
    pub async fn convert_loop(&self, mut shutdown: broadcast::Receiver<()>) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        loop {
            let pending = complete_artifacts(&self.data_dir)?;

            if pending.is_empty() {
                tokio::select! {
                    _ = shutdown.recv() => {
                        info!("Shutting down convert loop");
                        break;
                    }
                    _ = tokio::time::sleep(self.poll_interval) => {
                        continue;
                    }
                }
            }

            summary.todo += pending.len();
            let batch = self.convert_batch(pending).await?;
            summary.succeeded += batch.0;
            summary.failed += batch.1;

            // A shutdown during the batch still applies before the next scan.
            if shutdown.try_recv().is_ok() {
                info!("Shutting down convert loop");
                break;
            }
        }

        Ok(summary)
    }

    async fn convert_batch(&self, pending: Vec<PathBuf>) -> Result<(usize, usize)> {
        let outcomes = stream::iter(pending)
            .map(|path| {
                let config = self.config.clone();
                let data_dir = self.data_dir.clone();
                let quarantine_dir = self.quarantine_dir.clone();
                async move {
                    let key = artifact_key(&path);
                    let opts = config.convert_options(data_dir, key);
                    tokio::task::spawn_blocking(move || {
                        convert_artifact(&path, &quarantine_dir, &opts)
                    })
                    .await
                    .context("Conversion task panicked")
                }
            })
            .buffer_unordered(self.convert_workers)
            .collect::<Vec<_>>()
            .await;

        let mut succeeded = 0;
        let mut failed = 0;
        for outcome in outcomes {
            match outcome {
                Ok(ConvertOutcome::Converted(_)) => succeeded += 1,
                Ok(ConvertOutcome::Failed(_)) => failed += 1,
                Err(e) => {
                    error!(error = %e, "Conversion worker failed");
                    failed += 1;
                }
            }
        }

        Ok((succeeded, failed))
    }
}

/// Key of a downloaded artifact, recovered from its filename.
fn artifact_key(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_suffix(".nc"))
        .unwrap_or_default()
        .to_string()
}

/// List complete `.nc` artifacts in the data directory, ready to convert.
pub fn complete_artifacts(data_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut artifacts = Vec::new();

    if !data_dir.exists() {
        return Ok(artifacts);
    }

    for entry in std::fs::read_dir(data_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        // `.nc.tmp` is still being written; only published files qualify.
        if name.ends_with(".nc") {
            artifacts.push(path);
        }
    }

    artifacts.sort();
    Ok(artifacts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_downloads_are_never_selected_for_conversion() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("2024010100.nc"), b"x").unwrap();
        std::fs::write(dir.path().join("2024010200.nc.tmp"), b"x").unwrap();
        std::fs::write(dir.path().join("2024010300.csv"), b"x").unwrap();

        let artifacts = complete_artifacts(dir.path()).unwrap();
        let names: Vec<&str> = artifacts
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
            .collect();

        assert_eq!(names, vec!["2024010100.nc"]);
    }

    #[test]
    fn key_is_recovered_from_artifact_name() {
        assert_eq!(artifact_key(Path::new("/data/2024010100.nc")), "2024010100");
        assert_eq!(
            artifact_key(Path::new("/data/20190501T00Z.nc")),
            "20190501T00Z"
        );
    }

    #[test]
    fn missing_data_dir_yields_empty_batch() {
        let artifacts = complete_artifacts(Path::new("/nonexistent/harvester-data")).unwrap();
        assert!(artifacts.is_empty());
    }
}
