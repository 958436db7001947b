//! Streaming artifact downloads with atomic publication.
//!
//! Each reference is streamed to `<key>.nc.tmp` and renamed to `<key>.nc`
//! only once the body is fully written and synced, so a complete `.nc` file
//! in the data directory is always a whole one. Failures are soft: they are
//! logged and reported per reference, never aborting the batch.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use thredds_catalog::SourceRef;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument, warn};

/// Result of attempting one download.
#[derive(Debug)]
pub enum FetchOutcome {
    /// The artifact was fully written and published.
    Fetched(PathBuf),
    /// The artifact could not be retrieved; nothing was published.
    Failed {
        status: Option<StatusCode>,
        message: String,
    },
}

impl FetchOutcome {
    pub fn is_fetched(&self) -> bool {
        matches!(self, FetchOutcome::Fetched(_))
    }
}

/// Downloads catalog references into a data directory.
pub struct Fetcher {
    client: Client,
    data_dir: PathBuf,
}

impl Fetcher {
    /// Create a fetcher writing into `data_dir`.
    ///
    /// `timeout` bounds each whole transfer; archive files run to gigabytes,
    /// so callers pass a generous value.
    pub fn new(data_dir: PathBuf, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(4)
            .tcp_nodelay(true)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, data_dir })
    }

    /// Remove leftover `.tmp` files from a previous interrupted run.
    ///
    /// Partial downloads are never resumed; their references are still on the
    /// frontier and will be fetched from scratch.
    pub async fn discard_stale_tmp(&self) -> Result<usize> {
        let mut removed = 0;

        if !self.data_dir.exists() {
            return Ok(removed);
        }

        let mut entries = fs::read_dir(&self.data_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_tmp = path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.ends_with(".tmp"));
            if is_tmp && entry.file_type().await?.is_file() {
                warn!(path = %path.display(), "Discarding stale partial download");
                fs::remove_file(&path).await?;
                removed += 1;
            }
        }

        Ok(removed)
    }

    /// Fetch one reference.
    ///
    /// Network and HTTP errors are folded into [`FetchOutcome::Failed`];
    /// only local I/O problems outside the transfer itself surface as `Err`.
    #[instrument(skip(self, source), fields(key = %source.key))]
    pub async fn fetch(&self, source: &SourceRef) -> Result<FetchOutcome> {
        fs::create_dir_all(&self.data_dir).await?;

        let final_path = self.data_dir.join(format!("{}.nc", source.key));
        let tmp_path = self.data_dir.join(format!("{}.nc.tmp", source.key));

        let response = match self.client.get(&source.url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(url = %source.url, error = %e, "Request failed");
                return Ok(FetchOutcome::Failed {
                    status: None,
                    message: e.to_string(),
                });
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                url = %source.url,
                status = %status,
                body = %body.chars().take(200).collect::<String>(),
                "Server rejected download"
            );
            return Ok(FetchOutcome::Failed {
                status: Some(status),
                message: format!("HTTP {status}"),
            });
        }

        if let Err(e) = self.stream_to_tmp(response, &tmp_path).await {
            fs::remove_file(&tmp_path).await.ok();
            warn!(url = %source.url, error = %e, "Transfer failed");
            return Ok(FetchOutcome::Failed {
                status: Some(status),
                message: e.to_string(),
            });
        }

        // Publish atomically; a cross-device rename falls back to copy+delete.
        if fs::rename(&tmp_path, &final_path).await.is_err() {
            fs::copy(&tmp_path, &final_path).await?;
            fs::remove_file(&tmp_path).await?;
        }

        let bytes = fs::metadata(&final_path).await.map(|m| m.len()).unwrap_or(0);
        info!(path = %final_path.display(), bytes, "Download completed");

        Ok(FetchOutcome::Fetched(final_path))
    }

    async fn stream_to_tmp(&self, response: reqwest::Response, tmp_path: &Path) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(tmp_path)
            .await
            .context("Failed to open temporary file")?;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Error reading response chunk")?;
            file.write_all(&chunk)
                .await
                .context("Error writing to file")?;
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }
}
