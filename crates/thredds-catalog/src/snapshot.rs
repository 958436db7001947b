//! Catalog snapshot cache.
//!
//! A snapshot is the full URL sequence of one catalog walk, stored as a JSON
//! array and keyed by (archive id, epoch). Snapshots are never overwritten or
//! aged out in place: bumping the epoch addresses a fresh file, which keeps
//! stale-cache behavior explicit instead of silent.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::CatalogResult;

pub struct SnapshotCache {
    dir: PathBuf,
}

impl SnapshotCache {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path(&self, archive_id: &str, epoch: u64) -> PathBuf {
        self.dir.join(format!("{archive_id}-{epoch}.json"))
    }

    /// Load the snapshot for (archive, epoch), or `None` if not yet written.
    pub fn load(&self, archive_id: &str, epoch: u64) -> CatalogResult<Option<Vec<String>>> {
        let path = self.path(archive_id, epoch);
        if !path.exists() {
            debug!(path = %path.display(), "No catalog snapshot");
            return Ok(None);
        }
        let body = std::fs::read_to_string(&path)?;
        let urls: Vec<String> = serde_json::from_str(&body)?;
        Ok(Some(urls))
    }

    /// Write the snapshot for (archive, epoch).
    pub fn store(&self, archive_id: &str, epoch: u64, urls: &[String]) -> CatalogResult<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path(archive_id, epoch);
        std::fs::write(&path, serde_json::to_string(urls)?)?;
        info!(path = %path.display(), count = urls.len(), "Wrote catalog snapshot");
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SnapshotCache::new(dir.path().to_path_buf());

        assert!(cache.load("ocean", 1).unwrap().is_none());

        let urls = vec!["https://a.example.org/x.nc".to_string()];
        cache.store("ocean", 1, &urls).unwrap();
        assert_eq!(cache.load("ocean", 1).unwrap(), Some(urls));

        // A different epoch is a different snapshot.
        assert!(cache.load("ocean", 2).unwrap().is_none());
    }
}
