//! Frontier computation: which discovered references still need work.
//!
//! A reference is materialized once any terminal or intermediate artifact
//! for its key exists locally: the downloaded grid (`.nc`), the converted
//! table (`.csv`) or its compressed form (`.csv.zip`), or a quarantined
//! source under `quarantine/`. In-progress downloads (`.nc.tmp`) never
//! count. The filter is paired with an integrity check: if
//! discovered, materialized and remaining counts do not add up, the local
//! state has drifted from the catalog and the run aborts before touching
//! anything.

use std::collections::HashSet;
use std::path::Path;

use thiserror::Error;
use thredds_catalog::SourceRef;

#[derive(Debug, Error)]
pub enum FrontierError {
    #[error(
        "catalog/local state drift: discovered {discovered}, \
         materialized {materialized}, remaining {remaining}"
    )]
    Inconsistent {
        discovered: usize,
        materialized: usize,
        remaining: usize,
    },

    #[error("failed to scan data directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Suffixes that mark a key as materialized, longest first so `.csv.zip`
/// wins over `.csv`.
const MATERIALIZED_SUFFIXES: [&str; 3] = [".csv.zip", ".csv", ".nc"];

/// Subdirectory holding sources that failed conversion.
pub const QUARANTINE_DIR: &str = "quarantine";

/// Normalize a key for frontier matching.
///
/// Keys come from catalog entries, so the prefix cut falls back to the whole
/// key rather than panicking on a multibyte boundary.
fn normalize(key: &str, prefix: Option<usize>) -> &str {
    match prefix {
        Some(n) => key.get(..n).unwrap_or(key),
        None => key,
    }
}

/// Collect the normalized keys of every materialized artifact in `data_dir`.
///
/// Quarantined sources count: a poison file was already fetched once and must
/// not come back onto the frontier.
pub fn materialized_keys(
    data_dir: &Path,
    prefix: Option<usize>,
) -> Result<HashSet<String>, FrontierError> {
    let mut keys = HashSet::new();
    scan_dir(data_dir, prefix, &mut keys)?;
    scan_dir(&data_dir.join(QUARANTINE_DIR), prefix, &mut keys)?;
    Ok(keys)
}

fn scan_dir(
    dir: &Path,
    prefix: Option<usize>,
    keys: &mut HashSet<String>,
) -> Result<(), FrontierError> {
    if !dir.exists() {
        return Ok(());
    }

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };

        // An aborted download is not materialized at any stage.
        if name.ends_with(".tmp") {
            continue;
        }

        if let Some(key) = MATERIALIZED_SUFFIXES
            .iter()
            .find_map(|s| name.strip_suffix(s))
        {
            keys.insert(normalize(key, prefix).to_string());
        }
    }

    Ok(())
}

/// Return the references not yet materialized, preserving discovery order,
/// after verifying that the counts reconcile.
pub fn frontier(
    discovered: Vec<SourceRef>,
    materialized: &HashSet<String>,
    prefix: Option<usize>,
) -> Result<Vec<SourceRef>, FrontierError> {
    let total = discovered.len();

    let remaining: Vec<SourceRef> = discovered
        .into_iter()
        .filter(|r| !materialized.contains(normalize(&r.key, prefix)))
        .collect();

    if total - remaining.len() != materialized.len() {
        return Err(FrontierError::Inconsistent {
            discovered: total,
            materialized: materialized.len(),
            remaining: remaining.len(),
        });
    }

    Ok(remaining)
}
