//! Conversion of a downloaded grid file into tabular artifacts.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{error, info, instrument, warn};

use crate::binning::BinConvention;
use crate::dataset::{GridDataset, GridSchema};
use crate::error::{ConvertError, ConvertResult};
use crate::table::{BinnedTable, Column};

/// Whether one file yields one table or one table per (time, depth) slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputGranularity {
    /// One CSV per (time, depth) slice, named `<YYYYMMDDHH>_<depth>.csv`.
    PerSlice,
    /// One CSV per source file, named `<key>.csv`, aggregating every slice.
    PerFile,
}

/// Conversion settings derived from the archive configuration.
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    pub schema: GridSchema,
    /// Depth/level values of interest; other levels are discarded.
    /// Empty means every level.
    pub depth_levels: Vec<i64>,
    pub convention: BinConvention,
    pub granularity: OutputGranularity,
    pub output_dir: PathBuf,
    /// Derived key of the source artifact, used for per-file naming.
    pub key: String,
}

impl ConvertOptions {
    fn wants_depth(&self, depth: f64) -> bool {
        self.depth_levels.is_empty() || self.depth_levels.contains(&(depth as i64))
    }
}

/// Convert one grid file into CSV artifacts.
///
/// On error, any tabular files already written for this source are removed so
/// a failed conversion leaves nothing partial behind.
#[instrument(skip(opts), fields(key = %opts.key))]
pub fn convert_file(path: &Path, opts: &ConvertOptions) -> ConvertResult<Vec<PathBuf>> {
    let mut written = Vec::new();
    let result = convert_file_inner(path, opts, &mut written);
    if result.is_err() {
        for partial in &written {
            if let Err(e) = std::fs::remove_file(partial) {
                warn!(path = %partial.display(), error = %e, "Failed to remove partial artifact");
            }
        }
    }
    result.map(|()| written)
}

fn convert_file_inner(
    path: &Path,
    opts: &ConvertOptions,
    written: &mut Vec<PathBuf>,
) -> ConvertResult<()> {
    let ds = GridDataset::load(path, &opts.schema)?;

    match opts.granularity {
        OutputGranularity::PerSlice => {
            let depth_indices: Vec<usize> = if ds.depths.is_empty() {
                vec![0]
            } else {
                (0..ds.depths.len())
                    .filter(|&d| opts.wants_depth(ds.depths[d]))
                    .collect()
            };

            for t in 0..ds.times.len() {
                for &d in &depth_indices {
                    let table = aggregate_slice(&ds, opts, t, d);
                    if table.is_empty() {
                        continue;
                    }
                    let depth_label = ds.depths.get(d).copied().unwrap_or(0.0) as i64;
                    let name = format!(
                        "{}_{}.csv",
                        ds.times[t].format("%Y%m%d%H"),
                        depth_label
                    );
                    let out = opts.output_dir.join(name);
                    table.write_csv(&out)?;
                    written.push(out);
                }
            }
        }
        OutputGranularity::PerFile => {
            let table = aggregate_whole_file(&ds, opts);
            if table.is_empty() {
                return Err(ConvertError::Empty);
            }
            let out = opts.output_dir.join(format!("{}.csv", opts.key));
            table.write_csv(&out)?;
            written.push(out);
        }
    }

    info!(
        source = %path.display(),
        artifacts = written.len(),
        "Converted grid file"
    );
    Ok(())
}

/// Aggregate one (time, depth) slice, with the coordinates promoted to
/// data columns.
fn aggregate_slice(
    ds: &GridDataset,
    opts: &ConvertOptions,
    time_idx: usize,
    depth_idx: usize,
) -> BinnedTable {
    let mut columns = vec![
        Column {
            name: &opts.schema.lat_var,
            values: &ds.lat,
        },
        Column {
            name: &opts.schema.lon_var,
            values: &ds.lon,
        },
    ];
    for var in &ds.variables {
        columns.push(Column {
            name: &var.name,
            values: ds.slice(var, time_idx, depth_idx),
        });
    }
    BinnedTable::aggregate(&ds.lat, &ds.lon, &columns, opts.convention)
}

/// Aggregate every slice of the file into one table: each bin's mean runs
/// over all samples across time (and any retained depths).
fn aggregate_whole_file(ds: &GridDataset, opts: &ConvertOptions) -> BinnedTable {
    let cells = ds.slice_len();
    let depth_count = ds.depths.len().max(1);
    let slice_count = ds.times.len() * depth_count;

    // Tile the coordinates once per slice so every sample keeps its cell.
    let mut lat = Vec::with_capacity(cells * slice_count);
    let mut lon = Vec::with_capacity(cells * slice_count);
    let mut flat: Vec<(String, Vec<f64>)> = ds
        .variables
        .iter()
        .map(|v| (v.name.clone(), Vec::with_capacity(cells * slice_count)))
        .collect();

    for t in 0..ds.times.len() {
        for d in 0..depth_count {
            if !ds.depths.is_empty() && !opts.wants_depth(ds.depths[d]) {
                continue;
            }
            lat.extend_from_slice(&ds.lat);
            lon.extend_from_slice(&ds.lon);
            for (i, var) in ds.variables.iter().enumerate() {
                flat[i].1.extend_from_slice(ds.slice(var, t, d));
            }
        }
    }

    let mut columns = vec![
        Column {
            name: &opts.schema.lat_var,
            values: &lat,
        },
        Column {
            name: &opts.schema.lon_var,
            values: &lon,
        },
    ];
    for (name, values) in &flat {
        columns.push(Column { name, values });
    }
    BinnedTable::aggregate(&lat, &lon, &columns, opts.convention)
}

/// Outcome of converting one artifact under the quarantine policy.
#[derive(Debug)]
pub enum ConvertOutcome {
    Converted(Vec<PathBuf>),
    Failed(ConvertError),
}

/// Convert a downloaded artifact and release it.
///
/// Whatever happens, the source file does not stay in the data directory: on
/// success it is deleted, on failure it is moved into `quarantine_dir` so a
/// poison file is neither reprocessed forever nor silently destroyed. Exactly
/// one failure is reported per artifact.
pub fn convert_artifact(
    path: &Path,
    quarantine_dir: &Path,
    opts: &ConvertOptions,
) -> ConvertOutcome {
    match convert_file(path, opts) {
        Ok(artifacts) => {
            if let Err(e) = std::fs::remove_file(path) {
                warn!(path = %path.display(), error = %e, "Failed to delete converted source");
            }
            ConvertOutcome::Converted(artifacts)
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "Conversion failed, quarantining source");
            if let Err(qe) = quarantine(path, quarantine_dir) {
                warn!(path = %path.display(), error = %qe, "Failed to quarantine source");
            }
            ConvertOutcome::Failed(e)
        }
    }
}

fn quarantine(path: &Path, quarantine_dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(quarantine_dir)?;
    let target = quarantine_dir.join(path.file_name().unwrap_or_default());
    // Rename can fail across filesystems; fall back to copy+delete.
    if std::fs::rename(path, &target).is_err() {
        std::fs::copy(path, &target)?;
        std::fs::remove_file(path)?;
    }
    Ok(())
}
