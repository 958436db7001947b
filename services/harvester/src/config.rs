//! Archive configuration loading.
//!
//! Each supported archive is described by a YAML file in
//! `<config_dir>/archives/`: where its catalog lives, how to carve keys and
//! timestamps out of its URLs, and how its grids are binned into tables.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use grid_convert::convert::OutputGranularity;
use grid_convert::dataset::GridSchema;
use grid_convert::{BinConvention, ConvertOptions};
use serde::Deserialize;
use thredds_catalog::{KeyRule, RefSpec, TimestampRule};
use tracing::{debug, info, warn};

/// Root configuration loaded from one archive YAML file.
#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveConfig {
    pub archive: ArchiveInfo,
    pub source: SourceConfig,
    pub reference: ReferenceConfig,
    pub convert: ConvertConfig,
}

/// Basic archive identification.
#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Catalog location and walk shape.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub catalog_url: String,
    pub layout: CatalogLayout,
    /// Dataset-name substrings to skip (forecast/latest products).
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CatalogLayout {
    /// Single page, newest first.
    Flat,
    /// Year/month/day catalogRef hierarchy.
    Nested,
}

/// How keys and timestamps are derived from download URLs.
#[derive(Debug, Clone, Deserialize)]
pub struct ReferenceConfig {
    pub key_rule: KeyRule,
    pub timestamp_rule: TimestampRule,
    /// Key prefix length used when matching local artifacts; depth-bearing
    /// archives emit several artifacts per source file, all sharing a date
    /// prefix.
    #[serde(default)]
    pub frontier_prefix: Option<usize>,
}

/// Grid-to-table conversion settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ConvertConfig {
    #[serde(default = "default_time_dim")]
    pub time_dim: String,
    #[serde(default)]
    pub depth_dim: Option<String>,
    pub lat_var: String,
    pub lon_var: String,
    /// Depth levels of interest; empty keeps every level.
    #[serde(default)]
    pub depth_levels: Vec<i64>,
    pub bin: BinConvention,
    pub granularity: OutputGranularity,
}

fn default_time_dim() -> String {
    "time".to_string()
}

impl ArchiveConfig {
    /// Load an archive configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: ArchiveConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        debug!(archive = %config.archive.id, path = %path.display(), "Loaded archive config");
        Ok(config)
    }

    /// Reference derivation rules for the catalog walker.
    pub fn ref_spec(&self) -> RefSpec {
        RefSpec {
            key_rule: self.reference.key_rule,
            timestamp_rule: self.reference.timestamp_rule,
            exclude: self.source.exclude.clone(),
        }
    }

    /// Conversion options for one downloaded artifact.
    pub fn convert_options(&self, output_dir: PathBuf, key: String) -> ConvertOptions {
        ConvertOptions {
            schema: GridSchema {
                time_dim: self.convert.time_dim.clone(),
                depth_dim: self.convert.depth_dim.clone(),
                lat_var: self.convert.lat_var.clone(),
                lon_var: self.convert.lon_var.clone(),
            },
            depth_levels: self.convert.depth_levels.clone(),
            convention: self.convert.bin,
            granularity: self.convert.granularity,
            output_dir,
            key,
        }
    }
}

/// Load all enabled archive configurations from `<config_dir>/archives/`.
pub fn load_archive_configs(config_dir: &Path) -> Result<Vec<ArchiveConfig>> {
    let archives_dir = config_dir.join("archives");

    if !archives_dir.exists() {
        warn!(path = %archives_dir.display(), "Archives config directory not found");
        return Ok(Vec::new());
    }

    let mut configs = Vec::new();

    for entry in std::fs::read_dir(&archives_dir)? {
        let entry = entry?;
        let path = entry.path();

        if path
            .extension()
            .map_or(false, |ext| ext == "yaml" || ext == "yml")
        {
            match ArchiveConfig::load(&path) {
                Ok(config) => {
                    if config.archive.enabled {
                        configs.push(config);
                    } else {
                        debug!(archive = %config.archive.id, "Skipping disabled archive");
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to load archive config");
                }
            }
        }
    }

    info!(count = configs.len(), "Loaded archive configurations");
    Ok(configs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_flat_depth_bearing_archive() {
        let yaml = r#"
archive:
  id: norkyst
  name: "NorKyst-800m hourly ocean model"
  enabled: true

source:
  catalog_url: "https://thredds.met.no/thredds/catalog/fou-hi/norkyst800m-1h/catalog.xml"
  layout: flat
  exclude: [".fc."]

reference:
  key_rule: after-last-dot
  timestamp_rule: compact-hour
  frontier_prefix: 8

convert:
  lat_var: lat
  lon_var: lon
  depth_dim: depth
  depth_levels: [0, 25, 500]
  granularity: per-slice
  bin:
    convention: scaled-floor
    scale: 10.0
"#;

        let config: ArchiveConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.archive.id, "norkyst");
        assert_eq!(config.source.layout, CatalogLayout::Flat);
        assert_eq!(config.reference.key_rule, KeyRule::AfterLastDot);
        assert_eq!(config.reference.frontier_prefix, Some(8));
        assert_eq!(config.convert.depth_levels, vec![0, 25, 500]);
        assert_eq!(
            config.convert.bin,
            BinConvention::ScaledFloor { scale: 10.0 }
        );
        assert_eq!(config.convert.time_dim, "time");
    }

    #[test]
    fn parse_nested_surface_archive() {
        let yaml = r#"
archive:
  id: met-analysis
  name: "MET Nordic surface analysis"

source:
  catalog_url: "https://thredds.met.no/thredds/catalog/metpparchivev1/catalog.xml"
  layout: nested
  exclude: [forecast, latest]

reference:
  key_rule: after-last-underscore
  timestamp_rule: compact-hour-z

convert:
  lat_var: latitude
  lon_var: longitude
  granularity: per-file
  bin:
    convention: floor-to-resolution
    resolution: 0.1
"#;

        let config: ArchiveConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.archive.enabled);
        assert_eq!(config.source.layout, CatalogLayout::Nested);
        assert_eq!(config.reference.frontier_prefix, None);
        assert!(config.convert.depth_dim.is_none());
        assert_eq!(
            config.convert.bin,
            BinConvention::FloorToResolution { resolution: 0.1 }
        );

        let opts = config.convert_options(PathBuf::from("/data"), "20190501T00Z".to_string());
        assert_eq!(opts.granularity, OutputGranularity::PerFile);
        assert_eq!(opts.schema.lat_var, "latitude");
    }
}
