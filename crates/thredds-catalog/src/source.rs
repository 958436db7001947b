//! Source references: the URL of one remote grid file plus the timestamp and
//! local key embedded in its filename.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

use crate::error::{CatalogError, CatalogResult};

/// How the local artifact key is carved out of a download URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyRule {
    /// Token between the last two dots, e.g.
    /// `NorKyst-800m.2024010100.nc` -> `2024010100`.
    AfterLastDot,
    /// Token after the last underscore with the `.nc` suffix stripped, e.g.
    /// `met_analysis_1_0km_nordic_20190501T00Z.nc` -> `20190501T00Z`.
    AfterLastUnderscore,
}

impl KeyRule {
    pub fn key_from_url(&self, url: &str) -> CatalogResult<String> {
        let tail = url.rsplit('/').next().unwrap_or(url);
        let key = match self {
            KeyRule::AfterLastDot => {
                let mut parts = tail.rsplit('.');
                let _ext = parts.next();
                parts.next().map(str::to_string)
            }
            KeyRule::AfterLastUnderscore => tail
                .rsplit('_')
                .next()
                .map(|t| t.trim_end_matches(".nc").to_string()),
        };
        match key {
            Some(k) if !k.is_empty() => Ok(k),
            _ => Err(CatalogError::BadUrl(url.to_string())),
        }
    }
}

/// Timestamp layout of a derived key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimestampRule {
    /// `%Y%m%d%H`, e.g. `2024010106`.
    CompactHour,
    /// `%Y%m%dT%HZ`, e.g. `20240101T06Z`.
    CompactHourZ,
}

impl TimestampRule {
    pub fn parse(&self, key: &str) -> CatalogResult<DateTime<Utc>> {
        let bad = || CatalogError::BadTimestamp(key.to_string());

        // Keys come from catalog entries; both layouts are pure ASCII, and
        // the guard keeps the byte slicing below from landing inside a
        // multibyte character.
        if !key.is_ascii() {
            return Err(bad());
        }

        let (date_part, hour_part) = match self {
            TimestampRule::CompactHour => {
                if key.len() != 10 {
                    return Err(bad());
                }
                (&key[..8], &key[8..10])
            }
            TimestampRule::CompactHourZ => {
                if key.len() != 12 || &key[8..9] != "T" || !key.ends_with('Z') {
                    return Err(bad());
                }
                (&key[..8], &key[9..11])
            }
        };

        let year: i32 = date_part[..4].parse().map_err(|_| bad())?;
        let month: u32 = date_part[4..6].parse().map_err(|_| bad())?;
        let day: u32 = date_part[6..8].parse().map_err(|_| bad())?;
        let hour: u32 = hour_part.parse().map_err(|_| bad())?;

        NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|d| d.and_hms_opt(hour, 0, 0))
            .map(|ndt| ndt.and_utc())
            .ok_or_else(bad)
    }
}

/// Archive-specific rules for turning a dataset entry into a [`SourceRef`].
#[derive(Debug, Clone)]
pub struct RefSpec {
    pub key_rule: KeyRule,
    pub timestamp_rule: TimestampRule,
    /// Dataset-name substrings to skip (forecast and latest products).
    pub exclude: Vec<String>,
}

impl RefSpec {
    pub fn excludes(&self, dataset_name: &str) -> bool {
        self.exclude.iter().any(|s| dataset_name.contains(s))
    }
}

/// One remote grid file discovered on a catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    pub url: String,
    pub key: String,
    pub timestamp: DateTime<Utc>,
}

impl SourceRef {
    /// Derive key and timestamp from a download URL.
    pub fn from_url(url: String, spec: &RefSpec) -> CatalogResult<Self> {
        let key = spec.key_rule.key_from_url(&url)?;
        let timestamp = spec.timestamp_rule.parse(&key)?;
        Ok(Self {
            url,
            key,
            timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn ocean_style_key_and_timestamp() {
        let url = "https://t.example.org/thredds/fileServer/fou-hi/NorKyst-800m.2024010106.nc";
        let key = KeyRule::AfterLastDot.key_from_url(url).unwrap();
        assert_eq!(key, "2024010106");

        let ts = TimestampRule::CompactHour.parse(&key).unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 1, 1, 6, 0, 0).unwrap());
    }

    #[test]
    fn surface_style_key_and_timestamp() {
        let url = "https://t.example.org/thredds/fileServer/archive/2019/05/01/met_analysis_1_0km_nordic_20190501T00Z.nc";
        let key = KeyRule::AfterLastUnderscore.key_from_url(url).unwrap();
        assert_eq!(key, "20190501T00Z");

        let ts = TimestampRule::CompactHourZ.parse(&key).unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2019, 5, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn malformed_timestamps_are_rejected() {
        assert!(TimestampRule::CompactHour.parse("2024-01-01").is_err());
        assert!(TimestampRule::CompactHourZ.parse("20240101T06").is_err());
        assert!(TimestampRule::CompactHour.parse("2024013206").is_err());
        // Non-ASCII keys of the right byte length must error, not panic.
        assert!(TimestampRule::CompactHour.parse("2024010é6").is_err());
        assert!(TimestampRule::CompactHourZ.parse("20240101TéZ").is_err());
    }

    #[test]
    fn exclusion_is_substring_based() {
        let spec = RefSpec {
            key_rule: KeyRule::AfterLastDot,
            timestamp_rule: TimestampRule::CompactHour,
            exclude: vec![".fc.".to_string()],
        };
        assert!(spec.excludes("NorKyst-800m.fc.2024010100.nc"));
        assert!(!spec.excludes("NorKyst-800m.2024010100.nc"));
    }
}
