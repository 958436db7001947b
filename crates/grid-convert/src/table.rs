//! Bin aggregation and tabular output.
//!
//! Samples are grouped by their `(lat_bin, lon_bin)` cell and every numeric
//! column is averaged per group, skipping NaN per column. Rows come out in
//! ascending bin order with no row index, matching what the downstream
//! tabular consumers expect.

use std::collections::BTreeMap;
use std::path::Path;

use crate::binning::BinConvention;
use crate::error::ConvertResult;

/// One named column of sample values for a slice.
pub struct Column<'a> {
    pub name: &'a str,
    pub values: &'a [f64],
}

struct BinAccum {
    lat_bin: f64,
    lon_bin: f64,
    sums: Vec<f64>,
    counts: Vec<u64>,
}

/// A bin-aggregated slice, ready to be written.
pub struct BinnedTable {
    header: Vec<String>,
    rows: Vec<Vec<Option<f64>>>,
}

impl BinnedTable {
    /// Group samples by bin and mean-aggregate every column.
    ///
    /// `lat`/`lon` drive binning only; callers wanting the coordinates in the
    /// output pass them again as columns. Samples with a non-finite
    /// coordinate are dropped; NaN values in other columns are skipped by
    /// that column's mean.
    pub fn aggregate(
        lat: &[f64],
        lon: &[f64],
        columns: &[Column<'_>],
        convention: BinConvention,
    ) -> Self {
        let mut bins: BTreeMap<(i64, i64), BinAccum> = BTreeMap::new();

        for i in 0..lat.len() {
            let (la, lo) = (lat[i], lon[i]);
            if !la.is_finite() || !lo.is_finite() {
                continue;
            }

            let key = (convention.key(la), convention.key(lo));
            let accum = bins.entry(key).or_insert_with(|| BinAccum {
                lat_bin: convention.bin(la),
                lon_bin: convention.bin(lo),
                sums: vec![0.0; columns.len()],
                counts: vec![0; columns.len()],
            });

            for (c, column) in columns.iter().enumerate() {
                let v = column.values[i];
                if v.is_finite() {
                    accum.sums[c] += v;
                    accum.counts[c] += 1;
                }
            }
        }

        let mut header = vec!["lat_bin".to_string(), "lon_bin".to_string()];
        header.extend(columns.iter().map(|c| c.name.to_string()));

        let rows = bins
            .into_values()
            .map(|a| {
                let mut row = vec![Some(a.lat_bin), Some(a.lon_bin)];
                row.extend(
                    a.sums
                        .iter()
                        .zip(&a.counts)
                        .map(|(&s, &n)| if n > 0 { Some(s / n as f64) } else { None }),
                );
                row
            })
            .collect();

        Self { header, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Write the table as CSV. Missing aggregates become empty fields.
    pub fn write_csv(&self, path: &Path) -> ConvertResult<()> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(&self.header)?;
        for row in &self.rows {
            writer.write_record(row.iter().map(|v| match v {
                Some(v) => v.to_string(),
                None => String::new(),
            }))?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns<'a>(named: &'a [(&'a str, &'a [f64])]) -> Vec<Column<'a>> {
        named
            .iter()
            .map(|(name, values)| Column { name, values })
            .collect()
    }

    #[test]
    fn means_are_computed_per_bin() {
        let lat = [10.01, 10.04, 10.11];
        let lon = [5.01, 5.07, 5.01];
        let temp = [1.0, 3.0, 10.0];
        let named = [("temperature", temp.as_slice())];
        let cols = columns(&named);

        let table = BinnedTable::aggregate(
            &lat,
            &lon,
            &cols,
            BinConvention::FloorToResolution { resolution: 0.1 },
        );

        // Two samples in (10.0, 5.0), one in (10.1, 5.0).
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.rows[0], vec![Some(10.0), Some(5.0), Some(2.0)]);
        assert_eq!(table.rows[1][2], Some(10.0));
    }

    #[test]
    fn nan_samples_are_skipped_per_column() {
        let lat = [10.0, 10.0];
        let lon = [5.0, 5.0];
        let a = [2.0, f64::NAN];
        let b = [f64::NAN, f64::NAN];
        let named = [("a", a.as_slice()), ("b", b.as_slice())];
        let cols = columns(&named);

        let table = BinnedTable::aggregate(
            &lat,
            &lon,
            &cols,
            BinConvention::FloorToResolution { resolution: 0.1 },
        );

        assert_eq!(table.row_count(), 1);
        assert_eq!(table.rows[0][2], Some(2.0));
        assert_eq!(table.rows[0][3], None);
    }

    #[test]
    fn non_finite_coordinates_drop_the_sample() {
        let lat = [f64::NAN, 10.0];
        let lon = [5.0, 5.0];
        let a = [1.0, 2.0];
        let named = [("a", a.as_slice())];
        let cols = columns(&named);

        let table = BinnedTable::aggregate(
            &lat,
            &lon,
            &cols,
            BinConvention::ScaledFloor { scale: 10.0 },
        );

        assert_eq!(table.row_count(), 1);
        assert_eq!(table.rows[0][0], Some(100.0));
        assert_eq!(table.rows[0][2], Some(2.0));
    }

    #[test]
    fn csv_output_has_header_and_no_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");

        let lat = [10.04];
        let lon = [5.07];
        let vals = [3.5];
        let named = [("salinity", vals.as_slice())];
        let cols = columns(&named);

        let table = BinnedTable::aggregate(
            &lat,
            &lon,
            &cols,
            BinConvention::FloorToResolution { resolution: 0.1 },
        );
        table.write_csv(&path).unwrap();

        let body = std::fs::read_to_string(&path).unwrap();
        let mut lines = body.lines();
        assert_eq!(lines.next(), Some("lat_bin,lon_bin,salinity"));
        assert_eq!(lines.next(), Some("10,5,3.5"));
        assert_eq!(lines.next(), None);
    }
}
