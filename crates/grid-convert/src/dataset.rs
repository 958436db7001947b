//! In-memory decoded view of one NetCDF grid file.
//!
//! Only the dimensions the tabular output needs survive loading: time, an
//! optional depth/level axis, and the two spatial dimensions. Variables laid
//! out over any other dimension (e.g. internal vertical coordinates like
//! `s_rho`/`s_w`) are dropped at this stage. Values are scaled with
//! `scale_factor`/`add_offset` and fill values become NaN, following the CF
//! conventions the archives use.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use std::path::Path;
use tracing::debug;

use crate::error::{ConvertError, ConvertResult};

/// Names used to locate coordinates and axes in the file, per archive.
#[derive(Debug, Clone)]
pub struct GridSchema {
    pub time_dim: String,
    pub depth_dim: Option<String>,
    pub lat_var: String,
    pub lon_var: String,
}

/// One gridded data variable, flattened in [time][depth?][y][x] order.
#[derive(Debug, Clone)]
pub struct GridVariable {
    pub name: String,
    pub has_depth: bool,
    /// Static (y, x) variables such as bathymetry or land masks hold a
    /// single spatial slice shared by every time step.
    pub is_static: bool,
    pub values: Vec<f64>,
}

/// Decoded grid file.
#[derive(Debug, Clone)]
pub struct GridDataset {
    pub times: Vec<DateTime<Utc>>,
    /// Depth/level values; empty when the file has no depth axis.
    pub depths: Vec<f64>,
    /// Per-cell latitude, row-major over (y, x).
    pub lat: Vec<f64>,
    /// Per-cell longitude, row-major over (y, x).
    pub lon: Vec<f64>,
    pub ny: usize,
    pub nx: usize,
    pub variables: Vec<GridVariable>,
}

impl GridDataset {
    /// Load and decode a grid file according to `schema`.
    pub fn load(path: &Path, schema: &GridSchema) -> ConvertResult<Self> {
        let file = netcdf::open(path).map_err(|e| ConvertError::Open(e.to_string()))?;

        let times = read_time_axis(&file, &schema.time_dim)?;

        let depths = match &schema.depth_dim {
            Some(name) if file.dimension(name).is_some() => {
                let var = file
                    .variable(name)
                    .ok_or_else(|| ConvertError::MissingVariable(name.clone()))?;
                read_all_f64(&var)?
            }
            _ => Vec::new(),
        };

        let (lat, lon, ny, nx, spatial_dims) = read_coordinates(&file, schema)?;

        let mut variables = Vec::new();
        for var in file.variables() {
            let name = var.name();
            if name == schema.lat_var
                || name == schema.lon_var
                || name == schema.time_dim
                || Some(name.as_str()) == schema.depth_dim.as_deref()
            {
                continue;
            }

            let dims: Vec<String> = var.dimensions().iter().map(|d| d.name()).collect();
            let Some(layout) = classify_dims(&dims, schema, &spatial_dims) else {
                debug!(variable = %name, dims = ?dims, "Dropping variable on unsupported dimensions");
                continue;
            };

            let values = read_scaled(&var)?;
            variables.push(GridVariable {
                name,
                has_depth: layout.has_depth,
                is_static: layout.is_static,
                values,
            });
        }

        if variables.is_empty() {
            return Err(ConvertError::Empty);
        }

        Ok(Self {
            times,
            depths,
            lat,
            lon,
            ny,
            nx,
            variables,
        })
    }

    /// Number of cells in one spatial slice.
    pub fn slice_len(&self) -> usize {
        self.ny * self.nx
    }

    /// Borrow the (time, depth) slice of a variable.
    ///
    /// `depth_idx` is ignored for variables without a depth axis, and static
    /// variables return their single slice for every index.
    pub fn slice<'a>(
        &self,
        var: &'a GridVariable,
        time_idx: usize,
        depth_idx: usize,
    ) -> &'a [f64] {
        let cells = self.slice_len();
        let offset = if var.is_static {
            0
        } else if var.has_depth {
            (time_idx * self.depths.len().max(1) + depth_idx) * cells
        } else {
            time_idx * cells
        };
        &var.values[offset..offset + cells]
    }
}

struct VarLayout {
    has_depth: bool,
    is_static: bool,
}

/// Accept (time, y, x), (time, depth, y, x) or bare (y, x); anything else is
/// dropped.
fn classify_dims(dims: &[String], schema: &GridSchema, spatial: &(String, String)) -> Option<VarLayout> {
    let (ref dy, ref dx) = *spatial;
    match dims {
        [t, y, x] if *t == schema.time_dim && y == dy && x == dx => Some(VarLayout {
            has_depth: false,
            is_static: false,
        }),
        [t, d, y, x]
            if *t == schema.time_dim
                && Some(d.as_str()) == schema.depth_dim.as_deref()
                && y == dy
                && x == dx =>
        {
            Some(VarLayout {
                has_depth: true,
                is_static: false,
            })
        }
        [y, x] if y == dy && x == dx => Some(VarLayout {
            has_depth: false,
            is_static: true,
        }),
        _ => None,
    }
}

/// Read lat/lon as per-cell arrays, broadcasting 1-D axes to the 2-D grid.
fn read_coordinates(
    file: &netcdf::File,
    schema: &GridSchema,
) -> ConvertResult<(Vec<f64>, Vec<f64>, usize, usize, (String, String))> {
    let lat_var = file
        .variable(&schema.lat_var)
        .ok_or_else(|| ConvertError::MissingVariable(schema.lat_var.clone()))?;
    let lon_var = file
        .variable(&schema.lon_var)
        .ok_or_else(|| ConvertError::MissingVariable(schema.lon_var.clone()))?;

    let lat_dims: Vec<String> = lat_var.dimensions().iter().map(|d| d.name()).collect();

    if lat_dims.len() == 2 {
        let ny = lat_var.dimensions()[0].len();
        let nx = lat_var.dimensions()[1].len();
        let lat = read_all_f64(&lat_var)?;
        let lon = read_all_f64(&lon_var)?;
        if lon.len() != ny * nx {
            return Err(ConvertError::Read {
                name: schema.lon_var.clone(),
                message: format!("expected {} cells, got {}", ny * nx, lon.len()),
            });
        }
        let spatial = (lat_dims[0].clone(), lat_dims[1].clone());
        Ok((lat, lon, ny, nx, spatial))
    } else if lat_dims.len() == 1 {
        let lat_axis = read_all_f64(&lat_var)?;
        let lon_axis = read_all_f64(&lon_var)?;
        let ny = lat_axis.len();
        let nx = lon_axis.len();

        let mut lat = Vec::with_capacity(ny * nx);
        let mut lon = Vec::with_capacity(ny * nx);
        for &la in &lat_axis {
            for &lo in &lon_axis {
                lat.push(la);
                lon.push(lo);
            }
        }
        let lon_dims: Vec<String> = lon_var.dimensions().iter().map(|d| d.name()).collect();
        let spatial = (lat_dims[0].clone(), lon_dims[0].clone());
        Ok((lat, lon, ny, nx, spatial))
    } else {
        Err(ConvertError::Read {
            name: schema.lat_var.clone(),
            message: format!("unsupported coordinate rank {}", lat_dims.len()),
        })
    }
}

/// Decode the time axis via its CF `units` attribute.
fn read_time_axis(file: &netcdf::File, time_dim: &str) -> ConvertResult<Vec<DateTime<Utc>>> {
    file.dimension(time_dim)
        .ok_or_else(|| ConvertError::MissingDimension(time_dim.to_string()))?;

    let var = file
        .variable(time_dim)
        .ok_or_else(|| ConvertError::MissingVariable(time_dim.to_string()))?;

    let units = get_string_attr(&var, "units")
        .unwrap_or_else(|| "seconds since 1970-01-01 00:00:00".to_string());
    let (step_secs, epoch) = parse_time_units(&units)?;

    let raw = read_all_f64(&var)?;
    Ok(raw
        .into_iter()
        .map(|v| epoch + Duration::seconds((v * step_secs as f64).round() as i64))
        .collect())
}

/// Parse CF-style `<unit> since <reference>` time units into a step size in
/// seconds and the reference epoch.
fn parse_time_units(units: &str) -> ConvertResult<(i64, DateTime<Utc>)> {
    let bad = || ConvertError::BadTimeUnits(units.to_string());

    let mut parts = units.splitn(2, " since ");
    let unit = parts.next().ok_or_else(bad)?.trim();
    let reference = parts.next().ok_or_else(bad)?.trim();

    let step_secs: i64 = match unit {
        "seconds" | "second" => 1,
        "minutes" | "minute" => 60,
        "hours" | "hour" => 3600,
        "days" | "day" => 86_400,
        _ => return Err(bad()),
    };

    let reference = reference.trim_end_matches('Z').replace('T', " ");
    let epoch = NaiveDateTime::parse_from_str(&reference, "%Y-%m-%d %H:%M:%S")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(&reference, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(bad)?;

    Ok((step_secs, epoch.and_utc()))
}

/// Read a whole variable as f64, applying scale/offset and mapping the fill
/// value to NaN.
fn read_scaled(var: &netcdf::Variable) -> ConvertResult<Vec<f64>> {
    let raw = read_all_f64(var)?;

    let scale = get_f64_attr(var, "scale_factor").unwrap_or(1.0);
    let offset = get_f64_attr(var, "add_offset").unwrap_or(0.0);
    let fill = get_f64_attr(var, "_FillValue");

    Ok(raw
        .into_iter()
        .map(|v| match fill {
            Some(f) if v == f => f64::NAN,
            _ => v * scale + offset,
        })
        .collect())
}

fn read_all_f64(var: &netcdf::Variable) -> ConvertResult<Vec<f64>> {
    var.get_values::<f64, _>(..).map_err(|e| ConvertError::Read {
        name: var.name(),
        message: e.to_string(),
    })
}

fn has_attr(var: &netcdf::Variable, name: &str) -> bool {
    var.attributes().any(|attr| attr.name() == name)
}

fn get_f64_attr(var: &netcdf::Variable, name: &str) -> Option<f64> {
    if !has_attr(var, name) {
        return None;
    }
    let attr_value = var.attribute_value(name)?.ok()?;
    f64::try_from(attr_value).ok()
}

fn get_string_attr(var: &netcdf::Variable, name: &str) -> Option<String> {
    if !has_attr(var, name) {
        return None;
    }
    match var.attribute_value(name)?.ok()? {
        netcdf::AttributeValue::Str(s) => Some(s),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn cf_time_units_decode() {
        let (step, epoch) = parse_time_units("seconds since 1970-01-01 00:00:00").unwrap();
        assert_eq!(step, 1);
        assert_eq!(epoch, Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap());

        let (step, epoch) = parse_time_units("hours since 2024-01-01T00:00:00Z").unwrap();
        assert_eq!(step, 3600);
        assert_eq!(
            epoch + Duration::seconds(step * 6),
            Utc.with_ymd_and_hms(2024, 1, 1, 6, 0, 0).unwrap()
        );

        let (step, _) = parse_time_units("days since 2024-01-01").unwrap();
        assert_eq!(step, 86_400);

        assert!(parse_time_units("fortnights since 2024-01-01").is_err());
        assert!(parse_time_units("not a unit string").is_err());
    }

    #[test]
    fn static_variables_share_one_slice_across_time_steps() {
        // A daily file with hourly steps also carries static grid variables
        // (bathymetry, masks) holding exactly one spatial slice.
        let ds = GridDataset {
            times: vec![
                Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap(),
            ],
            depths: Vec::new(),
            lat: vec![0.0; 4],
            lon: vec![0.0; 4],
            ny: 2,
            nx: 2,
            variables: Vec::new(),
        };

        let bathymetry = GridVariable {
            name: "h".to_string(),
            has_depth: false,
            is_static: true,
            values: vec![10.0, 20.0, 30.0, 40.0],
        };
        assert_eq!(ds.slice(&bathymetry, 0, 0), &[10.0, 20.0, 30.0, 40.0]);
        assert_eq!(ds.slice(&bathymetry, 1, 0), ds.slice(&bathymetry, 0, 0));

        let temperature = GridVariable {
            name: "temperature".to_string(),
            has_depth: false,
            is_static: false,
            values: (0..8).map(f64::from).collect(),
        };
        assert_eq!(ds.slice(&temperature, 1, 0), &[4.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn dim_classification_drops_internal_levels() {
        let schema = GridSchema {
            time_dim: "time".to_string(),
            depth_dim: Some("depth".to_string()),
            lat_var: "lat".to_string(),
            lon_var: "lon".to_string(),
        };
        let spatial = ("Y".to_string(), "X".to_string());
        let dims = |names: &[&str]| names.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        assert!(classify_dims(&dims(&["time", "Y", "X"]), &schema, &spatial).is_some());
        assert!(
            classify_dims(&dims(&["time", "depth", "Y", "X"]), &schema, &spatial)
                .map_or(false, |l| l.has_depth)
        );
        assert!(classify_dims(&dims(&["Y", "X"]), &schema, &spatial)
            .map_or(false, |l| l.is_static));
        // Internal vertical coordinate: dropped.
        assert!(classify_dims(&dims(&["time", "s_rho", "Y", "X"]), &schema, &spatial).is_none());
        assert!(classify_dims(&dims(&["time"]), &schema, &spatial).is_none());
    }
}
