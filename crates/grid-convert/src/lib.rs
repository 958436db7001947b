//! Deterministic spatial downscaling of NetCDF model grids.
//!
//! A downloaded grid file becomes one or more CSV artifacts: samples are
//! assigned to fixed-resolution (lat, lon) bins and every numeric column is
//! mean-aggregated per bin. Failed conversions quarantine the source file
//! instead of deleting or retrying it.

pub mod binning;
pub mod convert;
pub mod dataset;
pub mod error;
pub mod table;

pub use binning::BinConvention;
pub use convert::{convert_artifact, convert_file, ConvertOptions, ConvertOutcome, OutputGranularity};
pub use dataset::{GridDataset, GridSchema, GridVariable};
pub use error::{ConvertError, ConvertResult};
pub use table::{BinnedTable, Column};
