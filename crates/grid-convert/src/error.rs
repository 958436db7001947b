//! Error types for grid conversion.

use thiserror::Error;

/// Result type for conversion operations.
pub type ConvertResult<T> = Result<T, ConvertError>;

/// Errors raised while converting one grid file.
///
/// Conversion errors are isolated per artifact: the batch continues and the
/// offending source file is quarantined by [`crate::convert_artifact`].
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("failed to open grid file: {0}")]
    Open(String),

    #[error("missing dimension: {0}")]
    MissingDimension(String),

    #[error("missing variable: {0}")]
    MissingVariable(String),

    #[error("failed to read variable `{name}`: {message}")]
    Read { name: String, message: String },

    #[error("cannot decode time units `{0}`")]
    BadTimeUnits(String),

    #[error("grid has no aggregatable samples")]
    Empty,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV write error: {0}")]
    Csv(#[from] csv::Error),
}
