//! Error types for catalog discovery.

use thiserror::Error;

/// Result type for catalog operations.
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Errors raised while walking a remote catalog.
///
/// All of these are fatal to a pipeline run: a partial or wrong view of the
/// catalog would corrupt the frontier computation downstream.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog unavailable: {0}")]
    Unavailable(String),

    #[error("invalid catalog document at {url}: {message}")]
    InvalidCatalog { url: String, message: String },

    #[error("cannot derive a reference key from url: {0}")]
    BadUrl(String),

    #[error("cannot parse timestamp from `{0}`")]
    BadTimestamp(String),

    #[error("snapshot cache I/O error: {0}")]
    Cache(#[from] std::io::Error),

    #[error("snapshot cache is corrupt: {0}")]
    CacheFormat(#[from] serde_json::Error),
}
