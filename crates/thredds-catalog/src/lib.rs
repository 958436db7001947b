//! Discovery of gridded dataset files on THREDDS catalogs.
//!
//! The crate models a catalog as pages of leaf datasets and sub-catalog
//! references, walks flat or nested hierarchies into an ordered sequence of
//! [`SourceRef`]s, and optionally snapshots the result keyed by
//! (archive, epoch).

pub mod catalog;
pub mod error;
pub mod snapshot;
pub mod source;
pub mod walker;

pub use catalog::{CatalogPage, CatalogRef, LeafDataset};
pub use error::{CatalogError, CatalogResult};
pub use snapshot::SnapshotCache;
pub use source::{KeyRule, RefSpec, SourceRef, TimestampRule};
pub use walker::{CatalogTransport, CatalogWalker, HttpTransport};
