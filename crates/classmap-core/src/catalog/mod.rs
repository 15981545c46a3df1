//! Versioned persistence of mapping snapshots.
//!
//! Every committed import is stored as one archived [`MappingSnapshot`]
//! keyed by version, so earlier mappings stay readable.
//!
//! [`MappingSnapshot`]: crate::mapping::MappingSnapshot

mod catalog;

pub use catalog::MappingCatalog;
