//! Addon catalog: classification of raw rows and grouping by archive.

pub mod group;
pub mod record;

pub use group::{group, ArchiveGroup};
pub use record::{
    addons, classify, detect_source, parse_catalog, parse_catalog_reader, AddonRecord,
    CatalogEntry, SourceKind,
};
