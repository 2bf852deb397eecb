//! Tessera Config -- layered, override-capable record storage.
//!
//! Game data lives in records: a string `id` plus a map of fields. A base
//! record file is loaded first, then every override layer discovered under
//! an override root is applied on top in lexical order. A record in a later
//! layer replaces the earlier record with the same id wholesale; fields are
//! never merged.
//!
//! # Modules
//!
//! - [`format`]: JSON / RON / TOML detection and sequence parsing.
//! - [`record`]: [`ConfigRecord`](record::ConfigRecord) and `res://` paths.
//! - [`layer`]: record sources and override layer discovery.
//! - [`asset`]: the host-side [`AssetResolver`](asset::AssetResolver) seam.
//! - [`store`]: the merged, queryable
//!   [`ConfigurationStore`](store::ConfigurationStore).
//!
//! # Threading
//!
//! The store is single-threaded: asset handles are `Rc` and resources are
//! cached in `OnceCell`s. Loading on a worker thread would need a
//! `Send + Sync` resolver and handle type at this boundary.

#![deny(unsafe_code)]

use std::path::PathBuf;

pub mod asset;
pub mod format;
pub mod layer;
pub mod record;
pub mod store;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced while loading or reading configuration.
///
/// Only a failing base layer aborts a load. Everything else is collected
/// into the [`LoadReport`](store::LoadReport) and logged.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file extension is not one of `json`, `ron`, `toml`.
    #[error("unsupported record file format: {}", file.display())]
    UnsupportedFormat { file: PathBuf },

    /// The same record file exists in more than one format.
    #[error("conflicting record files: {} and {}", a.display(), b.display())]
    ConflictingFormats { a: PathBuf, b: PathBuf },

    /// The source text is not a sequence of records.
    #[error("failed to parse '{source_label}': {detail}")]
    Parse { source_label: String, detail: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A single entry was skipped; the rest of its layer still loads.
    #[error("layer '{layer}' record #{index} skipped: {reason}")]
    MalformedRecord {
        layer: String,
        index: usize,
        reason: String,
    },

    /// The same id appeared twice in one layer; the later entry was kept.
    #[error("layer '{layer}' defines record '{id}' more than once")]
    DuplicateRecord { layer: String, id: String },

    /// An override layer could not be read or parsed and was ignored.
    #[error("override layer '{layer}' skipped: {reason}")]
    LayerSkipped { layer: String, reason: String },

    /// A record did not deserialize into the requested type.
    #[error("record '{id}' has invalid fields: {detail}")]
    Field { id: String, detail: String },

    #[error("no record with id '{id}'")]
    RecordNotFound { id: String },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::asset::{AssetError, AssetHandle, AssetResolver, PathResolver};
    pub use crate::format::Format;
    pub use crate::layer::{Layer, LayerDiscovery, RecordSource};
    pub use crate::record::{ConfigRecord, ResourcePath};
    pub use crate::store::{ConfigurationStore, LayerSummary, LoadReport, ResolvedRecord};
    pub use crate::ConfigError;
}
