//! Record sources and override layer discovery.
//!
//! The base layer and every override layer are a named [`RecordSource`].
//! Override layers on disk live under one root directory, one subdirectory
//! per layer, each optionally holding a record file at a fixed relative
//! path:
//!
//! ```text
//! overrides/
//!   10_balance/data/records.ron
//!   20_community/data/records.json
//!   zz_disabled/          (no record file: ignored)
//! ```
//!
//! [`LayerDiscovery::discover`] scans subdirectories in lexical order of
//! their names, which is also the order in which they override each other.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::format::{find_record_file, parse_sequence, read_sequence, Format};
use crate::ConfigError;

// ---------------------------------------------------------------------------
// RecordSource
// ---------------------------------------------------------------------------

/// Where a layer's raw records come from.
#[derive(Debug, Clone)]
pub enum RecordSource {
    /// A file on disk; format from its extension.
    File(PathBuf),
    /// In-memory text in a known format.
    Text { format: Format, text: String },
    /// Already-parsed values.
    Values(Vec<Value>),
}

impl RecordSource {
    pub(crate) fn read(&self, label: &str) -> Result<Vec<Value>, ConfigError> {
        match self {
            RecordSource::File(path) => read_sequence(path),
            RecordSource::Text { format, text } => parse_sequence(*format, text, label),
            RecordSource::Values(values) => Ok(values.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// Layer
// ---------------------------------------------------------------------------

/// A named record source.
#[derive(Debug, Clone)]
pub struct Layer {
    pub name: String,
    pub source: RecordSource,
}

impl Layer {
    /// A layer named `name` reading from `source`.
    pub fn new(name: impl Into<String>, source: RecordSource) -> Self {
        Self {
            name: name.into(),
            source,
        }
    }

    /// A layer read from a file; the format follows the extension.
    pub fn file(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::new(name, RecordSource::File(path.into()))
    }

    /// A layer parsed from in-memory text.
    pub fn text(name: impl Into<String>, format: Format, text: impl Into<String>) -> Self {
        Self::new(
            name,
            RecordSource::Text {
                format,
                text: text.into(),
            },
        )
    }

    /// A layer of already-parsed values, mostly for tests and tools.
    pub fn values(name: impl Into<String>, values: Vec<Value>) -> Self {
        Self::new(name, RecordSource::Values(values))
    }
}

// ---------------------------------------------------------------------------
// LayerDiscovery
// ---------------------------------------------------------------------------

/// Finds override layers under a root directory.
#[derive(Debug, Clone)]
pub struct LayerDiscovery {
    root: PathBuf,
    record_path: PathBuf,
    exclude: Vec<String>,
}

impl LayerDiscovery {
    /// `record_path` is relative to each layer directory. With an extension
    /// it names one exact file; without, `.json`, `.ron` and `.toml` are
    /// probed and more than one match skips the layer.
    pub fn new(root: impl Into<PathBuf>, record_path: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            record_path: record_path.into(),
            exclude: Vec::new(),
        }
    }

    /// Layer directory names to ignore.
    pub fn exclude<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(names.into_iter().map(Into::into));
        self
    }

    /// Scan the root. A missing root yields no layers.
    ///
    /// Layers whose record file is ambiguous are skipped and returned as
    /// warnings alongside the discovered layers.
    pub fn discover(&self) -> Result<(Vec<Layer>, Vec<ConfigError>), ConfigError> {
        if !self.root.is_dir() {
            debug!(root = %self.root.display(), "override root absent, no layers");
            return Ok((Vec::new(), Vec::new()));
        }

        let entries = std::fs::read_dir(&self.root).map_err(|source| ConfigError::Io {
            path: self.root.clone(),
            source,
        })?;
        let mut dirs: Vec<(String, PathBuf)> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| ConfigError::Io {
                path: self.root.clone(),
                source,
            })?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_owned) else {
                warn!(path = %path.display(), "skipping layer directory with a non UTF-8 name");
                continue;
            };
            if self.exclude.iter().any(|e| *e == name) {
                debug!(layer = %name, "layer excluded");
                continue;
            }
            dirs.push((name, path));
        }
        dirs.sort_by(|a, b| a.0.cmp(&b.0));

        let mut layers = Vec::new();
        let mut problems = Vec::new();
        for (name, dir) in dirs {
            match self.record_file(&dir) {
                Ok(Some(file)) => {
                    debug!(layer = %name, file = %file.display(), "override layer discovered");
                    layers.push(Layer::file(name, file));
                }
                Ok(None) => debug!(layer = %name, "no record file, layer ignored"),
                Err(err) => {
                    warn!(layer = %name, error = %err, "override layer skipped");
                    problems.push(ConfigError::LayerSkipped {
                        layer: name,
                        reason: err.to_string(),
                    });
                }
            }
        }
        Ok((layers, problems))
    }

    fn record_file(&self, layer_dir: &Path) -> Result<Option<PathBuf>, ConfigError> {
        let target = layer_dir.join(&self.record_path);
        if self.record_path.extension().is_some() {
            return Ok(target.is_file().then_some(target));
        }
        let parent = target.parent().unwrap_or(layer_dir);
        let Some(stem) = target.file_name().and_then(|s| s.to_str()) else {
            return Ok(None);
        };
        find_record_file(parent, stem)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
