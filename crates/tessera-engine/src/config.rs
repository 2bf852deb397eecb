//! Engine configuration file.
//!
//! ```toml
//! tick_rate = 60.0
//! max_fixed_steps = 5
//! log_filter = "info,tessera_config=debug"
//! asset_root = "assets"
//!
//! [records]
//! base = "data/records.json"
//! override_root = "mods"
//! record_path = "data/records"
//! exclude = ["disabled_mod"]
//! ```
//!
//! Every field has a default, so an empty file is valid. Relative paths are
//! taken relative to the directory holding the config file when loaded with
//! [`EngineConfig::load`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tessera_config::format::{detect_format, Format};
use tessera_config::layer::{Layer, LayerDiscovery};

use crate::tick::TickConfig;
use crate::BootstrapError;

/// Where game records live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecordsConfig {
    /// Base record file (`.json`, `.ron` or `.toml`).
    pub base: PathBuf,
    /// Directory scanned for override layers. `None` disables overrides.
    pub override_root: Option<PathBuf>,
    /// Record file inside each layer directory. Without an extension every
    /// supported format is probed.
    pub record_path: PathBuf,
    /// Layer directory names to skip.
    pub exclude: Vec<String>,
}

impl Default for RecordsConfig {
    fn default() -> Self {
        Self {
            base: PathBuf::from("data/records.json"),
            override_root: Some(PathBuf::from("mods")),
            record_path: PathBuf::from("data/records"),
            exclude: Vec::new(),
        }
    }
}

impl RecordsConfig {
    /// The mandatory base layer, named `base`.
    pub fn base_layer(&self) -> Layer {
        Layer::file("base", &self.base)
    }

    /// Override discovery, if an override root is configured.
    pub fn discovery(&self) -> Option<LayerDiscovery> {
        let root = self.override_root.as_ref()?;
        Some(LayerDiscovery::new(root, &self.record_path).exclude(self.exclude.iter().cloned()))
    }
}

/// Top-level engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Fixed steps per second.
    pub tick_rate: f64,
    pub max_fixed_steps: u32,
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` wins if set.
    pub log_filter: String,
    /// Root for `res://` paths. `None` leaves resources unresolved.
    pub asset_root: Option<PathBuf>,
    pub records: RecordsConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60.0,
            max_fixed_steps: 5,
            log_filter: "info".to_owned(),
            asset_root: None,
            records: RecordsConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Read and validate a config file; format from its extension.
    pub fn load(path: &Path) -> Result<Self, BootstrapError> {
        let file_err = |detail: String| BootstrapError::ConfigFile {
            path: path.to_path_buf(),
            detail,
        };
        let format = detect_format(path).map_err(|e| file_err(e.to_string()))?;
        let text = std::fs::read_to_string(path).map_err(|e| file_err(e.to_string()))?;
        let mut config = Self::parse(format, &text).map_err(|e| match e {
            BootstrapError::InvalidConfig { detail } => file_err(detail),
            other => other,
        })?;
        if let Some(dir) = path.parent() {
            config.rebase(dir);
        }
        Ok(config)
    }

    /// Parse and validate config text. Paths are left as written.
    pub fn parse(format: Format, text: &str) -> Result<Self, BootstrapError> {
        let invalid = |detail: String| BootstrapError::InvalidConfig { detail };
        let config: Self = match format {
            Format::Toml => toml::from_str(text).map_err(|e| invalid(e.to_string()))?,
            Format::Ron => ron::from_str(text).map_err(|e| invalid(e.to_string()))?,
            Format::Json => serde_json::from_str(text).map_err(|e| invalid(e.to_string()))?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with. A config that passes
    /// always yields a [`TickConfig`] that [`TickLoop::new`] accepts.
    ///
    /// [`TickLoop::new`]: crate::tick::TickLoop::new
    pub fn validate(&self) -> Result<(), BootstrapError> {
        // Checked on the derived step too: a subnormal rate is positive but
        // its reciprocal overflows to infinity.
        let fixed_dt = 1.0 / self.tick_rate;
        if !(self.tick_rate.is_finite()
            && self.tick_rate > 0.0
            && fixed_dt.is_finite()
            && fixed_dt > 0.0)
        {
            return Err(BootstrapError::InvalidConfig {
                detail: format!(
                    "tick_rate must be positive with a finite step, got {}",
                    self.tick_rate
                ),
            });
        }
        if self.max_fixed_steps == 0 {
            return Err(BootstrapError::InvalidConfig {
                detail: "max_fixed_steps must be at least 1".to_owned(),
            });
        }
        if self.records.record_path.is_absolute() {
            return Err(BootstrapError::InvalidConfig {
                detail: "records.record_path must be relative to the layer directory".to_owned(),
            });
        }
        Ok(())
    }

    /// The fixed-timestep settings derived from `tick_rate`.
    pub fn tick_config(&self) -> TickConfig {
        TickConfig {
            fixed_dt: 1.0 / self.tick_rate,
            max_fixed_steps: self.max_fixed_steps,
        }
    }

    /// Make relative paths relative to `dir`.
    pub fn rebase(&mut self, dir: &Path) {
        let join = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = dir.join(&*p);
            }
        };
        join(&mut self.records.base);
        if let Some(root) = self.records.override_root.as_mut() {
            join(root);
        }
        if let Some(root) = self.asset_root.as_mut() {
            join(root);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
