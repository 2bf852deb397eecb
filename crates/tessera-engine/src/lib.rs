//! Tessera Engine -- top-level state machine, frame pacing and bootstrap.
//!
//! This crate ties [`tessera_core`] and [`tessera_config`] together into a
//! runnable application shell:
//!
//! - [`state`]: the [`StateMachine`](state::StateMachine) holding one active
//!   [`GameState`](state::GameState) and forwarding ticks and input to it.
//! - [`tick`]: a fixed-timestep accumulator that turns variable frame times
//!   into `on_tick` / `on_fixed_tick` calls.
//! - [`input`]: the directional input seam.
//! - [`config`]: [`EngineConfig`](config::EngineConfig), read from TOML, RON
//!   or JSON.
//! - [`app`]: [`App`](app::App), which loads configuration, populates the
//!   service registry and runs frames.
//!
//! # Quick Start
//!
//! ```
//! use tessera_engine::prelude::*;
//!
//! struct Title;
//! impl GameState for Title {
//!     fn name(&self) -> &str {
//!         "title"
//!     }
//! }
//!
//! let mut services = ServiceRegistry::new();
//! let mut machine = StateMachine::new();
//! machine
//!     .transition_to(&mut services, |_ctx| Ok(Box::new(Title) as Box<dyn GameState>))
//!     .unwrap();
//! assert_eq!(machine.active_name(), Some("title"));
//! ```

#![deny(unsafe_code)]

pub mod app;
pub mod config;
pub mod input;
pub mod logging;
pub mod state;
pub mod tick;

/// Re-export the core crate for convenience.
pub use tessera_core;

/// Re-export the config crate for convenience.
pub use tessera_config;

use std::path::PathBuf;

use tessera_config::ConfigError;
use tessera_core::service::ServiceError;
use tessera_core::CoreError;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// A rejected state transition. The previously active state stays active.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    /// The factory refused to build the state.
    #[error("state could not be constructed: {reason}")]
    Unconstructible { reason: String },

    /// The factory needed a service that is not registered.
    #[error("state could not be constructed: {0}")]
    Service(#[from] ServiceError),

    /// Building the state's composition tree failed.
    #[error("state could not be constructed: {0}")]
    Composition(#[from] CoreError),

    /// Queued transitions kept requesting further transitions.
    #[error("more than {limit} chained transitions in one step, remaining requests dropped")]
    Runaway { limit: usize },
}

impl StateError {
    /// Shorthand for [`StateError::Unconstructible`].
    pub fn unconstructible(reason: impl Into<String>) -> Self {
        StateError::Unconstructible {
            reason: reason.into(),
        }
    }
}

/// Fatal startup failures, returned to the host for a controlled shutdown.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("cannot read engine config {}: {detail}", path.display())]
    ConfigFile { path: PathBuf, detail: String },

    #[error("invalid engine config: {detail}")]
    InvalidConfig { detail: String },

    /// The base record layer is mandatory.
    #[error("base records failed to load: {0}")]
    Records(#[from] ConfigError),

    #[error("mandatory service unavailable: {0}")]
    MissingService(#[from] ServiceError),

    #[error("initial state rejected: {0}")]
    InitialState(#[from] StateError),
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common engine usage.
pub mod prelude {
    pub use tessera_config::prelude::*;
    pub use tessera_core::prelude::*;

    pub use crate::app::{App, SharedStore};
    pub use crate::config::{EngineConfig, RecordsConfig};
    pub use crate::input::{Direction, DirectionalInput, HeldDirection, InputEvent};
    pub use crate::state::{GameState, StateContext, StateFactory, StateHandle, StateMachine};
    pub use crate::tick::{Step, TickConfig, TickDiagnostics, TickLoop};
    pub use crate::{BootstrapError, StateError};
}
