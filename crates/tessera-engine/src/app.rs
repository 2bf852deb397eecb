//! Application shell.
//!
//! [`App::bootstrap`] performs startup in a fixed order:
//!
//! 1. Validate the [`EngineConfig`].
//! 2. Install the asset resolver: one the host already registered as
//!    `Rc<dyn AssetResolver>`, else a [`PathResolver`] over `asset_root`.
//! 3. Register a neutral [`HeldDirection`] as `Box<dyn DirectionalInput>`
//!    unless the host registered an input source.
//! 4. Load records (base layer mandatory, overrides optional) and register
//!    the store as [`SharedStore`] under its type and the name `"config"`.
//! 5. Enter the initial state.
//!
//! After that the host calls [`App::advance`] once per frame and
//! [`App::input`] for discrete input events.

use std::cell::RefCell;
use std::convert::Infallible;
use std::rc::Rc;

use tessera_config::asset::{AssetResolver, PathResolver};
use tessera_config::store::ConfigurationStore;
use tessera_config::ConfigError;
use tessera_core::service::{ServiceKey, ServiceRegistry};
use tracing::{info, warn};

use crate::config::{EngineConfig, RecordsConfig};
use crate::input::{DirectionalInput, HeldDirection, InputEvent};
use crate::state::{GameState, StateContext, StateMachine};
use crate::tick::{Step, TickDiagnostics, TickLoop};
use crate::{BootstrapError, StateError};

/// The configuration store as shared through the service registry.
pub type SharedStore = Rc<RefCell<ConfigurationStore>>;

/// Service name the store is registered under, besides its type key.
pub const CONFIG_SERVICE: &str = "config";

/// A running application: services, the state machine and frame pacing.
pub struct App {
    config: EngineConfig,
    services: ServiceRegistry,
    machine: StateMachine,
    tick_loop: TickLoop,
    store: SharedStore,
}

impl App {
    /// Start with an empty registry. See [`bootstrap_with`](Self::bootstrap_with).
    pub fn bootstrap<F>(config: EngineConfig, initial: F) -> Result<Self, BootstrapError>
    where
        F: FnOnce(&mut StateContext<'_>) -> Result<Box<dyn GameState>, StateError> + 'static,
    {
        Self::bootstrap_with(config, ServiceRegistry::new(), initial)
    }

    /// Start from a registry the host has pre-populated (input source,
    /// custom resolver, host services).
    pub fn bootstrap_with<F>(
        config: EngineConfig,
        mut services: ServiceRegistry,
        initial: F,
    ) -> Result<Self, BootstrapError>
    where
        F: FnOnce(&mut StateContext<'_>) -> Result<Box<dyn GameState>, StateError> + 'static,
    {
        config.validate()?;

        let mut store = ConfigurationStore::new();
        let resolver_key = ServiceKey::of::<Rc<dyn AssetResolver>>();
        if services.contains(&resolver_key) {
            let resolver = services.get::<Rc<dyn AssetResolver>>(&resolver_key)?;
            store.set_resolver(Rc::clone(&*resolver));
        } else if let Some(root) = &config.asset_root {
            let resolver: Rc<dyn AssetResolver> = Rc::new(PathResolver::new(root));
            store.set_resolver(Rc::clone(&resolver));
            services.register(resolver_key, Rc::new(resolver));
        } else {
            info!("no asset root configured, resource fields stay unresolved");
        }

        if !services.contains(ServiceKey::of::<Box<dyn DirectionalInput>>()) {
            let input: Box<dyn DirectionalInput> = Box::new(HeldDirection::default());
            services.register(ServiceKey::of::<Box<dyn DirectionalInput>>(), Rc::new(input));
        }

        load_records(&mut store, &config.records)?;
        let store: SharedStore = Rc::new(RefCell::new(store));
        services.register_as(CONFIG_SERVICE, Rc::clone(&store));

        let mut machine = StateMachine::new();
        machine.transition_to(&mut services, initial)?;

        let tick_loop = TickLoop::new(config.tick_config());
        info!(
            tick_rate = config.tick_rate,
            services = services.len(),
            state = machine.active_name().unwrap_or("<none>"),
            "application started"
        );
        Ok(Self {
            config,
            services,
            machine,
            tick_loop,
            store,
        })
    }

    /// Run one frame of `frame_dt` seconds.
    ///
    /// A rejected state transition does not cut the frame short: the
    /// previous state stays active and keeps receiving the remaining fixed
    /// steps and the frame tick. The first such error is returned once the
    /// frame is complete.
    pub fn advance(&mut self, frame_dt: f64) -> Result<TickDiagnostics, StateError> {
        let machine = &mut self.machine;
        let services = &mut self.services;
        let mut first_err: Option<StateError> = None;
        let frame = self.tick_loop.run_frame::<Infallible>(frame_dt, |step| {
            let result = match step {
                Step::Fixed(dt) => machine.on_fixed_tick(services, dt),
                Step::Frame(dt) => machine.on_tick(services, dt),
            };
            if let Err(err) = result {
                warn!(step = ?step, error = %err, "transition rejected mid-frame, frame continues");
                first_err.get_or_insert(err);
            }
            Ok(())
        });
        let diagnostics = match frame {
            Ok(diagnostics) => diagnostics.clone(),
            Err(never) => match never {},
        };
        match first_err {
            Some(err) => Err(err),
            None => Ok(diagnostics),
        }
    }

    /// Forward an input event to the active state.
    pub fn input(&mut self, event: &InputEvent) -> Result<(), StateError> {
        self.machine.on_input(&mut self.services, event)
    }

    /// Request a state change from outside the running states.
    pub fn transition_to<F>(&mut self, factory: F) -> Result<(), StateError>
    where
        F: FnOnce(&mut StateContext<'_>) -> Result<Box<dyn GameState>, StateError> + 'static,
    {
        self.machine.transition_to(&mut self.services, factory)
    }

    /// Reload records from disk.
    ///
    /// On failure the previous records stay in place and the error is
    /// returned; the session keeps running.
    pub fn reload_config(&mut self) -> Result<(), ConfigError> {
        let mut store = self.store.borrow_mut();
        match load_records(&mut store, &self.config.records) {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(error = %err, "config reload failed, keeping previous records");
                Err(err)
            }
        }
    }

    /// Exit the active state.
    pub fn shutdown(mut self) {
        self.machine.shutdown(&mut self.services);
        info!(frames = self.tick_loop.frame_count(), "application stopped");
    }

    // -- accessors ----------------------------------------------------------

    /// The configuration the app was started with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The shared service registry.
    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    /// Mutable access for registering host services after startup.
    pub fn services_mut(&mut self) -> &mut ServiceRegistry {
        &mut self.services
    }

    /// A shared handle to the configuration store.
    pub fn store(&self) -> SharedStore {
        Rc::clone(&self.store)
    }

    /// The top-level state machine.
    pub fn machine(&self) -> &StateMachine {
        &self.machine
    }

    /// Frame pacing counters and diagnostics.
    pub fn tick_loop(&self) -> &TickLoop {
        &self.tick_loop
    }
}

fn load_records(store: &mut ConfigurationStore, records: &RecordsConfig) -> Result<(), ConfigError> {
    let base = records.base_layer();
    match records.discovery() {
        Some(discovery) => store.load_discovered(&base, &discovery)?,
        None => store.load(&base, &[])?,
    };
    Ok(())
}
