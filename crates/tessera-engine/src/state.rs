//! Top-level state machine.
//!
//! A [`StateMachine`] holds at most one active [`GameState`] and forwards
//! per-frame callbacks to it. A transition:
//!
//! 1. Builds the new state through its factory. A factory failure leaves the
//!    current state active and untouched.
//! 2. Calls `exit` on the current state and drops it.
//! 3. Calls `enter` on the new state and makes it active.
//!
//! States never hold the machine itself. They request further transitions
//! through the [`StateHandle`] in their [`StateContext`]; those requests are
//! queued and applied after the current transition or tick has finished, in
//! request order.
//!
//! # Example
//!
//! ```
//! use tessera_engine::prelude::*;
//!
//! struct Loading;
//! impl GameState for Loading {
//!     fn name(&self) -> &str { "loading" }
//!     fn on_tick(&mut self, ctx: &mut StateContext<'_>, _dt: f64) {
//!         ctx.handle().request(|_| Ok(Box::new(Playing) as Box<dyn GameState>));
//!     }
//! }
//!
//! struct Playing;
//! impl GameState for Playing {
//!     fn name(&self) -> &str { "playing" }
//! }
//!
//! let mut services = ServiceRegistry::new();
//! let mut machine = StateMachine::new();
//! machine.transition_to(&mut services, |_| Ok(Box::new(Loading) as Box<dyn GameState>)).unwrap();
//! machine.on_tick(&mut services, 0.016).unwrap();
//! assert_eq!(machine.active_name(), Some("playing"));
//! ```

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use tessera_core::service::ServiceRegistry;
use tracing::{debug, error, info};

use crate::input::InputEvent;
use crate::StateError;

/// Default bound on transitions applied in one drain.
pub const DEFAULT_MAX_CHAINED_TRANSITIONS: usize = 16;

// ---------------------------------------------------------------------------
// GameState
// ---------------------------------------------------------------------------

/// One mutually exclusive top-level application phase.
///
/// All hooks default to no-ops.
pub trait GameState {
    fn name(&self) -> &str;

    fn enter(&mut self, _ctx: &mut StateContext<'_>) {}

    fn exit(&mut self, _ctx: &mut StateContext<'_>) {}

    fn on_tick(&mut self, _ctx: &mut StateContext<'_>, _dt: f64) {}

    fn on_fixed_tick(&mut self, _ctx: &mut StateContext<'_>, _dt: f64) {}

    fn on_input(&mut self, _ctx: &mut StateContext<'_>, _event: &InputEvent) {}
}

/// Builds a state. Runs before the current state exits.
pub type StateFactory =
    Box<dyn FnOnce(&mut StateContext<'_>) -> Result<Box<dyn GameState>, StateError>>;

// ---------------------------------------------------------------------------
// StateContext / StateHandle
// ---------------------------------------------------------------------------

/// What a state (or a state factory) can reach while it runs.
pub struct StateContext<'a> {
    services: &'a mut ServiceRegistry,
    handle: &'a StateHandle,
}

impl<'a> StateContext<'a> {
    /// Read access to the service registry.
    pub fn services(&self) -> &ServiceRegistry {
        self.services
    }

    /// States may register the services they own on `enter` and remove them
    /// on `exit`.
    pub fn services_mut(&mut self) -> &mut ServiceRegistry {
        self.services
    }

    /// Handle for requesting a transition once the current hook returns.
    pub fn handle(&self) -> &StateHandle {
        self.handle
    }
}

/// Cloneable queue of transition requests for a [`StateMachine`].
///
/// Requests are applied by the machine after the running transition or tick
/// completes, never immediately.
#[derive(Clone, Default)]
pub struct StateHandle {
    pending: Rc<RefCell<VecDeque<StateFactory>>>,
}

impl StateHandle {
    /// Queue a transition.
    pub fn request<F>(&self, factory: F)
    where
        F: FnOnce(&mut StateContext<'_>) -> Result<Box<dyn GameState>, StateError> + 'static,
    {
        self.pending.borrow_mut().push_back(Box::new(factory));
    }

    /// Number of queued requests.
    pub fn pending(&self) -> usize {
        self.pending.borrow().len()
    }

    fn pop(&self) -> Option<StateFactory> {
        self.pending.borrow_mut().pop_front()
    }

    fn clear(&self) -> usize {
        let mut pending = self.pending.borrow_mut();
        let dropped = pending.len();
        pending.clear();
        dropped
    }
}

impl fmt::Debug for StateHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateHandle")
            .field("pending", &self.pending())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// StateMachine
// ---------------------------------------------------------------------------

/// Holds the active [`GameState`], if any.
pub struct StateMachine {
    active: Option<Box<dyn GameState>>,
    handle: StateHandle,
    transitions: u64,
    max_chained: usize,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// An empty machine with [`DEFAULT_MAX_CHAINED_TRANSITIONS`] as its chain bound.
    pub fn new() -> Self {
        Self {
            active: None,
            handle: StateHandle::default(),
            transitions: 0,
            max_chained: DEFAULT_MAX_CHAINED_TRANSITIONS,
        }
    }

    /// Change the bound on transitions applied in one drain. Minimum 1.
    pub fn with_max_chained(mut self, limit: usize) -> Self {
        self.max_chained = limit.max(1);
        self
    }

    /// Switch to the state built by `factory`, then apply anything the
    /// hooks queued.
    ///
    /// On error the previously active state (if any) is still active.
    pub fn transition_to<F>(
        &mut self,
        services: &mut ServiceRegistry,
        factory: F,
    ) -> Result<(), StateError>
    where
        F: FnOnce(&mut StateContext<'_>) -> Result<Box<dyn GameState>, StateError> + 'static,
    {
        self.apply(services, Box::new(factory))?;
        self.drain(services)
    }

    /// Forward a variable-rate tick to the active state.
    pub fn on_tick(&mut self, services: &mut ServiceRegistry, dt: f64) -> Result<(), StateError> {
        if let Some(state) = self.active.as_mut() {
            let mut ctx = StateContext {
                services: &mut *services,
                handle: &self.handle,
            };
            state.on_tick(&mut ctx, dt);
        }
        self.drain(services)
    }

    /// Forward a fixed-rate tick to the active state.
    pub fn on_fixed_tick(
        &mut self,
        services: &mut ServiceRegistry,
        dt: f64,
    ) -> Result<(), StateError> {
        if let Some(state) = self.active.as_mut() {
            let mut ctx = StateContext {
                services: &mut *services,
                handle: &self.handle,
            };
            state.on_fixed_tick(&mut ctx, dt);
        }
        self.drain(services)
    }

    /// Forward an input event to the active state.
    pub fn on_input(
        &mut self,
        services: &mut ServiceRegistry,
        event: &InputEvent,
    ) -> Result<(), StateError> {
        if let Some(state) = self.active.as_mut() {
            let mut ctx = StateContext {
                services: &mut *services,
                handle: &self.handle,
            };
            state.on_input(&mut ctx, event);
        }
        self.drain(services)
    }

    /// Exit the active state without entering another.
    pub fn shutdown(&mut self, services: &mut ServiceRegistry) {
        self.handle.clear();
        if let Some(mut old) = self.active.take() {
            let mut ctx = StateContext {
                services,
                handle: &self.handle,
            };
            old.exit(&mut ctx);
            info!(from = %old.name(), "state machine shut down");
        }
        self.handle.clear();
    }

    /// A handle for queueing transitions from outside the hooks.
    pub fn handle(&self) -> StateHandle {
        self.handle.clone()
    }

    /// Name of the active state, if any.
    pub fn active_name(&self) -> Option<&str> {
        self.active.as_deref().map(|s| s.name())
    }

    /// `true` once a first transition has succeeded.
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Completed transitions since creation.
    pub fn transition_count(&self) -> u64 {
        self.transitions
    }

    fn apply(&mut self, services: &mut ServiceRegistry, factory: StateFactory) -> Result<(), StateError> {
        let mut ctx = StateContext {
            services,
            handle: &self.handle,
        };

        let mut next = match factory(&mut ctx) {
            Ok(state) => state,
            Err(err) => {
                error!(
                    current = self.active.as_deref().map(|s| s.name()).unwrap_or("<none>"),
                    error = %err,
                    "state transition rejected"
                );
                return Err(err);
            }
        };

        let from = match self.active.take() {
            Some(mut old) => {
                old.exit(&mut ctx);
                Some(old.name().to_owned())
            }
            None => None,
        };
        next.enter(&mut ctx);
        info!(
            from = from.as_deref().unwrap_or("<none>"),
            to = %next.name(),
            "state transition"
        );
        self.active = Some(next);
        self.transitions += 1;
        Ok(())
    }

    /// Apply queued transitions in order. A failing request is logged and
    /// skipped; the first failure is returned after the queue is empty.
    fn drain(&mut self, services: &mut ServiceRegistry) -> Result<(), StateError> {
        let mut applied = 0usize;
        let mut first_err = None;
        while let Some(factory) = self.handle.pop() {
            if applied >= self.max_chained {
                let dropped = self.handle.clear() + 1;
                error!(limit = self.max_chained, dropped, "runaway transition chain");
                return Err(StateError::Runaway {
                    limit: self.max_chained,
                });
            }
            applied += 1;
            if let Err(err) = self.apply(services, factory) {
                first_err.get_or_insert(err);
            }
        }
        if applied > 0 {
            debug!(applied, "queued transitions applied");
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachine")
            .field("active", &self.active_name())
            .field("transitions", &self.transitions)
            .field("pending", &self.handle.pending())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::Direction;

    type Log = Rc<RefCell<Vec<String>>>;

    struct Probe {
        name: &'static str,
        log: Log,
    }

    impl GameState for Probe {
        fn name(&self) -> &str {
            self.name
        }
        fn enter(&mut self, _ctx: &mut StateContext<'_>) {
            self.log.borrow_mut().push(format!("enter {}", self.name));
        }
        fn exit(&mut self, _ctx: &mut StateContext<'_>) {
            self.log.borrow_mut().push(format!("exit {}", self.name));
        }
        fn on_tick(&mut self, _ctx: &mut StateContext<'_>, dt: f64) {
            self.log.borrow_mut().push(format!("tick {} {dt}", self.name));
        }
        fn on_fixed_tick(&mut self, _ctx: &mut StateContext<'_>, _dt: f64) {
            self.log.borrow_mut().push(format!("fixed {}", self.name));
        }
        fn on_input(&mut self, _ctx: &mut StateContext<'_>, event: &InputEvent) {
            self.log.borrow_mut().push(format!("input {} {event:?}", self.name));
        }
    }

    fn probe(name: &'static str, log: &Log) -> impl FnOnce(&mut StateContext<'_>) -> Result<Box<dyn GameState>, StateError> + 'static {
        let log = log.clone();
        move |_| Ok(Box::new(Probe { name, log }) as Box<dyn GameState>)
    }

    #[test]
    fn callbacks_before_first_transition_are_noops() {
        let mut services = ServiceRegistry::new();
        let mut machine = StateMachine::new();
        machine.on_tick(&mut services, 0.1).unwrap();
        machine.on_fixed_tick(&mut services, 0.1).unwrap();
        machine
            .on_input(&mut services, &InputEvent::Direction(Direction::ZERO))
            .unwrap();
        assert!(!machine.is_active());
        assert_eq!(machine.transition_count(), 0);
    }

    #[test]
    fn exit_runs_before_enter() {
        let log: Log = Rc::default();
        let mut services = ServiceRegistry::new();
        let mut machine = StateMachine::new();
        machine.transition_to(&mut services, probe("s1", &log)).unwrap();
        machine.transition_to(&mut services, probe("s2", &log)).unwrap();

        assert_eq!(*log.borrow(), vec!["enter s1", "exit s1", "enter s2"]);
        assert_eq!(machine.active_name(), Some("s2"));
        assert_eq!(machine.transition_count(), 2);
    }

    #[test]
    fn delegation_reaches_only_the_active_state() {
        let log: Log = Rc::default();
        let mut services = ServiceRegistry::new();
        let mut machine = StateMachine::new();
        machine.transition_to(&mut services, probe("s1", &log)).unwrap();
        machine.transition_to(&mut services, probe("s2", &log)).unwrap();
        log.borrow_mut().clear();

        machine.on_tick(&mut services, 0.5).unwrap();
        machine.on_fixed_tick(&mut services, 0.25).unwrap();
        machine
            .on_input(&mut services, &InputEvent::action("jump", true))
            .unwrap();
        let log = log.borrow();
        assert_eq!(log.len(), 3);
        assert!(log.iter().all(|line| line.contains("s2")));
    }

    #[test]
    fn failed_factory_keeps_previous_state() {
        let log: Log = Rc::default();
        let mut services = ServiceRegistry::new();
        let mut machine = StateMachine::new();
        machine.transition_to(&mut services, probe("s1", &log)).unwrap();

        let err = machine
            .transition_to(&mut services, |_| Err(StateError::unconstructible("no level")))
            .unwrap_err();
        assert!(matches!(err, StateError::Unconstructible { .. }));
        assert_eq!(machine.active_name(), Some("s1"));
        assert_eq!(*log.borrow(), vec!["enter s1"], "old state saw no hooks");
    }

    #[test]
    fn factory_service_lookup_failure_is_a_state_error() {
        let mut services = ServiceRegistry::new();
        let mut machine = StateMachine::new();
        let err = machine
            .transition_to(&mut services, |ctx| {
                let level = ctx.services().get::<String>("level")?;
                Ok(Box::new(Probe {
                    name: "never",
                    log: Rc::new(RefCell::new(vec![level.to_string()])),
                }) as Box<dyn GameState>)
            })
            .unwrap_err();
        assert!(matches!(err, StateError::Service(_)));
        assert!(!machine.is_active());
    }

    struct Requester {
        log: Log,
    }

    impl GameState for Requester {
        fn name(&self) -> &str {
            "requester"
        }
        fn enter(&mut self, ctx: &mut StateContext<'_>) {
            self.log.borrow_mut().push("enter requester".into());
            ctx.handle().request(probe("next", &self.log));
            self.log.borrow_mut().push("enter requester done".into());
        }
        fn exit(&mut self, _ctx: &mut StateContext<'_>) {
            self.log.borrow_mut().push("exit requester".into());
        }
    }

    #[test]
    fn transition_requested_in_enter_is_queued() {
        let log: Log = Rc::default();
        let mut services = ServiceRegistry::new();
        let mut machine = StateMachine::new();
        let inner = log.clone();
        machine
            .transition_to(&mut services, move |_| {
                Ok(Box::new(Requester { log: inner }) as Box<dyn GameState>)
            })
            .unwrap();

        assert_eq!(
            *log.borrow(),
            vec![
                "enter requester",
                "enter requester done",
                "exit requester",
                "enter next"
            ]
        );
        assert_eq!(machine.active_name(), Some("next"));
    }

    struct Bouncer;

    impl GameState for Bouncer {
        fn name(&self) -> &str {
            "bouncer"
        }
        fn enter(&mut self, ctx: &mut StateContext<'_>) {
            ctx.handle()
                .request(|_| Ok(Box::new(Bouncer) as Box<dyn GameState>));
        }
    }

    #[test]
    fn runaway_chains_are_cut_off() {
        let mut services = ServiceRegistry::new();
        let mut machine = StateMachine::new().with_max_chained(4);
        let err = machine
            .transition_to(&mut services, |_| Ok(Box::new(Bouncer) as Box<dyn GameState>))
            .unwrap_err();
        assert_eq!(err, StateError::Runaway { limit: 4 });
        assert_eq!(machine.active_name(), Some("bouncer"));
        assert_eq!(machine.handle().pending(), 0);
        assert_eq!(machine.transition_count(), 5);
    }

    #[test]
    fn states_can_own_services() {
        struct WithService;
        impl GameState for WithService {
            fn name(&self) -> &str {
                "with_service"
            }
            fn enter(&mut self, ctx: &mut StateContext<'_>) {
                ctx.services_mut().register("score", Rc::new(0u32));
            }
            fn exit(&mut self, ctx: &mut StateContext<'_>) {
                ctx.services_mut().unregister("score");
            }
        }

        let log: Log = Rc::default();
        let mut services = ServiceRegistry::new();
        let mut machine = StateMachine::new();
        machine
            .transition_to(&mut services, |_| Ok(Box::new(WithService) as Box<dyn GameState>))
            .unwrap();
        assert!(services.contains("score"));
        machine.transition_to(&mut services, probe("after", &log)).unwrap();
        assert!(!services.contains("score"));

        machine.shutdown(&mut services);
        assert!(!machine.is_active());
        assert_eq!(*log.borrow(), vec!["enter after", "exit after"]);
    }
}
