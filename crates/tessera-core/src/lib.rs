//! Tessera Core -- entities composed from components, owner-scoped events,
//! and indirect service lookup.
//!
//! A [`CompositionTree`](tree::CompositionTree) owns entities and the
//! [`Component`](component::Component)s attached to them. Components reach a
//! fully-linked state through a two-phase protocol (local-ready, then
//! entity-ready) before any of them may look up a sibling. They talk to each
//! other through [`EventChannel`](event::EventChannel)s and find long-lived
//! collaborators through the [`ServiceRegistry`](service::ServiceRegistry).
//!
//! # Quick Start
//!
//! ```
//! use tessera_core::prelude::*;
//!
//! struct Health(Gauge);
//! impl Component for Health {}
//!
//! struct Brain { health: Option<ComponentId> }
//! impl Component for Brain {
//!     fn on_entity_ready(&mut self, ctx: &mut EntityContext<'_>) {
//!         match ctx.find_sibling::<Health>() {
//!             Ok(id) => self.health = Some(id),
//!             Err(_) => ctx.disable(),
//!         }
//!     }
//! }
//!
//! let services = ServiceRegistry::new();
//! let mut tree = CompositionTree::new();
//! let hero = tree.spawn("hero", "player").unwrap();
//! tree.attach_new(hero, Box::new(Health(Gauge::full(10.0)))).unwrap();
//! let brain = tree.attach_new(hero, Box::new(Brain { health: None })).unwrap();
//! tree.ready(&services, hero).unwrap();
//!
//! assert!(tree.get::<Brain>(brain).unwrap().health.is_some());
//! ```

#![deny(unsafe_code)]

pub mod command;
pub mod component;
pub mod entity;
pub mod event;
pub mod gauge;
pub mod service;
pub mod tree;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by composition operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// A component's owner link is wrong: already bound, or bound to an
    /// entity kind the component does not accept.
    #[error("invalid owner for component {component}: {detail}")]
    InvalidOwner {
        component: component::ComponentId,
        detail: String,
    },

    /// A requested sibling capability is not present on the entity.
    #[error("entity '{entity}' has no {capability} component")]
    MissingSibling {
        entity: String,
        capability: &'static str,
    },

    /// The entity handle is stale (destroyed, or never allocated here).
    #[error("entity {entity:?} does not exist (stale or never allocated)")]
    StaleEntity { entity: entity::EntityId },

    /// The component handle is stale.
    #[error("component {component:?} does not exist")]
    StaleComponent { component: component::ComponentId },

    /// Entity names are unique within one tree.
    #[error("an entity named '{name}' already exists")]
    DuplicateEntityName { name: String },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::command::{Commands, TreeCommand};
    pub use crate::component::{Component, ComponentId, ComponentPhase, OwnerLink};
    pub use crate::entity::{EntityId, EntityPhase};
    pub use crate::event::{ChannelHandle, EventChannel, SubscriptionToken};
    pub use crate::gauge::{Depleted, Gauge, GaugeChanged};
    pub use crate::service::{ServiceError, ServiceKey, ServiceRegistry};
    pub use crate::tree::{CompositionTree, EntityContext, LocalContext};
    pub use crate::CoreError;
}
