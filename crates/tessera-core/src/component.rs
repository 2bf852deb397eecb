//! The component contract.
//!
//! A [`Component`] is a unit of behaviour attached to exactly one entity for
//! its whole lifetime. The [`CompositionTree`](crate::tree::CompositionTree)
//! drives it through a two-phase initialization:
//!
//! 1. [`Component::on_local_ready`] runs when the component enters the tree.
//!    The [`LocalContext`] it receives deliberately has no sibling access.
//! 2. [`Component::on_entity_ready`] runs once every sibling has passed its
//!    local-ready hook. Only the [`EntityContext`] handed to this phase (and
//!    to ticks) can look up siblings or read the owner's identity.
//!
//! Capability lookup is typed: a component asks its owner for a sibling of a
//! concrete type and gets back a [`ComponentId`] or a
//! [`CoreError::MissingSibling`](crate::CoreError::MissingSibling).

use std::any::Any;
use std::fmt;

use crate::entity::{EntityId, Generational};
use crate::tree::{EntityContext, LocalContext};

// ---------------------------------------------------------------------------
// ComponentId
// ---------------------------------------------------------------------------

/// Generational handle to a component stored in a tree.
///
/// Same layout as [`EntityId`]: `[generation: u32 | index: u32]`. Slots of
/// destroyed components are recycled with a bumped generation, so old
/// handles read as stale.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(u64);

impl ComponentId {
    #[inline]
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self((generation as u64) << 32 | index as u64)
    }

    /// The slot index (low 32 bits).
    #[inline]
    pub fn index(self) -> u32 {
        self.0 as u32
    }

    /// The generation (high 32 bits).
    #[inline]
    pub fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl Generational for ComponentId {
    fn from_parts(index: u32, generation: u32) -> Self {
        ComponentId::new(index, generation)
    }

    fn slot_index(self) -> u32 {
        self.index()
    }

    fn slot_generation(self) -> u32 {
        self.generation()
    }
}

impl fmt::Debug for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentId({}v{})", self.index(), self.generation())
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}v{}", self.index(), self.generation())
    }
}

// ---------------------------------------------------------------------------
// ComponentPhase
// ---------------------------------------------------------------------------

/// Lifecycle phase of a live component. Destroyed components have no
/// phase; queries on their handles return `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentPhase {
    /// Owned by an entity, entity-ready not delivered yet.
    Attached,
    /// Receives per-tick callbacks.
    Ready,
    /// Alive but skipped by ticks.
    Disabled,
}

// ---------------------------------------------------------------------------
// OwnerLink
// ---------------------------------------------------------------------------

/// The back-reference from a component to its entity. Set exactly once.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OwnerLink(Option<EntityId>);

impl OwnerLink {
    /// The owning entity, if attached.
    pub fn get(&self) -> Option<EntityId> {
        self.0
    }

    /// Bind to `owner`. Returns the existing owner if the link is already set.
    pub(crate) fn bind(&mut self, owner: EntityId) -> Result<(), EntityId> {
        match self.0 {
            Some(existing) => Err(existing),
            None => {
                self.0 = Some(owner);
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Component trait
// ---------------------------------------------------------------------------

/// Object-safe downcasting support, implemented for every `'static` type.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A behaviour unit hosted by an entity.
///
/// Every hook has a no-op default, so components override only what they use.
pub trait Component: AsAny {
    /// Name used in log fields. Defaults to the Rust type name.
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// The entity kind this component is written for, if it cares.
    ///
    /// Checked at entity-ready time. On a mismatch the component is disabled
    /// and never receives `on_entity_ready`.
    fn required_owner_kind(&self) -> Option<&str> {
        None
    }

    /// First phase: the component alone has entered the tree.
    fn on_local_ready(&mut self, ctx: &mut LocalContext<'_>) {
        let _ = ctx;
    }

    /// Second phase: every sibling has passed `on_local_ready`.
    fn on_entity_ready(&mut self, ctx: &mut EntityContext<'_>) {
        let _ = ctx;
    }

    /// Variable-rate update, once per frame.
    fn on_tick(&mut self, ctx: &mut EntityContext<'_>) {
        let _ = ctx;
    }

    /// Fixed-rate update, once per simulation step.
    fn on_fixed_tick(&mut self, ctx: &mut EntityContext<'_>) {
        let _ = ctx;
    }

    /// The owner is being torn down. Runs in reverse attachment order.
    fn on_destroy(&mut self, ctx: &mut LocalContext<'_>) {
        let _ = ctx;
    }
}

pub(crate) fn downcast_ref<T: Component>(component: &dyn Component) -> Option<&T> {
    component.as_any().downcast_ref::<T>()
}

pub(crate) fn downcast_mut<T: Component>(component: &mut dyn Component) -> Option<&mut T> {
    component.as_any_mut().downcast_mut::<T>()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
