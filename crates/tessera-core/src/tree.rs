//! Entities, their components, and the two-phase readiness protocol.
//!
//! A [`CompositionTree`] owns every entity and component of one scene.
//! Entities are spawned in [`EntityPhase::Constructing`], components are
//! attached in order, and [`CompositionTree::ready`] finalizes the entity:
//!
//! 1. every component that has not yet done so gets `on_local_ready`, in
//!    attachment order;
//! 2. then every component that has not yet done so gets `on_entity_ready`,
//!    in attachment order, after its declared owner kind is validated.
//!
//! Calling `ready` again on a Ready entity brings components attached since
//! the last call through the same two steps, so late attachments also see
//! local-ready strictly before entity-ready.
//!
//! Hooks run with the component temporarily taken out of its slot, which is
//! what lets an [`EntityContext`] hand out `&mut` access to siblings.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;

use tracing::{debug, warn};

use crate::command::{Commands, TreeCommand};
use crate::component::{
    downcast_mut, downcast_ref, Component, ComponentId, ComponentPhase, OwnerLink,
};
use crate::entity::{EntityAllocator, EntityId, EntityPhase, SlotAllocator};
use crate::service::ServiceRegistry;
use crate::CoreError;

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct EntityRecord {
    name: String,
    kind: String,
    phase: EntityPhase,
    components: Vec<ComponentId>,
}

struct ComponentSlot {
    /// `None` while a hook is running on the component.
    component: Option<Box<dyn Component>>,
    type_id: TypeId,
    type_name: &'static str,
    owner: OwnerLink,
    phase: ComponentPhase,
    local_ready: bool,
    entity_ready: bool,
    /// Failed owner validation; cannot be re-enabled.
    owner_rejected: bool,
}

#[derive(Clone, Copy)]
enum Pass {
    Tick,
    FixedTick,
}

// ---------------------------------------------------------------------------
// CompositionTree
// ---------------------------------------------------------------------------

/// Owner of a set of entities and their components.
pub struct CompositionTree {
    allocator: EntityAllocator,
    /// Indexed by `EntityId::index`.
    entities: Vec<Option<EntityRecord>>,
    /// Live entities in spawn order; ticks follow this order.
    order: Vec<EntityId>,
    names: HashMap<String, EntityId>,
    component_ids: SlotAllocator<ComponentId>,
    /// Indexed by `ComponentId::index`; freed slots are recycled.
    components: Vec<Option<ComponentSlot>>,
    commands: Commands,
}

impl CompositionTree {
    /// An empty tree.
    pub fn new() -> Self {
        Self {
            allocator: EntityAllocator::default(),
            entities: Vec::new(),
            order: Vec::new(),
            names: HashMap::new(),
            component_ids: SlotAllocator::default(),
            components: Vec::new(),
            commands: Commands::default(),
        }
    }

    // -- construction -------------------------------------------------------

    /// Spawn an entity named `name` (unique within the tree) of kind `kind`.
    pub fn spawn(&mut self, name: &str, kind: &str) -> Result<EntityId, CoreError> {
        if self.names.contains_key(name) {
            return Err(CoreError::DuplicateEntityName {
                name: name.to_owned(),
            });
        }
        let id = self.allocator.allocate();
        let idx = id.index() as usize;
        if idx >= self.entities.len() {
            self.entities.resize_with(idx + 1, || None);
        }
        self.entities[idx] = Some(EntityRecord {
            name: name.to_owned(),
            kind: kind.to_owned(),
            phase: EntityPhase::Constructing,
            components: Vec::new(),
        });
        self.order.push(id);
        self.names.insert(name.to_owned(), id);
        debug!(entity = %name, kind = %kind, id = %id, "entity spawned");
        Ok(id)
    }

    /// Store a component without an owner. It receives no callbacks until
    /// [`attach`](Self::attach)ed.
    pub fn insert_detached(&mut self, component: Box<dyn Component>) -> ComponentId {
        let id = self.component_ids.allocate();
        let idx = id.index() as usize;
        if idx >= self.components.len() {
            self.components.resize_with(idx + 1, || None);
        }
        let type_id = component.as_ref().as_any().type_id();
        let type_name = component.type_name();
        self.components[idx] = Some(ComponentSlot {
            component: Some(component),
            type_id,
            type_name,
            owner: OwnerLink::default(),
            phase: ComponentPhase::Attached,
            local_ready: false,
            entity_ready: false,
            owner_rejected: false,
        });
        id
    }

    /// Take back a component that was never attached, freeing its slot.
    ///
    /// Attached components leave the tree only with their entity; for them
    /// this fails with [`CoreError::InvalidOwner`].
    pub fn remove_detached(&mut self, id: ComponentId) -> Result<Box<dyn Component>, CoreError> {
        let slot = self.slot(id)?;
        if let Some(owner) = slot.owner.get() {
            return Err(CoreError::InvalidOwner {
                component: id,
                detail: format!("attached to entity {owner}"),
            });
        }
        let component = self
            .free_slot(id)
            .ok_or(CoreError::StaleComponent { component: id })?;
        debug!(id = %id, "detached component removed");
        Ok(component)
    }

    /// Bind a stored component to `entity`, appending it to the entity's
    /// ordered component list.
    ///
    /// Fails with [`CoreError::InvalidOwner`] if the component already has an
    /// owner; re-parenting is not supported.
    pub fn attach(&mut self, entity: EntityId, component: ComponentId) -> Result<(), CoreError> {
        self.record(entity)?;
        let slot = self.slot_mut(component)?;
        let type_name = slot.type_name;
        if let Err(existing) = slot.owner.bind(entity) {
            warn!(
                component = type_name,
                id = %component,
                owner = %existing,
                requested = %entity,
                "component already has an owner"
            );
            return Err(CoreError::InvalidOwner {
                component,
                detail: format!("already owned by entity {existing}"),
            });
        }
        let record = self.record_mut(entity)?;
        record.components.push(component);
        debug!(entity = %record.name, component = type_name, id = %component, "component attached");
        Ok(())
    }

    /// Store and attach in one step.
    pub fn attach_new(
        &mut self,
        entity: EntityId,
        component: Box<dyn Component>,
    ) -> Result<ComponentId, CoreError> {
        self.record(entity)?;
        let id = self.insert_detached(component);
        self.attach(entity, id)?;
        Ok(id)
    }

    /// Run the two-phase readiness protocol for `entity`.
    ///
    /// Returns how many components received `on_entity_ready` in this call.
    /// Components whose declared owner kind does not match the entity are
    /// disabled instead and logged.
    pub fn ready(&mut self, services: &ServiceRegistry, entity: EntityId) -> Result<usize, CoreError> {
        let record = self.record(entity)?;
        if record.phase == EntityPhase::Constructing {
            debug!(entity = %record.name, "entity local-ready");
        }
        let attached = record.components.clone();

        for &id in &attached {
            let pending = self.slot(id).map(|s| !s.local_ready).unwrap_or(false);
            if pending {
                self.run_local(services, id, |c, ctx| c.on_local_ready(ctx));
                if let Ok(slot) = self.slot_mut(id) {
                    slot.local_ready = true;
                }
            }
        }

        let mut initialized = 0;
        for &id in &attached {
            let pending = self
                .slot(id)
                .map(|s| s.local_ready && !s.entity_ready)
                .unwrap_or(false);
            if !pending {
                continue;
            }
            if let Err(err) = self.validate_owner(entity, id) {
                let record = self.record(entity)?;
                warn!(entity = %record.name, error = %err, "component disabled at entity-ready");
                let slot = self.slot_mut(id)?;
                slot.entity_ready = true;
                slot.owner_rejected = true;
                slot.phase = ComponentPhase::Disabled;
                continue;
            }
            self.run_entity(services, entity, id, 0.0, |c, ctx| c.on_entity_ready(ctx));
            if let Ok(slot) = self.slot_mut(id) {
                slot.entity_ready = true;
                if slot.phase == ComponentPhase::Attached {
                    slot.phase = ComponentPhase::Ready;
                }
            }
            initialized += 1;
        }

        if let Ok(record) = self.record_mut(entity) {
            if record.phase == EntityPhase::Constructing {
                record.phase = EntityPhase::Ready;
                debug!(entity = %record.name, components = initialized, "entity ready");
            }
        }
        self.apply_commands(services);
        Ok(initialized)
    }

    /// Finalize every entity still in [`EntityPhase::Constructing`], in spawn
    /// order. Returns the total number of entity-ready callbacks delivered.
    pub fn ready_all(&mut self, services: &ServiceRegistry) -> usize {
        let pending: Vec<EntityId> = self
            .order
            .iter()
            .copied()
            .filter(|&e| self.entity_phase(e) == Some(EntityPhase::Constructing))
            .collect();
        pending
            .into_iter()
            .filter_map(|e| self.ready(services, e).ok())
            .sum()
    }

    fn validate_owner(&self, entity: EntityId, id: ComponentId) -> Result<(), CoreError> {
        let record = self.record(entity)?;
        let slot = self.slot(id)?;
        if slot.owner.get() != Some(entity) {
            return Err(CoreError::InvalidOwner {
                component: id,
                detail: format!("owner link does not point at entity '{}'", record.name),
            });
        }
        let required = slot
            .component
            .as_ref()
            .and_then(|c| c.required_owner_kind().map(str::to_owned));
        match required {
            Some(kind) if kind != record.kind => Err(CoreError::InvalidOwner {
                component: id,
                detail: format!(
                    "{} expects an owner of kind '{kind}', entity '{}' is '{}'",
                    slot.type_name, record.name, record.kind
                ),
            }),
            _ => Ok(()),
        }
    }

    // -- ticking ------------------------------------------------------------

    /// Variable-rate pass over Ready components of Ready entities.
    ///
    /// Returns the number of `on_tick` calls made.
    pub fn tick(&mut self, services: &ServiceRegistry, dt: f64) -> usize {
        self.run_pass(services, dt, Pass::Tick)
    }

    /// Fixed-rate pass; see [`tick`](Self::tick).
    pub fn fixed_tick(&mut self, services: &ServiceRegistry, dt: f64) -> usize {
        self.run_pass(services, dt, Pass::FixedTick)
    }

    fn run_pass(&mut self, services: &ServiceRegistry, dt: f64, pass: Pass) -> usize {
        let order = self.order.clone();
        let mut calls = 0;
        for entity in order {
            let attached = match self.record(entity) {
                Ok(record) if record.phase == EntityPhase::Ready => record.components.clone(),
                _ => continue,
            };
            for id in attached {
                let tickable = self
                    .slot(id)
                    .map(|s| s.phase == ComponentPhase::Ready && s.entity_ready)
                    .unwrap_or(false);
                if !tickable {
                    continue;
                }
                self.run_entity(services, entity, id, dt, |c, ctx| match pass {
                    Pass::Tick => c.on_tick(ctx),
                    Pass::FixedTick => c.on_fixed_tick(ctx),
                });
                calls += 1;
            }
        }
        self.apply_commands(services);
        calls
    }

    // -- state changes ------------------------------------------------------

    /// Stop per-tick callbacks for a component. Idempotent.
    pub fn disable(&mut self, id: ComponentId) -> Result<(), CoreError> {
        let slot = self.slot_mut(id)?;
        if slot.phase != ComponentPhase::Disabled {
            slot.phase = ComponentPhase::Disabled;
            debug!(component = slot.type_name, id = %id, "component disabled");
        }
        Ok(())
    }

    /// Resume per-tick callbacks. Components rejected by owner validation
    /// stay disabled.
    pub fn enable(&mut self, id: ComponentId) -> Result<(), CoreError> {
        let slot = self.slot_mut(id)?;
        if slot.owner_rejected {
            return Err(CoreError::InvalidOwner {
                component: id,
                detail: format!("{} failed owner validation", slot.type_name),
            });
        }
        if slot.phase == ComponentPhase::Disabled {
            slot.phase = if slot.entity_ready {
                ComponentPhase::Ready
            } else {
                ComponentPhase::Attached
            };
            debug!(component = slot.type_name, id = %id, "component enabled");
        }
        Ok(())
    }

    /// Tear down `entity`: components get `on_destroy` in reverse attachment
    /// order, then the entity handle goes stale.
    ///
    /// Returns the number of components destroyed.
    pub fn destroy(&mut self, services: &ServiceRegistry, entity: EntityId) -> Result<usize, CoreError> {
        self.record(entity)?;
        let record = self.entities[entity.index() as usize]
            .take()
            .ok_or(CoreError::StaleEntity { entity })?;
        self.names.remove(&record.name);
        self.order.retain(|&e| e != entity);

        for &id in record.components.iter().rev() {
            let local_ready = self.slot(id).map(|s| s.local_ready).unwrap_or(false);
            if local_ready {
                self.run_local(services, id, |c, ctx| c.on_destroy(ctx));
            }
            self.free_slot(id);
        }
        self.allocator.release(entity);
        debug!(
            entity = %record.name,
            components = record.components.len(),
            "entity destroyed"
        );
        Ok(record.components.len())
    }

    /// Destroy every entity, most recently spawned first.
    pub fn clear(&mut self, services: &ServiceRegistry) {
        let order: Vec<EntityId> = self.order.iter().rev().copied().collect();
        for entity in order {
            if let Err(err) = self.destroy(services, entity) {
                warn!(error = %err, "teardown skipped an entity");
            }
        }
        self.apply_commands(services);
    }

    /// A handle for queueing deferred mutations from event handlers.
    pub fn commands(&self) -> Commands {
        self.commands.clone()
    }

    /// Drain the command queue. Returns how many commands applied cleanly.
    pub fn apply_commands(&mut self, services: &ServiceRegistry) -> usize {
        let mut applied = 0;
        while let Some(command) = self.commands.pop() {
            let result = match command {
                TreeCommand::Disable(id) => self.disable(id),
                TreeCommand::Enable(id) => self.enable(id),
                TreeCommand::Destroy(entity) => self.destroy(services, entity).map(|_| ()),
            };
            match result {
                Ok(()) => applied += 1,
                Err(err) => warn!(command = ?command, error = %err, "deferred command failed"),
            }
        }
        applied
    }

    // -- queries ------------------------------------------------------------

    /// Number of live entities.
    pub fn entity_count(&self) -> usize {
        self.order.len()
    }

    /// Live entities in spawn order.
    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.order.iter().copied()
    }

    /// Look an entity up by its unique name.
    pub fn find_entity(&self, name: &str) -> Option<EntityId> {
        self.names.get(name).copied()
    }

    /// `None` for stale handles.
    pub fn entity_name(&self, entity: EntityId) -> Option<&str> {
        self.record(entity).ok().map(|r| r.name.as_str())
    }

    /// The kind `entity` was spawned with. `None` for stale handles.
    pub fn entity_kind(&self, entity: EntityId) -> Option<&str> {
        self.record(entity).ok().map(|r| r.kind.as_str())
    }

    /// `None` once the entity has been destroyed.
    pub fn entity_phase(&self, entity: EntityId) -> Option<EntityPhase> {
        self.record(entity).ok().map(|r| r.phase)
    }

    /// Components of `entity` in attachment order.
    pub fn components_of(&self, entity: EntityId) -> &[ComponentId] {
        self.record(entity)
            .map(|r| r.components.as_slice())
            .unwrap_or(&[])
    }

    /// `None` once the component has been destroyed.
    pub fn component_phase(&self, id: ComponentId) -> Option<ComponentPhase> {
        self.slot(id).ok().map(|s| s.phase)
    }

    /// The entity `id` is attached to; `None` while detached or once
    /// destroyed.
    pub fn owner_of(&self, id: ComponentId) -> Option<EntityId> {
        self.slot(id).ok().and_then(|s| s.owner.get())
    }

    /// Borrow a component as its concrete type. `None` for stale handles,
    /// the wrong type, or a component whose hook is running.
    pub fn get<T: Component>(&self, id: ComponentId) -> Option<&T> {
        let component = self.slot(id).ok()?.component.as_deref()?;
        downcast_ref::<T>(component)
    }

    /// Mutable counterpart of [`get`](Self::get).
    pub fn get_mut<T: Component>(&mut self, id: ComponentId) -> Option<&mut T> {
        let component = self.slot_mut(id).ok()?.component.as_deref_mut()?;
        downcast_mut::<T>(component)
    }

    /// Live components, attached or detached.
    pub fn component_count(&self) -> usize {
        self.components.iter().filter(|s| s.is_some()).count()
    }

    /// Component slots allocated so far, live or free for reuse.
    pub fn component_slots(&self) -> usize {
        self.components.len()
    }

    /// First component of type `T` on `entity`, in attachment order.
    pub fn find_component<T: Component>(&self, entity: EntityId) -> Result<ComponentId, CoreError> {
        self.find_on::<T>(entity, None)
    }

    fn find_on<T: Component>(
        &self,
        entity: EntityId,
        exclude: Option<ComponentId>,
    ) -> Result<ComponentId, CoreError> {
        let record = self.record(entity)?;
        let wanted = TypeId::of::<T>();
        record
            .components
            .iter()
            .copied()
            .filter(|&id| Some(id) != exclude)
            .find(|&id| {
                self.slot(id)
                    .map(|s| s.type_id == wanted)
                    .unwrap_or(false)
            })
            .ok_or_else(|| CoreError::MissingSibling {
                entity: record.name.clone(),
                capability: std::any::type_name::<T>(),
            })
    }

    // -- internals ----------------------------------------------------------

    fn record(&self, entity: EntityId) -> Result<&EntityRecord, CoreError> {
        if !self.allocator.is_alive(entity) {
            return Err(CoreError::StaleEntity { entity });
        }
        self.entities
            .get(entity.index() as usize)
            .and_then(Option::as_ref)
            .ok_or(CoreError::StaleEntity { entity })
    }

    fn record_mut(&mut self, entity: EntityId) -> Result<&mut EntityRecord, CoreError> {
        if !self.allocator.is_alive(entity) {
            return Err(CoreError::StaleEntity { entity });
        }
        self.entities
            .get_mut(entity.index() as usize)
            .and_then(Option::as_mut)
            .ok_or(CoreError::StaleEntity { entity })
    }

    fn slot(&self, id: ComponentId) -> Result<&ComponentSlot, CoreError> {
        if !self.component_ids.is_alive(id) {
            return Err(CoreError::StaleComponent { component: id });
        }
        self.components
            .get(id.index() as usize)
            .and_then(Option::as_ref)
            .ok_or(CoreError::StaleComponent { component: id })
    }

    fn slot_mut(&mut self, id: ComponentId) -> Result<&mut ComponentSlot, CoreError> {
        if !self.component_ids.is_alive(id) {
            return Err(CoreError::StaleComponent { component: id });
        }
        self.components
            .get_mut(id.index() as usize)
            .and_then(Option::as_mut)
            .ok_or(CoreError::StaleComponent { component: id })
    }

    /// Empty the slot of `id` and recycle it. Returns the stored component
    /// unless a hook currently holds it.
    fn free_slot(&mut self, id: ComponentId) -> Option<Box<dyn Component>> {
        if !self.component_ids.release(id) {
            return None;
        }
        self.components
            .get_mut(id.index() as usize)
            .and_then(Option::take)
            .and_then(|slot| slot.component)
    }

    fn take(&mut self, id: ComponentId) -> Option<Box<dyn Component>> {
        self.slot_mut(id).ok()?.component.take()
    }

    fn restore(&mut self, id: ComponentId, component: Box<dyn Component>) {
        if let Ok(slot) = self.slot_mut(id) {
            slot.component = Some(component);
        }
    }

    fn run_local(
        &mut self,
        services: &ServiceRegistry,
        id: ComponentId,
        hook: impl FnOnce(&mut dyn Component, &mut LocalContext<'_>),
    ) {
        let Some(mut component) = self.take(id) else {
            return;
        };
        {
            let mut ctx = LocalContext {
                tree: self,
                services,
                component: id,
            };
            hook(component.as_mut(), &mut ctx);
        }
        self.restore(id, component);
    }

    fn run_entity(
        &mut self,
        services: &ServiceRegistry,
        entity: EntityId,
        id: ComponentId,
        dt: f64,
        hook: impl FnOnce(&mut dyn Component, &mut EntityContext<'_>),
    ) {
        let Some(mut component) = self.take(id) else {
            return;
        };
        {
            let mut ctx = EntityContext {
                tree: self,
                services,
                entity,
                component: id,
                dt,
            };
            hook(component.as_mut(), &mut ctx);
        }
        self.restore(id, component);
    }
}

impl Default for CompositionTree {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CompositionTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self
            .order
            .iter()
            .filter_map(|&e| self.entity_name(e))
            .collect();
        f.debug_struct("CompositionTree")
            .field("entities", &names)
            .field("components", &self.component_count())
            .field("commands", &self.commands)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Contexts
// ---------------------------------------------------------------------------

/// Context for hooks that must not depend on siblings: local-ready and
/// destroy. Exposes neither siblings nor the owner's identity.
pub struct LocalContext<'a> {
    tree: &'a mut CompositionTree,
    services: &'a ServiceRegistry,
    component: ComponentId,
}

impl<'a> LocalContext<'a> {
    /// The component running the hook.
    pub fn component_id(&self) -> ComponentId {
        self.component
    }

    /// The registry the tree pass was started with.
    pub fn services(&self) -> &'a ServiceRegistry {
        self.services
    }

    /// Queue for deferred mutations, applied after the current pass.
    pub fn commands(&self) -> Commands {
        self.tree.commands()
    }

    /// Disable the running component.
    pub fn disable(&mut self) {
        let _ = self.tree.disable(self.component);
    }
}

/// Context for entity-ready and tick hooks. Every sibling has passed
/// local-ready, so lookups are safe here.
pub struct EntityContext<'a> {
    tree: &'a mut CompositionTree,
    services: &'a ServiceRegistry,
    entity: EntityId,
    component: ComponentId,
    dt: f64,
}

impl<'a> EntityContext<'a> {
    /// The owning entity.
    pub fn entity(&self) -> EntityId {
        self.entity
    }

    /// The owning entity's name.
    pub fn entity_name(&self) -> &str {
        self.tree.entity_name(self.entity).unwrap_or_default()
    }

    /// The owning entity's kind.
    pub fn entity_kind(&self) -> &str {
        self.tree.entity_kind(self.entity).unwrap_or_default()
    }

    /// The component running the hook.
    pub fn component_id(&self) -> ComponentId {
        self.component
    }

    /// Seconds covered by this callback; zero during entity-ready.
    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// The registry the tree pass was started with.
    pub fn services(&self) -> &'a ServiceRegistry {
        self.services
    }

    /// Queue for deferred mutations, applied after the current pass.
    pub fn commands(&self) -> Commands {
        self.tree.commands()
    }

    /// Locate a sibling of type `T` on the same entity.
    pub fn find_sibling<T: Component>(&self) -> Result<ComponentId, CoreError> {
        self.tree.find_on::<T>(self.entity, Some(self.component))
    }

    /// Borrow a sibling by id. `None` if it is not a `T` on this entity.
    pub fn sibling<T: Component>(&self, id: ComponentId) -> Option<&T> {
        if !self.is_sibling(id) {
            return None;
        }
        self.tree.get::<T>(id)
    }

    /// Mutable counterpart of [`sibling`](Self::sibling).
    pub fn sibling_mut<T: Component>(&mut self, id: ComponentId) -> Option<&mut T> {
        if !self.is_sibling(id) {
            return None;
        }
        self.tree.get_mut::<T>(id)
    }

    /// Find the first `T` sibling and run `f` on it.
    pub fn with_sibling<T: Component, R>(
        &mut self,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<R, CoreError> {
        let id = self.find_sibling::<T>()?;
        let sibling = self
            .tree
            .get_mut::<T>(id)
            .ok_or(CoreError::StaleComponent { component: id })?;
        Ok(f(sibling))
    }

    /// Disable the running component.
    pub fn disable(&mut self) {
        let _ = self.tree.disable(self.component);
    }

    /// Whether the running component has been disabled.
    pub fn is_disabled(&self) -> bool {
        self.tree.component_phase(self.component) == Some(ComponentPhase::Disabled)
    }

    fn is_sibling(&self, id: ComponentId) -> bool {
        id != self.component && self.tree.owner_of(id) == Some(self.entity)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
