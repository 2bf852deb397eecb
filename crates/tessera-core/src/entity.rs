//! Entity handles and allocation.
//!
//! An [`EntityId`] is a 64-bit handle that packs a *generation* counter in the
//! high 32 bits and a slot *index* in the low 32 bits. Tearing an entity down
//! bumps the generation of its slot, so handles held by event handlers or
//! services after the entity is gone are detected as stale instead of silently
//! pointing at whatever entity reuses the slot.

use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// A generational entity handle.
///
/// Layout: `[generation: u32 | index: u32]`
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(u64);

impl EntityId {
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

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({}v{})", self.index(), self.generation())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}

// ---------------------------------------------------------------------------
// EntityPhase
// ---------------------------------------------------------------------------

/// Lifecycle phase of a live entity inside a
/// [`CompositionTree`](crate::tree::CompositionTree). Destroyed entities
/// have no phase; queries on their handles return `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityPhase {
    /// Spawned; components may be attached but no entity-ready pass has run.
    Constructing,
    /// The entity-ready pass has completed; components receive ticks.
    Ready,
}

// ---------------------------------------------------------------------------
// SlotAllocator
// ---------------------------------------------------------------------------

/// A handle built from a slot index and a generation.
pub(crate) trait Generational: Copy {
    fn from_parts(index: u32, generation: u32) -> Self;
    fn slot_index(self) -> u32;
    fn slot_generation(self) -> u32;
}

impl Generational for EntityId {
    fn from_parts(index: u32, generation: u32) -> Self {
        EntityId::new(index, generation)
    }

    fn slot_index(self) -> u32 {
        self.index()
    }

    fn slot_generation(self) -> u32 {
        self.generation()
    }
}

/// Hands out generational handles and recycles released slots.
///
/// Released slots go to the back of a FIFO queue so a hot slot is not reused
/// immediately after teardown.
#[derive(Debug)]
pub(crate) struct SlotAllocator<H> {
    generations: Vec<u32>,
    alive: Vec<bool>,
    free: VecDeque<u32>,
    _handle: PhantomData<H>,
}

/// Allocator for entity handles.
pub(crate) type EntityAllocator = SlotAllocator<EntityId>;

impl<H> Default for SlotAllocator<H> {
    fn default() -> Self {
        Self {
            generations: Vec::new(),
            alive: Vec::new(),
            free: VecDeque::new(),
            _handle: PhantomData,
        }
    }
}

impl<H: Generational> SlotAllocator<H> {
    pub(crate) fn allocate(&mut self) -> H {
        if let Some(index) = self.free.pop_front() {
            self.alive[index as usize] = true;
            H::from_parts(index, self.generations[index as usize])
        } else {
            let index = self.generations.len() as u32;
            self.generations.push(0);
            self.alive.push(true);
            H::from_parts(index, 0)
        }
    }

    /// Release `id`. Returns `false` for stale or already released handles.
    pub(crate) fn release(&mut self, id: H) -> bool {
        if !self.is_alive(id) {
            return false;
        }
        let idx = id.slot_index() as usize;
        self.alive[idx] = false;
        self.generations[idx] = self.generations[idx].wrapping_add(1);
        self.free.push_back(id.slot_index());
        true
    }

    pub(crate) fn is_alive(&self, id: H) -> bool {
        let idx = id.slot_index() as usize;
        idx < self.generations.len()
            && self.alive[idx]
            && self.generations[idx] == id.slot_generation()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
