//! Deferred tree mutations.
//!
//! Event handlers run while the tree is mid-pass and cannot borrow it. They
//! queue a [`TreeCommand`] through a cloned [`Commands`] handle instead; the
//! tree drains the queue in FIFO order after each pass (ready, tick, fixed
//! tick) via [`CompositionTree::apply_commands`](crate::tree::CompositionTree::apply_commands).
//!
//! ```
//! use tessera_core::prelude::*;
//!
//! struct Sprite;
//! impl Component for Sprite {}
//!
//! let services = ServiceRegistry::new();
//! let mut tree = CompositionTree::new();
//! let hero = tree.spawn("hero", "player").unwrap();
//! let sprite = tree.attach_new(hero, Box::new(Sprite)).unwrap();
//! tree.ready(&services, hero).unwrap();
//!
//! let commands = tree.commands();
//! commands.disable(sprite);
//! assert_eq!(tree.apply_commands(&services), 1);
//! assert_eq!(tree.component_phase(sprite), Some(ComponentPhase::Disabled));
//! ```

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use crate::component::ComponentId;
use crate::entity::EntityId;

/// A queued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeCommand {
    /// Stop per-tick callbacks for a component.
    Disable(ComponentId),
    /// Resume per-tick callbacks for a component.
    Enable(ComponentId),
    /// Tear an entity down along with its components.
    Destroy(EntityId),
}

/// Shared FIFO of [`TreeCommand`]s. Cloning shares the queue.
#[derive(Clone, Default)]
pub struct Commands {
    queue: Rc<RefCell<VecDeque<TreeCommand>>>,
}

impl Commands {
    /// Queue `command` at the back.
    pub fn push(&self, command: TreeCommand) {
        self.queue.borrow_mut().push_back(command);
    }

    /// Queue [`TreeCommand::Disable`].
    pub fn disable(&self, component: ComponentId) {
        self.push(TreeCommand::Disable(component));
    }

    /// Queue [`TreeCommand::Enable`].
    pub fn enable(&self, component: ComponentId) {
        self.push(TreeCommand::Enable(component));
    }

    /// Queue [`TreeCommand::Destroy`].
    pub fn destroy(&self, entity: EntityId) {
        self.push(TreeCommand::Destroy(entity));
    }

    /// Commands waiting to be applied.
    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    /// `true` when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }

    pub(crate) fn pop(&self) -> Option<TreeCommand> {
        self.queue.borrow_mut().pop_front()
    }
}

impl fmt::Debug for Commands {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Commands")
            .field("pending", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_one_fifo() {
        let a = Commands::default();
        let b = a.clone();
        a.disable(ComponentId::new(1, 0));
        b.enable(ComponentId::new(2, 0));
        assert_eq!(a.len(), 2);
        assert_eq!(b.pop(), Some(TreeCommand::Disable(ComponentId::new(1, 0))));
        assert_eq!(a.pop(), Some(TreeCommand::Enable(ComponentId::new(2, 0))));
        assert!(a.is_empty());
    }
}
