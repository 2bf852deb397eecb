//! Owner-scoped publish/subscribe.
//!
//! An [`EventChannel`] belongs to the component (or service) that emits on it.
//! Listeners subscribe with a closure and get a [`SubscriptionToken`] back;
//! the emitter never learns who is listening.
//!
//! # Ordering
//!
//! [`EventChannel::emit`] calls handlers synchronously, in subscription order.
//! The subscriber list is snapshotted when emission starts: a handler that
//! subscribes or unsubscribes (itself or anyone else) while an emission is in
//! flight changes only the *next* emission.
//!
//! Handlers that need to touch the channel from inside a callback hold a
//! [`ChannelHandle`], a weak reference that does not keep the channel alive.
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use tessera_core::event::EventChannel;
//!
//! let channel: EventChannel<u32> = EventChannel::named("score");
//! let total = Rc::new(Cell::new(0));
//! let sink = total.clone();
//! let token = channel.subscribe(move |points| sink.set(sink.get() + points));
//!
//! channel.emit(&5);
//! channel.unsubscribe(token);
//! channel.emit(&7);
//! assert_eq!(total.get(), 5);
//! ```

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::warn;

/// Opaque ticket returned by [`EventChannel::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionToken(u64);

type Handler<T> = Rc<RefCell<Box<dyn FnMut(&T)>>>;

struct Subscribers<T> {
    next_token: u64,
    entries: Vec<(SubscriptionToken, Handler<T>)>,
}

impl<T> Subscribers<T> {
    fn insert(&mut self, handler: Box<dyn FnMut(&T)>) -> SubscriptionToken {
        let token = SubscriptionToken(self.next_token);
        self.next_token += 1;
        self.entries.push((token, Rc::new(RefCell::new(handler))));
        token
    }

    fn remove(&mut self, token: SubscriptionToken) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(t, _)| *t != token);
        self.entries.len() != before
    }
}

// ---------------------------------------------------------------------------
// EventChannel
// ---------------------------------------------------------------------------

/// A typed, single-owner event channel.
pub struct EventChannel<T: 'static> {
    name: &'static str,
    subscribers: Rc<RefCell<Subscribers<T>>>,
}

impl<T: 'static> EventChannel<T> {
    /// Create an unnamed channel.
    pub fn new() -> Self {
        Self::named("event")
    }

    /// Create a channel whose name shows up in log fields.
    pub fn named(name: &'static str) -> Self {
        Self {
            name,
            subscribers: Rc::new(RefCell::new(Subscribers {
                next_token: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// The channel name used in log fields.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Append `handler` to the subscriber list.
    pub fn subscribe(&self, handler: impl FnMut(&T) + 'static) -> SubscriptionToken {
        self.subscribers.borrow_mut().insert(Box::new(handler))
    }

    /// Remove a subscription. Returns `false` if the token was not subscribed.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.subscribers.borrow_mut().remove(token)
    }

    /// Deliver `payload` to every handler subscribed when the call starts.
    ///
    /// Returns the number of handlers invoked. A handler that is already
    /// running further up the stack (re-entrant emit) is skipped for the
    /// nested emission.
    pub fn emit(&self, payload: &T) -> usize {
        let snapshot: Vec<(SubscriptionToken, Handler<T>)> = self
            .subscribers
            .borrow()
            .entries
            .iter()
            .map(|(token, handler)| (*token, Rc::clone(handler)))
            .collect();

        let mut delivered = 0;
        for (token, handler) in snapshot {
            match handler.try_borrow_mut() {
                Ok(mut f) => {
                    let f = &mut *f;
                    f(payload);
                    delivered += 1;
                }
                Err(_) => {
                    warn!(
                        channel = self.name,
                        token = ?token,
                        "re-entrant emit skipped a handler that is still running"
                    );
                }
            }
        }
        delivered
    }

    /// Current number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().entries.len()
    }

    /// A weak handle for subscribing from inside handlers.
    pub fn handle(&self) -> ChannelHandle<T> {
        ChannelHandle {
            name: self.name,
            subscribers: Rc::downgrade(&self.subscribers),
        }
    }
}

impl<T: 'static> Default for EventChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> fmt::Debug for EventChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventChannel")
            .field("name", &self.name)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ChannelHandle
// ---------------------------------------------------------------------------

/// Weak reference to an [`EventChannel`]'s subscriber list.
///
/// Every operation returns `None` once the owning channel has been dropped.
pub struct ChannelHandle<T: 'static> {
    name: &'static str,
    subscribers: Weak<RefCell<Subscribers<T>>>,
}

impl<T: 'static> ChannelHandle<T> {
    /// Subscribe through the handle. `None` once the channel is gone.
    pub fn subscribe(&self, handler: impl FnMut(&T) + 'static) -> Option<SubscriptionToken> {
        let subscribers = self.subscribers.upgrade()?;
        let token = subscribers.borrow_mut().insert(Box::new(handler));
        Some(token)
    }

    /// Unsubscribe through the handle. `None` once the channel is gone.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> Option<bool> {
        let subscribers = self.subscribers.upgrade()?;
        let removed = subscribers.borrow_mut().remove(token);
        Some(removed)
    }

    /// Whether the owning channel still exists.
    pub fn is_alive(&self) -> bool {
        self.subscribers.strong_count() > 0
    }
}

impl<T: 'static> Clone for ChannelHandle<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            subscribers: Weak::clone(&self.subscribers),
        }
    }
}

impl<T: 'static> fmt::Debug for ChannelHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("name", &self.name)
            .field("alive", &self.is_alive())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
