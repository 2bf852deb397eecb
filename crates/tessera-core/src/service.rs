//! Indirect service lookup.
//!
//! The [`ServiceRegistry`] is a keyed directory of long-lived, shared service
//! instances. Consumers ask for a service by key instead of holding a
//! hard-wired reference, and a later registration under the same key replaces
//! the earlier one (override-for-extension).
//!
//! Keys are either a stable type tag ([`ServiceKey::of`]) or an arbitrary
//! string ([`ServiceKey::named`]). [`ServiceRegistry::register_as`] binds one
//! instance under both so it can be found by either convention.
//!
//! The registry is single-threaded (`Rc`). Services that need interior
//! mutation register a `RefCell<T>`; trait objects register wrapped in a
//! sized pointer (`Box<dyn Trait>` or `Rc<dyn Trait>`) and are looked up by
//! that wrapper type.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// ServiceKey
// ---------------------------------------------------------------------------

/// Lookup key for a service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ServiceKey {
    /// Keyed by Rust type.
    Type { id: TypeId, name: &'static str },
    /// Keyed by an arbitrary identifier.
    Named(String),
}

impl ServiceKey {
    /// The key for type `T`.
    pub fn of<T: Any + ?Sized>() -> Self {
        ServiceKey::Type {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// A key by string name.
    pub fn named(name: impl Into<String>) -> Self {
        ServiceKey::Named(name.into())
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceKey::Type { name, .. } => write!(f, "type:{name}"),
            ServiceKey::Named(name) => write!(f, "{name}"),
        }
    }
}

impl From<&str> for ServiceKey {
    fn from(name: &str) -> Self {
        ServiceKey::Named(name.to_owned())
    }
}

impl From<String> for ServiceKey {
    fn from(name: String) -> Self {
        ServiceKey::Named(name)
    }
}

impl From<&ServiceKey> for ServiceKey {
    fn from(key: &ServiceKey) -> Self {
        key.clone()
    }
}

// ---------------------------------------------------------------------------
// ServiceError
// ---------------------------------------------------------------------------

/// Errors produced by registry operations. None of them are fatal on their
/// own; callers decide whether to degrade or bail.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    /// `register_optional` was handed no instance.
    #[error("service '{key}' registered without an instance")]
    NullService { key: ServiceKey },

    /// Nothing is registered under the key.
    #[error("service '{key}' not found")]
    NotFound { key: ServiceKey },

    /// Something is registered, but not of the requested type.
    #[error("service '{key}' is a {actual}, not a {expected}")]
    TypeMismatch {
        key: ServiceKey,
        expected: &'static str,
        actual: &'static str,
    },
}

// ---------------------------------------------------------------------------
// ServiceRegistry
// ---------------------------------------------------------------------------

struct ServiceEntry {
    instance: Rc<dyn Any>,
    type_name: &'static str,
}

/// Keyed directory of shared service instances. Keys are unique.
#[derive(Default)]
pub struct ServiceRegistry {
    entries: HashMap<ServiceKey, ServiceEntry>,
}

impl ServiceRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `instance` under `key`, replacing any previous entry.
    ///
    /// Returns the replaced instance. A replacement is logged at info level.
    pub fn register<T: Any>(
        &mut self,
        key: impl Into<ServiceKey>,
        instance: Rc<T>,
    ) -> Option<Rc<dyn Any>> {
        let key = key.into();
        let type_name = std::any::type_name::<T>();
        let previous = self.entries.insert(
            key.clone(),
            ServiceEntry {
                instance,
                type_name,
            },
        );
        match previous {
            Some(old) => {
                info!(
                    key = %key,
                    previous = old.type_name,
                    replacement = type_name,
                    "service key already registered, replacing"
                );
                Some(old.instance)
            }
            None => {
                debug!(key = %key, service = type_name, "service registered");
                None
            }
        }
    }

    /// Like [`register`](Self::register) for instances produced by a fallible
    /// constructor. `None` is rejected with [`ServiceError::NullService`] and
    /// leaves any existing entry untouched.
    pub fn register_optional<T: Any>(
        &mut self,
        key: impl Into<ServiceKey>,
        instance: Option<Rc<T>>,
    ) -> Result<(), ServiceError> {
        let key = key.into();
        match instance {
            Some(instance) => {
                self.register(key, instance);
                Ok(())
            }
            None => {
                warn!(key = %key, "refusing to register an absent service");
                Err(ServiceError::NullService { key })
            }
        }
    }

    /// Register `instance` under its own type key and return the shared handle.
    pub fn provide<T: Any>(&mut self, instance: T) -> Rc<T> {
        let shared = Rc::new(instance);
        self.register(ServiceKey::of::<T>(), Rc::clone(&shared));
        shared
    }

    /// Register one instance under both its type key and `name`.
    pub fn register_as<T: Any>(&mut self, name: &str, instance: Rc<T>) {
        self.register(ServiceKey::of::<T>(), Rc::clone(&instance));
        self.register(ServiceKey::named(name), instance);
    }

    /// Fetch the service under `key` as a `T`.
    pub fn get<T: Any>(&self, key: impl Into<ServiceKey>) -> Result<Rc<T>, ServiceError> {
        let key = key.into();
        let Some(entry) = self.entries.get(&key) else {
            warn!(key = %key, "service not found");
            return Err(ServiceError::NotFound { key });
        };
        Rc::clone(&entry.instance)
            .downcast::<T>()
            .map_err(|_| ServiceError::TypeMismatch {
                key,
                expected: std::any::type_name::<T>(),
                actual: entry.type_name,
            })
    }

    /// Fetch the service registered under `T`'s own type key.
    pub fn resolve<T: Any>(&self) -> Result<Rc<T>, ServiceError> {
        self.get::<T>(ServiceKey::of::<T>())
    }

    /// Remove the entry under `key`. Warns and returns `None` if absent.
    pub fn unregister(&mut self, key: impl Into<ServiceKey>) -> Option<Rc<dyn Any>> {
        let key = key.into();
        match self.entries.remove(&key) {
            Some(entry) => {
                debug!(key = %key, service = entry.type_name, "service unregistered");
                Some(entry.instance)
            }
            None => {
                warn!(key = %key, "unregister of unknown service key");
                None
            }
        }
    }

    /// Whether `key` is registered. Does not warn on a miss.
    pub fn contains(&self, key: impl Into<ServiceKey>) -> bool {
        self.entries.contains_key(&key.into())
    }

    /// Number of registered keys. [`register_as`](Self::register_as) adds two.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when no service is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every registered key, sorted by display form.
    pub fn keys(&self) -> Vec<ServiceKey> {
        let mut keys: Vec<ServiceKey> = self.entries.keys().cloned().collect();
        keys.sort_by_cached_key(|k| k.to_string());
        keys
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self.keys().iter().map(|k| k.to_string()).collect();
        f.debug_struct("ServiceRegistry")
            .field("keys", &keys)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Debug, PartialEq)]
    struct Audio(&'static str);

    trait Clock {
        fn now(&self) -> u64;
    }

    struct FixedClock(u64);
    impl Clock for FixedClock {
        fn now(&self) -> u64 {
            self.0
        }
    }

    #[test]
    fn register_get_override_unregister() {
        let mut reg = ServiceRegistry::new();
        let a = Rc::new(Audio("a"));
        let b = Rc::new(Audio("b"));

        assert!(reg.register("audio", a.clone()).is_none());
        assert!(Rc::ptr_eq(&reg.get::<Audio>("audio").unwrap(), &a));

        assert!(reg.register("audio", b.clone()).is_some());
        assert!(Rc::ptr_eq(&reg.get::<Audio>("audio").unwrap(), &b));
        assert_eq!(reg.len(), 1, "no duplicate keys");

        assert!(reg.unregister("audio").is_some());
        assert_eq!(
            reg.get::<Audio>("audio").unwrap_err(),
            ServiceError::NotFound {
                key: ServiceKey::named("audio")
            }
        );
    }

    #[test]
    fn unregister_unknown_key_returns_none() {
        let mut reg = ServiceRegistry::new();
        assert!(reg.unregister("ghost").is_none());
    }

    #[test]
    fn absent_instance_is_null_service() {
        let mut reg = ServiceRegistry::new();
        reg.register("audio", Rc::new(Audio("kept")));
        let err = reg
            .register_optional::<Audio>("audio", None)
            .unwrap_err();
        assert!(matches!(err, ServiceError::NullService { .. }));
        assert_eq!(*reg.get::<Audio>("audio").unwrap(), Audio("kept"));
    }

    #[test]
    fn type_and_name_keys_share_an_instance() {
        let mut reg = ServiceRegistry::new();
        let audio = Rc::new(Audio("mixer"));
        reg.register_as("audio", audio.clone());

        let by_type = reg.resolve::<Audio>().unwrap();
        let by_name = reg.get::<Audio>("audio").unwrap();
        assert!(Rc::ptr_eq(&by_type, &by_name));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn wrong_type_is_reported_not_panicked() {
        let mut reg = ServiceRegistry::new();
        reg.register("audio", Rc::new(Audio("x")));
        let err = reg.get::<u32>("audio").unwrap_err();
        assert!(matches!(err, ServiceError::TypeMismatch { .. }));
        assert!(err.to_string().contains("audio"));
    }

    #[test]
    fn trait_objects_and_mutable_services() {
        let mut reg = ServiceRegistry::new();
        reg.provide::<Box<dyn Clock>>(Box::new(FixedClock(42)));
        reg.provide(RefCell::new(Vec::<u32>::new()));

        assert_eq!(reg.resolve::<Box<dyn Clock>>().unwrap().now(), 42);
        reg.resolve::<RefCell<Vec<u32>>>().unwrap().borrow_mut().push(1);
        assert_eq!(*reg.resolve::<RefCell<Vec<u32>>>().unwrap().borrow(), vec![1]);
    }

    #[test]
    fn keys_are_sorted_for_stable_output() {
        let mut reg = ServiceRegistry::new();
        reg.register("zeta", Rc::new(1u8));
        reg.register("alpha", Rc::new(2u8));
        let keys: Vec<String> = reg.keys().iter().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["alpha", "zeta"]);
    }
}
