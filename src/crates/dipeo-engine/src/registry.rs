//! Typed service registry.
//!
//! Keys are strongly typed tokens: a [`ServiceKey<T>`] can only register
//! and resolve values of type `T`, so a handler asking for the filesystem
//! cannot accidentally receive the LLM client. Registration happens at
//! startup; the registry is read-only during execution.

use crate::error::{EngineError, Result};
use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

/// A typed registry token. The phantom type ties the key to its value
/// type at compile time.
pub struct ServiceKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> Box<T>>,
}

impl<T> ServiceKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for ServiceKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ServiceKey<T> {}

/// The keyed container wiring ports into handlers.
#[derive(Default)]
pub struct ServiceRegistry {
    services: HashMap<&'static str, Arc<dyn Any + Send + Sync>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a service. Later bindings replace earlier ones; do this only
    /// at startup.
    pub fn register<T: Send + Sync + 'static>(&mut self, key: ServiceKey<T>, value: T) {
        self.services.insert(key.name, Arc::new(value));
    }

    /// Resolve a bound service or fail with `MissingService`.
    pub fn resolve<T: Clone + Send + Sync + 'static>(&self, key: ServiceKey<T>) -> Result<T> {
        self.services
            .get(key.name)
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
            .ok_or(EngineError::MissingService(key.name))
    }

    pub fn contains<T>(&self, key: ServiceKey<T>) -> bool {
        self.services.contains_key(key.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COUNTER: ServiceKey<Arc<i64>> = ServiceKey::new("counter");
    const LABEL: ServiceKey<String> = ServiceKey::new("label");

    #[test]
    fn test_register_and_resolve() {
        let mut registry = ServiceRegistry::new();
        registry.register(COUNTER, Arc::new(42));
        registry.register(LABEL, "hello".to_string());

        assert_eq!(*registry.resolve(COUNTER).unwrap(), 42);
        assert_eq!(registry.resolve(LABEL).unwrap(), "hello");
    }

    #[test]
    fn test_missing_service_is_typed_error() {
        let registry = ServiceRegistry::new();
        match registry.resolve(COUNTER).unwrap_err() {
            EngineError::MissingService(name) => assert_eq!(name, "counter"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_contains() {
        let mut registry = ServiceRegistry::new();
        assert!(!registry.contains(LABEL));
        registry.register(LABEL, "x".to_string());
        assert!(registry.contains(LABEL));
    }
}
