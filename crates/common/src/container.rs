//! Dependency container capability
//!
//! The harness only ever talks to a container through [`Container::has`] and
//! [`Container::get`]. Services are type-erased; [`ContainerExt::fetch`]
//! downcasts them to the concrete handle a caller expects.

use once_cell::sync::OnceCell;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::router::{ErrorHandler, Router};
use crate::types::{Request, Response};

/// A type-erased service handle
pub type Service = Arc<dyn Any + Send + Sync>;

/// A resolved container shared for the duration of a suite
pub type SharedContainer = Arc<dyn Container>;

/// Well-known service keys
pub mod keys {
    /// `Arc<dyn Router>`, required
    pub const ROUTER: &str = "router";
    /// Base `Request`, optional
    pub const REQUEST: &str = "request";
    /// Base `Response`, optional
    pub const RESPONSE: &str = "response";
    /// `Arc<dyn ErrorHandler>`, optional
    pub const ERROR_HANDLER: &str = "error_handler";
}

/// Minimal capability surface of a dependency container
pub trait Container: Send + Sync {
    fn has(&self, key: &str) -> bool;

    fn get(&self, key: &str) -> Result<Service>;
}

/// Typed lookups on top of [`Container`]
pub trait ContainerExt {
    fn fetch<T: Clone + 'static>(&self, key: &str) -> Result<T>;
}

impl<C: Container + ?Sized> ContainerExt for C {
    fn fetch<T: Clone + 'static>(&self, key: &str) -> Result<T> {
        let service = self.get(key)?;
        (*service)
            .downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| Error::ServiceType {
                key: key.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }
}

type Factory = Box<dyn Fn() -> Service + Send + Sync>;

struct Entry {
    factory: Factory,
    instance: OnceCell<Service>,
}

/// Map-backed container. Each service is built by its factory on first
/// lookup and the same instance is returned afterwards.
#[derive(Default)]
pub struct ServiceContainer {
    entries: HashMap<String, Entry>,
}

impl ServiceContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an already built service
    pub fn with_instance<T: Any + Send + Sync>(self, key: impl Into<String>, value: T) -> Self {
        let service: Service = Arc::new(value);
        self.with_service_factory(key, move || service.clone())
    }

    /// Register a service built lazily on first lookup
    pub fn with_factory<T, F>(self, key: impl Into<String>, factory: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.with_service_factory(key, move || Arc::new(factory()) as Service)
    }

    fn with_service_factory<F>(mut self, key: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Service + Send + Sync + 'static,
    {
        self.entries.insert(
            key.into(),
            Entry {
                factory: Box::new(factory),
                instance: OnceCell::new(),
            },
        );
        self
    }

    pub fn with_router(self, router: Arc<dyn Router>) -> Self {
        self.with_instance(keys::ROUTER, router)
    }

    pub fn with_request(self, request: Request) -> Self {
        self.with_instance(keys::REQUEST, request)
    }

    pub fn with_response(self, response: Response) -> Self {
        self.with_instance(keys::RESPONSE, response)
    }

    pub fn with_error_handler(self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.with_instance(keys::ERROR_HANDLER, handler)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for ServiceContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<&str> = self.keys().collect();
        keys.sort_unstable();
        f.debug_struct("ServiceContainer").field("keys", &keys).finish()
    }
}

impl Container for ServiceContainer {
    fn has(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    fn get(&self, key: &str) -> Result<Service> {
        let entry = self
            .entries
            .get(key)
            .ok_or_else(|| Error::ServiceNotFound(key.to_string()))?;
        Ok(entry.instance.get_or_init(|| (entry.factory)()).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_factory_runs_once() {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = built.clone();
        let container = ServiceContainer::new().with_factory("greeting", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            String::from("hello")
        });

        assert!(container.has("greeting"));
        let first = container.get("greeting").unwrap();
        let second = container.get("greeting").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert_eq!(container.fetch::<String>("greeting").unwrap(), "hello");
    }

    #[test]
    fn test_missing_service() {
        let container = ServiceContainer::new();
        assert!(!container.has(keys::ROUTER));
        assert!(matches!(
            container.get(keys::ROUTER),
            Err(Error::ServiceNotFound(key)) if key == keys::ROUTER
        ));
    }

    #[test]
    fn test_fetch_wrong_type() {
        let container = ServiceContainer::new().with_instance(keys::REQUEST, 42u32);
        let err = container.fetch::<Request>(keys::REQUEST).unwrap_err();
        assert!(matches!(err, Error::ServiceType { .. }));
    }

    #[test]
    fn test_fetch_request_and_response() {
        let request = Request::get("/").unwrap().with_cookie("sid", "1");
        let response = Response::new().with_body("base");
        let container = ServiceContainer::new()
            .with_request(request.clone())
            .with_response(response.clone());

        assert_eq!(container.fetch::<Request>(keys::REQUEST).unwrap(), request);
        assert_eq!(container.fetch::<Response>(keys::RESPONSE).unwrap(), response);
    }
}
