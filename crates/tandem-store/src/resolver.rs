//! Lazy module resolution.
//!
//! Handler and service modules are registered as factories under a string
//! id. A module is built the first time something resolves its id and cached
//! for every later lookup. Callers only see the [`Resolver`] trait, so tests
//! and embedders can substitute their own lookup.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::ResolveError;

/// Resolve a module id to a shared module instance.
pub trait Resolver<T>: Send + Sync {
    fn resolve(&self, id: &str) -> Result<Arc<T>, ResolveError>;
}

type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;

/// Registry of lazily-built modules with a load cache.
pub struct ModuleRegistry<T> {
    kind: &'static str,
    factories: HashMap<String, Factory<T>>,
    cache: Mutex<HashMap<String, Arc<T>>>,
}

impl<T: Send + Sync> ModuleRegistry<T> {
    /// `kind` names the module family in error messages ("handler", "service").
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            factories: HashMap::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Register a factory, run on first resolution of `id`.
    pub fn register<F>(&mut self, id: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let id = id.into();
        self.cache.get_mut().remove(&id);
        self.factories.insert(id, Box::new(factory));
        self
    }

    /// Register an already-built module.
    pub fn insert(&mut self, id: impl Into<String>, module: T) -> &mut Self {
        let id = id.into();
        self.factories.remove(&id);
        self.cache.get_mut().insert(id, Arc::new(module));
        self
    }

    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id) || self.cache.lock().contains_key(id)
    }

    /// Whether `id` has been built yet.
    pub fn is_loaded(&self, id: &str) -> bool {
        self.cache.lock().contains_key(id)
    }
}

impl<T: Send + Sync> Resolver<T> for ModuleRegistry<T> {
    fn resolve(&self, id: &str) -> Result<Arc<T>, ResolveError> {
        let cached = self.cache.lock().get(id).cloned();
        if let Some(module) = cached {
            return Ok(module);
        }

        let factory = self.factories.get(id).ok_or_else(|| ResolveError::Unknown {
            kind: self.kind,
            id: id.to_string(),
        })?;
        debug!("loading {} module `{}`", self.kind, id);
        // Built unlocked: a factory may resolve other ids from this registry.
        let module = Arc::new(factory());
        let mut cache = self.cache.lock();
        Ok(cache.entry(id.to_string()).or_insert(module).clone())
    }
}
