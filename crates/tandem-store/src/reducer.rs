//! Reducer registration and composition.
//!
//! Each top-level key of the state tree is owned by a chain of reducers: the
//! base reducer (if any) runs first, then extension reducers in registration
//! order, each receiving the previous one's output. The registry is consumed
//! by [`ReducerRegistry::build`], so nothing can register after first use.

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::{Map, Value};
use tandem_types::{Action, types};
use tracing::warn;

/// A pure function from (slice, envelope) to the next slice.
pub type Reducer = Arc<dyn Fn(Value, &Action) -> Value + Send + Sync>;

#[derive(Default)]
struct SliceChain {
    base: Option<Reducer>,
    extensions: Vec<Reducer>,
}

/// Mutable registry, filled at startup.
#[derive(Default)]
pub struct ReducerRegistry {
    slices: IndexMap<String, SliceChain>,
}

impl ReducerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the base reducer for `key`, replacing any earlier one.
    pub fn register_base<F>(&mut self, key: impl Into<String>, reducer: F) -> &mut Self
    where
        F: Fn(Value, &Action) -> Value + Send + Sync + 'static,
    {
        let key = key.into();
        let chain = self.slices.entry(key.clone()).or_default();
        if chain.base.is_some() {
            warn!("replacing base reducer for `{}`", key);
        }
        chain.base = Some(Arc::new(reducer));
        self
    }

    /// Append an extension reducer to `key`'s chain.
    pub fn register_extension<F>(&mut self, key: impl Into<String>, reducer: F) -> &mut Self
    where
        F: Fn(Value, &Action) -> Value + Send + Sync + 'static,
    {
        self.slices
            .entry(key.into())
            .or_default()
            .extensions
            .push(Arc::new(reducer));
        self
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.slices.keys().map(String::as_str)
    }

    /// Freeze the registry into a root reducer.
    pub fn build(self) -> RootReducer {
        let slices = self
            .slices
            .into_iter()
            .map(|(key, chain)| {
                let mut reducers: Vec<Reducer> = chain.base.into_iter().collect();
                reducers.extend(chain.extensions);
                (key, reducers)
            })
            .collect();
        RootReducer { slices }
    }
}

/// The composed reducer over the whole tree.
#[derive(Clone)]
pub struct RootReducer {
    slices: IndexMap<String, Vec<Reducer>>,
}

impl RootReducer {
    /// State produced by running every chain over an empty tree with the
    /// init envelope.
    pub fn initial_state(&self) -> Value {
        self.reduce(&Value::Object(Map::new()), &Action::new(types::INIT))
    }

    pub fn reduce(&self, state: &Value, action: &Action) -> Value {
        let mut next = Map::new();
        for (key, chain) in &self.slices {
            let slice = state.get(key).cloned().unwrap_or(Value::Null);
            let slice = chain.iter().fold(slice, |acc, reducer| reducer(acc, action));
            next.insert(key.clone(), slice);
        }
        Value::Object(next)
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn push_kind(tag: &'static str) -> impl Fn(Value, &Action) -> Value + Send + Sync {
        move |state, action| {
            let mut items = state.as_array().cloned().unwrap_or_default();
            items.push(json!(format!("{tag}:{}", action.kind())));
            Value::Array(items)
        }
    }

    #[test]
    fn test_base_runs_before_extensions() {
        let mut registry = ReducerRegistry::new();
        registry.register_extension("log", push_kind("ext1"));
        registry.register_base("log", push_kind("base"));
        registry.register_extension("log", push_kind("ext2"));
        let root = registry.build();

        let state = root.reduce(&json!({}), &Action::new("A"));
        assert_eq!(state, json!({ "log": ["base:A", "ext1:A", "ext2:A"] }));
    }

    #[test]
    fn test_initial_state_seeds_every_slice() {
        let mut registry = ReducerRegistry::new();
        registry
            .register_base("counter", |state, _| if state.is_null() { json!(0) } else { state })
            .register_extension("only_ext", |state, _| state);
        let root = registry.build();

        assert_eq!(root.initial_state(), json!({ "counter": 0, "only_ext": null }));
        assert_eq!(root.len(), 2);
    }

    #[test]
    fn test_unknown_keys_are_dropped() {
        let mut registry = ReducerRegistry::new();
        registry.register_base("a", |state, _| state);
        let root = registry.build();
        let state = root.reduce(&json!({ "a": 1, "stray": 2 }), &Action::new("X"));
        assert_eq!(state, json!({ "a": 1 }));
    }
}
