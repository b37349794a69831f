//! Scoped undo/redo.
//!
//! Any envelope whose payload carries both `undo` and `redo` is recorded on
//! its scope's undo stack (scope from `payload.undoScope`, default
//! `"global"`). `UNDO` / `REDO` move the top entry between the two stacks
//! and dispatch the inverse built by the factory registered for the entry's
//! type. Stacks live only in this middleware; the UI sees their lengths
//! through `UNDO_HISTORY_CHANGED`.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Value, json};
use tandem_types::{Action, types};
use tracing::debug;

use crate::error::StoreError;
use crate::store::{Flow, Middleware, MiddlewareApi};

pub const DEFAULT_SCOPE: &str = "global";

/// Set on inverse envelopes so replaying them never records a new entry.
pub const META_UNDO_REPLAY: &str = "undoReplay";

#[derive(Debug, Clone, PartialEq)]
pub struct UndoEntry {
    pub kind: String,
    pub undo: Value,
    pub redo: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UndoScope {
    pub undos: Vec<UndoEntry>,
    pub redos: Vec<UndoEntry>,
}

/// Per-scope stacks.
#[derive(Debug, Default)]
pub struct UndoHistory {
    scopes: HashMap<String, UndoScope>,
}

impl UndoHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an entry; clears the scope's redo stack.
    pub fn push(&mut self, scope: &str, entry: UndoEntry) {
        let stacks = self.scopes.entry(scope.to_string()).or_default();
        stacks.undos.push(entry);
        stacks.redos.clear();
    }

    /// Move the top undo entry to the redo stack and return it.
    pub fn undo(&mut self, scope: &str) -> Option<UndoEntry> {
        let stacks = self.scopes.get_mut(scope)?;
        let entry = stacks.undos.pop()?;
        stacks.redos.push(entry.clone());
        Some(entry)
    }

    /// Move the top redo entry back to the undo stack and return it.
    pub fn redo(&mut self, scope: &str) -> Option<UndoEntry> {
        let stacks = self.scopes.get_mut(scope)?;
        let entry = stacks.redos.pop()?;
        stacks.undos.push(entry.clone());
        Some(entry)
    }

    /// Drop both stacks of `scope`. Returns whether anything was there.
    pub fn clear(&mut self, scope: &str) -> bool {
        self.scopes.remove(scope).is_some()
    }

    pub fn scope(&self, scope: &str) -> Option<&UndoScope> {
        self.scopes.get(scope)
    }

    /// `(undos, redos)` lengths for `scope`.
    pub fn depth(&self, scope: &str) -> (usize, usize) {
        self.scopes
            .get(scope)
            .map(|s| (s.undos.len(), s.redos.len()))
            .unwrap_or((0, 0))
    }
}

pub type InverseFn = Arc<dyn Fn(Value) -> Action + Send + Sync>;

#[derive(Clone)]
struct InverseFactory {
    undo: InverseFn,
    redo: InverseFn,
}

/// Inverse factories keyed by the envelope type that recorded the entry.
#[derive(Clone, Default)]
pub struct UndoRegistry {
    factories: HashMap<String, InverseFactory>,
}

impl UndoRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<U, R>(&mut self, kind: impl Into<String>, undo: U, redo: R) -> &mut Self
    where
        U: Fn(Value) -> Action + Send + Sync + 'static,
        R: Fn(Value) -> Action + Send + Sync + 'static,
    {
        self.factories.insert(
            kind.into(),
            InverseFactory {
                undo: Arc::new(undo),
                redo: Arc::new(redo),
            },
        );
        self
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }
}

#[derive(Clone, Copy, Debug)]
enum Direction {
    Undo,
    Redo,
}

pub struct UndoMiddleware {
    registry: UndoRegistry,
    history: UndoHistory,
}

impl UndoMiddleware {
    pub fn new(registry: UndoRegistry) -> Self {
        Self {
            registry,
            history: UndoHistory::new(),
        }
    }

    pub fn history(&self) -> &UndoHistory {
        &self.history
    }

    fn replay(&self, entry: &UndoEntry, direction: Direction, api: &mut MiddlewareApi<'_>) {
        let Some(factory) = self.registry.factories.get(&entry.kind) else {
            debug!("no inverse registered for `{}`, {:?} skipped", entry.kind, direction);
            return;
        };
        let inverse = match direction {
            Direction::Undo => (factory.undo)(entry.undo.clone()),
            Direction::Redo => (factory.redo)(entry.redo.clone()),
        };
        api.dispatch(inverse.with_meta(META_UNDO_REPLAY, Value::Bool(true)));
    }

    fn announce(&self, scope: &str, api: &mut MiddlewareApi<'_>) {
        let (undos, redos) = self.history.depth(scope);
        api.dispatch(Action::new(types::UNDO_HISTORY_CHANGED).with_payload(json!({
            "undoScope": scope,
            "undos": undos,
            "redos": redos,
        })));
    }
}

/// `payload.undoScope` as a string key; numbers are accepted too.
pub fn scope_of(action: &Action) -> String {
    match action.payload_field("undoScope") {
        Some(Value::String(scope)) => scope.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => DEFAULT_SCOPE.to_string(),
    }
}

fn is_replay(action: &Action) -> bool {
    action.meta().get(META_UNDO_REPLAY) == Some(&Value::Bool(true))
}

impl Middleware for UndoMiddleware {
    fn name(&self) -> &'static str {
        "undo"
    }

    fn handle(&mut self, action: Action, api: &mut MiddlewareApi<'_>) -> Result<Flow, StoreError> {
        let scope = scope_of(&action);

        match action.kind() {
            types::UNDO | types::REDO => {
                let direction = if action.is(types::UNDO) { Direction::Undo } else { Direction::Redo };
                let moved = match direction {
                    Direction::Undo => self.history.undo(&scope),
                    Direction::Redo => self.history.redo(&scope),
                };
                match moved {
                    Some(entry) => {
                        self.replay(&entry, direction, api);
                        self.announce(&scope, api);
                    }
                    None => debug!("{:?} on empty scope `{}`", direction, scope),
                }
            }
            types::CLEAR_UNDO_STACK => {
                if self.history.clear(&scope) {
                    self.announce(&scope, api);
                }
            }
            _ if !is_replay(&action) => {
                if let (Some(undo), Some(redo)) =
                    (action.payload_field("undo"), action.payload_field("redo"))
                {
                    let entry = UndoEntry {
                        kind: action.kind().to_string(),
                        undo: undo.clone(),
                        redo: redo.clone(),
                    };
                    self.history.push(&scope, entry);
                    self.announce(&scope, api);
                }
            }
            _ => {}
        }

        Ok(Flow::Next(action))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(kind: &str, n: i64) -> UndoEntry {
        UndoEntry {
            kind: kind.into(),
            undo: json!({ "id": n }),
            redo: json!({ "id": n }),
        }
    }

    #[test]
    fn test_undo_moves_entry_to_redo() {
        let mut history = UndoHistory::new();
        history.push("graph", entry("A", 5));

        let moved = history.undo("graph").expect("entry");
        assert_eq!(moved.undo, json!({ "id": 5 }));
        let scope = history.scope("graph").expect("scope");
        assert!(scope.undos.is_empty());
        assert_eq!(scope.redos, vec![entry("A", 5)]);
    }

    #[test]
    fn test_push_after_undo_clears_redos() {
        let mut history = UndoHistory::new();
        history.push(DEFAULT_SCOPE, entry("A", 1));
        history.undo(DEFAULT_SCOPE);
        assert_eq!(history.depth(DEFAULT_SCOPE), (0, 1));

        history.push(DEFAULT_SCOPE, entry("B", 2));
        assert_eq!(history.depth(DEFAULT_SCOPE), (1, 0));
        assert!(history.redo(DEFAULT_SCOPE).is_none());
    }

    #[test]
    fn test_scopes_are_independent() {
        let mut history = UndoHistory::new();
        history.push("a", entry("A", 1));
        history.push("b", entry("B", 2));
        history.undo("a");
        assert_eq!(history.depth("a"), (0, 1));
        assert_eq!(history.depth("b"), (1, 0));
        assert!(history.clear("b"));
        assert_eq!(history.depth("b"), (0, 0));
        assert!(!history.clear("b"));
    }

    #[test]
    fn test_empty_scope_is_a_noop() {
        let mut history = UndoHistory::new();
        assert!(history.undo("missing").is_none());
        assert!(history.redo(DEFAULT_SCOPE).is_none());
    }

    #[test]
    fn test_scope_of_payload() {
        let numeric = Action::new("X").with_payload(json!({ "undoScope": 1 }));
        assert_eq!(scope_of(&numeric), "1");
        let named = Action::new("X").with_payload(json!({ "undoScope": "graph" }));
        assert_eq!(scope_of(&named), "graph");
        assert_eq!(scope_of(&Action::new("X")), DEFAULT_SCOPE);
    }
}
