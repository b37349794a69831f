//! A small notes domain: the host's default reducer, handlers and inverses.
//!
//! Notes live under the `notes` slice as `{ id: text }`. Adding and removing
//! are both undoable in the `notes` scope.
//!
//! | Route            | Export   | Produces                                |
//! |------------------|----------|-----------------------------------------|
//! | `notes.add`      | function | `NOTE_ADDED`                            |
//! | `notes.remove`   | task     | `NOTE_REMOVED` (reads the current text) |
//! | `notes.forget`   | value    | `CLEAR_UNDO_STACK` for the notes scope  |

use serde_json::{Map, Value, json};
use tandem_store::{AsyncTask, HandlerModule, ModuleRegistry, ReducerRegistry, UndoRegistry};
use tandem_types::Action;
use tracing::debug;

pub const SLICE: &str = "notes";
pub const SCOPE: &str = "notes";

pub const NOTE_ADDED: &str = "NOTE_ADDED";
pub const NOTE_REMOVED: &str = "NOTE_REMOVED";

/// Note ids may arrive as strings or numbers; the slice keys them as strings.
fn id_key(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn reducer(state: Value, action: &Action) -> Value {
    let mut notes = match state {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    let Some(id) = id_key(action.payload_field("id")) else {
        return Value::Object(notes);
    };

    match action.kind() {
        NOTE_ADDED => {
            let text = action.payload_field("text").cloned().unwrap_or(Value::Null);
            notes.insert(id, text);
        }
        NOTE_REMOVED => {
            notes.remove(&id);
        }
        _ => {}
    }
    Value::Object(notes)
}

pub fn register_reducers(reducers: &mut ReducerRegistry) {
    reducers.register_extension(SLICE, reducer);
}

fn added(id: Value, text: Value) -> Action {
    Action::new(NOTE_ADDED).with_payload(json!({ "id": id, "text": text }))
}

fn removed(id: Value) -> Action {
    Action::new(NOTE_REMOVED).with_payload(json!({ "id": id }))
}

fn field(value: &Value, key: &str) -> Value {
    value.get(key).cloned().unwrap_or(Value::Null)
}

pub fn undo_registry() -> UndoRegistry {
    let mut undo = UndoRegistry::new();
    undo.register(
        NOTE_ADDED,
        |v| removed(field(&v, "id")),
        |v| added(field(&v, "id"), field(&v, "text")),
    );
    undo.register(
        NOTE_REMOVED,
        |v| added(field(&v, "id"), field(&v, "text")),
        |v| removed(field(&v, "id")),
    );
    undo
}

pub fn handlers() -> ModuleRegistry<HandlerModule> {
    let mut registry = ModuleRegistry::new("handler");
    registry.register(SLICE, notes_module);
    registry
}

fn notes_module() -> HandlerModule {
    HandlerModule::new()
        .with_function("add", |payload: Value| {
            let id = field(&payload, "id");
            let text = field(&payload, "text");
            Action::new(NOTE_ADDED).with_payload(json!({
                "id": id,
                "text": text,
                "undoScope": SCOPE,
                "undo": { "id": id },
                "redo": { "id": id, "text": text },
            }))
        })
        .with_function("remove", |payload: Value| {
            AsyncTask::new(move |_dispatch, state| async move {
                let id = field(&payload, "id");
                let key = id_key(Some(&id))?;
                let Some(text) = state.get().get(SLICE).and_then(|n| n.get(&key)).cloned() else {
                    debug!("no note `{}` to remove", key);
                    return None;
                };
                Some(Action::new(NOTE_REMOVED).with_payload(json!({
                    "id": id,
                    "undoScope": SCOPE,
                    "undo": { "id": id, "text": text },
                    "redo": { "id": id },
                })))
            })
        })
        .with_value(
            "forget",
            json!({ "type": tandem_types::types::CLEAR_UNDO_STACK, "payload": { "undoScope": SCOPE } }),
        )
}
