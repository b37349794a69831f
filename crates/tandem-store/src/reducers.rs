//! Base reducers every worker registers.
//!
//! These turn pipeline bookkeeping into state the foreground can render:
//! request progress, connection health, and undo/redo availability.

use serde_json::{Map, Value, json};
use tandem_types::{Action, RequestPhase, types};

use crate::reducer::ReducerRegistry;

pub const REQUESTS: &str = "requests";
pub const CONNECTION: &str = "connection";
pub const UNDO_HISTORY: &str = "undoActionHistory";

/// Register all base reducers.
pub fn register_base(registry: &mut ReducerRegistry) {
    registry
        .register_base(REQUESTS, requests)
        .register_base(CONNECTION, connection)
        .register_base(UNDO_HISTORY, undo_history);
}

fn object(state: Value) -> Map<String, Value> {
    match state {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// `{ "<service>_<name>": { loading, error, result } }`
pub fn requests(state: Value, action: &Action) -> Value {
    let mut requests = object(state);
    let Some((key, phase)) = RequestPhase::parse(action.kind()) else {
        return Value::Object(requests);
    };

    let previous = requests.get(key).cloned().unwrap_or(Value::Null);
    let entry = match phase {
        RequestPhase::Loading => json!({
            "loading": true,
            "error": null,
            "result": previous.get("result").cloned().unwrap_or(Value::Null),
        }),
        RequestPhase::Success => json!({
            "loading": false,
            "error": null,
            "result": action.payload_field("result").cloned().unwrap_or(Value::Null),
        }),
        RequestPhase::Failure => json!({
            "loading": false,
            "error": action.payload_field("error").cloned().unwrap_or(Value::Null),
            "result": previous.get("result").cloned().unwrap_or(Value::Null),
        }),
    };
    requests.insert(key.to_string(), entry);
    Value::Object(requests)
}

/// `{ status, transport, lastError }` from the bridge's socket events.
pub fn connection(state: Value, action: &Action) -> Value {
    let mut connection = object(state);
    if connection.is_empty() {
        connection.insert("status".into(), json!("disconnected"));
        connection.insert("transport".into(), Value::Null);
        connection.insert("lastError".into(), Value::Null);
    }

    let transport = action.payload_field("transport").cloned();
    match action.kind() {
        types::SOCKET_OPEN => {
            connection.insert("status".into(), json!("open"));
            connection.insert("transport".into(), transport.unwrap_or(Value::Null));
            connection.insert("lastError".into(), Value::Null);
        }
        types::SOCKET_ERROR => {
            connection.insert("status".into(), json!("error"));
            connection.insert(
                "lastError".into(),
                action.payload_field("error").cloned().unwrap_or(Value::Null),
            );
        }
        types::SOCKET_CLOSE => {
            let reconnecting = action
                .payload_field("reconnecting")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let status = if reconnecting { "reconnecting" } else { "closed" };
            connection.insert("status".into(), json!(status));
        }
        _ => {}
    }
    Value::Object(connection)
}

/// `{ "<scope>": { undos, redos } }`
pub fn undo_history(state: Value, action: &Action) -> Value {
    let mut history = object(state);
    if action.is(types::UNDO_HISTORY_CHANGED) {
        if let Some(scope) = action.payload_field("undoScope").and_then(Value::as_str) {
            let undos = action.payload_field("undos").cloned().unwrap_or(json!(0));
            let redos = action.payload_field("redos").cloned().unwrap_or(json!(0));
            history.insert(scope.to_string(), json!({ "undos": undos, "redos": redos }));
        }
    }
    Value::Object(history)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_phases() {
        let state = requests(Value::Null, &Action::new("user_me_Loading"));
        assert_eq!(state["user_me"]["loading"], json!(true));

        let state = requests(
            state,
            &Action::new("user_me_Success").with_payload(json!({ "result": { "id": "u1" } })),
        );
        assert_eq!(state["user_me"], json!({ "loading": false, "error": null, "result": { "id": "u1" } }));

        let state = requests(
            state,
            &Action::new("user_me_Failure").with_payload(json!({ "error": "down" })),
        );
        assert_eq!(state["user_me"]["error"], json!("down"));
        assert_eq!(state["user_me"]["result"], json!({ "id": "u1" }));
    }

    #[test]
    fn test_connection_status() {
        let state = connection(Value::Null, &Action::new(types::INIT));
        assert_eq!(state["status"], json!("disconnected"));

        let state = connection(
            state,
            &Action::new(types::SOCKET_OPEN).with_payload(json!({ "transport": "websocket" })),
        );
        assert_eq!(state["status"], json!("open"));
        assert_eq!(state["transport"], json!("websocket"));

        let state = connection(
            state,
            &Action::new(types::SOCKET_CLOSE).with_payload(json!({ "reconnecting": true })),
        );
        assert_eq!(state["status"], json!("reconnecting"));
    }

    #[test]
    fn test_undo_history_counts() {
        let state = undo_history(
            Value::Null,
            &Action::new(types::UNDO_HISTORY_CHANGED)
                .with_payload(json!({ "undoScope": "graph", "undos": 0, "redos": 1 })),
        );
        assert_eq!(state, json!({ "graph": { "undos": 0, "redos": 1 } }));
    }
}
