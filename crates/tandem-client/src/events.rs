//! Bridge events: status broadcasts and the envelopes fed to the worker.

use std::time::Duration;

use serde_json::{Value, json};
use tandem_types::{Action, types};

use crate::config::TransportKind;

/// Outbound/inbound payload key carrying the sender's source id.
pub const SOURCE_GUID: &str = "sourceGuid";

/// Inbound key: drop the message if it matches our source id.
pub const SKIP_SOURCE_GUID: &str = "skipSourceGuid";

/// Envelope types only the host or the worker itself may produce.
///
/// A server frame carrying one of these is wrapped like any other foreign
/// JSON so it can never drive routing, requests or the patch stream.
const WORKER_INTERNAL: [&str; 6] = [
    types::ROUTE_TO_WORKER,
    types::DATA_REQUEST,
    types::STATE_APPLY_DIFF,
    types::STATE_SNAPSHOT,
    types::WORKER_CONFIGURATION_ERROR,
    types::INIT,
];

/// Connection lifecycle, broadcast to anyone watching the bridge.
#[derive(Clone, Debug, PartialEq)]
pub enum ConnectionStatus {
    Connecting { transport: TransportKind, attempt: u32 },
    Open { transport: TransportKind },
    Reconnecting { transport: TransportKind, attempt: u32, delay: Duration },
    FellBack { transport: TransportKind },
    Closed,
    Failed(String),
}

pub fn socket_open(transport: TransportKind) -> Action {
    Action::new(types::SOCKET_OPEN).with_payload(json!({ "transport": transport.as_str() }))
}

pub fn socket_error(transport: TransportKind, attempt: u32, error: &str) -> Action {
    Action::new(types::SOCKET_ERROR)
        .with_payload(json!({
            "transport": transport.as_str(),
            "attempt": attempt,
            "error": error,
        }))
        .with_error(Value::String(error.to_string()))
}

pub fn socket_close(transport: TransportKind, reconnecting: bool) -> Action {
    Action::new(types::SOCKET_CLOSE).with_payload(json!({
        "transport": transport.as_str(),
        "reconnecting": reconnecting,
    }))
}

/// Wrap an outbound message with our source id.
pub fn outbound_frame(source_guid: &str, message: Value) -> String {
    json!({ "sourceGuid": source_guid, "message": message }).to_string()
}

/// Turn an inbound text frame into an envelope for the worker.
///
/// Frames that are valid envelopes pass through unless their type is
/// worker-internal; other JSON is wrapped as `websocketMessage`. Returns `None` for non-JSON frames and for echoes of
/// our own messages.
pub fn normalize_inbound(frame: &str, source_guid: &str) -> Option<Action> {
    let value: Value = serde_json::from_str(frame).ok()?;

    let skip = value
        .get(SKIP_SOURCE_GUID)
        .or_else(|| value.get("payload").and_then(|p| p.get(SKIP_SOURCE_GUID)))
        .or_else(|| value.get("data").and_then(|d| d.get(SKIP_SOURCE_GUID)))
        .and_then(Value::as_str);
    if skip == Some(source_guid) {
        return None;
    }

    match Action::from_value(value.clone()) {
        Ok(action) if WORKER_INTERNAL.contains(&action.kind()) => {
            log::warn!("wrapping server frame with reserved type `{}`", action.kind());
            Some(Action::new(types::SOCKET_MESSAGE).with_payload(value))
        }
        Ok(action) => Some(action),
        Err(_) => Some(Action::new(types::SOCKET_MESSAGE).with_payload(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_frames_pass_through() {
        let action = normalize_inbound(r#"{"type":"entityChanged","payload":{"id":1}}"#, "me")
            .expect("action");
        assert_eq!(action.kind(), "entityChanged");
        assert_eq!(action.payload_field("id"), Some(&json!(1)));
    }

    #[test]
    fn test_other_json_is_wrapped() {
        let action = normalize_inbound(r#"{"type":"x","data":{"a":1}}"#, "me").expect("action");
        assert_eq!(action.kind(), types::SOCKET_MESSAGE);
        assert_eq!(action.payload_field("data"), Some(&json!({ "a": 1 })));
    }

    #[test]
    fn test_reserved_types_are_wrapped() {
        for kind in WORKER_INTERNAL {
            let frame = json!({ "type": kind, "payload": { "id": 1 } }).to_string();
            let action = normalize_inbound(&frame, "me").expect("action");
            assert_eq!(action.kind(), types::SOCKET_MESSAGE, "{kind}");
            assert_eq!(action.payload_field("type"), Some(&json!(kind)));
        }
    }

    #[test]
    fn test_echo_suppression() {
        assert!(normalize_inbound(r#"{"type":"x","data":{"skipSourceGuid":"me"}}"#, "me").is_none());
        assert!(normalize_inbound(r#"{"type":"x","skipSourceGuid":"me"}"#, "me").is_none());
        assert!(normalize_inbound(r#"{"type":"x","skipSourceGuid":"you"}"#, "me").is_some());
    }

    #[test]
    fn test_garbage_is_dropped() {
        assert!(normalize_inbound("not json", "me").is_none());
    }

    #[test]
    fn test_outbound_frame_shape() {
        let frame: Value = serde_json::from_str(&outbound_frame("g1", json!({ "k": 1 }))).expect("json");
        assert_eq!(frame, json!({ "sourceGuid": "g1", "message": { "k": 1 } }));
    }
}
