//! The action envelope: the one message shape that crosses every boundary.
//!
//! An envelope is `{ type, payload?, error?, meta? }` and nothing else. Both
//! deserialization and [`Action::from_value`] run the same validation, so a
//! foreign top-level key or an empty `type` never enters the pipeline.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reserved envelope types intercepted by the pipeline or the mirror.
pub mod types {
    /// Routed to a named handler module method.
    pub const ROUTE_TO_WORKER: &str = "ROUTE_TO_WORKER_ACTION";
    /// Expanded into Loading / Success / Failure phases.
    pub const DATA_REQUEST: &str = "DATA_REQUEST";
    pub const UNDO: &str = "UNDO";
    pub const REDO: &str = "REDO";
    /// Drops both stacks of one undo scope.
    pub const CLEAR_UNDO_STACK: &str = "CLEAR_UNDO_STACK";
    /// Stack lengths for one scope after any undo bookkeeping change.
    pub const UNDO_HISTORY_CHANGED: &str = "UNDO_HISTORY_CHANGED";
    /// Structural patch between two consecutive canonical snapshots.
    pub const STATE_APPLY_DIFF: &str = "STATE_APPLY_DIFF";
    /// Full canonical state, sent at startup and on resync.
    pub const STATE_SNAPSHOT: &str = "STATE_SNAPSHOT";
    /// The worker hit a fatal configuration error and stopped.
    pub const WORKER_CONFIGURATION_ERROR: &str = "WORKER_CONFIGURATION_ERROR";
    /// Dispatched once when a store is built so every reducer can seed its slice.
    pub const INIT: &str = "@@tandem/INIT";

    pub const SOCKET_OPEN: &str = "websocketStateOnOpen";
    pub const SOCKET_ERROR: &str = "websocketStateOnError";
    pub const SOCKET_CLOSE: &str = "websocketStateOnClose";
    /// Inbound server message that was not itself an envelope.
    pub const SOCKET_MESSAGE: &str = "websocketMessage";
}

/// `meta.originator` value stamped on everything the worker publishes.
pub const ORIGINATOR_WORKER: &str = "worker";

pub const META_ORIGINATOR: &str = "originator";
pub const META_GENERATION: &str = "generation";

const ENVELOPE_KEYS: [&str; 4] = ["type", "payload", "error", "meta"];

/// Errors from envelope validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("envelope must be a JSON object")]
    NotAnObject,
    #[error("envelope is missing a string `type`")]
    MissingType,
    #[error("envelope `type` must not be empty")]
    EmptyType,
    #[error("envelope has foreign top-level key `{0}`")]
    ForeignKey(String),
    #[error("envelope `meta` must be an object")]
    MetaNotObject,
    #[error("invalid envelope JSON: {0}")]
    Json(String),
}

/// A validated action envelope.
///
/// Fields are private: an envelope is built once at the point of intent and
/// consumed by the pipeline. The `with_*` builders take `self` by value, so
/// "changing" an envelope always produces a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value")]
pub struct Action {
    #[serde(rename = "type")]
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<Value>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    meta: Map<String, Value>,
}

impl Action {
    /// Create an envelope of the given type with no payload.
    ///
    /// The type must be non-empty; use [`Action::from_value`] when the type
    /// comes from outside the process.
    pub fn new(kind: impl Into<String>) -> Self {
        let kind = kind.into();
        debug_assert!(!kind.is_empty(), "envelope type must not be empty");
        Self {
            kind,
            payload: None,
            error: None,
            meta: Map::new(),
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_error(mut self, error: Value) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    /// Validate an arbitrary JSON value as an envelope.
    pub fn from_value(value: Value) -> Result<Self, EnvelopeError> {
        let Value::Object(mut object) = value else {
            return Err(EnvelopeError::NotAnObject);
        };

        if let Some(foreign) = object.keys().find(|k| !ENVELOPE_KEYS.contains(&k.as_str())) {
            return Err(EnvelopeError::ForeignKey(foreign.clone()));
        }

        let kind = match object.remove("type") {
            Some(Value::String(kind)) if kind.is_empty() => return Err(EnvelopeError::EmptyType),
            Some(Value::String(kind)) => kind,
            _ => return Err(EnvelopeError::MissingType),
        };

        let meta = match object.remove("meta") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(meta)) => meta,
            Some(_) => return Err(EnvelopeError::MetaNotObject),
        };

        Ok(Self {
            kind,
            payload: object.remove("payload"),
            error: object.remove("error"),
            meta,
        })
    }

    /// Parse and validate an envelope from JSON text.
    pub fn from_json(text: &str) -> Result<Self, EnvelopeError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| EnvelopeError::Json(e.to_string()))?;
        Self::from_value(value)
    }

    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        object.insert("type".into(), Value::String(self.kind.clone()));
        if let Some(payload) = &self.payload {
            object.insert("payload".into(), payload.clone());
        }
        if let Some(error) = &self.error {
            object.insert("error".into(), error.clone());
        }
        if !self.meta.is_empty() {
            object.insert("meta".into(), Value::Object(self.meta.clone()));
        }
        Value::Object(object)
    }

    /// The envelope's type tag.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn is(&self, kind: &str) -> bool {
        self.kind == kind
    }

    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    /// Look up a top-level field of an object payload.
    pub fn payload_field(&self, key: &str) -> Option<&Value> {
        self.payload.as_ref().and_then(|p| p.get(key))
    }

    /// The payload, or `Null` when absent.
    pub fn into_payload(self) -> Value {
        self.payload.unwrap_or(Value::Null)
    }

    pub fn error(&self) -> Option<&Value> {
        self.error.as_ref()
    }

    pub fn meta(&self) -> &Map<String, Value> {
        &self.meta
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.meta.get(key).and_then(Value::as_str)
    }

    pub fn originator(&self) -> Option<&str> {
        self.meta_str(META_ORIGINATOR)
    }

    /// True when the worker published this envelope.
    pub fn is_from_worker(&self) -> bool {
        self.originator() == Some(ORIGINATOR_WORKER)
    }

    /// Patch generation carried in `meta.generation`, if any.
    pub fn generation(&self) -> Option<u64> {
        self.meta.get(META_GENERATION).and_then(Value::as_u64)
    }
}

impl TryFrom<Value> for Action {
    type Error = EnvelopeError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

impl From<Action> for Value {
    fn from(action: Action) -> Self {
        action.to_value()
    }
}

/// Phase of a request lifecycle, encoded as the suffix of the envelope type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestPhase {
    Loading,
    Success,
    Failure,
}

impl RequestPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestPhase::Loading => "Loading",
            RequestPhase::Success => "Success",
            RequestPhase::Failure => "Failure",
        }
    }

    /// `<service>_<name>_<Phase>`
    pub fn action_type(&self, service: &str, name: &str) -> String {
        format!("{service}_{name}_{}", self.as_str())
    }

    /// Split a lifecycle type into its `<service>_<name>` key and phase.
    pub fn parse(kind: &str) -> Option<(&str, RequestPhase)> {
        let (key, suffix) = kind.rsplit_once('_')?;
        if key.is_empty() {
            return None;
        }
        let phase = match suffix {
            "Loading" => RequestPhase::Loading,
            "Success" => RequestPhase::Success,
            "Failure" => RequestPhase::Failure,
            _ => return None,
        };
        Some((key, phase))
    }
}

impl std::fmt::Display for RequestPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
