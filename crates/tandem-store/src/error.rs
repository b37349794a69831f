//! Error types for the worker pipeline.

use serde_json::Value;
use tandem_types::EnvelopeError;

/// A module id could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("no {kind} module registered for `{id}`")]
    Unknown { kind: &'static str, id: String },
}

/// Configuration errors raised by the pipeline.
///
/// All of these are fatal: they mean a registration or a routing envelope is
/// wrong, not that something transient failed. The store aborts the current
/// dispatch and drops anything queued behind it.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("routing envelope is missing string meta.{field}")]
    MissingRouteMeta { field: &'static str },

    #[error("request envelope is missing string payload.{field}")]
    MalformedRequest { field: &'static str },

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("module `{module}` has no method `{method}`")]
    MissingMethod { module: String, method: String },

    #[error("handler `{module}.{method}` exported a value that is not an envelope: {source}")]
    InvalidHandlerExport {
        module: String,
        method: String,
        #[source]
        source: EnvelopeError,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A service call rejected.
///
/// Never fatal: the request lifecycle turns it into a `*_Failure` envelope.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    Failed(String),
    #[error("invalid params: {0}")]
    InvalidParams(String),
    /// Structured error body, forwarded to the failure payload as-is.
    #[error("rejected: {0}")]
    Rejected(Value),
}

impl ServiceError {
    /// The value placed in the failure payload's `error` field.
    pub fn to_value(&self) -> Value {
        match self {
            ServiceError::Rejected(value) => value.clone(),
            other => Value::String(other.to_string()),
        }
    }
}
