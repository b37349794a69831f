//! Handler and service modules: the units the pipeline resolves by id.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tandem_types::Action;

use crate::error::ServiceError;
use crate::store::Dispatch;

/// A handler function: payload in, envelope or task out.
pub type HandlerFn = Arc<dyn Fn(Value) -> Dispatch + Send + Sync>;

/// One named export of a handler module.
#[derive(Clone)]
pub enum HandlerExport {
    /// Forwarded as-is.
    Action(Action),
    /// Forwarded if it validates as an envelope.
    Value(Value),
    /// Called with the routed envelope's payload.
    Function(HandlerFn),
}

impl std::fmt::Debug for HandlerExport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlerExport::Action(action) => f.debug_tuple("Action").field(action).finish(),
            HandlerExport::Value(value) => f.debug_tuple("Value").field(value).finish(),
            HandlerExport::Function(_) => f.write_str("Function(..)"),
        }
    }
}

/// Named exports reachable through `ROUTE_TO_WORKER_ACTION`.
#[derive(Default, Clone, Debug)]
pub struct HandlerModule {
    exports: HashMap<String, HandlerExport>,
}

impl HandlerModule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_action(mut self, name: impl Into<String>, action: Action) -> Self {
        self.exports.insert(name.into(), HandlerExport::Action(action));
        self
    }

    pub fn with_value(mut self, name: impl Into<String>, value: Value) -> Self {
        self.exports.insert(name.into(), HandlerExport::Value(value));
        self
    }

    pub fn with_function<F, D>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> D + Send + Sync + 'static,
        D: Into<Dispatch>,
    {
        let handler: HandlerFn = Arc::new(move |payload| f(payload).into());
        self.exports.insert(name.into(), HandlerExport::Function(handler));
        self
    }

    pub fn get(&self, name: &str) -> Option<&HandlerExport> {
        self.exports.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.exports.keys().map(String::as_str)
    }
}

pub type ServiceFuture = BoxFuture<'static, Result<Value, ServiceError>>;

/// An async service method taking positional params.
pub type ServiceFn = Arc<dyn Fn(Vec<Value>) -> ServiceFuture + Send + Sync>;

/// Named async methods reachable through `DATA_REQUEST`.
#[derive(Default, Clone)]
pub struct ServiceModule {
    methods: HashMap<String, ServiceFn>,
}

impl ServiceModule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_method<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ServiceError>> + Send + 'static,
    {
        let method: ServiceFn = Arc::new(move |params| Box::pin(f(params)));
        self.methods.insert(name.into(), method);
        self
    }

    pub fn method(&self, name: &str) -> Option<ServiceFn> {
        self.methods.get(name).cloned()
    }
}

impl std::fmt::Debug for ServiceModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceModule")
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}
