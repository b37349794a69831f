//! Expands `DATA_REQUEST` into Loading, then Success or Failure.
//!
//! ```text
//!   DATA_REQUEST {service:"user", name:"me", params:[]}
//!     ├─▶ user_me_Loading  {…payload}                 (same pass)
//!     └─▶ service.me(params) ──ok──▶ user_me_Success {…payload, result}
//!                            └─err─▶ user_me_Failure {…payload, error}
//! ```
//!
//! The service and method are resolved before Loading is queued, so a
//! misconfigured request fails loudly without leaving a Loading that never
//! finishes. A service that panics ends in Failure with error `"panicked"`.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::{Map, Value};
use tandem_types::{Action, RequestPhase, types};
use tracing::{debug, warn};

use crate::error::{ServiceError, StoreError};
use crate::module::ServiceModule;
use crate::resolver::Resolver;
use crate::store::{Flow, Middleware, MiddlewareApi};

pub struct RequestLifecycle {
    services: Arc<dyn Resolver<ServiceModule>>,
}

impl RequestLifecycle {
    pub fn new(services: Arc<dyn Resolver<ServiceModule>>) -> Self {
        Self { services }
    }
}

/// Build a `DATA_REQUEST` envelope.
pub fn request(service: &str, name: &str, params: Vec<Value>) -> Action {
    let mut payload = Map::new();
    payload.insert("service".into(), service.into());
    payload.insert("name".into(), name.into());
    payload.insert("params".into(), Value::Array(params));
    Action::new(types::DATA_REQUEST).with_payload(Value::Object(payload))
}

fn with_field(payload: &Value, key: &str, value: Value) -> Value {
    let mut object = payload.as_object().cloned().unwrap_or_default();
    object.insert(key.to_string(), value);
    Value::Object(object)
}

impl Middleware for RequestLifecycle {
    fn name(&self) -> &'static str {
        "request-lifecycle"
    }

    fn handle(&mut self, action: Action, api: &mut MiddlewareApi<'_>) -> Result<Flow, StoreError> {
        if !action.is(types::DATA_REQUEST) {
            return Ok(Flow::Next(action));
        }

        let payload = action.into_payload();
        let service = payload
            .get("service")
            .and_then(Value::as_str)
            .ok_or(StoreError::MalformedRequest { field: "service" })?
            .to_string();
        let name = payload
            .get("name")
            .and_then(Value::as_str)
            .ok_or(StoreError::MalformedRequest { field: "name" })?
            .to_string();
        let params = match payload.get("params") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(params)) => params.clone(),
            Some(single) => vec![single.clone()],
        };

        let module = self.services.resolve(&service)?;
        let method = module.method(&name).ok_or_else(|| StoreError::MissingMethod {
            module: service.clone(),
            method: name.clone(),
        })?;

        debug!("request {}.{} started", service, name);
        api.dispatch(
            Action::new(RequestPhase::Loading.action_type(&service, &name))
                .with_payload(payload.clone()),
        );

        api.spawn(async move {
            // A panicking service still owes its request a terminal phase.
            let outcome = AssertUnwindSafe(async move { method(params).await })
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(ServiceError::Failed("panicked".into())));
            let finished = match outcome {
                Ok(result) => Action::new(RequestPhase::Success.action_type(&service, &name))
                    .with_payload(with_field(&payload, "result", result)),
                Err(e) => {
                    warn!("request {}.{} failed: {}", service, name, e);
                    Action::new(RequestPhase::Failure.action_type(&service, &name))
                        .with_payload(with_field(&payload, "error", e.to_value()))
                        .with_error(Value::String(e.to_string()))
                }
            };
            Some(finished)
        });

        Ok(Flow::Consumed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reducer::ReducerRegistry;
    use crate::resolver::ModuleRegistry;
    use crate::store::Store;
    use serde_json::json;

    fn store() -> Store {
        let mut services = ModuleRegistry::new("service");
        services.insert(
            "user",
            ServiceModule::new()
                .with_method("me", |_params| async { Ok(json!({ "id": "u1" })) })
                .with_method("boom", |_params| async {
                    Err(ServiceError::Failed("backend down".into()))
                })
                .with_method("echo", |params| async move { Ok(Value::Array(params)) })
                .with_method("crash", |_params| async {
                    if true {
                        panic!("service bug");
                    }
                    Ok(Value::Null)
                }),
        );

        let mut registry = ReducerRegistry::new();
        registry.register_base("log", |state, action| {
            let mut items = state.as_array().cloned().unwrap_or_default();
            if !action.is(types::INIT) {
                items.push(action.to_value());
            }
            Value::Array(items)
        });
        Store::new(registry.build()).with_middleware(RequestLifecycle::new(Arc::new(services)))
    }

    fn log(store: &Store) -> Vec<Value> {
        store.state()["log"].as_array().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_success_phases_in_order() {
        let mut store = store();
        store.dispatch(request("user", "me", vec![])).expect("dispatch");

        let loading = log(&store);
        assert_eq!(loading.len(), 1, "Loading is reduced in the same pass");
        assert_eq!(loading[0]["type"], json!("user_me_Loading"));
        assert_eq!(loading[0]["payload"]["service"], json!("user"));

        store.settle().await.expect("settle");
        let entries = log(&store);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1]["type"], json!("user_me_Success"));
        assert_eq!(entries[1]["payload"]["result"], json!({ "id": "u1" }));
        assert_eq!(entries[1]["payload"]["name"], json!("me"));
    }

    #[tokio::test]
    async fn test_failure_carries_error() {
        let mut store = store();
        store.dispatch(request("user", "boom", vec![])).expect("dispatch");
        store.settle().await.expect("settle");

        let entries = log(&store);
        let kinds: Vec<_> = entries.iter().map(|e| e["type"].clone()).collect();
        assert_eq!(kinds, vec![json!("user_boom_Loading"), json!("user_boom_Failure")]);
        assert_eq!(entries[1]["payload"]["error"], json!("backend down"));
        assert_eq!(entries[1]["error"], json!("backend down"));
    }

    #[tokio::test]
    async fn test_panicking_service_still_fails() {
        let mut store = store();
        store.dispatch(request("user", "crash", vec![])).expect("dispatch");
        store.settle().await.expect("settle");

        let entries = log(&store);
        let kinds: Vec<_> = entries.iter().map(|e| e["type"].clone()).collect();
        assert_eq!(kinds, vec![json!("user_crash_Loading"), json!("user_crash_Failure")]);
        assert_eq!(entries[1]["payload"]["error"], json!("panicked"));
        assert_eq!(store.pending_tasks(), 0);
    }

    #[tokio::test]
    async fn test_params_are_forwarded() {
        let mut store = store();
        store
            .dispatch(request("user", "echo", vec![json!(1), json!("two")]))
            .expect("dispatch");
        store.settle().await.expect("settle");
        assert_eq!(log(&store)[1]["payload"]["result"], json!([1, "two"]));
    }

    #[test]
    fn test_unknown_method_is_fatal_before_loading() {
        let mut store = store();
        let err = store.dispatch(request("user", "nope", vec![])).unwrap_err();
        assert!(matches!(err, StoreError::MissingMethod { .. }));
        assert!(log(&store).is_empty());
    }

    #[test]
    fn test_missing_service_field() {
        let mut store = store();
        let err = store
            .dispatch(Action::new(types::DATA_REQUEST).with_payload(json!({ "name": "me" })))
            .unwrap_err();
        assert!(matches!(err, StoreError::MalformedRequest { field: "service" }));
    }
}
