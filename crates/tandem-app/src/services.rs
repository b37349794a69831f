//! Services reachable through `DATA_REQUEST`.

use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Value, json};
use tandem_client::BridgeHandle;
use tandem_store::{ModuleRegistry, ServiceError, ServiceModule};

/// `system`: liveness and clock. `socket`: push through the bridge.
///
/// With no bridge, `socket.push` fails every call instead of vanishing, so a
/// request against an offline host still ends in `socket_push_Failure`.
pub fn registry(bridge: Option<BridgeHandle>) -> ModuleRegistry<ServiceModule> {
    let mut registry = ModuleRegistry::new("service");
    registry.register("system", system_module);
    registry.insert("socket", socket_module(bridge));
    registry
}

fn system_module() -> ServiceModule {
    ServiceModule::new()
        .with_method("ping", |_params| async { Ok(json!("pong")) })
        .with_method("time", |_params| async {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_err(|e| ServiceError::Failed(e.to_string()))?;
            Ok(json!({ "unixMillis": now.as_millis() as u64 }))
        })
        .with_method("echo", |params| async move { Ok(Value::Array(params)) })
}

fn socket_module(bridge: Option<BridgeHandle>) -> ServiceModule {
    ServiceModule::new().with_method("push", move |params| {
        let bridge = bridge.clone();
        async move {
            let bridge = bridge.ok_or_else(|| ServiceError::Failed("bridge is not running".into()))?;
            let Some(message) = params.into_iter().next() else {
                return Err(ServiceError::InvalidParams("push needs a message".into()));
            };
            bridge.push(message);
            Ok(json!({ "queued": true, "sourceGuid": bridge.source_guid() }))
        }
    })
}
