//! Routes `ROUTE_TO_WORKER_ACTION` envelopes to handler module methods.
//!
//! `meta.workerImpl` names the module, `meta.name` the export. Whatever the
//! export produces continues down the pipeline in place of the routing
//! envelope; tasks go to the interpreter instead.

use std::sync::Arc;

use tandem_types::{Action, types};
use tracing::debug;

use crate::error::StoreError;
use crate::module::{HandlerExport, HandlerModule};
use crate::resolver::Resolver;
use crate::store::{Dispatch, Flow, Middleware, MiddlewareApi};

pub const META_WORKER_IMPL: &str = "workerImpl";
pub const META_NAME: &str = "name";

pub struct ActionRouter {
    handlers: Arc<dyn Resolver<HandlerModule>>,
}

impl ActionRouter {
    pub fn new(handlers: Arc<dyn Resolver<HandlerModule>>) -> Self {
        Self { handlers }
    }
}

/// Build a routing envelope for `implementation.method`.
pub fn route(implementation: &str, method: &str) -> Action {
    Action::new(types::ROUTE_TO_WORKER)
        .with_meta(META_WORKER_IMPL, implementation.into())
        .with_meta(META_NAME, method.into())
}

impl Middleware for ActionRouter {
    fn name(&self) -> &'static str {
        "router"
    }

    fn handle(&mut self, action: Action, api: &mut MiddlewareApi<'_>) -> Result<Flow, StoreError> {
        if !action.is(types::ROUTE_TO_WORKER) {
            return Ok(Flow::Next(action));
        }

        let module_id = action
            .meta_str(META_WORKER_IMPL)
            .ok_or(StoreError::MissingRouteMeta { field: META_WORKER_IMPL })?
            .to_string();
        let method = action
            .meta_str(META_NAME)
            .ok_or(StoreError::MissingRouteMeta { field: META_NAME })?
            .to_string();

        let module = self.handlers.resolve(&module_id)?;
        let export = module
            .get(&method)
            .cloned()
            .ok_or_else(|| StoreError::MissingMethod {
                module: module_id.clone(),
                method: method.clone(),
            })?;

        debug!("routing to {}.{}", module_id, method);

        match export {
            HandlerExport::Action(routed) => Ok(Flow::Next(routed)),
            HandlerExport::Value(value) => Action::from_value(value)
                .map(Flow::Next)
                .map_err(|source| StoreError::InvalidHandlerExport {
                    module: module_id,
                    method,
                    source,
                }),
            HandlerExport::Function(f) => match f(action.into_payload()) {
                Dispatch::Action(routed) => Ok(Flow::Next(routed)),
                Dispatch::Task(task) => {
                    api.spawn_task(task);
                    Ok(Flow::Consumed)
                }
            },
        }
    }
}
