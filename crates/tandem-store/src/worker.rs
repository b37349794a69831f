//! The worker context: owns the canonical store and talks only in messages.
//!
//! ```text
//!   WorkerHandle (Clone, Send)     mpsc      Worker task (owns Store)
//!   ┌──────────────────────┐  ─────────▶  ┌──────────────────────────────┐
//!   │ .dispatch(action)    │              │ Router → Lifecycle → Undo    │
//!   │ .request_resync()    │  ◀─────────  │ RootReducer → DiffPublisher  │──▶ outbound sink
//!   │ .snapshot()/.settle()│   oneshot    │ continuations from tasks     │    (patches, snapshots)
//!   └──────────────────────┘              └──────────────────────────────┘
//! ```
//!
//! Commands sent before the task is polled simply wait in the channel, so
//! nothing dispatched during startup is lost. A configuration error stops
//! the worker: it is logged, reported outbound as
//! `WORKER_CONFIGURATION_ERROR`, and later commands fail with
//! [`WorkerError::Shutdown`].

use std::sync::Arc;

use serde_json::{Value, json};
use tandem_types::{Action, EnvelopeSink, SinkClosed, types};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::StoreError;
use crate::middleware::{ActionRouter, RequestLifecycle, UndoMiddleware, UndoRegistry};
use crate::module::{HandlerModule, ServiceModule};
use crate::publisher::DiffPublisher;
use crate::reducer::ReducerRegistry;
use crate::reducers;
use crate::resolver::{ModuleRegistry, Resolver};
use crate::store::Store;

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("worker shut down")]
    Shutdown,
}

// ============================================================================
// Commands (internal)
// ============================================================================

enum WorkerCommand {
    Dispatch(Action),
    Resync,
    Snapshot { reply: oneshot::Sender<Arc<Value>> },
    Settle { reply: oneshot::Sender<Arc<Value>> },
    Shutdown,
}

// ============================================================================
// WorkerHandle
// ============================================================================

/// Send-able handle to a running worker.
#[derive(Clone)]
pub struct WorkerHandle {
    tx: mpsc::UnboundedSender<WorkerCommand>,
}

impl WorkerHandle {
    pub fn dispatch(&self, action: Action) -> Result<(), WorkerError> {
        self.tx
            .send(WorkerCommand::Dispatch(action))
            .map_err(|_| WorkerError::Shutdown)
    }

    /// Ask for a fresh `STATE_SNAPSHOT` on the outbound sink.
    pub fn request_resync(&self) -> Result<(), WorkerError> {
        self.tx
            .send(WorkerCommand::Resync)
            .map_err(|_| WorkerError::Shutdown)
    }

    /// Current canonical state, after everything queued before this call.
    pub async fn snapshot(&self) -> Result<Arc<Value>, WorkerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WorkerCommand::Snapshot { reply })
            .map_err(|_| WorkerError::Shutdown)?;
        rx.await.map_err(|_| WorkerError::Shutdown)
    }

    /// Like [`snapshot`](Self::snapshot), but first waits until every
    /// request and task in flight has finished and been reduced.
    ///
    /// Patches for that work are delivered outbound before this resolves.
    pub async fn settle(&self) -> Result<Arc<Value>, WorkerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WorkerCommand::Settle { reply })
            .map_err(|_| WorkerError::Shutdown)?;
        rx.await.map_err(|_| WorkerError::Shutdown)
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(WorkerCommand::Shutdown);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl EnvelopeSink for WorkerHandle {
    fn deliver(&self, action: Action) -> Result<(), SinkClosed> {
        self.dispatch(action).map_err(|_| SinkClosed)
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Collects registrations, then builds the store or spawns the worker.
pub struct WorkerBuilder {
    reducers: ReducerRegistry,
    handlers: Arc<dyn Resolver<HandlerModule>>,
    services: Arc<dyn Resolver<ServiceModule>>,
    undo: UndoRegistry,
}

impl Default for WorkerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerBuilder {
    /// Start with the base reducers and empty module registries.
    pub fn new() -> Self {
        let mut reducers = ReducerRegistry::new();
        reducers::register_base(&mut reducers);
        Self {
            reducers,
            handlers: Arc::new(ModuleRegistry::<HandlerModule>::new("handler")),
            services: Arc::new(ModuleRegistry::<ServiceModule>::new("service")),
            undo: UndoRegistry::new(),
        }
    }

    /// Register or edit reducers before the store exists.
    pub fn reducers(mut self, f: impl FnOnce(&mut ReducerRegistry)) -> Self {
        f(&mut self.reducers);
        self
    }

    pub fn handlers(mut self, handlers: Arc<dyn Resolver<HandlerModule>>) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn services(mut self, services: Arc<dyn Resolver<ServiceModule>>) -> Self {
        self.services = services;
        self
    }

    pub fn undo_factories(mut self, undo: UndoRegistry) -> Self {
        self.undo = undo;
        self
    }

    /// Assemble the store with the fixed pipeline and a publisher on `outbound`.
    pub fn build_store(self, outbound: Arc<dyn EnvelopeSink>) -> (Store, DiffPublisher) {
        let publisher = DiffPublisher::new(outbound);
        let store = Store::new(self.reducers.build())
            .with_middleware(ActionRouter::new(self.handlers))
            .with_middleware(RequestLifecycle::new(self.services))
            .with_middleware(UndoMiddleware::new(self.undo))
            .with_listener(publisher.clone());
        (store, publisher)
    }

    /// Spawn the worker task on the current tokio runtime.
    pub fn spawn(self, outbound: Arc<dyn EnvelopeSink>) -> (WorkerHandle, JoinHandle<()>) {
        let (store, publisher) = self.build_store(outbound.clone());
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            store,
            publisher,
            outbound,
        };
        let join = tokio::spawn(worker.run(rx));
        (WorkerHandle { tx }, join)
    }
}

// ============================================================================
// Worker (internal)
// ============================================================================

struct Worker {
    store: Store,
    publisher: DiffPublisher,
    outbound: Arc<dyn EnvelopeSink>,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<WorkerCommand>) {
        info!("worker started");
        self.publisher.publish_snapshot(self.store.state());

        loop {
            let result = tokio::select! {
                command = rx.recv() => match command {
                    Some(WorkerCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                continuation = self.store.next_continuation() => self.store.resume(continuation),
            };

            if let Err(e) = result {
                self.fail(e);
                break;
            }
        }

        info!("worker stopped");
    }

    async fn handle_command(&mut self, command: WorkerCommand) -> Result<(), StoreError> {
        match command {
            WorkerCommand::Dispatch(action) => self.store.dispatch(action),
            WorkerCommand::Resync => {
                self.publisher.publish_snapshot(self.store.state());
                Ok(())
            }
            WorkerCommand::Snapshot { reply } => {
                let _ = reply.send(self.store.snapshot());
                Ok(())
            }
            WorkerCommand::Settle { reply } => {
                self.store.settle().await?;
                let _ = reply.send(self.store.snapshot());
                Ok(())
            }
            WorkerCommand::Shutdown => Ok(()),
        }
    }

    fn fail(&self, e: StoreError) {
        error!("worker configuration error, stopping: {}", e);
        let report = Action::new(types::WORKER_CONFIGURATION_ERROR)
            .with_payload(json!({ "message": e.to_string() }))
            .with_error(Value::String(e.to_string()));
        let _ = self.outbound.deliver(report);
    }
}
