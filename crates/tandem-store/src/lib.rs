//! Worker side of tandem.
//!
//! The worker owns the one writable copy of application state. Commands
//! arrive as envelopes, pass through a fixed middleware pipeline and a
//! composed root reducer, and every committed change leaves the worker as a
//! numbered patch.
//!
//! ```text
//!   envelope ─▶ ActionRouter ─▶ RequestLifecycle ─▶ UndoMiddleware ─▶ RootReducer
//!                                                                      │
//!                                              DiffPublisher ◀─────────┘
//!                                                   │ STATE_APPLY_DIFF {generation}
//!                                                   ▼
//!                                            outbound EnvelopeSink
//! ```
//!
//! Handler and service modules are looked up through [`Resolver`]s and
//! built lazily. Reducers and undo inverse factories are registered on a
//! [`WorkerBuilder`] before the store exists.

pub mod error;
pub mod middleware;
pub mod module;
pub mod publisher;
pub mod reducer;
pub mod reducers;
pub mod resolver;
pub mod store;
pub mod worker;

pub use error::{ResolveError, Result, ServiceError, StoreError};
pub use middleware::{
    ActionRouter, RequestLifecycle, UndoEntry, UndoHistory, UndoMiddleware, UndoRegistry,
    UndoScope, request, route,
};
pub use module::{HandlerExport, HandlerFn, HandlerModule, ServiceFn, ServiceModule};
pub use publisher::DiffPublisher;
pub use reducer::{Reducer, ReducerRegistry, RootReducer};
pub use resolver::{ModuleRegistry, Resolver};
pub use store::{
    AsyncTask, Continuation, Dispatch, Dispatcher, Flow, Middleware, MiddlewareApi, StateListener,
    StateReader, Store,
};
pub use worker::{WorkerBuilder, WorkerError, WorkerHandle};
