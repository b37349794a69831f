//! The canonical store.
//!
//! Single writer for the state tree. Every envelope runs the middleware chain
//! and then the root reducer before the next one is admitted:
//!
//! ```text
//!   dispatch ──▶ queue ──▶ mw[0] ─▶ mw[1] ─▶ … ─▶ RootReducer ─▶ listeners
//!                 ▲          │ api.dispatch()                      (DiffPublisher)
//!                 └──────────┘
//!   spawned task ──continuation channel──▶ Store::resume ──▶ queue
//! ```
//!
//! Envelopes dispatched from inside middleware are queued behind the current
//! one. Async work never calls back into the store directly: its results
//! come back through the continuation channel and are dispatched as fresh
//! envelopes by whoever drives the store (see [`crate::worker`]).

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::BoxFuture;
use serde_json::Value;
use tandem_types::Action;
use tokio::sync::{mpsc, watch};
use tracing::{error, trace};

use crate::error::StoreError;
use crate::reducer::RootReducer;

// ============================================================================
// Dispatchables
// ============================================================================

type TaskFn = Box<dyn FnOnce(Dispatcher, StateReader) -> BoxFuture<'static, Option<Action>> + Send>;

/// A deferred unit of async work with access to dispatch and current state.
///
/// The future may dispatch any number of envelopes through the
/// [`Dispatcher`] and may resolve to one final envelope.
pub struct AsyncTask(TaskFn);

impl AsyncTask {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce(Dispatcher, StateReader) -> Fut + Send + 'static,
        Fut: Future<Output = Option<Action>> + Send + 'static,
    {
        Self(Box::new(move |dispatcher, reader| Box::pin(f(dispatcher, reader))))
    }
}

impl std::fmt::Debug for AsyncTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AsyncTask(..)")
    }
}

/// Anything the store accepts.
#[derive(Debug)]
pub enum Dispatch {
    Action(Action),
    Task(AsyncTask),
}

impl From<Action> for Dispatch {
    fn from(action: Action) -> Self {
        Dispatch::Action(action)
    }
}

impl From<AsyncTask> for Dispatch {
    fn from(task: AsyncTask) -> Self {
        Dispatch::Task(task)
    }
}

/// Result of async work, fed back through [`Store::resume`].
#[derive(Debug)]
pub struct Continuation(ContinuationKind);

#[derive(Debug)]
enum ContinuationKind {
    Dispatch(Dispatch),
    Finished(Option<Action>),
}

/// Dispatch handle given to async tasks.
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<Continuation>,
}

impl Dispatcher {
    /// Queue `dispatch` for the store. Returns false once the store is gone.
    pub fn dispatch(&self, dispatch: impl Into<Dispatch>) -> bool {
        self.tx
            .send(Continuation(ContinuationKind::Dispatch(dispatch.into())))
            .is_ok()
    }
}

/// Read access to the latest settled state, for async tasks.
#[derive(Clone)]
pub struct StateReader {
    rx: watch::Receiver<Arc<Value>>,
}

impl StateReader {
    pub fn get(&self) -> Arc<Value> {
        self.rx.borrow().clone()
    }
}

// ============================================================================
// Middleware
// ============================================================================

/// What a middleware did with an envelope.
#[derive(Debug)]
pub enum Flow {
    /// Continue down the chain with this envelope.
    Next(Action),
    /// Stop here; nothing reaches the reducers.
    Consumed,
}

/// One stage of the pipeline.
pub trait Middleware: Send {
    fn name(&self) -> &'static str;

    fn handle(&mut self, action: Action, api: &mut MiddlewareApi<'_>) -> Result<Flow, StoreError>;
}

/// What middleware may touch while handling an envelope.
pub struct MiddlewareApi<'a> {
    state: &'a Value,
    queue: &'a mut VecDeque<Dispatch>,
    tasks: &'a TaskSpawner,
}

impl MiddlewareApi<'_> {
    /// Settled state before the current envelope.
    pub fn state(&self) -> &Value {
        self.state
    }

    /// Queue a follow-up, processed after the current envelope settles.
    pub fn dispatch(&mut self, dispatch: impl Into<Dispatch>) {
        self.queue.push_back(dispatch.into());
    }

    pub fn spawn_task(&self, task: AsyncTask) {
        self.tasks.spawn_task(task);
    }

    /// Run `future` on the runtime and dispatch its output, if any.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = Option<Action>> + Send + 'static,
    {
        self.tasks.spawn(future);
    }
}

/// Observer of committed state transitions.
pub trait StateListener: Send {
    fn on_transition(&mut self, prev: &Value, next: &Value, action: &Action);
}

// ============================================================================
// Task interpreter
// ============================================================================

struct TaskSpawner {
    tx: mpsc::UnboundedSender<Continuation>,
    state: watch::Receiver<Arc<Value>>,
    pending: AtomicUsize,
}

impl TaskSpawner {
    fn spawn_task(&self, task: AsyncTask) {
        let dispatcher = Dispatcher { tx: self.tx.clone() };
        let reader = StateReader { rx: self.state.clone() };
        self.spawn((task.0)(dispatcher, reader));
    }

    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = Option<Action>> + Send + 'static,
    {
        self.pending.fetch_add(1, Ordering::SeqCst);
        let tx = self.tx.clone();
        let handle = tokio::spawn(future);
        tokio::spawn(async move {
            let output = match handle.await {
                Ok(output) => output,
                Err(e) => {
                    error!("async task failed: {}", e);
                    None
                }
            };
            let _ = tx.send(Continuation(ContinuationKind::Finished(output)));
        });
    }
}

// ============================================================================
// Store
// ============================================================================

pub struct Store {
    state: Arc<Value>,
    root: RootReducer,
    middleware: Vec<Box<dyn Middleware>>,
    listeners: Vec<Box<dyn StateListener>>,
    queue: VecDeque<Dispatch>,
    tasks: TaskSpawner,
    continuations: mpsc::UnboundedReceiver<Continuation>,
    state_tx: watch::Sender<Arc<Value>>,
}

impl Store {
    pub fn new(root: RootReducer) -> Self {
        let state = Arc::new(root.initial_state());
        let (state_tx, state_rx) = watch::channel(state.clone());
        let (tx, continuations) = mpsc::unbounded_channel();
        Self {
            state,
            root,
            middleware: Vec::new(),
            listeners: Vec::new(),
            queue: VecDeque::new(),
            tasks: TaskSpawner {
                tx,
                state: state_rx,
                pending: AtomicUsize::new(0),
            },
            continuations,
            state_tx,
        }
    }

    /// Append a middleware; envelopes visit them in insertion order.
    pub fn with_middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middleware.push(Box::new(middleware));
        self
    }

    pub fn with_listener(mut self, listener: impl StateListener + 'static) -> Self {
        self.listeners.push(Box::new(listener));
        self
    }

    pub fn state(&self) -> &Value {
        &self.state
    }

    pub fn snapshot(&self) -> Arc<Value> {
        self.state.clone()
    }

    pub fn reader(&self) -> StateReader {
        StateReader {
            rx: self.tasks.state.clone(),
        }
    }

    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher {
            tx: self.tasks.tx.clone(),
        }
    }

    /// Number of spawned tasks whose results have not come back yet.
    pub fn pending_tasks(&self) -> usize {
        self.tasks.pending.load(Ordering::SeqCst)
    }

    /// Run `dispatch` and everything it queues to completion.
    ///
    /// A configuration error aborts the current envelope, drops the queue
    /// and is returned to the caller.
    pub fn dispatch(&mut self, dispatch: impl Into<Dispatch>) -> Result<(), StoreError> {
        self.queue.push_back(dispatch.into());
        self.drain()
    }

    /// Wait for the next continuation from async work.
    pub async fn next_continuation(&mut self) -> Continuation {
        match self.continuations.recv().await {
            Some(continuation) => continuation,
            // The store holds a sender, so the channel never closes under us.
            None => std::future::pending().await,
        }
    }

    /// Feed a continuation back into the pipeline.
    pub fn resume(&mut self, continuation: Continuation) -> Result<(), StoreError> {
        match continuation.0 {
            ContinuationKind::Dispatch(dispatch) => self.dispatch(dispatch),
            ContinuationKind::Finished(output) => {
                self.tasks.pending.fetch_sub(1, Ordering::SeqCst);
                match output {
                    Some(action) => self.dispatch(action),
                    None => Ok(()),
                }
            }
        }
    }

    /// Drive continuations until no spawned task is outstanding.
    pub async fn settle(&mut self) -> Result<(), StoreError> {
        while self.pending_tasks() > 0 {
            let continuation = self.next_continuation().await;
            self.resume(continuation)?;
        }
        Ok(())
    }

    fn drain(&mut self) -> Result<(), StoreError> {
        while let Some(next) = self.queue.pop_front() {
            let result = match next {
                Dispatch::Task(task) => {
                    self.tasks.spawn_task(task);
                    Ok(())
                }
                Dispatch::Action(action) => self.process(action),
            };
            if let Err(e) = result {
                error!(dropped = self.queue.len(), "dispatch aborted: {}", e);
                self.queue.clear();
                return Err(e);
            }
        }
        Ok(())
    }

    fn process(&mut self, action: Action) -> Result<(), StoreError> {
        let mut current = action;
        for middleware in self.middleware.iter_mut() {
            let mut api = MiddlewareApi {
                state: &self.state,
                queue: &mut self.queue,
                tasks: &self.tasks,
            };
            match middleware.handle(current, &mut api)? {
                Flow::Next(next) => current = next,
                Flow::Consumed => {
                    trace!("consumed by {}", middleware.name());
                    return Ok(());
                }
            }
        }
        self.reduce(current);
        Ok(())
    }

    fn reduce(&mut self, action: Action) {
        let next = Arc::new(self.root.reduce(&self.state, &action));
        let prev = std::mem::replace(&mut self.state, next);
        for listener in self.listeners.iter_mut() {
            listener.on_transition(&prev, &self.state, &action);
        }
        self.state_tx.send_replace(self.state.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reducer::ReducerRegistry;
    use serde_json::json;

    fn recording_store() -> Store {
        let mut registry = ReducerRegistry::new();
        registry.register_base("seen", |state, action| {
            let mut items = state.as_array().cloned().unwrap_or_default();
            if !action.is(tandem_types::types::INIT) {
                items.push(json!(action.kind()));
            }
            Value::Array(items)
        });
        Store::new(registry.build())
    }

    /// Re-dispatches every `A` as a `B` follow-up and lets `A` through.
    struct Echo;

    impl Middleware for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn handle(&mut self, action: Action, api: &mut MiddlewareApi<'_>) -> Result<Flow, StoreError> {
            if action.is("A") {
                api.dispatch(Action::new("B"));
            }
            if action.is("DROP") {
                return Ok(Flow::Consumed);
            }
            Ok(Flow::Next(action))
        }
    }

    #[test]
    fn test_follow_ups_run_after_current_envelope() {
        let mut store = recording_store().with_middleware(Echo);
        store.dispatch(Action::new("A")).expect("dispatch");
        assert_eq!(store.state()["seen"], json!(["A", "B"]));
    }

    #[test]
    fn test_consumed_envelopes_skip_reducers() {
        let mut store = recording_store().with_middleware(Echo);
        store.dispatch(Action::new("DROP")).expect("dispatch");
        assert_eq!(store.state()["seen"], json!([]));
    }

    #[test]
    fn test_listener_sees_prev_and_next() {
        struct Count(Arc<AtomicUsize>);
        impl StateListener for Count {
            fn on_transition(&mut self, prev: &Value, next: &Value, _: &Action) {
                assert_ne!(prev, next);
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let mut store = recording_store().with_listener(Count(calls.clone()));
        store.dispatch(Action::new("X")).expect("dispatch");
        store.dispatch(Action::new("Y")).expect("dispatch");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_async_task_results_reenter_as_fresh_envelopes() {
        let mut store = recording_store();
        store
            .dispatch(AsyncTask::new(|dispatch, state| async move {
                let before = state.get()["seen"].as_array().map(Vec::len).unwrap_or(0);
                dispatch.dispatch(Action::new(format!("progress_{before}")));
                Some(Action::new("done"))
            }))
            .expect("dispatch task");

        assert_eq!(store.pending_tasks(), 1);
        store.settle().await.expect("settle");
        assert_eq!(store.pending_tasks(), 0);

        let seen = store.state()["seen"].as_array().cloned().unwrap_or_default();
        assert!(seen.contains(&json!("progress_0")));
        assert_eq!(seen.last(), Some(&json!("done")));
    }

    #[tokio::test]
    async fn test_state_reader_tracks_commits() {
        let mut store = recording_store();
        let reader = store.reader();
        store.dispatch(Action::new("Z")).expect("dispatch");
        assert_eq!(reader.get()["seen"], json!(["Z"]));
    }
}
