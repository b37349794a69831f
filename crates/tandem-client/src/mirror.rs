//! Foreground mirror of the worker's canonical state.
//!
//! The mirror starts empty and unsynchronized. A `STATE_SNAPSHOT` replaces
//! the whole tree and records its generation; each `STATE_APPLY_DIFF` must
//! carry exactly the next generation. Anything else (a gap, a patch before
//! the first snapshot, a patch that does not fit the current tree) leaves the
//! state untouched and flags the mirror for resync until the next snapshot.
//!
//! # Generation tracking
//!
//! ```text
//!   None ──snapshot(g)──▶ Some(g) ──patch(g+1)──▶ Some(g+1) ...
//!                            │
//!                            └─patch(g+k), k != 1──▶ NeedsResync (state kept)
//! ```

use std::sync::Arc;

use serde_json::Value;
use tandem_types::{Action, EnvelopeSink, Patch, PatchError, apply, types};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("patch arrived before any snapshot")]
    NotSynced,
    #[error("out-of-order patch: expected generation {expected}, got {got}")]
    OutOfOrder { expected: u64, got: u64 },
    #[error("worker envelope missing meta.generation")]
    MissingGeneration,
    #[error("malformed patch payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("patch does not apply: {0}")]
    Patch(#[from] PatchError),
    #[error("worker is gone")]
    WorkerGone,
}

/// What [`MirrorStore::receive`] did with an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorEffect {
    /// State replaced from a snapshot.
    FullSync { generation: u64 },
    /// Patch applied.
    Updated { generation: u64 },
    /// Not a state envelope.
    Ignored,
    /// Handed to the worker.
    Forwarded,
    /// Mirror just fell out of step; ask the worker for a snapshot.
    NeedsResync,
    /// Patch refused while a snapshot is already owed.
    AwaitingResync,
    /// The worker reported a configuration error and stopped.
    WorkerFailed(String),
}

// ============================================================================
// MirrorStore
// ============================================================================

pub struct MirrorStore {
    state: Arc<Value>,
    generation: Option<u64>,
    needs_resync: bool,
    version: u64,
    state_tx: watch::Sender<Arc<Value>>,
    worker: Arc<dyn EnvelopeSink>,
}

impl MirrorStore {
    /// Empty, unsynchronized mirror that forwards commands to `worker`.
    pub fn new(worker: Arc<dyn EnvelopeSink>) -> Self {
        let state = Arc::new(Value::Null);
        let (state_tx, _) = watch::channel(state.clone());
        Self {
            state,
            generation: None,
            needs_resync: false,
            version: 0,
            state_tx,
            worker,
        }
    }

    pub fn state(&self) -> Arc<Value> {
        self.state.clone()
    }

    /// Generation of the last snapshot or patch applied.
    pub fn generation(&self) -> Option<u64> {
        self.generation
    }

    /// Bumped on every successful apply.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_synced(&self) -> bool {
        self.generation.is_some() && !self.needs_resync
    }

    pub fn needs_resync(&self) -> bool {
        self.needs_resync
    }

    /// Watch the latest state. The receiver starts at the current value.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Value>> {
        self.state_tx.subscribe()
    }

    /// Send a command toward the canonical store.
    ///
    /// Worker-originated envelopes that loop back here are applied locally
    /// instead of being sent back.
    pub fn dispatch(&mut self, action: Action) -> Result<MirrorEffect, MirrorError> {
        if action.is_from_worker() {
            return Ok(self.receive(&action));
        }
        trace!("forwarding {} to worker", action.kind());
        self.worker
            .deliver(action)
            .map(|()| MirrorEffect::Forwarded)
            .map_err(|_| MirrorError::WorkerGone)
    }

    /// Apply one envelope from the worker.
    pub fn receive(&mut self, action: &Action) -> MirrorEffect {
        match action.kind() {
            types::STATE_SNAPSHOT => self.apply_snapshot(action),
            types::STATE_APPLY_DIFF => match self.try_apply(action) {
                Ok(generation) => MirrorEffect::Updated { generation },
                Err(e) if self.needs_resync => {
                    debug!("mirror still awaiting snapshot: {}", e);
                    MirrorEffect::AwaitingResync
                }
                Err(e) => {
                    warn!("mirror out of sync: {}", e);
                    self.needs_resync = true;
                    MirrorEffect::NeedsResync
                }
            },
            types::WORKER_CONFIGURATION_ERROR => {
                let message = action
                    .payload_field("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown configuration error")
                    .to_string();
                warn!("worker stopped: {}", message);
                MirrorEffect::WorkerFailed(message)
            }
            _ => MirrorEffect::Ignored,
        }
    }

    /// Apply a `STATE_APPLY_DIFF` without touching the resync flag.
    ///
    /// On error the state is exactly what it was before the call.
    pub fn try_apply(&mut self, action: &Action) -> Result<u64, MirrorError> {
        let got = action.generation().ok_or(MirrorError::MissingGeneration)?;
        let last = match self.generation {
            Some(last) if !self.needs_resync => last,
            _ => return Err(MirrorError::NotSynced),
        };
        if got != last + 1 {
            return Err(MirrorError::OutOfOrder {
                expected: last + 1,
                got,
            });
        }

        let patch = Patch::from_value(action.payload().cloned().unwrap_or(Value::Null))?;
        let mut next = (*self.state).clone();
        apply(&mut next, &patch)?;

        self.generation = Some(got);
        self.commit(next);
        Ok(got)
    }

    fn apply_snapshot(&mut self, action: &Action) -> MirrorEffect {
        let Some(generation) = action.generation() else {
            warn!("snapshot without generation, ignoring");
            return MirrorEffect::Ignored;
        };
        if self.needs_resync {
            info!("mirror resynchronized at generation {}", generation);
        }
        self.generation = Some(generation);
        self.needs_resync = false;
        self.commit(action.payload().cloned().unwrap_or(Value::Null));
        MirrorEffect::FullSync { generation }
    }

    fn commit(&mut self, next: Value) {
        self.state = Arc::new(next);
        self.version += 1;
        self.state_tx.send_replace(self.state.clone());
    }
}
