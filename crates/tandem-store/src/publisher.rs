//! Ships state changes to the foreground as patches.
//!
//! Each committed transition is diffed against its predecessor. Non-empty
//! patches go out as `STATE_APPLY_DIFF` with a strictly increasing
//! `meta.generation`; empty ones are never sent. A patch the sink refuses is
//! dropped, not buffered. Its generation is still spent, so the mirror sees
//! the gap and asks for a snapshot.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tandem_types::{
    Action, EnvelopeSink, META_GENERATION, META_ORIGINATOR, ORIGINATOR_WORKER, diff, types,
};
use tracing::{trace, warn};

use crate::store::StateListener;

struct Inner {
    sink: Arc<dyn EnvelopeSink>,
    generation: AtomicU64,
}

/// Cloneable: the store holds one copy as a listener, the worker keeps
/// another to publish snapshots with the same generation counter.
#[derive(Clone)]
pub struct DiffPublisher {
    inner: Arc<Inner>,
}

impl DiffPublisher {
    pub fn new(sink: Arc<dyn EnvelopeSink>) -> Self {
        Self {
            inner: Arc::new(Inner {
                sink,
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Generation of the last patch produced (0 before the first).
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Send the whole state as `STATE_SNAPSHOT`.
    ///
    /// Carries the current generation: the next patch will be
    /// `generation + 1`.
    pub fn publish_snapshot(&self, state: &Value) -> bool {
        let envelope = stamp(Action::new(types::STATE_SNAPSHOT), self.generation())
            .with_payload(state.clone());
        self.send(envelope)
    }

    fn send(&self, envelope: Action) -> bool {
        let kind = envelope.kind().to_string();
        match self.inner.sink.deliver(envelope) {
            Ok(()) => true,
            Err(e) => {
                warn!("dropping {} (generation {}): {}", kind, self.generation(), e);
                false
            }
        }
    }
}

fn stamp(action: Action, generation: u64) -> Action {
    action
        .with_meta(META_ORIGINATOR, Value::String(ORIGINATOR_WORKER.into()))
        .with_meta(META_GENERATION, Value::from(generation))
}

impl StateListener for DiffPublisher {
    fn on_transition(&mut self, prev: &Value, next: &Value, action: &Action) {
        let patch = diff(prev, next);
        if patch.is_empty() {
            trace!("{} changed nothing", action.kind());
            return;
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        trace!("{} -> generation {} ({} ops)", action.kind(), generation, patch.len());
        let envelope =
            stamp(Action::new(types::STATE_APPLY_DIFF), generation).with_payload(patch.to_value());
        self.send(envelope);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tandem_types::{Patch, apply};
    use tokio::sync::mpsc;

    #[test]
    fn test_publishes_numbered_patches() {
        let (tx, mut rx) = mpsc::unbounded_channel::<Action>();
        let mut publisher = DiffPublisher::new(Arc::new(tx));

        let s0 = json!({ "a": 1 });
        let s1 = json!({ "a": 2 });
        let s2 = json!({ "a": 2, "b": [] });
        publisher.on_transition(&s0, &s1, &Action::new("X"));
        publisher.on_transition(&s1, &s1, &Action::new("NOOP"));
        publisher.on_transition(&s1, &s2, &Action::new("Y"));

        let first = rx.try_recv().expect("first patch");
        let second = rx.try_recv().expect("second patch");
        assert!(rx.try_recv().is_err(), "no patch for a no-op transition");

        assert_eq!(first.kind(), types::STATE_APPLY_DIFF);
        assert!(first.is_from_worker());
        assert_eq!(first.generation(), Some(1));
        assert_eq!(second.generation(), Some(2));

        let mut mirror = s1.clone();
        let patch = Patch::from_value(second.into_payload()).expect("patch");
        apply(&mut mirror, &patch).expect("apply");
        assert_eq!(mirror, s2);
    }

    #[test]
    fn test_closed_sink_still_spends_generation() {
        let (tx, rx) = mpsc::unbounded_channel::<Action>();
        drop(rx);
        let mut publisher = DiffPublisher::new(Arc::new(tx));
        publisher.on_transition(&json!(1), &json!(2), &Action::new("X"));
        assert_eq!(publisher.generation(), 1);
        assert!(!publisher.publish_snapshot(&json!(2)));
    }

    #[test]
    fn test_snapshot_carries_current_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel::<Action>();
        let mut publisher = DiffPublisher::new(Arc::new(tx));
        publisher.on_transition(&json!({}), &json!({ "k": 1 }), &Action::new("X"));
        let _ = rx.try_recv();

        assert!(publisher.publish_snapshot(&json!({ "k": 1 })));
        let snapshot = rx.try_recv().expect("snapshot");
        assert_eq!(snapshot.kind(), types::STATE_SNAPSHOT);
        assert_eq!(snapshot.generation(), Some(1));
        assert_eq!(snapshot.payload(), Some(&json!({ "k": 1 })));
    }
}
