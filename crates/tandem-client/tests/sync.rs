//! Worker to mirror synchronization over the real patch stream.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tandem_client::{MirrorEffect, MirrorStore, TransportKind, events};
use tandem_store::{WorkerBuilder, WorkerHandle};
use tandem_types::{Action, EnvelopeSink, SinkClosed, types};
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(5);

fn todos(state: Value, action: &Action) -> Value {
    let mut items = state.as_array().cloned().unwrap_or_default();
    match action.kind() {
        "TODO_ADDED" => items.push(action.payload().cloned().unwrap_or(Value::Null)),
        "TODO_REMOVED" => {
            let id = action.payload_field("id");
            items.retain(|item| item.get("id") != id);
        }
        _ => {}
    }
    Value::Array(items)
}

/// Swallows one patch generation to simulate a lost message.
struct LossySink {
    tx: mpsc::UnboundedSender<Action>,
    lose: u64,
}

impl EnvelopeSink for LossySink {
    fn deliver(&self, action: Action) -> Result<(), SinkClosed> {
        if action.is(types::STATE_APPLY_DIFF) && action.generation() == Some(self.lose) {
            return Ok(());
        }
        self.tx.deliver(action)
    }
}

fn spawn_worker(outbound: Arc<dyn EnvelopeSink>) -> WorkerHandle {
    let (handle, _join) = WorkerBuilder::new()
        .reducers(|r| {
            r.register_extension("todos", todos);
        })
        .spawn(outbound);
    handle
}

async fn pump(mirror: &mut MirrorStore, rx: &mut mpsc::UnboundedReceiver<Action>) -> MirrorEffect {
    let action = tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for worker")
        .expect("worker outbound closed");
    mirror.receive(&action)
}

#[tokio::test]
async fn test_mirror_tracks_canonical_state() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let worker = spawn_worker(Arc::new(tx));
    let mut mirror = MirrorStore::new(Arc::new(worker.clone()));

    assert_eq!(pump(&mut mirror, &mut rx).await, MirrorEffect::FullSync { generation: 0 });

    mirror
        .dispatch(Action::new("TODO_ADDED").with_payload(json!({ "id": 1, "title": "milk" })))
        .expect("forward");
    mirror
        .dispatch(Action::new("TODO_ADDED").with_payload(json!({ "id": 2, "title": "eggs" })))
        .expect("forward");
    mirror
        .dispatch(Action::new("TODO_REMOVED").with_payload(json!({ "id": 1 })))
        .expect("forward");

    for generation in 1..=3 {
        assert_eq!(pump(&mut mirror, &mut rx).await, MirrorEffect::Updated { generation });
    }

    let canonical = worker.snapshot().await.expect("snapshot");
    assert_eq!(*mirror.state(), *canonical);
    assert_eq!(mirror.state()["todos"], json!([{ "id": 2, "title": "eggs" }]));
    worker.shutdown();
}

#[tokio::test]
async fn test_lost_patch_triggers_resync() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let worker = spawn_worker(Arc::new(LossySink { tx, lose: 2 }));
    let mut mirror = MirrorStore::new(Arc::new(worker.clone()));
    pump(&mut mirror, &mut rx).await;

    for id in 1..=3 {
        worker
            .dispatch(Action::new("TODO_ADDED").with_payload(json!({ "id": id })))
            .expect("dispatch");
    }

    assert_eq!(pump(&mut mirror, &mut rx).await, MirrorEffect::Updated { generation: 1 });
    // Generation 2 never arrives; 3 is out of order.
    assert_eq!(pump(&mut mirror, &mut rx).await, MirrorEffect::NeedsResync);
    assert_eq!(mirror.state()["todos"], json!([{ "id": 1 }]));

    worker.request_resync().expect("resync");
    assert_eq!(pump(&mut mirror, &mut rx).await, MirrorEffect::FullSync { generation: 3 });
    assert_eq!(
        mirror.state()["todos"],
        json!([{ "id": 1 }, { "id": 2 }, { "id": 3 }])
    );

    worker
        .dispatch(Action::new("TODO_REMOVED").with_payload(json!({ "id": 2 })))
        .expect("dispatch");
    assert_eq!(pump(&mut mirror, &mut rx).await, MirrorEffect::Updated { generation: 4 });
    assert_eq!(*mirror.state(), *worker.snapshot().await.expect("snapshot"));
    worker.shutdown();
}

#[tokio::test]
async fn test_socket_events_reach_mirror_as_connection_state() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let worker = spawn_worker(Arc::new(tx));
    let mut mirror = MirrorStore::new(Arc::new(worker.clone()));
    pump(&mut mirror, &mut rx).await;

    worker
        .deliver(events::socket_open(TransportKind::LongPoll))
        .expect("deliver");
    pump(&mut mirror, &mut rx).await;
    assert_eq!(mirror.state()["connection"]["status"], json!("open"));
    assert_eq!(mirror.state()["connection"]["transport"], json!("long-poll"));

    worker
        .deliver(events::socket_close(TransportKind::LongPoll, true))
        .expect("deliver");
    pump(&mut mirror, &mut rx).await;
    assert_eq!(mirror.state()["connection"]["status"], json!("reconnecting"));
    worker.shutdown();
}
