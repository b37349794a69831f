//! Wires the worker, the mirror and the bridge into one event loop.
//!
//! ```text
//!   input lines ──▶ MirrorStore.dispatch ──▶ WorkerHandle
//!                        ▲                      │ STATE_SNAPSHOT / STATE_APPLY_DIFF
//!                        └──── receive ◀────────┘
//!   BridgeHandle ──websocketState* / server messages──▶ WorkerHandle
//!   socket.push (service) ──▶ BridgeHandle
//! ```
//!
//! Each input line is one JSON envelope. Every state change is written to
//! the output as one line of JSON when `print_state` is on.

use std::sync::Arc;

use tandem_client::{BridgeHandle, Connector, MirrorEffect, MirrorError, MirrorStore, spawn_bridge};
use tandem_store::{WorkerBuilder, WorkerError, WorkerHandle};
use tandem_types::Action;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::{notes, services};

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Worker(#[from] WorkerError),
    #[error(transparent)]
    Mirror(#[from] MirrorError),
    #[error("worker stopped: {0}")]
    WorkerFailed(String),
}

pub struct Host {
    worker: WorkerHandle,
    worker_join: JoinHandle<()>,
    worker_rx: mpsc::UnboundedReceiver<Action>,
    mirror: MirrorStore,
    bridge: Option<(BridgeHandle, JoinHandle<()>)>,
    bridge_rx: mpsc::UnboundedReceiver<Action>,
    print_state: bool,
}

impl Host {
    /// Start the worker and, if configured, the bridge.
    pub fn start(config: &AppConfig, connector: Arc<dyn Connector>) -> Self {
        let (bridge_tx, bridge_rx) = mpsc::unbounded_channel();
        let bridge = config
            .connect
            .then(|| spawn_bridge(config.bridge.clone(), connector, Arc::new(bridge_tx)));

        let (worker_tx, worker_rx) = mpsc::unbounded_channel();
        let (worker, worker_join) = WorkerBuilder::new()
            .reducers(notes::register_reducers)
            .handlers(Arc::new(notes::handlers()))
            .services(Arc::new(services::registry(bridge.as_ref().map(|(h, _)| h.clone()))))
            .undo_factories(notes::undo_registry())
            .spawn(Arc::new(worker_tx));

        let mirror = MirrorStore::new(Arc::new(worker.clone()));
        info!("host started (bridge {})", if bridge.is_some() { "on" } else { "off" });

        Self {
            worker,
            worker_join,
            worker_rx,
            mirror,
            bridge,
            bridge_rx,
            print_state: config.print_state,
        }
    }

    pub fn mirror(&self) -> &MirrorStore {
        &self.mirror
    }

    /// Run until the input ends or the worker fails.
    pub async fn run<R, W>(&mut self, input: R, mut output: W) -> Result<(), HostError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();

        loop {
            tokio::select! {
                line = lines.next_line() => match line? {
                    Some(line) => self.on_input(&line)?,
                    None => break,
                },
                Some(action) = self.worker_rx.recv() => self.on_worker(&action, &mut output).await?,
                Some(event) = self.bridge_rx.recv() => {
                    debug!("bridge -> worker: {}", event.kind());
                    self.worker.dispatch(event)?;
                }
            }
        }

        self.drain(&mut output).await
    }

    /// Let the worker finish what the input queued, then apply its output.
    async fn drain<W: AsyncWrite + Unpin>(&mut self, output: &mut W) -> Result<(), HostError> {
        match self.worker.settle().await {
            Ok(_) => {
                while let Ok(action) = self.worker_rx.try_recv() {
                    self.on_worker(&action, output).await?;
                }
                Ok(())
            }
            Err(e) => {
                // Stopped worker: read up to its failure report.
                while let Some(action) = self.worker_rx.recv().await {
                    self.on_worker(&action, output).await?;
                }
                Err(e.into())
            }
        }
    }

    fn on_input(&mut self, line: &str) -> Result<(), HostError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }
        match Action::from_json(line) {
            Ok(action) => {
                self.mirror.dispatch(action)?;
            }
            Err(e) => warn!("ignoring input line: {}", e),
        }
        Ok(())
    }

    async fn on_worker<W: AsyncWrite + Unpin>(
        &mut self,
        action: &Action,
        output: &mut W,
    ) -> Result<(), HostError> {
        match self.mirror.receive(action) {
            MirrorEffect::FullSync { .. } | MirrorEffect::Updated { .. } => {
                if self.print_state {
                    let mut line = serde_json::to_vec(&*self.mirror.state())?;
                    line.push(b'\n');
                    output.write_all(&line).await?;
                    output.flush().await?;
                }
            }
            MirrorEffect::NeedsResync => self.worker.request_resync()?,
            MirrorEffect::WorkerFailed(message) => return Err(HostError::WorkerFailed(message)),
            MirrorEffect::Ignored | MirrorEffect::Forwarded | MirrorEffect::AwaitingResync => {}
        }
        Ok(())
    }

    /// Close the bridge and stop the worker.
    pub async fn shutdown(self) {
        if let Some((bridge, join)) = self.bridge {
            bridge.close();
            let _ = join.await;
        }
        self.worker.shutdown();
        let _ = self.worker_join.await;
        info!("host stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use tandem_client::NetworkConnector;

    fn offline() -> AppConfig {
        AppConfig {
            connect: false,
            ..AppConfig::default()
        }
    }

    fn lines(text: &str) -> &[u8] {
        text.as_bytes()
    }

    fn last_state(output: &[u8]) -> Value {
        let text = std::str::from_utf8(output).unwrap();
        serde_json::from_str(text.lines().last().expect("some output")).unwrap()
    }

    #[tokio::test]
    async fn test_routed_commands_update_the_mirror() {
        let mut host = Host::start(&offline(), Arc::new(NetworkConnector));
        let input = concat!(
            r#"{"type":"ROUTE_TO_WORKER_ACTION","payload":{"id":1,"text":"milk"},"meta":{"workerImpl":"notes","name":"add"}}"#,
            "\n",
            "not an envelope\n",
            r#"{"type":"ROUTE_TO_WORKER_ACTION","payload":{"id":2,"text":"eggs"},"meta":{"workerImpl":"notes","name":"add"}}"#,
            "\n",
            r#"{"type":"UNDO","payload":{"undoScope":"notes"}}"#,
            "\n",
        );

        let mut output = Vec::new();
        host.run(lines(input), &mut output).await.unwrap();

        let state = last_state(&output);
        assert_eq!(state["notes"], json!({ "1": "milk" }));
        assert_eq!(state["undoActionHistory"]["notes"], json!({ "undos": 1, "redos": 1 }));
        assert_eq!(*host.mirror().state(), *host.worker.snapshot().await.unwrap());
        host.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_requests_finish_before_input_ends() {
        for _ in 0..20 {
            let mut host = Host::start(&offline(), Arc::new(NetworkConnector));
            let input = concat!(
                r#"{"type":"DATA_REQUEST","payload":{"service":"system","name":"ping","params":[]}}"#,
                "\n",
            );

            let mut output = Vec::new();
            host.run(lines(input), &mut output).await.unwrap();

            let state = last_state(&output);
            assert_eq!(state["requests"]["system_ping"]["loading"], json!(false));
            assert_eq!(state["requests"]["system_ping"]["result"], json!("pong"));
            host.shutdown().await;
        }
    }

    #[tokio::test]
    async fn test_reserved_server_frames_leave_the_worker_running() {
        let mut host = Host::start(&offline(), Arc::new(NetworkConnector));
        let frame = tandem_client::events::normalize_inbound(r#"{"type":"ROUTE_TO_WORKER_ACTION"}"#, "me")
            .expect("wrapped");
        host.worker.dispatch(frame).unwrap();

        let mut output = Vec::new();
        host.run(lines(""), &mut output).await.unwrap();
        assert!(!host.worker.is_closed());
        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_handler_stops_the_host() {
        let mut host = Host::start(&offline(), Arc::new(NetworkConnector));
        let input = concat!(
            r#"{"type":"ROUTE_TO_WORKER_ACTION","meta":{"workerImpl":"notes","name":"missing"}}"#,
            "\n",
        );

        let mut output = Vec::new();
        let err = host.run(lines(input), &mut output).await.unwrap_err();
        assert!(
            matches!(&err, HostError::WorkerFailed(m) if m.contains("notes") && m.contains("missing")),
            "{err}"
        );
        host.shutdown().await;
    }
}
