//! Actor-based transport bridge.
//!
//! Provides a `Send+Sync` [`BridgeHandle`]. The actor owns the live session,
//! the reconnect state machine and the outbound queue, and turns everything
//! that happens on the wire into envelopes delivered to the worker.
//!
//! ```text
//!   BridgeHandle (Clone)        mpsc      BridgeActor (tokio task)
//!   ┌─────────────────────┐  ────────▶  ┌──────────────────────────────┐
//!   │ .push(message)      │             │ ConnectionMachine + backoff  │
//!   │ .close()            │             │ Box<dyn Transport> session   │──▶ inbound sink
//!   │ .subscribe_status() │  ◀────────  │ outbound queue until OPEN    │    (websocketState*,
//!   └─────────────────────┘  broadcast  └──────────────────────────────┘     server messages)
//! ```
//!
//! `push` never fails. Messages pushed while no session is open are queued
//! or dropped per [`OutboundPolicy`]; the queue flushes in order on OPEN.
//! `close` ends the session for good, with no reconnect.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::Value;
use tandem_types::{Action, EnvelopeSink};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::{BridgeConfig, OutboundPolicy, TransportKind};
use crate::events::{self, ConnectionStatus};
use crate::machine::{ConnectionMachine, Fault, NextStep};
use crate::transport::{Connector, Transport};

const STATUS_CHANNEL_CAPACITY: usize = 64;

// ============================================================================
// Commands (internal)
// ============================================================================

enum BridgeCommand {
    Push(Value),
    Close,
}

// ============================================================================
// BridgeHandle
// ============================================================================

/// Handle to a running bridge. Cheap to clone.
#[derive(Clone)]
pub struct BridgeHandle {
    tx: mpsc::UnboundedSender<BridgeCommand>,
    status: broadcast::Sender<ConnectionStatus>,
    source_guid: Arc<str>,
}

impl BridgeHandle {
    /// Send `message` to the server, tagged with this bridge's source id.
    pub fn push(&self, message: Value) {
        if self.tx.send(BridgeCommand::Push(message)).is_err() {
            log::debug!("bridge stopped, dropping outbound message");
        }
    }

    /// Tear down the session without reconnecting.
    pub fn close(&self) {
        let _ = self.tx.send(BridgeCommand::Close);
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// Unique id for this bridge instance, sent with every outbound message.
    pub fn source_guid(&self) -> &str {
        &self.source_guid
    }

    pub fn is_stopped(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Start a bridge on the current runtime.
///
/// Connection events and inbound messages are delivered to `inbound`.
pub fn spawn_bridge(
    config: BridgeConfig,
    connector: Arc<dyn Connector>,
    inbound: Arc<dyn EnvelopeSink>,
) -> (BridgeHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (status, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
    let source_guid: Arc<str> = Uuid::new_v4().to_string().into();

    let actor = BridgeActor {
        machine: ConnectionMachine::new(&config),
        outbox: Outbox::new(config.outbound),
        config,
        connector,
        inbound,
        status: status.clone(),
        source_guid: source_guid.clone(),
    };
    let join = tokio::spawn(actor.run(rx));

    (
        BridgeHandle {
            tx,
            status,
            source_guid,
        },
        join,
    )
}

// ============================================================================
// Outbound queue (internal)
// ============================================================================

struct Outbox {
    policy: OutboundPolicy,
    frames: VecDeque<String>,
}

impl Outbox {
    fn new(policy: OutboundPolicy) -> Self {
        Self {
            policy,
            frames: VecDeque::new(),
        }
    }

    fn offer(&mut self, frame: String) {
        match self.policy {
            OutboundPolicy::Drop => log::debug!("bridge not open, dropping outbound message"),
            OutboundPolicy::Queue { capacity } => {
                if capacity == 0 {
                    return;
                }
                if self.frames.len() >= capacity {
                    self.frames.pop_front();
                    log::warn!("outbound queue full ({}), dropped oldest message", capacity);
                }
                self.frames.push_back(frame);
            }
        }
    }

    /// Put back a frame whose send failed, ahead of everything else.
    fn requeue(&mut self, frame: String) {
        if let OutboundPolicy::Queue { capacity } = self.policy {
            if self.frames.len() < capacity {
                self.frames.push_front(frame);
            }
        }
    }
}

// ============================================================================
// BridgeActor (internal)
// ============================================================================

enum SessionEnd {
    Requested,
    Fault(Fault, String),
}

struct BridgeActor {
    config: BridgeConfig,
    connector: Arc<dyn Connector>,
    inbound: Arc<dyn EnvelopeSink>,
    status: broadcast::Sender<ConnectionStatus>,
    machine: ConnectionMachine,
    outbox: Outbox,
    source_guid: Arc<str>,
}

impl BridgeActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<BridgeCommand>) {
        log::info!("bridge {} starting on {}", self.source_guid, self.config.transport);
        let mut delay = Duration::ZERO;

        loop {
            if !delay.is_zero() && !self.idle(delay, &mut rx).await {
                break;
            }

            let transport = self.machine.begin();
            self.emit(ConnectionStatus::Connecting {
                transport,
                attempt: self.machine.attempt(),
            });

            let step = match self.connect(transport, &mut rx).await {
                None => break,
                Some(Ok(session)) => {
                    self.machine.opened();
                    log::info!("bridge open on {}", transport);
                    self.emit(ConnectionStatus::Open { transport });
                    self.deliver(events::socket_open(transport));

                    match self.session(session, &mut rx).await {
                        SessionEnd::Requested => break,
                        SessionEnd::Fault(fault, reason) => self.on_fault(transport, fault, &reason),
                    }
                }
                Some(Err(reason)) => self.on_fault(transport, Fault::Error, &reason),
            };

            match step {
                NextStep::Retry {
                    transport,
                    attempt,
                    delay: backoff,
                } => {
                    delay = jittered(backoff);
                    log::info!("bridge reconnecting on {} in {:?} (attempt {})", transport, delay, attempt);
                    self.emit(ConnectionStatus::Reconnecting {
                        transport,
                        attempt,
                        delay,
                    });
                }
                NextStep::FallBack {
                    transport,
                    delay: backoff,
                } => {
                    delay = backoff;
                    log::warn!("bridge falling back to {}", transport);
                    self.emit(ConnectionStatus::FellBack { transport });
                }
                NextStep::GiveUp => {
                    let reason = format!("gave up after {} retries", self.config.max_retries);
                    log::error!("bridge {}; {} queued messages dropped", reason, self.outbox.frames.len());
                    self.emit(ConnectionStatus::Failed(reason));
                    return;
                }
                NextStep::Stop => break,
            }
        }

        self.machine.close();
        log::info!("bridge {} closed", self.source_guid);
        self.emit(ConnectionStatus::Closed);
    }

    /// Sleep through a backoff delay while still taking commands.
    /// Returns false if close was requested.
    async fn idle(&mut self, delay: Duration, rx: &mut mpsc::UnboundedReceiver<BridgeCommand>) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                command = rx.recv() => {
                    if !self.hold(command) {
                        return false;
                    }
                }
            }
        }
    }

    /// Run one connection attempt while still taking commands.
    /// `None` means close was requested.
    async fn connect(
        &mut self,
        transport: TransportKind,
        rx: &mut mpsc::UnboundedReceiver<BridgeCommand>,
    ) -> Option<Result<Box<dyn Transport>, String>> {
        let connector = self.connector.clone();
        let config = self.config.clone();
        let attempt = async move {
            match tokio::time::timeout(config.connect_timeout(), connector.connect(transport, &config)).await {
                Ok(Ok(session)) => Ok(session),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(crate::transport::TransportError::Timeout.to_string()),
            }
        };
        tokio::pin!(attempt);

        loop {
            tokio::select! {
                result = &mut attempt => return Some(result),
                command = rx.recv() => {
                    if !self.hold(command) {
                        return None;
                    }
                }
            }
        }
    }

    /// Pump one open session until it ends.
    async fn session(
        &mut self,
        mut transport: Box<dyn Transport>,
        rx: &mut mpsc::UnboundedReceiver<BridgeCommand>,
    ) -> SessionEnd {
        while let Some(frame) = self.outbox.frames.pop_front() {
            if let Err(e) = transport.send(frame.clone()).await {
                self.outbox.requeue(frame);
                return SessionEnd::Fault(Fault::Error, e.to_string());
            }
        }

        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval());
        heartbeat.tick().await;

        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(BridgeCommand::Push(message)) => {
                        let frame = events::outbound_frame(&self.source_guid, message);
                        if let Err(e) = transport.send(frame.clone()).await {
                            self.outbox.requeue(frame);
                            return SessionEnd::Fault(Fault::Error, e.to_string());
                        }
                    }
                    Some(BridgeCommand::Close) | None => {
                        transport.close().await;
                        return SessionEnd::Requested;
                    }
                },
                inbound = transport.recv() => match inbound {
                    Ok(Some(frame)) => match events::normalize_inbound(&frame, &self.source_guid) {
                        Some(action) => self.deliver(action),
                        None => log::trace!("inbound frame skipped"),
                    },
                    Ok(None) => return SessionEnd::Fault(Fault::Close, "closed by peer".into()),
                    Err(e) => return SessionEnd::Fault(Fault::Error, e.to_string()),
                },
                _ = heartbeat.tick() => {
                    if let Err(e) = transport.heartbeat().await {
                        return SessionEnd::Fault(Fault::Error, e.to_string());
                    }
                }
            }
        }
    }

    /// Handle a command while no session is open. False means stop.
    fn hold(&mut self, command: Option<BridgeCommand>) -> bool {
        match command {
            Some(BridgeCommand::Push(message)) => {
                let frame = events::outbound_frame(&self.source_guid, message);
                self.outbox.offer(frame);
                true
            }
            Some(BridgeCommand::Close) | None => false,
        }
    }

    fn on_fault(&mut self, transport: TransportKind, fault: Fault, reason: &str) -> NextStep {
        let attempt = self.machine.attempt();
        let step = self.machine.fault(fault);
        let reconnecting = matches!(step, NextStep::Retry { .. } | NextStep::FallBack { .. });

        match fault {
            Fault::Error => {
                log::warn!("bridge error on {}: {}", transport, reason);
                self.deliver(events::socket_error(transport, attempt, reason));
            }
            Fault::Close => {
                log::info!("bridge closed on {}: {}", transport, reason);
                self.deliver(events::socket_close(transport, reconnecting));
            }
        }
        step
    }

    fn deliver(&self, action: Action) {
        if self.inbound.deliver(action).is_err() {
            log::warn!("inbound sink closed, dropping bridge event");
        }
    }

    fn emit(&self, status: ConnectionStatus) {
        // No subscribers is fine.
        let _ = self.status.send(status);
    }
}

/// Add up to 10% random spread so many clients don't reconnect in lockstep.
fn jittered(delay: Duration) -> Duration {
    let spread = (delay.as_millis() / 10) as u64;
    if spread == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
}
