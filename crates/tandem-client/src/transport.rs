//! The seam between the bridge and a concrete wire.
//!
//! A [`Transport`] is one live session. A [`Connector`] opens sessions; the
//! bridge asks it for a fresh one on every (re)connect, so a transport never
//! has to know how to revive itself.

use async_trait::async_trait;

use crate::config::{BridgeConfig, TransportKind};
use crate::long_poll::LongPollTransport;
use crate::websocket::WebSocketTransport;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("connect timed out")]
    Timeout,
    #[error("send failed: {0}")]
    Send(String),
    #[error("receive failed: {0}")]
    Receive(String),
    #[error("unexpected response: {0}")]
    Protocol(String),
}

/// One live duplex session carrying text frames.
#[async_trait]
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    async fn send(&mut self, frame: String) -> Result<(), TransportError>;

    /// Next inbound frame, or `None` once the peer has closed.
    ///
    /// Must be cancel-safe: the bridge races it against outbound commands.
    async fn recv(&mut self) -> Result<Option<String>, TransportError>;

    /// Keep-alive hook, called on the configured interval.
    async fn heartbeat(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn close(&mut self);
}

/// Opens sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        kind: TransportKind,
        config: &BridgeConfig,
    ) -> Result<Box<dyn Transport>, TransportError>;
}

/// Opens real network sessions: WebSocket or HTTP long-poll.
#[derive(Debug, Default, Clone, Copy)]
pub struct NetworkConnector;

#[async_trait]
impl Connector for NetworkConnector {
    async fn connect(
        &self,
        kind: TransportKind,
        config: &BridgeConfig,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let endpoint = config.endpoint(kind);
        match kind {
            TransportKind::WebSocket => {
                let transport = WebSocketTransport::connect(&endpoint).await?;
                Ok(Box::new(transport))
            }
            TransportKind::LongPoll => {
                let transport = LongPollTransport::connect(&endpoint, config.poll_interval()).await?;
                Ok(Box::new(transport))
            }
        }
    }
}
