//! Foreground side of tandem.
//!
//! Holds the [`MirrorStore`], a read-only copy of the worker's state kept
//! current by numbered patches, and the transport bridge that connects the
//! worker to a remote server over WebSocket with HTTP long-poll fallback.

pub mod bridge;
pub mod config;
pub mod constants;
pub mod events;
pub mod long_poll;
pub mod machine;
pub mod mirror;
pub mod transport;
pub mod websocket;

pub use bridge::{BridgeHandle, spawn_bridge};
pub use config::{BridgeConfig, OutboundPolicy, TransportKind};
pub use events::ConnectionStatus;
pub use machine::{BridgeState, ConnectionMachine, Fault, NextStep, backoff_delay};
pub use mirror::{MirrorEffect, MirrorError, MirrorStore};
pub use transport::{Connector, NetworkConnector, Transport, TransportError};
