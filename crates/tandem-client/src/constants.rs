//! Client configuration constants.
//!
//! Centralizes the defaults behind [`BridgeConfig`](crate::BridgeConfig).

use std::time::Duration;

/// Default server endpoint for local development.
pub const DEFAULT_URL: &str = "ws://127.0.0.1:8080/messaging";

/// Failed attempts per transport before falling back (or giving up).
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// First reconnect delay; doubles per attempt.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Reconnect delay ceiling.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Timeout for a single connection attempt. Stops the bridge from hanging
/// on SYN blackholes or stalled servers.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocket ping interval.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Delay between long-poll requests that came back empty.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How long a single long-poll request may be held open by the server.
pub const LONG_POLL_TIMEOUT: Duration = Duration::from_secs(30);

/// Outbound messages held while the bridge is not open.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 200;
