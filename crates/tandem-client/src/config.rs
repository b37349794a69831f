//! Bridge configuration, supplied once at construction.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::EnumString;

use crate::constants::*;

/// Which wire a session runs over.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum TransportKind {
    /// Full-duplex streaming.
    #[serde(rename = "websocket")]
    #[strum(serialize = "websocket", serialize = "web-socket", serialize = "ws")]
    WebSocket,
    /// Degraded HTTP polling.
    #[serde(rename = "long-poll")]
    #[strum(serialize = "long-poll", serialize = "long-polling", serialize = "http")]
    LongPoll,
}

impl TransportKind {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::WebSocket => "websocket",
            TransportKind::LongPoll => "long-poll",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What `push` does with a message while no session is open.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboundPolicy {
    /// Hold up to `capacity` messages, dropping the oldest beyond that.
    Queue { capacity: usize },
    /// Discard immediately.
    Drop,
}

impl Default for OutboundPolicy {
    fn default() -> Self {
        OutboundPolicy::Queue {
            capacity: OUTBOUND_QUEUE_CAPACITY,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub url: String,
    /// Long-poll endpoint. Derived from `url` when absent.
    pub long_poll_url: Option<String>,
    pub transport: TransportKind,
    /// Used once the primary transport exhausts its retries without opening.
    pub fallback: Option<TransportKind>,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub connect_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub poll_interval_ms: u64,
    pub outbound: OutboundPolicy,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            long_poll_url: None,
            transport: TransportKind::WebSocket,
            fallback: Some(TransportKind::LongPoll),
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base_ms: DEFAULT_BACKOFF_BASE.as_millis() as u64,
            backoff_max_ms: DEFAULT_BACKOFF_MAX.as_millis() as u64,
            connect_timeout_ms: CONNECT_TIMEOUT.as_millis() as u64,
            heartbeat_interval_ms: HEARTBEAT_INTERVAL.as_millis() as u64,
            poll_interval_ms: POLL_INTERVAL.as_millis() as u64,
            outbound: OutboundPolicy::default(),
        }
    }
}

impl BridgeConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Endpoint for `kind`: the configured url, or for long-poll the
    /// explicit override or the url with its scheme mapped to http(s).
    pub fn endpoint(&self, kind: TransportKind) -> String {
        match kind {
            TransportKind::WebSocket => self.url.clone(),
            TransportKind::LongPoll => self.long_poll_url.clone().unwrap_or_else(|| {
                if let Some(rest) = self.url.strip_prefix("wss://") {
                    format!("https://{rest}")
                } else if let Some(rest) = self.url.strip_prefix("ws://") {
                    format!("http://{rest}")
                } else {
                    self.url.clone()
                }
            }),
        }
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Never zero: interval timers panic on a zero period.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_kind_aliases() {
        assert_eq!(TransportKind::from_str("WS"), Some(TransportKind::WebSocket));
        assert_eq!(TransportKind::from_str("long-polling"), Some(TransportKind::LongPoll));
        assert_eq!(TransportKind::from_str("carrier-pigeon"), None);
        assert_eq!(TransportKind::LongPoll.to_string(), "long-poll");
    }

    #[test]
    fn test_long_poll_endpoint_derivation() {
        let config = BridgeConfig::new("wss://example.test/messaging");
        assert_eq!(
            config.endpoint(TransportKind::LongPoll),
            "https://example.test/messaging"
        );

        let config = BridgeConfig {
            long_poll_url: Some("http://poll.test/".into()),
            ..BridgeConfig::new("ws://example.test")
        };
        assert_eq!(config.endpoint(TransportKind::LongPoll), "http://poll.test/");
        assert_eq!(config.endpoint(TransportKind::WebSocket), "ws://example.test");
    }

    #[test]
    fn test_serde_defaults_fill_gaps() {
        let config: BridgeConfig =
            serde_json::from_str(r#"{"url":"ws://x","outbound":"drop"}"#).expect("parse");
        assert_eq!(config.url, "ws://x");
        assert_eq!(config.outbound, OutboundPolicy::Drop);
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.fallback, Some(TransportKind::LongPoll));
    }
}
