//! Connection state machine for the transport bridge.
//!
//! Pure bookkeeping, no I/O: the bridge actor reports what happened and the
//! machine says what to do next.
//!
//! ```text
//!   DISCONNECTED ──begin──▶ CONNECTING ──opened──▶ OPEN
//!                               ▲                   │ fault
//!                               │  Retry / FallBack ▼
//!                               └──────────── ERROR | CLOSED
//!                                                   │ retries exhausted, no fallback
//!                                                   ▼
//!                                                GiveUp
//! ```
//!
//! `attempt` counts consecutive faults on the current transport since it
//! last reached OPEN. When it hits `max_retries` the machine switches to the
//! fallback transport once; when that is exhausted too it gives up. An
//! explicit [`close`](ConnectionMachine::close) always wins: later faults
//! produce [`NextStep::Stop`], never a reconnect.

use std::time::Duration;

use crate::config::{BridgeConfig, TransportKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BridgeState {
    Disconnected,
    Connecting,
    Open,
    Error,
    Closed,
}

/// How a session or attempt ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    Error,
    Close,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NextStep {
    /// Reconnect on the same transport after `delay`.
    Retry {
        transport: TransportKind,
        attempt: u32,
        delay: Duration,
    },
    /// Switch to the fallback transport after `delay`.
    FallBack {
        transport: TransportKind,
        delay: Duration,
    },
    /// Every transport exhausted its retries.
    GiveUp,
    /// Close was requested; do nothing further.
    Stop,
}

/// Exponential backoff: `base * 2^(attempt-1)`, capped at `max`.
pub fn backoff_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exponent).min(max)
}

#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: BridgeState,
    transport: TransportKind,
    fallback: Option<TransportKind>,
    attempt: u32,
    max_retries: u32,
    backoff_base: Duration,
    backoff_max: Duration,
    close_requested: bool,
}

impl ConnectionMachine {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            state: BridgeState::Disconnected,
            transport: config.transport,
            fallback: config.fallback.filter(|kind| *kind != config.transport),
            attempt: 0,
            max_retries: config.max_retries,
            backoff_base: config.backoff_base(),
            backoff_max: config.backoff_max(),
            close_requested: false,
        }
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Consecutive faults on the current transport.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_close_requested(&self) -> bool {
        self.close_requested
    }

    /// Start a connection attempt; returns the transport to use.
    pub fn begin(&mut self) -> TransportKind {
        if !self.close_requested {
            self.state = BridgeState::Connecting;
        }
        self.transport
    }

    pub fn opened(&mut self) {
        self.state = BridgeState::Open;
        self.attempt = 0;
    }

    /// Record a fault and decide what comes next.
    pub fn fault(&mut self, fault: Fault) -> NextStep {
        if self.close_requested {
            self.state = BridgeState::Closed;
            return NextStep::Stop;
        }

        if self.attempt < self.max_retries {
            self.attempt += 1;
            self.state = BridgeState::Connecting;
            return NextStep::Retry {
                transport: self.transport,
                attempt: self.attempt,
                delay: backoff_delay(self.backoff_base, self.backoff_max, self.attempt),
            };
        }

        if let Some(fallback) = self.fallback.take() {
            self.transport = fallback;
            self.attempt = 0;
            self.state = BridgeState::Connecting;
            return NextStep::FallBack {
                transport: fallback,
                delay: self.backoff_base,
            };
        }

        self.state = match fault {
            Fault::Error => BridgeState::Error,
            Fault::Close => BridgeState::Closed,
        };
        NextStep::GiveUp
    }

    /// Explicit teardown. No reconnect follows.
    pub fn close(&mut self) {
        self.close_requested = true;
        self.state = BridgeState::Closed;
    }
}
