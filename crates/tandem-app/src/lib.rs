//! Line-oriented host for tandem.
//!
//! Reads envelopes as JSON lines, drives them through a worker, and prints
//! the mirrored state after each change. Ships with a small notes domain and
//! a `system`/`socket` service pair so the whole pipeline can be exercised
//! from a terminal.

pub mod config;
pub mod host;
pub mod notes;
pub mod services;

pub use config::{AppConfig, ConfigError};
pub use host::{Host, HostError};
