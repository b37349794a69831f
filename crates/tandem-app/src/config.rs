//! Host configuration, read from a RON file.
//!
//! Lookup order: an explicit `--config` path (must exist), then
//! `$XDG_CONFIG_HOME/tandem/config.ron` if present, then built-in defaults.
//!
//! ```ron
//! (
//!     connect: true,
//!     bridge: (
//!         url: "wss://example.test/messaging",
//!         max_retries: 3,
//!         outbound: queue(capacity: 50),
//!     ),
//! )
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tandem_client::BridgeConfig;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Start the transport bridge. Off means a purely local session.
    pub connect: bool,
    /// Print the mirrored state to stdout after every change.
    pub print_state: bool,
    pub bridge: BridgeConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            connect: true,
            print_state: true,
            bridge: BridgeConfig::default(),
        }
    }
}

/// `~/.config/tandem/config.ron` or the platform equivalent.
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("tandem").join("config.ron"))
}

impl AppConfig {
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(text)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ron(&text)
    }

    /// Load from `explicit`, else the default path if it exists, else defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            info!("loading config from {}", path.display());
            return Self::from_file(path);
        }

        match default_path() {
            Some(path) if path.exists() => {
                info!("loading config from {}", path.display());
                Self::from_file(&path)
            }
            _ => {
                debug!("no config file, using defaults");
                Ok(Self::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tandem_client::{OutboundPolicy, TransportKind};

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"(
                print_state: false,
                bridge: (
                    url: "wss://example.test/messaging",
                    max_retries: 3,
                    outbound: queue(capacity: 50),
                ),
            )"#
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert!(config.connect);
        assert!(!config.print_state);
        assert_eq!(config.bridge.url, "wss://example.test/messaging");
        assert_eq!(config.bridge.max_retries, 3);
        assert_eq!(config.bridge.outbound, OutboundPolicy::Queue { capacity: 50 });
        assert_eq!(config.bridge.transport, TransportKind::WebSocket);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = AppConfig::load(Some(&dir.path().join("absent.ron"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_bad_ron_is_reported() {
        let err = AppConfig::from_ron("(connect: maybe)").unwrap_err();
        assert!(matches!(err, ConfigError::Ron(_)));
    }
}
