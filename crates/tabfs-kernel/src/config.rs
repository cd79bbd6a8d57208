//! Router configuration.
//!
//! Loaded from `~/.config/tabfs/config.toml` (or an explicit path). Every
//! field has a default, so a missing or partial file is fine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dispatch::DEFAULT_TIMEOUT;
use crate::transport::DEFAULT_MAX_FRAME_BYTES;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Which transport the server speaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Length-prefixed records on stdin/stdout (browser native messaging).
    #[default]
    Stdio,
    /// Length-prefixed records on a Unix socket, one connection at a time.
    Socket,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Milliseconds before a pending request is answered with ETIMEDOUT.
    pub timeout_ms: u64,

    pub transport: TransportKind,

    /// Socket path for [`TransportKind::Socket`]; see [`Config::socket_path`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<PathBuf>,

    /// Largest accepted record.
    pub max_frame_bytes: usize,

    /// `tracing` filter used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
            transport: TransportKind::default(),
            socket_path: None,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            log_filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Default config file location, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("tabfs").join("config.toml"))
    }

    /// Load from `path`, or from [`Config::default_path`] when `None`.
    ///
    /// A missing default file yields defaults; a missing explicit file is
    /// an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load_from(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load_from(&path),
                _ => {
                    tracing::debug!("no config file, using defaults");
                    Ok(Self::default())
                }
            },
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Configured socket path, or `tabfs.sock` in the runtime directory.
    pub fn socket_path(&self) -> PathBuf {
        self.socket_path.clone().unwrap_or_else(|| {
            dirs::runtime_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("tabfs.sock")
        })
    }
}
