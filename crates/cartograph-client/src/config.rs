//! Client configuration
//!
//! Nothing here reads process-wide state implicitly: the environment and the
//! config file are only consulted by [`ClientConfig::load`] and
//! [`ClientConfig::load_from_file`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Environment variable overriding the socket location
pub const SOCKET_ENV: &str = "CARTOGRAPH_SOCKET";

/// Environment variable overriding the per-call timeout, in milliseconds
pub const TIMEOUT_ENV: &str = "CARTOGRAPH_TIMEOUT_MS";

const SOCKET_NAME: &str = "cartograph.sock";

/// Where the service listens, and how long each channel operation may take
///
/// Immutable once built; a `Transport` copies it at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    socket_path: PathBuf,
    timeout: Duration,
}

impl Endpoint {
    pub fn new(socket_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new(
            default_socket_path(),
            Duration::from_millis(default_timeout_ms()),
        )
    }
}

/// Client settings, loadable from `client.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Path to the service's Unix socket
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
    /// Bound on each connect, write and read
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// How long to wait for the service to answer a handshake at startup
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,
}

/// `<runtime dir>/cartograph.sock`, or `/tmp/cartograph.sock` without one
///
/// `CARTOGRAPH_SOCKET` is applied later by [`ClientConfig::with_overrides`].
pub fn default_socket_path() -> PathBuf {
    match dirs::runtime_dir() {
        Some(dir) => dir.join(SOCKET_NAME),
        None => Path::new("/tmp").join(SOCKET_NAME),
    }
}

fn default_timeout_ms() -> u64 {
    60_000
}

fn default_startup_timeout_ms() -> u64 {
    15_000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            timeout_ms: default_timeout_ms(),
            startup_timeout_ms: default_startup_timeout_ms(),
        }
    }
}

impl ClientConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::invalid_input(format!("invalid client config: {e}")))
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::invalid_input(format!(
                "cannot read client config {}: {e}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Default config file location: `<config dir>/cartograph/client.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("cartograph").join("client.toml"))
    }

    /// Load the default config file (if it exists), then apply environment overrides
    pub fn load() -> Result<Self> {
        let base = match Self::default_path() {
            Some(path) if path.exists() => {
                debug!(path = %path.display(), "Loading client config");
                Self::load_from_file(&path)?
            }
            _ => Self::default(),
        };
        base.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `CARTOGRAPH_SOCKET` / `CARTOGRAPH_TIMEOUT_MS` from `lookup`
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(SOCKET_ENV) {
            self.socket_path = PathBuf::from(path);
        }
        if let Some(raw) = lookup(TIMEOUT_ENV) {
            self.timeout_ms = raw.trim().parse().map_err(|_| {
                Error::invalid_input(format!("{TIMEOUT_ENV} must be milliseconds, got {raw:?}"))
            })?;
        }
        Ok(self)
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(&self.socket_path, Duration::from_millis(self.timeout_ms))
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }
}
