//! Configuration file support for punch-rendezvous.
//!
//! Values are layered: built-in defaults, then the TOML file, then CLI flags.
//!
//! ```toml
//! bind = "0.0.0.0:9988"
//! idle_timeout_secs = 300   # before enrollment only; 0 disables it
//! io_timeout_secs = 10
//! outbound_queue = 32
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::signaling::session::SessionLimits;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 9988;

/// Default listen address: every interface on [`DEFAULT_PORT`].
pub fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT))
}

/// Default bound on waiting for an unenrolled peer's next operation, in seconds.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;

/// Default bound on payload reads and on every write, in seconds.
pub const DEFAULT_IO_TIMEOUT_SECS: u64 = 10;

/// Default capacity of each connection's outbound queue.
pub const DEFAULT_OUTBOUND_QUEUE: usize = 32;

/// Server configuration as read from TOML. Every key is optional.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub bind: Option<String>,
    pub idle_timeout_secs: Option<u64>,
    pub io_timeout_secs: Option<u64>,
    pub outbound_queue: Option<usize>,
}

/// Resolved server configuration (all values finalized).
#[derive(Debug, Clone)]
pub struct ResolvedServerConfig {
    pub bind: SocketAddr,
    /// `None` means a silent peer may hold its connection indefinitely.
    pub idle_timeout: Option<Duration>,
    pub io_timeout: Duration,
    pub outbound_queue: usize,
}

impl ResolvedServerConfig {
    pub fn session_limits(&self) -> SessionLimits {
        SessionLimits {
            idle_timeout: self.idle_timeout,
            io_timeout: self.io_timeout,
            outbound_queue: self.outbound_queue,
        }
    }
}

impl Default for ResolvedServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            idle_timeout: Some(Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS)),
            io_timeout: Duration::from_secs(DEFAULT_IO_TIMEOUT_SECS),
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
        }
    }
}

/// Builder for server configuration with layered overrides.
#[derive(Default)]
pub struct ServerConfigBuilder {
    bind: Option<String>,
    idle_timeout_secs: Option<u64>,
    io_timeout_secs: Option<u64>,
    outbound_queue: Option<usize>,
}

impl ServerConfigBuilder {
    /// Create a new empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply default values (lowest priority).
    pub fn apply_defaults(mut self) -> Self {
        self.bind = Some(default_bind().to_string());
        self.idle_timeout_secs = Some(DEFAULT_IDLE_TIMEOUT_SECS);
        self.io_timeout_secs = Some(DEFAULT_IO_TIMEOUT_SECS);
        self.outbound_queue = Some(DEFAULT_OUTBOUND_QUEUE);
        self
    }

    /// Apply values from TOML config (middle priority).
    pub fn apply_config(mut self, config: Option<&ServerConfig>) -> Self {
        if let Some(cfg) = config {
            if cfg.bind.is_some() {
                self.bind = cfg.bind.clone();
            }
            if cfg.idle_timeout_secs.is_some() {
                self.idle_timeout_secs = cfg.idle_timeout_secs;
            }
            if cfg.io_timeout_secs.is_some() {
                self.io_timeout_secs = cfg.io_timeout_secs;
            }
            if cfg.outbound_queue.is_some() {
                self.outbound_queue = cfg.outbound_queue;
            }
        }
        self
    }

    /// Apply CLI arguments (highest priority).
    /// Only non-None values override.
    pub fn apply_cli(
        mut self,
        bind: Option<String>,
        idle_timeout_secs: Option<u64>,
        io_timeout_secs: Option<u64>,
    ) -> Self {
        if bind.is_some() {
            self.bind = bind;
        }
        if idle_timeout_secs.is_some() {
            self.idle_timeout_secs = idle_timeout_secs;
        }
        if io_timeout_secs.is_some() {
            self.io_timeout_secs = io_timeout_secs;
        }
        self
    }

    /// Build the final resolved configuration.
    pub fn build(self) -> Result<ResolvedServerConfig> {
        let bind_str = self.bind.unwrap_or_else(|| default_bind().to_string());
        let bind: SocketAddr = bind_str.parse().with_context(|| {
            format!(
                "Invalid 'bind' address '{}'. Expected format: IP:PORT (e.g., 0.0.0.0:9988)",
                bind_str
            )
        })?;

        let idle_timeout = match self.idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        let io_timeout_secs = self.io_timeout_secs.unwrap_or(DEFAULT_IO_TIMEOUT_SECS);
        if io_timeout_secs == 0 {
            anyhow::bail!("'io_timeout_secs' must be greater than 0");
        }

        let outbound_queue = self.outbound_queue.unwrap_or(DEFAULT_OUTBOUND_QUEUE);
        if outbound_queue == 0 {
            anyhow::bail!("'outbound_queue' must be greater than 0");
        }

        Ok(ResolvedServerConfig {
            bind,
            idle_timeout,
            io_timeout: Duration::from_secs(io_timeout_secs),
            outbound_queue,
        })
    }
}

// ============================================================================
// Config Loading
// ============================================================================

/// Expand tilde (~) in paths to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    if let Some(stripped) = path_str.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    } else if path_str == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    path.to_path_buf()
}

/// Load configuration from a TOML file.
fn load_config<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve the default server config path (~/.config/punch-rendezvous/server.toml).
fn default_server_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("punch-rendezvous").join("server.toml"))
}

/// Load server configuration from an explicit path, or from default location.
///
/// - `path`: Some(path) loads from the specified path (tilde-expanded); it must exist
/// - `path`: None loads the default file if present, otherwise returns `Ok(None)`
pub fn load_server_config(path: Option<&Path>) -> Result<Option<ServerConfig>> {
    match path {
        Some(p) => load_config(&expand_tilde(p)).map(Some),
        None => match default_server_config_path() {
            Some(default) if default.is_file() => {
                log::debug!("Using config file {}", default.display());
                load_config(&default).map(Some)
            }
            _ => Ok(None),
        },
    }
}
