//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables** — `LOCTL_LISTEN`, `LOCTL_BMC_HOST`,
//!    `LOCTL_BMC_PORT`, `LOCTL_BMC_USERNAME`, `LOCTL_BMC_PASSWORD`,
//!    `LOCTL_POLL_DELAY_MS`
//! 2. **Config file** — path via `--config <path>`, or `loctl.toml` in CWD
//! 3. **Compiled defaults** — see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:3547"
//! rate_limit_max_requests = 30
//! rate_limit_window_secs = 60
//!
//! [bmc]
//! host = "10.0.0.120"
//! port = 22
//! username = "Administrator"
//! password = "changeme"
//! settle_ms = 500
//! exec_timeout_ms = 10000
//! reconnect_delay_ms = 1000
//! reconnect_max_delay_ms = 30000
//!
//! [poller]
//! base_delay_ms = 1500
//!
//! [logging]
//! level = "info"
//! ```

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub bmc: BmcConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server and request-limit settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind (default `0.0.0.0:3547`).
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Requests allowed per rate-limit window (default 30).
    #[serde(default = "default_rate_limit_max_requests")]
    pub rate_limit_max_requests: u32,
    /// Rate-limit window length in seconds (default 60).
    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,
}

/// BMC endpoint, credentials, and session timing.
#[derive(Debug, Clone, Deserialize)]
pub struct BmcConfig {
    /// BMC hostname or IP. Override with `LOCTL_BMC_HOST`.
    #[serde(default)]
    pub host: String,
    /// SSH port (default 22). Override with `LOCTL_BMC_PORT`.
    #[serde(default = "default_bmc_port")]
    pub port: u16,
    /// SSH username. Override with `LOCTL_BMC_USERNAME`.
    #[serde(default)]
    pub username: String,
    /// SSH password. Override with `LOCTL_BMC_PASSWORD`.
    #[serde(default)]
    pub password: String,
    /// Grace period after the startup probes before the session is
    /// trusted to answer commands (default 500).
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// Per-command execution timeout in milliseconds (default 10 000).
    #[serde(default = "default_exec_timeout_ms")]
    pub exec_timeout_ms: u64,
    /// Initial delay between failed connection attempts (default 1 000).
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Backoff cap for failed connection attempts (default 30 000).
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
}

/// Background poller timing.
#[derive(Debug, Clone, Deserialize)]
pub struct PollerConfig {
    /// Base delay in milliseconds; the poll interval is twice this plus a
    /// fixed margin (default 1 500). Override with `LOCTL_POLL_DELAY_MS`.
    #[serde(default = "default_poll_base_delay_ms")]
    pub base_delay_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_listen() -> String {
    "0.0.0.0:3547".to_string()
}
fn default_rate_limit_max_requests() -> u32 {
    30
}
fn default_rate_limit_window_secs() -> u64 {
    60
}
fn default_bmc_port() -> u16 {
    22
}
fn default_settle_ms() -> u64 {
    500
}
fn default_exec_timeout_ms() -> u64 {
    10000
}
fn default_reconnect_delay_ms() -> u64 {
    1000
}
fn default_reconnect_max_delay_ms() -> u64 {
    30000
}
fn default_poll_base_delay_ms() -> u64 {
    1500
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            rate_limit_max_requests: default_rate_limit_max_requests(),
            rate_limit_window_secs: default_rate_limit_window_secs(),
        }
    }
}

impl Default for BmcConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_bmc_port(),
            username: String::new(),
            password: String::new(),
            settle_ms: default_settle_ms(),
            exec_timeout_ms: default_exec_timeout_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
        }
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_poll_base_delay_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, reads that file (panics on failure). Otherwise looks
    /// for `loctl.toml` in the current directory, falling back to compiled defaults.
    pub fn load(path: Option<&str>) -> Self {
        let mut config = if let Some(p) = path {
            let content = std::fs::read_to_string(p)
                .unwrap_or_else(|e| panic!("Failed to read config file {p}: {e}"));
            toml::from_str(&content)
                .unwrap_or_else(|e| panic!("Failed to parse config file {p}: {e}"))
        } else if Path::new("loctl.toml").exists() {
            let content =
                std::fs::read_to_string("loctl.toml").expect("Failed to read loctl.toml");
            toml::from_str(&content).expect("Failed to parse loctl.toml")
        } else {
            Config {
                server: ServerConfig::default(),
                bmc: BmcConfig::default(),
                poller: PollerConfig::default(),
                logging: LoggingConfig::default(),
            }
        };

        // Env var overrides
        if let Ok(listen) = std::env::var("LOCTL_LISTEN") {
            config.server.listen = listen;
        }
        if let Ok(host) = std::env::var("LOCTL_BMC_HOST") {
            config.bmc.host = host;
        }
        if let Ok(port) = std::env::var("LOCTL_BMC_PORT") {
            config.bmc.port = port
                .parse()
                .unwrap_or_else(|e| panic!("LOCTL_BMC_PORT {port:?} is not a port number: {e}"));
        }
        if let Ok(username) = std::env::var("LOCTL_BMC_USERNAME") {
            config.bmc.username = username;
        }
        if let Ok(password) = std::env::var("LOCTL_BMC_PASSWORD") {
            config.bmc.password = password;
        }
        if let Ok(delay) = std::env::var("LOCTL_POLL_DELAY_MS") {
            config.poller.base_delay_ms = delay.parse().unwrap_or_else(|e| {
                panic!("LOCTL_POLL_DELAY_MS {delay:?} is not a delay in ms: {e}")
            });
        }

        config
    }
}
