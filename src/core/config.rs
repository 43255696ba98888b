//! Configuration management for the MCP server.
//!
//! Everything is read once at startup from `MCP_`-prefixed environment
//! variables (a `.env` file is honoured for local development). Credentials
//! are not part of the configuration; service modules resolve them through
//! the secret store.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{info, warn};

use super::transport::TransportConfig;
use crate::domains::tools::Selection;

/// Main configuration structure for the MCP server.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server identification and metadata.
    pub server: ServerConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Transport configuration.
    pub transport: TransportConfig,

    /// Which service modules to activate.
    pub services: ServicesConfig,

    /// Invocation deadlines.
    pub dispatch: DispatchConfig,

    /// Shutdown behaviour.
    pub lifecycle: LifecycleConfig,

    /// Where credentials come from.
    pub secrets: SecretsConfig,
}

/// Server identification configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// The name of the server as reported to clients.
    pub name: String,

    /// The version of the server.
    pub version: String,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "trace").
    pub level: String,
}

/// Service selection.
#[derive(Debug, Clone, Default)]
pub struct ServicesConfig {
    /// Allow-list of module names, or all modules.
    pub selection: Selection,
}

/// Deadlines applied to tool calls.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Default per-invocation deadline.
    pub tool_timeout: Duration,

    /// Request timeout for backend HTTP clients.
    pub backend_timeout: Duration,
}

/// Shutdown behaviour.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// How long in-flight invocations may run once draining starts.
    pub shutdown_grace: Duration,
}

/// Secret lookup configuration.
#[derive(Debug, Clone, Default)]
pub struct SecretsConfig {
    /// Directory of mounted secret files, checked before the environment.
    pub dir: Option<PathBuf>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            tool_timeout: Duration::from_secs(30),
            backend_timeout: Duration::from_secs(25),
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                name: "unified-mcp-server".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
            transport: TransportConfig::default(),
            services: ServicesConfig::default(),
            dispatch: DispatchConfig::default(),
            lifecycle: LifecycleConfig::default(),
            secrets: SecretsConfig::default(),
        }
    }
}

impl Config {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables.
    ///
    /// Environment variables are expected to be prefixed with `MCP_`.
    /// For example: `MCP_SERVER_NAME`, `MCP_ENABLED_SERVICES`.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let mut config = Self::default();

        if let Some(name) = env_var("MCP_SERVER_NAME") {
            config.server.name = name;
        }

        if let Some(level) = env_var("MCP_LOG_LEVEL") {
            config.logging.level = level;
        }

        config.transport = TransportConfig::from_env();

        if let Some(raw) = env_var("MCP_ENABLED_SERVICES") {
            config.services.selection = Selection::parse(&raw);
            info!("Service selection: {}", config.services.selection);
        }

        if let Some(timeout) = env_secs("MCP_TOOL_TIMEOUT_SECS") {
            config.dispatch.tool_timeout = timeout;
        }

        if let Some(timeout) = env_secs("MCP_BACKEND_TIMEOUT_SECS") {
            config.dispatch.backend_timeout = timeout;
        }

        if let Some(grace) = env_secs("MCP_SHUTDOWN_GRACE_SECS") {
            config.lifecycle.shutdown_grace = grace;
        }

        if let Some(dir) = env_var("MCP_SECRETS_DIR") {
            config.secrets.dir = Some(PathBuf::from(dir));
            info!("Reading mounted secrets from {:?}", config.secrets.dir);
        }

        config
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Parse a positive number of seconds, ignoring malformed values.
fn env_secs(name: &str) -> Option<Duration> {
    let raw = env_var(name)?;
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Some(Duration::from_secs(secs)),
        _ => {
            warn!("Ignoring invalid {}={:?} (expected positive seconds)", name, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Mutex to ensure env var tests run serially
    static ENV_TEST_LOCK: Mutex<()> = Mutex::new(());

    const VARS: &[&str] = &[
        "MCP_ENABLED_SERVICES",
        "MCP_TOOL_TIMEOUT_SECS",
        "MCP_BACKEND_TIMEOUT_SECS",
        "MCP_SHUTDOWN_GRACE_SECS",
        "MCP_SECRETS_DIR",
    ];

    fn clear() {
        for var in VARS {
            unsafe {
                std::env::remove_var(var);
            }
        }
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.services.selection, Selection::All);
        assert_eq!(config.dispatch.tool_timeout, Duration::from_secs(30));
        assert_eq!(config.lifecycle.shutdown_grace, Duration::from_secs(10));
        assert!(config.secrets.dir.is_none());
    }

    #[test]
    fn test_values_from_env() {
        let _lock = ENV_TEST_LOCK.lock().unwrap();
        clear();
        unsafe {
            std::env::set_var("MCP_ENABLED_SERVICES", "linear, system");
            std::env::set_var("MCP_TOOL_TIMEOUT_SECS", "5");
            std::env::set_var("MCP_SHUTDOWN_GRACE_SECS", "2");
            std::env::set_var("MCP_SECRETS_DIR", "/run/secrets");
        }
        let config = Config::from_env();
        assert_eq!(
            config.services.selection,
            Selection::only(["linear", "system"])
        );
        assert_eq!(config.dispatch.tool_timeout, Duration::from_secs(5));
        assert_eq!(config.lifecycle.shutdown_grace, Duration::from_secs(2));
        assert_eq!(config.secrets.dir, Some(PathBuf::from("/run/secrets")));
        clear();
    }

    #[test]
    fn test_invalid_durations_fall_back() {
        let _lock = ENV_TEST_LOCK.lock().unwrap();
        clear();
        unsafe {
            std::env::set_var("MCP_TOOL_TIMEOUT_SECS", "soon");
            std::env::set_var("MCP_BACKEND_TIMEOUT_SECS", "0");
        }
        let config = Config::from_env();
        assert_eq!(config.dispatch.tool_timeout, Duration::from_secs(30));
        assert_eq!(config.dispatch.backend_timeout, Duration::from_secs(25));
        clear();
    }
}
