//! Transport configuration types.

use serde::{Deserialize, Serialize};

/// Transport configuration options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// HTTP transport with JSON-RPC over POST plus health endpoints.
    Http(HttpConfig),

    /// Standard input/output transport for local MCP clients.
    #[cfg(feature = "stdio")]
    Stdio,
}

/// HTTP transport configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Port number to listen on (0 picks a free port).
    pub port: u16,

    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Path for JSON-RPC endpoint.
    #[serde(default = "default_rpc_path")]
    pub rpc_path: String,

    /// Enable CORS for browser clients.
    #[serde(default = "default_cors")]
    pub enable_cors: bool,
}

const DEFAULT_PORT: u16 = 8080;

fn default_host() -> String {
    "127.0.0.1".to_string()
}

/// Hosting platforms that inject `PORT` expect the server on every interface.
fn platform_host() -> String {
    "0.0.0.0".to_string()
}

fn default_rpc_path() -> String {
    "/mcp".to_string()
}

fn default_cors() -> bool {
    true
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::Http(HttpConfig::default())
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            host: default_host(),
            rpc_path: default_rpc_path(),
            enable_cors: default_cors(),
        }
    }
}

impl HttpConfig {
    /// `host:port` string to bind.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Read HTTP settings through `var`.
    ///
    /// `MCP_HTTP_PORT` wins over the platform-provided `PORT`; when only
    /// `PORT` is set the default host becomes `0.0.0.0`.
    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let platform_port = var("PORT").and_then(|p| p.trim().parse::<u16>().ok());
        let port = var("MCP_HTTP_PORT")
            .and_then(|p| p.trim().parse().ok())
            .or(platform_port)
            .unwrap_or(DEFAULT_PORT);

        let host = var("MCP_HTTP_HOST").unwrap_or_else(|| {
            if platform_port.is_some() {
                platform_host()
            } else {
                default_host()
            }
        });

        let mut rpc_path = var("MCP_HTTP_PATH").unwrap_or_else(default_rpc_path);
        if !rpc_path.starts_with('/') {
            rpc_path.insert(0, '/');
        }

        let enable_cors = var("MCP_HTTP_CORS")
            .map(|v| v.to_lowercase() != "false" && v != "0")
            .unwrap_or(true);

        Self {
            port,
            host,
            rpc_path,
            enable_cors,
        }
    }
}

impl TransportConfig {
    /// Load transport config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok().filter(|v| !v.is_empty()))
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let transport = var("MCP_TRANSPORT").unwrap_or_default().to_lowercase();

        match transport.as_str() {
            #[cfg(feature = "stdio")]
            "stdio" => Self::Stdio,
            _ => Self::Http(HttpConfig::from_lookup(var)),
        }
    }

    /// Get a description of this transport for logging.
    pub fn description(&self) -> String {
        match self {
            Self::Http(cfg) => format!("HTTP on {}:{}{}", cfg.host, cfg.port, cfg.rpc_path),
            #[cfg(feature = "stdio")]
            Self::Stdio => "STDIO (standard MCP mode)".to_string(),
        }
    }
}
