//! Unified MCP Server Library
//!
//! One Model Context Protocol server exposing tools for several third-party
//! services. Each service is a module that declares its tools and the
//! credentials it needs; at startup the enabled modules whose credentials
//! resolve are assembled into a single catalog that clients list and call.
//!
//! # Architecture
//!
//! - **core**: configuration, secrets, lifecycle, the MCP server and the
//!   HTTP/STDIO transports
//! - **domains::tools**: tool descriptors, service modules, the catalog
//!   builder and the dispatcher
//!
//! # Example
//!
//! ```rust,no_run
//! use unified_mcp_server::core::{Config, McpServer, TransportService};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env();
//!     let server = McpServer::new(config.clone());
//!     TransportService::new(config.transport).run(server).await?;
//!     Ok(())
//! }
//! ```

pub mod core;
pub mod domains;

// Re-export commonly used types for convenience
pub use core::{Config, Error, McpServer, Result};
