//! Transport layer for the MCP server.
//!
//! - **HTTP**: JSON-RPC over POST plus health/readiness probes (always built)
//! - **STDIO**: a single local client over stdin/stdout - feature: `stdio`
//!
//! Both transports hand requests to the same [`McpServer`](crate::core::McpServer),
//! so the catalog, dispatcher and lifecycle rules are identical.

mod config;
mod error;
mod service;

pub mod http;

#[cfg(feature = "stdio")]
pub mod stdio;

pub use config::{HttpConfig, TransportConfig};
pub use error::{TransportError, TransportResult};
pub use service::TransportService;
