//! Core module containing shared infrastructure components.
//!
//! Configuration, secrets, the process lifecycle, the server that ties the
//! tool catalog to MCP, and the transports that expose it.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod secrets;
pub mod server;
pub mod transport;

pub use config::Config;
pub use error::{Error, Result};
pub use lifecycle::{Lifecycle, ProcessState};
pub use secrets::{EnvSecretStore, SecretStore, StaticSecretStore};
pub use server::McpServer;
pub use transport::{TransportConfig, TransportService};
