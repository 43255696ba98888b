//! Error types and handling for the MCP server.
//!
//! This module defines a unified error type for process-level failures:
//! building the catalog and moving through the lifecycle. Transport
//! failures have their own `TransportError`. Per-invocation failures never surface here; the dispatcher
//! folds them into an `InvocationResult`.

use thiserror::Error;

use crate::core::lifecycle::LifecycleError;
use crate::domains::tools::{CatalogError, ToolError};

/// A specialized Result type for MCP server operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the MCP server.
#[derive(Debug, Error)]
pub enum Error {
    /// A service module could not be declared.
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    /// The catalog could not be assembled.
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// An illegal lifecycle transition was requested.
    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// Internal server errors that should not occur under normal operation.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_error_converts() {
        let err: Error = CatalogError::DuplicateModule("linear".to_string()).into();
        assert_eq!(
            err.to_string(),
            "Catalog error: Service module 'linear' is registered more than once"
        );
    }
}
