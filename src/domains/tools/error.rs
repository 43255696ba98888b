//! Tool-specific error types.

use thiserror::Error;

/// Errors raised while declaring tools and service modules.
///
/// These surface at process initialization, never during an invocation.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The tool name is empty or contains characters clients cannot address.
    #[error("Invalid tool name: '{0}'")]
    InvalidName(String),

    /// The parameter schema is not a usable JSON Schema object.
    #[error("Invalid parameter schema for tool '{tool}': {reason}")]
    InvalidSchema { tool: String, reason: String },

    /// Two tools with the same name were declared in one service module.
    #[error("Tool '{tool}' is declared more than once in service '{service}'")]
    DuplicateInModule { service: String, tool: String },
}

impl ToolError {
    /// Create a new "invalid schema" error.
    pub fn invalid_schema(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSchema {
            tool: tool.into(),
            reason: reason.into(),
        }
    }
}
