//! Tool handler contract.
//!
//! Every integration implements the same capability: take validated
//! arguments, perform the remote operation, and return a JSON payload or a
//! [`HandlerError`]. The dispatcher never knows which backend it is talking
//! to; new integrations add a handler, not new dispatch logic.

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Validated tool arguments (always a JSON object).
pub type ToolArgs = serde_json::Map<String, Value>;

/// Failures a handler may report.
///
/// The variants describe *why* a backend call failed; the dispatcher folds
/// them into the closed, caller-facing error taxonomy.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The backend answered with a non-success HTTP status.
    #[error("backend returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// The backend throttled the request and the adapter gave up retrying.
    #[error("rate limited by backend (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    /// The request never produced a response (DNS, connect, TLS, timeout).
    #[error("network error: {0}")]
    Network(String),

    /// The backend answered but the body could not be understood.
    #[error("malformed backend response: {0}")]
    MalformedResponse(String),

    /// A credential the handler needs is not configured.
    #[error("missing credential: {0}")]
    MissingCredential(String),

    /// A shared client resource (connection pool, quota) is exhausted.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// An argument passed schema validation but is semantically invalid.
    #[error("invalid argument '{field}': {message}")]
    InvalidArgument { field: String, message: String },

    /// The handler observed its cancellation token and stopped.
    #[error("operation cancelled")]
    Cancelled,

    /// Anything else.
    #[error("{0}")]
    Other(String),
}

impl HandlerError {
    /// Create an "invalid argument" error.
    pub fn invalid_argument(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a catch-all error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

impl From<reqwest::Error> for HandlerError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            Self::Status {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else if e.is_decode() {
            Self::MalformedResponse(e.to_string())
        } else if e.is_timeout() || e.is_connect() || e.is_request() {
            Self::Network(e.to_string())
        } else {
            Self::Other(e.to_string())
        }
    }
}

/// Trait implemented once per backend operation.
///
/// Handlers must honour `cancel`: when it fires the caller has already moved
/// on, so the handler should stop promptly and release what it holds.
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute the operation with already-validated arguments.
    async fn call(&self, args: ToolArgs, cancel: CancellationToken) -> Result<Value, HandlerError>;
}

/// Adapter turning an async closure into a [`ToolHandler`].
pub struct FnHandler<F> {
    f: F,
}

#[async_trait::async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(ToolArgs, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    async fn call(&self, args: ToolArgs, cancel: CancellationToken) -> Result<Value, HandlerError> {
        (self.f)(args, cancel).await
    }
}

/// Wrap an async closure as a shareable handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn ToolHandler>
where
    F: Fn(ToolArgs, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

/// Deserialize validated arguments into a typed parameter struct.
pub fn parse_args<P: DeserializeOwned>(args: ToolArgs) -> Result<P, HandlerError> {
    serde_json::from_value(Value::Object(args))
        .map_err(|e| HandlerError::invalid_argument("arguments", e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct EchoParams {
        text: String,
    }

    #[tokio::test]
    async fn test_handler_fn_runs_closure() {
        let handler = handler_fn(|args, _cancel| async move {
            let params: EchoParams = parse_args(args)?;
            Ok(json!({ "echo": params.text }))
        });

        let mut args = ToolArgs::new();
        args.insert("text".to_string(), json!("hi"));
        let result = handler.call(args, CancellationToken::new()).await.unwrap();
        assert_eq!(result, json!({ "echo": "hi" }));
    }

    #[test]
    fn test_parse_args_reports_invalid_argument() {
        let err = parse_args::<EchoParams>(ToolArgs::new()).unwrap_err();
        assert!(matches!(err, HandlerError::InvalidArgument { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = HandlerError::Status {
            status: 503,
            message: "unavailable".to_string(),
        };
        assert_eq!(err.to_string(), "backend returned HTTP 503: unavailable");
    }
}
