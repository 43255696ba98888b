//! Invocation dispatch.
//!
//! The [`Dispatcher`] resolves a request against an [`ActiveCatalog`],
//! validates the arguments, runs the bound handler under its own deadline and
//! cancellation scope, and folds whatever happened into exactly one
//! [`InvocationResult`]. It holds no per-request state, so any number of
//! invocations run concurrently without locking.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use super::catalog::ActiveCatalog;
use super::descriptor::{FieldError, ToolDescriptor};
use super::handlers::{HandlerError, ToolArgs};

/// Longest diagnostic message passed back to callers.
const MAX_DIAGNOSTIC_LEN: usize = 1024;

// ============================================================================
// Request / Result
// ============================================================================

/// An inbound tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationRequest {
    pub tool_name: String,
    pub arguments: Option<Value>,
    pub request_id: String,
}

impl InvocationRequest {
    /// Create a request with a generated request id.
    pub fn new(tool_name: impl Into<String>, arguments: Option<Value>) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Use a caller-supplied request id.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }
}

/// The single terminal outcome of an invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationResult {
    pub request_id: String,
    pub outcome: Result<Value, InvocationError>,
}

impl InvocationResult {
    /// Whether the handler succeeded.
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Error kind, if the invocation failed.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.outcome.as_ref().err().map(|e| e.kind)
    }
}

// ============================================================================
// Error Taxonomy
// ============================================================================

/// Closed set of error kinds surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    UnknownTool,
    InvalidArguments,
    Timeout,
    BackendFailure,
    CapabilityUnavailable,
    MalformedRequest,
}

impl ErrorKind {
    /// Stable wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownTool => "UnknownTool",
            Self::InvalidArguments => "InvalidArguments",
            Self::Timeout => "Timeout",
            Self::BackendFailure => "BackendFailure",
            Self::CapabilityUnavailable => "CapabilityUnavailable",
            Self::MalformedRequest => "MalformedRequest",
        }
    }

    /// Whether the error concerns the request itself rather than its
    /// execution.
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownTool | Self::InvalidArguments | Self::MalformedRequest
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed invocation failure: kind, opaque diagnostic, optional details.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("{kind}: {message}")]
pub struct InvocationError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl InvocationError {
    /// Create an error of `kind`.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: truncate_diagnostic(message.into()),
            details: None,
        }
    }

    /// Attach structured details.
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// The requested tool is not in the catalog.
    pub fn unknown_tool(name: &str) -> Self {
        Self::new(ErrorKind::UnknownTool, format!("Unknown tool: {}", name))
            .with_details(json!({ "tool": name }))
    }

    /// Arguments failed validation.
    pub fn invalid_arguments(fields: Vec<FieldError>) -> Self {
        let names: Vec<&str> = fields.iter().map(|f| f.field.as_str()).collect();
        let message = format!("Invalid arguments: {}", names.join(", "));
        Self::new(ErrorKind::InvalidArguments, message).with_details(json!({ "fields": fields }))
    }

    /// The handler exceeded its deadline.
    pub fn timeout(tool: &str, deadline: Duration) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!("Tool '{}' timed out after {}ms", tool, deadline.as_millis()),
        )
        .with_details(json!({ "timeoutMs": deadline.as_millis() as u64 }))
    }

    /// The tool's module cannot be served.
    pub fn capability_unavailable(tool: &str, service: &str, missing: &[String]) -> Self {
        Self::new(
            ErrorKind::CapabilityUnavailable,
            format!(
                "Tool '{}' is unavailable: service '{}' is not configured",
                tool, service
            ),
        )
        .with_details(json!({ "service": service, "missing": missing }))
    }

    /// The request could not be decoded.
    pub fn malformed_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedRequest, message)
    }

    /// Backend failure with a machine-readable reason.
    fn backend(reason: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BackendFailure, message).with_details(json!({ "reason": reason }))
    }

    /// Normalize a handler failure.
    pub fn from_handler(error: HandlerError) -> Self {
        let message = error.to_string();
        match error {
            HandlerError::Status { status, .. } => {
                Self::new(ErrorKind::BackendFailure, message).with_details(json!({
                    "reason": "status",
                    "status": status,
                    "retryable": status == 429 || status >= 500,
                }))
            }
            HandlerError::RateLimited { retry_after_secs } => {
                Self::new(ErrorKind::BackendFailure, message).with_details(json!({
                    "reason": "rate_limited",
                    "retryAfterSecs": retry_after_secs,
                    "retryable": true,
                }))
            }
            HandlerError::Network(_) => Self::backend("network", message),
            HandlerError::MalformedResponse(_) => Self::backend("malformed_response", message),
            HandlerError::ResourceExhausted(_) => Self::backend("resource_exhausted", message),
            HandlerError::Cancelled => Self::backend("cancelled", message),
            HandlerError::Other(_) => Self::backend("other", message),
            HandlerError::MissingCredential(credential) => {
                Self::new(ErrorKind::CapabilityUnavailable, message)
                    .with_details(json!({ "missing": [credential] }))
            }
            HandlerError::InvalidArgument { field, message } => {
                Self::invalid_arguments(vec![FieldError { field, message }])
            }
        }
    }
}

fn truncate_diagnostic(message: String) -> String {
    if message.chars().count() <= MAX_DIAGNOSTIC_LEN {
        return message;
    }
    let mut truncated: String = message.chars().take(MAX_DIAGNOSTIC_LEN).collect();
    truncated.push_str("...");
    truncated
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Per-invocation progress, reported in debug logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    Received,
    Validated,
    Executing,
    Succeeded,
    Failed,
    TimedOut,
}

/// Routes validated invocations to their handlers.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    default_timeout: Duration,
}

impl Dispatcher {
    /// Create a dispatcher with a default per-invocation deadline.
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }

    /// Invoke a tool with a fresh cancellation scope.
    pub async fn invoke(&self, request: InvocationRequest, catalog: &ActiveCatalog) -> InvocationResult {
        self.invoke_with_cancel(request, catalog, CancellationToken::new())
            .await
    }

    /// Invoke a tool; cancelling `cancel` abandons the call and signals the
    /// handler.
    pub async fn invoke_with_cancel(
        &self,
        request: InvocationRequest,
        catalog: &ActiveCatalog,
        cancel: CancellationToken,
    ) -> InvocationResult {
        let span = info_span!(
            "invoke",
            tool = %request.tool_name,
            request_id = %request.request_id
        );
        let request_id = request.request_id.clone();
        let started = Instant::now();

        let outcome = self.run(request, catalog, cancel).instrument(span.clone()).await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        span.in_scope(|| match &outcome {
            Ok(_) => info!(elapsed_ms, "Tool call succeeded"),
            Err(e) => warn!(elapsed_ms, kind = %e.kind, "Tool call failed: {}", e.message),
        });

        InvocationResult {
            request_id,
            outcome,
        }
    }

    async fn run(
        &self,
        request: InvocationRequest,
        catalog: &ActiveCatalog,
        cancel: CancellationToken,
    ) -> Result<Value, InvocationError> {
        debug!(state = ?InvocationState::Received);

        let descriptor = match catalog.get(&request.tool_name) {
            Some(descriptor) => Arc::clone(descriptor),
            None => {
                return Err(match catalog.excluded(&request.tool_name) {
                    Some(excluded) => InvocationError::capability_unavailable(
                        &request.tool_name,
                        &excluded.service,
                        &excluded.missing,
                    ),
                    None => InvocationError::unknown_tool(&request.tool_name),
                });
            }
        };

        let args = validate_arguments(&descriptor, request.arguments)?;
        debug!(state = ?InvocationState::Validated);

        let deadline = descriptor.timeout().unwrap_or(self.default_timeout);
        execute(descriptor, args, deadline, cancel).await
    }
}

/// Check arguments against the descriptor's schema.
fn validate_arguments(
    descriptor: &ToolDescriptor,
    arguments: Option<Value>,
) -> Result<ToolArgs, InvocationError> {
    let value = match arguments {
        None | Some(Value::Null) => Value::Object(ToolArgs::new()),
        Some(value @ Value::Object(_)) => value,
        Some(other) => return Err(not_an_object(&other)),
    };

    descriptor
        .parameter_schema()
        .validate(&value)
        .map_err(InvocationError::invalid_arguments)?;

    match value {
        Value::Object(map) => Ok(map),
        other => Err(not_an_object(&other)),
    }
}

fn not_an_object(value: &Value) -> InvocationError {
    let found = match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    InvocationError::invalid_arguments(vec![FieldError {
        field: "<root>".to_string(),
        message: format!("arguments must be an object, got {}", found),
    }])
}

/// Run the handler in its own task, bounded by `deadline` and `cancel`.
///
/// Leaving this function by any path other than handler completion cancels
/// the handler's scope; the task itself is detached and its late result is
/// dropped.
async fn execute(
    descriptor: Arc<ToolDescriptor>,
    args: ToolArgs,
    deadline: Duration,
    cancel: CancellationToken,
) -> Result<Value, InvocationError> {
    let scope = cancel.child_token();
    let _scope_guard = scope.clone().drop_guard();

    let handler = Arc::clone(descriptor.handler());
    let handler_scope = scope.clone();
    let mut task = tokio::spawn(async move { handler.call(args, handler_scope).await });
    debug!(state = ?InvocationState::Executing, deadline_ms = deadline.as_millis() as u64);

    let outcome = tokio::select! {
        biased;
        joined = &mut task => match joined {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(InvocationError::from_handler(e)),
            Err(join_error) if join_error.is_panic() => Err(InvocationError::backend(
                "panic",
                format!("Tool '{}' handler panicked", descriptor.name()),
            )),
            Err(_) => Err(InvocationError::backend(
                "aborted",
                format!("Tool '{}' handler was aborted", descriptor.name()),
            )),
        },
        _ = cancel.cancelled() => Err(InvocationError::from_handler(HandlerError::Cancelled)),
        _ = tokio::time::sleep(deadline) => {
            debug!(state = ?InvocationState::TimedOut);
            return Err(InvocationError::timeout(descriptor.name(), deadline));
        }
    };

    let state = if outcome.is_ok() {
        InvocationState::Succeeded
    } else {
        InvocationState::Failed
    };
    debug!(state = ?state);
    outcome
}
