//! HTTP transport implementation.
//!
//! HTTP server with JSON-RPC over POST requests plus the probe endpoints the
//! hosting platform polls. The listener is bound once, before the catalog is
//! built, and stays open until the lifecycle reaches `Stopped`; probes answer
//! throughout, reporting "not ready" while the server is still starting.

use std::net::SocketAddr;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, instrument, warn};

use super::{TransportError, TransportResult, config::HttpConfig};
use crate::core::McpServer;
use crate::core::lifecycle::ProcessState;
use crate::core::server::{NOT_ACCEPTING_CODE, NotAccepting, to_call_tool_result};
use crate::domains::tools::{ErrorKind, InvocationRequest};

/// Protocol revision assumed when the client does not ask for one.
const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";

// ============================================================================
// JSON-RPC envelope
// ============================================================================

/// JSON-RPC request structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

/// JSON-RPC response structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC error structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    /// Create a success response.
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Attach `data` to an error response.
    pub fn with_data(mut self, data: Value) -> Self {
        if let Some(error) = self.error.as_mut() {
            error.data = Some(data);
        }
        self
    }

    /// Body could not be parsed as JSON.
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::error(None, -32700, message)
            .with_data(json!({ "kind": ErrorKind::MalformedRequest }))
    }

    /// Method not found error.
    pub fn method_not_found(id: Option<Value>) -> Self {
        Self::error(id, -32601, "Method not found")
    }

    /// Invalid request error.
    pub fn invalid_request(id: Option<Value>, msg: impl Into<String>) -> Self {
        Self::error(id, -32600, msg).with_data(json!({ "kind": ErrorKind::MalformedRequest }))
    }

    /// Invalid params error.
    pub fn invalid_params(id: Option<Value>, msg: impl Into<String>) -> Self {
        Self::error(id, -32602, msg)
    }

    /// Internal error.
    pub fn internal_error(id: Option<Value>, msg: impl Into<String>) -> Self {
        Self::error(id, -32603, msg)
    }

    /// Server is starting or draining.
    pub fn not_accepting(id: Option<Value>, e: NotAccepting) -> Self {
        Self::error(id, NOT_ACCEPTING_CODE, e.to_string()).with_data(json!({ "state": e.state }))
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Application state shared across HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    server: McpServer,
    rpc_path: String,
}

/// HTTP transport handler owning the bound listener.
pub struct HttpTransport {
    config: HttpConfig,
    listener: TcpListener,
}

impl HttpTransport {
    /// Bind the listening socket.
    ///
    /// Called before anything slow happens so the port is open from the
    /// first moments of the process.
    pub async fn bind(config: HttpConfig) -> TransportResult<Self> {
        let addr = config.bind_address();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| TransportError::bind(&addr, e))?;
        Ok(Self { config, listener })
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> TransportResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until the lifecycle reaches `Stopped`.
    pub async fn serve(self, server: McpServer) -> TransportResult<()> {
        let shutdown = server.lifecycle().shutdown_token();
        let addr = self.local_addr()?;
        let app = router(server, &self.config);

        let cors_status = if self.config.enable_cors {
            "enabled"
        } else {
            "disabled"
        };
        info!(
            "Listening on {} (JSON-RPC over HTTP, CORS {})",
            addr, cors_status
        );
        info!("  → JSON-RPC: POST {}", self.config.rpc_path);
        info!("  → Probes:   GET /health, /ready, /live");
        info!("  → Catalog:  GET /tools");

        axum::serve(self.listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| TransportError::http(e.to_string()))?;

        info!("HTTP listener closed");
        Ok(())
    }
}

/// Build the HTTP router.
pub fn router(server: McpServer, config: &HttpConfig) -> Router {
    let state = AppState {
        server,
        rpc_path: config.rpc_path.clone(),
    };

    let mut app = Router::new()
        .route(&config.rpc_path, post(handle_rpc))
        .route("/health", get(readiness))
        .route("/ready", get(readiness))
        .route("/live", get(liveness))
        .route("/tools", get(list_tools))
        .route("/", get(root_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if config.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    app
}

// ============================================================================
// Probe and info endpoints
// ============================================================================

/// Root handler - provides API info.
async fn root_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "name": state.server.name(),
        "version": state.server.version(),
        "transport": "HTTP",
        "state": state.server.lifecycle().state(),
        "endpoints": {
            "rpc": state.rpc_path,
            "health": "/health",
            "ready": "/ready",
            "live": "/live",
            "tools": "/tools"
        },
        "protocol": "JSON-RPC 2.0"
    }))
}

/// Readiness: 200 only once the catalog is built and before draining.
async fn readiness(State(state): State<AppState>) -> Response {
    let lifecycle = state.server.lifecycle();
    let current = lifecycle.state();
    let uptime_secs = lifecycle.uptime().as_secs();

    if current == ProcessState::Ready {
        let catalog = state.server.catalog();
        (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "tools": catalog.len(),
                "services": catalog.services(),
                "uptimeSecs": uptime_secs,
            })),
        )
            .into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": current,
                "uptimeSecs": uptime_secs,
            })),
        )
            .into_response()
    }
}

/// Liveness: the process is up and the listener is answering.
async fn liveness(State(state): State<AppState>) -> impl IntoResponse {
    let lifecycle = state.server.lifecycle();
    Json(json!({
        "status": "alive",
        "state": lifecycle.state(),
        "uptimeSecs": lifecycle.uptime().as_secs(),
        "inFlight": lifecycle.in_flight(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Catalog listing for humans and dashboards.
async fn list_tools(State(state): State<AppState>) -> Response {
    match state.server.listing() {
        Ok(catalog) => Json(json!({
            "tools": catalog.listing(),
            "summary": catalog.summary(),
        }))
        .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": e.to_string(), "status": e.state })),
        )
            .into_response(),
    }
}

// ============================================================================
// JSON-RPC
// ============================================================================

/// Handle JSON-RPC requests.
///
/// The body is decoded by hand so undecodable payloads still get a JSON-RPC
/// error rather than an extractor rejection.
#[instrument(skip_all, fields(method = tracing::field::Empty))]
async fn handle_rpc(State(state): State<AppState>, body: Bytes) -> Response {
    let raw: Value = match serde_json::from_slice(&body) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Malformed JSON-RPC body: {}", e);
            return Json(JsonRpcResponse::parse_error(format!("Parse error: {}", e))).into_response();
        }
    };

    let id = raw.get("id").cloned();
    let request: JsonRpcRequest = match serde_json::from_value(raw) {
        Ok(request) => request,
        Err(e) => {
            return Json(JsonRpcResponse::invalid_request(id, format!("Invalid Request: {}", e)))
                .into_response();
        }
    };

    tracing::Span::current().record("method", request.method.as_str());
    debug!("Received JSON-RPC request: {}", request.method);

    if request.method.starts_with("notifications/") {
        debug!("Received notification: {}", request.method);
        return StatusCode::ACCEPTED.into_response();
    }

    Json(process_request(&state, request).await).into_response()
}

/// Process a JSON-RPC request and return the response.
async fn process_request(state: &AppState, request: JsonRpcRequest) -> JsonRpcResponse {
    if request.jsonrpc != "2.0" {
        return JsonRpcResponse::invalid_request(request.id, "Invalid Request: jsonrpc must be \"2.0\"");
    }

    match request.method.as_str() {
        "initialize" => handle_initialize(state, request),
        "ping" => JsonRpcResponse::success(request.id, json!({})),
        "tools/list" => handle_tools_list(state, request),
        "tools/call" => handle_tools_call(state, request).await,
        _ => {
            warn!("Unknown method: {}", request.method);
            JsonRpcResponse::method_not_found(request.id)
        }
    }
}

/// Handle initialize request.
fn handle_initialize(state: &AppState, request: JsonRpcRequest) -> JsonRpcResponse {
    let protocol_version = request
        .params
        .as_ref()
        .and_then(|p| p.get("protocolVersion"))
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_PROTOCOL_VERSION)
        .to_string();
    info!("Client initialized (protocol {})", protocol_version);

    JsonRpcResponse::success(
        request.id,
        json!({
            "protocolVersion": protocol_version,
            "capabilities": {
                "tools": { "listChanged": false }
            },
            "serverInfo": {
                "name": state.server.name(),
                "version": state.server.version()
            }
        }),
    )
}

/// Handle tools/list request.
fn handle_tools_list(state: &AppState, request: JsonRpcRequest) -> JsonRpcResponse {
    match state.server.listing() {
        Ok(catalog) => JsonRpcResponse::success(request.id, json!({ "tools": catalog.to_tools() })),
        Err(e) => JsonRpcResponse::not_accepting(request.id, e),
    }
}

/// Handle tools/call request.
async fn handle_tools_call(state: &AppState, request: JsonRpcRequest) -> JsonRpcResponse {
    let params = request.params.unwrap_or(Value::Null);
    let Some(name) = params.get("name").and_then(Value::as_str) else {
        return JsonRpcResponse::invalid_request(request.id, "Invalid Request: missing tool name");
    };
    let arguments = params.get("arguments").cloned();
    let invocation = InvocationRequest::new(name, arguments);

    // Dropped with this future if the client goes away mid-call.
    let cancel = CancellationToken::new();
    let disconnect_guard = cancel.clone().drop_guard();

    let outcome = state.server.call_tool(invocation, cancel).await;
    let _ = disconnect_guard.disarm();

    let result = match outcome {
        Ok(result) => result,
        Err(e) => return JsonRpcResponse::not_accepting(request.id, e),
    };

    match to_call_tool_result(result) {
        Ok(call_result) => match serde_json::to_value(&call_result) {
            Ok(value) => JsonRpcResponse::success(request.id, value),
            Err(e) => JsonRpcResponse::internal_error(request.id, e.to_string()),
        },
        Err(e) => {
            let data = serde_json::to_value(&e).unwrap_or(Value::Null);
            JsonRpcResponse::invalid_params(request.id, e.message).with_data(data)
        }
    }
}
