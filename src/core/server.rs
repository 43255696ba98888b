//! MCP Server implementation.
//!
//! [`McpServer`] owns the pieces every transport shares: the module registry,
//! the live catalog handle, the dispatcher and the lifecycle controller.
//! The HTTP transport calls its inherent methods directly; the STDIO
//! transport reaches the same methods through rmcp's `ServerHandler`.

use std::sync::Arc;

use rmcp::{
    ErrorData as McpError, RoleServer, ServerHandler,
    model::{
        CallToolRequestParam, CallToolResult, Content, ErrorCode, Implementation,
        ListToolsResult, PaginatedRequestParam, ServerCapabilities, ServerInfo,
    },
    service::RequestContext,
};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use super::config::Config;
use super::error::{Error, Result};
use super::lifecycle::{Lifecycle, ProcessState};
use super::secrets::{EnvSecretStore, SecretStore};
use crate::domains::tools::{
    ActiveCatalog, CatalogBuilder, CatalogHandle, CatalogSummary, Dispatcher, InvocationError,
    InvocationRequest, InvocationResult, ModuleContext, ModuleRegistry,
};

/// JSON-RPC code for "server not accepting work" (MCP implementation range).
pub const NOT_ACCEPTING_CODE: i32 = -32002;

const INSTRUCTIONS: &str = "Unified tool server. Call tools/list to discover the tools enabled on \
     this deployment; each tool's description and parameter schema say how to call it.";

/// Why a request was turned away before reaching the dispatcher.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("{}", message_for(.state))]
pub struct NotAccepting {
    /// State at the time of the request.
    pub state: ProcessState,
}

fn message_for(state: &ProcessState) -> &'static str {
    match state {
        ProcessState::Starting => "server not ready",
        ProcessState::Ready => "server busy",
        ProcessState::Draining => "server draining",
        ProcessState::Stopped => "server stopped",
    }
}

/// The main MCP server handler.
#[derive(Clone)]
pub struct McpServer {
    /// Server configuration.
    config: Arc<Config>,

    /// Known service modules.
    registry: Arc<ModuleRegistry>,

    /// Credential source for modules and capability checks.
    secrets: Arc<dyn SecretStore>,

    /// The live catalog.
    catalog: Arc<CatalogHandle>,

    /// Stateless invocation router.
    dispatcher: Dispatcher,

    /// Process state and in-flight accounting.
    lifecycle: Lifecycle,

    /// Serializes catalog rebuilds.
    reload_lock: Arc<Mutex<()>>,
}

impl McpServer {
    /// Create a server with the built-in modules and environment secrets.
    pub fn new(config: Config) -> Self {
        let secrets: Arc<dyn SecretStore> = match &config.secrets.dir {
            Some(dir) => Arc::new(EnvSecretStore::with_dir(dir)),
            None => Arc::new(EnvSecretStore::new()),
        };
        Self::with_parts(config, ModuleRegistry::builtin(), secrets)
    }

    /// Create a server from explicit parts.
    pub fn with_parts(
        config: Config,
        registry: ModuleRegistry,
        secrets: Arc<dyn SecretStore>,
    ) -> Self {
        let dispatcher = Dispatcher::new(config.dispatch.tool_timeout);
        Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            secrets,
            catalog: Arc::new(CatalogHandle::default()),
            dispatcher,
            lifecycle: Lifecycle::new(),
            reload_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Get the server name.
    pub fn name(&self) -> &str {
        &self.config.server.name
    }

    /// Get the server version.
    pub fn version(&self) -> &str {
        &self.config.server.version
    }

    /// Get the server configuration.
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Lifecycle controller shared with the transports.
    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Snapshot of the live catalog.
    pub fn catalog(&self) -> Arc<ActiveCatalog> {
        self.catalog.load()
    }

    fn module_context(&self) -> ModuleContext {
        ModuleContext {
            secrets: Arc::clone(&self.secrets),
            backend_timeout: self.config.dispatch.backend_timeout,
            server_name: self.config.server.name.clone(),
            server_version: self.config.server.version.clone(),
        }
    }

    /// Instantiate modules and assemble a catalog without publishing it.
    fn build_catalog(&self) -> Result<ActiveCatalog> {
        let selection = &self.config.services.selection;
        let modules = self.registry.instantiate(&self.module_context(), selection)?;
        let catalog = CatalogBuilder::new(self.secrets.as_ref())
            .build(&modules, selection)?;
        Ok(catalog)
    }

    async fn build_catalog_off_thread(&self) -> Result<ActiveCatalog> {
        let server = self.clone();
        tokio::task::spawn_blocking(move || server.build_catalog())
            .await
            .map_err(|e| Error::internal(format!("catalog build task failed: {}", e)))?
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Build the first catalog and move to `Ready`.
    ///
    /// On failure the process goes straight to `Stopped` and never reports
    /// ready.
    pub async fn initialize(&self) -> Result<CatalogSummary> {
        let _guard = self.reload_lock.lock().await;

        match self.build_catalog_off_thread().await {
            Ok(catalog) => {
                let summary = catalog.summary();
                self.catalog.swap(catalog);
                self.lifecycle.mark_ready()?;
                Ok(summary)
            }
            Err(e) => {
                error!("Catalog build failed: {}", e);
                if let Err(transition) = self.lifecycle.mark_stopped() {
                    error!("{}", transition);
                }
                Err(e)
            }
        }
    }

    /// Rebuild the catalog from fresh module instances and swap it in.
    ///
    /// A failed rebuild leaves the current catalog in place.
    pub async fn reload(&self) -> Result<CatalogSummary> {
        let _guard = self.reload_lock.lock().await;
        info!("Reloading catalog");

        match self.build_catalog_off_thread().await {
            Ok(catalog) => {
                let summary = catalog.summary();
                let previous = self.catalog.swap(catalog);
                info!(
                    "Catalog reloaded: {} tools (was {})",
                    summary.tool_count,
                    previous.len()
                );
                Ok(summary)
            }
            Err(e) => {
                error!("Catalog reload failed, keeping current catalog: {}", e);
                Err(e)
            }
        }
    }

    // ========================================================================
    // Requests
    // ========================================================================

    /// Catalog for listing requests; unavailable until the first build.
    pub fn listing(&self) -> std::result::Result<Arc<ActiveCatalog>, NotAccepting> {
        match self.lifecycle.state() {
            ProcessState::Ready | ProcessState::Draining => Ok(self.catalog.load()),
            state => Err(NotAccepting { state }),
        }
    }

    /// Run one invocation if the server is accepting work.
    ///
    /// The in-flight guard is held until the dispatcher returns, so draining
    /// waits for this call.
    pub async fn call_tool(
        &self,
        request: InvocationRequest,
        cancel: CancellationToken,
    ) -> std::result::Result<InvocationResult, NotAccepting> {
        let Some(_in_flight) = self.lifecycle.try_begin() else {
            return Err(NotAccepting {
                state: self.lifecycle.state(),
            });
        };

        let catalog = self.catalog.load();
        Ok(self
            .dispatcher
            .invoke_with_cancel(request, &catalog, cancel)
            .await)
    }
}

// ============================================================================
// Result encoding
// ============================================================================

/// Encode a dispatcher outcome as an MCP tool result.
///
/// Request errors (unknown tool, bad arguments) are returned as `Err` so the
/// transport can answer with a protocol error; execution failures become an
/// `isError` result carrying the structured error.
pub fn to_call_tool_result(
    result: InvocationResult,
) -> std::result::Result<CallToolResult, InvocationError> {
    match result.outcome {
        Ok(value) => {
            let text = match &value {
                Value::String(s) => s.clone(),
                other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
            };
            let structured = if value.is_object() {
                Some(value)
            } else {
                Some(json!({ "result": value }))
            };
            Ok(CallToolResult {
                content: vec![Content::text(text)],
                structured_content: structured,
                is_error: Some(false),
                meta: None,
            })
        }
        Err(e) if e.kind.is_request_error() => Err(e),
        Err(e) => Ok(CallToolResult {
            content: vec![Content::text(format!("{}: {}", e.kind, e.message))],
            structured_content: Some(json!({ "error": e })),
            is_error: Some(true),
            meta: None,
        }),
    }
}

fn to_mcp_error(e: InvocationError) -> McpError {
    let data = serde_json::to_value(&e).ok();
    McpError::invalid_params(e.message, data)
}

fn not_accepting_error(e: NotAccepting) -> McpError {
    McpError::new(
        ErrorCode(NOT_ACCEPTING_CODE),
        e.to_string(),
        Some(json!({ "state": e.state })),
    )
}

// ============================================================================
// rmcp handler (STDIO)
// ============================================================================

impl ServerHandler for McpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(INSTRUCTIONS.to_string()),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: self.name().to_string(),
                version: self.version().to_string(),
                ..Implementation::from_build_env()
            },
            ..Default::default()
        }
    }

    #[instrument(skip(self, _context))]
    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> std::result::Result<ListToolsResult, McpError> {
        let catalog = self.listing().map_err(not_accepting_error)?;
        info!("Listing {} tools", catalog.len());
        Ok(ListToolsResult {
            tools: catalog.to_tools(),
            next_cursor: None,
            meta: None,
        })
    }

    #[instrument(skip(self, request, context), fields(tool = %request.name))]
    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, McpError> {
        let invocation = InvocationRequest::new(
            request.name.to_string(),
            request.arguments.map(Value::Object),
        );
        let result = McpServer::call_tool(self, invocation, context.ct.child_token())
            .await
            .map_err(not_accepting_error)?;
        to_call_tool_result(result).map_err(to_mcp_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::secrets::StaticSecretStore;
    use crate::domains::tools::{
        Capability, ErrorKind, ServiceModule, ToolDescriptor, ToolHandler, handler_fn,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn echo() -> Arc<dyn ToolHandler> {
        handler_fn(|args, _cancel| async move { Ok(Value::Object(args)) })
    }

    fn module(name: &str, tools: &[&str]) -> ServiceModule {
        tools
            .iter()
            .fold(ServiceModule::builder(name), |builder, tool| {
                builder.tool(ToolDescriptor::builder(*tool, "test tool", echo()))
            })
            .build()
            .unwrap()
    }

    fn server(registry: ModuleRegistry, store: StaticSecretStore) -> McpServer {
        McpServer::with_parts(Config::default(), registry, Arc::new(store))
    }

    #[tokio::test]
    async fn test_initialize_builds_catalog_and_marks_ready() {
        let server = server(
            ModuleRegistry::new().register_module(module("alpha", &["a_one", "a_two"])),
            StaticSecretStore::new(),
        );
        assert!(server.listing().is_err());

        let summary = server.initialize().await.unwrap();
        assert_eq!(summary.tool_count, 2);
        assert_eq!(server.lifecycle().state(), ProcessState::Ready);
        assert_eq!(server.listing().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_tools_stop_the_process() {
        let server = server(
            ModuleRegistry::new()
                .register_module(module("alpha", &["fetch_widget"]))
                .register_module(module("beta", &["fetch_widget"])),
            StaticSecretStore::new(),
        );

        let err = server.initialize().await.unwrap_err();
        assert!(err.to_string().contains("fetch_widget"));
        assert_eq!(server.lifecycle().state(), ProcessState::Stopped);
        assert!(server.lifecycle().shutdown_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_call_rejected_before_ready() {
        let server = server(
            ModuleRegistry::new().register_module(module("alpha", &["a_one"])),
            StaticSecretStore::new(),
        );
        let err = server
            .call_tool(InvocationRequest::new("a_one", None), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.state, ProcessState::Starting);
        assert_eq!(err.to_string(), "server not ready");
    }

    #[tokio::test]
    async fn test_call_after_ready() {
        let server = server(
            ModuleRegistry::new().register_module(module("alpha", &["a_one"])),
            StaticSecretStore::new(),
        );
        server.initialize().await.unwrap();

        let result = server
            .call_tool(
                InvocationRequest::new("a_one", Some(json!({ "x": 1 }))),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(result.outcome.unwrap(), json!({ "x": 1 }));
        assert_eq!(server.lifecycle().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_reload_picks_up_new_credentials() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let registry = ModuleRegistry::new()
            .register_module(module("alpha", &["a_one"]))
            .register("gated", move |ctx: &ModuleContext| {
                counter.fetch_add(1, Ordering::SeqCst);
                let builder = ServiceModule::builder("gated")
                    .requires(Capability::secret("GATED_KEY"))
                    .tool(ToolDescriptor::builder("gated_tool", "gated", echo()));
                assert!(ctx.backend_timeout > Duration::ZERO);
                builder.build()
            });

        #[derive(Default)]
        struct FlipStore(std::sync::atomic::AtomicBool);
        impl SecretStore for FlipStore {
            fn get(&self, name: &str) -> Option<String> {
                (name == "GATED_KEY" && self.0.load(Ordering::SeqCst)).then(|| "v".to_string())
            }
        }

        let store = Arc::new(FlipStore::default());
        let server = McpServer::with_parts(Config::default(), registry, store.clone());

        server.initialize().await.unwrap();
        assert!(server.catalog().get("gated_tool").is_none());
        let before = server.catalog();

        store.0.store(true, Ordering::SeqCst);
        let summary = server.reload().await.unwrap();
        assert_eq!(summary.tool_count, 2);
        assert!(server.catalog().get("gated_tool").is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // Snapshots taken before the reload are unaffected.
        assert!(before.get("gated_tool").is_none());
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_previous_catalog() {
        let flip = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let toggle = Arc::clone(&flip);
        let registry = ModuleRegistry::new()
            .register_module(module("alpha", &["a_one"]))
            .register("beta", move |_ctx: &ModuleContext| {
                let name = if toggle.load(Ordering::SeqCst) { "a_one" } else { "b_one" };
                ServiceModule::builder("beta")
                    .tool(ToolDescriptor::builder(name, "beta tool", echo()))
                    .build()
            });
        let server = server(registry, StaticSecretStore::new());
        server.initialize().await.unwrap();

        flip.store(true, Ordering::SeqCst);
        assert!(server.reload().await.is_err());
        assert!(server.catalog().get("b_one").is_some());
        assert_eq!(server.lifecycle().state(), ProcessState::Ready);
    }

    #[test]
    fn test_result_encoding() {
        let ok = InvocationResult {
            request_id: "r".into(),
            outcome: Ok(json!({ "status": "pong" })),
        };
        let encoded = to_call_tool_result(ok).unwrap();
        assert_eq!(encoded.is_error, Some(false));
        assert_eq!(encoded.structured_content, Some(json!({ "status": "pong" })));

        let failed = InvocationResult {
            request_id: "r".into(),
            outcome: Err(InvocationError::timeout("slow", Duration::from_millis(10))),
        };
        let encoded = to_call_tool_result(failed).unwrap();
        assert_eq!(encoded.is_error, Some(true));
        assert_eq!(
            encoded.structured_content.unwrap()["error"]["kind"],
            json!("Timeout")
        );

        let unknown = InvocationResult {
            request_id: "r".into(),
            outcome: Err(InvocationError::unknown_tool("nope")),
        };
        assert_eq!(
            to_call_tool_result(unknown).unwrap_err().kind,
            ErrorKind::UnknownTool
        );
    }
}
