//! STDIO transport implementation.
//!
//! Serves a single local MCP client over stdin/stdout through rmcp. The
//! catalog is built before this runs, so the first `tools/list` already sees
//! every enabled tool.

use rmcp::ServiceExt;
use tracing::info;

use super::{TransportError, TransportResult};
use crate::core::McpServer;

/// STDIO transport handler.
pub struct StdioTransport;

impl StdioTransport {
    /// Run until the client closes stdin or the process is stopped.
    pub async fn run(server: McpServer) -> TransportResult<()> {
        info!("Communicating via stdin/stdout");
        let stopped = server.lifecycle().shutdown_token();

        let service = server
            .serve(rmcp::transport::stdio())
            .await
            .map_err(|e| TransportError::init(e.to_string()))?;

        tokio::select! {
            result = service.waiting() => {
                result.map_err(|e| TransportError::ServiceError(e.to_string()))?;
                info!("STDIO client disconnected");
            }
            _ = stopped.cancelled() => info!("Server stopped, closing STDIO session"),
        }

        Ok(())
    }
}
