//! Built-in introspection tools.
//!
//! The `system` module needs no credentials, so a server with no backend
//! secrets configured still answers `ping`.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use crate::domains::tools::descriptor::ToolDescriptor;
use crate::domains::tools::error::ToolError;
use crate::domains::tools::handlers::handler_fn;
use crate::domains::tools::module::{ModuleContext, ServiceModule};

/// Module name as used by the selection policy.
pub const NAME: &str = "system";

/// Liveness check tool.
pub const PING: &str = "ping";

/// Server identity tool.
pub const SERVER_INFO: &str = "server_info";

/// Build the `system` module.
pub fn module(ctx: &ModuleContext) -> Result<ServiceModule, ToolError> {
    let name = Arc::new(ctx.server_name.clone());
    let version = Arc::new(ctx.server_version.clone());

    ServiceModule::builder(NAME)
        .tool(ToolDescriptor::builder(
            PING,
            "Check that the server is reachable. Returns \"pong\" and the server time.",
            handler_fn(|_args, _cancel| async {
                Ok(json!({
                    "status": "pong",
                    "timestamp": Utc::now().to_rfc3339(),
                }))
            }),
        ))
        .tool(ToolDescriptor::builder(
            SERVER_INFO,
            "Report the server name, version and current time.",
            handler_fn(move |_args, _cancel| {
                let name = Arc::clone(&name);
                let version = Arc::clone(&version);
                async move {
                    Ok(json!({
                        "name": name.as_str(),
                        "version": version.as_str(),
                        "timestamp": Utc::now().to_rfc3339(),
                    }))
                }
            }),
        ))
        .build()
}
