//! Service modules: named bundles of tools backed by one external system.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::core::secrets::SecretStore;

use super::descriptor::{ToolDescriptor, ToolDescriptorBuilder};
use super::error::ToolError;

/// Something a module needs before its tools can be served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    /// A named secret must be resolvable.
    Secret(String),
    /// At least one of several alternative secret names must be resolvable.
    AnySecret(Vec<String>),
}

impl Capability {
    /// Require a single secret.
    pub fn secret(name: impl Into<String>) -> Self {
        Self::Secret(name.into())
    }

    /// Require any one of `names`.
    pub fn any_secret<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::AnySecret(names.into_iter().map(Into::into).collect())
    }

    /// Whether the store can satisfy this capability. Values are never read.
    pub fn is_satisfied(&self, store: &dyn SecretStore) -> bool {
        match self {
            Self::Secret(name) => store.contains(name),
            Self::AnySecret(names) => names.iter().any(|name| store.contains(name)),
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Secret(name) => write!(f, "{}", name),
            Self::AnySecret(names) => write!(f, "one of [{}]", names.join(", ")),
        }
    }
}

/// What a module factory gets to work with at initialization.
#[derive(Clone)]
pub struct ModuleContext {
    /// Where credentials come from.
    pub secrets: Arc<dyn SecretStore>,
    /// Request timeout for backend HTTP clients.
    pub backend_timeout: Duration,
    /// Name reported by introspection tools.
    pub server_name: String,
    /// Version reported by introspection tools.
    pub server_version: String,
}

impl ModuleContext {
    /// Resolve a secret for the module's own client.
    pub fn secret(&self, name: &str) -> Option<String> {
        self.secrets.get(name)
    }
}

/// A named, immutable group of tools plus the capabilities they depend on.
#[derive(Clone)]
pub struct ServiceModule {
    name: String,
    tools: Vec<Arc<ToolDescriptor>>,
    required_capabilities: Vec<Capability>,
}

impl ServiceModule {
    /// Start declaring a module.
    pub fn builder(name: impl Into<String>) -> ServiceModuleBuilder {
        ServiceModuleBuilder {
            name: name.into(),
            tools: Vec::new(),
            required_capabilities: Vec::new(),
        }
    }

    /// Module name as used by the selection policy.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tools in declaration order.
    pub fn tools(&self) -> &[Arc<ToolDescriptor>] {
        &self.tools
    }

    /// Capabilities that must be satisfied for the module to be served.
    pub fn required_capabilities(&self) -> &[Capability] {
        &self.required_capabilities
    }

    /// Capabilities the store cannot satisfy.
    pub fn missing_capabilities(&self, store: &dyn SecretStore) -> Vec<&Capability> {
        self.required_capabilities
            .iter()
            .filter(|cap| !cap.is_satisfied(store))
            .collect()
    }
}

impl fmt::Debug for ServiceModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceModule")
            .field("name", &self.name)
            .field(
                "tools",
                &self.tools.iter().map(|t| t.name()).collect::<Vec<_>>(),
            )
            .field("required_capabilities", &self.required_capabilities)
            .finish()
    }
}

/// Builder for [`ServiceModule`].
pub struct ServiceModuleBuilder {
    name: String,
    tools: Vec<ToolDescriptorBuilder>,
    required_capabilities: Vec<Capability>,
}

impl ServiceModuleBuilder {
    /// Declare a required capability.
    pub fn requires(mut self, capability: Capability) -> Self {
        self.required_capabilities.push(capability);
        self
    }

    /// Add a tool.
    pub fn tool(mut self, tool: ToolDescriptorBuilder) -> Self {
        self.tools.push(tool);
        self
    }

    /// Finish the module, rejecting duplicate tool names within it.
    pub fn build(self) -> Result<ServiceModule, ToolError> {
        let mut seen = HashSet::new();
        let mut tools = Vec::with_capacity(self.tools.len());

        for builder in self.tools {
            if !seen.insert(builder.name().to_string()) {
                return Err(ToolError::DuplicateInModule {
                    service: self.name.clone(),
                    tool: builder.name().to_string(),
                });
            }
            tools.push(Arc::new(builder.build(&self.name)?));
        }

        Ok(ServiceModule {
            name: self.name,
            tools,
            required_capabilities: self.required_capabilities,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::secrets::StaticSecretStore;
    use crate::domains::tools::handlers::{ToolHandler, handler_fn};
    use serde_json::json;

    fn noop() -> Arc<dyn ToolHandler> {
        handler_fn(|_args, _cancel| async { Ok(json!(null)) })
    }

    #[test]
    fn test_builder_sets_service_name() {
        let module = ServiceModule::builder("alpha")
            .tool(ToolDescriptor::builder("ping", "Ping", noop()))
            .tool(ToolDescriptor::builder("pong", "Pong", noop()))
            .build()
            .unwrap();

        assert_eq!(module.name(), "alpha");
        assert_eq!(module.tools().len(), 2);
        assert!(module.tools().iter().all(|t| t.service_name() == "alpha"));
    }

    #[test]
    fn test_duplicate_tool_within_module_rejected() {
        let result = ServiceModule::builder("alpha")
            .tool(ToolDescriptor::builder("ping", "Ping", noop()))
            .tool(ToolDescriptor::builder("ping", "Ping again", noop()))
            .build();

        assert!(matches!(result, Err(ToolError::DuplicateInModule { .. })));
    }

    #[test]
    fn test_capabilities() {
        let store = StaticSecretStore::new().with("LINEAR_API_KEY", "k");
        let module = ServiceModule::builder("mixed")
            .requires(Capability::secret("LINEAR_API_KEY"))
            .requires(Capability::secret("XERO_CLIENT_ID"))
            .requires(Capability::any_secret(["M365_CLIENT_ID", "LINEAR_API_KEY"]))
            .build()
            .unwrap();

        let missing = module.missing_capabilities(&store);
        assert_eq!(missing, vec![&Capability::secret("XERO_CLIENT_ID")]);
    }

    #[test]
    fn test_capability_display() {
        assert_eq!(Capability::secret("A").to_string(), "A");
        assert_eq!(
            Capability::any_secret(["A", "B"]).to_string(),
            "one of [A, B]"
        );
    }
}
