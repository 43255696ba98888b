//! Module registry - the set of service modules this binary knows about.
//!
//! Modules are registered as factories rather than instances so every
//! catalog build (startup and each reload) resolves credentials afresh.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::catalog::Selection;
use super::definitions::{digitalocean, linear, system};
use super::error::ToolError;
use super::module::{ModuleContext, ServiceModule};

/// Builds one service module from the shared context.
pub type ModuleFactory =
    Arc<dyn Fn(&ModuleContext) -> Result<ServiceModule, ToolError> + Send + Sync>;

// ============================================================================
// Module Registry
// ============================================================================

/// Ordered list of module factories.
///
/// Registration order is the order modules (and therefore tools) appear in
/// the catalog listing.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    factories: Vec<(String, ModuleFactory)>,
}

impl ModuleRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every module shipped with the server.
    pub fn builtin() -> Self {
        Self::new()
            .register(system::NAME, system::module)
            .register(linear::NAME, linear::module)
            .register(digitalocean::NAME, digitalocean::module)
    }

    /// Add a module factory.
    pub fn register<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&ModuleContext) -> Result<ServiceModule, ToolError> + Send + Sync + 'static,
    {
        self.factories.push((name.into(), Arc::new(factory)));
        self
    }

    /// Add an already-built module.
    pub fn register_module(self, module: ServiceModule) -> Self {
        let name = module.name().to_string();
        self.register(name, move |_ctx: &ModuleContext| Ok(module.clone()))
    }

    /// Registered module names in order.
    pub fn names(&self) -> Vec<&str> {
        self.factories.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Number of registered modules.
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Run the factory of every selected module against `ctx`.
    ///
    /// Modules left out by `selection` are never built, so their declaration
    /// errors cannot affect the catalog.
    pub fn instantiate(
        &self,
        ctx: &ModuleContext,
        selection: &Selection,
    ) -> Result<Vec<Arc<ServiceModule>>, ToolError> {
        self.factories
            .iter()
            .filter(|(name, _)| {
                let selected = selection.includes(name);
                if !selected {
                    debug!("Skipping unselected module '{}'", name);
                }
                selected
            })
            .map(|(name, factory)| {
                let module = factory(ctx)?;
                debug!(
                    "Instantiated module '{}' with {} tools",
                    name,
                    module.tools().len()
                );
                Ok(Arc::new(module))
            })
            .collect()
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.names())
            .finish()
    }
}
