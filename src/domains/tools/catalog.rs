//! Catalog assembly.
//!
//! The [`CatalogBuilder`] turns the full set of known service modules and a
//! [`Selection`] into an immutable [`ActiveCatalog`]. Reloads build a fresh
//! catalog and swap it into the [`CatalogHandle`]; readers always see one
//! complete catalog, never a partially built one.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock};

use rmcp::model::Tool;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::core::secrets::SecretStore;

use super::descriptor::{ToolDescriptor, ToolListing};
use super::module::ServiceModule;

// ============================================================================
// Selection Policy
// ============================================================================

/// Which service modules to activate.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Selection {
    /// Every known module.
    #[default]
    All,
    /// Only the named modules.
    Only(BTreeSet<String>),
}

impl Selection {
    /// Parse a selection value.
    ///
    /// Empty, `all` and `*` mean every module; anything else is a list of
    /// module names separated by commas or whitespace.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("all") || trimmed == "*" {
            return Self::All;
        }

        let names: BTreeSet<String> = trimmed
            .split(|c: char| c == ',' || c.is_whitespace())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
            .collect();

        if names.is_empty() {
            Self::All
        } else {
            Self::Only(names)
        }
    }

    /// Select exactly these modules.
    pub fn only<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Only(
            names
                .into_iter()
                .map(|n| n.into().to_lowercase())
                .collect(),
        )
    }

    /// Whether a module with this name is selected.
    pub fn includes(&self, module: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(names) => names.contains(&module.to_lowercase()),
        }
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Only(names) => {
                let names: Vec<_> = names.iter().map(String::as_str).collect();
                write!(f, "{}", names.join(","))
            }
        }
    }
}

// ============================================================================
// Errors and Warnings
// ============================================================================

/// Fatal catalog construction failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// Two selected modules declare the same tool.
    #[error(
        "Duplicate tool name '{tool}' declared by services '{first_service}' and '{second_service}'"
    )]
    DuplicateToolName {
        tool: String,
        first_service: String,
        second_service: String,
    },

    /// Two known modules share a name.
    #[error("Service module '{0}' is registered more than once")]
    DuplicateModule(String),
}

/// Non-fatal conditions recorded during a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CatalogWarning {
    /// The selection names a module nobody registered.
    UnknownModule { name: String },
    /// A selected module was left out because capabilities are missing.
    CapabilitiesMissing {
        service: String,
        missing: Vec<String>,
    },
}

impl fmt::Display for CatalogWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownModule { name } => {
                write!(f, "selection references unknown service '{}'", name)
            }
            Self::CapabilitiesMissing { service, missing } => write!(
                f,
                "service '{}' disabled, missing: {}",
                service,
                missing.join(", ")
            ),
        }
    }
}

// ============================================================================
// Active Catalog
// ============================================================================

/// A tool whose module was excluded for missing capabilities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExcludedTool {
    pub service: String,
    pub missing: Vec<String>,
}

/// Immutable, name-indexed set of servable tools.
#[derive(Debug, Default)]
pub struct ActiveCatalog {
    tools: Vec<Arc<ToolDescriptor>>,
    index: HashMap<String, usize>,
    excluded: HashMap<String, ExcludedTool>,
    services: Vec<String>,
    warnings: Vec<CatalogWarning>,
}

impl ActiveCatalog {
    /// A catalog with no tools, used before the first build completes.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Look up an active tool.
    pub fn get(&self, name: &str) -> Option<&Arc<ToolDescriptor>> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    /// Look up a tool whose module was excluded.
    pub fn excluded(&self, name: &str) -> Option<&ExcludedTool> {
        self.excluded.get(name)
    }

    /// Active tools in listing order.
    pub fn tools(&self) -> &[Arc<ToolDescriptor>] {
        &self.tools
    }

    /// Number of active tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tools are active.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Names of active services in registration order.
    pub fn services(&self) -> &[String] {
        &self.services
    }

    /// Warnings recorded while building.
    pub fn warnings(&self) -> &[CatalogWarning] {
        &self.warnings
    }

    /// Catalog listing for clients.
    pub fn listing(&self) -> Vec<ToolListing> {
        self.tools.iter().map(|t| t.listing()).collect()
    }

    /// Catalog as MCP Tool models.
    pub fn to_tools(&self) -> Vec<Tool> {
        self.tools.iter().map(|t| t.to_tool()).collect()
    }

    /// Short description for logs and status endpoints.
    pub fn summary(&self) -> CatalogSummary {
        let excluded: Vec<String> = self
            .excluded
            .values()
            .map(|e| e.service.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        CatalogSummary {
            tool_count: self.tools.len(),
            services: self.services.clone(),
            excluded_services: excluded,
            warnings: self.warnings.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Build outcome reported in logs and on the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSummary {
    pub tool_count: usize,
    pub services: Vec<String>,
    pub excluded_services: Vec<String>,
    pub warnings: Vec<String>,
}

impl fmt::Display for CatalogSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} tools from [{}]",
            self.tool_count,
            self.services.join(", ")
        )?;
        if !self.excluded_services.is_empty() {
            write!(f, ", excluded [{}]", self.excluded_services.join(", "))?;
        }
        if !self.warnings.is_empty() {
            write!(f, ", {} warnings", self.warnings.len())?;
        }
        Ok(())
    }
}

// ============================================================================
// Catalog Builder
// ============================================================================

/// Builds [`ActiveCatalog`]s against a capability source.
pub struct CatalogBuilder<'a> {
    secrets: &'a dyn SecretStore,
}

impl<'a> CatalogBuilder<'a> {
    /// Create a builder that checks capabilities against `secrets`.
    pub fn new(secrets: &'a dyn SecretStore) -> Self {
        Self { secrets }
    }

    /// Build a catalog from `modules` filtered by `selection`.
    ///
    /// Fails on duplicate module names and on any tool name declared by two
    /// selected modules, whether or not both modules end up active.
    pub fn build(
        &self,
        modules: &[Arc<ServiceModule>],
        selection: &Selection,
    ) -> Result<ActiveCatalog, CatalogError> {
        let mut known = BTreeSet::new();
        for module in modules {
            if !known.insert(module.name().to_lowercase()) {
                return Err(CatalogError::DuplicateModule(module.name().to_string()));
            }
        }

        let mut catalog = ActiveCatalog::empty();

        if let Selection::Only(names) = selection {
            for name in names.iter().filter(|n| !known.contains(*n)) {
                catalog.warnings.push(CatalogWarning::UnknownModule {
                    name: name.clone(),
                });
            }
        }

        let mut owners: HashMap<&str, &str> = HashMap::new();

        for module in modules.iter().filter(|m| selection.includes(m.name())) {
            for tool in module.tools() {
                if let Some(first) = owners.insert(tool.name(), module.name()) {
                    return Err(CatalogError::DuplicateToolName {
                        tool: tool.name().to_string(),
                        first_service: first.to_string(),
                        second_service: module.name().to_string(),
                    });
                }
            }

            let missing: Vec<String> = module
                .missing_capabilities(self.secrets)
                .into_iter()
                .map(ToString::to_string)
                .collect();

            if missing.is_empty() {
                for tool in module.tools() {
                    catalog
                        .index
                        .insert(tool.name().to_string(), catalog.tools.len());
                    catalog.tools.push(Arc::clone(tool));
                }
                catalog.services.push(module.name().to_string());
            } else {
                for tool in module.tools() {
                    catalog.excluded.insert(
                        tool.name().to_string(),
                        ExcludedTool {
                            service: module.name().to_string(),
                            missing: missing.clone(),
                        },
                    );
                }
                catalog.warnings.push(CatalogWarning::CapabilitiesMissing {
                    service: module.name().to_string(),
                    missing,
                });
            }
        }

        for warning in &catalog.warnings {
            warn!("Catalog: {}", warning);
        }
        info!("Catalog built: {} (selection: {})", catalog.summary(), selection);

        Ok(catalog)
    }
}

// ============================================================================
// Catalog Handle
// ============================================================================

/// Shared reference to the current catalog.
///
/// Readers take a cheap `Arc` snapshot and keep using it for the whole
/// invocation, even if a reload swaps in a new catalog meanwhile.
#[derive(Debug)]
pub struct CatalogHandle {
    current: RwLock<Arc<ActiveCatalog>>,
}

impl CatalogHandle {
    /// Create a handle holding `catalog`.
    pub fn new(catalog: ActiveCatalog) -> Self {
        Self {
            current: RwLock::new(Arc::new(catalog)),
        }
    }

    /// Snapshot of the current catalog.
    pub fn load(&self) -> Arc<ActiveCatalog> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    /// Replace the catalog, returning the previous one.
    pub fn swap(&self, catalog: ActiveCatalog) -> Arc<ActiveCatalog> {
        let next = Arc::new(catalog);
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *guard, next)
    }
}

impl Default for CatalogHandle {
    fn default() -> Self {
        Self::new(ActiveCatalog::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::secrets::StaticSecretStore;
    use crate::domains::tools::descriptor::ToolDescriptor;
    use crate::domains::tools::handlers::{ToolHandler, handler_fn};
    use crate::domains::tools::module::Capability;
    use serde_json::json;

    fn noop() -> Arc<dyn ToolHandler> {
        handler_fn(|_args, _cancel| async { Ok(json!(null)) })
    }

    fn module(name: &str, tools: &[&str]) -> Arc<ServiceModule> {
        let mut builder = ServiceModule::builder(name);
        for tool in tools {
            builder = builder.tool(ToolDescriptor::builder(*tool, "test tool", noop()));
        }
        Arc::new(builder.build().unwrap())
    }

    fn guarded(name: &str, tools: &[&str], secret: &str) -> Arc<ServiceModule> {
        let mut builder = ServiceModule::builder(name).requires(Capability::secret(secret));
        for tool in tools {
            builder = builder.tool(ToolDescriptor::builder(*tool, "test tool", noop()));
        }
        Arc::new(builder.build().unwrap())
    }

    #[test]
    fn test_selection_parse() {
        assert_eq!(Selection::parse(""), Selection::All);
        assert_eq!(Selection::parse("ALL"), Selection::All);
        assert_eq!(Selection::parse("*"), Selection::All);
        assert_eq!(Selection::parse(" , "), Selection::All);
        assert_eq!(
            Selection::parse("Alpha, beta gamma"),
            Selection::only(["alpha", "beta", "gamma"])
        );
    }

    #[test]
    fn test_selection_includes_case_insensitive() {
        let selection = Selection::parse("alpha");
        assert!(selection.includes("Alpha"));
        assert!(!selection.includes("beta"));
        assert!(Selection::All.includes("anything"));
    }

    #[test]
    fn test_build_all() {
        let secrets = StaticSecretStore::new();
        let modules = vec![module("alpha", &["a1", "a2"]), module("beta", &["b1"])];

        let catalog = CatalogBuilder::new(&secrets)
            .build(&modules, &Selection::All)
            .unwrap();

        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.services(), ["alpha", "beta"]);
        let names: Vec<_> = catalog.tools().iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["a1", "a2", "b1"]);
        assert!(catalog.warnings().is_empty());
    }

    #[test]
    fn test_build_explicit_selection_with_unknown_name() {
        let secrets = StaticSecretStore::new();
        let modules = vec![module("alpha", &["a1"]), module("beta", &["b1"])];

        let catalog = CatalogBuilder::new(&secrets)
            .build(&modules, &Selection::only(["alpha", "not_yet_enabled"]))
            .unwrap();

        assert_eq!(catalog.len(), 1);
        assert!(catalog.get("a1").is_some());
        assert!(catalog.get("b1").is_none());
        assert_eq!(
            catalog.warnings(),
            [CatalogWarning::UnknownModule {
                name: "not_yet_enabled".to_string()
            }]
        );
    }

    #[test]
    fn test_duplicate_tool_names_fail_naming_both_modules() {
        let secrets = StaticSecretStore::new();
        let modules = vec![
            module("alpha", &["fetch_widget"]),
            module("beta", &["fetch_widget"]),
        ];

        let err = CatalogBuilder::new(&secrets)
            .build(&modules, &Selection::only(["alpha", "beta"]))
            .unwrap_err();

        assert_eq!(
            err,
            CatalogError::DuplicateToolName {
                tool: "fetch_widget".to_string(),
                first_service: "alpha".to_string(),
                second_service: "beta".to_string(),
            }
        );
        let msg = err.to_string();
        assert!(msg.contains("alpha") && msg.contains("beta"));
    }

    #[test]
    fn test_duplicate_outside_selection_is_ignored() {
        let secrets = StaticSecretStore::new();
        let modules = vec![
            module("alpha", &["fetch_widget"]),
            module("beta", &["fetch_widget"]),
        ];

        let catalog = CatalogBuilder::new(&secrets)
            .build(&modules, &Selection::only(["alpha"]))
            .unwrap();
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_duplicate_with_excluded_module_still_fails() {
        let secrets = StaticSecretStore::new();
        let modules = vec![
            module("alpha", &["fetch_widget"]),
            guarded("beta", &["fetch_widget"], "BETA_TOKEN"),
        ];

        let result = CatalogBuilder::new(&secrets).build(&modules, &Selection::All);
        assert!(matches!(result, Err(CatalogError::DuplicateToolName { .. })));
    }

    #[test]
    fn test_duplicate_module_names_fail() {
        let secrets = StaticSecretStore::new();
        let modules = vec![module("alpha", &["a1"]), module("Alpha", &["a2"])];

        let result = CatalogBuilder::new(&secrets).build(&modules, &Selection::All);
        assert_eq!(result.unwrap_err(), CatalogError::DuplicateModule("Alpha".to_string()));
    }

    #[test]
    fn test_missing_capability_excludes_module_only() {
        let secrets = StaticSecretStore::new().with("GAMMA_TOKEN", "t");
        let modules = vec![
            module("alpha", &["a1", "a2"]),
            guarded("beta", &["b1", "b2"], "BETA_TOKEN"),
            guarded("gamma", &["g1"], "GAMMA_TOKEN"),
        ];

        let catalog = CatalogBuilder::new(&secrets)
            .build(&modules, &Selection::All)
            .unwrap();

        // Size is the sum over selected, capability-satisfied modules.
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.services(), ["alpha", "gamma"]);
        assert_eq!(
            catalog.excluded("b1"),
            Some(&ExcludedTool {
                service: "beta".to_string(),
                missing: vec!["BETA_TOKEN".to_string()],
            })
        );
        assert_eq!(catalog.summary().excluded_services, vec!["beta"]);
        assert_eq!(catalog.warnings().len(), 1);
    }

    #[test]
    fn test_summary_line_names_excluded_services() {
        let secrets = StaticSecretStore::new();
        let modules = vec![
            module("alpha", &["a1", "a2"]),
            guarded("beta", &["b1"], "BETA_TOKEN"),
        ];
        let catalog = CatalogBuilder::new(&secrets)
            .build(&modules, &Selection::All)
            .unwrap();

        assert_eq!(
            catalog.summary().to_string(),
            "2 tools from [alpha], excluded [beta], 1 warnings"
        );
        assert_eq!(
            ActiveCatalog::empty().summary().to_string(),
            "0 tools from []"
        );
    }

    #[test]
    fn test_listing_order_and_shape() {
        let secrets = StaticSecretStore::new();
        let modules = vec![module("beta", &["b1"]), module("alpha", &["a1"])];
        let catalog = CatalogBuilder::new(&secrets)
            .build(&modules, &Selection::All)
            .unwrap();

        let listing = catalog.listing();
        assert_eq!(listing[0].name, "b1");
        assert_eq!(listing[1].service_name, "alpha");
        assert_eq!(catalog.to_tools().len(), 2);
    }

    #[test]
    fn test_handle_swap_keeps_old_snapshot_intact() {
        let secrets = StaticSecretStore::new();
        let handle = CatalogHandle::default();
        assert!(handle.load().is_empty());

        let first = CatalogBuilder::new(&secrets)
            .build(&[module("alpha", &["a1"])], &Selection::All)
            .unwrap();
        handle.swap(first);
        let snapshot = handle.load();

        let second = CatalogBuilder::new(&secrets)
            .build(
                &[module("alpha", &["a1"]), module("beta", &["b1"])],
                &Selection::All,
            )
            .unwrap();
        let previous = handle.swap(second);

        assert_eq!(snapshot.len(), 1);
        assert_eq!(previous.len(), 1);
        assert_eq!(handle.load().len(), 2);
    }
}
