//! Tool descriptors and their parameter schemas.
//!
//! A [`ToolDescriptor`] is the advertised, immutable face of one tool: its
//! name, owning service, description, parameter schema and the handler it is
//! bound to. Descriptors are built once at module initialization and shared
//! as `Arc<ToolDescriptor>` for the life of the process.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use jsonschema::{Draft, JSONSchema, ValidationError, error::ValidationErrorKind};
use rmcp::handler::server::tool::cached_schema_for_type;
use rmcp::model::{JsonObject, Tool};
use schemars::JsonSchema;
use serde::Serialize;
use serde_json::Value;

use super::error::ToolError;
use super::handlers::ToolHandler;

// ============================================================================
// Parameter Schema
// ============================================================================

/// A single argument that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// Dotted path of the offending field (`<root>` for the payload itself).
    pub field: String,
    /// Human-readable reason.
    pub message: String,
}

impl FieldError {
    fn from_validation(error: ValidationError<'_>) -> Self {
        let path = error.instance_path.to_string();
        let path = path.trim_start_matches('/').replace('/', ".");

        let field = match &error.kind {
            ValidationErrorKind::Required { property } => {
                let property = property
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| property.to_string());
                if path.is_empty() {
                    property
                } else {
                    format!("{}.{}", path, property)
                }
            }
            _ if path.is_empty() => "<root>".to_string(),
            _ => path,
        };

        Self {
            field,
            message: error.to_string(),
        }
    }
}

/// Structural description of the arguments a tool accepts.
///
/// Holds the JSON Schema advertised to clients together with its compiled
/// validator, so validation on the request path never re-parses the schema.
#[derive(Clone)]
pub struct ParameterSchema {
    raw: Arc<JsonObject>,
    compiled: Arc<JSONSchema>,
}

impl ParameterSchema {
    /// Compile a schema object for `tool`.
    ///
    /// The schema must describe an object; a missing `type` is treated as
    /// `"object"`.
    pub fn compile(tool: &str, schema: JsonObject) -> Result<Self, ToolError> {
        let mut raw = schema;
        match raw.get("type") {
            None => {
                raw.insert("type".to_string(), Value::String("object".to_string()));
            }
            Some(Value::String(t)) if t == "object" => {}
            Some(other) => {
                return Err(ToolError::invalid_schema(
                    tool,
                    format!("top-level type must be \"object\", got {}", other),
                ));
            }
        }

        let mut for_validation = raw.clone();
        for_validation.remove("$schema");
        let for_validation = Value::Object(for_validation);

        let compiled = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&for_validation)
            .map_err(|e| ToolError::invalid_schema(tool, e.to_string()))?;

        Ok(Self {
            raw: Arc::new(raw),
            compiled: Arc::new(compiled),
        })
    }

    /// Schema for a tool that takes no arguments.
    pub fn empty(tool: &str) -> Result<Self, ToolError> {
        let mut schema = JsonObject::new();
        schema.insert("type".to_string(), Value::String("object".to_string()));
        schema.insert("properties".to_string(), Value::Object(JsonObject::new()));
        Self::compile(tool, schema)
    }

    /// The schema as advertised to clients.
    pub fn as_object(&self) -> &Arc<JsonObject> {
        &self.raw
    }

    /// Names listed under `required`.
    pub fn required_fields(&self) -> Vec<&str> {
        self.raw
            .get("required")
            .and_then(Value::as_array)
            .map(|fields| fields.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    /// Check `args` against the schema, collecting every failing field.
    pub fn validate(&self, args: &Value) -> Result<(), Vec<FieldError>> {
        match self.compiled.validate(args) {
            Ok(()) => Ok(()),
            Err(errors) => Err(errors.map(FieldError::from_validation).collect()),
        }
    }
}

impl fmt::Debug for ParameterSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParameterSchema")
            .field("schema", &self.raw)
            .finish()
    }
}

// ============================================================================
// Tool Descriptor
// ============================================================================

/// An advertised tool bound to its handler.
pub struct ToolDescriptor {
    name: String,
    service_name: String,
    description: String,
    parameter_schema: ParameterSchema,
    handler: Arc<dyn ToolHandler>,
    timeout: Option<Duration>,
}

impl ToolDescriptor {
    /// Start declaring a tool.
    pub fn builder(
        name: impl Into<String>,
        description: impl Into<String>,
        handler: Arc<dyn ToolHandler>,
    ) -> ToolDescriptorBuilder {
        ToolDescriptorBuilder {
            name: name.into(),
            description: description.into(),
            schema: SchemaSource::Empty,
            handler,
            timeout: None,
        }
    }

    /// Unique tool name, stable across restarts.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the owning service module.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Description shown to the calling model.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Accepted arguments.
    pub fn parameter_schema(&self) -> &ParameterSchema {
        &self.parameter_schema
    }

    /// The bound handler.
    pub fn handler(&self) -> &Arc<dyn ToolHandler> {
        &self.handler
    }

    /// Per-tool deadline override, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Public listing entry (no handler internals).
    pub fn listing(&self) -> ToolListing {
        ToolListing {
            name: self.name.clone(),
            description: self.description.clone(),
            parameter_schema: Value::Object(self.parameter_schema.as_object().as_ref().clone()),
            service_name: self.service_name.clone(),
        }
    }

    /// Create a Tool model for this tool (metadata).
    pub fn to_tool(&self) -> Tool {
        Tool {
            name: self.name.clone().into(),
            description: Some(self.description.clone().into()),
            input_schema: self.parameter_schema.as_object().clone(),
            annotations: None,
            output_schema: None,
            icons: None,
            meta: None,
            title: None,
        }
    }
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("service_name", &self.service_name)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Catalog listing entry returned to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolListing {
    pub name: String,
    pub description: String,
    pub parameter_schema: Value,
    pub service_name: String,
}

enum SchemaSource {
    Empty,
    Object(JsonObject),
    Invalid(String),
}

/// Builder for [`ToolDescriptor`]; finished by the owning module.
pub struct ToolDescriptorBuilder {
    name: String,
    description: String,
    schema: SchemaSource,
    handler: Arc<dyn ToolHandler>,
    timeout: Option<Duration>,
}

impl ToolDescriptorBuilder {
    /// Derive the parameter schema from a `schemars` parameter struct.
    pub fn params<P: JsonSchema + 'static>(mut self) -> Self {
        self.schema = SchemaSource::Object(cached_schema_for_type::<P>().as_ref().clone());
        self
    }

    /// Use a literal JSON Schema object.
    pub fn schema(mut self, schema: Value) -> Self {
        self.schema = match schema {
            Value::Object(map) => SchemaSource::Object(map),
            other => SchemaSource::Invalid(format!("schema must be a JSON object, got {}", other)),
        };
        self
    }

    /// Override the dispatcher's default deadline for this tool.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The tool name being declared.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Finish the descriptor on behalf of `service_name`.
    pub fn build(self, service_name: &str) -> Result<ToolDescriptor, ToolError> {
        if !is_valid_tool_name(&self.name) {
            return Err(ToolError::InvalidName(self.name));
        }

        let parameter_schema = match self.schema {
            SchemaSource::Empty => ParameterSchema::empty(&self.name)?,
            SchemaSource::Object(map) => ParameterSchema::compile(&self.name, map)?,
            SchemaSource::Invalid(reason) => {
                return Err(ToolError::invalid_schema(&self.name, reason));
            }
        };

        Ok(ToolDescriptor {
            name: self.name,
            service_name: service_name.to_string(),
            description: self.description,
            parameter_schema,
            handler: self.handler,
            timeout: self.timeout,
        })
    }
}

/// Tool names are `[A-Za-z0-9_-]{1,64}`, the common denominator of MCP clients.
fn is_valid_tool_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::tools::handlers::handler_fn;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, JsonSchema)]
    #[allow(dead_code)]
    struct SearchParams {
        /// Free text query.
        query: String,
        /// Maximum results.
        #[serde(default)]
        limit: Option<u32>,
    }

    fn noop() -> Arc<dyn ToolHandler> {
        handler_fn(|_args, _cancel| async { Ok(json!(null)) })
    }

    #[test]
    fn test_params_schema_from_type() {
        let tool = ToolDescriptor::builder("search", "Search things", noop())
            .params::<SearchParams>()
            .build("alpha")
            .unwrap();

        assert_eq!(tool.service_name(), "alpha");
        assert_eq!(tool.parameter_schema().required_fields(), vec!["query"]);
        assert!(tool.parameter_schema().validate(&json!({ "query": "x" })).is_ok());
    }

    #[test]
    fn test_missing_required_field_is_reported() {
        let tool = ToolDescriptor::builder("search", "Search things", noop())
            .params::<SearchParams>()
            .build("alpha")
            .unwrap();

        let errors = tool
            .parameter_schema()
            .validate(&json!({ "limit": 3 }))
            .unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "query");
    }

    #[test]
    fn test_wrong_type_reports_field_path() {
        let tool = ToolDescriptor::builder("search", "Search things", noop())
            .params::<SearchParams>()
            .build("alpha")
            .unwrap();

        let errors = tool
            .parameter_schema()
            .validate(&json!({ "query": 42 }))
            .unwrap_err();
        assert_eq!(errors[0].field, "query");
    }

    #[test]
    fn test_literal_schema() {
        let tool = ToolDescriptor::builder("get_thing", "Get a thing", noop())
            .schema(json!({
                "type": "object",
                "required": ["id"],
                "properties": { "id": { "type": "string" } }
            }))
            .build("alpha")
            .unwrap();

        assert!(tool.parameter_schema().validate(&json!({})).is_err());
        assert!(tool.parameter_schema().validate(&json!({ "id": "a" })).is_ok());
    }

    #[test]
    fn test_empty_schema_accepts_empty_object() {
        let tool = ToolDescriptor::builder("ping", "Ping", noop())
            .build("alpha")
            .unwrap();
        assert!(tool.parameter_schema().validate(&json!({})).is_ok());
        assert!(tool.parameter_schema().required_fields().is_empty());
    }

    #[test]
    fn test_non_object_schema_rejected() {
        let result = ToolDescriptor::builder("bad", "Bad", noop())
            .schema(json!({ "type": "string" }))
            .build("alpha");
        assert!(matches!(result, Err(ToolError::InvalidSchema { .. })));

        let result = ToolDescriptor::builder("bad", "Bad", noop())
            .schema(json!("nope"))
            .build("alpha");
        assert!(matches!(result, Err(ToolError::InvalidSchema { .. })));
    }

    #[test]
    fn test_invalid_tool_name_rejected() {
        let result = ToolDescriptor::builder("has space", "Bad", noop()).build("alpha");
        assert!(matches!(result, Err(ToolError::InvalidName(_))));
    }

    #[test]
    fn test_listing_has_no_handler() {
        let tool = ToolDescriptor::builder("ping", "Ping", noop())
            .build("alpha")
            .unwrap();
        let listing = serde_json::to_value(tool.listing()).unwrap();
        assert_eq!(listing["name"], "ping");
        assert_eq!(listing["serviceName"], "alpha");
        assert_eq!(listing["parameterSchema"]["type"], "object");
        assert!(listing.get("handler").is_none());
    }
}
