//! Linear issue tracker tools.
//!
//! Linear exposes a single GraphQL endpoint. The API key is sent verbatim in
//! the `Authorization` header (no `Bearer` prefix). GraphQL-level `errors`
//! arrays are surfaced as handler failures even when the HTTP status is 200.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domains::tools::descriptor::ToolDescriptor;
use crate::domains::tools::error::ToolError;
use crate::domains::tools::handlers::{HandlerError, handler_fn, parse_args};
use crate::domains::tools::module::{Capability, ModuleContext, ServiceModule};

use super::api_client::{ApiClient, Auth};

/// Module name as used by the selection policy.
pub const NAME: &str = "linear";

/// Secret holding the Linear personal API key.
pub const API_KEY: &str = "LINEAR_API_KEY";

/// Public GraphQL endpoint.
pub const ENDPOINT: &str = "https://api.linear.app/graphql";

const MAX_FIRST: u32 = 50;

const ISSUE_FIELDS: &str = "
    id identifier title url priority priorityLabel createdAt updatedAt
    dueDate estimate description
    state { id name type }
    assignee { id name email }
    team { id name key }
    project { id name }
    cycle { id name number }
    labels { nodes { id name } }
";

const ISSUE_FIELDS_BRIEF: &str = "
    id identifier title url priority priorityLabel createdAt updatedAt
    state { name type }
    assignee { name }
    team { name key }
    labels { nodes { name } }
";

// ============================================================================
// Parameters
// ============================================================================

/// Parameters for `linear_search_issues`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SearchIssuesParams {
    /// Full-text search over title and description.
    #[schemars(description = "Full-text search query matched against issue title and description")]
    #[serde(default)]
    pub query: Option<String>,

    #[schemars(description = "Filter by team ID")]
    #[serde(default)]
    pub team_id: Option<String>,

    #[schemars(description = "Filter by assignee user ID; use 'me' for the authenticated user")]
    #[serde(default)]
    pub assignee_id: Option<String>,

    #[schemars(description = "Filter by workflow state name (e.g. \"In Progress\")")]
    #[serde(default)]
    pub state_name: Option<String>,

    #[schemars(
        description = "Filter by state type: triage, backlog, unstarted, started, completed, cancelled"
    )]
    #[serde(default)]
    pub state_type: Option<String>,

    #[schemars(description = "Filter by priority (0=none, 1=urgent, 2=high, 3=medium, 4=low)")]
    #[serde(default)]
    pub priority: Option<u8>,

    #[schemars(description = "Filter by label name")]
    #[serde(default)]
    pub label_name: Option<String>,

    #[schemars(description = "Filter by project ID")]
    #[serde(default)]
    pub project_id: Option<String>,

    /// Page size (default: 25, max: 50).
    #[schemars(description = "Number of results to return (default: 25, max: 50)")]
    #[serde(default = "default_first")]
    pub first: u32,
}

fn default_first() -> u32 {
    25
}

/// Parameters for `linear_get_issue`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct GetIssueParams {
    #[schemars(description = "Issue ID (UUID) or identifier such as \"ENG-123\"")]
    pub issue_id: String,

    #[schemars(description = "Include the issue's comments (default: false)")]
    #[serde(default)]
    pub include_comments: bool,
}

// ============================================================================
// Client
// ============================================================================

struct LinearClient {
    api: ApiClient,
}

impl LinearClient {
    async fn graphql(
        &self,
        query: &str,
        variables: Value,
        cancel: &CancellationToken,
    ) -> Result<Value, HandlerError> {
        let mut payload = json!({ "query": query });
        if variables.as_object().is_some_and(|v| !v.is_empty()) {
            payload["variables"] = variables;
        }

        let mut response = self.api.post("", &payload, cancel).await?;

        if let Some(errors) = response.get("errors").and_then(Value::as_array) {
            let messages: Vec<String> = errors
                .iter()
                .map(|e| {
                    e.get("message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| e.to_string())
                })
                .collect();
            return Err(HandlerError::other(format!(
                "GraphQL errors: {}",
                messages.join("; ")
            )));
        }

        Ok(response
            .get_mut("data")
            .map(Value::take)
            .unwrap_or_else(|| json!({})))
    }

    async fn list_teams(&self, cancel: &CancellationToken) -> Result<Value, HandlerError> {
        let data = self
            .graphql(
                "query Teams { teams { nodes { id name key description } } }",
                json!({}),
                cancel,
            )
            .await?;

        let teams: Vec<Value> = nodes(&data["teams"])
            .iter()
            .map(|team| {
                json!({
                    "id": str_field(team, "id"),
                    "name": str_field(team, "name"),
                    "key": str_field(team, "key"),
                    "description": team.get("description").cloned().unwrap_or(Value::Null),
                })
            })
            .collect();

        Ok(json!({ "total": teams.len(), "teams": teams }))
    }

    async fn search_issues(
        &self,
        params: SearchIssuesParams,
        cancel: &CancellationToken,
    ) -> Result<Value, HandlerError> {
        let first = params.first.clamp(1, MAX_FIRST);

        let nodes_value = match params.query.as_deref().filter(|q| !q.trim().is_empty()) {
            Some(term) => {
                let query = format!(
                    "query SearchIssues($query: String!, $first: Int) {{ \
                     searchIssues(term: $query, first: $first) {{ nodes {{ {} }} }} }}",
                    ISSUE_FIELDS_BRIEF
                );
                let data = self
                    .graphql(&query, json!({ "query": term, "first": first }), cancel)
                    .await?;
                data["searchIssues"].clone()
            }
            None => {
                let query = format!(
                    "query Issues($filter: IssueFilter, $first: Int) {{ \
                     issues(filter: $filter, first: $first, orderBy: updatedAt) {{ nodes {{ {} }} }} }}",
                    ISSUE_FIELDS_BRIEF
                );
                let mut variables = json!({ "first": first });
                let filter = issue_filter(&params);
                if !filter.is_empty() {
                    variables["filter"] = Value::Object(filter);
                }
                let data = self.graphql(&query, variables, cancel).await?;
                data["issues"].clone()
            }
        };

        let issues: Vec<Value> = nodes(&nodes_value).iter().map(brief_issue).collect();
        debug!("Linear search returned {} issues", issues.len());

        Ok(json!({ "total": issues.len(), "issues": issues }))
    }

    async fn get_issue(
        &self,
        params: GetIssueParams,
        cancel: &CancellationToken,
    ) -> Result<Value, HandlerError> {
        let comments = if params.include_comments {
            "comments { nodes { id body createdAt updatedAt user { id name } } }"
        } else {
            ""
        };
        let query = format!(
            "query Issue($id: String!) {{ issue(id: $id) {{ {} {} }} }}",
            ISSUE_FIELDS, comments
        );

        let data = self
            .graphql(&query, json!({ "id": params.issue_id }), cancel)
            .await?;

        let issue = match data.get("issue") {
            Some(issue) if issue.is_object() => issue,
            _ => {
                return Err(HandlerError::Status {
                    status: 404,
                    message: format!("issue '{}' not found", params.issue_id),
                });
            }
        };

        let mut result = full_issue(issue);
        if params.include_comments {
            let comments: Vec<Value> = nodes(&issue["comments"])
                .iter()
                .map(|c| {
                    json!({
                        "id": str_field(c, "id"),
                        "body": str_field(c, "body"),
                        "author": str_field(&c["user"], "name"),
                        "createdAt": str_field(c, "createdAt"),
                        "updatedAt": str_field(c, "updatedAt"),
                    })
                })
                .collect();
            result.insert("comments".to_string(), Value::Array(comments));
        }

        Ok(Value::Object(result))
    }
}

// ============================================================================
// Formatting helpers
// ============================================================================

fn nodes(connection: &Value) -> &[Value] {
    connection
        .get("nodes")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn label_names(issue: &Value) -> Vec<Value> {
    nodes(&issue["labels"])
        .iter()
        .map(|l| Value::String(str_field(l, "name").to_string()))
        .collect()
}

fn issue_filter(params: &SearchIssuesParams) -> Map<String, Value> {
    let mut filter = Map::new();

    if let Some(team_id) = &params.team_id {
        filter.insert("team".into(), json!({ "id": { "eq": team_id } }));
    }
    if let Some(assignee) = &params.assignee_id {
        let value = if assignee.eq_ignore_ascii_case("me") {
            json!({ "isMe": { "eq": true } })
        } else {
            json!({ "id": { "eq": assignee } })
        };
        filter.insert("assignee".into(), value);
    }
    if let Some(state_name) = &params.state_name {
        filter.insert("state".into(), json!({ "name": { "eqIgnoreCase": state_name } }));
    } else if let Some(state_type) = &params.state_type {
        filter.insert("state".into(), json!({ "type": { "eq": state_type } }));
    }
    if let Some(priority) = params.priority {
        filter.insert("priority".into(), json!({ "eq": priority }));
    }
    if let Some(label) = &params.label_name {
        filter.insert("labels".into(), json!({ "name": { "eqIgnoreCase": label } }));
    }
    if let Some(project_id) = &params.project_id {
        filter.insert("project".into(), json!({ "id": { "eq": project_id } }));
    }

    filter
}

fn brief_issue(issue: &Value) -> Value {
    let assignee = issue
        .get("assignee")
        .and_then(|a| a.get("name"))
        .and_then(Value::as_str)
        .unwrap_or("Unassigned");

    let mut out = json!({
        "identifier": str_field(issue, "identifier"),
        "title": str_field(issue, "title"),
        "url": str_field(issue, "url"),
        "priority": str_field(issue, "priorityLabel"),
        "state": str_field(&issue["state"], "name"),
        "assignee": assignee,
        "team": str_field(&issue["team"], "key"),
        "updatedAt": str_field(issue, "updatedAt"),
    });
    let labels = label_names(issue);
    if !labels.is_empty() {
        out["labels"] = Value::Array(labels);
    }
    out
}

fn full_issue(issue: &Value) -> Map<String, Value> {
    let mut out = Map::new();
    for key in ["id", "identifier", "title", "url", "priorityLabel", "createdAt", "updatedAt"] {
        out.insert(key.into(), Value::String(str_field(issue, key).to_string()));
    }
    out.insert(
        "priority".into(),
        issue.get("priority").cloned().unwrap_or(json!(0)),
    );

    if issue["state"].is_object() {
        out.insert("state".into(), json!(str_field(&issue["state"], "name")));
        out.insert("stateType".into(), json!(str_field(&issue["state"], "type")));
    }
    let assignee = issue
        .get("assignee")
        .and_then(|a| a.get("name"))
        .and_then(Value::as_str)
        .unwrap_or("Unassigned");
    out.insert("assignee".into(), json!(assignee));
    if issue["team"].is_object() {
        out.insert("team".into(), json!(str_field(&issue["team"], "name")));
    }
    if issue["project"].is_object() {
        out.insert("project".into(), json!(str_field(&issue["project"], "name")));
    }
    if issue["cycle"].is_object() {
        let cycle = match issue["cycle"].get("name").and_then(Value::as_str) {
            Some(name) if !name.is_empty() => json!(name),
            _ => issue["cycle"].get("number").cloned().unwrap_or(Value::Null),
        };
        out.insert("cycle".into(), cycle);
    }

    let labels = label_names(issue);
    if !labels.is_empty() {
        out.insert("labels".into(), Value::Array(labels));
    }
    if let Some(description) = issue.get("description").and_then(Value::as_str) {
        if !description.is_empty() {
            out.insert("description".into(), json!(description));
        }
    }
    if let Some(due) = issue.get("dueDate").filter(|v| !v.is_null()) {
        out.insert("dueDate".into(), due.clone());
    }
    if let Some(estimate) = issue.get("estimate").filter(|v| !v.is_null()) {
        out.insert("estimate".into(), estimate.clone());
    }

    out
}

// ============================================================================
// Module
// ============================================================================

/// Build the `linear` module against the public endpoint.
pub fn module(ctx: &ModuleContext) -> Result<ServiceModule, ToolError> {
    module_with_endpoint(ctx, ENDPOINT)
}

pub(crate) fn module_with_endpoint(
    ctx: &ModuleContext,
    endpoint: &str,
) -> Result<ServiceModule, ToolError> {
    let auth = ctx.secret(API_KEY).map(|value| Auth::Header {
        name: "Authorization",
        value,
    });
    let client = Arc::new(LinearClient {
        api: ApiClient::new(NAME, API_KEY, endpoint, auth, ctx.backend_timeout),
    });

    let teams_client = Arc::clone(&client);
    let search_client = Arc::clone(&client);
    let issue_client = client;

    ServiceModule::builder(NAME)
        .requires(Capability::secret(API_KEY))
        .tool(ToolDescriptor::builder(
            "linear_list_teams",
            "List all Linear teams with their IDs, names and keys. Team IDs are needed to filter issues.",
            handler_fn(move |_args, cancel| {
                let client = Arc::clone(&teams_client);
                async move { client.list_teams(&cancel).await }
            }),
        ))
        .tool(
            ToolDescriptor::builder(
                "linear_search_issues",
                "Search and filter Linear issues by text, team, assignee, state, priority, label or project.",
                handler_fn(move |args, cancel| {
                    let client = Arc::clone(&search_client);
                    async move {
                        let params: SearchIssuesParams = parse_args(args)?;
                        client.search_issues(params, &cancel).await
                    }
                }),
            )
            .params::<SearchIssuesParams>(),
        )
        .tool(
            ToolDescriptor::builder(
                "linear_get_issue",
                "Get full details of a Linear issue by ID or identifier, optionally with comments.",
                handler_fn(move |args, cancel| {
                    let client = Arc::clone(&issue_client);
                    async move {
                        let params: GetIssueParams = parse_args(args)?;
                        client.get_issue(params, &cancel).await
                    }
                }),
            )
            .params::<GetIssueParams>(),
        )
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::secrets::StaticSecretStore;
    use crate::domains::tools::handlers::ToolArgs;
    use axum::{Json, Router, http::HeaderMap, routing::post};
    use std::time::Duration;

    fn ctx(with_key: bool) -> ModuleContext {
        let store = if with_key {
            StaticSecretStore::new().with(API_KEY, "lin_test_key")
        } else {
            StaticSecretStore::new()
        };
        ModuleContext {
            secrets: Arc::new(store),
            backend_timeout: Duration::from_secs(5),
            server_name: "test".to_string(),
            server_version: "0.0.0".to_string(),
        }
    }

    async fn fake_linear() -> String {
        let app = Router::new().route(
            "/graphql",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("lin_test_key") {
                    return Json(json!({ "errors": [{ "message": "Authentication required" }] }));
                }
                let query = body["query"].as_str().unwrap_or_default();
                if query.contains("teams") {
                    Json(json!({ "data": { "teams": { "nodes": [
                        { "id": "t1", "name": "Engineering", "key": "ENG", "description": null }
                    ] } } }))
                } else if query.contains("searchIssues") {
                    Json(json!({ "data": { "searchIssues": { "nodes": [{
                        "identifier": "ENG-1",
                        "title": format!("match for {}", body["variables"]["query"].as_str().unwrap_or_default()),
                        "url": "https://linear.app/x/ENG-1",
                        "priorityLabel": "High",
                        "state": { "name": "Todo", "type": "unstarted" },
                        "assignee": null,
                        "team": { "name": "Engineering", "key": "ENG" },
                        "labels": { "nodes": [{ "name": "bug" }] },
                        "updatedAt": "2026-01-01T00:00:00Z"
                    }] } } }))
                } else if query.contains("issues(") {
                    Json(json!({ "data": { "issues": { "nodes": [], "echo": body["variables"].clone() } } }))
                } else if body["variables"]["id"] == "ENG-404" {
                    Json(json!({ "data": { "issue": null } }))
                } else {
                    Json(json!({ "data": { "issue": {
                        "id": "uuid-1",
                        "identifier": "ENG-2",
                        "title": "Fix it",
                        "priority": 2,
                        "priorityLabel": "High",
                        "state": { "name": "In Progress", "type": "started" },
                        "assignee": { "name": "Sam" },
                        "team": { "name": "Engineering" },
                        "labels": { "nodes": [] },
                        "description": "",
                        "estimate": 3,
                        "comments": { "nodes": [
                            { "id": "c1", "body": "on it", "user": { "name": "Sam" } }
                        ] }
                    } } }))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/graphql", addr)
    }

    async fn call(module: &ServiceModule, tool: &str, args: Value) -> Result<Value, HandlerError> {
        let descriptor = module
            .tools()
            .iter()
            .find(|t| t.name() == tool)
            .unwrap();
        let args: ToolArgs = args.as_object().cloned().unwrap_or_default();
        descriptor.handler().call(args, CancellationToken::new()).await
    }

    #[test]
    fn test_module_declares_capability_and_tools() {
        let module = module(&ctx(false)).unwrap();
        assert_eq!(module.required_capabilities(), &[Capability::secret(API_KEY)]);
        let names: Vec<_> = module.tools().iter().map(|t| t.name()).collect();
        assert_eq!(
            names,
            vec!["linear_list_teams", "linear_search_issues", "linear_get_issue"]
        );
    }

    #[test]
    fn test_get_issue_requires_issue_id() {
        let module = module(&ctx(true)).unwrap();
        let tool = module.tools().iter().find(|t| t.name() == "linear_get_issue").unwrap();
        assert_eq!(tool.parameter_schema().required_fields(), vec!["issue_id"]);
    }

    #[test]
    fn test_issue_filter_building() {
        let params: SearchIssuesParams = serde_json::from_value(json!({
            "assignee_id": "ME",
            "state_name": "Done",
            "state_type": "completed",
            "priority": 1
        }))
        .unwrap();
        let filter = issue_filter(&params);
        assert_eq!(filter["assignee"], json!({ "isMe": { "eq": true } }));
        assert_eq!(filter["state"], json!({ "name": { "eqIgnoreCase": "Done" } }));
        assert_eq!(filter["priority"], json!({ "eq": 1 }));
        assert_eq!(params.first, 25);
    }

    #[tokio::test]
    async fn test_list_teams() {
        let module = module_with_endpoint(&ctx(true), &fake_linear().await).unwrap();
        let value = call(&module, "linear_list_teams", json!({})).await.unwrap();
        assert_eq!(value["total"], 1);
        assert_eq!(value["teams"][0]["key"], "ENG");
    }

    #[tokio::test]
    async fn test_search_uses_full_text_query() {
        let module = module_with_endpoint(&ctx(true), &fake_linear().await).unwrap();
        let value = call(&module, "linear_search_issues", json!({ "query": "login" }))
            .await
            .unwrap();
        assert_eq!(value["total"], 1);
        let issue = &value["issues"][0];
        assert_eq!(issue["title"], "match for login");
        assert_eq!(issue["assignee"], "Unassigned");
        assert_eq!(issue["team"], "ENG");
        assert_eq!(issue["labels"], json!(["bug"]));
    }

    #[tokio::test]
    async fn test_get_issue_with_comments() {
        let module = module_with_endpoint(&ctx(true), &fake_linear().await).unwrap();
        let value = call(
            &module,
            "linear_get_issue",
            json!({ "issue_id": "ENG-2", "include_comments": true }),
        )
        .await
        .unwrap();
        assert_eq!(value["identifier"], "ENG-2");
        assert_eq!(value["stateType"], "started");
        assert_eq!(value["estimate"], 3);
        assert!(value.get("description").is_none());
        assert_eq!(value["comments"][0]["author"], "Sam");
    }

    #[tokio::test]
    async fn test_missing_issue_is_not_found() {
        let module = module_with_endpoint(&ctx(true), &fake_linear().await).unwrap();
        let err = call(&module, "linear_get_issue", json!({ "issue_id": "ENG-404" }))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_graphql_errors_become_failures() {
        let endpoint = fake_linear().await;
        let ctx = ModuleContext {
            secrets: Arc::new(StaticSecretStore::new().with(API_KEY, "wrong")),
            ..ctx(true)
        };
        let module = module_with_endpoint(&ctx, &endpoint).unwrap();
        let err = call(&module, "linear_list_teams", json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "GraphQL errors: Authentication required");
    }

    #[tokio::test]
    async fn test_without_key_reports_missing_credential() {
        let module = module_with_endpoint(&ctx(false), "http://127.0.0.1:9/graphql").unwrap();
        let err = call(&module, "linear_list_teams", json!({})).await.unwrap_err();
        assert!(matches!(err, HandlerError::MissingCredential(_)));
    }
}
