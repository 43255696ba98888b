//! DigitalOcean tools.
//!
//! Read-only views over the DigitalOcean v2 REST API: account, droplets and
//! DNS domains. Requests authenticate with a bearer token and go through
//! [`ApiClient`], which handles throttling and cancellation.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::domains::tools::descriptor::ToolDescriptor;
use crate::domains::tools::error::ToolError;
use crate::domains::tools::handlers::{HandlerError, handler_fn, parse_args};
use crate::domains::tools::module::{Capability, ModuleContext, ServiceModule};

use super::api_client::{ApiClient, Auth};

/// Module name as used by the selection policy.
pub const NAME: &str = "digitalocean";

/// Secret holding the personal access token.
pub const TOKEN: &str = "DIGITALOCEAN_TOKEN";

/// API base URL.
pub const BASE_URL: &str = "https://api.digitalocean.com/v2";

const MAX_PER_PAGE: u32 = 200;
const ZONE_FILE_PREVIEW: usize = 200;

/// Parameters for `digitalocean_list_droplets`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ListDropletsParams {
    #[schemars(description = "Only return droplets carrying this tag")]
    #[serde(default)]
    pub tag_name: Option<String>,

    #[schemars(description = "Results per page (default: 50, max: 200)")]
    #[serde(default = "default_per_page")]
    pub per_page: u32,

    #[schemars(description = "Page number, starting at 1 (default: 1)")]
    #[serde(default = "default_page")]
    pub page: u32,
}

fn default_per_page() -> u32 {
    50
}

fn default_page() -> u32 {
    1
}

/// Parameters for `digitalocean_get_droplet`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct GetDropletParams {
    #[schemars(description = "Numeric droplet ID")]
    pub droplet_id: u64,
}

/// Summarize a droplet the way listings present it.
fn droplet_summary(droplet: &Value) -> Value {
    let mut public_ipv4 = "";
    let mut private_ipv4 = "";
    if let Some(v4) = droplet["networks"]["v4"].as_array() {
        for net in v4 {
            let ip = net["ip_address"].as_str().unwrap_or_default();
            match net["type"].as_str() {
                Some("public") => public_ipv4 = ip,
                Some("private") => private_ipv4 = ip,
                _ => {}
            }
        }
    }

    let image = droplet["image"]["slug"]
        .as_str()
        .or_else(|| droplet["image"]["name"].as_str())
        .unwrap_or_default();

    json!({
        "id": droplet["id"],
        "name": droplet["name"].as_str().unwrap_or_default(),
        "status": droplet["status"].as_str().unwrap_or_default(),
        "region": droplet["region"]["slug"].as_str().unwrap_or_default(),
        "region_name": droplet["region"]["name"].as_str().unwrap_or_default(),
        "size": droplet["size_slug"].as_str().unwrap_or_default(),
        "vcpus": droplet["vcpus"],
        "memory_mb": droplet["memory"],
        "disk_gb": droplet["disk"],
        "public_ipv4": public_ipv4,
        "private_ipv4": private_ipv4,
        "image": image,
        "tags": droplet.get("tags").cloned().unwrap_or_else(|| json!([])),
        "vpc_uuid": droplet["vpc_uuid"].as_str().unwrap_or_default(),
        "created_at": droplet["created_at"].as_str().unwrap_or_default(),
    })
}

fn array_or_empty(value: &Value) -> Value {
    if value.is_array() {
        value.clone()
    } else {
        json!([])
    }
}

struct DigitalOceanClient {
    api: ApiClient,
}

impl DigitalOceanClient {
    async fn get_account(&self, cancel: &CancellationToken) -> Result<Value, HandlerError> {
        let data = self.api.get("/account", &[], cancel).await?;
        let account = &data["account"];
        Ok(json!({
            "email": account["email"].as_str().unwrap_or_default(),
            "uuid": account["uuid"].as_str().unwrap_or_default(),
            "droplet_limit": account["droplet_limit"],
            "floating_ip_limit": account["floating_ip_limit"],
            "volume_limit": account["volume_limit"],
            "status": account["status"].as_str().unwrap_or_default(),
            "team": account["team"]["name"].as_str().unwrap_or_default(),
        }))
    }

    async fn list_droplets(
        &self,
        params: ListDropletsParams,
        cancel: &CancellationToken,
    ) -> Result<Value, HandlerError> {
        let page = params.page.max(1);
        let mut query = vec![
            ("per_page", params.per_page.clamp(1, MAX_PER_PAGE).to_string()),
            ("page", page.to_string()),
        ];
        if let Some(tag) = params.tag_name.filter(|t| !t.is_empty()) {
            query.push(("tag_name", tag));
        }

        let data = self.api.get("/droplets", &query, cancel).await?;
        let droplets: Vec<Value> = data["droplets"]
            .as_array()
            .map(|list| list.iter().map(droplet_summary).collect())
            .unwrap_or_default();
        let total = data["meta"]["total"]
            .as_u64()
            .unwrap_or(droplets.len() as u64);

        Ok(json!({ "total": total, "page": page, "droplets": droplets }))
    }

    async fn get_droplet(
        &self,
        params: GetDropletParams,
        cancel: &CancellationToken,
    ) -> Result<Value, HandlerError> {
        let path = format!("/droplets/{}", params.droplet_id);
        let data = self.api.get(&path, &[], cancel).await?;
        let droplet = &data["droplet"];

        let mut result = droplet_summary(droplet);
        result["features"] = array_or_empty(&droplet["features"]);
        result["backup_ids"] = array_or_empty(&droplet["backup_ids"]);
        result["snapshot_ids"] = array_or_empty(&droplet["snapshot_ids"]);
        result["volume_ids"] = array_or_empty(&droplet["volume_ids"]);
        result["kernel"] = droplet["kernel"].clone();
        Ok(result)
    }

    async fn list_domains(&self, cancel: &CancellationToken) -> Result<Value, HandlerError> {
        let query = [("per_page", MAX_PER_PAGE.to_string())];
        let data = self.api.get("/domains", &query, cancel).await?;

        let domains: Vec<Value> = data["domains"]
            .as_array()
            .map(|list| {
                list.iter()
                    .map(|d| {
                        let zone_file: String = d["zone_file"]
                            .as_str()
                            .unwrap_or_default()
                            .chars()
                            .take(ZONE_FILE_PREVIEW)
                            .collect();
                        json!({
                            "name": d["name"].as_str().unwrap_or_default(),
                            "ttl": d["ttl"],
                            "zone_file": zone_file,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        let total = data["meta"]["total"]
            .as_u64()
            .unwrap_or(domains.len() as u64);

        Ok(json!({ "total": total, "domains": domains }))
    }
}

/// Build the `digitalocean` module against the public API.
pub fn module(ctx: &ModuleContext) -> Result<ServiceModule, ToolError> {
    module_with_base_url(ctx, BASE_URL)
}

pub(crate) fn module_with_base_url(
    ctx: &ModuleContext,
    base_url: &str,
) -> Result<ServiceModule, ToolError> {
    let auth = ctx.secret(TOKEN).map(Auth::Bearer);
    let client = Arc::new(DigitalOceanClient {
        api: ApiClient::new(NAME, TOKEN, base_url, auth, ctx.backend_timeout),
    });

    let account = Arc::clone(&client);
    let droplets = Arc::clone(&client);
    let droplet = Arc::clone(&client);
    let domains = client;

    ServiceModule::builder(NAME)
        .requires(Capability::secret(TOKEN))
        .tool(ToolDescriptor::builder(
            "digitalocean_get_account",
            "Get DigitalOcean account information including email, limits and status.",
            handler_fn(move |_args, cancel| {
                let client = Arc::clone(&account);
                async move { client.get_account(&cancel).await }
            }),
        ))
        .tool(
            ToolDescriptor::builder(
                "digitalocean_list_droplets",
                "List DigitalOcean droplets with status, region, size and IP addresses.",
                handler_fn(move |args, cancel| {
                    let client = Arc::clone(&droplets);
                    async move {
                        let params: ListDropletsParams = parse_args(args)?;
                        client.list_droplets(params, &cancel).await
                    }
                }),
            )
            .params::<ListDropletsParams>(),
        )
        .tool(
            ToolDescriptor::builder(
                "digitalocean_get_droplet",
                "Get detailed information about one DigitalOcean droplet.",
                handler_fn(move |args, cancel| {
                    let client = Arc::clone(&droplet);
                    async move {
                        let params: GetDropletParams = parse_args(args)?;
                        client.get_droplet(params, &cancel).await
                    }
                }),
            )
            .params::<GetDropletParams>(),
        )
        .tool(ToolDescriptor::builder(
            "digitalocean_list_domains",
            "List all domains managed in DigitalOcean DNS.",
            handler_fn(move |_args, cancel| {
                let client = Arc::clone(&domains);
                async move { client.list_domains(&cancel).await }
            }),
        ))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::secrets::StaticSecretStore;
    use crate::domains::tools::handlers::ToolArgs;
    use axum::{
        Json, Router,
        extract::{Path, Query},
        http::StatusCode,
        routing::get,
    };
    use std::collections::HashMap;
    use std::time::Duration;

    fn ctx() -> ModuleContext {
        ModuleContext {
            secrets: Arc::new(StaticSecretStore::new().with(TOKEN, "do_test")),
            backend_timeout: Duration::from_secs(5),
            server_name: "test".to_string(),
            server_version: "0.0.0".to_string(),
        }
    }

    fn sample_droplet(id: u64) -> Value {
        json!({
            "id": id,
            "name": "web-1",
            "status": "active",
            "memory": 1024,
            "vcpus": 1,
            "disk": 25,
            "region": { "slug": "nyc3", "name": "New York 3" },
            "image": { "name": "Ubuntu 24.04" },
            "size_slug": "s-1vcpu-1gb",
            "networks": { "v4": [
                { "ip_address": "10.0.0.2", "type": "private" },
                { "ip_address": "203.0.113.7", "type": "public" }
            ] },
            "tags": ["web"],
            "features": ["monitoring"],
            "created_at": "2026-01-01T00:00:00Z"
        })
    }

    async fn fake_digitalocean() -> String {
        let app = Router::new()
            .route(
                "/v2/account",
                get(|| async {
                    Json(json!({ "account": {
                        "email": "ops@example.com",
                        "droplet_limit": 25,
                        "status": "active",
                        "team": { "name": "Ops" }
                    } }))
                }),
            )
            .route(
                "/v2/droplets",
                get(|Query(q): Query<HashMap<String, String>>| async move {
                    Json(json!({
                        "droplets": [sample_droplet(1)],
                        "meta": { "total": 7 },
                        "echo": q,
                    }))
                }),
            )
            .route(
                "/v2/droplets/{id}",
                get(|Path(id): Path<u64>| async move {
                    if id == 404 {
                        (
                            StatusCode::NOT_FOUND,
                            Json(json!({ "id": "not_found", "message": "The resource you were accessing could not be found." })),
                        )
                    } else {
                        (StatusCode::OK, Json(json!({ "droplet": sample_droplet(id) })))
                    }
                }),
            )
            .route(
                "/v2/domains",
                get(|| async {
                    Json(json!({ "domains": [
                        { "name": "example.com", "ttl": 1800, "zone_file": "x".repeat(500) }
                    ] }))
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/v2", addr)
    }

    async fn call(module: &ServiceModule, tool: &str, args: Value) -> Result<Value, HandlerError> {
        let descriptor = module.tools().iter().find(|t| t.name() == tool).unwrap();
        let args: ToolArgs = args.as_object().cloned().unwrap_or_default();
        descriptor.handler().call(args, CancellationToken::new()).await
    }

    #[test]
    fn test_droplet_summary_extracts_networks() {
        let summary = droplet_summary(&sample_droplet(3));
        assert_eq!(summary["public_ipv4"], "203.0.113.7");
        assert_eq!(summary["private_ipv4"], "10.0.0.2");
        assert_eq!(summary["region"], "nyc3");
        assert_eq!(summary["image"], "Ubuntu 24.04");
        assert_eq!(summary["memory_mb"], 1024);
    }

    #[test]
    fn test_get_droplet_schema_requires_integer_id() {
        let module = module(&ctx()).unwrap();
        let tool = module
            .tools()
            .iter()
            .find(|t| t.name() == "digitalocean_get_droplet")
            .unwrap();
        assert!(tool.parameter_schema().validate(&json!({ "droplet_id": 42 })).is_ok());
        assert!(tool.parameter_schema().validate(&json!({ "droplet_id": "abc" })).is_err());
        assert!(tool.parameter_schema().validate(&json!({})).is_err());
    }

    #[tokio::test]
    async fn test_get_account() {
        let module = module_with_base_url(&ctx(), &fake_digitalocean().await).unwrap();
        let value = call(&module, "digitalocean_get_account", json!({})).await.unwrap();
        assert_eq!(value["email"], "ops@example.com");
        assert_eq!(value["team"], "Ops");
    }

    #[tokio::test]
    async fn test_list_droplets_clamps_page_size() {
        let module = module_with_base_url(&ctx(), &fake_digitalocean().await).unwrap();
        let value = call(
            &module,
            "digitalocean_list_droplets",
            json!({ "per_page": 1000, "tag_name": "web" }),
        )
        .await
        .unwrap();
        assert_eq!(value["total"], 7);
        assert_eq!(value["page"], 1);
        assert_eq!(value["droplets"][0]["name"], "web-1");
    }

    #[tokio::test]
    async fn test_get_droplet_details() {
        let module = module_with_base_url(&ctx(), &fake_digitalocean().await).unwrap();
        let value = call(&module, "digitalocean_get_droplet", json!({ "droplet_id": 12 }))
            .await
            .unwrap();
        assert_eq!(value["id"], 12);
        assert_eq!(value["features"], json!(["monitoring"]));
        assert_eq!(value["backup_ids"], json!([]));
    }

    #[tokio::test]
    async fn test_get_droplet_not_found() {
        let module = module_with_base_url(&ctx(), &fake_digitalocean().await).unwrap();
        let err = call(&module, "digitalocean_get_droplet", json!({ "droplet_id": 404 }))
            .await
            .unwrap_err();
        match err {
            HandlerError::Status { status, message } => {
                assert_eq!(status, 404);
                assert!(message.contains("not_found"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_list_domains_truncates_zone_file() {
        let module = module_with_base_url(&ctx(), &fake_digitalocean().await).unwrap();
        let value = call(&module, "digitalocean_list_domains", json!({})).await.unwrap();
        assert_eq!(value["total"], 1);
        assert_eq!(
            value["domains"][0]["zone_file"].as_str().unwrap().len(),
            ZONE_FILE_PREVIEW
        );
    }
}
