//! Shared HTTP client for backend adapters.
//!
//! Each service module owns one [`ApiClient`]. The underlying
//! `reqwest::Client` (and its connection pool) is created on first use and
//! shared by every invocation of that module's tools.

use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;

use reqwest::{Method, RequestBuilder, StatusCode, header::RETRY_AFTER};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::domains::tools::handlers::HandlerError;

/// Attempts made when the backend answers 429.
const MAX_ATTEMPTS: u32 = 3;
/// Upper bound on a single Retry-After wait.
const MAX_RETRY_AFTER_SECS: u64 = 30;
/// Wait used when a 429 carries no usable Retry-After.
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;
/// Sent with every backend request.
const USER_AGENT: &str = concat!("unified-mcp-server/", env!("CARGO_PKG_VERSION"));
/// Longest backend error body kept in diagnostics.
const MAX_ERROR_BODY: usize = 500;

/// How the credential is attached to requests.
#[derive(Clone)]
pub enum Auth {
    /// `Authorization: Bearer <token>`.
    Bearer(String),
    /// A header carrying the credential verbatim.
    Header { name: &'static str, value: String },
}

/// Per-module HTTP client.
pub struct ApiClient {
    service: &'static str,
    credential_name: &'static str,
    base_url: String,
    auth: Option<Auth>,
    timeout: Duration,
    user_agent: &'static str,
    http: OnceLock<Result<reqwest::Client, String>>,
}

impl ApiClient {
    /// Create a client for `service`; `auth` is `None` when the credential
    /// named `credential_name` could not be resolved.
    pub fn new(
        service: &'static str,
        credential_name: &'static str,
        base_url: impl Into<String>,
        auth: Option<Auth>,
        timeout: Duration,
    ) -> Self {
        Self {
            service,
            credential_name,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
            timeout,
            user_agent: USER_AGENT,
            http: OnceLock::new(),
        }
    }

    /// The shared client; a build failure is remembered and reported on
    /// every call.
    fn http(&self) -> Result<&reqwest::Client, HandlerError> {
        let built = self.http.get_or_init(|| {
            debug!("Creating HTTP client for {}", self.service);
            reqwest::Client::builder()
                .timeout(self.timeout)
                .user_agent(self.user_agent)
                .build()
                .map_err(|e| {
                    error!("Cannot build HTTP client for {}: {}", self.service, e);
                    e.to_string()
                })
        });
        built.as_ref().map_err(|e| {
            HandlerError::other(format!("HTTP client for {} unavailable: {}", self.service, e))
        })
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, HandlerError> {
        let auth = self
            .auth
            .as_ref()
            .ok_or_else(|| HandlerError::MissingCredential(self.credential_name.to_string()))?;

        let url = format!("{}{}", self.base_url, path);
        let builder = self
            .http()?
            .request(method, url)
            .header(reqwest::header::ACCEPT, "application/json");

        Ok(match auth {
            Auth::Bearer(token) => builder.bearer_auth(token),
            Auth::Header { name, value } => builder.header(*name, value),
        })
    }

    /// Send a JSON request and decode the JSON response.
    ///
    /// HTTP 429 is retried up to three attempts honouring `Retry-After`;
    /// every wait observes `cancel`.
    pub async fn send_json(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
        cancel: &CancellationToken,
    ) -> Result<Value, HandlerError> {
        let mut attempt = 1;
        loop {
            let mut builder = self.request(method.clone(), path)?;
            if !query.is_empty() {
                builder = builder.query(query);
            }
            if let Some(body) = body {
                builder = builder.json(body);
            }

            let response = cancellable(cancel, builder.send()).await??;
            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = parse_retry_after(
                    response
                        .headers()
                        .get(RETRY_AFTER)
                        .and_then(|v| v.to_str().ok()),
                );
                if attempt >= MAX_ATTEMPTS {
                    return Err(HandlerError::RateLimited {
                        retry_after_secs: retry_after,
                    });
                }
                warn!(
                    "{} rate limited (attempt {}/{}), retrying in {}s",
                    self.service, attempt, MAX_ATTEMPTS, retry_after
                );
                cancellable(cancel, tokio::time::sleep(Duration::from_secs(retry_after))).await?;
                attempt += 1;
                continue;
            }

            if status.is_client_error() || status.is_server_error() {
                let body = cancellable(cancel, response.text()).await?.unwrap_or_default();
                return Err(HandlerError::Status {
                    status: status.as_u16(),
                    message: error_message(&body),
                });
            }

            if status == StatusCode::NO_CONTENT {
                return Ok(json!({ "status": "success" }));
            }

            return cancellable(cancel, response.json::<Value>())
                .await?
                .map_err(|e| HandlerError::MalformedResponse(e.to_string()));
        }
    }

    /// GET helper.
    pub async fn get(
        &self,
        path: &str,
        query: &[(&str, String)],
        cancel: &CancellationToken,
    ) -> Result<Value, HandlerError> {
        self.send_json(Method::GET, path, query, None, cancel).await
    }

    /// POST helper.
    pub async fn post(
        &self,
        path: &str,
        body: &Value,
        cancel: &CancellationToken,
    ) -> Result<Value, HandlerError> {
        self.send_json(Method::POST, path, &[], Some(body), cancel)
            .await
    }
}

/// Race `fut` against cancellation.
pub async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = T>,
) -> Result<T, HandlerError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(HandlerError::Cancelled),
        out = fut => Ok(out),
    }
}

fn parse_retry_after(header: Option<&str>) -> u64 {
    header
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
        .min(MAX_RETRY_AFTER_SECS)
}

/// Pull a readable message out of an error body.
fn error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        let id = value.get("id").and_then(Value::as_str);
        let message = value
            .get("message")
            .or_else(|| value.get("error"))
            .and_then(Value::as_str);
        match (id, message) {
            (Some(id), Some(message)) => return format!("{} ({})", message, id),
            (None, Some(message)) => return message.to_string(),
            _ => {}
        }
    }
    body.chars().take(MAX_ERROR_BODY).collect()
}
