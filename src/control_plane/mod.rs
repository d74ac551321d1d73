// SPDX-License-Identifier: MIT
//! Thin client for the two control-plane surfaces.
//!
//! The resource API owns project lifecycle (create, status); the platform
//! API owns Nimbus enablement, client apps and client configuration. Every
//! call here is single-shot: attempt budgets live with the provisioning
//! steps, never in this client. Non-2xx responses keep their decoded body so
//! callers can classify and surface the control plane's own error message.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

// ─── Request / result types ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// One HTTP call against a control-plane surface.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    /// JSON payload for POST calls.
    pub body: Option<Value>,
    /// End-user bearer credential, forwarded on every call.
    pub bearer: String,
}

impl ApiRequest {
    pub fn get(url: impl Into<String>, bearer: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            body: None,
            bearer: bearer.into(),
        }
    }

    pub fn post(url: impl Into<String>, bearer: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            body: Some(body),
            bearer: bearer.into(),
        }
    }
}

/// Outcome of one control-plane call.
///
/// `Http` carries the decoded error body verbatim — JSON when the control
/// plane sent JSON, otherwise the raw text as a JSON string. Nothing is
/// discarded between here and the run report.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResult {
    Ok(Value),
    Http { status: u16, body: Value },
    Transport(String),
}

/// Pull the control plane's own message out of its `{error: {message}}`
/// envelope, falling back to the whole body.
pub fn error_message(body: &Value) -> String {
    if let Some(msg) = body
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
    {
        return msg.to_string();
    }
    match body {
        Value::String(s) => s.clone(),
        Value::Null => "no response body".to_string(),
        other => other.to_string(),
    }
}

// ─── Seam ─────────────────────────────────────────────────────────────────────

/// The workflow's only view of the control plane; tests script this.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn call(&self, req: ApiRequest) -> ApiResult;
}

// ─── HTTP implementation ──────────────────────────────────────────────────────

/// Real client over a shared `reqwest::Client` (connection pool, rustls).
pub struct HttpControlPlane {
    client: reqwest::Client,
}

impl HttpControlPlane {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn call(&self, req: ApiRequest) -> ApiResult {
        debug!(method = ?req.method, url = %req.url, "control-plane call");

        let mut builder = match req.method {
            Method::Get => self.client.get(&req.url),
            Method::Post => self.client.post(&req.url),
        }
        .bearer_auth(&req.bearer);
        if let Some(body) = &req.body {
            builder = builder.json(body);
        }

        let resp = match builder.send().await {
            Ok(resp) => resp,
            Err(e) => return ApiResult::Transport(e.to_string()),
        };

        let status = resp.status();
        let text = match resp.text().await {
            Ok(t) => t,
            Err(e) => return ApiResult::Transport(format!("reading response body: {e}")),
        };
        let body = decode_body(&text);

        if status.is_success() {
            ApiResult::Ok(body)
        } else {
            ApiResult::Http {
                status: status.as_u16(),
                body,
            }
        }
    }
}

/// Empty bodies become `Null`; non-JSON bodies are kept as a JSON string.
fn decode_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

// ─── Endpoint URLs ────────────────────────────────────────────────────────────

/// URL builders over the two configured API base URLs.
#[derive(Debug, Clone)]
pub struct Endpoints {
    resource_base: String,
    platform_base: String,
}

impl Endpoints {
    pub fn new(resource_api_url: &str, platform_api_url: &str) -> Self {
        Self {
            resource_base: resource_api_url.trim_end_matches('/').to_string(),
            platform_base: platform_api_url.trim_end_matches('/').to_string(),
        }
    }

    /// POST — create a new cloud project (resource API).
    pub fn create_project(&self) -> String {
        format!("{}/projects", self.resource_base)
    }

    /// GET — project lifecycle status (resource API).
    pub fn project_status(&self, project_id: &str) -> String {
        format!("{}/projects/{}", self.resource_base, project_id)
    }

    /// POST — enable the Nimbus platform on an active project.
    pub fn enable_platform(&self, project_id: &str) -> String {
        format!("{}/projects/{}:enablePlatform", self.platform_base, project_id)
    }

    /// POST — register a client application.
    pub fn register_client(&self, project_id: &str) -> String {
        format!("{}/projects/{}/clientApps", self.platform_base, project_id)
    }

    /// GET — client applications registered on a project.
    pub fn list_clients(&self, project_id: &str) -> String {
        format!("{}/projects/{}/clientApps", self.platform_base, project_id)
    }

    /// GET — the generated configuration of one client application.
    pub fn client_config(&self, project_id: &str, client_id: &str) -> String {
        format!(
            "{}/projects/{}/clientApps/{}/config",
            self.platform_base, project_id, client_id
        )
    }

    /// GET — Nimbus-enabled projects visible to the credential.
    pub fn list_projects(&self) -> String {
        format!("{}/projects?pageSize=100", self.platform_base)
    }
}
