//! Dashboard API client

use anyhow::{anyhow, Context, Result};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use vboxdash_common::{Instance, Service, VmMetrics, VmUser};

/// Client for the VBoxDash web API
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ServerDetail {
    pub instance: Instance,
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default)]
    pub users: Vec<VmUser>,
}

#[derive(Debug, Deserialize)]
struct MetricsResponse {
    metrics: VmMetrics,
}

impl ApiClient {
    pub fn new(base_url: &str, token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| anyhow!("an access token is required (--token or VBOXDASH_TOKEN)"))?;
        Ok(self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(token))
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await.context("dashboard API unreachable")?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        let message = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("request failed")
            .to_string();
        Err(anyhow!("{} ({})", message, status))
    }

    async fn json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        Ok(self.send(builder).await?.json().await?)
    }

    /// Check if the API is up
    pub async fn health_check(&self) -> bool {
        self.http
            .get(format!("{}/api/health", self.base_url))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    pub async fn list_servers(&self) -> Result<Vec<Instance>> {
        self.json(self.request(Method::GET, "/api/servers")?).await
    }

    pub async fn get_server(&self, id: &str) -> Result<ServerDetail> {
        self.json(self.request(Method::GET, &format!("/api/servers/{}", id))?)
            .await
    }

    /// POST a lifecycle action (`start`, `stop`, `delete`, `retry-script`).
    pub async fn action(&self, id: &str, action: &str) -> Result<Value> {
        self.json(self.request(Method::POST, &format!("/api/servers/{}/{}", id, action))?)
            .await
    }

    pub async fn metrics(&self, id: &str) -> Result<VmMetrics> {
        let response: MetricsResponse = self
            .json(self.request(Method::GET, &format!("/api/servers/{}/metrics", id))?)
            .await?;
        Ok(response.metrics)
    }
}
