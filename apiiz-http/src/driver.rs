// reqwest-backed HTTP driver.
// Requests race the cancel token's signal when one is attached, so
// `Api::cancel` aborts the in-flight exchange.

use anyhow::{Context, Result};
use apiiz_core::{ApiError, ApiResult, HttpDriver, HttpMethod, HttpRequest, HttpResponse};
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, trace};

/// Driver configuration
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
    /// Connect timeout in milliseconds
    pub connect_timeout_ms: u64,
    pub user_agent: Option<String>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30000,
            connect_timeout_ms: 10000,
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReqwestDriver {
    config: DriverConfig,
    http_client: HttpClient,
}

impl ReqwestDriver {
    /// Create a new driver with the given configuration
    pub fn new(config: DriverConfig) -> Result<Self> {
        let mut builder = HttpClient::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms));
        if let Some(agent) = &config.user_agent {
            builder = builder.user_agent(agent.clone());
        }
        let http_client = builder.build().context("Failed to build HTTP client")?;

        Ok(Self {
            config,
            http_client,
        })
    }

    /// Wrap an already configured client.
    pub fn with_client(http_client: HttpClient) -> Self {
        Self {
            config: DriverConfig::default(),
            http_client,
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    async fn exchange(&self, request: &HttpRequest) -> ApiResult<HttpResponse> {
        let mut builder = self
            .http_client
            .request(method(request.method), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ApiError::transport_with(format!("{} {} failed", request.method, request.url), e))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ApiError::transport_with("failed to read response body", e))?;
        trace!(status = status.as_u16(), bytes = text.len(), "response received");

        if !status.is_success() {
            return Err(ApiError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        Ok(HttpResponse {
            data: parse_body(text),
        })
    }
}

#[async_trait]
impl HttpDriver for ReqwestDriver {
    async fn send(&self, request: HttpRequest) -> ApiResult<HttpResponse> {
        debug!(method = %request.method, url = %request.url, "sending request");

        let Some(token) = request.token.clone() else {
            return self.exchange(&request).await;
        };

        let signal = token.signal();
        tokio::select! {
            _ = signal.cancelled() => {
                debug!(url = %request.url, "request cancelled");
                Err(ApiError::Cancelled)
            }
            result = self.exchange(&request) => result,
        }
    }
}

fn method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Head => reqwest::Method::HEAD,
        HttpMethod::Options => reqwest::Method::OPTIONS,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Delete => reqwest::Method::DELETE,
        HttpMethod::Patch => reqwest::Method::PATCH,
    }
}

/// JSON bodies are parsed; anything else is passed through as a string and
/// an empty body becomes `null`.
fn parse_body(text: String) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    match serde_json::from_str(&text) {
        Ok(value) => value,
        Err(_) => Value::String(text),
    }
}
