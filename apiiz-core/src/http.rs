use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::cancel::CancelToken;
use crate::error::{ApiError, ApiResult};

/// String map used for headers, query strings and URL params.
pub type Dictionary = IndexMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Head,
    Options,
    Put,
    Delete,
    Patch,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request description handed to an [`HttpDriver`].
#[derive(Debug, Clone, Default)]
pub struct HttpRequest {
    pub url: String,
    pub method: HttpMethod,
    pub headers: Dictionary,
    pub query: Dictionary,
    pub body: Option<Value>,
    pub token: Option<CancelToken>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub data: Value,
}

/// Pluggable transport used by HTTP leaf resolvers.
///
/// Drivers that support cancellation should race the request against
/// `request.token`'s signal.
#[async_trait]
pub trait HttpDriver: Send + Sync + fmt::Debug {
    async fn send(&self, request: HttpRequest) -> ApiResult<HttpResponse>;
}

/// Driver installed when the configuration does not provide one.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredDriver;

#[async_trait]
impl HttpDriver for UnconfiguredDriver {
    async fn send(&self, request: HttpRequest) -> ApiResult<HttpResponse> {
        Err(ApiError::transport(format!(
            "no HTTP driver configured for {} {}",
            request.method, request.url
        )))
    }
}
