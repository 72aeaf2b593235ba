//! REST leaf resolvers.
//!
//! [`rest`] builds a resolver that sends one HTTP request per call through
//! the context's [`HttpDriver`](apiiz_core::HttpDriver) and resolves with the
//! response body. Every part of the request can be fixed or derived from the
//! payload through an [`OptionFactory`].
//!
//! Definition-wide defaults live in the `$rest` configuration block:
//!
//! ```json
//! { "$rest": { "baseUrl": "https://api.example.com", "headers": { "x-client": "apiiz" }, "dismissErrors": false } }
//! ```

use apiiz_core::{
    forever, ApiError, CancelToken, Configs, Context, Dictionary, Dispatcher, ErrorHook,
    HttpMethod, HttpRequest, OptionFactory, Resolver,
};
use futures::future;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::template;

/// Name of the configuration block read by [`rest`] resolvers.
pub const REST_BLOCK: &str = "$rest";

/// Contents of the `$rest` block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RestConfigs {
    pub base_url: Option<String>,
    pub headers: Dictionary,
    pub dismiss_errors: bool,
}

impl RestConfigs {
    /// Store this block on `configs`, replacing any previous `$rest` block.
    pub fn apply(&self, configs: Configs) -> Configs {
        match serde_json::to_value(self) {
            Ok(value) => configs.extension(REST_BLOCK, value),
            Err(error) => {
                warn!(%error, block = REST_BLOCK, "failed to encode rest configs, keeping previous block");
                configs
            }
        }
    }
}

/// Per-resolver request options.
pub struct RestOptions {
    method: HttpMethod,
    headers: Option<OptionFactory<Value, Dictionary>>,
    params: Option<OptionFactory<Value, Dictionary>>,
    query: Option<OptionFactory<Value, Dictionary>>,
    body: Option<OptionFactory<Value, Option<Value>>>,
    token: Option<OptionFactory<Value, Option<CancelToken>>>,
    on_error: Option<ErrorHook>,
    dismiss_errors: bool,
}

impl RestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    pub fn headers(mut self, headers: OptionFactory<Value, Dictionary>) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Values substituted into `{name}` placeholders of the URL.
    pub fn params(mut self, params: OptionFactory<Value, Dictionary>) -> Self {
        self.params = Some(params);
        self
    }

    pub fn query(mut self, query: OptionFactory<Value, Dictionary>) -> Self {
        self.query = Some(query);
        self
    }

    pub fn body(mut self, body: OptionFactory<Value, Option<Value>>) -> Self {
        self.body = Some(body);
        self
    }

    /// Send the payload itself as the JSON body.
    pub fn payload_body(self) -> Self {
        self.body(OptionFactory::factory(|payload: &Value| Some(payload.clone())))
    }

    pub fn token(mut self, token: CancelToken) -> Self {
        self.token = Some(OptionFactory::literal(Some(token)));
        self
    }

    pub fn token_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> Option<CancelToken> + Send + Sync + 'static,
    {
        self.token = Some(OptionFactory::factory(f));
        self
    }

    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ApiError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }

    /// Failed calls never settle instead of rejecting.
    pub fn dismiss_errors(mut self, dismiss: bool) -> Self {
        self.dismiss_errors = dismiss;
        self
    }
}

impl Default for RestOptions {
    fn default() -> Self {
        Self {
            method: HttpMethod::Get,
            headers: None,
            params: None,
            query: None,
            body: None,
            token: None,
            on_error: None,
            dismiss_errors: false,
        }
    }
}

impl fmt::Debug for RestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestOptions")
            .field("method", &self.method)
            .field("headers", &self.headers)
            .field("params", &self.params)
            .field("query", &self.query)
            .field("body", &self.body)
            .field("token", &self.token.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("dismiss_errors", &self.dismiss_errors)
            .finish()
    }
}

fn evaluate(option: &Option<OptionFactory<Value, Dictionary>>, payload: &Value) -> Dictionary {
    option
        .as_ref()
        .map(|o| o.evaluate(payload))
        .unwrap_or_default()
}

/// Resolver sending one request per call and resolving with the response data.
///
/// The URL is prefixed with `$rest.baseUrl`, falling back to
/// `http.baseUrl`. Headers merge `http.headers`, then `$rest.headers`, then
/// the option headers, later ones winning. On failure the definition's
/// `on_error`, the `$rest` hook and the option hook run in that order; the
/// error is then propagated unchanged unless dismissal is enabled at any of
/// the three levels.
pub fn rest(url: impl Into<OptionFactory<Value, String>>, options: RestOptions) -> Resolver<Value, Value> {
    let url = url.into();
    let options = Arc::new(options);

    Resolver::new(move |ctx: &Context| {
        let rest_configs = match ctx.configs().extension_as::<RestConfigs>(REST_BLOCK) {
            Ok(block) => block.unwrap_or_default(),
            Err(error) => {
                warn!(%error, "invalid $rest block");
                return Dispatcher::new(move |_payload: Value| future::ready(Err(error.clone())).boxed());
            }
        };
        let base_url = rest_configs
            .base_url
            .clone()
            .or_else(|| ctx.configs().http.base_url.clone())
            .unwrap_or_default();
        let dismiss = options.dismiss_errors || rest_configs.dismiss_errors || ctx.configs().dismiss_errors;
        let rest_headers = rest_configs.headers;

        let ctx = ctx.clone();
        let url = url.clone();
        let options = options.clone();

        Dispatcher::new(move |payload: Value| {
            let mut headers = ctx
                .configs()
                .http
                .headers
                .as_ref()
                .map(|h| h.evaluate(&payload))
                .unwrap_or_default();
            headers.extend(rest_headers.clone());
            headers.extend(evaluate(&options.headers, &payload));

            let params = evaluate(&options.params, &payload);
            let request = HttpRequest {
                url: template::render(&format!("{}{}", base_url, url.evaluate(&payload)), &params),
                method: options.method,
                headers,
                query: evaluate(&options.query, &payload),
                body: options.body.as_ref().and_then(|b| b.evaluate(&payload)),
                token: options.token.as_ref().and_then(|t| t.evaluate(&payload)),
            };

            let ctx = ctx.clone();
            let options = options.clone();
            async move {
                let (method, url) = (request.method, request.url.clone());
                match ctx.http().send(request).await {
                    Ok(response) => Ok(response.data),
                    Err(error) => {
                        warn!(%method, %url, %error, "rest request failed");
                        ctx.configs().report_error(&error);
                        ctx.configs().report_extension_error(REST_BLOCK, &error);
                        if let Some(hook) = &options.on_error {
                            hook(&error);
                        }
                        if dismiss {
                            debug!(%method, %url, "error dismissed");
                            return forever().await;
                        }
                        Err(error)
                    }
                }
            }
            .boxed()
        })
    })
}

pub fn get(url: impl Into<OptionFactory<Value, String>>, options: RestOptions) -> Resolver<Value, Value> {
    rest(url, options.method(HttpMethod::Get))
}

pub fn post(url: impl Into<OptionFactory<Value, String>>, options: RestOptions) -> Resolver<Value, Value> {
    rest(url, options.method(HttpMethod::Post))
}

pub fn put(url: impl Into<OptionFactory<Value, String>>, options: RestOptions) -> Resolver<Value, Value> {
    rest(url, options.method(HttpMethod::Put))
}

pub fn patch(url: impl Into<OptionFactory<Value, String>>, options: RestOptions) -> Resolver<Value, Value> {
    rest(url, options.method(HttpMethod::Patch))
}

pub fn delete(url: impl Into<OptionFactory<Value, String>>, options: RestOptions) -> Resolver<Value, Value> {
    rest(url, options.method(HttpMethod::Delete))
}

pub fn head(url: impl Into<OptionFactory<Value, String>>, options: RestOptions) -> Resolver<Value, Value> {
    rest(url, options.method(HttpMethod::Head))
}

pub fn options(url: impl Into<OptionFactory<Value, String>>, options: RestOptions) -> Resolver<Value, Value> {
    rest(url, options.method(HttpMethod::Options))
}

#[cfg(test)]
mod tests {
    use super::*;
    use apiiz_core::{ApiResult, HttpDriver, HttpResponse};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records requests and answers with a canned outcome.
    #[derive(Debug, Default)]
    struct RecordingDriver {
        requests: Mutex<Vec<HttpRequest>>,
        fail: bool,
    }

    #[async_trait]
    impl HttpDriver for RecordingDriver {
        async fn send(&self, request: HttpRequest) -> ApiResult<HttpResponse> {
            let url = request.url.clone();
            self.requests.lock().unwrap().push(request);
            if self.fail {
                return Err(ApiError::Http {
                    status: 500,
                    body: "boom".to_string(),
                });
            }
            Ok(HttpResponse {
                data: json!({ "url": url }),
            })
        }
    }

    fn context(driver: Arc<RecordingDriver>, configs: Configs) -> Context {
        Context::new(configs.driver(driver))
    }

    fn dict(pairs: &[(&str, &str)]) -> Dictionary {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_apply_replaces_rest_block() {
        let first = RestConfigs {
            base_url: Some("https://one.example".to_string()),
            ..RestConfigs::default()
        };
        let second = RestConfigs {
            base_url: Some("https://two.example".to_string()),
            headers: dict(&[("x-client", "apiiz")]),
            dismiss_errors: true,
        };

        let configs = second.apply(first.apply(Configs::new()));
        let stored: Option<RestConfigs> = configs.extension_as(REST_BLOCK).unwrap();
        assert_eq!(stored, Some(second));
    }

    #[tokio::test]
    async fn test_request_is_built_from_options() {
        let driver = Arc::new(RecordingDriver::default());
        let configs = Configs::new().base_url("https://api.test");
        let ctx = context(driver.clone(), configs);

        let resolver = post(
            "/users/{id}/todos",
            RestOptions::new()
                .params(OptionFactory::factory(|p: &Value| {
                    let id = p["userId"].to_string();
                    dict(&[("id", id.as_str())])
                }))
                .query(OptionFactory::literal(dict(&[("page", "2")])))
                .payload_body(),
        );

        let result = resolver
            .resolve(&ctx)
            .call(json!({ "userId": 5, "title": "write tests" }))
            .await
            .unwrap();
        assert_eq!(result, json!({ "url": "https://api.test/users/5/todos" }));

        let requests = driver.requests.lock().unwrap();
        let request = &requests[0];
        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(request.query.get("page").map(String::as_str), Some("2"));
        assert_eq!(request.body, Some(json!({ "userId": 5, "title": "write tests" })));
        assert!(request.token.is_none());
    }

    #[tokio::test]
    async fn test_header_precedence_and_rest_base_url() {
        let driver = Arc::new(RecordingDriver::default());
        let configs = Configs::new()
            .base_url("https://ignored.test")
            .headers(OptionFactory::literal(dict(&[("a", "http"), ("b", "http"), ("c", "http")])));
        let configs = RestConfigs {
            base_url: Some("https://rest.test".to_string()),
            headers: dict(&[("b", "rest"), ("c", "rest")]),
            dismiss_errors: false,
        }
        .apply(configs);
        let ctx = context(driver.clone(), configs);

        let resolver = get(
            "/ping",
            RestOptions::new().headers(OptionFactory::literal(dict(&[("c", "option")]))),
        );
        resolver.resolve(&ctx).call(Value::Null).await.unwrap();

        let requests = driver.requests.lock().unwrap();
        assert_eq!(requests[0].url, "https://rest.test/ping");
        assert_eq!(requests[0].headers, dict(&[("a", "http"), ("b", "rest"), ("c", "option")]));
    }

    #[tokio::test]
    async fn test_error_hooks_run_in_order_then_propagate() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let (global, block, local) = (order.clone(), order.clone(), order.clone());
        let driver = Arc::new(RecordingDriver {
            fail: true,
            ..Default::default()
        });
        let configs = Configs::new()
            .on_error(move |_| global.lock().unwrap().push("configs"))
            .extension_hook(REST_BLOCK, move |_| block.lock().unwrap().push("$rest"));
        let ctx = context(driver, configs);

        let resolver = get(
            "/fail",
            RestOptions::new().on_error(move |_| local.lock().unwrap().push("options")),
        );
        let err = resolver.resolve(&ctx).call(Value::Null).await.unwrap_err();

        assert!(matches!(err, ApiError::Http { status: 500, .. }));
        assert_eq!(*order.lock().unwrap(), vec!["configs", "$rest", "options"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dismissed_errors_never_settle() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let driver = Arc::new(RecordingDriver {
            fail: true,
            ..Default::default()
        });
        let configs = Configs::from_json(json!({ "$rest": { "dismissErrors": true } })).unwrap();
        let ctx = context(driver, configs);

        let resolver = get(
            "/fail",
            RestOptions::new().on_error(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let outcome = tokio::time::timeout(
            Duration::from_secs(60),
            resolver.resolve(&ctx).call(Value::Null),
        )
        .await;

        assert!(outcome.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_rest_block_rejects_calls() {
        let driver = Arc::new(RecordingDriver::default());
        let configs = Configs::new().extension(REST_BLOCK, json!({ "dismissErrors": "sometimes" }));
        let ctx = context(driver.clone(), configs);

        let err = get("/x", RestOptions::new())
            .resolve(&ctx)
            .call(Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Config(_)));
        assert!(driver.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_token_is_forwarded() {
        let driver = Arc::new(RecordingDriver::default());
        let ctx = context(driver.clone(), Configs::new());
        let token = CancelToken::new();

        get("/t", RestOptions::new().token(token.clone()))
            .resolve(&ctx)
            .call(Value::Null)
            .await
            .unwrap();

        let requests = driver.requests.lock().unwrap();
        assert!(requests[0].token.as_ref().is_some_and(|t| t.same_as(&token)));
    }
}
