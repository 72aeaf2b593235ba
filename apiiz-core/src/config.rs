// Definition-wide configuration.
// Recognised blocks are typed; anything else lives in `extensions` and is
// read by the capability that owns it.

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ApiError, ApiResult, ErrorHook};
use crate::http::{Dictionary, HttpDriver};
use crate::option::OptionFactory;
use crate::resolver::Resolver;

/// Enhancer applied to every top-level resolver of a definition.
pub type GlobalEnhancer = Arc<dyn Fn(Resolver<Value, Value>) -> Resolver<Value, Value> + Send + Sync>;

/// Definition-wide settings shared by every context.
#[derive(Clone, Default)]
pub struct Configs {
    /// Applied in list order; the last one ends up outermost.
    pub enhancers: Vec<GlobalEnhancer>,
    pub on_error: Option<ErrorHook>,
    pub dismiss_errors: bool,
    pub http: HttpConfigs,
    /// Defaults merged under call-site loader options.
    pub loader: LoaderConfigs,
    pub extensions: Map<String, Value>,
    /// Error hooks registered for an extension block, keyed by block name.
    pub extension_hooks: IndexMap<String, ErrorHook>,
}

#[derive(Clone, Default)]
pub struct HttpConfigs {
    pub base_url: Option<String>,
    pub headers: Option<OptionFactory<Value, Dictionary>>,
    pub driver: Option<Arc<dyn HttpDriver>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoaderConfigs {
    /// Batch window length. `None` flushes on the next scheduler turn.
    pub delay: Option<Duration>,
    pub max_batch_size: Option<usize>,
}

/// Serialisable subset of [`Configs`].
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ConfigsFile {
    dismiss_errors: bool,
    http: HttpConfigsFile,
    #[serde(rename = "$loader")]
    loader: LoaderConfigsFile,
    #[serde(flatten)]
    extensions: Map<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct HttpConfigsFile {
    base_url: Option<String>,
    headers: Option<Dictionary>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct LoaderConfigsFile {
    delay_ms: Option<u64>,
    max_batch_size: Option<usize>,
}

impl Configs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the serialisable settings from a JSON document.
    ///
    /// ```
    /// use apiiz_core::Configs;
    /// use serde_json::json;
    ///
    /// let configs = Configs::from_json(json!({
    ///     "http": { "baseUrl": "https://api.example.com" },
    ///     "$loader": { "delayMs": 5 },
    ///     "$rest": { "dismissErrors": true }
    /// }))
    /// .unwrap();
    /// assert_eq!(configs.http.base_url.as_deref(), Some("https://api.example.com"));
    /// assert!(configs.extensions.contains_key("$rest"));
    /// ```
    pub fn from_json(value: Value) -> ApiResult<Self> {
        let file: ConfigsFile = serde_json::from_value(value)
            .map_err(|e| ApiError::config(format!("invalid configs: {}", e)))?;

        Ok(Self {
            dismiss_errors: file.dismiss_errors,
            http: HttpConfigs {
                base_url: file.http.base_url,
                headers: file.http.headers.map(OptionFactory::Literal),
                driver: None,
            },
            loader: LoaderConfigs {
                delay: file.loader.delay_ms.map(Duration::from_millis),
                max_batch_size: file.loader.max_batch_size,
            },
            extensions: file.extensions,
            ..Default::default()
        })
    }

    pub fn enhancer<F>(mut self, enhancer: F) -> Self
    where
        F: Fn(Resolver<Value, Value>) -> Resolver<Value, Value> + Send + Sync + 'static,
    {
        self.enhancers.push(Arc::new(enhancer));
        self
    }

    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ApiError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }

    pub fn dismiss_errors(mut self, dismiss: bool) -> Self {
        self.dismiss_errors = dismiss;
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.http.base_url = Some(url.into());
        self
    }

    pub fn headers(mut self, headers: OptionFactory<Value, Dictionary>) -> Self {
        self.http.headers = Some(headers);
        self
    }

    pub fn driver(mut self, driver: Arc<dyn HttpDriver>) -> Self {
        self.http.driver = Some(driver);
        self
    }

    pub fn loader(mut self, loader: LoaderConfigs) -> Self {
        self.loader = loader;
        self
    }

    pub fn extension(mut self, name: impl Into<String>, value: Value) -> Self {
        self.extensions.insert(name.into(), value);
        self
    }

    /// Register an error hook for the capability owning extension block `name`.
    pub fn extension_hook<F>(mut self, name: impl Into<String>, hook: F) -> Self
    where
        F: Fn(&ApiError) + Send + Sync + 'static,
    {
        self.extension_hooks.insert(name.into(), Arc::new(hook));
        self
    }

    pub fn report_extension_error(&self, name: &str, error: &ApiError) {
        if let Some(hook) = self.extension_hooks.get(name) {
            hook(error);
        }
    }

    /// Deserialize an extension block such as `$rest`.
    pub fn extension_as<T: DeserializeOwned>(&self, name: &str) -> ApiResult<Option<T>> {
        match self.extensions.get(name) {
            None => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| ApiError::config(format!("invalid {} block: {}", name, e))),
        }
    }

    pub fn report_error(&self, error: &ApiError) {
        if let Some(hook) = &self.on_error {
            hook(error);
        }
    }
}

impl fmt::Debug for Configs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configs")
            .field("enhancers", &self.enhancers.len())
            .field("on_error", &self.on_error.is_some())
            .field("dismiss_errors", &self.dismiss_errors)
            .field("http", &self.http)
            .field("loader", &self.loader)
            .field("extensions", &self.extensions)
            .field("extension_hooks", &self.extension_hooks.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl fmt::Debug for HttpConfigs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpConfigs")
            .field("base_url", &self.base_url)
            .field("headers", &self.headers)
            .field("driver", &self.driver)
            .finish()
    }
}

impl LoaderConfigs {
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = Some(size);
        self
    }
}
