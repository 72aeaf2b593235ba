use indexmap::IndexMap;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use crate::config::Configs;
use crate::http::{HttpDriver, UnconfiguredDriver};
use crate::resolver::Dispatcher;
use crate::shared::SharedRegistry;

/// Dispatchers produced by one definition, by name.
pub type Mappings = IndexMap<String, Dispatcher<Value, Value>>;

/// State shared by every resolver instantiated for one definition.
///
/// Cloning is cheap; clones see the same registry and mappings.
#[derive(Clone)]
pub struct Context {
    configs: Arc<Configs>,
    http: Arc<dyn HttpDriver>,
    shared: SharedRegistry,
    mappings: Arc<RwLock<Mappings>>,
}

impl Context {
    pub fn new(configs: Configs) -> Self {
        let http = configs
            .http
            .driver
            .clone()
            .unwrap_or_else(|| Arc::new(UnconfiguredDriver));

        Self {
            configs: Arc::new(configs),
            http,
            shared: SharedRegistry::new(),
            mappings: Arc::new(RwLock::new(IndexMap::new())),
        }
    }

    pub fn configs(&self) -> &Configs {
        &self.configs
    }

    pub fn http(&self) -> &Arc<dyn HttpDriver> {
        &self.http
    }

    pub fn shared(&self) -> &SharedRegistry {
        &self.shared
    }

    /// Look up a sibling dispatcher produced by the same definition.
    pub fn dispatcher(&self, name: &str) -> Option<Dispatcher<Value, Value>> {
        self.mappings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn dispatcher_names(&self) -> Vec<String> {
        self.mappings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub(crate) fn publish(&self, name: String, dispatcher: Dispatcher<Value, Value>) {
        self.mappings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, dispatcher);
    }

    /// Drop every published dispatcher and singleton.
    ///
    /// Dispatchers capture their context, so the definition clears these maps
    /// when it is dropped to release them.
    pub(crate) fn teardown(&self) {
        self.mappings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.shared.clear();
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(Configs::default())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("configs", &self.configs)
            .field("http", &self.http)
            .field("shared", &self.shared.len())
            .field("mappings", &self.dispatcher_names())
            .finish()
    }
}
