use futures::future;
use futures::FutureExt;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::cancel::CancelToken;
use crate::codec;
use crate::config::Configs;
use crate::context::Context;
use crate::error::ApiError;
use crate::resolver::{DispatchFuture, Dispatcher, Resolver};

/// Named resolvers plus the settings they share.
#[derive(Default)]
pub struct Schema {
    configs: Configs,
    entries: IndexMap<String, Resolver<Value, Value>>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn configs(mut self, configs: Configs) -> Self {
        self.configs = configs;
        self
    }

    pub fn entry(mut self, name: impl Into<String>, resolver: Resolver<Value, Value>) -> Self {
        self.entries.insert(name.into(), resolver);
        self
    }

    /// Add a typed resolver behind the JSON codec. A cancel token bound to
    /// `resolver` stays attached.
    pub fn entry_json<P, R>(self, name: impl Into<String>, resolver: Resolver<P, R>) -> Self
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
    {
        self.entry(name, resolver.with(codec::json))
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("configs", &self.configs)
            .field("entries", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

struct Entry {
    dispatcher: Dispatcher<Value, Value>,
    token: Option<CancelToken>,
}

/// Dispatchers produced by [`define`], by name.
///
/// Dropping the `Api` releases every dispatcher and singleton it created.
/// Dispatcher handles cloned out of it keep working, but sibling lookups
/// through the context no longer find anything.
pub struct Api {
    context: Context,
    entries: IndexMap<String, Entry>,
}

/// Instantiate every entry of `schema` against one shared context.
///
/// Global enhancers wrap each entry in list order, so the last one is
/// outermost. The produced dispatchers reset the entry's cancel token at the
/// start of every call and turn panics, whether raised while starting the
/// call or while it runs, into [`ApiError::Panicked`].
pub fn define(schema: Schema) -> Api {
    let Schema { configs, entries } = schema;
    let enhancers = configs.enhancers.clone();
    let context = Context::new(configs);
    let mut api = IndexMap::with_capacity(entries.len());

    for (name, resolver) in entries {
        let ctx = context.clone();
        let token = resolver.token().cloned();
        let resolver = enhancers
            .iter()
            .fold(resolver, |resolver, enhancer| resolver.with(|r| enhancer(r)));

        let dispatcher = guard(Arc::from(name.as_str()), resolver.resolve(&ctx), token.clone());
        debug!(%name, cancellable = token.is_some(), "dispatcher instantiated");

        ctx.publish(name.clone(), dispatcher.clone());
        api.insert(name, Entry { dispatcher, token });
    }

    Api {
        context,
        entries: api,
    }
}

fn guard(
    name: Arc<str>,
    inner: Dispatcher<Value, Value>,
    token: Option<CancelToken>,
) -> Dispatcher<Value, Value> {
    Dispatcher::new(move |payload: Value| {
        if let Some(token) = &token {
            token.reset();
        }
        trace!(name = %name, "dispatch");

        let call = match panic::catch_unwind(AssertUnwindSafe(|| inner.call(payload))) {
            Ok(call) => call,
            Err(panic) => {
                let err = ApiError::panicked(panic);
                warn!(name = %name, error = %err, "dispatcher panicked");
                return future::ready(Err(err)).boxed();
            }
        };

        let name = name.clone();
        AssertUnwindSafe(call)
            .catch_unwind()
            .map(move |outcome| match outcome {
                Ok(result) => result,
                Err(panic) => {
                    let err = ApiError::panicked(panic);
                    warn!(name = %name, error = %err, "dispatcher panicked");
                    Err(err)
                }
            })
            .boxed()
    })
}

impl Api {
    /// Call the named dispatcher.
    pub fn call(&self, name: &str, payload: Value) -> DispatchFuture<Value> {
        match self.entries.get(name) {
            Some(entry) => entry.dispatcher.call(payload),
            None => future::ready(Err(ApiError::UnknownDispatcher(name.to_string()))).boxed(),
        }
    }

    pub fn dispatcher(&self, name: &str) -> Option<Dispatcher<Value, Value>> {
        self.entries.get(name).map(|e| e.dispatcher.clone())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn token(&self, name: &str) -> Option<&CancelToken> {
        self.entries.get(name).and_then(|e| e.token.as_ref())
    }

    /// Cancel the in-flight call of a cancellable entry. Returns `false` when
    /// the entry does not exist or carries no token.
    pub fn cancel(&self, name: &str) -> bool {
        match self.token(name) {
            Some(token) => {
                debug!(%name, "cancelling");
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }
}

impl fmt::Debug for Api {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Api")
            .field("entries", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Drop for Api {
    fn drop(&mut self) {
        self.context.teardown();
    }
}
