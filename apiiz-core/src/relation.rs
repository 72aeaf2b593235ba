use futures::future::{self, try_join_all, BoxFuture};
use futures::FutureExt;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

use crate::context::Context;
use crate::error::ApiResult;
use crate::resolver::{Dispatcher, Resolver};

enum Kind {
    Single,
    Multiple,
}

struct Relation {
    kind: Kind,
    key: String,
    into: String,
    dispatcher: Dispatcher<Value, Value>,
}

/// Relation registrations for one instantiation of an [`include`] resolver.
///
/// Each registered sub-resolver is instantiated from the definition context
/// at registration time, once.
pub struct Relations {
    ctx: Context,
    relations: Vec<Relation>,
}

impl Relations {
    /// Load one related value: when `result[key]` is present and not null,
    /// `resolver` is called with it and the outcome is written to `result[into]`.
    pub fn single(
        &mut self,
        key: impl Into<String>,
        into: impl Into<String>,
        resolver: Resolver<Value, Value>,
    ) -> &mut Self {
        self.register(Kind::Single, key.into(), into.into(), resolver)
    }

    /// Load many related values: each element of the array at `result[key]`
    /// is passed to `resolver` and the outcomes are written to `result[into]`
    /// in the order of the source array. A missing, null or empty array is
    /// skipped.
    pub fn multiple(
        &mut self,
        key: impl Into<String>,
        into: impl Into<String>,
        resolver: Resolver<Value, Value>,
    ) -> &mut Self {
        self.register(Kind::Multiple, key.into(), into.into(), resolver)
    }

    fn register(&mut self, kind: Kind, key: String, into: String, resolver: Resolver<Value, Value>) -> &mut Self {
        let dispatcher = resolver.resolve(&self.ctx);
        self.relations.push(Relation {
            kind,
            key,
            into,
            dispatcher,
        });
        self
    }
}

impl fmt::Debug for Relations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<_> = self
            .relations
            .iter()
            .map(|r| format!("{} -> {}", r.key, r.into))
            .collect();
        f.debug_struct("Relations").field("relations", &keys).finish()
    }
}

impl Relation {
    /// Start loading this relation for `result`. Resolves to the field to
    /// write, or `None` when the relation does not apply.
    fn load(&self, result: &Value) -> BoxFuture<'static, ApiResult<Option<(String, Value)>>> {
        let source = match result.get(&self.key) {
            None | Some(Value::Null) => return future::ready(Ok(None)).boxed(),
            Some(source) => source,
        };

        let into = self.into.clone();
        match self.kind {
            Kind::Single => {
                let call = self.dispatcher.call(source.clone());
                async move { Ok(Some((into, call.await?))) }.boxed()
            }
            Kind::Multiple => {
                let items = match source.as_array() {
                    Some(items) if !items.is_empty() => items,
                    _ => return future::ready(Ok(None)).boxed(),
                };
                trace!(key = %self.key, count = items.len(), "loading related items");
                let calls: Vec<_> = items
                    .iter()
                    .map(|item| self.dispatcher.call(item.clone()))
                    .collect();
                async move {
                    let values = try_join_all(calls).await?;
                    Ok(Some((into, Value::Array(values))))
                }
                .boxed()
            }
        }
    }
}

/// Attach related values to the result of `resolver`.
///
/// `setup` runs once per instantiation and registers relations on the
/// [`Relations`] builder. After the base call resolves, every relation is
/// loaded concurrently; the first failure rejects the call.
///
/// ```
/// use apiiz_core::{include, wrap, Resolver};
/// use serde_json::{json, Value};
///
/// let get_todo: Resolver<Value, Value> = wrap(|id, _| Ok(json!({ "id": id })));
/// let get_user: Resolver<Value, Value> = wrap(|id, _| Ok(json!({ "id": id, "todoIds": [1, 2] })));
/// let with_todos = include(get_user, move |load| {
///     load.multiple("todoIds", "todos", get_todo.clone());
/// });
/// # let _ = with_todos;
/// ```
pub fn include<P, F>(resolver: Resolver<P, Value>, setup: F) -> Resolver<P, Value>
where
    P: Send + 'static,
    F: Fn(&mut Relations) + Send + Sync + 'static,
{
    Resolver::new(move |ctx: &Context| {
        let base = resolver.resolve(ctx);
        let mut relations = Relations {
            ctx: ctx.clone(),
            relations: Vec::new(),
        };
        setup(&mut relations);
        let relations = Arc::new(relations.relations);

        Dispatcher::new(move |payload| {
            let call = base.call(payload);
            let relations = relations.clone();
            async move {
                let mut result = call.await?;
                let loads: Vec<_> = relations.iter().map(|r| r.load(&result)).collect();
                let fields = try_join_all(loads).await?;

                if let Value::Object(map) = &mut result {
                    for (into, value) in fields.into_iter().flatten() {
                        map.insert(into, value);
                    }
                }
                Ok(result)
            }
            .boxed()
        })
    })
}
