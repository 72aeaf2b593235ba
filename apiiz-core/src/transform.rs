use futures::FutureExt;
use serde_json::Value;
use std::sync::Arc;

use crate::context::Context;
use crate::error::ApiResult;
use crate::resolver::{Dispatcher, Resolver};

/// Map each result through `f(result, payload, context)`.
///
/// The payload is cloned before the inner call so `f` can see it.
pub fn transform<P, R, T, F>(resolver: Resolver<P, R>, f: F) -> Resolver<P, T>
where
    P: Clone + Send + 'static,
    R: Send + 'static,
    T: Send + 'static,
    F: Fn(R, &P, &Context) -> ApiResult<T> + Send + Sync + 'static,
{
    let f = Arc::new(f);
    Resolver::new(move |ctx: &Context| {
        let inner = resolver.resolve(ctx);
        let ctx = ctx.clone();
        let f = f.clone();
        Dispatcher::new(move |payload: P| {
            let call = inner.call(payload.clone());
            let ctx = ctx.clone();
            let f = f.clone();
            async move { f(call.await?, &payload, &ctx) }.boxed()
        })
    })
}

/// Replace each result with the value at a dotted `path`, or `null` when
/// any segment is missing. Numeric segments index into arrays.
pub fn pluck<P>(resolver: Resolver<P, Value>, path: impl Into<String>) -> Resolver<P, Value>
where
    P: Send + 'static,
{
    let path: Arc<[String]> = path.into().split('.').map(str::to_owned).collect();
    Resolver::new(move |ctx: &Context| {
        let inner = resolver.resolve(ctx);
        let path = path.clone();
        Dispatcher::new(move |payload: P| {
            let call = inner.call(payload);
            let path = path.clone();
            async move { Ok(prop_value(call.await?, &path)) }.boxed()
        })
    })
}

fn prop_value(value: Value, path: &[String]) -> Value {
    let mut current = value;
    for segment in path {
        current = match current {
            Value::Object(mut map) => map.remove(segment.as_str()).unwrap_or(Value::Null),
            Value::Array(mut items) => match segment.parse::<usize>() {
                Ok(index) if index < items.len() => items.swap_remove(index),
                _ => Value::Null,
            },
            _ => return Value::Null,
        };
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::wrap;
    use serde_json::json;

    #[tokio::test]
    async fn test_transform_sees_payload() {
        let base: Resolver<u32, u32> = wrap(|n, _| Ok(n * 2));
        let described = transform(base, |doubled, original: &u32, _ctx| {
            Ok(format!("{} -> {}", original, doubled))
        });

        let result = described.resolve(&Context::default()).call(21).await.unwrap();
        assert_eq!(result, "21 -> 42");
    }

    #[tokio::test]
    async fn test_pluck_nested_path() {
        let base: Resolver<Value, Value> =
            wrap(|_, _| Ok(json!({ "data": { "items": [{ "id": 1 }, { "id": 2 }] } })));
        let ctx = Context::default();

        let second = pluck(base.clone(), "data.items.1.id").resolve(&ctx);
        assert_eq!(second.call(Value::Null).await.unwrap(), json!(2));

        let missing = pluck(base.clone(), "data.nope.id").resolve(&ctx);
        assert_eq!(missing.call(Value::Null).await.unwrap(), Value::Null);

        let scalar = pluck(base, "data.items.0.id.deeper").resolve(&ctx);
        assert_eq!(scalar.call(Value::Null).await.unwrap(), Value::Null);
    }
}
