use futures::future;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;

use crate::context::Context;
use crate::error::ApiResult;
use crate::resolver::{Dispatcher, Resolver};

/// Leaf resolver backed by an in-process async function.
///
/// The function receives the payload and a clone of the context, so it can
/// reach configuration or sibling dispatchers.
pub fn memory<P, R, F, Fut>(f: F) -> Resolver<P, R>
where
    P: Send + 'static,
    R: Send + 'static,
    F: Fn(P, Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ApiResult<R>> + Send + 'static,
{
    let f = Arc::new(f);
    Resolver::new(move |ctx: &Context| {
        let ctx = ctx.clone();
        let f = f.clone();
        Dispatcher::new(move |payload| f(payload, ctx.clone()).boxed())
    })
}

/// Leaf resolver backed by a synchronous function. Its result is ready on
/// the first poll.
pub fn wrap<P, R, F>(f: F) -> Resolver<P, R>
where
    P: Send + 'static,
    R: Send + 'static,
    F: Fn(P, &Context) -> ApiResult<R> + Send + Sync + 'static,
{
    let f = Arc::new(f);
    Resolver::new(move |ctx: &Context| {
        let ctx = ctx.clone();
        let f = f.clone();
        Dispatcher::new(move |payload| future::ready(f(payload, &ctx)).boxed())
    })
}

/// Leaf resolver that forwards every call to a sibling dispatcher of the same
/// definition, looked up by name at call time.
pub fn sibling(name: impl Into<String>) -> Resolver<serde_json::Value, serde_json::Value> {
    let name: Arc<str> = Arc::from(name.into());
    Resolver::new(move |ctx: &Context| {
        let ctx = ctx.clone();
        let name = name.clone();
        Dispatcher::new(move |payload| match ctx.dispatcher(&name) {
            Some(dispatcher) => dispatcher.call(payload),
            None => future::ready(Err(crate::ApiError::UnknownDispatcher(name.to_string()))).boxed(),
        })
    })
}
