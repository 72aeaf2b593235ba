use crate::context::Context;
use crate::resolver::{Dispatcher, Resolver};

/// Bind `resolver` to a single dispatcher instance per definition.
///
/// Without this, a resolver referenced from two places in one schema (say
/// directly and inside another entry's enhancer) is instantiated twice, and
/// any batching or caching state it keeps is duplicated. The registry key is
/// the wrapped resolver's id, so `singleton(r.clone())` at several sites
/// still shares one instance.
pub fn singleton<P, R>(resolver: Resolver<P, R>) -> Resolver<P, R>
where
    P: Send + 'static,
    R: Send + 'static,
{
    let id = resolver.id();
    let token = resolver.token().cloned();
    let shared = Resolver::new(move |ctx: &Context| {
        ctx.shared()
            .get_or_insert_with::<Dispatcher<P, R>, _>(id, || resolver.resolve(ctx))
    });
    match token {
        Some(token) => shared.with_token(token),
        None => shared,
    }
}
