//! The two-stage function shape every capability implements.
//!
//! A [`Resolver`] is a factory: given a [`Context`] it produces a long-lived
//! [`Dispatcher`]. Any state a capability keeps across calls (pending batches,
//! timers, caches) is created inside the factory, once per instantiation.
//!
//! Enhancers are plain functions `Resolver<P, R> -> Resolver<P2, R2>` and are
//! chained with [`Resolver::with`]. Each `with` wraps the current resolver, so
//! in `base.with(a).with(b)` the enhancer `b` is outermost: a call enters `b`,
//! then `a`, then `base`.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::cancel::CancelToken;
use crate::context::Context;
use crate::error::ApiResult;
use crate::ids::ResolverId;

/// Future returned by every dispatcher.
pub type DispatchFuture<R> = BoxFuture<'static, ApiResult<R>>;

/// Callable produced by a resolver: payload in, future of result out.
pub struct Dispatcher<P, R> {
    call: Arc<dyn Fn(P) -> DispatchFuture<R> + Send + Sync>,
}

impl<P, R> Dispatcher<P, R> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(P) -> DispatchFuture<R> + Send + Sync + 'static,
    {
        Self { call: Arc::new(f) }
    }

    /// Build a dispatcher from a function returning any sendable future.
    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ApiResult<R>> + Send + 'static,
    {
        Self::new(move |payload| f(payload).boxed())
    }

    pub fn call(&self, payload: P) -> DispatchFuture<R> {
        (self.call)(payload)
    }

    /// True when both handles share one underlying dispatcher instance.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.call, &other.call)
    }
}

impl<P, R> Clone for Dispatcher<P, R> {
    fn clone(&self) -> Self {
        Self {
            call: self.call.clone(),
        }
    }
}

impl<P, R> fmt::Debug for Dispatcher<P, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("instance", &Arc::as_ptr(&self.call).cast::<()>())
            .finish()
    }
}

/// Factory producing a [`Dispatcher`] from a shared [`Context`].
pub struct Resolver<P, R> {
    id: ResolverId,
    factory: Arc<dyn Fn(&Context) -> Dispatcher<P, R> + Send + Sync>,
    token: Option<CancelToken>,
}

impl<P, R> Resolver<P, R>
where
    P: Send + 'static,
    R: Send + 'static,
{
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&Context) -> Dispatcher<P, R> + Send + Sync + 'static,
    {
        Self {
            id: ResolverId::next(),
            factory: Arc::new(factory),
            token: None,
        }
    }

    pub fn id(&self) -> ResolverId {
        self.id
    }

    /// Instantiate a dispatcher for `ctx`.
    pub fn resolve(&self, ctx: &Context) -> Dispatcher<P, R> {
        (self.factory)(ctx)
    }

    /// Cancel token bound through [`cancellable`](crate::cancellable), if any.
    pub fn token(&self) -> Option<&CancelToken> {
        self.token.as_ref()
    }

    pub(crate) fn with_token(mut self, token: CancelToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Wrap this resolver with `enhancer`, returning the enhanced resolver.
    ///
    /// A bound cancel token is carried over unless the enhancer installs its own.
    pub fn with<P2, R2, F>(self, enhancer: F) -> Resolver<P2, R2>
    where
        P2: Send + 'static,
        R2: Send + 'static,
        F: FnOnce(Self) -> Resolver<P2, R2>,
    {
        let token = self.token.clone();
        let mut next = enhancer(self);
        if next.token.is_none() {
            next.token = token;
        }
        next
    }

    /// Like [`with`](Self::with) for enhancers of shape `fn(resolver, args)`.
    ///
    /// ```
    /// use apiiz_core::{debounce, wrap, Resolver};
    /// use std::time::Duration;
    ///
    /// let base: Resolver<u32, u32> = wrap(|n, _| Ok(n + 1));
    /// let debounced = base.with_args(debounce, Duration::from_millis(10));
    /// # let _ = debounced;
    /// ```
    pub fn with_args<A, P2, R2, F>(self, enhancer: F, args: A) -> Resolver<P2, R2>
    where
        P2: Send + 'static,
        R2: Send + 'static,
        F: FnOnce(Self, A) -> Resolver<P2, R2>,
    {
        self.with(|resolver| enhancer(resolver, args))
    }
}

impl<P, R> Clone for Resolver<P, R> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            factory: self.factory.clone(),
            token: self.token.clone(),
        }
    }
}

impl<P, R> fmt::Debug for Resolver<P, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("id", &self.id)
            .field("token", &self.token)
            .finish()
    }
}

/// Build an ad hoc enhancer: every call is delegated to
/// `f(context, inner_dispatcher, payload)`.
///
/// ```
/// use apiiz_core::{enhance, wrap, ApiError, Resolver};
/// use futures::FutureExt;
///
/// let double: Resolver<i64, i64> = wrap(|n, _| Ok(n * 2));
/// let non_negative = enhance(double, |_ctx, inner, n: i64| {
///     if n < 0 {
///         return futures::future::ready(Err(ApiError::rejected("negative"))).boxed();
///     }
///     inner.call(n)
/// });
/// # let _ = non_negative;
/// ```
pub fn enhance<P, R, P2, R2, F>(resolver: Resolver<P, R>, f: F) -> Resolver<P2, R2>
where
    P: Send + 'static,
    R: Send + 'static,
    P2: Send + 'static,
    R2: Send + 'static,
    F: Fn(&Context, &Dispatcher<P, R>, P2) -> DispatchFuture<R2> + Send + Sync + 'static,
{
    let token = resolver.token.clone();
    let f = Arc::new(f);
    let mut enhanced = Resolver::new(move |ctx: &Context| {
        let inner = resolver.resolve(ctx);
        let ctx = ctx.clone();
        let f = f.clone();
        Dispatcher::new(move |payload| f(&ctx, &inner, payload))
    });
    enhanced.token = token;
    enhanced
}
