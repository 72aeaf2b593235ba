use futures::FutureExt;
use std::fmt;
use std::sync::Arc;

use crate::context::Context;
use crate::error::ApiError;
use crate::resolver::{Dispatcher, Resolver};

type Hook<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Observer hooks for [`on`].
pub struct Events<R> {
    success: Option<Hook<R>>,
    error: Option<Hook<ApiError>>,
    done: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl<R> Events<R> {
    pub fn new() -> Self {
        Self {
            success: None,
            error: None,
            done: None,
        }
    }

    pub fn success<F>(mut self, f: F) -> Self
    where
        F: Fn(&R) + Send + Sync + 'static,
    {
        self.success = Some(Arc::new(f));
        self
    }

    pub fn error<F>(mut self, f: F) -> Self
    where
        F: Fn(&ApiError) + Send + Sync + 'static,
    {
        self.error = Some(Arc::new(f));
        self
    }

    /// Runs after `success` or `error`, whichever applies.
    pub fn done<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.done = Some(Arc::new(f));
        self
    }
}

impl<R> Default for Events<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Clone for Events<R> {
    fn clone(&self) -> Self {
        Self {
            success: self.success.clone(),
            error: self.error.clone(),
            done: self.done.clone(),
        }
    }
}

impl<R> fmt::Debug for Events<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Events")
            .field("success", &self.success.is_some())
            .field("error", &self.error.is_some())
            .field("done", &self.done.is_some())
            .finish()
    }
}

/// Observe the outcome of every call without changing it.
pub fn on<P, R>(resolver: Resolver<P, R>, events: Events<R>) -> Resolver<P, R>
where
    P: Send + 'static,
    R: Send + 'static,
{
    Resolver::new(move |ctx: &Context| {
        let inner = resolver.resolve(ctx);
        let events = events.clone();
        Dispatcher::new(move |payload: P| {
            let call = inner.call(payload);
            let events = events.clone();
            async move {
                let outcome = call.await;
                match &outcome {
                    Ok(value) => {
                        if let Some(success) = &events.success {
                            success(value);
                        }
                    }
                    Err(error) => {
                        if let Some(hook) = &events.error {
                            hook(error);
                        }
                    }
                }
                if let Some(done) = &events.done {
                    done();
                }
                outcome
            }
            .boxed()
        })
    })
}
