use futures::future;
use futures::FutureExt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;

use crate::context::Context;
use crate::error::{ApiError, ApiResult};
use crate::resolver::{DispatchFuture, Dispatcher, Resolver};

/// Future that never settles.
///
/// Returned for calls that were suppressed rather than failed, such as a
/// throttled call or a dismissed error. Dropping it is the only way out.
pub fn forever<R>() -> DispatchFuture<R>
where
    R: Send + 'static,
{
    future::pending().boxed()
}

struct DebounceState<R> {
    generation: u64,
    timer: Option<JoinHandle<()>>,
    waiters: Vec<oneshot::Sender<ApiResult<R>>>,
}

fn lock<T>(state: &Mutex<T>) -> MutexGuard<'_, T> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Delay calls until `wait` has passed without a newer call.
///
/// Each call restarts the timer. When it finally fires, the wrapped
/// dispatcher runs once with the latest payload and every caller waiting
/// since the previous run receives that outcome. Needs a Tokio runtime.
pub fn debounce<P, R>(resolver: Resolver<P, R>, wait: Duration) -> Resolver<P, R>
where
    P: Send + 'static,
    R: Clone + Send + 'static,
{
    Resolver::new(move |ctx: &Context| {
        let inner = resolver.resolve(ctx);
        let state = Arc::new(Mutex::new(DebounceState {
            generation: 0,
            timer: None,
            waiters: Vec::new(),
        }));

        Dispatcher::new(move |payload: P| {
            let Ok(handle) = Handle::try_current() else {
                return future::ready(Err(ApiError::NoRuntime("debounce"))).boxed();
            };

            let (tx, rx) = oneshot::channel();
            let mut guard = lock(&state);
            guard.generation += 1;
            guard.waiters.push(tx);
            if let Some(previous) = guard.timer.take() {
                trace!(waiting = guard.waiters.len(), "debounced call superseded");
                previous.abort();
            }

            let generation = guard.generation;
            let inner = inner.clone();
            let timer_state = state.clone();
            guard.timer = Some(handle.spawn(async move {
                tokio::time::sleep(wait).await;
                let waiters = {
                    let mut guard = lock(&timer_state);
                    if guard.generation != generation {
                        return;
                    }
                    guard.timer = None;
                    std::mem::take(&mut guard.waiters)
                };

                trace!(waiters = waiters.len(), "debounce timer fired");
                let outcome = match panic::catch_unwind(AssertUnwindSafe(|| inner.call(payload))) {
                    Ok(call) => AssertUnwindSafe(call)
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|panic| Err(ApiError::panicked(panic))),
                    Err(panic) => Err(ApiError::panicked(panic)),
                };
                for waiter in waiters {
                    let _ = waiter.send(outcome.clone());
                }
            }));
            drop(guard);

            async move { rx.await.unwrap_or(Err(ApiError::Dropped)) }.boxed()
        })
    })
}

/// Let at most one call through per `window`; calls inside the window get
/// [`forever`].
pub fn throttle<P, R>(resolver: Resolver<P, R>, window: Duration) -> Resolver<P, R>
where
    P: Send + 'static,
    R: Send + 'static,
{
    Resolver::new(move |ctx: &Context| {
        let inner = resolver.resolve(ctx);
        let last: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));

        Dispatcher::new(move |payload: P| {
            let now = Instant::now();
            {
                let mut last = lock(&last);
                if let Some(previous) = *last {
                    if now.duration_since(previous) < window {
                        trace!("throttled call suppressed");
                        return forever();
                    }
                }
                *last = Some(now);
            }
            inner.call(payload)
        })
    })
}
