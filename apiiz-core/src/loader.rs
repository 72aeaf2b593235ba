//! Request batching.
//!
//! [`loader`] turns a resolver over a *list* of keys into a resolver over a
//! *single* key. Every single-key call made during one scheduling window is
//! queued in call order; when the window closes the wrapped resolver is
//! called once with all queued keys and each caller receives its own result.
//!
//! Results are assembled in one of two ways:
//!
//! - positional (no remap): result `i` belongs to key `i`. A result list of
//!   the wrong length fails the whole batch with [`ApiError::BatchMismatch`].
//! - remap: for each key, the first result accepted by the predicate
//!   `remap(result, key)` is delivered. A key with no match gets
//!   `R::default()` (`Value::Null` for JSON) or, with
//!   [`MissPolicy::Reject`], an [`ApiError::Missing`].
//!
//! Identical keys are not deduplicated. A failure of the batch call is
//! delivered to every caller of that window.

use futures::future;
use futures::FutureExt;
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::context::Context;
use crate::error::{ApiError, ApiResult};
use crate::ids::ResolverId;
use crate::resolver::{DispatchFuture, Dispatcher, Resolver};

/// Predicate correlating one batch result with one requested key.
pub type Remap<P, R> = Arc<dyn Fn(&R, &P) -> bool + Send + Sync>;

/// What a key without a matching remapped result resolves to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MissPolicy {
    /// Resolve to `R::default()`.
    #[default]
    Absent,
    /// Reject with [`ApiError::Missing`].
    Reject,
}

/// Per-loader options. Unset fields fall back to the definition's
/// [`LoaderConfigs`](crate::LoaderConfigs).
pub struct LoaderOptions<P, R> {
    delay: Option<Duration>,
    max_batch_size: Option<usize>,
    remap: Option<Remap<P, R>>,
    miss: MissPolicy,
    shared: Option<LoaderRef<P, R>>,
}

impl<P, R> LoaderOptions<P, R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep each batch window open for `delay` instead of a single scheduler turn.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Flush a window early once it holds `size` keys.
    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = Some(size.max(1));
        self
    }

    pub fn remap<F>(mut self, remap: F) -> Self
    where
        F: Fn(&R, &P) -> bool + Send + Sync + 'static,
    {
        self.remap = Some(Arc::new(remap));
        self
    }

    pub fn miss(mut self, policy: MissPolicy) -> Self {
        self.miss = policy;
        self
    }

    /// Share one batching engine with every other loader given the same handle.
    pub fn shared(mut self, handle: LoaderRef<P, R>) -> Self {
        self.shared = Some(handle);
        self
    }
}

impl<P, R> Default for LoaderOptions<P, R> {
    fn default() -> Self {
        Self {
            delay: None,
            max_batch_size: None,
            remap: None,
            miss: MissPolicy::default(),
            shared: None,
        }
    }
}

impl<P, R> fmt::Debug for LoaderOptions<P, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderOptions")
            .field("delay", &self.delay)
            .field("max_batch_size", &self.max_batch_size)
            .field("remap", &self.remap.is_some())
            .field("miss", &self.miss)
            .field("shared", &self.shared.is_some())
            .finish()
    }
}

/// External handle to a batching engine.
///
/// Within one context, the first loader instantiated with the handle creates
/// the engine (with its own resolver and options) and later ones reuse it, so
/// independently composed call sites share one batch window. Each context
/// gets its own engine, released when the definition is torn down.
pub struct LoaderRef<P, R> {
    id: ResolverId,
    _marker: PhantomData<fn(P) -> R>,
}

impl<P, R> LoaderRef<P, R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `ctx` already holds an engine for this handle.
    pub fn is_bound(&self, ctx: &Context) -> bool {
        ctx.shared().contains(self.id)
    }
}

impl<P, R> Default for LoaderRef<P, R> {
    fn default() -> Self {
        Self {
            id: ResolverId::next(),
            _marker: PhantomData,
        }
    }
}

impl<P, R> Clone for LoaderRef<P, R> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            _marker: PhantomData,
        }
    }
}

impl<P, R> fmt::Debug for LoaderRef<P, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderRef").field("id", &self.id).finish()
    }
}

/// Wrap a multi-key resolver into a batched single-key resolver.
pub fn loader<P, R>(resolver: Resolver<Vec<P>, Vec<R>>, options: LoaderOptions<P, R>) -> Resolver<P, R>
where
    P: Clone + Send + 'static,
    R: Clone + Default + Send + 'static,
{
    let options = Arc::new(options);
    Resolver::new(move |ctx: &Context| {
        let engine = match &options.shared {
            Some(handle) => ctx
                .shared()
                .get_or_insert_with(handle.id, || BatchEngine::new(&resolver, ctx, &options)),
            None => BatchEngine::new(&resolver, ctx, &options),
        };
        Dispatcher::new(move |key| engine.load(key))
    })
}

struct BatchEngine<P, R> {
    dispatcher: Dispatcher<Vec<P>, Vec<R>>,
    remap: Option<Remap<P, R>>,
    miss: MissPolicy,
    delay: Option<Duration>,
    max_batch_size: Option<usize>,
    queue: Mutex<Queue<P, R>>,
}

struct Queue<P, R> {
    window: u64,
    deadline: Option<Instant>,
    keys: Vec<P>,
    waiters: Vec<oneshot::Sender<ApiResult<R>>>,
}

struct Batch<P, R> {
    window: u64,
    keys: Vec<P>,
    waiters: Vec<oneshot::Sender<ApiResult<R>>>,
}

enum Action<P, R> {
    Queued { window: u64, deadline: Option<Instant> },
    Dispatch(Batch<P, R>),
}

impl<P, R> Queue<P, R> {
    fn take(&mut self) -> Batch<P, R> {
        let batch = Batch {
            window: self.window,
            keys: mem::take(&mut self.keys),
            waiters: mem::take(&mut self.waiters),
        };
        self.window += 1;
        self.deadline = None;
        batch
    }
}

impl<P, R> BatchEngine<P, R>
where
    P: Clone + Send + 'static,
    R: Clone + Default + Send + 'static,
{
    fn new(resolver: &Resolver<Vec<P>, Vec<R>>, ctx: &Context, options: &LoaderOptions<P, R>) -> Arc<Self> {
        let defaults = ctx.configs().loader;
        Arc::new(Self {
            dispatcher: resolver.resolve(ctx),
            remap: options.remap.clone(),
            miss: options.miss,
            delay: options.delay.or(defaults.delay),
            max_batch_size: options.max_batch_size.or(defaults.max_batch_size),
            queue: Mutex::new(Queue {
                window: 0,
                deadline: None,
                keys: Vec::new(),
                waiters: Vec::new(),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Queue<P, R>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `key` in the open window.
    ///
    /// The window is closed by the callers' own futures rather than a
    /// background task: every waiting future races its result against
    /// closing its window, so a window stays open until a caller is polled
    /// after the delay (or after one yield without a delay). Calls issued
    /// back to back from one task therefore always share a window.
    fn load(self: &Arc<Self>, key: P) -> DispatchFuture<R> {
        let Ok(runtime) = Handle::try_current() else {
            return future::ready(Err(ApiError::NoRuntime("loader batch"))).boxed();
        };

        let (tx, mut rx) = oneshot::channel();
        let action = {
            let mut queue = self.lock();
            if queue.keys.is_empty() {
                queue.deadline = self.delay.map(|delay| Instant::now() + delay);
            }
            queue.keys.push(key);
            queue.waiters.push(tx);

            if self.max_batch_size.is_some_and(|max| queue.keys.len() >= max) {
                Action::Dispatch(queue.take())
            } else {
                Action::Queued {
                    window: queue.window,
                    deadline: queue.deadline,
                }
            }
        };

        let engine = self.clone();
        match action {
            Action::Dispatch(batch) => {
                trace!(window = batch.window, "batch full, dispatching early");
                runtime.spawn(engine.dispatch(batch));
                async move { rx.await.unwrap_or(Err(ApiError::Dropped)) }.boxed()
            }
            Action::Queued { window, deadline } => async move {
                tokio::select! {
                    biased;
                    outcome = &mut rx => return outcome.unwrap_or(Err(ApiError::Dropped)),
                    _ = engine.close(window, deadline, runtime) => {}
                }
                rx.await.unwrap_or(Err(ApiError::Dropped))
            }
            .boxed(),
        }
    }

    /// Wait out the window, then dispatch it unless another caller already did.
    async fn close(self: Arc<Self>, window: u64, deadline: Option<Instant>, runtime: Handle) {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => tokio::task::yield_now().await,
        }

        let batch = {
            let mut queue = self.lock();
            if queue.window != window || queue.keys.is_empty() {
                return;
            }
            queue.take()
        };
        runtime.spawn(self.dispatch(batch));
    }

    async fn dispatch(self: Arc<Self>, batch: Batch<P, R>) {
        let Batch {
            window,
            mut keys,
            waiters,
        } = batch;
        debug!(window, keys = keys.len(), "dispatching batch");

        let request = if self.remap.is_some() {
            keys.clone()
        } else {
            mem::take(&mut keys)
        };

        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| self.dispatcher.call(request))) {
            Ok(call) => AssertUnwindSafe(call)
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(ApiError::panicked(panic))),
            Err(panic) => Err(ApiError::panicked(panic)),
        };

        let results = match outcome {
            Ok(results) => results,
            Err(error) => {
                debug!(window, %error, "batch failed");
                for waiter in waiters {
                    let _ = waiter.send(Err(error.clone()));
                }
                return;
            }
        };

        match &self.remap {
            Some(remap) => {
                for (position, (key, waiter)) in keys.iter().zip(waiters).enumerate() {
                    let outcome = match results.iter().find(|result| remap(result, key)) {
                        Some(result) => Ok(result.clone()),
                        None => match self.miss {
                            MissPolicy::Absent => Ok(R::default()),
                            MissPolicy::Reject => Err(ApiError::Missing { position }),
                        },
                    };
                    let _ = waiter.send(outcome);
                }
            }
            None if results.len() != waiters.len() => {
                let error = ApiError::BatchMismatch {
                    expected: waiters.len(),
                    actual: results.len(),
                };
                for waiter in waiters {
                    let _ = waiter.send(Err(error.clone()));
                }
            }
            None => {
                for (result, waiter) in results.into_iter().zip(waiters) {
                    let _ = waiter.send(Ok(result));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::define::{define, Schema};
    use crate::memory::memory;
    use crate::LoaderConfigs;
    use crate::Configs;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Calls = Arc<Mutex<Vec<Vec<u32>>>>;

    fn recording_batch() -> (Resolver<Vec<u32>, Vec<u32>>, Calls) {
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let log = calls.clone();
        let resolver = memory(move |keys: Vec<u32>, _ctx| {
            log.lock().unwrap().push(keys.clone());
            async move { Ok(keys.into_iter().map(|k| k * 10).collect()) }
        });
        (resolver, calls)
    }

    #[tokio::test]
    async fn test_positional_batch() {
        let (batch, calls) = recording_batch();
        let dispatcher = loader(batch, LoaderOptions::new()).resolve(&Context::default());

        let a = dispatcher.call(1);
        let b = dispatcher.call(2);
        let c = dispatcher.call(3);
        let (a, b, c) = tokio::join!(a, b, c);

        assert_eq!((a.unwrap(), b.unwrap(), c.unwrap()), (10, 20, 30));
        assert_eq!(*calls.lock().unwrap(), vec![vec![1, 2, 3]]);
    }

    #[tokio::test]
    async fn test_remap_with_duplicate_keys() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let counter = invocations.clone();
        let users = memory(move |ids: Vec<Value>, _ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            assert_eq!(ids, vec![json!(1), json!(3), json!(1)]);
            async move { Ok(vec![json!({ "id": 1 }), json!({ "id": 3 })]) }
        });
        let options = LoaderOptions::new().remap(|user: &Value, id: &Value| user["id"] == *id);
        let dispatcher = loader(users, options).resolve(&Context::default());

        let (u1, u2, u3) = tokio::join!(
            dispatcher.call(json!(1)),
            dispatcher.call(json!(3)),
            dispatcher.call(json!(1))
        );

        assert_eq!(u1.unwrap(), json!({ "id": 1 }));
        assert_eq!(u2.unwrap(), json!({ "id": 3 }));
        assert_eq!(u3.unwrap(), json!({ "id": 1 }));
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remap_miss_policies() {
        let users = memory(|_ids: Vec<Value>, _ctx| async { Ok(vec![json!({ "id": 1 })]) });

        let absent = loader(
            users.clone(),
            LoaderOptions::new().remap(|user: &Value, id: &Value| user["id"] == *id),
        )
        .resolve(&Context::default());
        let (hit, miss) = tokio::join!(absent.call(json!(1)), absent.call(json!(2)));
        assert_eq!(hit.unwrap(), json!({ "id": 1 }));
        assert_eq!(miss.unwrap(), Value::Null);

        let strict = loader(
            users,
            LoaderOptions::new()
                .remap(|user: &Value, id: &Value| user["id"] == *id)
                .miss(MissPolicy::Reject),
        )
        .resolve(&Context::default());
        let (hit, miss) = tokio::join!(strict.call(json!(1)), strict.call(json!(2)));
        assert!(hit.is_ok());
        assert!(matches!(miss, Err(ApiError::Missing { position: 1 })));
    }

    #[tokio::test]
    async fn test_batch_error_reaches_every_caller() {
        let failing: Resolver<Vec<u32>, Vec<u32>> =
            memory(|_keys, _ctx| async { Err(ApiError::rejected("backend down")) });
        let dispatcher = loader(failing, LoaderOptions::new()).resolve(&Context::default());

        let (a, b) = tokio::join!(dispatcher.call(1), dispatcher.call(2));
        for outcome in [a, b] {
            assert!(matches!(outcome, Err(ApiError::Rejected(ref m)) if m == "backend down"));
        }
    }

    #[tokio::test]
    async fn test_cardinality_mismatch_fails_batch() {
        let short: Resolver<Vec<u32>, Vec<u32>> = memory(|_keys, _ctx| async { Ok(vec![1]) });
        let dispatcher = loader(short, LoaderOptions::new()).resolve(&Context::default());

        let (a, b) = tokio::join!(dispatcher.call(1), dispatcher.call(2));
        assert!(matches!(a, Err(ApiError::BatchMismatch { expected: 2, actual: 1 })));
        assert!(matches!(b, Err(ApiError::BatchMismatch { expected: 2, actual: 1 })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_window_and_config_fallback() {
        let (batch, calls) = recording_batch();
        let configs = Configs::new().loader(LoaderConfigs::default().delay(Duration::from_millis(20)));
        let dispatcher = loader(batch, LoaderOptions::new()).resolve(&Context::new(configs));

        let first = tokio::spawn(dispatcher.call(1));
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = tokio::spawn(dispatcher.call(2));
        tokio::time::sleep(Duration::from_millis(30)).await;
        let third = dispatcher.call(3);

        assert_eq!(first.await.unwrap().unwrap(), 10);
        assert_eq!(second.await.unwrap().unwrap(), 20);
        assert_eq!(third.await.unwrap(), 30);
        assert_eq!(*calls.lock().unwrap(), vec![vec![1, 2], vec![3]]);
    }

    #[tokio::test]
    async fn test_max_batch_size_splits_windows() {
        let (batch, calls) = recording_batch();
        let dispatcher =
            loader(batch, LoaderOptions::new().max_batch_size(2)).resolve(&Context::default());

        let calls_made: Vec<_> = (1..=5).map(|k| dispatcher.call(k)).collect();
        let results = futures::future::try_join_all(calls_made).await.unwrap();

        assert_eq!(results, vec![10, 20, 30, 40, 50]);
        assert_eq!(
            *calls.lock().unwrap(),
            vec![vec![1, 2], vec![3, 4], vec![5]]
        );
    }

    #[tokio::test]
    async fn test_shared_handle_joins_windows() {
        let (batch, calls) = recording_batch();
        let handle = LoaderRef::new();
        let ctx = Context::default();

        let left = loader(batch.clone(), LoaderOptions::new().shared(handle.clone())).resolve(&ctx);
        let right = loader(batch, LoaderOptions::new().shared(handle.clone())).resolve(&ctx);
        assert!(handle.is_bound(&ctx));
        assert!(!handle.is_bound(&Context::default()));

        let (a, b) = tokio::join!(left.call(1), right.call(2));
        assert_eq!((a.unwrap(), b.unwrap()), (10, 20));
        assert_eq!(*calls.lock().unwrap(), vec![vec![1, 2]]);
    }

    #[tokio::test]
    async fn test_shared_handle_is_scoped_per_definition() {
        let seen: Arc<Mutex<Vec<Option<String>>>> = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let batch = memory(move |keys: Vec<Value>, ctx: Context| {
            log.lock().unwrap().push(ctx.configs().http.base_url.clone());
            async move { Ok(keys) }
        });
        let handle = LoaderRef::new();

        let first = define(
            Schema::new()
                .configs(Configs::new().base_url("ctx-one"))
                .entry("load", loader(batch.clone(), LoaderOptions::new().shared(handle.clone()))),
        );
        assert_eq!(first.call("load", json!(1)).await.unwrap(), json!(1));
        drop(first);

        let second = define(
            Schema::new()
                .configs(Configs::new().base_url("ctx-two"))
                .entry("load", loader(batch, LoaderOptions::new().shared(handle))),
        );
        assert_eq!(second.call("load", json!(2)).await.unwrap(), json!(2));

        assert_eq!(
            *seen.lock().unwrap(),
            vec![Some("ctx-one".to_string()), Some("ctx-two".to_string())]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_back_to_back_calls_share_window_on_multi_thread_runtime() {
        for n in [3u32, 20, 200] {
            for _ in 0..25 {
                let (batch, calls) = recording_batch();
                let dispatcher = loader(batch, LoaderOptions::new()).resolve(&Context::default());

                let pending: Vec<_> = (0..n).map(|k| dispatcher.call(k)).collect();
                let results = futures::future::try_join_all(pending).await.unwrap();

                assert_eq!(results, (0..n).map(|k| k * 10).collect::<Vec<_>>());
                assert_eq!(*calls.lock().unwrap(), vec![(0..n).collect::<Vec<_>>()]);
            }
        }
    }

    #[tokio::test]
    async fn test_any_waiter_closes_the_window() {
        let (batch, calls) = recording_batch();
        let dispatcher = loader(batch, LoaderOptions::new()).resolve(&Context::default());

        let _never_polled = dispatcher.call(1);
        assert_eq!(dispatcher.call(2).await.unwrap(), 20);
        assert_eq!(*calls.lock().unwrap(), vec![vec![1, 2]]);
    }

    #[tokio::test]
    async fn test_batch_panic_reaches_every_caller() {
        let exploding: Resolver<Vec<u32>, Vec<u32>> = memory(|keys: Vec<u32>, _ctx| async move {
            if !keys.is_empty() {
                panic!("batch exploded");
            }
            Ok(keys)
        });
        let dispatcher = loader(exploding, LoaderOptions::new()).resolve(&Context::default());

        let (a, b) = tokio::join!(dispatcher.call(1), dispatcher.call(2));
        for outcome in [a, b] {
            assert!(matches!(outcome, Err(ApiError::Panicked(ref m)) if m == "batch exploded"));
        }
    }

    #[test]
    fn test_load_outside_runtime() {
        let (batch, _calls) = recording_batch();
        let dispatcher = loader(batch, LoaderOptions::new()).resolve(&Context::default());
        let outcome = futures::executor::block_on(dispatcher.call(1));
        assert!(matches!(outcome, Err(ApiError::NoRuntime(_))));
    }
}
