// Keyed fan-out combinators: `all` waits for every member, `race` keeps the
// first member to produce a value.

use futures::future::{select_all, try_join_all};
use futures::{FutureExt, TryFutureExt};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::task::Poll;
use tracing::trace;

use crate::context::Context;
use crate::error::ApiResult;
use crate::resolver::{DispatchFuture, Dispatcher, Resolver};

/// Splits the group payload into per-member payloads, keyed by member name.
pub type Distribute<P> = Arc<dyn Fn(&P) -> Value + Send + Sync>;

/// Reshapes the collected keyed results.
pub type Shape = Arc<dyn Fn(Map<String, Value>) -> Value + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupMode {
    All,
    Race,
}

/// Builder for [`all`] and [`race`] resolvers.
pub struct Group<P> {
    mode: GroupMode,
    members: IndexMap<String, Resolver<Value, Value>>,
    distribute: Option<Distribute<P>>,
    shape: Option<Shape>,
}

/// Dispatch every member and resolve with all results keyed by member name.
///
/// Members whose result is ready on the first poll are collected right away;
/// the rest are awaited together. The first failure rejects the group, and a
/// member failing on its first poll stops later members from being called.
pub fn all<P, I, K>(members: I) -> Group<P>
where
    I: IntoIterator<Item = (K, Resolver<Value, Value>)>,
    K: Into<String>,
{
    Group::new(GroupMode::All, members)
}

/// Dispatch members in order and resolve with the first one to produce a value.
///
/// A member that succeeds or fails on the first poll settles the race
/// immediately and later members are not called. Otherwise the first pending call to settle decides the
/// outcome; a rejection settles the group as rejected. Losing calls are
/// dropped, which cancels them at their next suspension point.
pub fn race<P, I, K>(members: I) -> Group<P>
where
    I: IntoIterator<Item = (K, Resolver<Value, Value>)>,
    K: Into<String>,
{
    Group::new(GroupMode::Race, members)
}

impl<P> Group<P> {
    fn new<I, K>(mode: GroupMode, members: I) -> Self
    where
        I: IntoIterator<Item = (K, Resolver<Value, Value>)>,
        K: Into<String>,
    {
        Self {
            mode,
            members: members.into_iter().map(|(k, r)| (k.into(), r)).collect(),
            distribute: None,
            shape: None,
        }
    }

    pub fn mode(&self) -> GroupMode {
        self.mode
    }

    pub fn member(mut self, key: impl Into<String>, resolver: Resolver<Value, Value>) -> Self {
        self.members.insert(key.into(), resolver);
        self
    }

    /// Per-member payloads. `f` returns an object keyed by member name;
    /// members without an entry receive `null`. Without a distribution
    /// function every member receives `null`.
    pub fn payload<F>(mut self, f: F) -> Self
    where
        F: Fn(&P) -> Value + Send + Sync + 'static,
    {
        self.distribute = Some(Arc::new(f));
        self
    }

    pub fn shape<F>(mut self, f: F) -> Self
    where
        F: Fn(Map<String, Value>) -> Value + Send + Sync + 'static,
    {
        self.shape = Some(Arc::new(f));
        self
    }
}

impl<P> Group<P>
where
    P: Send + 'static,
{
    pub fn build(self) -> Resolver<P, Value> {
        let Group {
            mode,
            members,
            distribute,
            shape,
        } = self;

        Resolver::new(move |ctx: &Context| {
            // every member is instantiated, even those a race never calls
            let entries: Arc<Vec<(String, Dispatcher<Value, Value>)>> = Arc::new(
                members
                    .iter()
                    .map(|(key, resolver)| (key.clone(), resolver.resolve(ctx)))
                    .collect(),
            );
            let distribute = distribute.clone();
            let shape = shape.clone();

            Dispatcher::new(move |payload: P| {
                let payloads = distribute.as_ref().map(|f| f(&payload));
                let entries = entries.clone();
                let shape = shape.clone();
                async move {
                    let collected = match mode {
                        GroupMode::All => settle_all(&entries, payloads.as_ref()).await?,
                        GroupMode::Race => settle_first(&entries, payloads.as_ref()).await?,
                    };
                    Ok(match &shape {
                        Some(shape) => shape(collected),
                        None => Value::Object(collected),
                    })
                }
                .boxed()
            })
        })
    }
}

impl<P> From<Group<P>> for Resolver<P, Value>
where
    P: Send + 'static,
{
    fn from(group: Group<P>) -> Self {
        group.build()
    }
}

impl<P> fmt::Debug for Group<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("mode", &self.mode)
            .field("members", &self.members.keys().collect::<Vec<_>>())
            .field("distribute", &self.distribute.is_some())
            .field("shape", &self.shape.is_some())
            .finish()
    }
}

fn member_payload(payloads: Option<&Value>, key: &str) -> Value {
    payloads
        .and_then(|p| p.get(key))
        .cloned()
        .unwrap_or(Value::Null)
}

async fn settle_all(
    entries: &[(String, Dispatcher<Value, Value>)],
    payloads: Option<&Value>,
) -> ApiResult<Map<String, Value>> {
    let mut slots: Vec<Option<Value>> = vec![None; entries.len()];
    let mut pending: Vec<DispatchFuture<(usize, Value)>> = Vec::new();

    for (index, (key, dispatcher)) in entries.iter().enumerate() {
        let mut call = dispatcher.call(member_payload(payloads, key));
        match futures::poll!(&mut call) {
            Poll::Ready(Ok(value)) => slots[index] = Some(value),
            Poll::Ready(Err(error)) => {
                trace!(%key, "member rejected synchronously");
                return Err(error);
            }
            Poll::Pending => pending.push(call.map_ok(move |value| (index, value)).boxed()),
        }
    }

    for (index, value) in try_join_all(pending).await? {
        slots[index] = Some(value);
    }

    Ok(entries
        .iter()
        .zip(slots)
        .map(|((key, _), value)| (key.clone(), value.unwrap_or(Value::Null)))
        .collect())
}

async fn settle_first(
    entries: &[(String, Dispatcher<Value, Value>)],
    payloads: Option<&Value>,
) -> ApiResult<Map<String, Value>> {
    let mut winner = Map::new();
    let mut pending: Vec<DispatchFuture<(String, Value)>> = Vec::new();

    for (key, dispatcher) in entries.iter() {
        let mut call = dispatcher.call(member_payload(payloads, key));
        match futures::poll!(&mut call) {
            Poll::Ready(Ok(value)) => {
                trace!(%key, "race settled synchronously");
                winner.insert(key.clone(), value);
                return Ok(winner);
            }
            Poll::Ready(Err(error)) => {
                trace!(%key, "race rejected synchronously");
                return Err(error);
            }
            Poll::Pending => {
                let key = key.clone();
                pending.push(call.map_ok(move |value| (key, value)).boxed());
            }
        }
    }

    if pending.is_empty() {
        return Ok(winner);
    }

    let (outcome, _, _losers) = select_all(pending).await;
    let (key, value) = outcome?;
    trace!(%key, "race settled");
    winner.insert(key, value);
    Ok(winner)
}
