// Singleton registry scoped to one definition.
// Keys are the ids of resolvers declared singleton; values are the
// dispatchers instantiated for them.

use dashmap::DashMap;
use std::any::Any;
use std::sync::Arc;
use tracing::debug;

use crate::ids::ResolverId;

#[derive(Clone, Default)]
pub struct SharedRegistry {
    entries: Arc<DashMap<ResolverId, Box<dyn Any + Send + Sync>>>,
}

impl SharedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<T>(&self, id: ResolverId) -> Option<T>
    where
        T: Clone + 'static,
    {
        self.entries
            .get(&id)
            .and_then(|entry| entry.value().downcast_ref::<T>().cloned())
    }

    /// Return the value registered for `id`, building and registering it when absent.
    ///
    /// No lock is held while `build` runs, so it may itself instantiate other
    /// singletons. If two builders race for the same id, the first insertion
    /// wins and the loser's value is discarded.
    pub fn get_or_insert_with<T, F>(&self, id: ResolverId, build: F) -> T
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        if let Some(existing) = self.get::<T>(id) {
            debug!(%id, "singleton registry hit");
            return existing;
        }

        let built = build();
        let entry = self
            .entries
            .entry(id)
            .or_insert_with(|| Box::new(built.clone()) as Box<dyn Any + Send + Sync>);
        let stored = entry.value().downcast_ref::<T>().cloned();
        drop(entry);

        debug!(%id, "singleton instantiated");
        stored.unwrap_or(built)
    }

    pub fn contains(&self, id: ResolverId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn clear(&self) {
        self.entries.clear();
    }
}

impl std::fmt::Debug for SharedRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRegistry")
            .field("entries", &self.entries.len())
            .finish()
    }
}
