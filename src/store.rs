//! Lazily populated, explicitly invalidated cache for one resource type.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::patch;
use crate::resource::Resource;
use crate::HueError;

pub type Collection<T> = Arc<HashMap<String, T>>;

/// Maps a name (or legacy id) to every id carrying it.
type Index = Arc<HashMap<String, Vec<String>>>;

#[derive(Debug)]
struct State<T> {
    data: Collection<T>,
    loaded: bool,
    /// Bumped by every invalidation, so a fetch can tell it was overtaken.
    generation: u64,
    names: Option<Index>,
    legacy_ids: Option<Index>,
}

impl<T> Default for State<T> {
    fn default() -> Self {
        Self {
            data: Arc::default(),
            loaded: false,
            generation: 0,
            names: None,
            legacy_ids: None,
        }
    }
}

impl<T> State<T> {
    fn reset_indexes(&mut self) {
        self.names = None;
        self.legacy_ids = None;
    }
}

/// Cache of one resource collection.
///
/// The collection is fetched as a whole on first access and after every
/// [`invalidate`](Self::invalidate). Concurrent readers of an unpopulated
/// store share a single fetch.
#[derive(Debug)]
pub struct ResourceStore<T> {
    load_lock: Mutex<()>,
    state: RwLock<State<T>>,
}

impl<T> Default for ResourceStore<T> {
    fn default() -> Self {
        Self {
            load_lock: Mutex::new(()),
            state: RwLock::new(State::default()),
        }
    }
}

impl<T: Resource> ResourceStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached collection, calling `fetch` if it is not populated.
    ///
    /// A failed fetch leaves the store unpopulated, so the next call retries.
    pub async fn get_or_load<F, Fut>(&self, fetch: F) -> crate::Result<Collection<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = crate::Result<Vec<T>>>,
    {
        {
            let state = self.state.read().await;
            if state.loaded {
                return Ok(state.data.clone());
            }
        }

        let _loading = self.load_lock.lock().await;
        let generation = {
            let state = self.state.read().await;
            if state.loaded {
                return Ok(state.data.clone());
            }
            state.generation
        };

        log::debug!("populating {} cache", T::KIND);
        let resources = match fetch().await {
            Ok(resources) => resources,
            Err(err) => {
                log::warn!("failed to populate {} cache: {err}", T::KIND);
                self.invalidate().await;
                return Err(err);
            }
        };

        let data: Collection<T> = Arc::new(
            resources
                .into_iter()
                .map(|resource| (resource.id().to_string(), resource))
                .collect(),
        );

        let mut state = self.state.write().await;
        state.data = data.clone();
        state.reset_indexes();
        // invalidated while fetching: serve this result, but refetch next time
        state.loaded = state.generation == generation;
        Ok(data)
    }

    /// Marks the store as stale; the next [`get_or_load`](Self::get_or_load)
    /// replaces the whole collection.
    pub async fn invalidate(&self) {
        let mut state = self.state.write().await;
        state.loaded = false;
        state.generation += 1;
        state.reset_indexes();
    }

    pub async fn is_loaded(&self) -> bool {
        self.state.read().await.loaded
    }

    /// A single cached resource, without ever fetching.
    pub async fn get_cached(&self, id: &str) -> Option<T> {
        let state = self.state.read().await;
        if !state.loaded {
            return None;
        }
        state.data.get(id).cloned()
    }

    /// Applies a partial update to a cached resource.
    ///
    /// Updates for resources that are not cached are dropped. An update that
    /// cannot be applied is logged and leaves the cached value untouched.
    /// Returns whether the cache changed.
    ///
    /// An update arriving while the store is unpopulated may be newer than a
    /// fetch still in flight, so that fetch is not allowed to mark the store
    /// populated.
    pub async fn patch(&self, id: &str, partial: &Value) -> bool {
        let mut state = self.state.write().await;
        if !state.loaded {
            log::trace!("dropping {} update for {id}: cache not populated", T::KIND);
            state.generation += 1;
            return false;
        }
        let Some(cached) = state.data.get(id) else {
            log::trace!("dropping {} update for unknown id {id}", T::KIND);
            return false;
        };
        let updated = match patch::merge(cached, partial) {
            Ok(updated) => updated,
            Err(err) => {
                log::warn!("ignoring {} update for {id}: {err}", T::KIND);
                return false;
            }
        };
        Arc::make_mut(&mut state.data).insert(id.to_string(), updated);
        if partial.pointer("/metadata/name").is_some() {
            state.names = None;
        }
        true
    }

    /// Drops one entry. Returns whether it was cached.
    pub async fn remove(&self, id: &str) -> bool {
        let mut state = self.state.write().await;
        if !state.data.contains_key(id) {
            return false;
        }
        Arc::make_mut(&mut state.data).remove(id);
        state.reset_indexes();
        true
    }

    /// Ids of all cached resources named `name`.
    pub async fn ids_for_name(&self, name: &str) -> Vec<String> {
        let index = self
            .index(|state| &mut state.names, |resource| resource.name().map(str::to_string))
            .await;
        index.get(name).cloned().unwrap_or_default()
    }

    /// Resolves a legacy id to the current id.
    pub async fn id_for_legacy_id(&self, id_v1: &str) -> Option<String> {
        let index = self
            .index(
                |state| &mut state.legacy_ids,
                |resource| resource.id_v1().map(str::to_string),
            )
            .await;
        index.get(id_v1).and_then(|ids| ids.first().cloned())
    }

    /// Resolves exactly one id for `name`.
    pub async fn unique_id_for_name(&self, name: &str) -> crate::Result<String> {
        let mut ids = self.ids_for_name(name).await;
        match ids.len() {
            0 => Err(HueError::not_found(T::KIND, name)),
            1 => Ok(ids.remove(0)),
            _ => {
                ids.sort();
                Err(HueError::AmbiguousName {
                    name: name.to_string(),
                    ids,
                })
            }
        }
    }

    /// Returns a derived index, building it from the cached data if needed.
    async fn index(
        &self,
        slot: impl Fn(&mut State<T>) -> &mut Option<Index>,
        key: impl Fn(&T) -> Option<String>,
    ) -> Index {
        let mut state = self.state.write().await;
        if let Some(index) = slot(&mut state) {
            return index.clone();
        }
        let mut built: HashMap<String, Vec<String>> = HashMap::new();
        for (id, resource) in state.data.iter() {
            if let Some(key) = key(resource) {
                built.entry(key).or_default().push(id.clone());
            }
        }
        let built = Arc::new(built);
        *slot(&mut state) = Some(built.clone());
        built
    }
}
