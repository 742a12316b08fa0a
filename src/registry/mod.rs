//! The registry: one per application instance, holding every assembled
//! store and the canonical state tree.

mod config;
mod persist;

pub use config::{Environment, Mode, RegistryConfig};
pub use persist::{JsonFilePersist, MemoryPersist, PersistAdapter};

use crate::error::StoreError;
use crate::member::AnyState;
use crate::resource::FetchError;
use crate::runtime::ReactiveRuntime;
use crate::store::AssembledStore;
use crate::sync::{read, write, ReentrantGuard, ReentrantLock};
use serde::Serialize;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Serialized registry state: store name -> member key -> JSON value.
pub type StateTree = BTreeMap<String, BTreeMap<String, Value>>;

/// One key of a store's state slice.
#[derive(Clone)]
enum Slot {
    /// Hydrated before the store was assembled.
    Hydrated(Value),
    Live(AnyState),
}

struct StoreEntry {
    definition: u64,
    store: Arc<AssembledStore>,
}

#[derive(Default)]
struct RegistryState {
    state: BTreeMap<String, BTreeMap<String, Slot>>,
    stores: HashMap<String, StoreEntry>,
}

/// What the debug accessor exposes: everything but the install hook.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryDebug {
    pub config: RegistryConfig,
    pub stores: Vec<String>,
    pub state: StateTree,
}

static FALLBACK: RwLock<Option<Arc<Registry>>> = RwLock::new(None);

thread_local! {
    static SCOPE_STACK: RefCell<Vec<Arc<Registry>>> = const { RefCell::new(Vec::new()) };
}

struct ScopeGuard;

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        SCOPE_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Holds every assembled store of one application instance and the state
/// tree they share.
///
/// A registry is made current either structurally with
/// [`scope`](Self::scope) or for the whole process with
/// [`install`](Self::install); [`Registry::current`] resolves the innermost
/// scope first and falls back to the installed one.
///
/// ```
/// use larder::{Registry, RegistryConfig};
///
/// let registry = Registry::new(RegistryConfig::default());
/// registry.scope(|| {
///     let current = Registry::current().unwrap();
///     assert!(std::sync::Arc::ptr_eq(&current, &registry));
/// });
/// ```
pub struct Registry {
    config: RegistryConfig,
    runtime: Arc<ReactiveRuntime>,
    persist: Arc<dyn PersistAdapter>,
    inner: RwLock<RegistryState>,
    assembly: ReentrantLock,
}

impl Registry {
    /// A registry persisting to process memory.
    pub fn new(config: RegistryConfig) -> Arc<Self> {
        Self::with_persist(config, Arc::new(MemoryPersist::new()))
    }

    pub fn with_persist(config: RegistryConfig, persist: Arc<dyn PersistAdapter>) -> Arc<Self> {
        Arc::new(Self {
            config,
            runtime: ReactiveRuntime::new(),
            persist,
            inner: RwLock::new(RegistryState::default()),
            assembly: ReentrantLock::default(),
        })
    }

    /// Make this registry the process-wide fallback.
    pub fn install(self: &Arc<Self>) {
        let previous = write(&FALLBACK).replace(Arc::clone(self));
        info!(
            mode = ?self.config.mode,
            environment = ?self.config.environment,
            replaced = previous.is_some(),
            "registry installed"
        );
    }

    /// Clear the fallback slot if it holds this registry.
    pub fn uninstall(self: &Arc<Self>) {
        let mut fallback = write(&FALLBACK);
        if fallback.as_ref().is_some_and(|installed| Arc::ptr_eq(installed, self)) {
            *fallback = None;
            info!("registry uninstalled");
        }
    }

    /// The innermost scoped registry, or the installed one.
    pub fn current() -> Result<Arc<Self>, StoreError> {
        SCOPE_STACK
            .with(|stack| stack.borrow().last().cloned())
            .or_else(|| read(&FALLBACK).clone())
            .ok_or(StoreError::NotInstalled)
    }

    /// Run `f` with this registry as the current one on this thread.
    pub fn scope<F, R>(self: &Arc<Self>, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        SCOPE_STACK.with(|stack| stack.borrow_mut().push(Arc::clone(self)));
        let _guard = ScopeGuard;
        f()
    }

    pub fn config(&self) -> RegistryConfig {
        self.config
    }

    /// The reactive runtime store factories run in.
    pub fn runtime(&self) -> &Arc<ReactiveRuntime> {
        &self.runtime
    }

    pub fn persist_adapter(&self) -> Arc<dyn PersistAdapter> {
        Arc::clone(&self.persist)
    }

    pub fn store(&self, name: &str) -> Option<Arc<AssembledStore>> {
        read(&self.inner)
            .stores
            .get(name)
            .map(|entry| Arc::clone(&entry.store))
    }

    pub fn store_names(&self) -> Vec<String> {
        let mut names: Vec<_> = read(&self.inner).stores.keys().cloned().collect();
        names.sort();
        names
    }

    /// Load a serialized state tree.
    ///
    /// Keys of stores that are not assembled yet are kept until assembly,
    /// where they override the defined values. Keys of assembled stores are
    /// written into the live cells; untouched keys keep their values.
    pub fn hydrate(&self, tree: StateTree) -> Result<(), StoreError> {
        let mut live = Vec::new();
        {
            let mut inner = write(&self.inner);
            for (store, values) in tree {
                let slice = inner.state.entry(store.clone()).or_default();
                for (key, value) in values {
                    match slice.get(&key) {
                        Some(Slot::Live(cell)) => live.push((store.clone(), key, cell.clone(), value)),
                        _ => {
                            slice.insert(key, Slot::Hydrated(value));
                        }
                    }
                }
            }
        }

        debug!(live = live.len(), "hydrating registry");
        for (store, key, cell, value) in live {
            cell.load_json(value).inspect_err(|err| {
                debug!(%store, %key, error = %err, "hydrated value does not fit the live cell");
            })?;
        }
        Ok(())
    }

    pub fn hydrate_json(&self, json: &str) -> Result<(), StoreError> {
        self.hydrate(serde_json::from_str(json)?)
    }

    /// Serialize the whole state tree, resources included.
    pub fn snapshot(&self) -> Result<StateTree, StoreError> {
        let slices: Vec<(String, Vec<(String, Slot)>)> = read(&self.inner)
            .state
            .iter()
            .map(|(store, slice)| {
                let slots = slice.iter().map(|(k, slot)| (k.clone(), slot.clone())).collect();
                (store.clone(), slots)
            })
            .collect();

        let mut tree = StateTree::new();
        for (store, slots) in slices {
            let mut values = BTreeMap::new();
            for (key, slot) in slots {
                let value = match slot {
                    Slot::Hydrated(value) => value,
                    Slot::Live(cell) => cell.to_json()?,
                };
                values.insert(key, value);
            }
            tree.insert(store, values);
        }
        Ok(tree)
    }

    pub fn to_json(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string(&self.snapshot()?)?)
    }

    pub fn debug(&self) -> Result<RegistryDebug, StoreError> {
        Ok(RegistryDebug {
            config: self.config,
            stores: self.store_names(),
            state: self.snapshot()?,
        })
    }

    /// Wait for the latest fetch generation of every bound resource.
    ///
    /// Every generation is awaited even when one fails; the first failure is
    /// returned.
    pub async fn prefetch(&self) -> Result<(), FetchError> {
        let pending: Vec<_> = read(&self.inner)
            .stores
            .values()
            .flat_map(|entry| entry.store.resource_handles())
            .map(|resource| resource.suspense())
            .collect();

        let mut first_error = None;
        for generation in pending {
            if let Err(err) = generation.await {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// The store registered under `name` and the definition it came from.
    pub(crate) fn existing(&self, name: &str) -> Option<(u64, Arc<AssembledStore>)> {
        read(&self.inner)
            .stores
            .get(name)
            .map(|entry| (entry.definition, Arc::clone(&entry.store)))
    }

    /// Hydrated values waiting for `store` to be assembled.
    pub(crate) fn hydrated(&self, store: &str) -> BTreeMap<String, Value> {
        read(&self.inner)
            .state
            .get(store)
            .map(|slice| {
                slice
                    .iter()
                    .filter_map(|(key, slot)| match slot {
                        Slot::Hydrated(value) => Some((key.clone(), value.clone())),
                        Slot::Live(_) => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Held from the existence check until the store is registered, so a
    /// factory and its fetches run once per store. The owning thread may
    /// take it again, which lets a factory read other stores.
    pub(crate) fn assembling(&self) -> ReentrantGuard<'_> {
        self.assembly.acquire()
    }

    /// Register an assembled store and its live slice.
    ///
    /// Callers hold [`assembling`](Self::assembling); a store already
    /// registered under `name` wins and `store` is dropped.
    pub(crate) fn register(
        &self,
        name: &str,
        definition: u64,
        slice: BTreeMap<String, AnyState>,
        store: Arc<AssembledStore>,
    ) -> Arc<AssembledStore> {
        let mut inner = write(&self.inner);
        if let Some(entry) = inner.stores.get(name) {
            return Arc::clone(&entry.store);
        }

        let state = inner.state.entry(name.to_string()).or_default();
        for (key, cell) in slice {
            state.insert(key, Slot::Live(cell));
        }
        inner.stores.insert(
            name.to_string(),
            StoreEntry {
                definition,
                store: Arc::clone(&store),
            },
        );
        store
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("config", &self.config)
            .field("stores", &self.store_names())
            .finish()
    }
}
