use crate::error::StoreError;
use crate::registry::{PersistAdapter, Registry};
use crate::runtime::ReactiveRuntime;
use crate::signal::{Signal, WatchGuard};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Values that can live in a state cell and in the registry's state tree.
pub trait StateValue: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> StateValue for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Where a state cell loads its initial value from and saves every change to.
#[derive(Clone)]
pub enum Persist {
    /// Use the registry-wide adapter under this key.
    Key(String),
    /// Use a dedicated adapter, overriding the registry-wide one.
    With {
        key: String,
        adapter: Arc<dyn PersistAdapter>,
    },
}

impl fmt::Debug for Persist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Persist::Key(key) => f.debug_tuple("Key").field(key).finish(),
            Persist::With { key, .. } => f.debug_struct("With").field("key", key).finish(),
        }
    }
}

/// Options accepted when creating a state cell.
#[derive(Clone, Debug, Default)]
pub struct StateOptions {
    /// In-place [`StateCell::update`] calls do not notify dependents; only
    /// [`StateCell::set`] and [`StateCell::trigger`] do.
    pub shallow: bool,
    pub persist: Option<Persist>,
}

impl StateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shallow(mut self) -> Self {
        self.shallow = true;
        self
    }

    pub fn persist(mut self, key: impl Into<String>) -> Self {
        self.persist = Some(Persist::Key(key.into()));
        self
    }

    pub fn persist_with(mut self, key: impl Into<String>, adapter: Arc<dyn PersistAdapter>) -> Self {
        self.persist = Some(Persist::With {
            key: key.into(),
            adapter,
        });
        self
    }
}

#[derive(Clone)]
struct PersistBinding {
    key: String,
    adapter: Arc<dyn PersistAdapter>,
}

impl PersistBinding {
    fn load<T: StateValue>(&self) -> Option<T> {
        match self.adapter.get(&self.key) {
            None | Some(Value::Null) => None,
            Some(stored) => match serde_json::from_value(stored) {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!(key = %self.key, error = %err, "ignoring persisted value that does not fit the state");
                    None
                }
            },
        }
    }

    fn save<T: StateValue>(&self, value: &T) {
        let saved = serde_json::to_value(value)
            .map_err(anyhow::Error::from)
            .and_then(|json| self.adapter.set(&self.key, json));
        if let Err(err) = saved {
            warn!(key = %self.key, error = %err, "failed to persist state");
        }
    }
}

struct StateMeta<T> {
    initial: T,
    shallow: bool,
    persist: Option<PersistBinding>,
    _saver: Option<WatchGuard>,
}

/// A reactive piece of store state.
///
/// Cloning a cell yields another handle to the same value.
///
/// ```
/// use larder::StateCell;
///
/// let count = StateCell::new(0);
/// count.update(|n| *n += 1);
/// assert_eq!(count.get(), 1);
/// ```
pub struct StateCell<T> {
    signal: Signal<T>,
    meta: Arc<StateMeta<T>>,
}

impl<T> Clone for StateCell<T> {
    fn clone(&self) -> Self {
        Self {
            signal: self.signal.clone(),
            meta: Arc::clone(&self.meta),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for StateCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateCell")
            .field("signal", &self.signal)
            .field("shallow", &self.meta.shallow)
            .field("persist", &self.meta.persist.as_ref().map(|p| &p.key))
            .finish()
    }
}

impl<T: StateValue> StateCell<T> {
    /// Create a plain state cell in the current runtime.
    pub fn new(value: T) -> Self {
        Self::with_options(value, StateOptions::default())
    }

    /// Create a state cell with options in the current runtime.
    ///
    /// [`Persist::Key`] resolves the adapter of the current registry; without
    /// an installed registry the cell is not persisted.
    pub fn with_options(value: T, options: StateOptions) -> Self {
        let fallback = Registry::current().ok().map(|registry| registry.persist_adapter());
        Self::create(&ReactiveRuntime::current(), value, options, fallback)
    }

    pub(crate) fn create(
        runtime: &Arc<ReactiveRuntime>,
        value: T,
        options: StateOptions,
        fallback: Option<Arc<dyn PersistAdapter>>,
    ) -> Self {
        let persist = match options.persist {
            None => None,
            Some(Persist::Key(key)) => match fallback {
                Some(adapter) => Some(PersistBinding { key, adapter }),
                None => {
                    warn!(%key, "no persistence adapter available, state will not be persisted");
                    None
                }
            },
            Some(Persist::With { key, adapter }) => Some(PersistBinding { key, adapter }),
        };

        let initial = value.clone();
        let value = persist
            .as_ref()
            .and_then(|binding| binding.load())
            .unwrap_or(value);
        let signal = Signal::new_in(runtime, value);

        let saver = persist.clone().map(|binding| {
            signal.subscribe(move |value: T| binding.save(&value))
        });

        Self {
            signal,
            meta: Arc::new(StateMeta {
                initial,
                shallow: options.shallow,
                persist,
                _saver: saver,
            }),
        }
    }

    pub fn get(&self) -> T {
        self.signal.get()
    }

    pub fn get_untracked(&self) -> T {
        self.signal.get_untracked()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.signal.with(f)
    }

    /// Replace the value and notify dependents.
    pub fn set(&self, value: T) {
        self.signal.set(value);
    }

    /// Mutate the value in place. Shallow cells stay silent.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        if self.meta.shallow {
            self.signal.update_silent(f);
        } else {
            self.signal.update(f);
        }
    }

    /// Notify dependents without changing the value.
    pub fn trigger(&self) {
        self.signal.notify();
    }

    /// Restore the value the cell was created with.
    pub fn reset(&self) {
        self.signal.set(self.meta.initial.clone());
    }

    pub fn is_shallow(&self) -> bool {
        self.meta.shallow
    }

    pub fn persist_key(&self) -> Option<&str> {
        self.meta.persist.as_ref().map(|binding| binding.key.as_str())
    }

    pub fn signal(&self) -> &Signal<T> {
        &self.signal
    }
}

/// Type-erased view of a state cell used by the store and the state tree.
pub(crate) trait DynState: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn type_name(&self) -> &'static str;
    fn to_json(&self) -> Result<Value, StoreError>;
    fn load_json(&self, value: Value) -> Result<(), StoreError>;
    fn reset(&self);
    fn track(&self);
}

impl<T: StateValue> DynState for StateCell<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn to_json(&self) -> Result<Value, StoreError> {
        self.signal.with(|value| serde_json::to_value(value)).map_err(StoreError::from)
    }

    fn load_json(&self, value: Value) -> Result<(), StoreError> {
        let value: T = serde_json::from_value(value)?;
        self.set(value);
        Ok(())
    }

    fn reset(&self) {
        StateCell::reset(self);
    }

    fn track(&self) {
        self.signal.track();
    }
}
