use super::access::{MemberRef, ResourceReady};
use super::assemble::{prepare_store, AssembledStore};
use crate::cell::{DerivedCell, DerivedValue, StateCell, StateOptions, StateValue};
use crate::error::StoreError;
use crate::member::Members;
use crate::registry::{Mode, Registry};
use crate::resource::{AsyncResource, FetchContext, ResourceOptions, ResourceParam};
use crate::runtime::ReactiveRuntime;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

type Factory = Arc<dyn Fn(&Toolkit) -> Result<Members, StoreError> + Send + Sync>;

static NEXT_DEFINITION: AtomicU64 = AtomicU64::new(1);

enum Source {
    Factory(Factory),
    Members(Members),
}

struct Definition {
    id: u64,
    name: String,
    source: Source,
    warned: AtomicBool,
}

/// Builds members inside a store factory, bound to the registry that
/// assembles the store.
#[derive(Clone)]
pub struct Toolkit {
    registry: Arc<Registry>,
}

impl Toolkit {
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn state<T: StateValue>(&self, value: T) -> StateCell<T> {
        self.state_with(value, StateOptions::default())
    }

    /// A state cell whose [`Persist::Key`](crate::Persist::Key) resolves to
    /// the registry's adapter.
    pub fn state_with<T: StateValue>(&self, value: T, options: StateOptions) -> StateCell<T> {
        StateCell::create(
            self.registry.runtime(),
            value,
            options,
            Some(self.registry.persist_adapter()),
        )
    }

    pub fn derived<T, F>(&self, compute: F) -> DerivedCell<T>
    where
        T: DerivedValue,
        F: Fn() -> T + Send + Sync + 'static,
    {
        DerivedCell::new_in(self.registry.runtime(), compute)
    }

    pub fn resource<T, F, Fut>(&self, fetcher: F) -> AsyncResource<T>
    where
        T: StateValue,
        F: Fn(FetchContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        ReactiveRuntime::with_runtime(Arc::clone(self.registry.runtime()), || AsyncResource::new(fetcher))
    }

    pub fn resource_with<T, P, F, Fut>(
        &self,
        fetcher: F,
        options: ResourceOptions,
    ) -> Result<AsyncResource<T, P>, StoreError>
    where
        T: StateValue,
        P: ResourceParam,
        F: Fn(FetchContext<P>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        ReactiveRuntime::with_runtime(Arc::clone(self.registry.runtime()), || {
            AsyncResource::with_param_options(fetcher, options)
        })
    }
}

/// Define a store whose members are built by `factory`.
///
/// The factory runs once per registry, the first time the store is accessed.
///
/// ```
/// use larder::{define_store, Action, Members, Registry, RegistryConfig};
///
/// let counter = define_store("counter", |kit| {
///     let count = kit.state(0);
///     let double = kit.derived({
///         let count = count.clone();
///         move || count.get() * 2
///     });
///     Ok(Members::new()
///         .with("count", count.clone())
///         .with("double", double)
///         .with("increment", Action::new(move |()| count.update(|n| *n += 1))))
/// });
///
/// let registry = Registry::new(RegistryConfig::default());
/// let store = counter.get_in(&registry).unwrap();
/// store.action("increment").unwrap().call::<(), ()>(()).unwrap();
/// assert_eq!(store.derived::<i32>("double").unwrap().get(), 2);
/// ```
pub fn define_store<F>(name: impl Into<String>, factory: F) -> UseStore
where
    F: Fn(&Toolkit) -> Result<Members, StoreError> + Send + Sync + 'static,
{
    UseStore::new(name.into(), Source::Factory(Arc::new(factory)))
}

/// Define a store from members that already exist.
///
/// Every registry that assembles the store shares the same cells.
pub fn define_store_from(name: impl Into<String>, members: Members) -> UseStore {
    UseStore::new(name.into(), Source::Members(members))
}

/// Access point of a store definition.
///
/// Cloning is cheap; clones refer to the same definition.
#[derive(Clone)]
pub struct UseStore {
    definition: Arc<Definition>,
}

impl UseStore {
    fn new(name: String, source: Source) -> Self {
        Self {
            definition: Arc::new(Definition {
                id: NEXT_DEFINITION.fetch_add(1, Ordering::Relaxed),
                name,
                source,
                warned: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// The assembled store of the current registry.
    pub fn get(&self) -> Result<Arc<AssembledStore>, StoreError> {
        self.get_in(&Registry::current()?)
    }

    pub fn get_in(&self, registry: &Arc<Registry>) -> Result<Arc<AssembledStore>, StoreError> {
        if let Some(store) = self.existing_in(registry)? {
            return Ok(store);
        }

        let _assembling = registry.assembling();
        // Another thread may have assembled it while we waited
        if let Some(store) = self.existing_in(registry)? {
            return Ok(store);
        }

        let definition = &self.definition;
        let members = match &definition.source {
            Source::Members(members) => members.clone(),
            Source::Factory(factory) => {
                let toolkit = Toolkit {
                    registry: Arc::clone(registry),
                };
                ReactiveRuntime::with_runtime(Arc::clone(registry.runtime()), || {
                    registry.scope(|| factory(&toolkit))
                })?
            }
        };

        prepare_store(registry, &definition.name, definition.id, members)
    }

    fn existing_in(&self, registry: &Registry) -> Result<Option<Arc<AssembledStore>>, StoreError> {
        let definition = &self.definition;
        let Some((owner, store)) = registry.existing(&definition.name) else {
            return Ok(None);
        };
        if owner != definition.id {
            match registry.config().mode {
                Mode::Production => return Err(StoreError::DuplicateStore(definition.name.clone())),
                Mode::Development => {
                    if !definition.warned.swap(true, Ordering::Relaxed) {
                        warn!(store = %definition.name, "store name is defined more than once, reusing the first store");
                    }
                }
            }
        }
        Ok(Some(store))
    }

    /// One member of the current registry's store.
    pub fn member(&self, name: &str) -> Result<MemberRef, StoreError> {
        self.get()?.member(name)
    }

    pub fn member_in(&self, registry: &Arc<Registry>, name: &str) -> Result<MemberRef, StoreError> {
        self.get_in(registry)?.member(name)
    }

    /// A typed resource together with its current snapshot.
    pub fn resource<T: StateValue, P: ResourceParam>(&self, name: &str) -> Result<ResourceReady<T, P>, StoreError> {
        Ok(ResourceReady::new(self.get()?.resource(name)?))
    }

    pub fn resource_in<T: StateValue, P: ResourceParam>(
        &self,
        registry: &Arc<Registry>,
        name: &str,
    ) -> Result<ResourceReady<T, P>, StoreError> {
        Ok(ResourceReady::new(self.get_in(registry)?.resource(name)?))
    }

    /// The whole store as plain JSON, without fine-grained reactivity.
    pub fn flat_snapshot(&self) -> Result<Value, StoreError> {
        self.get()?.flat_snapshot()
    }

    /// A derived cell computed from the store. It recomputes when any state
    /// cell or resource of the store changes.
    pub fn select<T, F>(&self, select: F) -> Result<DerivedCell<T>, StoreError>
    where
        T: DerivedValue,
        F: Fn(&AssembledStore) -> T + Send + Sync + 'static,
    {
        self.select_in(&Registry::current()?, select)
    }

    pub fn select_in<T, F>(&self, registry: &Arc<Registry>, select: F) -> Result<DerivedCell<T>, StoreError>
    where
        T: DerivedValue,
        F: Fn(&AssembledStore) -> T + Send + Sync + 'static,
    {
        let store = self.get_in(registry)?;
        Ok(DerivedCell::new_in(registry.runtime(), move || {
            store.track();
            select(&store)
        }))
    }
}

impl fmt::Debug for UseStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UseStore")
            .field("name", &self.definition.name)
            .field("id", &self.definition.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::member::Action;
    use crate::registry::RegistryConfig;
    use std::sync::atomic::AtomicUsize;

    fn counter_store(name: &str, runs: Arc<AtomicUsize>) -> UseStore {
        define_store(name, move |kit| {
            runs.fetch_add(1, Ordering::SeqCst);
            let count = kit.state(0);
            Ok(Members::new()
                .with("count", count.clone())
                .with("increment", Action::new(move |by: i32| count.update(|n| *n += by))))
        })
    }

    #[test]
    fn factory_runs_once_per_registry() {
        let runs = Arc::new(AtomicUsize::new(0));
        let store = counter_store("counter", Arc::clone(&runs));
        let first = Registry::new(RegistryConfig::default());
        let second = Registry::new(RegistryConfig::default());

        let a = store.get_in(&first).unwrap();
        let b = store.get_in(&first).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let c = store.get_in(&second).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn duplicate_names_depend_on_mode() {
        let first_definition = counter_store("shared", Arc::new(AtomicUsize::new(0)));
        let duplicate = counter_store("shared", Arc::new(AtomicUsize::new(0)));

        let dev = Registry::new(RegistryConfig::new().mode(Mode::Development));
        let first = first_definition.get_in(&dev).unwrap();
        let reused = duplicate.get_in(&dev).unwrap();
        assert!(Arc::ptr_eq(&first, &reused));

        let prod = Registry::new(RegistryConfig::new().production());
        first_definition.get_in(&prod).unwrap();
        assert!(matches!(
            duplicate.get_in(&prod),
            Err(StoreError::DuplicateStore(name)) if name == "shared"
        ));
    }

    #[test]
    fn factory_errors_propagate() {
        let broken = define_store("broken", |_| Err(anyhow::anyhow!("no config").into()));
        let registry = Registry::new(RegistryConfig::default());
        let err = broken.get_in(&registry).unwrap_err();
        assert!(err.to_string().contains("no config"));
        assert!(registry.store("broken").is_none());
    }

    #[test]
    fn select_follows_the_store() {
        let store = counter_store("selected", Arc::new(AtomicUsize::new(0)));
        let registry = Registry::new(RegistryConfig::default());

        let label = store
            .select_in(&registry, |store| {
                let count = store.state::<i32>("count").map(|c| c.get()).unwrap_or_default();
                format!("{count} items")
            })
            .unwrap();
        assert_eq!(label.get(), "0 items");

        let assembled = store.get_in(&registry).unwrap();
        assembled.action("increment").unwrap().call::<i32, ()>(3).unwrap();
        assert_eq!(label.get(), "3 items");
    }

    #[test]
    fn scoped_access_resolves_the_scoped_registry() {
        let store = counter_store("scoped", Arc::new(AtomicUsize::new(0)));
        let registry = Registry::new(RegistryConfig::default());

        registry.scope(|| {
            let MemberRef::State(count) = store.member("count").unwrap() else {
                panic!("count is state");
            };
            count.set(5).unwrap();
            assert_eq!(store.flat_snapshot().unwrap()["count"], 5);
        });
        assert_eq!(registry.snapshot().unwrap()["scoped"]["count"], 5);
    }
}
