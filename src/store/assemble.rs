use crate::cell::{DerivedCell, DerivedValue, DynState, StateCell, StateValue};
use crate::error::StoreError;
use crate::member::{Action, AnyDerived, AnyResource, AnyState, Kind, Members, OtherValue};
use crate::partition::{partition, Partitions};
use crate::registry::Registry;
use crate::resource::{AsyncResource, ResourceParam};
use crate::store::access::{MemberRef, ResourceRef, StateAccessor};
use serde_json::{Map, Value};
use std::any::{type_name, Any};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// A resource's `data`, `error` and `status` seen as one state-tree entry.
struct ResourceSlot(AnyResource);

impl DynState for ResourceSlot {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        self.0.type_name()
    }

    fn to_json(&self) -> Result<Value, StoreError> {
        self.0.snapshot_json()
    }

    fn load_json(&self, value: Value) -> Result<(), StoreError> {
        self.0 .0.adopt_json(value)
    }

    fn reset(&self) {}

    fn track(&self) {
        self.0 .0.track();
    }
}

/// Assemble `members` into the store `name` of `registry`.
///
/// Returns the registered store unchanged when `name` is already assembled.
pub(crate) fn prepare_store(
    registry: &Registry,
    name: &str,
    definition: u64,
    members: Members,
) -> Result<Arc<AssembledStore>, StoreError> {
    if let Some((_, store)) = registry.existing(name) {
        return Ok(store);
    }

    let partitions = partition(members)?;
    let mut hydrated = registry.hydrated(name);

    for (key, cell) in &partitions.states {
        if let Some(value) = hydrated.remove(key) {
            if let Err(err) = cell.load_json(value) {
                warn!(store = name, %key, error = %err, "ignoring hydrated value that does not fit the state");
            }
        }
    }

    let environment = registry.config().environment;
    let mut slice = partitions.states.clone();
    for (key, resource) in &partitions.resources {
        // The outcome is observed through `suspense`
        let _ = resource.0.bind(name, key, hydrated.remove(key), environment);
        slice.insert(key.clone(), AnyState(Arc::new(ResourceSlot(resource.clone()))));
    }

    debug!(
        store = name,
        states = partitions.states.len(),
        getters = partitions.getters.len(),
        resources = partitions.resources.len(),
        actions = partitions.actions.len(),
        "assembled store"
    );

    let store = Arc::new(AssembledStore::new(name, partitions));
    Ok(registry.register(name, definition, slice, store))
}

/// The finished store: every member of one definition, bound to a registry.
///
/// Obtained from [`UseStore::get`](crate::UseStore::get); repeated calls
/// return the same `Arc`.
pub struct AssembledStore {
    name: String,
    states: BTreeMap<String, AnyState>,
    getters: BTreeMap<String, AnyDerived>,
    resources: BTreeMap<String, AnyResource>,
    actions: BTreeMap<String, Action>,
    other: BTreeMap<String, OtherValue>,
}

impl AssembledStore {
    fn new(name: &str, partitions: Partitions) -> Self {
        let Partitions {
            states,
            getters,
            resources,
            actions,
            other,
        } = partitions;
        Self {
            name: name.to_string(),
            states,
            getters,
            resources,
            actions,
            other,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self, name: &str) -> Option<Kind> {
        if self.states.contains_key(name) {
            Some(Kind::State)
        } else if self.getters.contains_key(name) {
            Some(Kind::Derived)
        } else if self.resources.contains_key(name) {
            Some(Kind::Resource)
        } else if self.actions.contains_key(name) {
            Some(Kind::Action)
        } else if self.other.contains_key(name) {
            Some(Kind::Other)
        } else {
            None
        }
    }

    /// Every member name, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self
            .states
            .keys()
            .chain(self.getters.keys())
            .chain(self.resources.keys())
            .chain(self.actions.keys())
            .chain(self.other.keys())
            .map(String::as_str)
            .collect();
        keys.sort_unstable();
        keys
    }

    pub fn state<T: StateValue>(&self, name: &str) -> Result<StateCell<T>, StoreError> {
        let cell = self.states.get(name).ok_or_else(|| self.absent(name, Kind::State))?;
        cell.downcast().ok_or_else(|| self.mismatch::<T>(name))
    }

    pub fn derived<T: DerivedValue>(&self, name: &str) -> Result<DerivedCell<T>, StoreError> {
        let cell = self.getters.get(name).ok_or_else(|| self.absent(name, Kind::Derived))?;
        cell.downcast().ok_or_else(|| self.mismatch::<T>(name))
    }

    pub fn resource<T: StateValue, P: ResourceParam>(&self, name: &str) -> Result<AsyncResource<T, P>, StoreError> {
        let resource = self.resources.get(name).ok_or_else(|| self.absent(name, Kind::Resource))?;
        resource
            .downcast()
            .ok_or_else(|| self.mismatch::<AsyncResource<T, P>>(name))
    }

    pub fn action(&self, name: &str) -> Result<Action, StoreError> {
        self.actions.get(name).cloned().ok_or_else(|| self.absent(name, Kind::Action))
    }

    pub fn other<T: 'static>(&self, name: &str) -> Result<&T, StoreError> {
        let value = self.other.get(name).ok_or_else(|| self.absent(name, Kind::Other))?;
        value.get().ok_or_else(|| self.mismatch::<T>(name))
    }

    /// Any member by name, wrapped according to its kind.
    pub fn member(&self, name: &str) -> Result<MemberRef, StoreError> {
        if let Some(action) = self.actions.get(name) {
            return Ok(MemberRef::Action(action.clone()));
        }
        if let Some(derived) = self.getters.get(name) {
            return Ok(MemberRef::Derived(derived.clone()));
        }
        if let Some(resource) = self.resources.get(name) {
            return Ok(MemberRef::Resource(ResourceRef::new(&self.name, name, resource.clone())));
        }
        if let Some(value) = self.other.get(name) {
            return Ok(MemberRef::Other(value.clone()));
        }
        if let Some(cell) = self.states.get(name) {
            return Ok(MemberRef::State(StateAccessor::new(&self.name, name, cell.clone())));
        }
        Err(self.missing(name))
    }

    /// The live state slice as JSON, resources included.
    pub fn state_view(&self) -> Result<Map<String, Value>, StoreError> {
        let mut view = Map::new();
        for (key, cell) in &self.states {
            view.insert(key.clone(), cell.to_json()?);
        }
        for (key, resource) in &self.resources {
            view.insert(key.clone(), resource.snapshot_json()?);
        }
        Ok(view)
    }

    pub fn state_names(&self) -> Vec<&str> {
        self.states.keys().map(String::as_str).collect()
    }

    pub fn action_names(&self) -> Vec<&str> {
        self.actions.keys().map(String::as_str).collect()
    }

    pub fn getter_names(&self) -> Vec<&str> {
        self.getters.keys().map(String::as_str).collect()
    }

    pub fn resource_names(&self) -> Vec<&str> {
        self.resources.keys().map(String::as_str).collect()
    }

    pub fn other_names(&self) -> Vec<&str> {
        self.other.keys().map(String::as_str).collect()
    }

    /// Shallow-merge `partial` into the state slice.
    ///
    /// Keys not in `partial` keep their values. Every key is checked before
    /// anything is written, so an unknown key leaves the store untouched.
    pub fn merge_state(&self, partial: Map<String, Value>) -> Result<(), StoreError> {
        if let Some(key) = partial
            .keys()
            .find(|key| !self.states.contains_key(*key) && !self.resources.contains_key(*key))
        {
            return Err(StoreError::UnknownStateKey {
                store: self.name.clone(),
                key: key.clone(),
            });
        }

        for (key, value) in partial {
            match self.states.get(&key) {
                Some(cell) => cell.load_json(value)?,
                None => {
                    if let Some(resource) = self.resources.get(&key) {
                        resource.0.adopt_json(value)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Restore every state cell to the value it was created with.
    pub fn reset(&self) {
        debug!(store = %self.name, "resetting store");
        for cell in self.states.values() {
            cell.0.reset();
        }
    }

    /// Every member except actions as plain JSON.
    pub fn flat_snapshot(&self) -> Result<Value, StoreError> {
        let mut flat = self.state_view()?;
        for (key, derived) in &self.getters {
            flat.insert(key.clone(), derived.to_json()?);
        }
        for (key, value) in &self.other {
            flat.insert(key.clone(), value.to_json()?);
        }
        Ok(Value::Object(flat))
    }

    pub(crate) fn resource_handles(&self) -> impl Iterator<Item = &AnyResource> {
        self.resources.values()
    }

    /// Register reads of every state cell and resource with the current
    /// observer.
    pub(crate) fn track(&self) {
        for cell in self.states.values() {
            cell.0.track();
        }
        for resource in self.resources.values() {
            resource.0.track();
        }
    }

    fn missing(&self, name: &str) -> StoreError {
        StoreError::MissingMember {
            store: self.name.clone(),
            member: name.to_string(),
        }
    }

    fn absent(&self, name: &str, expected: Kind) -> StoreError {
        match self.kind(name) {
            Some(found) => StoreError::KindMismatch {
                store: self.name.clone(),
                member: name.to_string(),
                expected,
                found,
            },
            None => self.missing(name),
        }
    }

    fn mismatch<T>(&self, name: &str) -> StoreError {
        StoreError::TypeMismatch {
            store: self.name.clone(),
            member: name.to_string(),
            expected: type_name::<T>(),
        }
    }
}

impl fmt::Debug for AssembledStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssembledStore")
            .field("name", &self.name)
            .field("keys", &self.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::member::Member;
    use crate::registry::RegistryConfig;
    use crate::resource::{ResourceOptions, ResourceStatus};
    use crate::runtime::ReactiveRuntime;
    use serde_json::json;

    fn members() -> Members {
        let count = StateCell::new(1);
        Members::new()
            .with("count", count.clone())
            .with("double", DerivedCell::new(move || count.get() * 2))
            .with("label", Member::other("pantry"))
            .with(
                "items",
                AsyncResource::with_options(|_| async { Ok(vec![1, 2]) }, ResourceOptions::new().manual()).unwrap(),
            )
    }

    fn assemble(registry: &Arc<Registry>) -> Arc<AssembledStore> {
        ReactiveRuntime::with_runtime(Arc::clone(registry.runtime()), || {
            prepare_store(registry, "main", 1, members()).unwrap()
        })
    }

    #[test]
    fn second_assembly_returns_the_first_store() {
        let registry = Registry::new(RegistryConfig::default());
        let first = assemble(&registry);
        let second = assemble(&registry);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn hydrated_state_overrides_defined_values() {
        let registry = Registry::new(RegistryConfig::default());
        registry.hydrate_json(r#"{"main":{"count":5}}"#).unwrap();

        let store = assemble(&registry);
        assert_eq!(store.state::<i32>("count").unwrap().get(), 5);
        assert_eq!(store.derived::<i32>("double").unwrap().get(), 10);
    }

    #[test]
    fn resources_join_the_state_tree() {
        let registry = Registry::new(RegistryConfig::default());
        let store = assemble(&registry);

        let tree = registry.snapshot().unwrap();
        assert_eq!(tree["main"]["count"], json!(1));
        assert_eq!(
            tree["main"]["items"],
            json!({ "data": null, "error": null, "status": "idle" })
        );
        assert!(!tree["main"].contains_key("double"));
        assert_eq!(store.resource::<Vec<i32>, ()>("items").unwrap().status(), ResourceStatus::Idle);
    }

    #[test]
    fn merge_state_keeps_untouched_keys() {
        let registry = Registry::new(RegistryConfig::default());
        let store = assemble(&registry);

        let partial = json!({ "count": 4 }).as_object().cloned().unwrap();
        store.merge_state(partial).unwrap();
        assert_eq!(store.state::<i32>("count").unwrap().get(), 4);
        assert_eq!(store.state_view().unwrap()["items"]["status"], json!("idle"));

        let unknown = json!({ "count": 9, "nope": 1 }).as_object().cloned().unwrap();
        assert!(matches!(
            store.merge_state(unknown),
            Err(StoreError::UnknownStateKey { key, .. }) if key == "nope"
        ));
        assert_eq!(store.state::<i32>("count").unwrap().get(), 4);
    }

    #[test]
    fn typed_access_reports_kind_and_type_errors() {
        let registry = Registry::new(RegistryConfig::default());
        let store = assemble(&registry);

        assert!(matches!(
            store.state::<i32>("double"),
            Err(StoreError::KindMismatch { found: Kind::Derived, .. })
        ));
        assert!(matches!(store.state::<String>("count"), Err(StoreError::TypeMismatch { .. })));
        assert!(matches!(store.action("missing"), Err(StoreError::MissingMember { .. })));
        match store.resource::<Vec<i32>, String>("items") {
            Err(StoreError::TypeMismatch { expected, .. }) => {
                assert!(expected.contains("AsyncResource"));
                assert!(expected.contains("String"));
            }
            other => panic!("expected a type mismatch, got {other:?}"),
        }
        assert_eq!(store.other::<&str>("label").unwrap(), &"pantry");
    }

    #[test]
    fn reset_and_flat_snapshot() {
        let registry = Registry::new(RegistryConfig::default());
        let store = assemble(&registry);

        store.state::<i32>("count").unwrap().set(3);
        assert_eq!(store.flat_snapshot().unwrap()["double"], json!(6));

        store.reset();
        let flat = store.flat_snapshot().unwrap();
        assert_eq!(flat["count"], json!(1));
        assert_eq!(flat["label"], json!("pantry"));
        assert_eq!(store.keys(), vec!["count", "double", "items", "label"]);
    }
}
