use crate::cell::{StateCell, StateValue};
use crate::error::StoreError;
use crate::member::{Action, AnyDerived, AnyResource, AnyState, Kind, OtherValue};
use crate::resource::{AsyncResource, FetchError, Pending, ResourceParam, ResourceSnapshot, ResourceStatus};
use serde_json::Value;
use std::any::type_name;

/// One member of an assembled store, as returned by name lookups.
#[derive(Clone)]
pub enum MemberRef {
    State(StateAccessor),
    Derived(AnyDerived),
    Resource(ResourceRef),
    Action(Action),
    Other(OtherValue),
}

impl MemberRef {
    pub fn kind(&self) -> Kind {
        match self {
            MemberRef::State(_) => Kind::State,
            MemberRef::Derived(_) => Kind::Derived,
            MemberRef::Resource(_) => Kind::Resource,
            MemberRef::Action(_) => Kind::Action,
            MemberRef::Other(_) => Kind::Other,
        }
    }
}

impl std::fmt::Debug for MemberRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemberRef::State(state) => write!(f, "State({}.{})", state.store, state.key),
            MemberRef::Derived(derived) => write!(f, "Derived({})", derived.type_name()),
            MemberRef::Resource(resource) => write!(f, "Resource({}.{})", resource.store, resource.key),
            MemberRef::Action(action) => action.fmt(f),
            MemberRef::Other(other) => other.fmt(f),
        }
    }
}

/// Reads and writes one key of a store's state slice.
#[derive(Clone)]
pub struct StateAccessor {
    store: String,
    key: String,
    cell: AnyState,
}

impl StateAccessor {
    pub(crate) fn new(store: &str, key: &str, cell: AnyState) -> Self {
        Self {
            store: store.to_string(),
            key: key.to_string(),
            cell,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn get_json(&self) -> Result<Value, StoreError> {
        self.cell.to_json()
    }

    pub fn set_json(&self, value: Value) -> Result<(), StoreError> {
        self.cell.load_json(value)
    }

    /// The typed cell behind this key.
    pub fn cell<T: StateValue>(&self) -> Result<StateCell<T>, StoreError> {
        self.cell.downcast().ok_or_else(|| StoreError::TypeMismatch {
            store: self.store.clone(),
            member: self.key.clone(),
            expected: type_name::<T>(),
        })
    }

    pub fn get<T: StateValue>(&self) -> Result<T, StoreError> {
        Ok(self.cell::<T>()?.get())
    }

    pub fn set<T: StateValue>(&self, value: T) -> Result<(), StoreError> {
        self.cell::<T>()?.set(value);
        Ok(())
    }
}

/// A bound resource whose data type is not known at the lookup site.
#[derive(Clone)]
pub struct ResourceRef {
    store: String,
    key: String,
    resource: AnyResource,
}

impl ResourceRef {
    pub(crate) fn new(store: &str, key: &str, resource: AnyResource) -> Self {
        Self {
            store: store.to_string(),
            key: key.to_string(),
            resource,
        }
    }

    pub fn status(&self) -> ResourceStatus {
        self.resource.status()
    }

    pub fn snapshot_json(&self) -> Result<Value, StoreError> {
        self.resource.snapshot_json()
    }

    pub fn suspense(&self) -> Pending {
        self.resource.suspense()
    }

    pub fn typed<T: StateValue, P: ResourceParam>(&self) -> Result<AsyncResource<T, P>, StoreError> {
        self.resource.downcast().ok_or_else(|| StoreError::TypeMismatch {
            store: self.store.clone(),
            member: self.key.clone(),
            expected: type_name::<AsyncResource<T, P>>(),
        })
    }
}

/// A resource handed out by [`UseStore::resource`](crate::UseStore::resource):
/// usable right away through `resource` and `snapshot`, or awaited with
/// [`ready`](Self::ready).
#[derive(Clone)]
pub struct ResourceReady<T, P = ()> {
    pub resource: AsyncResource<T, P>,
    /// State at the time of the lookup.
    pub snapshot: ResourceSnapshot<T>,
}

impl<T: StateValue, P: ResourceParam> ResourceReady<T, P> {
    pub(crate) fn new(resource: AsyncResource<T, P>) -> Self {
        let snapshot = resource.snapshot();
        Self { resource, snapshot }
    }

    /// Wait for the in-flight generation, then read the settled state.
    ///
    /// Fails only when that generation's fetcher failed.
    pub async fn ready(&self) -> Result<ResourceSnapshot<T>, FetchError> {
        self.resource.suspense().await?;
        Ok(self.resource.snapshot())
    }
}
