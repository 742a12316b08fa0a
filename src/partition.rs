//! Splits a store definition's members by kind.

use crate::error::StoreError;
use crate::member::{Action, AnyDerived, AnyResource, AnyState, Member, Members, OtherValue};
use std::collections::{BTreeMap, HashSet};

/// A store definition's members, grouped by kind and keyed by name.
#[derive(Default)]
pub struct Partitions {
    pub states: BTreeMap<String, AnyState>,
    pub getters: BTreeMap<String, AnyDerived>,
    pub resources: BTreeMap<String, AnyResource>,
    pub actions: BTreeMap<String, Action>,
    pub other: BTreeMap<String, OtherValue>,
}

impl Partitions {
    pub fn len(&self) -> usize {
        self.states.len() + self.getters.len() + self.resources.len() + self.actions.len() + self.other.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Names starting with `_` are reserved for the store's internal views.
pub fn validate_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty() || name.starts_with('_') {
        return Err(StoreError::InvalidMemberName(name.to_string()));
    }
    Ok(())
}

/// Classify every member by its kind tag.
pub fn partition(members: Members) -> Result<Partitions, StoreError> {
    let mut partitions = Partitions::default();
    let mut seen = HashSet::new();

    for (name, member) in members.into_entries() {
        validate_name(&name)?;
        if !seen.insert(name.clone()) {
            return Err(StoreError::DuplicateMember(name));
        }

        match member {
            Member::State(state) => {
                partitions.states.insert(name, state);
            }
            Member::Derived(derived) => {
                partitions.getters.insert(name, derived);
            }
            Member::Resource(resource) => {
                partitions.resources.insert(name, resource);
            }
            Member::Action(action) => {
                partitions.actions.insert(name, action);
            }
            Member::Other(value) => {
                partitions.other.insert(name, value);
            }
        }
    }

    Ok(partitions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{DerivedCell, StateCell};
    use crate::resource::{AsyncResource, ResourceOptions};
    use crate::runtime::ReactiveRuntime;

    #[test]
    fn members_land_in_their_partition() {
        let runtime = ReactiveRuntime::new();
        ReactiveRuntime::with_runtime(runtime, || {
            let count = StateCell::new(1);
            let members = Members::new()
                .with("count", count.clone())
                .with("double", DerivedCell::new(move || count.get() * 2))
                .with(
                    "items",
                    AsyncResource::with_options(|_| async { Ok(vec![1]) }, ResourceOptions::new().manual())
                        .unwrap(),
                )
                .with("reset", Action::new(|()| ()))
                .with("label", Member::other("pantry"));

            let partitions = partition(members).unwrap();
            assert_eq!(partitions.len(), 5);
            assert!(partitions.states.contains_key("count"));
            assert!(partitions.getters.contains_key("double"));
            assert!(partitions.resources.contains_key("items"));
            assert!(partitions.actions.contains_key("reset"));
            assert_eq!(partitions.other["label"].get::<&str>(), Some(&"pantry"));
        });
    }

    #[test]
    fn repeated_names_are_rejected() {
        let members = Members::new()
            .with("a", Member::other(1))
            .with("a", Member::other(2));
        assert!(matches!(partition(members), Err(StoreError::DuplicateMember(name)) if name == "a"));
    }

    #[test]
    fn reserved_names_are_rejected() {
        for name in ["", "_state"] {
            let members = Members::new().with(name, Member::other(1));
            assert!(matches!(partition(members), Err(StoreError::InvalidMemberName(_))));
        }
    }
}
