//! Store members and their kind tags.
//!
//! A store definition is a list of named [`Member`]s. The enum variant is the
//! tag: it is attached when a cell, resource, action or plain value is turned
//! into a member and matched on by the partitioner, so classification never
//! depends on inspecting the value itself.

use crate::cell::{DerivedCell, DerivedValue, DynDerived, DynState, StateCell, StateValue};
use crate::error::StoreError;
use crate::resource::{AsyncResource, DynResource, Pending, ResourceParam, ResourceStatus};
use serde::Serialize;
use serde_json::Value;
use std::any::{type_name, Any};
use std::fmt;
use std::sync::Arc;

/// Kind tag of a store member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    State,
    Derived,
    Resource,
    Action,
    Other,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Kind::State => "a state cell",
            Kind::Derived => "a derived cell",
            Kind::Resource => "an async resource",
            Kind::Action => "an action",
            Kind::Other => "a plain value",
        })
    }
}

/// Type-erased state cell.
#[derive(Clone)]
pub struct AnyState(pub(crate) Arc<dyn DynState>);

impl AnyState {
    pub fn type_name(&self) -> &'static str {
        self.0.type_name()
    }

    pub fn to_json(&self) -> Result<Value, StoreError> {
        self.0.to_json()
    }

    pub fn load_json(&self, value: Value) -> Result<(), StoreError> {
        self.0.load_json(value)
    }

    pub fn downcast<T: StateValue>(&self) -> Option<StateCell<T>> {
        self.0.as_any().downcast_ref::<StateCell<T>>().cloned()
    }
}

/// Type-erased derived cell.
#[derive(Clone)]
pub struct AnyDerived(pub(crate) Arc<dyn DynDerived>);

impl AnyDerived {
    pub fn type_name(&self) -> &'static str {
        self.0.type_name()
    }

    pub fn to_json(&self) -> Result<Value, StoreError> {
        self.0.to_json()
    }

    pub fn downcast<T: DerivedValue>(&self) -> Option<DerivedCell<T>> {
        self.0.as_any().downcast_ref::<DerivedCell<T>>().cloned()
    }
}

/// Type-erased async resource.
#[derive(Clone)]
pub struct AnyResource(pub(crate) Arc<dyn DynResource>);

impl AnyResource {
    pub fn type_name(&self) -> &'static str {
        self.0.type_name()
    }

    pub fn status(&self) -> ResourceStatus {
        self.0.status()
    }

    pub fn snapshot_json(&self) -> Result<Value, StoreError> {
        self.0.snapshot_json()
    }

    pub fn suspense(&self) -> Pending {
        self.0.suspense()
    }

    pub fn downcast<T: StateValue, P: ResourceParam>(&self) -> Option<AsyncResource<T, P>> {
        self.0.as_any().downcast_ref::<AsyncResource<T, P>>().cloned()
    }
}

type ActionFn<A, R> = Arc<dyn Fn(A) -> anyhow::Result<R> + Send + Sync>;

/// A store action: any function of one argument.
///
/// The argument and output types are checked when the action is called.
///
/// ```
/// use larder::Action;
///
/// let add_one = Action::new(|n: i32| n + 1);
/// assert_eq!(add_one.call::<i32, i32>(1).unwrap(), 2);
/// assert!(add_one.call::<u8, i32>(1).is_err());
/// ```
#[derive(Clone)]
pub struct Action {
    inner: Arc<dyn Any + Send + Sync>,
    args: &'static str,
    output: &'static str,
}

impl Action {
    pub fn new<A, R, F>(f: F) -> Self
    where
        A: 'static,
        R: 'static,
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        Self::try_new(move |args| Ok(f(args)))
    }

    /// An action whose failures are reported as [`StoreError::ActionFailed`].
    pub fn try_new<A, R, F>(f: F) -> Self
    where
        A: 'static,
        R: 'static,
        F: Fn(A) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        let f: ActionFn<A, R> = Arc::new(f);
        Self {
            inner: Arc::new(f),
            args: type_name::<A>(),
            output: type_name::<R>(),
        }
    }

    pub fn call<A: 'static, R: 'static>(&self, args: A) -> Result<R, StoreError> {
        let f = self
            .inner
            .downcast_ref::<ActionFn<A, R>>()
            .ok_or(StoreError::ActionSignature {
                args: self.args,
                output: self.output,
            })?;
        f(args).map_err(StoreError::ActionFailed)
    }

    pub fn signature(&self) -> (&'static str, &'static str) {
        (self.args, self.output)
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Action(fn({}) -> {})", self.args, self.output)
    }
}

trait DynOther: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn type_name(&self) -> &'static str;
    fn to_json(&self) -> Result<Value, StoreError>;
}

struct Plain<T>(T);

impl<T: Serialize + Send + Sync + 'static> DynOther for Plain<T> {
    fn as_any(&self) -> &dyn Any {
        &self.0
    }

    fn type_name(&self) -> &'static str {
        type_name::<T>()
    }

    fn to_json(&self) -> Result<Value, StoreError> {
        Ok(serde_json::to_value(&self.0)?)
    }
}

/// A plain, non-reactive value kept on the store as is.
#[derive(Clone)]
pub struct OtherValue(Arc<dyn DynOther>);

impl OtherValue {
    pub fn new<T: Serialize + Send + Sync + 'static>(value: T) -> Self {
        Self(Arc::new(Plain(value)))
    }

    pub fn get<T: 'static>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }

    pub fn type_name(&self) -> &'static str {
        self.0.type_name()
    }

    pub fn to_json(&self) -> Result<Value, StoreError> {
        self.0.to_json()
    }
}

impl fmt::Debug for OtherValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OtherValue({})", self.type_name())
    }
}

/// One named entry of a store definition.
#[derive(Clone)]
pub enum Member {
    State(AnyState),
    Derived(AnyDerived),
    Resource(AnyResource),
    Action(Action),
    Other(OtherValue),
}

impl Member {
    /// Wrap a plain value.
    pub fn other<T: Serialize + Send + Sync + 'static>(value: T) -> Self {
        Member::Other(OtherValue::new(value))
    }

    pub fn kind(&self) -> Kind {
        match self {
            Member::State(_) => Kind::State,
            Member::Derived(_) => Kind::Derived,
            Member::Resource(_) => Kind::Resource,
            Member::Action(_) => Kind::Action,
            Member::Other(_) => Kind::Other,
        }
    }

    pub fn is_state(&self) -> bool {
        matches!(self, Member::State(_))
    }

    pub fn is_derived(&self) -> bool {
        matches!(self, Member::Derived(_))
    }

    pub fn is_resource(&self) -> bool {
        matches!(self, Member::Resource(_))
    }
}

impl fmt::Debug for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Member::State(state) => write!(f, "State({})", state.type_name()),
            Member::Derived(derived) => write!(f, "Derived({})", derived.type_name()),
            Member::Resource(resource) => write!(f, "Resource({})", resource.0.type_name()),
            Member::Action(action) => action.fmt(f),
            Member::Other(other) => other.fmt(f),
        }
    }
}

impl<T: StateValue> From<StateCell<T>> for Member {
    fn from(cell: StateCell<T>) -> Self {
        Member::State(AnyState(Arc::new(cell)))
    }
}

impl<T: DerivedValue> From<DerivedCell<T>> for Member {
    fn from(cell: DerivedCell<T>) -> Self {
        Member::Derived(AnyDerived(Arc::new(cell)))
    }
}

impl From<Action> for Member {
    fn from(action: Action) -> Self {
        Member::Action(action)
    }
}

impl From<OtherValue> for Member {
    fn from(value: OtherValue) -> Self {
        Member::Other(value)
    }
}

/// The raw members a store definition produces, in definition order.
///
/// ```
/// use larder::{Action, Members, StateCell};
///
/// let count = StateCell::new(0);
/// let members = Members::new()
///     .with("count", count.clone())
///     .with("increment", Action::new(move |()| count.update(|n| *n += 1)));
/// assert_eq!(members.len(), 2);
/// ```
#[derive(Clone, Debug, Default)]
pub struct Members {
    entries: Vec<(String, Member)>,
}

impl Members {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, member: impl Into<Member>) -> Self {
        self.insert(name, member);
        self
    }

    /// Add a member. Repeated names are rejected when the store is assembled.
    pub fn insert(&mut self, name: impl Into<String>, member: impl Into<Member>) {
        self.entries.push((name.into(), member.into()));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub(crate) fn into_entries(self) -> Vec<(String, Member)> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ReactiveRuntime;

    #[test]
    fn conversion_attaches_kind() {
        let runtime = ReactiveRuntime::new();
        let count = StateCell::create(&runtime, 1, Default::default(), None);
        let double = DerivedCell::new_in(&runtime, {
            let count = count.clone();
            move || count.get() * 2
        });

        assert_eq!(Member::from(count).kind(), Kind::State);
        assert_eq!(Member::from(double).kind(), Kind::Derived);
        assert_eq!(Member::from(Action::new(|()| ())).kind(), Kind::Action);
        assert_eq!(Member::other("x").kind(), Kind::Other);
    }

    #[test]
    fn erased_state_downcasts_to_its_own_type_only() {
        let runtime = ReactiveRuntime::new();
        let cell = StateCell::create(&runtime, 3u8, Default::default(), None);
        let Member::State(state) = Member::from(cell) else {
            panic!("not a state member");
        };
        assert_eq!(state.downcast::<u8>().map(|c| c.get()), Some(3));
        assert!(state.downcast::<u16>().is_none());
    }

    #[test]
    fn fallible_action_reports_failure() {
        let action = Action::try_new(|n: i32| {
            anyhow::ensure!(n > 0, "must be positive");
            Ok(n)
        });
        assert_eq!(action.call::<i32, i32>(2).unwrap(), 2);
        assert!(matches!(
            action.call::<i32, i32>(-1),
            Err(StoreError::ActionFailed(_))
        ));
    }

    #[test]
    fn other_value_keeps_type_and_json() {
        let other = OtherValue::new(vec![1, 2]);
        assert_eq!(other.get::<Vec<i32>>(), Some(&vec![1, 2]));
        assert_eq!(other.to_json().unwrap(), serde_json::json!([1, 2]));
    }
}
