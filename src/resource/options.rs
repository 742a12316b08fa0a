use super::status::FetchError;
use crate::error::StoreError;
use crate::member::Member;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// When a bound resource issues its first fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceMode {
    /// Fetch as soon as the resource is bound, on the server and the client.
    #[default]
    Auto,
    /// Fetch on bind only in a client environment.
    Client,
    /// Never fetch on bind; wait for `execute` or `refresh`.
    Manual,
}

pub(crate) type ErrorHook = Arc<dyn Fn(&FetchError) + Send + Sync>;
type Getter = Arc<dyn Fn() + Send + Sync>;

/// A reactive source whose changes refresh a resource.
#[derive(Clone)]
pub enum WatchSource {
    Member(Member),
    /// A closure whose tracked reads become the dependencies.
    Getter(Getter),
}

impl WatchSource {
    pub(crate) fn validate(&self, index: usize) -> Result<(), StoreError> {
        match self {
            WatchSource::Member(member @ (Member::Action(_) | Member::Resource(_) | Member::Other(_))) => {
                Err(StoreError::InvalidWatchSource {
                    index,
                    kind: member.kind(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Register a read of the source with the current observer.
    pub(crate) fn track(&self) {
        match self {
            WatchSource::Member(Member::State(state)) => state.0.track(),
            WatchSource::Member(Member::Derived(derived)) => derived.0.track(),
            WatchSource::Member(_) => {}
            WatchSource::Getter(getter) => getter(),
        }
    }
}

impl fmt::Debug for WatchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchSource::Member(member) => f.debug_tuple("Member").field(member).finish(),
            WatchSource::Getter(_) => f.write_str("Getter"),
        }
    }
}

/// Options accepted when creating an async resource.
///
/// ```
/// use larder::{ResourceMode, ResourceOptions, StateCell};
///
/// let page = StateCell::new(1);
/// let options = ResourceOptions::new().client().watch(page);
/// assert_eq!(options.mode, ResourceMode::Client);
/// ```
#[derive(Clone, Default)]
pub struct ResourceOptions {
    pub mode: ResourceMode,
    pub watch: Vec<WatchSource>,
    pub on_error: Option<ErrorHook>,
}

impl ResourceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(mut self, mode: ResourceMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn manual(self) -> Self {
        self.mode(ResourceMode::Manual)
    }

    pub fn client(self) -> Self {
        self.mode(ResourceMode::Client)
    }

    /// Refresh whenever this member changes. Only state and derived members
    /// are accepted; anything else fails when the resource is created.
    pub fn watch(mut self, source: impl Into<Member>) -> Self {
        self.watch.push(WatchSource::Member(source.into()));
        self
    }

    pub fn watch_fn<F>(mut self, getter: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.watch.push(WatchSource::Getter(Arc::new(getter)));
        self
    }

    /// Called once for every failed fetch generation.
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&FetchError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }

    pub(crate) fn validate(&self) -> Result<(), StoreError> {
        self.watch
            .iter()
            .enumerate()
            .try_for_each(|(index, source)| source.validate(index))
    }
}

impl fmt::Debug for ResourceOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceOptions")
            .field("mode", &self.mode)
            .field("watch", &self.watch)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}
