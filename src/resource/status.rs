use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of an async resource.
///
/// `Idle` only appears for manual resources that never fetched. Every fetch
/// generation moves through `Fetching` (or `Refreshing` when existing data is
/// kept) into `Success` or `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Idle,
    Fetching,
    Refreshing,
    Success,
    Error,
}

impl ResourceStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ResourceStatus::Success | ResourceStatus::Error)
    }

    pub fn is_in_flight(self) -> bool {
        matches!(self, ResourceStatus::Fetching | ResourceStatus::Refreshing)
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResourceStatus::Idle => "idle",
            ResourceStatus::Fetching => "fetching",
            ResourceStatus::Refreshing => "refreshing",
            ResourceStatus::Success => "success",
            ResourceStatus::Error => "error",
        })
    }
}

/// A failed fetch, kept as state on the resource.
///
/// Only the rendered message survives so the error can travel through a
/// hydration snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct FetchError {
    pub message: String,
}

impl FetchError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for FetchError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{err:#}"))
    }
}

/// Point-in-time copy of a resource's `data`, `error` and `status`.
///
/// This is also the shape a resource takes in the registry's state tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot<T> {
    pub data: Option<T>,
    pub error: Option<FetchError>,
    pub status: ResourceStatus,
}
