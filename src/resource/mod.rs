//! Async resources: a fetch lifecycle with last-generation-wins semantics.

mod engine;
mod options;
mod pending;
mod status;
mod token;

pub use engine::{AsyncResource, FetchContext, FetchFuture, ResourceParam, Subscription};
pub use options::{ResourceMode, ResourceOptions, WatchSource};
pub use pending::Pending;
pub use status::{FetchError, ResourceSnapshot, ResourceStatus};
pub use token::CancelToken;

pub(crate) use engine::DynResource;
