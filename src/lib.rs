//! # Larder
//!
//! Named reactive stores shared across an application, with derived values,
//! async resources and server-to-client hydration.
//!
//! Larder works on two levels:
//!
//! ## Signals (Low-level primitives)
//!
//! Fine-grained reactive primitives the stores are built on:
//! - `Signal<T>` - Reactive values that notify dependents when changed
//! - `Memo<T>` - Computed values that automatically track dependencies
//! - `Effect` - Side effects that run when dependencies change
//!
//! ## Stores (High-level state management)
//!
//! - `StateCell<T>` / `DerivedCell<T>` - tagged state and derived members,
//!   with optional persistence
//! - `AsyncResource<T, P>` - a fetch lifecycle (`data`, `error`, `status`)
//!   where the newest fetch generation always wins
//! - `define_store` - a named store assembled once per `Registry`
//! - `Registry` - the stores of one application instance and the state tree
//!   they serialize to
//!
//! ```
//! use larder::{define_store, Members, Registry, RegistryConfig};
//!
//! let settings = define_store("settings", |kit| {
//!     Ok(Members::new().with("theme", kit.state("light".to_string())))
//! });
//!
//! // Server side: render, then ship the state tree.
//! let server = Registry::new(RegistryConfig::new().server());
//! settings.get_in(&server)?.state::<String>("theme")?.set("dark".into());
//! let payload = server.to_json()?;
//!
//! // Client side: hydrate before the first access.
//! let client = Registry::new(RegistryConfig::default());
//! client.hydrate_json(&payload)?;
//! let theme = settings.get_in(&client)?.state::<String>("theme")?;
//! assert_eq!(theme.get(), "dark");
//! # Ok::<(), larder::StoreError>(())
//! ```

pub mod cell;
pub mod error;
pub mod member;
pub mod partition;
pub mod registry;
pub mod resource;
pub mod runtime;
pub mod signal;
pub mod store;

mod sync;

// Re-export main types for convenience
pub use cell::{DerivedCell, DerivedValue, Persist, StateCell, StateOptions, StateValue};
pub use error::StoreError;
pub use member::{Action, AnyDerived, AnyResource, AnyState, Kind, Member, Members, OtherValue};
pub use registry::{
    Environment, JsonFilePersist, MemoryPersist, Mode, PersistAdapter, Registry, RegistryConfig, RegistryDebug,
    StateTree,
};
pub use resource::{
    AsyncResource, CancelToken, FetchContext, FetchError, Pending, ResourceMode, ResourceOptions, ResourceSnapshot,
    ResourceStatus, Subscription,
};
pub use signal::{create_effect, create_memo, Effect, Memo, Signal, WatchGuard};
pub use store::{define_store, define_store_from, AssembledStore, MemberRef, ResourceReady, Toolkit, UseStore};
