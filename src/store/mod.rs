//! Store definitions, their assembly into a registry and member access.
//!
//! A store is defined once with [`define_store`] (or [`define_store_from`])
//! and assembled lazily, once per registry, the first time it is accessed.

mod access;
mod assemble;
mod define;

pub use access::{MemberRef, ResourceReady, ResourceRef, StateAccessor};
pub use assemble::AssembledStore;
pub use define::{define_store, define_store_from, Toolkit, UseStore};
