//! Runtime support for reactive primitives.
//!
//! This module provides the infrastructure for dependency tracking,
//! reactive graph management, and the scoped/global runtime stack that
//! signals, memos and effects are created in. Each [`Registry`](crate::Registry)
//! owns one runtime so that two application instances never share a graph.

mod context;

pub use context::ReactiveRuntime;
pub(crate) use context::RuntimeInner;
