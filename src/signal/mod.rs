//! Fine-grained reactive primitives.
//!
//! These are the host-level building blocks the store layer is built on:
//! - Signals: Reactive state containers
//! - Memos: Cached computed values
//! - Effects: Side effects that react to changes

mod effect;
mod memo;
mod signal;

pub use effect::{create_effect, Effect};
pub use memo::{create_memo, Memo};
pub use signal::{Signal, WatchGuard};
