//! Tagged reactive cells: the state and derived members of a store.
//!
//! A [`StateCell`] wraps a [`Signal`](crate::Signal) and carries the
//! shallow/persistence metadata of one piece of state; a [`DerivedCell`]
//! wraps a [`Memo`](crate::Memo). Converting either into a
//! [`Member`](crate::Member) attaches its [`Kind`](crate::Kind) tag.

mod derived;
mod state;

pub use derived::{DerivedCell, DerivedValue};
pub use state::{Persist, StateCell, StateOptions, StateValue};

pub(crate) use derived::DynDerived;
pub(crate) use state::DynState;
