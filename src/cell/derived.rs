use crate::error::StoreError;
use crate::runtime::ReactiveRuntime;
use crate::signal::Memo;
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;

/// Values a derived cell can compute.
pub trait DerivedValue: Clone + Serialize + Send + Sync + 'static {}

impl<T> DerivedValue for T where T: Clone + Serialize + Send + Sync + 'static {}

/// A reactive value computed from other cells, recomputed lazily.
pub struct DerivedCell<T> {
    memo: Memo<T>,
}

impl<T> Clone for DerivedCell<T> {
    fn clone(&self) -> Self {
        Self {
            memo: self.memo.clone(),
        }
    }
}

impl<T: DerivedValue> DerivedCell<T> {
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::new_in(&ReactiveRuntime::current(), compute)
    }

    pub fn new_in<F>(runtime: &Arc<ReactiveRuntime>, compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            memo: Memo::new_in(runtime, compute),
        }
    }

    pub fn get(&self) -> T {
        self.memo.get()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.memo.with(f)
    }

    pub fn memo(&self) -> &Memo<T> {
        &self.memo
    }
}

pub(crate) trait DynDerived: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn type_name(&self) -> &'static str;
    fn to_json(&self) -> Result<Value, StoreError>;
    fn track(&self);
}

impl<T: DerivedValue> DynDerived for DerivedCell<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn to_json(&self) -> Result<Value, StoreError> {
        self.memo.with(|value| serde_json::to_value(value)).map_err(StoreError::from)
    }

    fn track(&self) {
        self.memo.with(|_| ());
    }
}
