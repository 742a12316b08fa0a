use crate::runtime::ReactiveRuntime;
use crate::sync::{read, write};
use std::sync::{Arc, RwLock, Weak};

/// A memoized computed value that automatically tracks dependencies.
///
/// Memos only recompute when their dependencies change.
pub struct Memo<T> {
    compute: Arc<dyn Fn() -> T + Send + Sync>,
    cached: Arc<RwLock<Option<T>>>,
    id: usize,
    runtime: Weak<ReactiveRuntime>,
}

impl<T> Clone for Memo<T> {
    fn clone(&self) -> Self {
        Self {
            compute: Arc::clone(&self.compute),
            cached: Arc::clone(&self.cached),
            id: self.id,
            runtime: Weak::clone(&self.runtime),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Memo<T> {
    /// Create a new memo in the current runtime.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::new_in(&ReactiveRuntime::current(), compute)
    }

    /// Create a new memo in a specific runtime.
    pub fn new_in<F>(runtime: &Arc<ReactiveRuntime>, compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let id = runtime.next_id();
        runtime.register_memo(id);

        Self {
            compute: Arc::new(compute),
            cached: Arc::new(RwLock::new(None)),
            id,
            runtime: Arc::downgrade(runtime),
        }
    }

    /// Get the current value, recomputing if necessary.
    pub fn get(&self) -> T {
        self.with(T::clone)
    }

    /// Read the memoized value with a function without cloning.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let Some(runtime) = self.runtime.upgrade() else {
            return f(&(self.compute)());
        };

        runtime.track_read(self.id);

        if runtime.is_memo_dirty(self.id) {
            // Recompute within observer context to track dependencies
            let value = runtime.with_observer(self.id, || (self.compute)());
            *write(&self.cached) = Some(value);
            runtime.mark_memo_clean(self.id);
        }

        let cached = read(&self.cached);
        match cached.as_ref() {
            Some(value) => f(value),
            None => {
                drop(cached);
                f(&(self.compute)())
            }
        }
    }

    /// Get the memo's unique ID.
    pub fn id(&self) -> usize {
        self.id
    }
}

/// Create a new memoized computation.
///
/// # Example
///
/// ```
/// use larder::{create_memo, Signal};
///
/// let count = Signal::new(5);
/// let doubled = create_memo({
///     let count = count.clone();
///     move || count.get() * 2
/// });
/// assert_eq!(doubled.get(), 10);
/// ```
pub fn create_memo<T, F>(compute: F) -> Memo<T>
where
    T: Clone + Send + Sync + 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    Memo::new(compute)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::Signal;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn memo_basic() {
        let count = Signal::new(5);
        let doubled = create_memo({
            let count = count.clone();
            move || count.get() * 2
        });

        assert_eq!(doubled.get(), 10);

        count.set(10);
        assert_eq!(doubled.get(), 20);
    }

    #[test]
    fn memo_caches_between_reads() {
        let runtime = ReactiveRuntime::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let source = Signal::new_in(&runtime, 1);
        let memo = Memo::new_in(&runtime, {
            let source = source.clone();
            let runs = Arc::clone(&runs);
            move || {
                runs.fetch_add(1, Ordering::SeqCst);
                source.get() + 1
            }
        });

        assert_eq!(memo.get(), 2);
        assert_eq!(memo.get(), 2);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        source.set(4);
        assert_eq!(memo.get(), 5);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }
}
