use crate::runtime::{ReactiveRuntime, RuntimeInner};
use crate::sync::{read, write};
use std::fmt;
use std::sync::{Arc, RwLock, Weak};

/// A reactive signal that holds a value and notifies subscribers when changed.
///
/// A signal remembers the runtime it was created in, so a write coming from
/// an async task on another thread still reaches the right observers.
pub struct Signal<T> {
    value: Arc<RwLock<T>>,
    id: usize,
    runtime: Weak<ReactiveRuntime>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            id: self.id,
            runtime: Weak::clone(&self.runtime),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id)
            .field("value", &*read(&self.value))
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> Signal<T> {
    /// Create a new signal in the current runtime.
    pub fn new(initial: T) -> Self {
        Self::new_in(&ReactiveRuntime::current(), initial)
    }

    /// Create a new signal in a specific runtime.
    pub fn new_in(runtime: &Arc<ReactiveRuntime>, initial: T) -> Self {
        Self {
            value: Arc::new(RwLock::new(initial)),
            id: runtime.next_id(),
            runtime: Arc::downgrade(runtime),
        }
    }

    /// Get the current value of the signal.
    pub fn get(&self) -> T {
        self.track();
        read(&self.value).clone()
    }

    /// Get the current value without registering a dependency.
    pub fn get_untracked(&self) -> T {
        read(&self.value).clone()
    }

    /// Set a new value for the signal.
    pub fn set(&self, new_value: T) {
        *write(&self.value) = new_value;
        self.notify();
    }

    /// Update the value using a function.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        self.update_silent(f);
        self.notify();
    }

    /// Mutate the value in place without notifying observers.
    pub fn update_silent(&self, f: impl FnOnce(&mut T)) {
        let mut value = write(&self.value);
        f(&mut *value);
    }

    /// Read the value with a function without cloning.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        let value = read(&self.value);
        f(&*value)
    }

    /// Register a read of this signal with the current observer.
    pub fn track(&self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.track_read(self.id);
        }
    }

    /// Notify observers as if the value had changed.
    pub fn notify(&self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.notify_observers(self.id);
        }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Watch this signal for changes, calling back immediately with the
    /// current value.
    pub fn watch<F>(&self, callback: F) -> WatchGuard
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        self.observe(callback, true)
    }

    /// Like [`watch`](Self::watch), but only called on later changes.
    pub fn subscribe<F>(&self, callback: F) -> WatchGuard
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        self.observe(callback, false)
    }

    fn observe<F>(&self, callback: F, immediate: bool) -> WatchGuard
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let Some(runtime) = self.runtime.upgrade() else {
            if immediate {
                callback(self.get_untracked());
            }
            return WatchGuard::detached();
        };

        let observer_id = runtime.next_id();
        let value = Arc::clone(&self.value);
        let callback = Arc::new(callback);
        let callback_clone = Arc::clone(&callback);

        runtime.create_observer(observer_id, move || {
            let val = read(&value).clone();
            callback_clone(val);
        });

        // Subscribe to this signal
        runtime.with_observer(observer_id, || {
            runtime.track_read(self.id);
        });

        if immediate {
            callback(self.get_untracked());
        }

        WatchGuard {
            observer_id,
            runtime: Arc::downgrade(runtime.inner()),
        }
    }
}

/// RAII guard for signal watchers.
#[must_use = "dropping the guard unsubscribes the watcher"]
pub struct WatchGuard {
    observer_id: usize,
    runtime: Weak<RuntimeInner>,
}

impl WatchGuard {
    pub(crate) fn detached() -> Self {
        Self {
            observer_id: usize::MAX,
            runtime: Weak::new(),
        }
    }
}

impl fmt::Debug for WatchGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchGuard")
            .field("observer_id", &self.observer_id)
            .finish()
    }
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.remove_observer(self.observer_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn watch_calls_immediately_and_on_change() {
        let runtime = ReactiveRuntime::new();
        let signal = Signal::new_in(&runtime, 1);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);

        let _guard = signal.watch(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        signal.set(2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn subscribe_skips_current_value() {
        let runtime = ReactiveRuntime::new();
        let signal = Signal::new_in(&runtime, 1);
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);

        let guard = signal.subscribe(move |value| {
            seen_clone.store(value, Ordering::SeqCst);
        });
        assert_eq!(seen.load(Ordering::SeqCst), 0);

        signal.set(5);
        assert_eq!(seen.load(Ordering::SeqCst), 5);

        drop(guard);
        signal.set(9);
        assert_eq!(seen.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn silent_update_does_not_notify() {
        let runtime = ReactiveRuntime::new();
        let signal = Signal::new_in(&runtime, vec![1]);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);

        let _guard = signal.subscribe(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        signal.update_silent(|v| v.push(2));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(signal.get_untracked(), vec![1, 2]);

        signal.update(|v| v.push(3));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
