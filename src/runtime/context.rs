use crate::sync::lock;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::{self, ThreadId};

type Observer = Arc<dyn Fn() + Send + Sync>;

/// Dependency graph of one runtime.
struct ReactiveContext {
    // Observer currently tracking reads, per thread
    current_observer: HashMap<ThreadId, usize>,
    // Map from signal ID to set of observer IDs that depend on it
    dependencies: HashMap<usize, HashSet<usize>>,
    // Map from observer ID to set of signal IDs it depends on
    observer_deps: HashMap<usize, HashSet<usize>>,
    // Map from observer ID to the effect function
    observers: HashMap<usize, Observer>,
    // Map from memo ID to dirty state
    memo_dirty: HashMap<usize, bool>,
}

impl ReactiveContext {
    fn new() -> Self {
        Self {
            current_observer: HashMap::new(),
            dependencies: HashMap::new(),
            observer_deps: HashMap::new(),
            observers: HashMap::new(),
            memo_dirty: HashMap::new(),
        }
    }

    fn unlink(&mut self, observer_id: usize) {
        if let Some(old_deps) = self.observer_deps.remove(&observer_id) {
            for signal_id in old_deps {
                if let Some(deps) = self.dependencies.get_mut(&signal_id) {
                    deps.remove(&observer_id);
                }
            }
        }
    }

    fn clear(&mut self) {
        self.current_observer.clear();
        self.dependencies.clear();
        self.observer_deps.clear();
        self.observers.clear();
        self.memo_dirty.clear();
    }
}

fn set_observer(
    ctx: &mut ReactiveContext,
    thread_id: ThreadId,
    observer: Option<usize>,
) -> Option<usize> {
    match observer {
        Some(id) => ctx.current_observer.insert(thread_id, id),
        None => ctx.current_observer.remove(&thread_id),
    }
}

/// Inner runtime state shared with the guards that unsubscribe observers.
pub struct RuntimeInner {
    context: Mutex<ReactiveContext>,
}

impl RuntimeInner {
    fn new() -> Self {
        Self {
            context: Mutex::new(ReactiveContext::new()),
        }
    }

    pub fn remove_observer(&self, observer_id: usize) {
        let mut ctx = lock(&self.context);
        ctx.observers.remove(&observer_id);
        ctx.memo_dirty.remove(&observer_id);
        ctx.unlink(observer_id);
    }

    fn clear(&self) {
        lock(&self.context).clear();
    }
}

/// Hybrid reactive runtime for managing reactive primitives.
///
/// Supports both a global runtime (default) and scoped runtimes for isolation.
/// The runtime tracks dependencies between signals, effects, and memos,
/// and manages the reactive graph.
///
/// # Examples
///
/// Using the default global runtime:
///
/// ```
/// use larder::Signal;
///
/// let signal = Signal::new(42);
/// assert_eq!(signal.get(), 42);
/// ```
///
/// Using scoped runtimes for isolation:
///
/// ```
/// use larder::runtime::ReactiveRuntime;
/// use larder::Signal;
///
/// ReactiveRuntime::scope(|| {
///     let signal = Signal::new(0);
///     assert_eq!(signal.get(), 0);
/// });
/// ```
pub struct ReactiveRuntime {
    next_id: AtomicUsize,
    inner: Arc<RuntimeInner>,
}

// Thread-local stack for scoped runtimes
thread_local! {
    static RUNTIME_STACK: RefCell<Vec<Arc<ReactiveRuntime>>> = const { RefCell::new(Vec::new()) };
}

/// Pops the scoped runtime even when the scoped closure unwinds.
struct ScopeGuard;

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        RUNTIME_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

impl ReactiveRuntime {
    /// Create a new isolated runtime with its own dependency graph.
    pub fn new() -> Arc<Self> {
        Arc::new(ReactiveRuntime {
            next_id: AtomicUsize::new(0),
            inner: Arc::new(RuntimeInner::new()),
        })
    }

    /// Run a function with a fresh isolated runtime.
    ///
    /// The runtime and all its state is dropped when the function returns.
    pub fn scope<F, R>(f: F) -> R
    where
        F: FnOnce() -> R,
    {
        Self::with_runtime(Self::new(), f)
    }

    /// Get or create the global runtime (fallback).
    pub fn global() -> Arc<Self> {
        static RUNTIME: OnceLock<Arc<ReactiveRuntime>> = OnceLock::new();
        Arc::clone(RUNTIME.get_or_init(Self::new))
    }

    /// Get the current reactive runtime (scoped or global fallback).
    pub fn current() -> Arc<Self> {
        RUNTIME_STACK.with(|stack| stack.borrow().last().cloned().unwrap_or_else(Self::global))
    }

    /// Run a function with a specific runtime as the current context.
    ///
    /// ```
    /// use larder::runtime::ReactiveRuntime;
    /// use larder::Signal;
    ///
    /// let runtime = ReactiveRuntime::new();
    /// ReactiveRuntime::with_runtime(runtime, || {
    ///     let signal = Signal::new(42);
    ///     assert_eq!(signal.get(), 42);
    /// });
    /// ```
    pub fn with_runtime<F, R>(runtime: Arc<Self>, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        RUNTIME_STACK.with(|stack| {
            stack.borrow_mut().push(runtime);
        });
        let _guard = ScopeGuard;
        f()
    }

    /// Drop every observer, dependency and memo flag of this runtime.
    ///
    /// Signals created in the runtime keep their values but stop notifying.
    pub fn clear(&self) {
        self.inner.clear();
    }

    pub(crate) fn inner(&self) -> &Arc<RuntimeInner> {
        &self.inner
    }

    /// Generate the next unique ID for a reactive primitive.
    pub fn next_id(&self) -> usize {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Track a read of a signal by the current observer.
    pub fn track_read(&self, signal_id: usize) {
        let mut ctx = lock(&self.inner.context);
        if let Some(&current_observer) = ctx.current_observer.get(&thread::current().id()) {
            ctx.dependencies
                .entry(signal_id)
                .or_default()
                .insert(current_observer);
            ctx.observer_deps
                .entry(current_observer)
                .or_default()
                .insert(signal_id);
        }
    }

    /// Notify all observers that depend on a signal.
    pub fn notify_observers(&self, signal_id: usize) {
        let observers = {
            let ctx = lock(&self.inner.context);
            ctx.dependencies
                .get(&signal_id)
                .map(|obs| obs.iter().copied().collect::<Vec<_>>())
        };

        for observer_id in observers.unwrap_or_default() {
            self.mark_observer_dirty(observer_id);
        }
    }

    /// Mark an observer (memo or effect) as dirty and propagate to dependents.
    fn mark_observer_dirty(&self, observer_id: usize) {
        let mut ctx = lock(&self.inner.context);
        let memo_state = ctx.memo_dirty.get(&observer_id).copied();

        if let Some(already_dirty) = memo_state {
            if already_dirty {
                return;
            }
            ctx.memo_dirty.insert(observer_id, true);
            let dependents = ctx
                .dependencies
                .get(&observer_id)
                .map(|deps| deps.iter().copied().collect::<Vec<_>>());
            drop(ctx);

            for dependent_id in dependents.unwrap_or_default() {
                self.mark_observer_dirty(dependent_id);
            }
            return;
        }

        let effect = ctx.observers.get(&observer_id).cloned();
        drop(ctx);

        if let Some(effect) = effect {
            self.with_observer(observer_id, || effect());
        }
    }

    /// Register the function run when an observer is notified.
    pub fn create_observer<F>(&self, observer_id: usize, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut ctx = lock(&self.inner.context);
        ctx.unlink(observer_id);
        ctx.observers.insert(observer_id, Arc::new(f));
    }

    /// Run a function with a specific observer as the current context.
    pub fn with_observer<F, R>(&self, observer_id: usize, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        self.swap_observer(Some(observer_id), f)
    }

    /// Run a function without tracking any of its reads.
    pub fn untracked<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        self.swap_observer(None, f)
    }

    fn swap_observer<F, R>(&self, observer: Option<usize>, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let thread_id = thread::current().id();
        let prev = set_observer(&mut lock(&self.inner.context), thread_id, observer);

        let result = f();

        set_observer(&mut lock(&self.inner.context), thread_id, prev);
        result
    }

    /// Register a memo and mark it as dirty initially.
    pub fn register_memo(&self, memo_id: usize) {
        lock(&self.inner.context).memo_dirty.insert(memo_id, true);
    }

    /// Check if a memo is dirty (needs recomputation).
    pub fn is_memo_dirty(&self, memo_id: usize) -> bool {
        lock(&self.inner.context)
            .memo_dirty
            .get(&memo_id)
            .copied()
            .unwrap_or(true)
    }

    /// Mark a memo as clean (after recomputation).
    pub fn mark_memo_clean(&self, memo_id: usize) {
        lock(&self.inner.context).memo_dirty.insert(memo_id, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_pushes_and_pops() {
        let outer = ReactiveRuntime::current();
        let inner = ReactiveRuntime::new();
        ReactiveRuntime::with_runtime(Arc::clone(&inner), || {
            assert!(Arc::ptr_eq(&ReactiveRuntime::current(), &inner));
        });
        assert!(Arc::ptr_eq(&ReactiveRuntime::current(), &outer));
    }

    #[test]
    fn untracked_reads_do_not_register() {
        let runtime = ReactiveRuntime::new();
        let observer = runtime.next_id();
        runtime.with_observer(observer, || {
            runtime.untracked(|| runtime.track_read(99));
        });
        let ctx = lock(&runtime.inner.context);
        assert!(!ctx.dependencies.contains_key(&99));
    }
}
