use super::options::{ErrorHook, ResourceMode, ResourceOptions, WatchSource};
use super::pending::{Pending, Settled};
use super::status::{FetchError, ResourceSnapshot, ResourceStatus};
use super::token::CancelToken;
use crate::cell::StateValue;
use crate::error::StoreError;
use crate::member::{AnyResource, Member};
use crate::registry::Environment;
use crate::runtime::ReactiveRuntime;
use crate::signal::{Effect, Signal, WatchGuard};
use crate::sync::lock;
use serde_json::Value;
use std::any::{type_name, Any};
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Parameters accepted by [`AsyncResource::execute_with`].
pub trait ResourceParam: Clone + Send + Sync + 'static {}

impl<P> ResourceParam for P where P: Clone + Send + Sync + 'static {}

pub type FetchFuture<T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send>>;

type Fetcher<T, P> = Arc<dyn Fn(FetchContext<P>) -> FetchFuture<T> + Send + Sync>;

/// What a fetcher receives for one generation.
#[derive(Debug, Clone)]
pub struct FetchContext<P = ()> {
    /// Cancelled as soon as a newer generation starts.
    pub token: CancelToken,
    /// The last parameter passed to `execute_with`, if any.
    pub param: Option<P>,
}

enum Binding {
    Standalone,
    Store { store: String, key: String },
}

impl Binding {
    fn label(binding: Option<&Binding>) -> String {
        match binding {
            None => "unbound".to_string(),
            Some(Binding::Standalone) => "standalone".to_string(),
            Some(Binding::Store { store, key }) => format!("{store}.{key}"),
        }
    }
}

struct Control<P> {
    generation: u64,
    token: Option<CancelToken>,
    settle_tx: Option<watch::Sender<Option<Settled>>>,
    latest: Pending,
    param: Option<P>,
    binding: Option<Binding>,
    watch: Vec<WatchSource>,
}

struct ResourceInner<T, P> {
    data: Signal<Option<T>>,
    error: Signal<Option<FetchError>>,
    status: Signal<ResourceStatus>,
    fetcher: Fetcher<T, P>,
    mode: ResourceMode,
    on_error: Option<ErrorHook>,
    runtime: Weak<ReactiveRuntime>,
    control: Mutex<Control<P>>,
    watcher: Mutex<Option<Effect>>,
}

/// A managed fetch lifecycle: `data`, `error` and `status` plus the
/// operations that drive them.
///
/// Every `execute` or `refresh` starts a new fetch generation and cancels the
/// previous one. Only the newest generation may write its outcome, so a slow
/// response can never overwrite a faster, newer one.
///
/// Fetches are driven on the ambient tokio runtime.
///
/// ```
/// use larder::{AsyncResource, ResourceStatus};
///
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// let products = AsyncResource::new(|_| async { Ok(vec![3, 5]) });
/// products.start();
/// assert_eq!(products.status(), ResourceStatus::Fetching);
///
/// products.suspense().await.unwrap();
/// assert_eq!(products.status(), ResourceStatus::Success);
/// assert_eq!(products.data(), Some(vec![3, 5]));
/// # });
/// ```
pub struct AsyncResource<T, P = ()> {
    inner: Arc<ResourceInner<T, P>>,
}

impl<T, P> Clone for AsyncResource<T, P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: StateValue> AsyncResource<T> {
    /// A resource in `auto` mode without parameters.
    pub fn new<F, Fut>(fetcher: F) -> Self
    where
        F: Fn(FetchContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self::with_param(fetcher)
    }

    /// Fails when a watch source cannot be watched.
    pub fn with_options<F, Fut>(fetcher: F, options: ResourceOptions) -> Result<Self, StoreError>
    where
        F: Fn(FetchContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self::with_param_options(fetcher, options)
    }
}

impl<T: StateValue, P: ResourceParam> AsyncResource<T, P> {
    pub fn with_param<F, Fut>(fetcher: F) -> Self
    where
        F: Fn(FetchContext<P>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self::build(&ReactiveRuntime::current(), boxed(fetcher), ResourceOptions::default())
    }

    pub fn with_param_options<F, Fut>(fetcher: F, options: ResourceOptions) -> Result<Self, StoreError>
    where
        F: Fn(FetchContext<P>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self::create_in(&ReactiveRuntime::current(), boxed(fetcher), options)
    }

    fn create_in(
        runtime: &Arc<ReactiveRuntime>,
        fetcher: Fetcher<T, P>,
        options: ResourceOptions,
    ) -> Result<Self, StoreError> {
        options.validate()?;
        Ok(Self::build(runtime, fetcher, options))
    }

    fn build(runtime: &Arc<ReactiveRuntime>, fetcher: Fetcher<T, P>, options: ResourceOptions) -> Self {
        let status = match options.mode {
            ResourceMode::Manual => ResourceStatus::Idle,
            ResourceMode::Auto | ResourceMode::Client => ResourceStatus::Fetching,
        };

        Self {
            inner: Arc::new(ResourceInner {
                data: Signal::new_in(runtime, None),
                error: Signal::new_in(runtime, None),
                status: Signal::new_in(runtime, status),
                fetcher,
                mode: options.mode,
                on_error: options.on_error,
                runtime: Arc::downgrade(runtime),
                control: Mutex::new(Control {
                    generation: 0,
                    token: None,
                    settle_tx: None,
                    latest: Pending::settled(),
                    param: None,
                    binding: None,
                    watch: options.watch,
                }),
                watcher: Mutex::new(None),
            }),
        }
    }

    pub fn data(&self) -> Option<T> {
        self.inner.data.get()
    }

    pub fn error(&self) -> Option<FetchError> {
        self.inner.error.get()
    }

    pub fn status(&self) -> ResourceStatus {
        self.inner.status.get()
    }

    pub fn snapshot(&self) -> ResourceSnapshot<T> {
        ResourceSnapshot {
            data: self.inner.data.get(),
            error: self.inner.error.get(),
            status: self.inner.status.get(),
        }
    }

    pub fn mode(&self) -> ResourceMode {
        self.inner.mode
    }

    /// The parameter the next generation will be called with.
    pub fn param(&self) -> Option<P> {
        lock(&self.inner.control).param.clone()
    }

    /// Clear `data` and `error` and fetch again with the last parameter.
    pub fn execute(&self) -> Pending {
        self.inner.begin(true, None)
    }

    /// Like [`execute`](Self::execute), remembering `param` for later
    /// generations.
    pub fn execute_with(&self, param: P) -> Pending {
        self.inner.begin(true, Some(param))
    }

    /// Fetch again while keeping the current `data`.
    pub fn refresh(&self) -> Pending {
        self.inner.begin(false, None)
    }

    /// The latest generation's completion handle. Starts nothing.
    pub fn suspense(&self) -> Pending {
        lock(&self.inner.control).latest.clone()
    }

    /// Drop the in-flight generation, if any.
    ///
    /// The status falls back to what the data says: `Success` when data is
    /// present, `Error` when an error is present, `Idle` otherwise.
    pub fn cancel(&self) {
        self.inner.supersede(None);
    }

    /// Bind the resource outside any store and apply its mode as on a client.
    ///
    /// Binding happens once; later calls return the latest generation.
    pub fn start(&self) -> Pending {
        self.inner.bind(Binding::Standalone, None, Environment::Client)
    }

    pub fn is_bound(&self) -> bool {
        lock(&self.inner.control).binding.is_some()
    }

    /// Call `callback` with the data now if the resource already succeeded,
    /// then on every later transition into `Success`.
    pub fn on_success<F>(&self, callback: F) -> Subscription
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let data = self.inner.data.clone();
        self.on_status(ResourceStatus::Success, move || {
            if let Some(value) = data.get_untracked() {
                callback(value);
            }
        })
    }

    /// Call `callback` with the error now if the resource already failed,
    /// then on every later transition into `Error`.
    pub fn on_error<F>(&self, callback: F) -> Subscription
    where
        F: Fn(FetchError) + Send + Sync + 'static,
    {
        let error = self.inner.error.clone();
        self.on_status(ResourceStatus::Error, move || {
            if let Some(err) = error.get_untracked() {
                callback(err);
            }
        })
    }

    fn on_status<F>(&self, target: ResourceStatus, fire: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let last = Mutex::new(None);
        let guard = self.inner.status.watch(move |status| {
            let previous = lock(&last).replace(status);
            if status == target && previous != Some(target) {
                fire();
            }
        });
        Subscription { _guard: guard }
    }

    pub(crate) fn erase(&self) -> AnyResource {
        AnyResource(Arc::new(self.clone()))
    }
}

fn boxed<T, P, F, Fut>(fetcher: F) -> Fetcher<T, P>
where
    F: Fn(FetchContext<P>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    Arc::new(move |ctx| -> FetchFuture<T> { Box::pin(fetcher(ctx)) })
}

fn panicked(payload: Box<dyn Any + Send>) -> anyhow::Error {
    let message = payload
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned());
    match message {
        Some(message) => anyhow::anyhow!("fetcher panicked: {message}"),
        None => anyhow::anyhow!("fetcher panicked"),
    }
}

impl<T: StateValue, P: ResourceParam> ResourceInner<T, P> {
    fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        match self.runtime.upgrade() {
            Some(runtime) => runtime.untracked(f),
            None => f(),
        }
    }

    /// Start a new generation. `reset` clears the data (execute) instead of
    /// keeping it (refresh).
    fn begin(self: &Arc<Self>, reset: bool, param: Option<P>) -> Pending {
        let handle = tokio::runtime::Handle::try_current();
        let (tx, pending) = Pending::channel();

        let (generation, ctx, previous, label) = {
            let mut control = lock(&self.control);
            control.generation += 1;
            if let Some(token) = control.token.take() {
                token.cancel();
            }
            let previous = control.settle_tx.replace(tx);
            if param.is_some() {
                control.param = param;
            }
            let token = CancelToken::new();
            control.token = Some(token.clone());
            control.latest = pending.clone();

            if reset {
                self.data.update_silent(|data| *data = None);
            }
            self.error.update_silent(|error| *error = None);
            self.status.update_silent(|status| {
                *status = if reset {
                    ResourceStatus::Fetching
                } else {
                    ResourceStatus::Refreshing
                }
            });

            let ctx = FetchContext {
                token,
                param: control.param.clone(),
            };
            let label = Binding::label(control.binding.as_ref());
            (control.generation, ctx, previous, label)
        };

        if let Some(previous) = previous {
            previous.send_replace(Some(Settled::Cancelled));
        }
        if reset {
            self.data.notify();
        }
        self.error.notify();
        self.status.notify();

        debug!(resource = %label, generation, refresh = !reset, "fetch started");

        match handle {
            Ok(handle) => {
                let future = match self.untracked(|| panic::catch_unwind(AssertUnwindSafe(|| (self.fetcher)(ctx)))) {
                    Ok(future) => future,
                    Err(payload) => {
                        self.settle(generation, Err(panicked(payload)));
                        return pending;
                    }
                };
                // The fetch runs in its own task so a panic surfaces as a
                // `JoinError` here instead of leaving the generation open.
                let fetch = handle.spawn(future);
                let inner = Arc::clone(self);
                handle.spawn(async move {
                    let outcome = match fetch.await {
                        Ok(outcome) => outcome,
                        Err(err) if err.is_panic() => Err(panicked(err.into_panic())),
                        Err(err) => Err(anyhow::anyhow!("fetch task did not finish: {err}")),
                    };
                    inner.settle(generation, outcome);
                });
            }
            Err(_) => self.settle(
                generation,
                Err(anyhow::anyhow!("no tokio runtime is available to drive the fetch")),
            ),
        }

        pending
    }

    fn settle(&self, generation: u64, outcome: anyhow::Result<T>) {
        let (settled, tx, label) = {
            let mut control = lock(&self.control);
            let label = Binding::label(control.binding.as_ref());
            if control.generation != generation {
                debug!(resource = %label, generation, "discarding superseded fetch");
                return;
            }
            control.token = None;
            let tx = control.settle_tx.take();

            let settled = match outcome {
                Ok(value) => {
                    self.data.update_silent(|data| *data = Some(value));
                    self.status.update_silent(|status| *status = ResourceStatus::Success);
                    Settled::Success
                }
                Err(err) => {
                    let err = FetchError::from(err);
                    self.error.update_silent(|error| *error = Some(err.clone()));
                    self.status.update_silent(|status| *status = ResourceStatus::Error);
                    Settled::Failed(err)
                }
            };
            (settled, tx, label)
        };

        match &settled {
            Settled::Failed(err) => {
                warn!(resource = %label, generation, error = %err, "fetch failed");
                self.error.notify();
            }
            _ => {
                debug!(resource = %label, generation, "fetch succeeded");
                self.data.notify();
            }
        }
        self.status.notify();

        if let (Settled::Failed(err), Some(hook)) = (&settled, &self.on_error) {
            hook(err);
        }
        if let Some(tx) = tx {
            tx.send_replace(Some(settled));
        }
    }

    /// Invalidate the in-flight generation, then either write `snapshot` or
    /// fall back to a settled status.
    fn supersede(&self, snapshot: Option<ResourceSnapshot<T>>) {
        let tx = {
            let mut control = lock(&self.control);
            control.generation += 1;
            if let Some(token) = control.token.take() {
                token.cancel();
            }
            let tx = control.settle_tx.take();

            match snapshot {
                Some(snapshot) => {
                    self.data.update_silent(|data| *data = snapshot.data);
                    self.error.update_silent(|error| *error = snapshot.error);
                    self.status.update_silent(|status| *status = snapshot.status);
                }
                None => {
                    let status = self.status.get_untracked();
                    if status.is_in_flight() {
                        let fallback = if self.data.with(Option::is_some) {
                            ResourceStatus::Success
                        } else if self.error.with(Option::is_some) {
                            ResourceStatus::Error
                        } else {
                            ResourceStatus::Idle
                        };
                        self.status.update_silent(|status| *status = fallback);
                    }
                }
            }
            tx
        };

        if let Some(tx) = tx {
            tx.send_replace(Some(Settled::Cancelled));
        }
        self.data.notify();
        self.error.notify();
        self.status.notify();
    }

    fn bind(self: &Arc<Self>, binding: Binding, snapshot: Option<Value>, env: Environment) -> Pending {
        let label = {
            let mut control = lock(&self.control);
            if control.binding.is_some() {
                debug!(resource = %Binding::label(control.binding.as_ref()), "resource already bound");
                return control.latest.clone();
            }
            control.binding = Some(binding);
            Binding::label(control.binding.as_ref())
        };

        if env == Environment::Client {
            self.install_watcher();
        }

        if let Some(snapshot) = snapshot {
            match serde_json::from_value::<ResourceSnapshot<T>>(snapshot) {
                Ok(snapshot) if snapshot.status.is_in_flight() => {
                    warn!(resource = %label, status = %snapshot.status, "discarding mid-flight snapshot");
                }
                Ok(snapshot) => {
                    debug!(resource = %label, status = %snapshot.status, "adopting hydrated snapshot");
                    self.supersede(Some(snapshot));
                    return Pending::settled();
                }
                Err(err) => {
                    warn!(resource = %label, error = %err, "ignoring snapshot that does not fit the resource");
                }
            }
        }

        let fetch = match self.mode {
            ResourceMode::Auto => true,
            ResourceMode::Client => env == Environment::Client,
            ResourceMode::Manual => false,
        };
        if fetch {
            self.begin(true, None)
        } else {
            Pending::settled()
        }
    }

    fn install_watcher(self: &Arc<Self>) {
        let sources = std::mem::take(&mut lock(&self.control).watch);
        if sources.is_empty() {
            return;
        }
        let Some(runtime) = self.runtime.upgrade() else {
            return;
        };

        let resource = Arc::downgrade(self);
        let primed = AtomicBool::new(false);
        let effect = Effect::new_in(&runtime, move || {
            for source in &sources {
                source.track();
            }
            // The first run only collects dependencies
            if !primed.swap(true, Ordering::SeqCst) {
                return;
            }
            if let Some(resource) = resource.upgrade() {
                resource.begin(false, None);
            }
        });
        *lock(&self.watcher) = Some(effect);
    }
}

impl<T: StateValue + fmt::Debug, P> fmt::Debug for AsyncResource<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncResource")
            .field("status", &self.inner.status.get_untracked())
            .field("data", &self.inner.data.get_untracked())
            .field("error", &self.inner.error.get_untracked())
            .finish()
    }
}

/// Keeps an `on_success`/`on_error` callback registered until dropped.
#[must_use = "dropping the subscription unregisters the callback"]
#[derive(Debug)]
pub struct Subscription {
    _guard: WatchGuard,
}

/// Type-erased view of a resource used by the assembler and the registry.
pub(crate) trait DynResource: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn type_name(&self) -> &'static str;
    fn bind(&self, store: &str, key: &str, snapshot: Option<Value>, env: Environment) -> Pending;
    fn snapshot_json(&self) -> Result<Value, StoreError>;
    /// Overwrite the live state with a serialized snapshot.
    fn adopt_json(&self, value: Value) -> Result<(), StoreError>;
    fn suspense(&self) -> Pending;
    fn status(&self) -> ResourceStatus;
    fn track(&self);
}

impl<T: StateValue, P: ResourceParam> DynResource for AsyncResource<T, P> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        type_name::<T>()
    }

    fn bind(&self, store: &str, key: &str, snapshot: Option<Value>, env: Environment) -> Pending {
        let binding = Binding::Store {
            store: store.to_string(),
            key: key.to_string(),
        };
        self.inner.bind(binding, snapshot, env)
    }

    fn snapshot_json(&self) -> Result<Value, StoreError> {
        Ok(serde_json::to_value(self.snapshot())?)
    }

    fn adopt_json(&self, value: Value) -> Result<(), StoreError> {
        let snapshot: ResourceSnapshot<T> = serde_json::from_value(value)?;
        self.inner.supersede(Some(snapshot));
        Ok(())
    }

    fn suspense(&self) -> Pending {
        AsyncResource::suspense(self)
    }

    fn status(&self) -> ResourceStatus {
        self.inner.status.get_untracked()
    }

    fn track(&self) {
        self.inner.data.track();
        self.inner.error.track();
        self.inner.status.track();
    }
}

impl<T: StateValue, P: ResourceParam> From<AsyncResource<T, P>> for Member {
    fn from(resource: AsyncResource<T, P>) -> Self {
        Member::Resource(resource.erase())
    }
}
