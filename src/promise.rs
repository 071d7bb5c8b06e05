use crate::error::Error;
use crate::executor::TaskHandle;
use crate::options::{default_options, PromiseOptions};
use crate::state::PromiseState;
use crate::uncaught::{self, ErrorTrail};
use parking_lot::Mutex;
use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// An error travelling down a chain together with the lineage it belongs to.
#[derive(Clone)]
pub(crate) struct Rejection {
    pub(crate) error: Error,
    pub(crate) trail: Arc<ErrorTrail>,
}

impl Rejection {
    /// A rejection whose error originates at the promise it is applied to.
    pub(crate) fn origin(error: Error) -> Self {
        Rejection {
            error,
            trail: Arc::new(ErrorTrail::default()),
        }
    }
}

pub(crate) type Outcome<V> = Result<V, Rejection>;

pub(crate) struct Handler<V> {
    callback: Box<dyn FnOnce(Outcome<V>) + Send>,
    // forwards the outcome somewhere, so a rejection is not a dead end
    derives: bool,
    // consumes rejections
    observes: bool,
}

impl<V> Handler<V> {
    pub(crate) fn deriving(callback: impl FnOnce(Outcome<V>) + Send + 'static) -> Self {
        Handler {
            callback: Box::new(callback),
            derives: true,
            observes: false,
        }
    }

    pub(crate) fn observing(callback: impl FnOnce(Outcome<V>) + Send + 'static) -> Self {
        Handler {
            callback: Box::new(callback),
            derives: true,
            observes: true,
        }
    }

    pub(crate) fn sink(callback: impl FnOnce(Outcome<V>) + Send + 'static) -> Self {
        Handler {
            callback: Box::new(callback),
            derives: false,
            observes: false,
        }
    }

    fn invoke(self, outcome: Outcome<V>) {
        if self.observes {
            if let Err(rejection) = &outcome {
                rejection.trail.observe();
            }
        }
        (self.callback)(outcome)
    }
}

/// Type-erased cancellation link between promises of different value types.
pub(crate) trait CancelLink: Send + Sync {
    fn propagate_cancel(&self, raise_error: bool);
}

/// A value or error that becomes available later, possibly on another thread.
///
/// `Promise` is a handle: clones refer to the same promise. A promise settles
/// exactly once; later `resolve`/`reject` calls are ignored.
///
/// # Examples
///
/// ```
/// use threaded_promise::{Promise, PromiseState};
/// use std::thread;
///
/// let promise = Promise::<String>::pending();
/// let producer = promise.clone();
/// let task = thread::spawn(move || producer.resolve("🍓".to_owned()));
/// assert_eq!(promise.await_value().unwrap(), "🍓");
/// task.join().expect("The producer thread has panicked");
/// assert_eq!(promise.state(), PromiseState::Fulfilled);
/// ```
pub struct Promise<V> {
    pub(crate) core: Arc<Core<V>>,
}

pub(crate) struct Core<V> {
    id: usize,
    options: PromiseOptions,
    state: AtomicU8,
    parent: Option<Weak<dyn CancelLink>>,
    report_uncaught: bool,
    inner: Mutex<Inner<V>>,
}

struct Inner<V> {
    value: Option<V>,
    rejection: Option<Rejection>,
    error_root: bool,
    handlers: Vec<Handler<V>>,
    chain_child: Option<Arc<dyn CancelLink>>,
    task: Option<TaskHandle>,
    raise_on_cancel: bool,
}

impl<V> Inner<V> {
    fn new() -> Self {
        Inner {
            value: None,
            rejection: None,
            error_root: false,
            handlers: Vec::new(),
            chain_child: None,
            task: None,
            raise_on_cancel: false,
        }
    }
}

impl<V: Clone + Send + 'static> Core<V> {
    fn state(&self) -> PromiseState {
        PromiseState::from_u8(self.state.load(Ordering::Acquire))
    }

    // callers hold the inner lock
    fn set_state(&self, state: PromiseState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn log(&self, message: impl FnOnce() -> String) {
        self.options.debug(self.id, message);
    }

    fn resolve(&self, value: V) {
        self.log(|| format!("Resolve called, State={}", self.state()));
        let handlers = {
            let mut inner = self.inner.lock();
            if self.state() != PromiseState::Pending {
                return;
            }
            inner.value = Some(value.clone());
            inner.chain_child = None;
            self.set_state(PromiseState::Fulfilled);
            mem::take(&mut inner.handlers)
        };
        self.log(|| format!("Fulfilled, Handlers={}", handlers.len()));
        for handler in handlers {
            handler.invoke(Ok(value.clone()));
        }
    }

    fn reject(&self, rejection: Rejection, origin: bool) {
        self.log(|| {
            format!(
                "Reject called, State={}, Error={}",
                self.state(),
                rejection.error
            )
        });
        let (handlers, unhandled) = {
            let mut inner = self.inner.lock();
            match self.state() {
                PromiseState::Pending => self.set_state(PromiseState::Rejected),
                PromiseState::Canceled if inner.raise_on_cancel => {
                    self.set_state(PromiseState::RejectedOnCancel)
                }
                _ => return,
            }
            inner.error_root = origin;
            inner.rejection = Some(rejection.clone());
            inner.chain_child = None;
            let handlers = mem::take(&mut inner.handlers);
            let unhandled = !handlers.iter().any(|handler| handler.derives);
            (handlers, unhandled)
        };
        for handler in handlers {
            handler.invoke(Err(rejection.clone()));
        }
        if unhandled && self.report_uncaught {
            self.log(|| "No handler, watching for uncaught error".to_owned());
            uncaught::watch(&self.options, self.id, rejection);
        }
    }

    fn register(&self, handler: Handler<V>) {
        let outcome = {
            let mut inner = self.inner.lock();
            match self.state() {
                PromiseState::Pending => {
                    inner.handlers.push(handler);
                    return;
                }
                PromiseState::Canceled => {
                    // only a raising cancel can still settle this promise
                    if inner.raise_on_cancel {
                        inner.handlers.push(handler);
                    }
                    return;
                }
                PromiseState::Fulfilled => inner.value.clone().map(Ok),
                PromiseState::Rejected | PromiseState::RejectedOnCancel => {
                    inner.rejection.clone().map(Err)
                }
            }
        };
        if let Some(outcome) = outcome {
            self.log(|| "Handle settled, invoking handler".to_owned());
            handler.invoke(outcome);
        }
    }

    fn cancel(&self, raise_error: bool) {
        self.log(|| format!("Cancel called, State={}", self.state()));
        let (chain_child, task, dropped) = {
            let mut inner = self.inner.lock();
            if self.state() != PromiseState::Pending {
                return;
            }
            inner.raise_on_cancel = raise_error;
            self.set_state(PromiseState::Canceled);
            let dropped = if raise_error {
                Vec::new()
            } else {
                mem::take(&mut inner.handlers)
            };
            (inner.chain_child.take(), inner.task.clone(), dropped)
        };
        drop(dropped);
        if let Some(child) = chain_child {
            child.propagate_cancel(raise_error);
        }
        if let Some(task) = task {
            self.interrupt(&task, raise_error);
        }
        if let Some(parent) = self.parent.as_ref().and_then(Weak::upgrade) {
            parent.propagate_cancel(raise_error);
        }
    }

    fn interrupt(&self, task: &TaskHandle, raise_error: bool) {
        let stopped = task.cancel();
        self.log(|| format!("Canceling background task, Stopped={stopped}"));
        // a body that never started, or one still running, will not report the cancellation
        if raise_error {
            self.reject(Rejection::origin(Error::Canceled), true);
        }
    }
}

impl<V: Clone + Send + 'static> CancelLink for Core<V> {
    fn propagate_cancel(&self, raise_error: bool) {
        self.cancel(raise_error);
    }
}

impl<V> Clone for Promise<V> {
    fn clone(&self) -> Self {
        Promise {
            core: self.core.clone(),
        }
    }
}

impl<V: Clone + Send + 'static> Promise<V> {
    fn build(
        options: PromiseOptions,
        parent: Option<(usize, Weak<dyn CancelLink>)>,
        report_uncaught: bool,
    ) -> Self {
        let id = options.next_id();
        match &parent {
            Some((parent_id, _)) => options.debug(id, || format!("New by Promise@{parent_id}")),
            None => options.debug(id, || "New".to_owned()),
        }
        Promise {
            core: Arc::new(Core {
                id,
                options,
                state: AtomicU8::new(PromiseState::Pending as u8),
                parent: parent.map(|(_, link)| link),
                report_uncaught,
                inner: Mutex::new(Inner::new()),
            }),
        }
    }

    /// A pending promise linked to `parent` for cancellation.
    pub(crate) fn derived<P: Clone + Send + 'static>(parent: &Promise<P>) -> Self {
        let link: Weak<dyn CancelLink> = Arc::downgrade(&parent.core) as Weak<dyn CancelLink>;
        Self::build(parent.core.options.clone(), Some((parent.id(), link)), true)
    }

    /// A pending promise without a body, settled by whoever holds a clone.
    pub fn pending() -> Self {
        Self::pending_with(default_options())
    }

    pub fn pending_with(options: PromiseOptions) -> Self {
        Self::build(options, None, true)
    }

    /// Runs `body` on the default work executor.
    ///
    /// The body settles the promise it is handed. Returning `Err` or
    /// panicking rejects it.
    pub fn new<F>(body: F) -> Self
    where
        F: FnOnce(&Promise<V>) -> Result<(), Error> + Send + 'static,
    {
        Self::with_options(default_options(), body)
    }

    pub fn with_options<F>(options: PromiseOptions, body: F) -> Self
    where
        F: FnOnce(&Promise<V>) -> Result<(), Error> + Send + 'static,
    {
        let promise = Self::pending_with(options);
        let worker = promise.clone();
        promise.core.log(|| "Execute called".to_owned());
        let task = promise
            .core
            .options
            .executor()
            .submit(Box::new(move || worker.execute(body)));
        let raise_error = {
            let mut inner = promise.core.inner.lock();
            inner.task = Some(task.clone());
            match promise.core.state() {
                PromiseState::Canceled => Some(inner.raise_on_cancel),
                _ => None,
            }
        };
        // canceled before the handle was recorded
        if let Some(raise_error) = raise_error {
            promise.core.interrupt(&task, raise_error);
        }
        promise
    }

    /// Runs `f` on the default work executor and resolves with its result.
    pub fn spawn<F>(f: F) -> Self
    where
        F: FnOnce() -> Result<V, Error> + Send + 'static,
    {
        Self::spawn_with(default_options(), f)
    }

    pub fn spawn_with<F>(options: PromiseOptions, f: F) -> Self
    where
        F: FnOnce() -> Result<V, Error> + Send + 'static,
    {
        Self::with_options(options, move |promise| {
            promise.resolve(f()?);
            Ok(())
        })
    }

    fn execute<F>(&self, body: F)
    where
        F: FnOnce(&Promise<V>) -> Result<(), Error>,
    {
        self.core.log(|| "Executing".to_owned());
        match panic::catch_unwind(AssertUnwindSafe(|| body(self))) {
            Ok(Ok(())) => self.core.log(|| "Executed".to_owned()),
            Ok(Err(error)) => {
                self.core.log(|| format!("Execution failed, Error={error}"));
                self.reject(error);
            }
            Err(payload) => {
                let error = Error::from_panic(payload);
                self.core.log(|| format!("Execution panicked, Error={error}"));
                self.reject(error);
            }
        }
    }

    /// Fulfills the promise. Ignored unless the promise is still pending.
    pub fn resolve(&self, value: V) {
        self.core.resolve(value);
    }

    /// Rejects the promise with an error that originates here.
    ///
    /// Ignored unless the promise is pending, or canceled with `raise_error`.
    pub fn reject(&self, error: Error) {
        self.core.reject(Rejection::origin(error), true);
    }

    /// Rejects with an error handed down from the parent.
    pub(crate) fn pass(&self, rejection: Rejection) {
        self.core.reject(rejection, false);
    }

    pub(crate) fn register(&self, handler: Handler<V>) {
        self.core.register(handler);
    }

    /// Records `child` as the promise whose outcome this one follows, so
    /// cancelling this promise cancels it too.
    pub(crate) fn track_chain_child<R: Clone + Send + 'static>(&self, child: &Promise<R>) {
        let link: Arc<dyn CancelLink> = child.core.clone() as Arc<dyn CancelLink>;
        let canceled = {
            let mut inner = self.core.inner.lock();
            match self.core.state() {
                PromiseState::Pending => {
                    inner.chain_child = Some(link);
                    None
                }
                PromiseState::Canceled => Some(inner.raise_on_cancel),
                _ => None,
            }
        };
        if let Some(raise_error) = canceled {
            child.cancel(raise_error);
        }
    }

    /// Cancels a pending promise.
    ///
    /// Cancellation spreads to the promise this one follows through `chain`
    /// and up to its parent. A background body that has not started yet is
    /// skipped; a running body keeps running but its outcome is ignored. With
    /// `raise_error` the promise still rejects with [`Error::Canceled`], so
    /// downstream catch handlers see the cancellation.
    pub fn cancel(&self, raise_error: bool) {
        self.core.cancel(raise_error);
    }

    /// Cancels the promise if it is still pending after `duration`.
    ///
    /// Each call schedules its own independent check.
    pub fn timeout(&self, duration: Duration, raise_error: bool) -> Self {
        self.core
            .log(|| format!("Timeout called, State={}", self.state()));
        if self.state() != PromiseState::Pending {
            return self.clone();
        }
        let target = Arc::downgrade(&self.core);
        self.core.options.executor().schedule(
            duration,
            Box::new(move || {
                let Some(core) = target.upgrade() else {
                    return;
                };
                if core.state() == PromiseState::Pending {
                    core.log(|| "Timeout, canceling".to_owned());
                    core.cancel(raise_error);
                } else {
                    core.log(|| format!("Timeout ignored, State={}", core.state()));
                }
            }),
        );
        self.clone()
    }

    pub fn state(&self) -> PromiseState {
        self.core.state()
    }

    /// `true` once the promise left `Pending`.
    pub fn is_done(&self) -> bool {
        self.state() != PromiseState::Pending
    }

    /// Lets a running body notice that nobody wants its result any more.
    pub fn is_canceled(&self) -> bool {
        matches!(
            self.state(),
            PromiseState::Canceled | PromiseState::RejectedOnCancel
        )
    }

    /// Whether a catch handler consumed this promise's rejection, here or
    /// anywhere along the error's lineage.
    pub fn is_observed(&self) -> bool {
        self.core
            .inner
            .lock()
            .rejection
            .as_ref()
            .is_some_and(|rejection| rejection.trail.is_observed())
    }

    /// Whether this promise's own body or continuation produced its error.
    pub fn is_error_root(&self) -> bool {
        self.core.inner.lock().error_root
    }

    pub fn id(&self) -> usize {
        self.core.id
    }

    pub fn options(&self) -> &PromiseOptions {
        &self.core.options
    }

    pub(crate) fn log(&self, message: impl FnOnce() -> String) {
        self.core.log(message);
    }
}

impl<V> fmt::Debug for Promise<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("id", &self.core.id)
            .field(
                "state",
                &PromiseState::from_u8(self.core.state.load(Ordering::Acquire)),
            )
            .finish()
    }
}

/// A promise already fulfilled with `value`.
pub fn resolve_immediate<V: Clone + Send + 'static>(value: V) -> Promise<V> {
    let promise = Promise::pending();
    promise.resolve(value);
    promise
}

/// A promise already rejected with `error`.
///
/// The rejection itself is never reported as uncaught; promises derived from
/// it still are.
pub fn reject_immediate<V: Clone + Send + 'static>(error: Error) -> Promise<V> {
    let promise = Promise::build(default_options(), None, false);
    promise.reject(error);
    promise
}
