//! Capabilities injected into every promise, and the process-wide defaults.
use crate::error::Error;
use crate::executor::{CachedThreadPool, PoolUiExecutor, UiExecutor, WorkExecutor};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Receives rejections that no catch handler observed.
pub type UncaughtHandler = Arc<dyn Fn(Error) + Send + Sync>;

/// Debug and error sink for promise internals.
///
/// `debug` is only called when the options' debug flag is set. `error`
/// always runs; it receives panics contained in `done` sinks and the default
/// uncaught handler's report.
pub trait Logger: Send + Sync {
    fn debug(&self, promise: usize, message: &str);
    fn error(&self, message: &str, error: &Error);
}

/// Forwards to the `tracing` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn debug(&self, promise: usize, message: &str) {
        tracing::debug!(promise, thread = ?std::thread::current().id(), "{message}");
    }

    fn error(&self, message: &str, error: &Error) {
        tracing::error!(%error, "{message}");
    }
}

/// How long uncaught detection waits for a catch to show up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UncaughtPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for UncaughtPolicy {
    fn default() -> Self {
        UncaughtPolicy {
            attempts: 5,
            interval: Duration::from_millis(10),
        }
    }
}

impl UncaughtPolicy {
    /// Upper bound of the detection window.
    pub fn window(&self) -> Duration {
        self.interval.saturating_mul(self.attempts)
    }
}

/// Immutable configuration shared by a promise and everything derived from it.
#[derive(Clone)]
pub struct PromiseOptions {
    executor: Arc<dyn WorkExecutor>,
    ui_executor: Arc<dyn UiExecutor>,
    logger: Arc<dyn Logger>,
    uncaught_handler: Option<UncaughtHandler>,
    uncaught_policy: UncaughtPolicy,
    debug: bool,
    ids: Arc<AtomicUsize>,
}

impl PromiseOptions {
    pub fn builder() -> PromiseOptionsBuilder {
        PromiseOptionsBuilder::default()
    }

    pub fn executor(&self) -> &Arc<dyn WorkExecutor> {
        &self.executor
    }

    pub fn ui_executor(&self) -> &Arc<dyn UiExecutor> {
        &self.ui_executor
    }

    pub fn logger(&self) -> &Arc<dyn Logger> {
        &self.logger
    }

    pub fn uncaught_policy(&self) -> UncaughtPolicy {
        self.uncaught_policy
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    /// The handler uncaught rejections go to: this options' own handler, the
    /// process-wide one, or the default that logs and panics.
    pub fn uncaught_handler(&self) -> UncaughtHandler {
        if let Some(handler) = &self.uncaught_handler {
            return handler.clone();
        }
        if let Some(handler) = GLOBAL_UNCAUGHT.read().clone() {
            return handler;
        }
        let logger = self.logger.clone();
        Arc::new(move |error: Error| {
            logger.error("Promise uncaught error", &error);
            panic!("{}", Error::Uncaught(Box::new(error)));
        })
    }

    pub(crate) fn debug(&self, promise: usize, message: impl FnOnce() -> String) {
        if self.debug {
            self.logger.debug(promise, &message());
        }
    }

    pub(crate) fn next_id(&self) -> usize {
        self.ids.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl Default for PromiseOptions {
    fn default() -> Self {
        PromiseOptions::builder().build()
    }
}

impl fmt::Debug for PromiseOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromiseOptions")
            .field("debug", &self.debug)
            .field("uncaught_policy", &self.uncaught_policy)
            .field("has_uncaught_handler", &self.uncaught_handler.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct PromiseOptionsBuilder {
    executor: Option<Arc<dyn WorkExecutor>>,
    ui_executor: Option<Arc<dyn UiExecutor>>,
    logger: Option<Arc<dyn Logger>>,
    uncaught_handler: Option<UncaughtHandler>,
    uncaught_policy: UncaughtPolicy,
    debug: bool,
}

impl PromiseOptionsBuilder {
    pub fn executor(mut self, executor: Arc<dyn WorkExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn ui_executor(mut self, ui_executor: Arc<dyn UiExecutor>) -> Self {
        self.ui_executor = Some(ui_executor);
        self
    }

    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn uncaught_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(Error) + Send + Sync + 'static,
    {
        self.uncaught_handler = Some(Arc::new(handler));
        self
    }

    pub fn uncaught_policy(mut self, policy: UncaughtPolicy) -> Self {
        self.uncaught_policy = policy;
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Missing capabilities fall back to a fresh [`CachedThreadPool`], a
    /// [`PoolUiExecutor`] on that pool and the [`TracingLogger`].
    pub fn build(self) -> PromiseOptions {
        let executor = self
            .executor
            .unwrap_or_else(|| Arc::new(CachedThreadPool::new()));
        let ui_executor = self
            .ui_executor
            .unwrap_or_else(|| Arc::new(PoolUiExecutor::new(executor.clone())));
        PromiseOptions {
            executor,
            ui_executor,
            logger: self.logger.unwrap_or_else(|| Arc::new(TracingLogger)),
            uncaught_handler: self.uncaught_handler,
            uncaught_policy: self.uncaught_policy,
            debug: self.debug,
            ids: Arc::new(AtomicUsize::new(0)),
        }
    }
}

static DEFAULT_OPTIONS: Lazy<RwLock<Option<PromiseOptions>>> = Lazy::new(|| RwLock::new(None));
static GLOBAL_UNCAUGHT: Lazy<RwLock<Option<UncaughtHandler>>> = Lazy::new(|| RwLock::new(None));

/// The options used by constructors that do not take any. Built on first use
/// unless [`install_default_options`] ran before.
pub fn default_options() -> PromiseOptions {
    if let Some(options) = DEFAULT_OPTIONS.read().as_ref() {
        return options.clone();
    }
    DEFAULT_OPTIONS
        .write()
        .get_or_insert_with(PromiseOptions::default)
        .clone()
}

/// Replaces the process defaults. Promises already built keep their options.
pub fn install_default_options(options: PromiseOptions) {
    *DEFAULT_OPTIONS.write() = Some(options);
}

/// Drops the installed defaults; the next use builds fresh ones.
pub fn reset_default_options() {
    DEFAULT_OPTIONS.write().take();
}

/// Installs the process-wide uncaught error handler, used by options that do
/// not carry their own.
pub fn set_uncaught_error_handler<F>(handler: F)
where
    F: Fn(Error) + Send + Sync + 'static,
{
    *GLOBAL_UNCAUGHT.write() = Some(Arc::new(handler));
}

/// Restores the default log-and-panic uncaught handler.
pub fn reset_uncaught_error_handler() {
    GLOBAL_UNCAUGHT.write().take();
}
