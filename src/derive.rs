//! Operators that build new promises from a parent's settlement.
//!
//! Each operator comes in two flavours: the plain one runs its continuation
//! on whichever thread settles the parent (or registers the handler, if the
//! parent already settled), the `_on_ui` one posts it to the options' UI
//! executor.
use crate::error::Error;
use crate::executor::UiExecutor;
use crate::promise::{Handler, Promise};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Runs a continuation, turning a panic into an error.
fn invoke<T>(f: impl FnOnce() -> Result<T, Error>) -> Result<T, Error> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(Error::from_panic(payload)),
    }
}

fn run_on(ui: Option<Arc<dyn UiExecutor>>, job: impl FnOnce() + Send + 'static) {
    match ui {
        Some(ui) => ui.post(Box::new(job)),
        None => job(),
    }
}

impl<V: Clone + Send + 'static> Promise<V> {
    /// Maps the value once this promise fulfills.
    ///
    /// If this promise rejects, the returned promise rejects with the same
    /// error and `f` never runs. If `f` fails, the returned promise rejects
    /// with that failure.
    ///
    /// # Examples
    ///
    /// ```
    /// use threaded_promise::resolve_immediate;
    ///
    /// let doubled = resolve_immediate(21).then(|v| Ok(v * 2));
    /// assert_eq!(doubled.await_value().unwrap(), 42);
    /// ```
    pub fn then<R, F>(&self, f: F) -> Promise<R>
    where
        R: Clone + Send + 'static,
        F: FnOnce(V) -> Result<R, Error> + Send + 'static,
    {
        self.then_internal(f, None)
    }

    /// Like [`then`](Self::then), with `f` running on the UI executor.
    pub fn then_on_ui<R, F>(&self, f: F) -> Promise<R>
    where
        R: Clone + Send + 'static,
        F: FnOnce(V) -> Result<R, Error> + Send + 'static,
    {
        self.then_internal(f, Some(self.options().ui_executor().clone()))
    }

    fn then_internal<R, F>(&self, f: F, ui: Option<Arc<dyn UiExecutor>>) -> Promise<R>
    where
        R: Clone + Send + 'static,
        F: FnOnce(V) -> Result<R, Error> + Send + 'static,
    {
        self.log(|| "Then called".to_owned());
        let child = Promise::derived(self);
        let target = child.clone();
        self.register(Handler::deriving(move |outcome| match outcome {
            Ok(value) => run_on(ui, move || match invoke(|| f(value)) {
                Ok(result) => target.resolve(result),
                Err(error) => {
                    target.log(|| format!("Then action failed, Error={error}"));
                    target.reject(error);
                }
            }),
            Err(rejection) => target.pass(rejection),
        }));
        child
    }

    /// Handles a rejection.
    ///
    /// A fulfilled value passes through untouched. On rejection `f` runs and
    /// the returned promise rejects with the original error, so a later catch
    /// sees it as well; if `f` fails, its error replaces the original one.
    ///
    /// # Examples
    ///
    /// ```
    /// use threaded_promise::{reject_immediate, Error};
    ///
    /// let caught = reject_immediate::<i32>(Error::msg("boom")).catch(|error| {
    ///     assert_eq!(error.to_string(), "boom");
    ///     Ok(())
    /// });
    /// assert!(caught.await_value().is_err());
    /// ```
    pub fn catch<F>(&self, f: F) -> Promise<V>
    where
        F: FnOnce(Error) -> Result<(), Error> + Send + 'static,
    {
        self.catch_internal(f, None)
    }

    /// Like [`catch`](Self::catch), with `f` running on the UI executor.
    pub fn catch_on_ui<F>(&self, f: F) -> Promise<V>
    where
        F: FnOnce(Error) -> Result<(), Error> + Send + 'static,
    {
        self.catch_internal(f, Some(self.options().ui_executor().clone()))
    }

    fn catch_internal<F>(&self, f: F, ui: Option<Arc<dyn UiExecutor>>) -> Promise<V>
    where
        F: FnOnce(Error) -> Result<(), Error> + Send + 'static,
    {
        self.log(|| "Catch called".to_owned());
        let child = Promise::derived(self);
        let target = child.clone();
        self.register(Handler::observing(move |outcome| match outcome {
            Ok(value) => target.resolve(value),
            Err(rejection) => run_on(ui, move || {
                let error = rejection.error.clone();
                match invoke(move || f(error)) {
                    Ok(()) => target.pass(rejection),
                    Err(error) => {
                        target.log(|| format!("Fail handler failed, Error={error}"));
                        target.reject(error);
                    }
                }
            }),
        }));
        child
    }

    /// Continues with another promise produced from the value.
    ///
    /// The returned promise settles like the promise `f` returns, which is
    /// canceled along with it.
    pub fn chain<R, F>(&self, f: F) -> Promise<R>
    where
        R: Clone + Send + 'static,
        F: FnOnce(V) -> Result<Promise<R>, Error> + Send + 'static,
    {
        self.chain_internal(f, None)
    }

    /// Like [`chain`](Self::chain), with `f` running on the UI executor.
    pub fn chain_on_ui<R, F>(&self, f: F) -> Promise<R>
    where
        R: Clone + Send + 'static,
        F: FnOnce(V) -> Result<Promise<R>, Error> + Send + 'static,
    {
        self.chain_internal(f, Some(self.options().ui_executor().clone()))
    }

    fn chain_internal<R, F>(&self, f: F, ui: Option<Arc<dyn UiExecutor>>) -> Promise<R>
    where
        R: Clone + Send + 'static,
        F: FnOnce(V) -> Result<Promise<R>, Error> + Send + 'static,
    {
        self.log(|| "ThenChain called".to_owned());
        let child = Promise::derived(self);
        let target = child.clone();
        self.register(Handler::deriving(move |outcome| match outcome {
            Ok(value) => run_on(ui, move || match invoke(|| f(value)) {
                Ok(inner) => target.follow(&inner),
                Err(error) => {
                    target.log(|| format!("ThenChain action failed, Error={error}"));
                    target.reject(error);
                }
            }),
            Err(rejection) => target.pass(rejection),
        }));
        child
    }

    fn follow(&self, inner: &Promise<V>) {
        self.track_chain_child(inner);
        let resolved = self.clone();
        let rejected = self.clone();
        inner
            .then(move |value| {
                resolved.resolve(value);
                Ok(())
            })
            .catch(move |error| {
                rejected.reject(error);
                Ok(())
            });
    }

    /// Runs `f` with the outcome once the promise settles.
    ///
    /// `done` ends a chain: it derives nothing and does not count as handling
    /// a rejection.
    pub fn done<F>(&self, f: F)
    where
        F: FnOnce(Result<V, Error>) + Send + 'static,
    {
        self.done_internal(f, None)
    }

    /// Like [`done`](Self::done), with `f` running on the UI executor.
    pub fn done_on_ui<F>(&self, f: F)
    where
        F: FnOnce(Result<V, Error>) + Send + 'static,
    {
        self.done_internal(f, Some(self.options().ui_executor().clone()))
    }

    fn done_internal<F>(&self, f: F, ui: Option<Arc<dyn UiExecutor>>)
    where
        F: FnOnce(Result<V, Error>) + Send + 'static,
    {
        let logger = self.options().logger().clone();
        self.register(Handler::sink(move |outcome| {
            let outcome = outcome.map_err(|rejection| rejection.error);
            run_on(ui, move || {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || f(outcome))) {
                    logger.error("Done action panicked", &Error::from_panic(payload));
                }
            });
        }));
    }
}
