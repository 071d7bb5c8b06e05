//! Blocking access to a promise's outcome, for callers outside any
//! continuation.
use crate::error::Error;
use crate::promise::{Handler, Promise};
use std::sync::mpsc::{sync_channel, RecvTimeoutError};
use std::time::Duration;

impl<V: Clone + Send + 'static> Promise<V> {
    /// Blocks the current thread until the promise settles or `timeout`
    /// elapses.
    ///
    /// - fulfilled: `Ok(Some(value))`
    /// - rejected: `Err(error)` when `throw_on_error`, `Ok(None)` otherwise
    /// - timed out: `Ok(None)`
    ///
    /// A promise canceled without raising never settles; waiting on it
    /// reports [`Error::Canceled`] (or `Ok(None)` without `throw_on_error`)
    /// instead of blocking forever. A waiter that receives a rejection counts
    /// as handling it; one that already timed out does not, so the rejection
    /// is still reported as uncaught.
    ///
    /// # Examples
    ///
    /// ```
    /// use threaded_promise::Promise;
    /// use std::time::Duration;
    ///
    /// let slow = Promise::spawn(|| {
    ///     std::thread::sleep(Duration::from_millis(500));
    ///     Ok(1)
    /// });
    /// assert_eq!(slow.await_promise(true, Some(Duration::from_millis(10))).unwrap(), None);
    /// assert_eq!(slow.await_promise(true, None).unwrap(), Some(1));
    /// ```
    pub fn await_promise(
        &self,
        throw_on_error: bool,
        timeout: Option<Duration>,
    ) -> Result<Option<V>, Error> {
        let (sender, receiver) = sync_channel(1);
        self.register(Handler::sink(move |outcome| match outcome {
            Ok(value) => {
                let _ = sender.send(Ok(value));
            }
            Err(rejection) => {
                // the waiter may have timed out and left
                if sender.send(Err(rejection.error.clone())).is_ok() {
                    rejection.trail.observe();
                }
            }
        }));
        let received = match timeout {
            None => receiver.recv().ok(),
            Some(timeout) => match receiver.recv_timeout(timeout) {
                Ok(outcome) => Some(outcome),
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => None,
            },
        };
        match received {
            Some(Ok(value)) => Ok(Some(value)),
            Some(Err(error)) if throw_on_error => Err(error),
            Some(Err(_)) => Ok(None),
            // handler dropped unfired: canceled without raising
            None if throw_on_error => Err(Error::Canceled),
            None => Ok(None),
        }
    }

    /// Blocks until the promise settles and returns its outcome.
    pub fn await_value(&self) -> Result<V, Error> {
        self.await_promise(true, None)?.ok_or(Error::Canceled)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::Error;
    use crate::options::PromiseOptions;
    use crate::promise::Promise;
    use parking_lot::Mutex;
    use std::sync::mpsc::channel;
    use std::thread;
    use std::time::{Duration, Instant};

    fn quiet_options() -> PromiseOptions {
        PromiseOptions::builder().uncaught_handler(|_| {}).build()
    }

    #[test]
    fn test_await_value_across_threads() {
        let promise = Promise::<String>::pending_with(quiet_options());
        let producer = promise.clone();
        let sender = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            producer.resolve("Hello, thread".to_owned());
        });
        assert_eq!(promise.await_value().unwrap(), "Hello, thread");
        sender.join().expect("The sender thread has panicked");
    }

    #[test]
    fn test_throw_on_error_flag() {
        let promise = Promise::<i32>::pending_with(quiet_options());
        promise.reject(Error::msg("bad"));
        assert_eq!(promise.await_promise(false, None).unwrap(), None);
        assert_eq!(
            promise.await_promise(true, None).unwrap_err().to_string(),
            "bad"
        );
    }

    #[test]
    fn test_timeout_returns_none() {
        let promise = Promise::<i32>::pending_with(quiet_options());
        let started = Instant::now();
        let outcome = promise.await_promise(true, Some(Duration::from_millis(30)));
        assert_eq!(outcome.unwrap(), None);
        assert!(started.elapsed() >= Duration::from_millis(30));
        promise.resolve(1);
        assert_eq!(promise.await_value().unwrap(), 1);
    }

    #[test]
    fn test_canceled_without_raise_does_not_hang() {
        let promise = Promise::<i32>::pending_with(quiet_options());
        let waiter = promise.clone();
        let handle = thread::spawn(move || waiter.await_value());
        thread::sleep(Duration::from_millis(30));
        promise.cancel(false);
        let outcome = handle.join().expect("The waiter thread has panicked");
        assert!(outcome.unwrap_err().is_canceled());
        assert_eq!(promise.await_promise(false, None).unwrap(), None);
    }

    #[test]
    fn test_rejection_after_waiter_left_is_reported() {
        let (tx, rx) = channel();
        let tx = Mutex::new(tx);
        let options = PromiseOptions::builder()
            .uncaught_handler(move |error| {
                let _ = tx.lock().send(error.to_string());
            })
            .build();
        let promise = Promise::<i32>::pending_with(options);
        let outcome = promise.await_promise(true, Some(Duration::from_millis(10)));
        assert_eq!(outcome.unwrap(), None);
        promise.reject(Error::msg("late"));
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), "late");
        assert!(!promise.is_observed());
    }

    #[test]
    fn test_waiter_receiving_rejection_handles_it() {
        let (tx, rx) = channel();
        let tx = Mutex::new(tx);
        let options = PromiseOptions::builder()
            .uncaught_handler(move |error| {
                let _ = tx.lock().send(error.to_string());
            })
            .build();
        let promise = Promise::<i32>::pending_with(options);
        let producer = promise.clone();
        let sender = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            producer.reject(Error::msg("seen"));
        });
        let error = promise.await_promise(true, Some(Duration::from_secs(2))).unwrap_err();
        assert_eq!(error.to_string(), "seen");
        sender.join().expect("The sender thread has panicked");
        assert!(promise.is_observed());
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }
}
