//! Fan-in over several promises, built only on `then`/`catch`.
use crate::options::{default_options, PromiseOptions};
use crate::promise::Promise;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Fulfills with every value, in input order, once all inputs fulfill.
/// Rejects with the first rejection; the other inputs keep running.
///
/// # Examples
///
/// ```
/// use threaded_promise::{all, Promise};
/// use std::{thread, time::Duration};
///
/// let slow = Promise::spawn(|| { thread::sleep(Duration::from_millis(40)); Ok("A") });
/// let fast = Promise::spawn(|| { thread::sleep(Duration::from_millis(10)); Ok("B") });
/// assert_eq!(all(vec![slow, fast]).await_value().unwrap(), vec!["A", "B"]);
/// ```
pub fn all<V: Clone + Send + 'static>(promises: Vec<Promise<V>>) -> Promise<Vec<V>> {
    all_with(default_options(), promises)
}

pub fn all_with<V: Clone + Send + 'static>(
    options: PromiseOptions,
    promises: Vec<Promise<V>>,
) -> Promise<Vec<V>> {
    let output = Promise::pending_with(options);
    if promises.is_empty() {
        output.resolve(Vec::new());
        return output;
    }
    let slots: Arc<Mutex<Vec<Option<V>>>> =
        Arc::new(Mutex::new(promises.iter().map(|_| None).collect()));
    let remaining = Arc::new(AtomicUsize::new(promises.len()));
    for (index, promise) in promises.iter().enumerate() {
        let slots = slots.clone();
        let remaining = remaining.clone();
        let resolved = output.clone();
        let rejected = output.clone();
        promise
            .then(move |value| {
                slots.lock()[index] = Some(value);
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    let values: Option<Vec<V>> = slots.lock().iter_mut().map(Option::take).collect();
                    if let Some(values) = values {
                        resolved.resolve(values);
                    }
                }
                Ok(())
            })
            .catch(move |error| {
                rejected.reject(error);
                Ok(())
            });
    }
    output
}

/// Settles like whichever input settles first; later outcomes are dropped.
/// An empty input never settles.
pub fn race<V: Clone + Send + 'static>(promises: Vec<Promise<V>>) -> Promise<V> {
    race_with(default_options(), promises)
}

pub fn race_with<V: Clone + Send + 'static>(
    options: PromiseOptions,
    promises: Vec<Promise<V>>,
) -> Promise<V> {
    let output = Promise::pending_with(options);
    let settled = Arc::new(AtomicBool::new(false));
    for promise in &promises {
        let won_with_value = settled.clone();
        let won_with_error = settled.clone();
        let resolved = output.clone();
        let rejected = output.clone();
        promise
            .then(move |value| {
                if !won_with_value.swap(true, Ordering::AcqRel) {
                    resolved.resolve(value);
                }
                Ok(())
            })
            .catch(move |error| {
                if !won_with_error.swap(true, Ordering::AcqRel) {
                    rejected.reject(error);
                }
                Ok(())
            });
    }
    output
}
