//! Detection of rejections no catch handler ever observed.
//!
//! Every error carries an [`ErrorTrail`] shared by the promise that produced
//! it and every promise it was passed down to. A catch anywhere along that
//! lineage marks the trail observed. When a rejection lands on a promise with
//! nothing downstream, a short bounded poll gives late subscribers a chance to
//! attach a catch before the error is reported.
use crate::options::PromiseOptions;
use crate::promise::Rejection;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

#[derive(Debug, Default)]
pub(crate) struct ErrorTrail {
    observed: AtomicBool,
    reported: AtomicBool,
}

impl ErrorTrail {
    pub(crate) fn observe(&self) {
        self.observed.store(true, Ordering::Release);
    }

    pub(crate) fn is_observed(&self) -> bool {
        self.observed.load(Ordering::Acquire)
    }

    /// `true` for the first caller only.
    fn claim_report(&self) -> bool {
        !self.reported.swap(true, Ordering::AcqRel)
    }
}

pub(crate) fn watch(options: &PromiseOptions, promise: usize, rejection: Rejection) {
    let options = options.clone();
    let executor = options.executor().clone();
    executor.submit(Box::new(move || {
        let Rejection { error, trail } = rejection;
        let policy = options.uncaught_policy();
        for attempt in 1..=policy.attempts {
            if trail.is_observed() {
                options.debug(promise, || "Error caught".to_owned());
                return;
            }
            options.debug(promise, || format!("Wait for catch, Attempt={attempt}"));
            thread::sleep(policy.interval);
        }
        if trail.is_observed() || !trail.claim_report() {
            return;
        }
        options.debug(promise, || format!("No catch, raising uncaught error {error}"));
        (options.uncaught_handler())(error);
    }));
}
