//! Promises backed by worker threads.
//!
//! A [`Promise`] is settled once, from any thread, and consumers attach
//! continuations from any other thread with [`then`](Promise::then),
//! [`catch`](Promise::catch), [`chain`](Promise::chain) and
//! [`done`](Promise::done). Promises can be canceled, time out, and be
//! combined with [`all`] and [`race`]. Rejections that no catch handler ever
//! sees are reported to an uncaught error handler after a short grace period.
//!
//! # Examples
//!
//! ```
//! use threaded_promise::{Error, Promise};
//!
//! let answer = Promise::spawn(|| Ok(6))
//!     .then(|v| Ok(v * 7))
//!     .catch(|error: Error| {
//!         eprintln!("failed: {error}");
//!         Ok(())
//!     });
//! assert_eq!(answer.await_value().unwrap(), 42);
//! ```
mod combinators;
mod derive;
mod error;
pub mod executor;
mod options;
mod promise;
mod state;
mod uncaught;
mod wait;

pub use combinators::{all, all_with, race, race_with};
pub use error::Error;
pub use executor::{
    CachedThreadPool, PoolUiExecutor, Task, TaskHandle, UiExecutor, UiThread, WorkExecutor,
};
pub use options::{
    default_options, install_default_options, reset_default_options,
    reset_uncaught_error_handler, set_uncaught_error_handler, Logger, PromiseOptions,
    PromiseOptionsBuilder, TracingLogger, UncaughtHandler, UncaughtPolicy,
};
pub use promise::{reject_immediate, resolve_immediate, Promise};
pub use state::PromiseState;
