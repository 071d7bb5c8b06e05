use std::any::Any;
use std::sync::Arc;
use thiserror::Error;

/// Every way a promise can be rejected.
///
/// Errors are shared between all handlers attached to a rejected promise, so
/// the type is cheap to clone.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A body or continuation failed with a plain message.
    #[error("{0}")]
    Message(String),
    /// A body or continuation failed with an arbitrary error value.
    #[error(transparent)]
    Producer(Arc<dyn std::error::Error + Send + Sync>),
    /// A body or continuation panicked.
    #[error("promise task panicked: {0}")]
    Panicked(String),
    /// The promise was canceled with `raise_error` set.
    #[error("promise was canceled")]
    Canceled,
    /// A rejection nobody caught, re-raised by the default uncaught handler.
    #[error("uncaught promise error: {0}")]
    Uncaught(Box<Error>),
}

impl Error {
    pub fn msg(message: impl Into<String>) -> Self {
        Error::Message(message.into())
    }

    /// Wraps any error type as a producer error.
    pub fn producer<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Producer(Arc::new(error))
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled)
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        Error::Panicked(panic_message(payload.as_ref()))
    }
}

impl From<String> for Error {
    fn from(message: String) -> Self {
        Error::Message(message)
    }
}

impl From<&str> for Error {
    fn from(message: &str) -> Self {
        Error::Message(message.to_owned())
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else if let Some(error) = payload.downcast_ref::<Error>() {
        error.to_string()
    } else {
        "unknown panic payload".to_owned()
    }
}
