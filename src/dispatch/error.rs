use std::error::Error as StdError;

use thiserror::Error;

use crate::cache::CacheError;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Failure raised by a request handler.
///
/// Carried through the pipeline unchanged; never cached.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl HandlerError {
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            message: error.to_string(),
            source: Some(Box::new(error)),
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] HandlerError),
    #[error("cache failure: {0}")]
    Cache(#[from] CacheError),
    #[error("no handler registered for `{request}`")]
    NoHandler { request: &'static str },
    #[error("dispatch cancelled")]
    Cancelled,
}

impl DispatchError {
    pub fn is_cancelled(&self) -> bool {
        match self {
            DispatchError::Cancelled => true,
            DispatchError::Cache(err) => err.is_cancelled(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[test]
    fn handler_error_keeps_source_chain() {
        let err = HandlerError::new(io::Error::other("database offline"));
        assert_eq!(err.to_string(), "database offline");
        assert!(err.source().is_some());
    }

    #[test]
    fn handler_error_from_message_has_no_source() {
        let err = HandlerError::message("title must not be empty");
        assert_eq!(err.to_string(), "title must not be empty");
        assert!(err.source().is_none());
    }

    #[test]
    fn handler_errors_are_transparent_in_dispatch() {
        let err = DispatchError::from(HandlerError::message("boom"));
        assert_eq!(err.to_string(), "boom");
        assert!(!err.is_cancelled());
    }
}
