//! Top-level error for the binary and for composition code.

use thiserror::Error;

use crate::cache::RegistryError;
use crate::config::LoadError;
use crate::dispatch::DispatchError;
use crate::infra::error::InfraError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapped_errors_are_transparent() {
        let err = AppError::from(DispatchError::NoHandler { request: "Todos" });
        assert_eq!(err.to_string(), "no handler registered for `Todos`");

        let err = AppError::from(RegistryError::DuplicateCachePolicy { query: "Todos" });
        assert_eq!(
            err.to_string(),
            "a cache policy is already registered for `Todos`"
        );
    }

    #[test]
    fn unexpected_carries_message() {
        let err = AppError::unexpected("demo scenario diverged");
        assert_eq!(err.to_string(), "unexpected error: demo scenario diverged");
    }
}
