use thiserror::Error;

use super::keys::CacheKey;

/// Failure reported by a [`CacheStore`](super::CacheStore) backend.
#[derive(Debug, Error)]
pub enum CacheStoreError {
    #[error("cache store unavailable: {message}")]
    Unavailable { message: String },
    #[error("cache operation cancelled")]
    Cancelled,
}

impl CacheStoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Store(#[from] CacheStoreError),
    #[error("failed to serialize cache entry `{key}`")]
    Serialize {
        key: CacheKey,
        source: serde_json::Error,
    },
    #[error("failed to deserialize cache entry `{key}`")]
    Deserialize {
        key: CacheKey,
        source: serde_json::Error,
    },
}

impl CacheError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CacheError::Store(CacheStoreError::Cancelled))
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("a cache policy is already registered for `{query}`")]
    DuplicateCachePolicy { query: &'static str },
}
