//! Typed access over a byte-level [`CacheStore`].
//!
//! Values are serialized to JSON here; stores only ever see bytes.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};
use tokio_util::sync::CancellationToken;

use super::error::CacheError;
use super::keys::CacheKey;
use super::store::{CacheEntryOptions, CacheStore};

#[derive(Clone)]
pub struct TypedCache {
    store: Arc<dyn CacheStore>,
}

impl TypedCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// `Ok(None)` on a miss; a payload of the wrong shape is an error.
    pub async fn get<T: DeserializeOwned>(
        &self,
        key: &CacheKey,
        cancel: &CancellationToken,
    ) -> Result<Option<T>, CacheError> {
        let Some(payload) = self.store.get(key.as_str(), cancel).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&payload)
            .map(Some)
            .map_err(|source| CacheError::Deserialize {
                key: key.clone(),
                source,
            })
    }

    pub async fn set<T: Serialize + Sync + ?Sized>(
        &self,
        key: &CacheKey,
        value: &T,
        options: &CacheEntryOptions,
        cancel: &CancellationToken,
    ) -> Result<(), CacheError> {
        let payload = serde_json::to_vec(value).map_err(|source| CacheError::Serialize {
            key: key.clone(),
            source,
        })?;
        self.store
            .set(key.as_str(), Bytes::from(payload), options, cancel)
            .await?;
        Ok(())
    }

    pub async fn remove(&self, key: &CacheKey, cancel: &CancellationToken) -> Result<(), CacheError> {
        self.store.remove(key.as_str(), cancel).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use serde::Deserialize;

    use super::*;
    use crate::cache::MemoryStore;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Course {
        number: i32,
        title: String,
    }

    fn typed() -> TypedCache {
        TypedCache::new(Arc::new(MemoryStore::new(NonZeroUsize::MIN)))
    }

    #[tokio::test]
    async fn stores_values_as_json() {
        let cache = typed();
        let cancel = CancellationToken::new();
        let key = CacheKey::custom("Course", "5");
        let course = Course {
            number: 5,
            title: "Bio".to_string(),
        };

        cache
            .set(&key, &course, &CacheEntryOptions::default(), &cancel)
            .await
            .expect("set");

        let raw = cache
            .store()
            .get(key.as_str(), &cancel)
            .await
            .expect("raw get")
            .expect("raw payload");
        assert_eq!(&raw[..], br#"{"number":5,"title":"Bio"}"#);

        let cached: Option<Course> = cache.get(&key, &cancel).await.expect("typed get");
        assert_eq!(cached, Some(course));
    }

    #[tokio::test]
    async fn mismatched_shape_is_a_deserialize_error() {
        let cache = typed();
        let cancel = CancellationToken::new();
        let key = CacheKey::custom("Course", "5");
        cache
            .set(&key, &"not a course", &CacheEntryOptions::default(), &cancel)
            .await
            .expect("set");

        let err = cache
            .get::<Course>(&key, &cancel)
            .await
            .expect_err("shape mismatch");
        assert!(matches!(err, CacheError::Deserialize { .. }));
    }

    #[tokio::test]
    async fn absent_key_is_a_miss() {
        let cache = typed();
        let cancel = CancellationToken::new();
        let cached: Option<Course> = cache
            .get(&CacheKey::custom("Course", "404"), &cancel)
            .await
            .expect("get");
        assert!(cached.is_none());
    }
}
