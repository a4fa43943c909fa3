//! Cache storage.
//!
//! [`CacheStore`] is the byte-level contract; [`MemoryStore`] is the
//! in-process LRU implementation with sliding and absolute expiry.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use metrics::counter;
use time::OffsetDateTime;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::config::CacheConfig;
use super::error::CacheStoreError;
use super::lock::mutex_lock;
use super::policy::CachePolicy;

const SOURCE: &str = "cache::store";
const METRIC_STORE_EVICT: &str = "dispatch_cache_store_evict_total";
const METRIC_STORE_EXPIRED: &str = "dispatch_cache_store_expired_total";

/// Expiration parameters for one stored entry.
///
/// Any combination may be set; whichever deadline passes first expires the
/// entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheEntryOptions {
    pub sliding_expiration: Option<Duration>,
    pub absolute_expiration: Option<OffsetDateTime>,
    pub absolute_expiration_relative_to_now: Option<Duration>,
}

impl From<&CachePolicy> for CacheEntryOptions {
    fn from(policy: &CachePolicy) -> Self {
        Self {
            sliding_expiration: policy.sliding_expiration,
            absolute_expiration: policy.absolute_expiration,
            absolute_expiration_relative_to_now: policy.absolute_expiration_relative_to_now,
        }
    }
}

/// Byte-oriented key/value store with TTL semantics.
///
/// Implementations must tolerate concurrent use from many in-flight
/// dispatches. `remove` of an absent key succeeds.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str, cancel: &CancellationToken)
    -> Result<Option<Bytes>, CacheStoreError>;

    async fn set(
        &self,
        key: &str,
        value: Bytes,
        options: &CacheEntryOptions,
        cancel: &CancellationToken,
    ) -> Result<(), CacheStoreError>;

    async fn remove(&self, key: &str, cancel: &CancellationToken) -> Result<(), CacheStoreError>;
}

struct StoredEntry {
    payload: Bytes,
    sliding: Option<Duration>,
    deadline: Option<Instant>,
    last_access: Instant,
}

impl StoredEntry {
    fn is_expired(&self, now: Instant) -> bool {
        let past_deadline = self.deadline.is_some_and(|deadline| now >= deadline);
        let idle = self
            .sliding
            .is_some_and(|window| now.duration_since(self.last_access) >= window);
        past_deadline || idle
    }
}

enum Deadline {
    Never,
    At(Instant),
    Elapsed,
}

fn absolute_deadline(options: &CacheEntryOptions, now: Instant) -> Deadline {
    let at = match options.absolute_expiration {
        Some(at) => {
            let remaining = at - OffsetDateTime::now_utc();
            if !remaining.is_positive() {
                return Deadline::Elapsed;
            }
            Duration::try_from(remaining)
                .ok()
                .and_then(|remaining| now.checked_add(remaining))
        }
        None => None,
    };
    let relative = options
        .absolute_expiration_relative_to_now
        .and_then(|window| now.checked_add(window));

    match (at, relative) {
        (Some(at), Some(relative)) => Deadline::At(at.min(relative)),
        (Some(deadline), None) | (None, Some(deadline)) => Deadline::At(deadline),
        (None, None) => Deadline::Never,
    }
}

fn ensure_active(cancel: &CancellationToken) -> Result<(), CacheStoreError> {
    if cancel.is_cancelled() {
        return Err(CacheStoreError::Cancelled);
    }
    Ok(())
}

/// In-process LRU store.
///
/// Expiry is checked lazily on read; a hit refreshes the sliding window.
/// Time comes from the tokio clock.
pub struct MemoryStore {
    entries: Mutex<LruCache<String, StoredEntry>>,
}

impl MemoryStore {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.store_capacity_non_zero())
    }

    /// Entries held, including expired ones not yet read.
    pub fn len(&self) -> usize {
        mutex_lock(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        mutex_lock(&self.entries, SOURCE, "clear").clear();
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Bytes>, CacheStoreError> {
        ensure_active(cancel)?;
        let now = Instant::now();
        let mut entries = mutex_lock(&self.entries, SOURCE, "get");

        match entries.get_mut(key) {
            None => return Ok(None),
            Some(entry) if !entry.is_expired(now) => {
                entry.last_access = now;
                return Ok(Some(entry.payload.clone()));
            }
            Some(_) => {}
        }

        entries.pop(key);
        counter!(METRIC_STORE_EXPIRED).increment(1);
        debug!(key, "Expired cache entry dropped");
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        value: Bytes,
        options: &CacheEntryOptions,
        cancel: &CancellationToken,
    ) -> Result<(), CacheStoreError> {
        ensure_active(cancel)?;
        let now = Instant::now();
        let deadline = match absolute_deadline(options, now) {
            Deadline::Never => None,
            Deadline::At(deadline) => Some(deadline),
            Deadline::Elapsed => {
                mutex_lock(&self.entries, SOURCE, "set.elapsed").pop(key);
                return Ok(());
            }
        };
        let entry = StoredEntry {
            payload: value,
            sliding: options.sliding_expiration,
            deadline,
            last_access: now,
        };

        let evicted = mutex_lock(&self.entries, SOURCE, "set").push(key.to_owned(), entry);
        if let Some((evicted_key, _)) = evicted
            && evicted_key != key
        {
            counter!(METRIC_STORE_EVICT).increment(1);
            debug!(key = %evicted_key, "Cache entry evicted at capacity");
        }
        Ok(())
    }

    async fn remove(&self, key: &str, cancel: &CancellationToken) -> Result<(), CacheStoreError> {
        ensure_active(cancel)?;
        mutex_lock(&self.entries, SOURCE, "remove").pop(key);
        Ok(())
    }
}
