//! Invalidation failure events.
//!
//! A failed remove or reload never fails the command that triggered it.
//! The failure is recorded here instead, in a bounded queue the host drains
//! for inspection or retry.

use std::collections::VecDeque;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{counter, gauge};
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use super::config::CacheConfig;
use super::invalidation::InvalidationFailure;
use super::keys::CacheKey;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::events";
const METRIC_QUEUE_LEN: &str = "dispatch_cache_event_queue_len";
const METRIC_DROPPED: &str = "dispatch_cache_event_dropped_total";

/// Monotonic per-process sequence number.
pub type Epoch = u64;

/// Step of an invalidation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureStage {
    Remove,
    Reload,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStage::Remove => "remove",
            FailureStage::Reload => "reload",
        }
    }
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct InvalidationEvent {
    pub id: Uuid,
    pub epoch: Epoch,
    /// Type name of the command whose invalidation failed.
    pub command: &'static str,
    /// Type name of the query whose entry was targeted.
    pub target: &'static str,
    pub key: CacheKey,
    pub stage: FailureStage,
    /// Rendered error; [`DispatchError`](crate::dispatch::DispatchError) is not `Clone`.
    pub error: String,
    pub timestamp: OffsetDateTime,
}

/// Bounded FIFO of [`InvalidationEvent`]s.
///
/// At capacity the oldest event is dropped to admit the newest.
pub struct InvalidationEvents {
    queue: Mutex<VecDeque<InvalidationEvent>>,
    epoch_counter: AtomicU64,
    limit: NonZeroUsize,
}

impl InvalidationEvents {
    pub fn new() -> Self {
        Self::from_config(&CacheConfig::default())
    }

    pub fn with_limit(limit: NonZeroUsize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            epoch_counter: AtomicU64::new(0),
            limit,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::with_limit(config.event_queue_limit_non_zero())
    }

    pub fn next_epoch(&self) -> Epoch {
        self.epoch_counter.fetch_add(1, Ordering::SeqCst)
    }

    pub fn publish(&self, command: &'static str, failure: &InvalidationFailure) -> Epoch {
        let event = InvalidationEvent {
            id: Uuid::new_v4(),
            epoch: self.next_epoch(),
            command,
            target: failure.target,
            key: failure.key.clone(),
            stage: failure.stage,
            error: failure.error.to_string(),
            timestamp: OffsetDateTime::now_utc(),
        };
        let epoch = event.epoch;

        info!(
            event_id = %event.id,
            event_epoch = event.epoch,
            command,
            target = event.target,
            key = %event.key,
            stage = %event.stage,
            "Invalidation failure enqueued"
        );

        let mut queue = mutex_lock(&self.queue, SOURCE, "publish");
        if queue.len() >= self.limit.get()
            && let Some(dropped) = queue.pop_front()
        {
            counter!(METRIC_DROPPED).increment(1);
            warn!(
                event_id = %dropped.id,
                event_epoch = dropped.epoch,
                limit = self.limit.get(),
                "Invalidation event queue full; oldest event dropped"
            );
        }
        queue.push_back(event);
        gauge!(METRIC_QUEUE_LEN).set(queue.len() as f64);
        epoch
    }

    /// Remove up to `limit` events, oldest first.
    pub fn drain(&self, limit: usize) -> Vec<InvalidationEvent> {
        let mut queue = mutex_lock(&self.queue, SOURCE, "drain");
        let count = limit.min(queue.len());
        let drained = queue.drain(..count).collect();
        gauge!(METRIC_QUEUE_LEN).set(queue.len() as f64);
        drained
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.queue, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        mutex_lock(&self.queue, SOURCE, "clear").clear();
        gauge!(METRIC_QUEUE_LEN).set(0.0);
    }
}

impl Default for InvalidationEvents {
    fn default() -> Self {
        Self::new()
    }
}
