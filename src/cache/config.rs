//! Cache configuration.
//!
//! Controls the read-through and invalidation stages via `dispatch-cache.toml`.

use std::num::NonZeroUsize;

use serde::Deserialize;

// Default values for cache configuration
const DEFAULT_STORE_CAPACITY: usize = 1024;
const DEFAULT_EVENT_QUEUE_LIMIT: usize = 256;

/// What a read does with an entry that no longer deserializes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorruptEntryPolicy {
    /// Fail the query with the deserialization error.
    #[default]
    Propagate,
    /// Log, then recompute as on a miss.
    Miss,
}

/// How concurrent auto-reloads are awaited after invalidation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReloadFailureMode {
    /// Await every reload and report all failures.
    #[default]
    Aggregate,
    /// Stop at the first failure; remaining reloads are dropped.
    FailFast,
}

/// Cache configuration from `dispatch-cache.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Master switch; when off every stage passes through.
    pub enabled: bool,
    /// Maximum entries held by the in-memory store.
    pub store_capacity: usize,
    pub corrupt_entries: CorruptEntryPolicy,
    pub reload_failures: ReloadFailureMode,
    /// Reject a second cache policy for the same query type.
    pub strict_policy_registration: bool,
    /// Maximum invalidation failure events retained for inspection.
    pub event_queue_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            store_capacity: DEFAULT_STORE_CAPACITY,
            corrupt_entries: CorruptEntryPolicy::default(),
            reload_failures: ReloadFailureMode::default(),
            strict_policy_registration: false,
            event_queue_limit: DEFAULT_EVENT_QUEUE_LIMIT,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            store_capacity: settings.store_capacity.get(),
            corrupt_entries: settings.corrupt_entries,
            reload_failures: settings.reload_failures,
            strict_policy_registration: settings.strict_policy_registration,
            event_queue_limit: settings.event_queue_limit.get(),
        }
    }
}

impl CacheConfig {
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the store capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn store_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.store_capacity).unwrap_or(NonZeroUsize::MIN)
    }

    /// Returns the event queue limit as NonZeroUsize, clamping to 1 if zero.
    pub fn event_queue_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.event_queue_limit).unwrap_or(NonZeroUsize::MIN)
    }
}
