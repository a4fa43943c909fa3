//! Cache layer around the dispatcher.
//!
//! - **Read-through**: queries with a caching declaration or a registered
//!   [`QueryCachePolicy`] are served from the store when possible.
//! - **Invalidation**: after a command succeeds, linked or policy-targeted
//!   query results are removed and optionally reloaded.
//!
//! ## Configuration
//!
//! Behavior is controlled via the `[cache]` table of `dispatch-cache.toml`:
//!
//! ```toml
//! [cache]
//! enabled = true
//! store_capacity = 1024
//! corrupt_entries = "propagate"   # or "miss"
//! reload_failures = "aggregate"   # or "fail_fast"
//! strict_policy_registration = false
//! event_queue_limit = 256
//! ```

mod caching;
mod config;
mod error;
mod events;
mod invalidation;
mod invalidation_policy;
mod keys;
mod layer;
mod links;
mod lock;
mod policy;
mod query;
mod store;
mod typed;

pub use caching::ReadThroughCache;
pub use config::{CacheConfig, CorruptEntryPolicy, ReloadFailureMode};
pub use error::{CacheError, CacheStoreError, RegistryError};
pub use events::{Epoch, FailureStage, InvalidationEvent, InvalidationEvents};
pub use invalidation::{Invalidation, InvalidationFailure, InvalidationSource, PlannedInvalidation};
pub use invalidation_policy::{InvalidationPolicies, InvalidationPolicy};
pub use keys::{
    CacheKey, Decimal, Field, FieldKind, FieldSet, FieldSpec, FieldType, FieldValue, FromFields,
    Scalar, correlated_key, derive_key,
};
pub use layer::{CacheLayer, CacheLayerBuilder};
pub use links::InvalidationLinks;
pub use policy::{CachePolicy, CachePolicyRegistry, QueryCachePolicy};
pub use query::Query;
pub use store::{CacheEntryOptions, CacheStore, MemoryStore};
pub use typed::TypedCache;
