//! Per-query expiration and auto-reload policies.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tracing::{debug, warn};

use super::config::CacheConfig;
use super::error::RegistryError;
use super::keys::{CacheKey, derive_key};
use super::query::Query;

const MINUTE: Duration = Duration::from_secs(60);

/// Expiration and reload settings for one query type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    pub absolute_expiration: Option<OffsetDateTime>,
    pub absolute_expiration_relative_to_now: Option<Duration>,
    pub sliding_expiration: Option<Duration>,
    /// Recompute the entry right after a command invalidates it.
    pub auto_reload: bool,
}

impl Default for CachePolicy {
    /// Five minutes absolute, one minute sliding, no auto-reload.
    fn default() -> Self {
        Self {
            absolute_expiration: None,
            absolute_expiration_relative_to_now: Some(5 * MINUTE),
            sliding_expiration: Some(MINUTE),
            auto_reload: false,
        }
    }
}

impl CachePolicy {
    /// Declarative form: sliding and absolute windows in minutes, the
    /// absolute one counted from the moment of caching. Zero disables a
    /// window.
    pub fn declared(sliding_minutes: u32, absolute_minutes: u32) -> Self {
        let minutes = |value: u32| (value > 0).then(|| MINUTE * value);
        Self {
            absolute_expiration: None,
            absolute_expiration_relative_to_now: minutes(absolute_minutes),
            sliding_expiration: minutes(sliding_minutes),
            auto_reload: false,
        }
    }

    pub fn with_auto_reload(mut self, auto_reload: bool) -> Self {
        self.auto_reload = auto_reload;
        self
    }

    pub fn with_sliding(mut self, sliding: Option<Duration>) -> Self {
        self.sliding_expiration = sliding;
        self
    }

    pub fn with_absolute_at(mut self, at: Option<OffsetDateTime>) -> Self {
        self.absolute_expiration = at;
        self
    }

    pub fn with_absolute_relative(mut self, relative: Option<Duration>) -> Self {
        self.absolute_expiration_relative_to_now = relative;
        self
    }
}

/// Runtime policy object for query type `Q`.
pub trait QueryCachePolicy<Q: Query>: Send + Sync + 'static {
    fn policy(&self) -> CachePolicy {
        CachePolicy::default()
    }

    fn cache_key(&self, query: &Q) -> CacheKey {
        derive_key(query)
    }
}

struct Registered {
    query: &'static str,
    ignored: usize,
    // Arc<dyn QueryCachePolicy<Q>> for the query type keyed in the map.
    policy: Box<dyn Any + Send + Sync>,
}

/// Registered [`QueryCachePolicy`] objects, one authoritative per query type.
///
/// The first registration for a type wins. With strict registration a
/// second one is an error instead of a warning.
#[derive(Default)]
pub struct CachePolicyRegistry {
    strict: bool,
    entries: HashMap<TypeId, Registered>,
}

impl CachePolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strict() -> Self {
        Self {
            strict: true,
            entries: HashMap::new(),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        if config.strict_policy_registration {
            Self::strict()
        } else {
            Self::new()
        }
    }

    pub fn register<Q, P>(&mut self, policy: P) -> Result<(), RegistryError>
    where
        Q: Query,
        P: QueryCachePolicy<Q>,
    {
        match self.entries.entry(TypeId::of::<Q>()) {
            Entry::Occupied(mut occupied) => {
                if self.strict {
                    return Err(RegistryError::DuplicateCachePolicy {
                        query: Q::type_name(),
                    });
                }
                let registered = occupied.get_mut();
                registered.ignored += 1;
                warn!(
                    query = registered.query,
                    ignored = registered.ignored,
                    "Additional cache policy ignored; the first registration wins"
                );
                Ok(())
            }
            Entry::Vacant(vacant) => {
                let policy: Arc<dyn QueryCachePolicy<Q>> = Arc::new(policy);
                vacant.insert(Registered {
                    query: Q::type_name(),
                    ignored: 0,
                    policy: Box::new(policy),
                });
                debug!(query = Q::type_name(), "Registered cache policy");
                Ok(())
            }
        }
    }

    pub fn get<Q: Query>(&self) -> Option<Arc<dyn QueryCachePolicy<Q>>> {
        self.entries
            .get(&TypeId::of::<Q>())
            .and_then(|registered| {
                registered
                    .policy
                    .downcast_ref::<Arc<dyn QueryCachePolicy<Q>>>()
            })
            .cloned()
    }

    /// Effective policy for `Q`: the registered object first, then the
    /// type's own declaration.
    pub fn resolve<Q: Query>(&self) -> Option<CachePolicy> {
        match self.get::<Q>() {
            Some(policy) => Some(policy.policy()),
            None => Q::cache_options(),
        }
    }

    /// Key and policy for a concrete query, or `None` when `Q` is uncached.
    pub fn resolve_for<Q: Query>(&self, query: &Q) -> Option<(CacheKey, CachePolicy)> {
        match self.get::<Q>() {
            Some(policy) => Some((policy.cache_key(query), policy.policy())),
            None => Q::cache_options().map(|policy| (derive_key(query), policy)),
        }
    }

    /// Key the read-through stage stores `query` under: the registered
    /// policy's key, else [`derive_key`].
    pub fn key_for<Q: Query>(&self, query: &Q) -> CacheKey {
        match self.get::<Q>() {
            Some(policy) => policy.cache_key(query),
            None => derive_key(query),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
