//! Read-through (cache-aside) stage for queries.

use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use tracing::{debug, error, instrument, warn};

use super::config::{CacheConfig, CorruptEntryPolicy};
use super::error::CacheError;
use super::keys::CacheKey;
use super::policy::{CachePolicy, CachePolicyRegistry};
use super::query::Query;
use super::store::CacheEntryOptions;
use super::typed::TypedCache;
use crate::dispatch::{Behavior, Context, DispatchError, Next};

const METRIC_HIT: &str = "dispatch_cache_hit_total";
const METRIC_MISS: &str = "dispatch_cache_miss_total";

/// Serves a query from the cache, or runs the handler and stores its result.
///
/// Caching is resolved per query type: a registered
/// [`QueryCachePolicy`](super::QueryCachePolicy) first, then
/// [`Query::cache_options`]. Types with neither pass straight through.
/// There is no single-flight; concurrent misses each run the handler.
pub struct ReadThroughCache {
    cache: TypedCache,
    policies: Arc<CachePolicyRegistry>,
    config: CacheConfig,
}

impl ReadThroughCache {
    pub fn new(cache: TypedCache, policies: Arc<CachePolicyRegistry>, config: CacheConfig) -> Self {
        Self {
            cache,
            policies,
            config,
        }
    }

    #[instrument(skip_all, fields(query = Q::type_name(), key = %key))]
    async fn read_through<Q: Query>(
        &self,
        request: Q,
        key: CacheKey,
        policy: CachePolicy,
        ctx: &Context<'_>,
        next: Next<'_, Q>,
    ) -> Result<Q::Response, DispatchError> {
        let cancel = ctx.cancel();
        match self.cache.get::<Q::Response>(&key, cancel).await {
            Ok(Some(cached)) => {
                counter!(METRIC_HIT).increment(1);
                debug!(cache = "read_through", outcome = "hit", key = %key);
                return Ok(cached);
            }
            Ok(None) => {}
            Err(err @ CacheError::Deserialize { .. })
                if self.config.corrupt_entries == CorruptEntryPolicy::Miss =>
            {
                warn!(
                    cache = "read_through",
                    key = %key,
                    error = %err,
                    "Corrupt cache entry treated as a miss"
                );
            }
            Err(err) => return Err(err.into()),
        }

        counter!(METRIC_MISS).increment(1);
        debug!(cache = "read_through", outcome = "miss", key = %key);

        let response = next.run(request, ctx).await?;

        let options = CacheEntryOptions::from(&policy);
        if let Err(err) = self.cache.set(&key, &response, &options, cancel).await {
            error!(
                cache = "read_through",
                key = %key,
                error = %err,
                "Failed to store query result"
            );
            return Err(err.into());
        }
        Ok(response)
    }
}

#[async_trait]
impl<Q: Query> Behavior<Q> for ReadThroughCache {
    async fn handle(
        &self,
        request: Q,
        ctx: &Context<'_>,
        next: Next<'_, Q>,
    ) -> Result<Q::Response, DispatchError> {
        if !self.config.is_enabled() {
            return next.run(request, ctx).await;
        }
        match self.policies.resolve_for(&request) {
            Some((key, policy)) => self.read_through(request, key, policy, ctx, next).await,
            None => next.run(request, ctx).await,
        }
    }
}
