//! Composition of the cache stages into mediator routes.

use std::sync::Arc;

use tracing::info;

use super::caching::ReadThroughCache;
use super::config::CacheConfig;
use super::error::RegistryError;
use super::events::InvalidationEvents;
use super::invalidation::{Invalidation, InvalidationSource};
use super::invalidation_policy::{InvalidationPolicies, InvalidationPolicy};
use super::keys::FromFields;
use super::links::InvalidationLinks;
use super::policy::{CachePolicyRegistry, QueryCachePolicy};
use super::query::Query;
use super::store::CacheStore;
use super::typed::TypedCache;
use crate::dispatch::{Behavior, Request};

/// Shared cache stages, built once and handed to every route.
///
/// Stage order on a route is link invalidation, policy invalidation, then
/// read-through, so a query that invalidates others still reads through.
pub struct CacheLayer {
    cache: TypedCache,
    policies: Arc<CachePolicyRegistry>,
    read_through: Arc<ReadThroughCache>,
    links: Option<Arc<Invalidation<InvalidationLinks>>>,
    invalidation_policies: Option<Arc<Invalidation<InvalidationPolicies>>>,
    events: Arc<InvalidationEvents>,
}

impl CacheLayer {
    pub fn builder(config: CacheConfig, store: Arc<dyn CacheStore>) -> CacheLayerBuilder {
        CacheLayerBuilder {
            policies: CachePolicyRegistry::from_config(&config),
            links: InvalidationLinks::new(),
            invalidation_policies: InvalidationPolicies::new(),
            cache: TypedCache::new(store),
            config,
        }
    }

    /// Stages for a query route.
    pub fn query_pipeline<Q: Query>(&self) -> Vec<Arc<dyn Behavior<Q>>> {
        let mut stages = self.invalidation_stages::<Q>();
        stages.push(self.read_through.clone());
        stages
    }

    /// Stages for a command route.
    pub fn command_pipeline<C: Request>(&self) -> Vec<Arc<dyn Behavior<C>>> {
        self.invalidation_stages::<C>()
    }

    fn invalidation_stages<R: Request>(&self) -> Vec<Arc<dyn Behavior<R>>> {
        let mut stages: Vec<Arc<dyn Behavior<R>>> = Vec::new();
        if let Some(links) = &self.links {
            stages.push(links.clone());
        }
        if let Some(policies) = &self.invalidation_policies {
            stages.push(policies.clone());
        }
        stages
    }

    pub fn cache(&self) -> &TypedCache {
        &self.cache
    }

    pub fn policies(&self) -> &CachePolicyRegistry {
        &self.policies
    }

    /// Failures from invalidation passes, for inspection or retry.
    pub fn events(&self) -> &Arc<InvalidationEvents> {
        &self.events
    }
}

pub struct CacheLayerBuilder {
    config: CacheConfig,
    cache: TypedCache,
    policies: CachePolicyRegistry,
    links: InvalidationLinks,
    invalidation_policies: InvalidationPolicies,
}

impl CacheLayerBuilder {
    pub fn cache_policy<Q, P>(&mut self, policy: P) -> Result<&mut Self, RegistryError>
    where
        Q: Query,
        P: QueryCachePolicy<Q>,
    {
        self.policies.register::<Q, P>(policy)?;
        Ok(self)
    }

    pub fn link<C, Q>(&mut self) -> &mut Self
    where
        C: Request,
        Q: Query + FromFields,
    {
        self.links.link::<C, Q>();
        self
    }

    pub fn invalidation_policy<C, P>(&mut self, policy: P) -> &mut Self
    where
        C: Request,
        P: InvalidationPolicy<C>,
    {
        self.invalidation_policies.register::<C, P>(policy);
        self
    }

    pub fn build(self) -> CacheLayer {
        let Self {
            config,
            cache,
            policies,
            links,
            invalidation_policies,
        } = self;
        let policies = Arc::new(policies);
        let events = Arc::new(InvalidationEvents::from_config(&config));

        info!(
            enabled = config.enabled,
            cache_policies = policies.len(),
            links = links.len(),
            invalidation_policies = invalidation_policies.len(),
            "Cache layer built"
        );

        let links = invalidation_stage(links, &cache, &policies, &events, &config);
        let invalidation_policies =
            invalidation_stage(invalidation_policies, &cache, &policies, &events, &config);

        CacheLayer {
            read_through: Arc::new(ReadThroughCache::new(
                cache.clone(),
                policies.clone(),
                config,
            )),
            cache,
            policies,
            links,
            invalidation_policies,
            events,
        }
    }
}

fn invalidation_stage<S: InvalidationSource>(
    source: S,
    cache: &TypedCache,
    policies: &Arc<CachePolicyRegistry>,
    events: &Arc<InvalidationEvents>,
    config: &CacheConfig,
) -> Option<Arc<Invalidation<S>>> {
    if source.is_empty() {
        return None;
    }
    Some(Arc::new(Invalidation::new(
        Arc::new(source),
        cache.clone(),
        policies.clone(),
        events.clone(),
        config.clone(),
    )))
}
