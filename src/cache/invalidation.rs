//! Command-driven invalidation.
//!
//! [`Invalidation`] wraps a command route. Once the handler succeeds, every
//! target planned by its [`InvalidationSource`] is removed from the store,
//! then targets whose policy asks for it are reloaded through the mediator.
//!
//! Targets are planned before the handler runs because the handler consumes
//! the command.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::future::{join_all, try_join_all};
use metrics::{counter, histogram};
use thiserror::Error;
use tracing::{debug, error, instrument};

use super::config::{CacheConfig, ReloadFailureMode};
use super::events::{FailureStage, InvalidationEvents};
use super::keys::{CacheKey, Field};
use super::policy::CachePolicyRegistry;
use super::query::Query;
use super::typed::TypedCache;
use crate::dispatch::{Behavior, Context, DispatchError, Next, Request};

const METRIC_INVALIDATED: &str = "dispatch_cache_invalidated_total";
const METRIC_RELOAD: &str = "dispatch_cache_reload_total";
const METRIC_RELOAD_FAILED: &str = "dispatch_cache_reload_failed_total";
const METRIC_FAILURE: &str = "dispatch_cache_invalidation_failure_total";
const METRIC_DURATION_MS: &str = "dispatch_cache_invalidation_ms";

/// One target that could not be removed or reloaded.
#[derive(Debug, Error)]
#[error("{stage} of `{key}` for `{target}` failed: {error}")]
pub struct InvalidationFailure {
    pub target: &'static str,
    pub key: CacheKey,
    pub stage: FailureStage,
    #[source]
    pub error: DispatchError,
}

/// Deferred re-dispatch of a target query.
#[async_trait]
pub(crate) trait Reload: Send + Sync {
    async fn run(self: Box<Self>, ctx: &Context<'_>) -> Result<(), DispatchError>;
}

pub(crate) struct QueryReload<Q>(pub(crate) Q);

#[async_trait]
impl<Q: Query> Reload for QueryReload<Q> {
    async fn run(self: Box<Self>, ctx: &Context<'_>) -> Result<(), DispatchError> {
        ctx.mediator()
            .send_with(self.0, ctx.cancel())
            .await
            .map(|_| ())
    }
}

/// A cache entry to drop once a command succeeds, and optionally the query
/// that repopulates it.
pub struct PlannedInvalidation {
    pub(crate) target: &'static str,
    pub(crate) key: CacheKey,
    pub(crate) reload: Option<Box<dyn Reload>>,
}

impl PlannedInvalidation {
    pub(crate) fn new<Q: Query>(key: CacheKey, reload: Option<Q>) -> Self {
        Self {
            target: Q::type_name(),
            key,
            reload: reload.map(|query| Box::new(QueryReload(query)) as Box<dyn Reload>),
        }
    }

    pub fn target(&self) -> &'static str {
        self.target
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn reloads(&self) -> bool {
        self.reload.is_some()
    }
}

/// Plans one invalidation for commands of type `C`.
pub(crate) trait InvalidationTarget<C: Request>: Send + Sync {
    fn plan(
        &self,
        command: &C,
        fields: &[Field],
        policies: &CachePolicyRegistry,
    ) -> PlannedInvalidation;
}

/// Invalidation targets keyed by command type.
#[derive(Default)]
pub(crate) struct TargetTable {
    // Vec<Arc<dyn InvalidationTarget<C>>> for the command type keyed in the map.
    entries: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    len: usize,
}

impl TargetTable {
    pub(crate) fn push<C: Request>(&mut self, target: Arc<dyn InvalidationTarget<C>>) {
        let targets = self
            .entries
            .entry(TypeId::of::<C>())
            .or_insert_with(|| Box::new(Vec::<Arc<dyn InvalidationTarget<C>>>::new()));
        if let Some(targets) = targets.downcast_mut::<Vec<Arc<dyn InvalidationTarget<C>>>>() {
            targets.push(target);
            self.len += 1;
        }
    }

    pub(crate) fn targets<C: Request>(&self) -> &[Arc<dyn InvalidationTarget<C>>] {
        self.entries
            .get(&TypeId::of::<C>())
            .and_then(|targets| targets.downcast_ref::<Vec<Arc<dyn InvalidationTarget<C>>>>())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub(crate) fn plan<C: Request>(
        &self,
        command: &C,
        policies: &CachePolicyRegistry,
    ) -> Vec<PlannedInvalidation> {
        let targets = self.targets::<C>();
        if targets.is_empty() {
            return Vec::new();
        }
        let fields = command.fields();
        targets
            .iter()
            .map(|target| target.plan(command, &fields, policies))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }
}

/// Where an [`Invalidation`] stage finds its targets.
pub trait InvalidationSource: Send + Sync + 'static {
    /// Label for logs and metrics.
    const KIND: &'static str;

    fn plan<C: Request>(&self, command: &C, policies: &CachePolicyRegistry)
    -> Vec<PlannedInvalidation>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Invalidation decorator over one [`InvalidationSource`].
pub struct Invalidation<S> {
    source: Arc<S>,
    cache: TypedCache,
    policies: Arc<CachePolicyRegistry>,
    events: Arc<InvalidationEvents>,
    config: CacheConfig,
}

impl<S: InvalidationSource> Invalidation<S> {
    pub fn new(
        source: Arc<S>,
        cache: TypedCache,
        policies: Arc<CachePolicyRegistry>,
        events: Arc<InvalidationEvents>,
        config: CacheConfig,
    ) -> Self {
        Self {
            source,
            cache,
            policies,
            events,
            config,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    #[instrument(skip_all, fields(command = command, source = S::KIND, targets = planned.len()))]
    async fn execute(
        &self,
        command: &'static str,
        planned: Vec<PlannedInvalidation>,
        ctx: &Context<'_>,
    ) -> Vec<InvalidationFailure> {
        let started = Instant::now();
        let cancel = ctx.cancel();

        let removals = join_all(
            planned
                .iter()
                .map(|planned| self.cache.remove(&planned.key, cancel)),
        )
        .await;

        let mut failures = Vec::new();
        let mut reloads = Vec::new();
        for (planned, outcome) in planned.into_iter().zip(removals) {
            let PlannedInvalidation {
                target,
                key,
                reload,
            } = planned;
            match outcome {
                Ok(()) => {
                    counter!(METRIC_INVALIDATED, "source" => S::KIND).increment(1);
                    debug!(cache = "invalidation", target, key = %key, "Cache entry removed");
                    if let Some(reload) = reload {
                        reloads.push((target, key, reload));
                    }
                }
                Err(err) => failures.push(InvalidationFailure {
                    target,
                    key,
                    stage: FailureStage::Remove,
                    error: err.into(),
                }),
            }
        }

        if !reloads.is_empty() {
            counter!(METRIC_RELOAD, "source" => S::KIND).increment(reloads.len() as u64);
            let runs = reloads.into_iter().map(|(target, key, reload)| async move {
                match reload.run(ctx).await {
                    Ok(()) => {
                        debug!(cache = "invalidation", target, key = %key, "Cache entry reloaded");
                        Ok(())
                    }
                    Err(error) => Err(InvalidationFailure {
                        target,
                        key,
                        stage: FailureStage::Reload,
                        error,
                    }),
                }
            });
            match self.config.reload_failures {
                ReloadFailureMode::Aggregate => {
                    failures.extend(join_all(runs).await.into_iter().filter_map(Result::err));
                }
                ReloadFailureMode::FailFast => {
                    if let Err(failure) = try_join_all(runs).await {
                        failures.push(failure);
                    }
                }
            }
        }

        histogram!(METRIC_DURATION_MS, "source" => S::KIND)
            .record(started.elapsed().as_secs_f64() * 1000.0);
        debug!(command, failures = failures.len(), "Invalidation pass finished");
        failures
    }

    fn report(&self, command: &'static str, failures: &[InvalidationFailure]) {
        for failure in failures {
            if failure.stage == FailureStage::Reload {
                counter!(METRIC_RELOAD_FAILED, "source" => S::KIND).increment(1);
            }
            counter!(METRIC_FAILURE, "source" => S::KIND, "stage" => failure.stage.as_str())
                .increment(1);
            error!(
                command,
                source = S::KIND,
                target = failure.target,
                key = %failure.key,
                stage = %failure.stage,
                error = %failure.error,
                "Cache invalidation failed"
            );
            self.events.publish(command, failure);
        }
    }
}

#[async_trait]
impl<C, S> Behavior<C> for Invalidation<S>
where
    C: Request,
    S: InvalidationSource,
{
    async fn handle(
        &self,
        request: C,
        ctx: &Context<'_>,
        next: Next<'_, C>,
    ) -> Result<C::Response, DispatchError> {
        if !self.config.is_enabled() {
            return next.run(request, ctx).await;
        }
        let planned = self.source.plan(&request, &self.policies);
        if planned.is_empty() {
            return next.run(request, ctx).await;
        }

        let response = next.run(request, ctx).await?;

        let command = C::type_name();
        let failures = self.execute(command, planned, ctx).await;
        self.report(command, &failures);
        Ok(response)
    }
}
