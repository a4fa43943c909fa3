//! Runtime-registered invalidation policies.
//!
//! An [`InvalidationPolicy`] binds a command type to one target query type
//! and may override how the target key is computed.

use std::sync::Arc;

use tracing::debug;

use super::invalidation::{InvalidationSource, InvalidationTarget, PlannedInvalidation, TargetTable};
use super::keys::{CacheKey, Field, FieldSet, FromFields};
use super::policy::{CachePolicy, CachePolicyRegistry};
use super::query::Query;
use crate::dispatch::Request;

pub trait InvalidationPolicy<C: Request>: Send + Sync + 'static {
    type Target: Query + FromFields;

    /// Key removed when `command` succeeds. `None` removes the key the
    /// reload query is cached under.
    fn cache_key(&self, _command: &C) -> Option<CacheKey> {
        None
    }

    /// Policy deciding whether the target is reloaded. Defaults to the one
    /// resolved for the target type.
    fn cache_policy(&self, policies: &CachePolicyRegistry) -> Option<CachePolicy> {
        policies.resolve::<Self::Target>()
    }

    /// Target query re-dispatched on auto-reload.
    fn reload_query(&self, command: &C) -> Self::Target {
        Self::Target::from_fields(&FieldSet::correlate(
            &command.fields(),
            Self::Target::FIELDS,
        ))
    }
}

/// Registered [`InvalidationPolicy`] objects by command type.
///
/// Every policy registered for a command runs; there is no first-wins rule
/// here.
#[derive(Default)]
pub struct InvalidationPolicies {
    table: TargetTable,
}

impl InvalidationPolicies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<C, P>(&mut self, policy: P) -> &mut Self
    where
        C: Request,
        P: InvalidationPolicy<C>,
    {
        debug!(
            command = C::type_name(),
            target = P::Target::type_name(),
            "Registered invalidation policy"
        );
        self.table.push::<C>(Arc::new(PolicyTarget(policy)));
        self
    }
}

impl InvalidationSource for InvalidationPolicies {
    const KIND: &'static str = "policies";

    fn plan<C: Request>(
        &self,
        command: &C,
        policies: &CachePolicyRegistry,
    ) -> Vec<PlannedInvalidation> {
        self.table.plan(command, policies)
    }

    fn len(&self) -> usize {
        self.table.len()
    }
}

struct PolicyTarget<P>(P);

impl<C, P> InvalidationTarget<C> for PolicyTarget<P>
where
    C: Request,
    P: InvalidationPolicy<C>,
{
    fn plan(
        &self,
        command: &C,
        _fields: &[Field],
        policies: &CachePolicyRegistry,
    ) -> PlannedInvalidation {
        let query = self.0.reload_query(command);
        let key = self
            .0
            .cache_key(command)
            .unwrap_or_else(|| policies.key_for(&query));
        let auto_reload = self
            .0
            .cache_policy(policies)
            .is_some_and(|policy| policy.auto_reload);
        PlannedInvalidation::new::<P::Target>(key, auto_reload.then_some(query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{FieldSpec, QueryCachePolicy};

    struct CacheBust {
        search: Option<String>,
        cache_bust: Option<bool>,
    }

    impl Request for CacheBust {
        type Response = ();

        fn type_name() -> &'static str {
            "CacheBust"
        }

        fn fields(&self) -> Vec<Field> {
            vec![
                Field::new("search", &self.search),
                Field::new("cache_bust", &self.cache_bust),
            ]
        }
    }

    struct Todos {
        search: Option<String>,
        cache_bust: Option<bool>,
    }

    impl Request for Todos {
        type Response = Vec<String>;

        fn type_name() -> &'static str {
            "Todos"
        }

        fn fields(&self) -> Vec<Field> {
            vec![
                Field::new("search", &self.search),
                Field::new("cache_bust", &self.cache_bust),
            ]
        }
    }

    impl Query for Todos {}

    impl FromFields for Todos {
        const FIELDS: &'static [FieldSpec] = &[
            FieldSpec::of::<Option<String>>("search"),
            FieldSpec::of::<Option<bool>>("cache_bust"),
        ];

        fn from_fields(fields: &FieldSet) -> Self {
            Self {
                search: fields.get("search").flatten(),
                cache_bust: fields.get("cache_bust").flatten(),
            }
        }
    }

    struct TodoPage {
        search: Option<String>,
        page: Option<i32>,
    }

    impl Request for TodoPage {
        type Response = Vec<String>;

        fn type_name() -> &'static str {
            "TodoPage"
        }

        fn fields(&self) -> Vec<Field> {
            vec![
                Field::new("search", &self.search),
                Field::new("page", &self.page),
            ]
        }
    }

    impl Query for TodoPage {
        fn cache_options() -> Option<CachePolicy> {
            Some(CachePolicy::declared(1, 5).with_auto_reload(true))
        }
    }

    impl FromFields for TodoPage {
        const FIELDS: &'static [FieldSpec] = &[
            FieldSpec::of::<Option<String>>("search"),
            FieldSpec::of::<Option<i32>>("page"),
        ];

        fn from_fields(fields: &FieldSet) -> Self {
            Self {
                search: fields.get("search").flatten(),
                page: fields.get("page").flatten(),
            }
        }
    }

    struct BustFirstPage;

    impl InvalidationPolicy<CacheBust> for BustFirstPage {
        type Target = TodoPage;
    }

    struct BustTodos;

    impl InvalidationPolicy<CacheBust> for BustTodos {
        type Target = Todos;
    }

    struct BustEverything;

    impl InvalidationPolicy<CacheBust> for BustEverything {
        type Target = Todos;

        fn cache_key(&self, _command: &CacheBust) -> Option<CacheKey> {
            Some(CacheKey::custom("Todos", "all"))
        }
    }

    struct ReloadTodos;

    impl QueryCachePolicy<Todos> for ReloadTodos {
        fn policy(&self) -> CachePolicy {
            CachePolicy::default().with_auto_reload(true)
        }
    }

    fn bust() -> CacheBust {
        CacheBust {
            search: Some("milk".to_string()),
            cache_bust: Some(true),
        }
    }

    #[test]
    fn every_registered_policy_is_planned() {
        let mut sources = InvalidationPolicies::new();
        sources
            .register::<CacheBust, _>(BustTodos)
            .register::<CacheBust, _>(BustEverything);
        assert_eq!(sources.len(), 2);

        let planned = sources.plan(&bust(), &CachePolicyRegistry::new());
        let keys: Vec<_> = planned.iter().map(|p| p.key().as_str()).collect();
        assert_eq!(
            keys,
            vec![r#"Todos{search:"milk",cache_bust:true}"#, "Todos{all}"]
        );
        assert!(planned.iter().all(|p| !p.reloads()));
    }

    #[test]
    fn reload_follows_target_policy() {
        let mut registry = CachePolicyRegistry::new();
        registry
            .register::<Todos, _>(ReloadTodos)
            .expect("register todos policy");
        let mut sources = InvalidationPolicies::new();
        sources.register::<CacheBust, _>(BustTodos);

        let planned = sources.plan(&bust(), &registry);
        assert_eq!(planned.len(), 1);
        assert!(planned[0].reloads());
        assert_eq!(planned[0].target(), "Todos");
    }

    #[test]
    fn reload_query_copies_correlated_fields() {
        let query = BustTodos.reload_query(&bust());
        assert_eq!(query.search.as_deref(), Some("milk"));
        assert_eq!(query.cache_bust, Some(true));
    }

    #[test]
    fn default_key_matches_rebuilt_target_query() {
        let mut sources = InvalidationPolicies::new();
        sources.register::<CacheBust, _>(BustFirstPage);

        let planned = sources.plan(&bust(), &CachePolicyRegistry::new());
        assert_eq!(
            planned[0].key(),
            &crate::cache::derive_key(&TodoPage {
                search: Some("milk".to_string()),
                page: None,
            })
        );
        assert_eq!(planned[0].key().as_str(), r#"TodoPage{search:"milk",page:null}"#);
        assert!(planned[0].reloads());
    }
}
