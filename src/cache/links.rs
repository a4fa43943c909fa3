//! Static "command C invalidates query Q" declarations.

use std::marker::PhantomData;
use std::sync::Arc;

use tracing::debug;

use super::invalidation::{InvalidationSource, InvalidationTarget, PlannedInvalidation, TargetTable};
use super::keys::{Field, FieldSet, FromFields};
use super::policy::CachePolicyRegistry;
use super::query::Query;
use crate::dispatch::Request;

/// Link table, filled once at startup.
///
/// A linked query is rebuilt from the command's correlated fields; fields the
/// command lacks take their `from_fields` defaults. The removed key is the
/// one read-through stores that query under, see
/// [`CachePolicyRegistry::key_for`].
#[derive(Default)]
pub struct InvalidationLinks {
    table: TargetTable,
}

impl InvalidationLinks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare that a successful `C` invalidates cached `Q` results.
    pub fn link<C, Q>(&mut self) -> &mut Self
    where
        C: Request,
        Q: Query + FromFields,
    {
        self.table.push::<C>(Arc::new(LinkedQuery::<Q>(PhantomData)));
        debug!(
            command = C::type_name(),
            query = Q::type_name(),
            "Registered invalidation link"
        );
        self
    }
}

impl InvalidationSource for InvalidationLinks {
    const KIND: &'static str = "links";

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

struct LinkedQuery<Q>(PhantomData<fn() -> Q>);

impl<C, Q> InvalidationTarget<C> for LinkedQuery<Q>
where
    C: Request,
    Q: Query + FromFields,
{
    fn plan(
        &self,
        _command: &C,
        fields: &[Field],
        policies: &CachePolicyRegistry,
    ) -> PlannedInvalidation {
        let query = Q::from_fields(&FieldSet::correlate(fields, Q::FIELDS));
        let key = policies.key_for(&query);
        let auto_reload = policies
            .resolve::<Q>()
            .is_some_and(|policy| policy.auto_reload);
        PlannedInvalidation::new::<Q>(key, auto_reload.then_some(query))
    }
}
