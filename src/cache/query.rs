use crate::dispatch::Request;

use super::policy::CachePolicy;

/// A read-only request whose response may be served from the cache.
pub trait Query: Request {
    /// Declarative caching for this type; `None` leaves it uncached unless a
    /// runtime policy is registered.
    fn cache_options() -> Option<CachePolicy>
    where
        Self: Sized,
    {
        None
    }

    /// Custom key strategy. The result is namespaced as `TypeName{custom}`.
    fn cache_key(&self) -> Option<String> {
        None
    }
}
