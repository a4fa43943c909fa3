use serde::{Serialize, de::DeserializeOwned};

use crate::cache::Field;

/// A message routed by the [`Mediator`](super::Mediator) to exactly one handler.
///
/// Responses cross the cache boundary as JSON, hence the serde bounds.
pub trait Request: Send + Sync + 'static {
    type Response: Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Type tag used in cache keys and logs.
    ///
    /// Defaults to the fully-qualified Rust path.
    fn type_name() -> &'static str
    where
        Self: Sized,
    {
        std::any::type_name::<Self>()
    }

    /// Simple fields in declaration order.
    ///
    /// Only fields listed here take part in key derivation and in
    /// command-to-query correlation.
    fn fields(&self) -> Vec<Field> {
        Vec::new()
    }
}
