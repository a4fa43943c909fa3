use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::DispatchError;
use super::pipeline::{Behavior, Context, Handler, Next};
use super::request::Request;

struct Route<R: Request> {
    handler: Arc<dyn Handler<R>>,
    behaviors: Vec<Arc<dyn Behavior<R>>>,
}

/// In-process dispatcher routing each request type to one handler.
///
/// Re-entrant: stages may send further requests through the same mediator
/// via [`Context::mediator`].
pub struct Mediator {
    routes: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Mediator {
    pub fn builder() -> MediatorBuilder {
        MediatorBuilder::default()
    }

    pub async fn send<R: Request>(&self, request: R) -> Result<R::Response, DispatchError> {
        let cancel = CancellationToken::new();
        self.send_with(request, &cancel).await
    }

    pub async fn send_with<R: Request>(
        &self,
        request: R,
        cancel: &CancellationToken,
    ) -> Result<R::Response, DispatchError> {
        let route = self
            .routes
            .get(&TypeId::of::<R>())
            .and_then(|route| route.downcast_ref::<Route<R>>())
            .ok_or(DispatchError::NoHandler {
                request: R::type_name(),
            })?;

        if cancel.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }

        debug!(
            request = R::type_name(),
            stages = route.behaviors.len(),
            "Dispatching request"
        );

        let ctx = Context::new(self, cancel);
        Next::new(&route.behaviors, route.handler.as_ref())
            .run(request, &ctx)
            .await
    }

    pub fn handles<R: Request>(&self) -> bool {
        self.routes.contains_key(&TypeId::of::<R>())
    }
}

#[derive(Default)]
pub struct MediatorBuilder {
    routes: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl MediatorBuilder {
    /// Route `R` straight to `handler`.
    pub fn handle<R, H>(self, handler: H) -> Self
    where
        R: Request,
        H: Handler<R> + 'static,
    {
        self.handle_with(handler, Vec::new())
    }

    /// Route `R` through `behaviors` (outermost first) before `handler`.
    pub fn handle_with<R, H>(mut self, handler: H, behaviors: Vec<Arc<dyn Behavior<R>>>) -> Self
    where
        R: Request,
        H: Handler<R> + 'static,
    {
        let route = Route::<R> {
            handler: Arc::new(handler),
            behaviors,
        };
        if self
            .routes
            .insert(TypeId::of::<R>(), Box::new(route))
            .is_some()
        {
            warn!(
                request = R::type_name(),
                "Handler registered twice; the later registration replaces the earlier one"
            );
        }
        self
    }

    pub fn build(self) -> Mediator {
        Mediator {
            routes: self.routes,
        }
    }
}
