//! Handler and behavior contracts.
//!
//! A route is an ordered list of [`Behavior`] stages in front of one
//! [`Handler`]. Each stage receives a [`Next`] that runs the rest of the chain.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::error::{DispatchError, HandlerError};
use super::mediator::Mediator;
use super::request::Request;

#[async_trait]
pub trait Handler<R: Request>: Send + Sync {
    async fn handle(
        &self,
        request: R,
        cancel: &CancellationToken,
    ) -> Result<R::Response, HandlerError>;
}

/// Adapts an async closure into a [`Handler`].
pub struct HandlerFn<F>(F);

pub fn handler_fn<R, F, Fut>(f: F) -> HandlerFn<F>
where
    R: Request,
    F: Fn(R) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R::Response, HandlerError>> + Send,
{
    HandlerFn(f)
}

#[async_trait]
impl<R, F, Fut> Handler<R> for HandlerFn<F>
where
    R: Request,
    F: Fn(R) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R::Response, HandlerError>> + Send,
{
    async fn handle(
        &self,
        request: R,
        _cancel: &CancellationToken,
    ) -> Result<R::Response, HandlerError> {
        (self.0)(request).await
    }
}

/// Per-dispatch state handed to every stage.
pub struct Context<'a> {
    mediator: &'a Mediator,
    cancel: &'a CancellationToken,
}

impl<'a> Context<'a> {
    pub(crate) fn new(mediator: &'a Mediator, cancel: &'a CancellationToken) -> Self {
        Self { mediator, cancel }
    }

    /// The dispatching mediator; safe to re-enter from inside a stage.
    pub fn mediator(&self) -> &'a Mediator {
        self.mediator
    }

    pub fn cancel(&self) -> &'a CancellationToken {
        self.cancel
    }
}

#[async_trait]
pub trait Behavior<R: Request>: Send + Sync {
    async fn handle(
        &self,
        request: R,
        ctx: &Context<'_>,
        next: Next<'_, R>,
    ) -> Result<R::Response, DispatchError>;
}

/// Remainder of a route: the stages not yet run, then the handler.
pub struct Next<'a, R: Request> {
    behaviors: &'a [Arc<dyn Behavior<R>>],
    handler: &'a dyn Handler<R>,
}

impl<'a, R: Request> Next<'a, R> {
    pub(crate) fn new(behaviors: &'a [Arc<dyn Behavior<R>>], handler: &'a dyn Handler<R>) -> Self {
        Self { behaviors, handler }
    }

    pub async fn run(self, request: R, ctx: &Context<'_>) -> Result<R::Response, DispatchError> {
        match self.behaviors.split_first() {
            Some((behavior, rest)) => {
                let next = Next::new(rest, self.handler);
                behavior.handle(request, ctx, next).await
            }
            None => {
                if ctx.cancel().is_cancelled() {
                    return Err(DispatchError::Cancelled);
                }
                self.handler
                    .handle(request, ctx.cancel())
                    .await
                    .map_err(DispatchError::from)
            }
        }
    }
}
