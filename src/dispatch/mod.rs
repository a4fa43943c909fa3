//! Minimal in-process request dispatcher.
//!
//! Routes are registered once through [`MediatorBuilder`]; each route owns an
//! ordered list of [`Behavior`] stages wrapped around a single [`Handler`].

mod error;
mod mediator;
mod pipeline;
mod request;

pub use error::{DispatchError, HandlerError};
pub use mediator::{Mediator, MediatorBuilder};
pub use pipeline::{Behavior, Context, Handler, HandlerFn, Next, handler_fn};
pub use request::Request;
