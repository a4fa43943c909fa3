//! Read-through caching and command-driven cache invalidation around an
//! in-process request dispatcher.
//!
//! Queries pass through [`cache::ReadThroughCache`], commands through
//! [`cache::Invalidation`]. Both are [`dispatch::Behavior`] stages composed
//! by [`cache::CacheLayer`] into the routes of a [`dispatch::Mediator`].

pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod infra;
