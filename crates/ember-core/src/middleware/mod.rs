//! Middleware chain
//!
//! A middleware receives the request, the response, a [`Next`] continuation
//! and the request's [`Cleanup`] list. Calling [`Next::run`] hands control to
//! the following middleware (or the router's dispatch step once the chain is
//! exhausted) and returns when everything downstream has finished, so code
//! placed after the call observes the response the handler produced.
//! Dropping `next` without running it halts the chain.

pub mod pool;

pub use pool::{Lease, Pool, PoolMiddleware, Pooled};

use crate::{Request, Response};
use std::sync::Arc;

/// Middleware trait - process a request with a continuation
pub trait Middleware: Send + Sync {
    fn handle<'a>(
        &self,
        req: &mut Request<'a>,
        res: &mut Response,
        next: Next<'_, 'a>,
        cleanup: &mut Cleanup,
    );
}

/// Whether a param or error handler lets processing continue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Fall through to the next handler
    Next,
    /// Stop here
    Stop,
}

/// Final step run once every middleware has continued
pub type Endpoint<'c, 'a> = dyn FnMut(&mut Request<'a>, &mut Response, &mut Cleanup) + 'c;

/// Continuation handed to a middleware
pub struct Next<'c, 'a> {
    chain: &'c [Arc<dyn Middleware>],
    endpoint: &'c mut Endpoint<'c, 'a>,
}

impl<'c, 'a> Next<'c, 'a> {
    pub(crate) fn new(chain: &'c [Arc<dyn Middleware>], endpoint: &'c mut Endpoint<'c, 'a>) -> Self {
        Self { chain, endpoint }
    }

    /// Run the rest of the chain
    pub fn run(self, req: &mut Request<'a>, res: &mut Response, cleanup: &mut Cleanup) {
        match self.chain.split_first() {
            Some((first, rest)) => {
                let next = Next {
                    chain: rest,
                    endpoint: self.endpoint,
                };
                first.handle(req, res, next, cleanup);
            }
            None => (self.endpoint)(req, res, cleanup),
        }
    }

    /// Middleware still to run after this one
    pub fn remaining(&self) -> usize {
        self.chain.len()
    }
}

/// Middleware built from a closure
pub struct FnMiddleware<F>(F);

/// Wrap a closure as a [`Middleware`]
pub fn from_fn<F>(f: F) -> FnMiddleware<F>
where
    F: for<'a, 'c> Fn(&mut Request<'a>, &mut Response, Next<'c, 'a>, &mut Cleanup) + Send + Sync,
{
    FnMiddleware(f)
}

impl<F> Middleware for FnMiddleware<F>
where
    F: for<'a, 'c> Fn(&mut Request<'a>, &mut Response, Next<'c, 'a>, &mut Cleanup) + Send + Sync,
{
    fn handle<'a>(
        &self,
        req: &mut Request<'a>,
        res: &mut Response,
        next: Next<'_, 'a>,
        cleanup: &mut Cleanup,
    ) {
        (self.0)(req, res, next, cleanup)
    }
}

type Callback = Box<dyn FnOnce() + Send>;

/// Per-request cleanup callbacks
///
/// Callbacks run once each, in registration order. The connection engine
/// calls [`Cleanup::run`] after the response is written; dropping the list
/// runs anything still pending.
#[derive(Default)]
pub struct Cleanup {
    callbacks: Vec<Callback>,
}

impl Cleanup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a callback
    pub fn register(&mut self, f: impl FnOnce() + Send + 'static) {
        self.callbacks.push(Box::new(f));
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Run every callback in registration order
    pub fn run(mut self) {
        self.run_pending();
    }

    fn run_pending(&mut self) {
        let count = self.callbacks.len();
        for cb in self.callbacks.drain(..) {
            cb();
        }
        if count > 0 {
            tracing::trace!(count, "cleanup callbacks ran");
        }
    }
}

impl Drop for Cleanup {
    fn drop(&mut self) {
        self.run_pending();
    }
}

impl std::fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cleanup")
            .field("pending", &self.callbacks.len())
            .finish()
    }
}
