//! Router
//!
//! A router owns routes, middleware, param handlers, error handlers and
//! mounted child routers. Route and base paths are compiled by
//! `ember-router` once, at registration or mount time.
//!
//! Dispatch for one router:
//! 1. skip the router entirely unless its base accepts the request path
//! 2. run the middleware chain; the last continuation performs steps 3-4
//! 3. find the first registered route whose method and path match, run the
//!    param handlers for its parameters, then call its handler
//! 4. when no route matched, probe every child router in mount order
//! 5. if an application error is pending, run this router's error handlers
//!
//! The root additionally sends the default error response or a 404 when
//! nothing was sent.

use crate::middleware::{from_fn, Cleanup, Flow, Middleware, Next};
use crate::parser::Method;
use crate::{HandlerError, Request, Response, Result, StatusCode};
use ember_router::{join, normalize_base, BasePattern, PathPattern};
use std::fmt;
use std::sync::Arc;

/// Route handler
pub type Handler = dyn Fn(&Request<'_>, &mut Response) + Send + Sync;

/// Handler run before the route handler when a named parameter matched
pub type ParamHandler = dyn for<'a> Fn(&mut Request<'a>, &mut Response, &'a str) -> Flow + Send + Sync;

/// Handler for errors raised through [`Response::error`]
pub type ErrorHandler = dyn Fn(&HandlerError, &Request<'_>, &mut Response) -> Flow + Send + Sync;

struct Route {
    method: Method,
    /// Path as registered, relative to the router base
    path: String,
    pattern: PathPattern,
    handler: Arc<Handler>,
}

/// HTTP Router
pub struct Router {
    /// Path this router was mounted at, relative to its parent
    mount_path: String,
    /// Full base path (parent bases joined)
    base: String,
    base_pattern: BasePattern,
    routes: Vec<Route>,
    middleware: Vec<Arc<dyn Middleware>>,
    params: Vec<(String, Arc<ParamHandler>)>,
    error_handlers: Vec<Arc<ErrorHandler>>,
    children: Vec<Router>,
}

impl Router {
    /// Create a root router
    pub fn new() -> Self {
        Self {
            mount_path: String::new(),
            base: String::new(),
            base_pattern: BasePattern::default(),
            routes: Vec::new(),
            middleware: Vec::new(),
            params: Vec::new(),
            error_handlers: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Full base path this router answers under
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Register a route
    pub fn route<F>(&mut self, method: Method, path: &str, handler: F) -> Result<&mut Self>
    where
        F: Fn(&Request<'_>, &mut Response) + Send + Sync + 'static,
    {
        let pattern = PathPattern::compile(&join(&self.base, path))?;
        tracing::trace!(%method, pattern = pattern.source(), "route registered");
        self.routes.push(Route {
            method,
            path: path.to_string(),
            pattern,
            handler: Arc::new(handler),
        });
        Ok(self)
    }

    /// Register a GET route
    pub fn get<F>(&mut self, path: &str, handler: F) -> Result<&mut Self>
    where
        F: Fn(&Request<'_>, &mut Response) + Send + Sync + 'static,
    {
        self.route(Method::Get, path, handler)
    }

    /// Register a POST route
    pub fn post<F>(&mut self, path: &str, handler: F) -> Result<&mut Self>
    where
        F: Fn(&Request<'_>, &mut Response) + Send + Sync + 'static,
    {
        self.route(Method::Post, path, handler)
    }

    /// Register a PUT route
    pub fn put<F>(&mut self, path: &str, handler: F) -> Result<&mut Self>
    where
        F: Fn(&Request<'_>, &mut Response) + Send + Sync + 'static,
    {
        self.route(Method::Put, path, handler)
    }

    /// Register a DELETE route
    pub fn delete<F>(&mut self, path: &str, handler: F) -> Result<&mut Self>
    where
        F: Fn(&Request<'_>, &mut Response) + Send + Sync + 'static,
    {
        self.route(Method::Delete, path, handler)
    }

    /// Register a PATCH route
    pub fn patch<F>(&mut self, path: &str, handler: F) -> Result<&mut Self>
    where
        F: Fn(&Request<'_>, &mut Response) + Send + Sync + 'static,
    {
        self.route(Method::Patch, path, handler)
    }

    /// Append a middleware closure
    pub fn use_fn<F>(&mut self, f: F) -> &mut Self
    where
        F: for<'a, 'c> Fn(&mut Request<'a>, &mut Response, Next<'c, 'a>, &mut Cleanup)
            + Send
            + Sync
            + 'static,
    {
        self.middleware.push(Arc::new(from_fn(f)));
        self
    }

    /// Append a middleware value
    pub fn use_middleware<M: Middleware + 'static>(&mut self, middleware: M) -> &mut Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Register a handler for the named route parameter
    pub fn param<F>(&mut self, name: &str, handler: F) -> &mut Self
    where
        F: for<'a> Fn(&mut Request<'a>, &mut Response, &'a str) -> Flow + Send + Sync + 'static,
    {
        self.params.push((name.to_string(), Arc::new(handler)));
        self
    }

    /// Register an error handler
    pub fn error_handler<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&HandlerError, &Request<'_>, &mut Response) -> Flow + Send + Sync + 'static,
    {
        self.error_handlers.push(Arc::new(handler));
        self
    }

    /// Mount `child` under `path`
    ///
    /// The child's routes (and its own children) are recompiled against the
    /// joined base path. `path` may contain `:name` tokens.
    pub fn mount(&mut self, path: &str, mut child: Router) -> Result<&mut Self> {
        child.mount_path = path.to_string();
        child.rebase(&self.base)?;
        tracing::trace!(base = %child.base, routes = child.route_count(), "router mounted");
        self.children.push(child);
        Ok(self)
    }

    /// Routes registered here and in every mounted router
    pub fn route_count(&self) -> usize {
        self.routes.len() + self.children.iter().map(Router::route_count).sum::<usize>()
    }

    fn rebase(&mut self, parent_base: &str) -> Result<()> {
        self.base = normalize_base(&join(parent_base, &self.mount_path));
        self.base_pattern = BasePattern::compile(&self.base)?;
        for route in &mut self.routes {
            route.pattern = PathPattern::compile(&join(&self.base, &route.path))?;
        }
        let base = self.base.clone();
        for child in &mut self.children {
            child.rebase(&base)?;
        }
        Ok(())
    }

    /// Dispatch a request through the whole router tree
    ///
    /// Always leaves `res` sent: by a handler, by the default error
    /// response, or with a 404.
    pub fn handle<'a>(&self, req: &mut Request<'a>, res: &mut Response, cleanup: &mut Cleanup) {
        self.dispatch(req, res, cleanup);
        if res.did_send() {
            return;
        }

        if let Some(err) = res.error_value().cloned() {
            tracing::debug!(status = err.status.0, error = %err.message, "unhandled application error");
            res.set_status(err.status);
            res.send_text(err.message);
            return;
        }

        tracing::debug!(method = %req.method(), path = req.path(), "no route matched");
        res.set_status(StatusCode::NOT_FOUND);
        res.send_text(format!("Cannot {} {}", req.method(), req.path()));
    }

    /// Dispatch with a fresh response and cleanup list
    pub fn respond(&self, req: &mut Request<'_>) -> (Response, Cleanup) {
        let mut res = Response::with_referer(req.referer());
        let mut cleanup = Cleanup::new();
        self.handle(req, &mut res, &mut cleanup);
        (res, cleanup)
    }

    /// Returns true when this router or one of its children found a route
    fn dispatch<'a>(&self, req: &mut Request<'a>, res: &mut Response, cleanup: &mut Cleanup) -> bool {
        if !self.base_pattern.accepts(req.path()) {
            return false;
        }

        let mut found = false;
        let mut endpoint = |req: &mut Request<'a>, res: &mut Response, cleanup: &mut Cleanup| {
            found = self.route_step(req, res);
            if found {
                return;
            }
            for child in &self.children {
                if res.has_error() {
                    break;
                }
                found |= child.dispatch(req, res, cleanup);
            }
        };
        Next::new(&self.middleware, &mut endpoint).run(req, res, cleanup);

        if res.has_pending_error() {
            self.run_error_handlers(req, res);
        }
        found
    }

    fn route_step<'a>(&self, req: &mut Request<'a>, res: &mut Response) -> bool {
        if res.has_error() {
            return false;
        }

        let path = req.path();
        let method = req.method();
        let Some((route, m)) = self
            .routes
            .iter()
            .filter(|r| r.method == method)
            .find_map(|r| r.pattern.matches(path).map(|m| (r, m)))
        else {
            return false;
        };

        tracing::trace!(%method, path, pattern = route.pattern.source(), "route matched");
        req.set_params(m.params);

        if self.run_param_handlers(req, res) == Flow::Stop || res.has_error() {
            return true;
        }
        (route.handler)(&*req, res);
        true
    }

    fn run_param_handlers<'a>(&self, req: &mut Request<'a>, res: &mut Response) -> Flow {
        for (name, handler) in &self.params {
            let Some(value) = req.param(name) else {
                continue;
            };
            if handler(req, res, value) == Flow::Stop {
                return Flow::Stop;
            }
        }
        Flow::Next
    }

    fn run_error_handlers(&self, req: &Request<'_>, res: &mut Response) {
        let Some(err) = res.error_value().cloned() else {
            return;
        };
        for handler in &self.error_handlers {
            if handler(&err, req, res) == Flow::Stop {
                res.mark_error_handled();
                return;
            }
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("base", &self.base)
            .field(
                "routes",
                &self
                    .routes
                    .iter()
                    .map(|r| format!("{} {}", r.method, r.pattern.source()))
                    .collect::<Vec<_>>(),
            )
            .field("middleware", &self.middleware.len())
            .field("children", &self.children)
            .finish()
    }
}
