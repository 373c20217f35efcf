//! ember-core: embeddable HTTP/1.1 server engine
//!
//! - per-request bump arena backing every byte of a [`Request`]
//! - `httparse`-based incremental parser with a shared size limit
//! - composable [`Router`]s with middleware, param and error handlers
//! - tokio connection engine with read timeout and graceful shutdown
//!
//! ## Example
//! ```no_run
//! use ember_core::{Router, ServerConfig};
//!
//! fn main() -> ember_core::Result<()> {
//!     let mut router = Router::new();
//!     router.get("/hello/:name", |req, res| {
//!         let name = req.param("name").unwrap_or("world");
//!         res.send_text(format!("Hello, {}!", name));
//!     })?;
//!
//!     ember_core::logging::init();
//!     ember_core::run(ServerConfig::from_env()?, router)
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod arena;
pub mod config;
pub mod cookie;
pub mod error;
pub mod logging;
pub mod middleware;
pub mod mime;
pub mod parser;
pub mod request;
pub mod response;
pub mod router;
pub mod server;

// Re-exports
pub use arena::Arena;
pub use config::ServerConfig;
pub use cookie::{CookieOptions, SameSite};
pub use error::{Error, ErrorKind, Result};
pub use middleware::{Cleanup, Flow, Middleware, Next};
pub use parser::Method;
pub use request::{Request, RequestBuilder};
pub use response::{HandlerError, Response, StatusCode};
pub use router::Router;
pub use server::{run, Server, ServerHandle};
