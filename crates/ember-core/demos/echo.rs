//! Echo server
//!
//! ```text
//! EMBER_PORT=8080 EMBER_LOG=ember_core=debug cargo run --example echo
//! curl localhost:8080/echo/hello
//! curl -X POST -d '_method=delete' localhost:8080/api/items/7
//! ```

use ember_core::middleware::{Pool, PoolMiddleware};
use ember_core::{Flow, HandlerError, Router, ServerConfig, StatusCode};
use std::time::{Duration, Instant};

fn api() -> ember_core::Result<Router> {
    let mut api = Router::new();

    api.use_middleware(PoolMiddleware::new(
        Pool::new((1..=4).map(|n| format!("backend-{}", n))),
        "backend",
    ))
    .param("id", |req, res, id| {
        if id.parse::<u64>().is_err() {
            res.error(HandlerError::new(StatusCode::BAD_REQUEST, format!("bad id {}", id)));
            return Flow::Stop;
        }
        req.set_local("id", id.to_string());
        Flow::Next
    });

    api.get("/items/:id", |req, res| {
        let backend = req
            .local::<ember_core::middleware::Lease<String>>("backend")
            .and_then(|lease| lease.with(|name| name.clone()))
            .unwrap_or_default();
        res.send_json(format!(
            r#"{{"id":"{}","backend":"{}"}}"#,
            req.param("id").unwrap_or(""),
            backend
        ));
    })?
    .delete("/items/:id", |req, res| {
        res.set_status(StatusCode::NO_CONTENT);
        res.set_header("X-Deleted", req.param("id").unwrap_or(""));
        res.send("");
    })?;

    Ok(api)
}

fn main() -> ember_core::Result<()> {
    ember_core::logging::init();

    let mut router = Router::new();
    router.use_fn(|req, res, next, cleanup| {
        let started = Instant::now();
        let method = req.method();
        let path = req.path().to_string();
        next.run(req, res, cleanup);
        let status = res.status();
        cleanup.register(move || {
            tracing::info!(
                %method,
                path = %path,
                status = status.0,
                elapsed_us = started.elapsed().as_micros() as u64,
                "request"
            );
        });
    });

    router
        .get("/", |_, res| {
            res.send("<h1>ember</h1>");
        })?
        .get("/echo/:word", |req, res| {
            res.send_text(req.param("word").unwrap_or("").to_string());
        })?
        .post("/echo", |req, res| {
            let body = req.body().to_vec();
            res.send_text(body);
        })?
        .get("/slow", |_, res| {
            std::thread::sleep(Duration::from_millis(250));
            res.send_text("done");
        })?
        .get("/back", |_, res| {
            res.redirect("back");
        })?;

    router.mount("/api", api()?)?;

    router.error_handler(|err, req, res| {
        tracing::warn!(path = req.path(), error = %err, "request failed");
        res.set_status(err.status);
        res.send_json(format!(r#"{{"error":"{}"}}"#, err.message));
        Flow::Stop
    });

    ember_core::run(ServerConfig::from_env()?, router)
}
