//! Connection engine
//!
//! Multi-threaded tokio runtime with:
//! - SO_REUSEADDR / SO_REUSEPORT listener with a configurable backlog
//! - one task per connection: read (bounded by the read timeout), dispatch,
//!   write, close
//! - synchronous router dispatch on the blocking pool
//!
//! A connection is single-request. On every exit path the order is: write
//! the response (if any), run cleanup callbacks, release the arena, close
//! the socket. A request that times out or fails to parse never reaches the
//! router and gets no response. A handler that panics still runs the
//! cleanups registered so far while the dispatch task unwinds.

use crate::arena::Arena;
use crate::config::ServerConfig;
use crate::error::ErrorKind;
use crate::middleware::Cleanup;
use crate::parser::{self, Head, ParseStatus};
use crate::{Error, Request, Response, Result, Router};
use bytes::{Bytes, BytesMut};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

/// Initial read buffer capacity
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Create a TCP listener socket with optimizations
pub fn create_optimized_socket(addr: &SocketAddr, backlog: i32) -> std::io::Result<Socket> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    // SO_REUSEADDR - allow binding to address in TIME_WAIT
    socket.set_reuse_address(true)?;

    // SO_REUSEPORT - enable kernel load balancing across processes
    #[cfg(unix)]
    socket.set_reuse_port(true)?;

    // TCP_NODELAY - disable Nagle's algorithm for lower latency
    socket.set_nodelay(true)?;

    socket.set_nonblocking(true)?;
    socket.bind(&(*addr).into())?;
    socket.listen(backlog)?;

    Ok(socket)
}

// ============================================================================
// Connection Tracking for Graceful Shutdown
// ============================================================================

/// Tracks active connections for graceful shutdown
#[derive(Debug, Default)]
pub struct ConnectionTracker {
    /// Active connection count
    active: AtomicU64,
    /// Shutdown signal received
    shutting_down: AtomicBool,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a connection until the returned guard is dropped
    pub fn track(self: &Arc<Self>) -> ConnectionGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            tracker: Arc::clone(self),
        }
    }

    /// Get current active connection count
    #[inline]
    pub fn count(&self) -> u64 {
        self.active.load(Ordering::SeqCst)
    }

    /// Signal that shutdown is in progress
    pub fn start_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }
}

/// Live connection; decrements the tracker on drop
#[derive(Debug)]
pub struct ConnectionGuard {
    tracker: Arc<ConnectionTracker>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.tracker.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Control handle for a running [`Server`]
#[derive(Debug, Clone)]
pub struct ServerHandle {
    tracker: Arc<ConnectionTracker>,
    stop: Arc<Notify>,
}

impl ServerHandle {
    fn new() -> Self {
        Self {
            tracker: Arc::new(ConnectionTracker::new()),
            stop: Arc::new(Notify::new()),
        }
    }

    /// Stop accepting connections; in-flight connections keep running
    pub fn shutdown(&self) {
        self.tracker.start_shutdown();
        self.stop.notify_one();
    }

    /// Stop accepting and wait for active connections to drain
    ///
    /// `None` waits indefinitely. Returns `true` if every connection
    /// finished, `false` if the timeout was reached first.
    pub async fn graceful_shutdown(&self, timeout: Option<Duration>) -> bool {
        self.shutdown();

        let start = Instant::now();
        loop {
            let active = self.tracker.count();
            if active == 0 {
                return true;
            }
            if let Some(t) = timeout {
                if start.elapsed() >= t {
                    tracing::warn!(active, "graceful shutdown timed out");
                    return false;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub fn active_connections(&self) -> u64 {
        self.tracker.count()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.tracker.is_shutting_down()
    }
}

// ============================================================================
// Server
// ============================================================================

/// Bound HTTP server
pub struct Server {
    config: Arc<ServerConfig>,
    router: Arc<Router>,
    listener: TcpListener,
    local_addr: SocketAddr,
    handle: ServerHandle,
}

impl Server {
    /// Bind the listener described by `config`
    pub async fn bind(config: ServerConfig, router: Router) -> Result<Self> {
        config.validate()?;
        let addr = config.addr()?;
        let socket = create_optimized_socket(&addr, config.backlog)?;
        let listener = TcpListener::from_std(socket.into())?;
        let local_addr = listener.local_addr()?;

        tracing::info!(
            addr = %local_addr,
            workers = config.workers,
            routes = router.route_count(),
            read_timeout_ms = config.read_timeout.as_millis() as u64,
            "server listening"
        );

        Ok(Self {
            config: Arc::new(config),
            router: Arc::new(router),
            listener,
            local_addr,
            handle: ServerHandle::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Accept connections until [`ServerHandle::shutdown`] is called
    pub async fn serve(self) -> Result<()> {
        let Server {
            config,
            router,
            listener,
            handle,
            ..
        } = self;
        let mut next_id: u64 = 0;

        loop {
            let accepted = tokio::select! {
                res = listener.accept() => res,
                _ = handle.stop.notified() => break,
            };

            let (stream, peer) = match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    continue;
                }
            };

            // Reject new connections during shutdown
            if handle.tracker.is_shutting_down() {
                drop(stream);
                continue;
            }

            next_id += 1;
            let guard = handle.tracker.track();
            let config = Arc::clone(&config);
            let router = Arc::clone(&router);
            tokio::spawn(async move {
                handle_connection(stream, peer, next_id, &config, router).await;
                drop(guard);
            });
        }

        tracing::info!(active = handle.tracker.count(), "accept loop stopped");
        Ok(())
    }
}

/// Serve on a dedicated multi-thread runtime until interrupted
///
/// Blocks the calling thread. On Ctrl-C the listener stops and live
/// connections get one read timeout to finish.
pub fn run(config: ServerConfig, router: Router) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.workers.max(1))
        .thread_name("ember-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let drain = config.read_timeout;
        let server = Server::bind(config, router).await?;
        let handle = server.handle();

        tokio::select! {
            res = server.serve() => res,
            sig = tokio::signal::ctrl_c() => {
                sig?;
                tracing::info!("interrupt received, draining connections");
                if !handle.graceful_shutdown(Some(drain)).await {
                    tracing::warn!(active = handle.active_connections(), "exiting with live connections");
                }
                Ok(())
            }
        }
    })
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    id: u64,
    config: &ServerConfig,
    router: Arc<Router>,
) {
    tracing::debug!(id, %peer, "connection accepted");
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(id, %peer, error = %e, "set_nodelay failed");
    }

    if let Err(e) = serve_connection(&mut stream, peer, config, router).await {
        log_failure(id, peer, &e);
    }

    if let Err(e) = stream.shutdown().await {
        tracing::debug!(id, %peer, error = %e, "shutdown failed");
    }
    tracing::debug!(id, %peer, "connection closed");
}

async fn serve_connection(
    stream: &mut TcpStream,
    peer: SocketAddr,
    config: &ServerConfig,
    router: Arc<Router>,
) -> Result<()> {
    let (buf, head) =
        match tokio::time::timeout(config.read_timeout, read_request(stream, config.max_request_size)).await {
            Ok(read) => read?,
            Err(_) => return Err(Error::Timeout),
        };

    let arena_size = config.arena_size;
    let Dispatched {
        wire,
        cleanup,
        arena,
    } = tokio::task::spawn_blocking(move || dispatch(&router, &buf, &head, peer, arena_size))
        .await
        .map_err(|e| Error::Internal(format!("dispatch task failed: {}", e)))?;

    let written = match wire {
        Ok(bytes) => write_response(stream, &bytes).await,
        Err(e) => Err(e),
    };
    cleanup.run();
    if let Some(arena) = arena {
        arena.release();
    }
    written
}

/// Read one complete request (head plus `Content-Length` body)
async fn read_request(stream: &mut TcpStream, max_size: usize) -> Result<(BytesMut, Head)> {
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE.min(max_size));
    let mut consumed = 0;

    let head = loop {
        if stream.read_buf(&mut buf).await? == 0 {
            return Err(Error::Parse("connection closed before headers were complete".into()));
        }
        match parser::parse(&buf, consumed, max_size)? {
            ParseStatus::Parsed(head) => break head,
            ParseStatus::Incomplete => consumed = buf.len(),
        }
    };

    while !head.is_complete(buf.len()) {
        buf.reserve(head.total_len() - buf.len());
        if stream.read_buf(&mut buf).await? == 0 {
            return Err(Error::Parse("connection closed before body was complete".into()));
        }
    }

    Ok((buf, head))
}

struct Dispatched {
    wire: Result<Bytes>,
    cleanup: Cleanup,
    /// Absent when the arena could not be reserved
    arena: Option<Arena>,
}

/// Build the request in a fresh arena and run the router
fn dispatch(router: &Router, buf: &[u8], head: &Head, peer: SocketAddr, arena_size: usize) -> Dispatched {
    let mut cleanup = Cleanup::new();
    let arena = match Arena::try_with_capacity(arena_size) {
        Ok(arena) => arena,
        Err(e) => {
            return Dispatched {
                wire: Err(e),
                cleanup,
                arena: None,
            }
        }
    };

    let wire = match Request::from_head(&arena, buf, head, Some(peer)) {
        Ok(mut req) => {
            let mut res = Response::with_referer(req.referer());
            router.handle(&mut req, &mut res, &mut cleanup);
            tracing::debug!(
                method = %req.method(),
                path = req.path(),
                status = res.status().0,
                arena_used = arena.allocated(),
                "request handled"
            );
            res.into_wire()
                .ok_or_else(|| Error::Internal("router finished without a response".into()))
        }
        Err(e) => Err(e),
    };

    Dispatched {
        wire,
        cleanup,
        arena: Some(arena),
    }
}

async fn write_response(stream: &mut TcpStream, bytes: &[u8]) -> Result<()> {
    stream.write_all(bytes).await?;
    stream.flush().await?;
    Ok(())
}

fn log_failure(id: u64, peer: SocketAddr, err: &Error) {
    match err.kind() {
        ErrorKind::Transport => tracing::warn!(id, %peer, error = %err, "transport error"),
        ErrorKind::Parse => tracing::debug!(id, %peer, error = %err, "request rejected"),
        ErrorKind::ResourceExhaustion => {
            tracing::warn!(id, %peer, error = %err, "request aborted")
        }
        ErrorKind::Internal => tracing::error!(id, %peer, error = %err, "request failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Method;
    use crate::RequestBuilder;

    #[test]
    fn test_connection_tracker() {
        let tracker = Arc::new(ConnectionTracker::new());
        let a = tracker.track();
        let b = tracker.track();
        assert_eq!(tracker.count(), 2);
        drop(a);
        assert_eq!(tracker.count(), 1);
        drop(b);
        assert_eq!(tracker.count(), 0);

        assert!(!tracker.is_shutting_down());
        tracker.start_shutdown();
        assert!(tracker.is_shutting_down());
    }

    #[test]
    fn test_optimized_socket() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let socket = create_optimized_socket(&addr, 16).unwrap();
        let local = socket.local_addr().unwrap().as_socket().unwrap();
        assert_ne!(local.port(), 0);
    }

    fn raw_dispatch(router: &Router, raw: &[u8], arena_size: usize) -> Dispatched {
        let head = match parser::parse(raw, 0, usize::MAX).unwrap() {
            ParseStatus::Parsed(head) => head,
            ParseStatus::Incomplete => panic!("incomplete request"),
        };
        dispatch(router, raw, &head, "127.0.0.1:9".parse().unwrap(), arena_size)
    }

    #[test]
    fn test_dispatch_produces_wire() {
        let mut router = Router::new();
        router
            .get("/hi", |_, res| {
                res.send_text("hello");
            })
            .unwrap();

        let raw = RequestBuilder::new(Method::Get, "/hi").to_bytes();
        let out = raw_dispatch(&router, &raw, 4096);
        let wire = out.wire.unwrap();
        assert!(wire.starts_with(b"HTTP/1.1 200 OK\r\n"));
        assert!(wire.ends_with(b"\r\n\r\nhello"));
        out.cleanup.run();
        out.arena.unwrap().release();
    }

    #[test]
    fn test_dispatch_out_of_arena() {
        let router = Router::new();
        let raw = RequestBuilder::new(Method::Post, "/upload")
            .body(vec![b'x'; 2048])
            .to_bytes();
        let out = raw_dispatch(&router, &raw, 256);
        assert!(matches!(out.wire, Err(Error::OutOfArena { .. })));
        assert!(out.cleanup.is_empty());
        assert!(out.arena.is_some());
    }

    #[test]
    fn test_dispatch_unreservable_arena() {
        let router = Router::new();
        let raw = RequestBuilder::new(Method::Get, "/").to_bytes();
        let out = raw_dispatch(&router, &raw, usize::MAX);
        assert!(matches!(out.wire, Err(Error::OutOfArena { .. })));
        assert!(out.arena.is_none());
    }
}
