//! Capacity-bounded resource pool
//!
//! Items (typically downstream connections) are handed out one per request.
//! Acquisition blocks until an item is free; the guard puts it back on drop.
//! [`PoolMiddleware`] ties one lease to each request and releases it from
//! the request's cleanup list, so the item comes back on every exit path.

use super::{Cleanup, Middleware, Next};
use crate::{HandlerError, Request, Response};
use parking_lot::{Condvar, Mutex};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Inner<T> {
    items: Mutex<Vec<T>>,
    available: Condvar,
    capacity: usize,
}

impl<T> Inner<T> {
    fn put_back(&self, item: T) {
        self.items.lock().push(item);
        self.available.notify_one();
    }
}

/// Shared pool of reusable items
pub struct Pool<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Pool<T> {
    /// Create a pool owning `items`; capacity is their count
    pub fn new(items: impl IntoIterator<Item = T>) -> Self {
        let items: Vec<T> = items.into_iter().collect();
        let capacity = items.len();
        Self {
            inner: Arc::new(Inner {
                items: Mutex::new(items),
                available: Condvar::new(),
                capacity,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Items currently idle
    pub fn available(&self) -> usize {
        self.inner.items.lock().len()
    }

    /// Block until an item is free
    pub fn acquire(&self) -> Pooled<T> {
        let mut items = self.inner.items.lock();
        loop {
            if let Some(item) = items.pop() {
                return self.guard(item);
            }
            self.inner.available.wait(&mut items);
        }
    }

    /// Take an item only if one is idle
    pub fn try_acquire(&self) -> Option<Pooled<T>> {
        let item = self.inner.items.lock().pop()?;
        Some(self.guard(item))
    }

    /// Block for at most `timeout`
    pub fn acquire_timeout(&self, timeout: Duration) -> Option<Pooled<T>> {
        let deadline = Instant::now() + timeout;
        let mut items = self.inner.items.lock();
        loop {
            if let Some(item) = items.pop() {
                return Some(self.guard(item));
            }
            if self
                .inner
                .available
                .wait_until(&mut items, deadline)
                .timed_out()
            {
                return items.pop().map(|item| self.guard(item));
            }
        }
    }

    fn guard(&self, item: T) -> Pooled<T> {
        Pooled {
            item: Some(item),
            pool: self.inner.clone(),
        }
    }
}

/// Borrowed pool item; returned to the pool on drop
pub struct Pooled<T> {
    item: Option<T>,
    pool: Arc<Inner<T>>,
}

impl<T> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // only emptied in drop
        self.item.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<T> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<T> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.put_back(item);
        }
    }
}

/// A pooled item attached to one request
///
/// Stored in the request locals by [`PoolMiddleware`]; the item goes back to
/// the pool when the request's cleanup callbacks run.
pub struct Lease<T> {
    slot: Arc<Mutex<Option<Pooled<T>>>>,
}

impl<T> Clone for Lease<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<T> Lease<T> {
    fn new(item: Pooled<T>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(item))),
        }
    }

    /// Use the leased item; `None` once released
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.slot.lock().as_mut().map(|item| f(&mut **item))
    }

    pub fn is_released(&self) -> bool {
        self.slot.lock().is_none()
    }

    fn release(&self) {
        drop(self.slot.lock().take());
    }
}

/// Middleware leasing one pool item per request
pub struct PoolMiddleware<T> {
    pool: Pool<T>,
    key: String,
    timeout: Duration,
}

impl<T> PoolMiddleware<T> {
    /// Lease items under the locals key `key`
    pub fn new(pool: Pool<T>, key: impl Into<String>) -> Self {
        Self {
            pool,
            key: key.into(),
            timeout: Duration::from_secs(5),
        }
    }

    /// How long to wait for a free item before failing with 503
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl<T: Send + 'static> Middleware for PoolMiddleware<T> {
    fn handle<'a>(
        &self,
        req: &mut Request<'a>,
        res: &mut Response,
        next: Next<'_, 'a>,
        cleanup: &mut Cleanup,
    ) {
        let Some(item) = self.pool.acquire_timeout(self.timeout) else {
            tracing::warn!(
                key = %self.key,
                capacity = self.pool.capacity(),
                "resource pool exhausted"
            );
            res.error(HandlerError::service_unavailable(format!(
                "No {} available",
                self.key
            )));
            return;
        };

        let lease = Lease::new(item);
        let release = lease.clone();
        cleanup.register(move || release.release());
        req.set_local(self.key.clone(), lease);
        next.run(req, res, cleanup);
    }
}
