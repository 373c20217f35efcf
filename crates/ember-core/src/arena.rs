//! Per-request memory arena
//!
//! Every byte a [`Request`](crate::Request) points at is copied into one
//! fixed-capacity bump arena when the request is built. The arena is created
//! when a connection is dispatched and released as a unit once the response
//! is written and every cleanup callback has run.
//!
//! Capacity is enforced by the arena itself: every allocation is charged
//! against the configured size before it reaches bumpalo, and a request
//! that would go past it fails with [`Error::OutOfArena`]. The backing chunk
//! is reserved fallibly, so an allocator failure aborts only the request
//! being dispatched.
//!
//! Release consumes the arena, so a double release does not type-check, and
//! borrowed allocations cannot outlive it.

use crate::{Error, Result};
use bumpalo::Bump;
use std::cell::Cell;

/// Default arena capacity (4 MiB)
pub const DEFAULT_ARENA_SIZE: usize = 4 * 1024 * 1024;

/// Largest capacity a server configuration accepts (1 GiB)
pub const MAX_ARENA_SIZE: usize = 1024 * 1024 * 1024;

/// Fixed-capacity bump allocator scoped to one request
#[derive(Debug)]
pub struct Arena {
    bump: Bump,
    capacity: usize,
    used: Cell<usize>,
}

impl Arena {
    /// Reserve an arena that can hold at most `capacity` bytes
    pub fn try_with_capacity(capacity: usize) -> Result<Self> {
        let bump = Bump::try_with_capacity(capacity).map_err(|_| Error::OutOfArena {
            requested: capacity,
            capacity,
        })?;
        Ok(Self {
            bump,
            capacity,
            used: Cell::new(0),
        })
    }

    /// Configured capacity in bytes
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes charged so far, including worst-case alignment padding
    pub fn allocated(&self) -> usize {
        self.used.get()
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.used.get()
    }

    /// Move a value into the arena
    ///
    /// The value's destructor never runs, so only `Copy` data is accepted.
    pub fn alloc<T: Copy>(&self, value: T) -> Result<&mut T> {
        let size = std::mem::size_of::<T>() + std::mem::align_of::<T>() - 1;
        self.charge(size)?;
        self.bump.try_alloc(value).map_err(|_| self.exhausted(size))
    }

    /// Copy a byte slice into the arena
    pub fn alloc_bytes(&self, bytes: &[u8]) -> Result<&[u8]> {
        if bytes.is_empty() {
            return Ok(&[]);
        }
        self.charge(bytes.len())?;
        self.bump
            .try_alloc_slice_copy(bytes)
            .map(|slot| &*slot)
            .map_err(|_| self.exhausted(bytes.len()))
    }

    /// Copy a string into the arena
    pub fn alloc_str(&self, s: &str) -> Result<&str> {
        if s.is_empty() {
            return Ok("");
        }
        self.charge(s.len())?;
        self.bump
            .try_alloc_str(s)
            .map(|slot| &*slot)
            .map_err(|_| self.exhausted(s.len()))
    }

    /// Release the backing memory
    pub fn release(self) {
        tracing::trace!(
            capacity = self.capacity,
            used = self.used.get(),
            "arena released"
        );
        drop(self.bump);
    }

    fn charge(&self, requested: usize) -> Result<()> {
        match self.used.get().checked_add(requested) {
            Some(total) if total <= self.capacity => {
                self.used.set(total);
                Ok(())
            }
            _ => Err(self.exhausted(requested)),
        }
    }

    fn exhausted(&self, requested: usize) -> Error {
        Error::OutOfArena {
            requested,
            capacity: self.capacity,
        }
    }
}
