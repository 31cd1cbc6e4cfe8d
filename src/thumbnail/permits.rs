//! Process-local bound on concurrent conversions.
//!
//! Each server process runs at most `capacity` media conversions at once;
//! the system-wide total is the sum over processes. Permits are only held
//! around the conversion itself, never while waiting on a cache-file lock.

use std::sync::{Condvar, Mutex, PoisonError};

/// Counting semaphore handing out RAII [`Permit`]s.
#[derive(Debug)]
pub struct PermitPool {
    available: Mutex<usize>,
    released: Condvar,
    capacity: usize,
}

/// Returned to the pool on drop.
#[derive(Debug)]
pub struct Permit<'a> {
    pool: &'a PermitPool,
}

impl PermitPool {
    /// A pool of `capacity` permits. Zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            available: Mutex::new(capacity),
            released: Condvar::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        *self.available.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until a permit is free.
    pub fn acquire(&self) -> Permit<'_> {
        let mut available = self.available.lock().unwrap_or_else(PoisonError::into_inner);
        while *available == 0 {
            available = self
                .released
                .wait(available)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *available -= 1;
        Permit { pool: self }
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        let mut available = self
            .pool
            .available
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *available += 1;
        self.pool.released.notify_one();
    }
}
