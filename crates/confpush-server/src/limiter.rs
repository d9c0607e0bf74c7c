//! Concurrent connection cap.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Counts live connections against a maximum (0 = unlimited).
#[derive(Debug)]
pub struct ConnectionLimiter {
    current: AtomicUsize,
    max: usize,
}

impl ConnectionLimiter {
    pub fn new(max: usize) -> Arc<Self> {
        Arc::new(Self {
            current: AtomicUsize::new(0),
            max,
        })
    }

    /// Reserve a slot. The slot is released when the permit drops.
    pub fn try_acquire(self: &Arc<Self>) -> Option<ConnectionPermit> {
        loop {
            let current = self.current.load(Ordering::Acquire);
            if self.max > 0 && current >= self.max {
                return None;
            }
            if self
                .current
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(ConnectionPermit {
                    limiter: Arc::clone(self),
                });
            }
        }
    }

    /// Connections currently holding a permit.
    pub fn current_count(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }

    /// Configured limit (0 = unlimited).
    pub fn max(&self) -> usize {
        self.max
    }
}

/// Held by a connection task for its whole lifetime.
#[derive(Debug)]
pub struct ConnectionPermit {
    limiter: Arc<ConnectionLimiter>,
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        self.limiter.current.fetch_sub(1, Ordering::Release);
    }
}
