//! Bounded worker tokens for chunk handlers
//!
//! Range iteration delivers chunks sequentially, but datatype handlers fan
//! the actual work out to worker threads. The [`HandlerPool`] bounds that
//! fan-out two ways:
//!
//! - **Handler tokens** cap the number of concurrent chunk workers
//!   (default: hardware threads). Tokens are RAII guards; dropping one
//!   releases it and wakes waiters.
//! - A separate **throttle** bounds compute-heavy operations globally.
//!
//! Large operations acquire token batches through a spawn gate so they
//! capture their workers atomically, FIFO-fairly against both other large
//! jobs and single-chunk jobs. `drain` gives shutdown a bounded wait for
//! in-flight handlers.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default cap on globally throttled compute-heavy operations.
pub const DEFAULT_MAX_THROTTLED_OPS: usize = 16;

struct PoolInner {
    max_handlers: usize,
    available: Mutex<usize>,
    token_returned: Condvar,
    spawn_gate: Mutex<()>,
    max_throttled: usize,
    throttle_available: Mutex<usize>,
    throttle_returned: Condvar,
}

/// Bounded pool of chunk-handler tokens plus a global compute throttle.
#[derive(Clone)]
pub struct HandlerPool {
    inner: Arc<PoolInner>,
}

/// RAII handler token; dropping it returns the slot and wakes waiters.
pub struct HandlerToken {
    inner: Arc<PoolInner>,
}

/// RAII throttle slot for compute-heavy operations.
pub struct ThrottleToken {
    inner: Arc<PoolInner>,
}

impl HandlerPool {
    /// A pool with explicit bounds.
    pub fn new(max_handlers: usize, max_throttled: usize) -> Self {
        let max_handlers = max_handlers.max(1);
        let max_throttled = max_throttled.max(1);
        HandlerPool {
            inner: Arc::new(PoolInner {
                max_handlers,
                available: Mutex::new(max_handlers),
                token_returned: Condvar::new(),
                spawn_gate: Mutex::new(()),
                max_throttled,
                throttle_available: Mutex::new(max_throttled),
                throttle_returned: Condvar::new(),
            }),
        }
    }

    /// A pool sized to the hardware thread count.
    pub fn with_default_size() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self::new(threads, DEFAULT_MAX_THROTTLED_OPS)
    }

    /// Block until a handler token is available.
    ///
    /// Single-token acquisition passes through the spawn gate too, so a
    /// large job draining the pool cannot be starved by a stream of
    /// single-chunk acquisitions arriving behind it.
    pub fn acquire(&self) -> HandlerToken {
        let _gate = self.inner.spawn_gate.lock();
        let mut available = self.inner.available.lock();
        while *available == 0 {
            self.inner.token_returned.wait(&mut available);
        }
        *available -= 1;
        HandlerToken {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Take a handler token only if one is free right now.
    pub fn try_acquire(&self) -> Option<HandlerToken> {
        let mut available = self.inner.available.lock();
        if *available == 0 {
            return None;
        }
        *available -= 1;
        Some(HandlerToken {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Acquire `count` tokens as one atomic unit.
    ///
    /// Holds the spawn gate for the whole acquisition, so a large operation
    /// captures its workers without interleaving with other jobs. `count`
    /// is clamped to the pool size to keep the call satisfiable.
    pub fn acquire_batch(&self, count: usize) -> Vec<HandlerToken> {
        let count = count.min(self.inner.max_handlers);
        let _gate = self.inner.spawn_gate.lock();
        let mut tokens = Vec::with_capacity(count);
        while tokens.len() < count {
            let mut available = self.inner.available.lock();
            while *available == 0 {
                self.inner.token_returned.wait(&mut available);
            }
            let take = (*available).min(count - tokens.len());
            *available -= take;
            drop(available);
            for _ in 0..take {
                tokens.push(HandlerToken {
                    inner: Arc::clone(&self.inner),
                });
            }
        }
        tokens
    }

    /// Block until a throttle slot for a compute-heavy operation is free.
    pub fn throttle(&self) -> ThrottleToken {
        let mut available = self.inner.throttle_available.lock();
        while *available == 0 {
            self.inner.throttle_returned.wait(&mut available);
        }
        *available -= 1;
        ThrottleToken {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Number of handler tokens currently out.
    pub fn active(&self) -> usize {
        self.inner.max_handlers - *self.inner.available.lock()
    }

    /// Total handler token capacity.
    pub fn max_handlers(&self) -> usize {
        self.inner.max_handlers
    }

    /// Wait until every handler token has been returned, or `timeout`
    /// elapses. Returns whether the pool fully drained.
    pub fn drain(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut available = self.inner.available.lock();
        while *available < self.inner.max_handlers {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let _ = self
                .inner
                .token_returned
                .wait_for(&mut available, deadline - now);
        }
        true
    }
}

impl Drop for HandlerToken {
    fn drop(&mut self) {
        let mut available = self.inner.available.lock();
        *available += 1;
        // Waiters include both acquirers and drain; wake them all so the
        // batch acquirer can take several freed tokens at once.
        self.inner.token_returned.notify_all();
    }
}

impl Drop for ThrottleToken {
    fn drop(&mut self) {
        let mut available = self.inner.throttle_available.lock();
        *available += 1;
        self.inner.throttle_returned.notify_all();
    }
}
