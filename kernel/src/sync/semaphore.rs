//! Counting semaphore and the one-shot completion signal built on it.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::task::clock::Timestamp;

// ── Semaphore ───────────────────────────────────────────────────

/// Counting semaphore. `release` adds a permit, `acquire` takes one and
/// blocks while there are none.
pub struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    pub fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            available: Condvar::new(),
        }
    }

    pub fn release(&self) {
        let mut permits = self.permits.lock();
        *permits += 1;
        self.available.notify_one();
    }

    /// Take a permit, waiting as long as it takes.
    pub fn acquire(&self) {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.available.wait(&mut permits);
        }
        *permits -= 1;
    }

    /// Take a permit, giving up at `deadline`. Returns whether a permit was
    /// taken.
    pub fn acquire_until(&self, deadline: Timestamp) -> bool {
        let instant = deadline.to_instant();
        let mut permits = self.permits.lock();
        while *permits == 0 {
            if self.available.wait_until(&mut permits, instant).timed_out() {
                break;
            }
        }
        if *permits == 0 {
            return false;
        }
        *permits -= 1;
        true
    }

    pub fn try_acquire(&self) -> bool {
        let mut permits = self.permits.lock();
        if *permits == 0 {
            return false;
        }
        *permits -= 1;
        true
    }

    pub fn permits(&self) -> usize {
        *self.permits.lock()
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new(0)
    }
}

// ── Completion signal ───────────────────────────────────────────

/// Released exactly once by a worker when a synchronously dispatched item
/// has finished. The waiting caller owns it; the item only holds a weak
/// reference.
pub struct CompletionSignaler {
    sema: Semaphore,
}

impl CompletionSignaler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sema: Semaphore::new(0),
        })
    }

    pub fn signal(&self) {
        self.sema.release();
    }

    pub fn wait(&self) {
        self.sema.acquire();
    }

    pub fn wait_until(&self, deadline: Timestamp) -> bool {
        self.sema.acquire_until(deadline)
    }
}
