/*!
 * LIFO Wake Semaphore
 *
 * Counting semaphore that always wakes the most recently blocked waiter
 * first. Used to park pool workers: a worker that just went idle still has a
 * warm stack and cache, so handing it the next work item beats round-robin.
 *
 * # Design
 *
 * - A lock-protected stack of waiter nodes, one reusable node per thread
 *   (thread-local, reset between waits, never reallocated)
 * - Each node blocks on its own [`LowLevelMonitor`], so a release wakes
 *   exactly the threads it popped
 * - Signals with nobody waiting accumulate in `signal_count`
 *
 * Waits are not interruptible; only a release or the timeout ends them.
 */

use super::monitor::LowLevelMonitor;
use crate::core::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-thread waiter node
struct LifoWaiter {
    monitor: LowLevelMonitor<bool>,
}

thread_local! {
    static WAITER: Arc<LifoWaiter> = Arc::new(LifoWaiter {
        monitor: LowLevelMonitor::new(false),
    });
}

struct LifoState {
    signal_count: u32,
    /// Top of stack is the last element
    waiters: Vec<Arc<LifoWaiter>>,
}

/// Semaphore with last-in-first-out wake order
pub struct LifoSemaphore {
    state: Mutex<LifoState>,
    maximum: u32,
}

impl LifoSemaphore {
    /// Create a semaphore with `initial` signals and a cap of `maximum`
    pub fn new(initial: u32, maximum: u32) -> SyncResult<Self> {
        if maximum == 0 {
            return Err(SyncError::invalid_argument(
                "LIFO semaphore maximum must be positive",
            ));
        }
        if initial > maximum {
            return Err(SyncError::invalid_argument(format!(
                "initial count {} exceeds maximum {}",
                initial, maximum
            )));
        }

        Ok(Self {
            state: Mutex::new(LifoState {
                signal_count: initial,
                waiters: Vec::new(),
            }),
            maximum,
        })
    }

    /// Semaphore with no signals and a cap of `maximum` (at least 1)
    pub fn empty(maximum: u32) -> Self {
        Self {
            state: Mutex::new(LifoState {
                signal_count: 0,
                waiters: Vec::new(),
            }),
            maximum: maximum.max(1),
        }
    }

    /// Take one signal, blocking up to `timeout` (`None` = forever)
    ///
    /// Returns `false` on timeout.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let waiter = WAITER.with(Arc::clone);

        {
            let mut state = self.state.lock();
            if state.signal_count > 0 {
                state.signal_count -= 1;
                return true;
            }
            if timeout == Some(Duration::ZERO) {
                return false;
            }

            *waiter.monitor.acquire() = false;
            state.waiters.push(Arc::clone(&waiter));
        }

        let mut signaled = waiter.monitor.acquire();
        while !*signaled {
            match deadline {
                None => signaled.wait(),
                Some(deadline) => {
                    if !signaled.wait_until(deadline) {
                        break;
                    }
                }
            }
        }
        if *signaled {
            *signaled = false;
            return true;
        }
        drop(signaled);

        // Timed out. If the node is still stacked nobody claimed it; otherwise
        // a releaser already popped it and its signal is on the way.
        let unregistered = {
            let mut state = self.state.lock();
            match state.waiters.iter().rposition(|w| Arc::ptr_eq(w, &waiter)) {
                Some(pos) => {
                    state.waiters.remove(pos);
                    true
                }
                None => false,
            }
        };
        if unregistered {
            return false;
        }

        let mut signaled = waiter.monitor.acquire();
        while !*signaled {
            signaled.wait();
        }
        *signaled = false;
        true
    }

    /// Release `count` signals, waking up to `count` waiters newest-first
    ///
    /// Returns the signal count before the release. Fails without changing
    /// state if the undelivered signals would exceed the maximum.
    pub fn release(&self, count: u32) -> SyncResult<u32> {
        if count == 0 {
            return Err(SyncError::invalid_argument("release count must be positive"));
        }

        let mut state = self.state.lock();
        let waking = (count as usize).min(state.waiters.len());
        let remaining = count - waking as u32;
        let previous = state.signal_count;

        match previous.checked_add(remaining) {
            Some(total) if total <= self.maximum => state.signal_count = total,
            _ => {
                return Err(SyncError::CountExceeded {
                    count: previous,
                    release: count,
                    maximum: self.maximum,
                })
            }
        }

        for _ in 0..waking {
            if let Some(waiter) = state.waiters.pop() {
                let mut signaled = waiter.monitor.acquire();
                *signaled = true;
                signaled.signal_release();
            }
        }

        Ok(previous)
    }

    /// Signals available without blocking
    #[inline]
    pub fn signal_count(&self) -> u32 {
        self.state.lock().signal_count
    }

    /// Threads currently blocked in [`wait`](Self::wait)
    #[inline]
    pub fn waiter_count(&self) -> usize {
        self.state.lock().waiters.len()
    }

    #[inline]
    pub fn maximum(&self) -> u32 {
        self.maximum
    }
}
