/*!
 * Low-Level Monitor
 *
 * A non-recursive lock paired with a condition variable, built on
 * parking_lot. This is the only primitive in the crate that blocks an OS
 * thread directly; everything else (per-thread wait state, LIFO semaphore
 * nodes) is layered on top of it.
 *
 * # Lock Discipline
 *
 * Release by a thread that does not hold the monitor is a programming error.
 * Debug builds track the owning thread and assert on misuse; release builds
 * carry no owner field at all.
 */

#[cfg(debug_assertions)]
use super::token::ThreadToken;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::ops::{Deref, DerefMut};
#[cfg(debug_assertions)]
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Mutual exclusion over `T` with an attached condition variable
///
/// Wake order of the condition variable is whatever parking_lot provides
/// (FIFO in practice); callers that need a specific order build it
/// themselves on top of one monitor per waiter.
pub struct LowLevelMonitor<T> {
    state: Mutex<T>,
    condvar: Condvar,
    #[cfg(debug_assertions)]
    owner: AtomicU64,
}

/// RAII guard for a held [`LowLevelMonitor`]
#[must_use]
pub struct MonitorGuard<'a, T> {
    monitor: &'a LowLevelMonitor<T>,
    guard: MutexGuard<'a, T>,
}

impl<T> LowLevelMonitor<T> {
    /// Create a monitor protecting `value`
    pub const fn new(value: T) -> Self {
        Self {
            state: Mutex::new(value),
            condvar: Condvar::new(),
            #[cfg(debug_assertions)]
            owner: AtomicU64::new(0),
        }
    }

    /// Acquire the monitor, blocking until it is free
    #[inline]
    pub fn acquire(&self) -> MonitorGuard<'_, T> {
        self.verify_is_not_locked();
        let guard = self.state.lock();
        self.set_owner();
        MonitorGuard {
            monitor: self,
            guard,
        }
    }

    /// Acquire the monitor if it is free
    #[inline]
    pub fn try_acquire(&self) -> Option<MonitorGuard<'_, T>> {
        let guard = self.state.try_lock()?;
        self.set_owner();
        Some(MonitorGuard {
            monitor: self,
            guard,
        })
    }

    /// Whether any thread currently holds the monitor (diagnostics only)
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.state.is_locked()
    }

    /// Assert that the calling thread holds the monitor (debug builds)
    #[inline]
    pub fn verify_is_locked(&self) {
        #[cfg(debug_assertions)]
        debug_assert_eq!(
            self.owner.load(Ordering::Relaxed),
            ThreadToken::current().as_u64(),
            "monitor is not held by the calling thread"
        );
    }

    /// Assert that the calling thread does not hold the monitor (debug builds)
    #[inline]
    pub fn verify_is_not_locked(&self) {
        #[cfg(debug_assertions)]
        debug_assert_ne!(
            self.owner.load(Ordering::Relaxed),
            ThreadToken::current().as_u64(),
            "monitor is not recursive"
        );
    }

    #[inline(always)]
    fn set_owner(&self) {
        #[cfg(debug_assertions)]
        self.owner
            .store(ThreadToken::current().as_u64(), Ordering::Relaxed);
    }

    #[inline(always)]
    fn clear_owner(&self) {
        #[cfg(debug_assertions)]
        {
            self.verify_is_locked();
            self.owner.store(0, Ordering::Relaxed);
        }
    }
}

impl<T: Default> Default for LowLevelMonitor<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<'a, T> MonitorGuard<'a, T> {
    /// Release the monitor and block until signaled, then reacquire
    ///
    /// Spurious wakeups are possible; callers re-check their condition.
    #[inline]
    pub fn wait(&mut self) {
        self.monitor.clear_owner();
        self.monitor.condvar.wait(&mut self.guard);
        self.monitor.set_owner();
    }

    /// Like [`wait`](Self::wait) with a deadline
    ///
    /// Returns `false` if the deadline passed without a signal.
    #[inline]
    pub fn wait_until(&mut self, deadline: Instant) -> bool {
        self.monitor.clear_owner();
        let result = self.monitor.condvar.wait_until(&mut self.guard, deadline);
        self.monitor.set_owner();
        !result.timed_out()
    }

    /// Like [`wait`](Self::wait) with a relative timeout
    #[inline]
    pub fn wait_for(&mut self, timeout: Duration) -> bool {
        self.monitor.clear_owner();
        let result = self.monitor.condvar.wait_for(&mut self.guard, timeout);
        self.monitor.set_owner();
        !result.timed_out()
    }

    /// Wake one thread blocked on this monitor
    #[inline]
    pub fn signal(&self) {
        self.monitor.condvar.notify_one();
    }

    /// Wake every thread blocked on this monitor
    #[inline]
    pub fn signal_all(&self) {
        self.monitor.condvar.notify_all();
    }

    /// Wake one waiter and release the monitor
    #[inline]
    pub fn signal_release(self) {
        self.signal();
        drop(self);
    }
}

impl<T> Deref for MonitorGuard<'_, T> {
    type Target = T;

    #[inline(always)]
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for MonitorGuard<'_, T> {
    #[inline(always)]
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for MonitorGuard<'_, T> {
    fn drop(&mut self) {
        self.monitor.clear_owner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_monitor_signal_wakes_waiter() {
        let monitor = Arc::new(LowLevelMonitor::new(false));
        let monitor_clone = monitor.clone();

        let handle = thread::spawn(move || {
            let mut guard = monitor_clone.acquire();
            while !*guard {
                guard.wait();
            }
        });

        thread::sleep(Duration::from_millis(20));
        let mut guard = monitor.acquire();
        *guard = true;
        guard.signal_release();

        handle.join().unwrap();
    }

    #[test]
    fn test_monitor_wait_timeout() {
        let monitor = LowLevelMonitor::new(());
        let mut guard = monitor.acquire();
        let start = Instant::now();
        assert!(!guard.wait_for(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_monitor_try_acquire() {
        let monitor = LowLevelMonitor::new(5u32);
        let guard = monitor.acquire();
        assert!(monitor.is_locked());
        assert_eq!(*guard, 5);
        drop(guard);
        assert!(monitor.try_acquire().is_some());
    }

    #[test]
    fn test_monitor_owner_tracking() {
        let monitor = LowLevelMonitor::new(0u8);
        let guard = monitor.acquire();
        monitor.verify_is_locked();
        drop(guard);
        monitor.verify_is_not_locked();
    }
}
