/*!
 * Packed Thread Counts
 *
 * The pool's three worker counters live in one `AtomicU64` so they always
 * change together. The only way to modify the shared value is a
 * compare-and-swap of a whole snapshot.
 *
 * # Layout
 *
 * ```text
 *  63        48 47        32 31        16 15         0
 * +------------+------------+------------+------------+
 * |   unused   |    goal    |  existing  |  working   |
 * +------------+------------+------------+------------+
 * ```
 */

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of the pool's worker counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadCounts {
    /// Workers released to process work (awake or about to be)
    pub num_processing_work: u16,
    /// Worker threads alive, working or parked
    pub num_existing_threads: u16,
    /// Target concurrency chosen by hill climbing
    pub num_threads_goal: u16,
}

impl ThreadCounts {
    pub const fn new(working: u16, existing: u16, goal: u16) -> Self {
        Self {
            num_processing_work: working,
            num_existing_threads: existing,
            num_threads_goal: goal,
        }
    }

    #[inline(always)]
    const fn pack(self) -> u64 {
        (self.num_processing_work as u64)
            | ((self.num_existing_threads as u64) << 16)
            | ((self.num_threads_goal as u64) << 32)
    }

    #[inline(always)]
    const fn unpack(raw: u64) -> Self {
        Self {
            num_processing_work: raw as u16,
            num_existing_threads: (raw >> 16) as u16,
            num_threads_goal: (raw >> 32) as u16,
        }
    }

    /// `working <= existing` and a positive goal
    #[inline]
    pub const fn is_consistent(&self) -> bool {
        self.num_processing_work <= self.num_existing_threads && self.num_threads_goal > 0
    }
}

/// Atomic cell holding a [`ThreadCounts`]
pub struct AtomicThreadCounts(AtomicU64);

impl AtomicThreadCounts {
    pub const fn new(counts: ThreadCounts) -> Self {
        Self(AtomicU64::new(counts.pack()))
    }

    #[inline]
    pub fn load(&self) -> ThreadCounts {
        ThreadCounts::unpack(self.0.load(Ordering::Acquire))
    }

    /// Replace `current` with `new`; on failure returns the actual value
    #[inline]
    pub fn compare_exchange(
        &self,
        current: ThreadCounts,
        new: ThreadCounts,
    ) -> Result<ThreadCounts, ThreadCounts> {
        self.0
            .compare_exchange(current.pack(), new.pack(), Ordering::AcqRel, Ordering::Acquire)
            .map(ThreadCounts::unpack)
            .map_err(ThreadCounts::unpack)
    }

    /// CAS loop: apply `f` until it wins or declines
    ///
    /// Returns `(old, new)` on success, or the last observed value when `f`
    /// returned `None`.
    pub fn fetch_update<F>(&self, mut f: F) -> Result<(ThreadCounts, ThreadCounts), ThreadCounts>
    where
        F: FnMut(ThreadCounts) -> Option<ThreadCounts>,
    {
        let mut current = self.load();
        loop {
            let Some(new) = f(current) else {
                return Err(current);
            };
            match self.compare_exchange(current, new) {
                Ok(_) => return Ok((current, new)),
                Err(actual) => current = actual,
            }
        }
    }
}
