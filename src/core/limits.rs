/*!
 * System Limits and Constants
 *
 * Centralized location for the limits, thresholds, and tuning constants of
 * the wait subsystem and the worker pool.
 */

use std::time::Duration;

// =============================================================================
// WAIT SUBSYSTEM LIMITS
// =============================================================================

/// Maximum number of handles in a single wait-any / wait-all
pub const MAX_WAIT_HANDLES: usize = 64;

/// Infinite timeout sentinel for all millisecond-based wait APIs
pub const INFINITE: i32 = -1;

/// Initial handle table capacity (power of 2)
pub const HANDLE_TABLE_INITIAL_CAPACITY: usize = 16;

/// Freed handle indices are only reused once this many are queued
/// Delayed reuse makes use-after-delete fail loudly instead of aliasing
pub const HANDLE_REUSE_THRESHOLD: usize = 256;

/// Largest handle index representable (raw values 0 and u32::MAX are reserved)
pub const MAX_HANDLE_INDEX: usize = (u32::MAX - 2) as usize;

/// Maximum mutex recursion depth
pub const MAX_MUTEX_RECURSION: u32 = i32::MAX as u32;

// =============================================================================
// WORKER POOL LIMITS
// =============================================================================

/// Upper bound on worker threads (counts are packed into 16-bit fields)
pub const MAX_POSSIBLE_THREAD_COUNT: u16 = i16::MAX as u16;

/// Idle time after which a blocked worker tries to retire
pub const WORKER_IDLE_TIMEOUT: Duration = Duration::from_secs(20);

/// Work items slower than this are reported at warn level
pub const SLOW_WORK_ITEM_THRESHOLD: Duration = Duration::from_millis(500);

/// Sample interval used while hill climbing accumulates a noisy sample
pub const HILL_CLIMBING_ACCUMULATE_INTERVAL_MS: u32 = 10;

/// A worker returns to the semaphore after dispatching this long, even with work left
pub const DISPATCH_QUANTUM: Duration = Duration::from_millis(30);

/// Registered waits served by one wait thread; slot 0 is its change event
pub const MAX_WAITS_PER_WAIT_THREAD: usize = MAX_WAIT_HANDLES - 1;
