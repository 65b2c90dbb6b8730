/*!
 * Kernel Sync Library
 *
 * Thread synchronization and worker-pool runtime:
 * - Wait subsystem: handle-based mutexes, semaphores and events with
 *   wait-any, wait-all, signal-and-wait and abandoned-mutex detection
 * - LIFO semaphore for parking workers newest-first
 * - Hill-climbing worker pool
 */

pub mod core;
pub mod monitoring;
pub mod sync;
pub mod threadpool;
pub mod wait;

// Re-exports
pub use crate::core::limits::INFINITE;
pub use crate::core::{
    EventMode, Handle, ObjectKind, SyncError, SyncResult, Timeout, WaitAllOutcome,
    WaitAnyOutcome, WaitOutcome,
};
pub use monitoring::{init_tracing, WorkItemSpan};
pub use sync::{LifoSemaphore, LowLevelMonitor, ThreadToken};
pub use threadpool::{PoolConfig, PoolStats, RegisteredWait, ThreadPool};
pub use wait::{WaitStats, WaitSubsystem};
