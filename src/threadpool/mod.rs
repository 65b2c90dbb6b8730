/*!
 * Worker Pool
 *
 * Self-tuning pool of OS worker threads. Idle workers park on a LIFO
 * semaphore; hill climbing moves the thread goal toward the count with
 * the best measured throughput. Wait threads turn signaled handles and
 * elapsed timeouts into queued callbacks.
 */

mod config;
mod counts;
mod hill_climbing;
mod pool;
mod queue;
mod wait_thread;
mod worker;

pub use config::{HillClimbingConfig, PoolConfig};
pub use counts::{AtomicThreadCounts, ThreadCounts};
pub use hill_climbing::{HillClimbing, HillClimbingTransition};
pub use pool::{PoolStats, ThreadPool};
pub use queue::WorkItem;
pub use wait_thread::{RegisteredWait, WaitCallback};
pub use worker::{ThreadSpawner, WorkerSpawner};
