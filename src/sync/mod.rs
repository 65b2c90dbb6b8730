/*!
 * Synchronization Primitives
 *
 * Building blocks shared by the wait subsystem and the worker pool:
 * - `LowLevelMonitor`: lock + condition variable, the only blocking primitive
 * - `LifoSemaphore`: newest-waiter-first semaphore for parking pool workers
 * - `ThreadToken`: cheap per-thread identity
 */

mod lifo;
mod monitor;
mod token;

pub use lifo::LifoSemaphore;
pub use monitor::{LowLevelMonitor, MonitorGuard};
pub use token::ThreadToken;
