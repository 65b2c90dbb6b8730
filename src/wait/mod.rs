/*!
 * Wait Subsystem
 *
 * Handle table, waitable objects and the multi-object wait coordinator.
 */

mod handle_table;
mod object;
mod subsystem;
mod thread_info;
mod waiters;

pub use handle_table::{HandleTable, TableEntry};
pub use subsystem::{WaitStats, WaitSubsystem};
