/*!
 * Monitoring
 * Tracing setup and work-item spans
 */

mod tracer;

pub use tracer::{init_tracing, WorkItemSpan};
