/*!
 * Work Queue
 * Global FIFO of pending work items plus the outstanding-request throttle
 */

use crossbeam_queue::SegQueue;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A unit of work run on a pool thread
pub type WorkItem = Box<dyn FnOnce() + Send + 'static>;

pub(crate) struct WorkQueue {
    items: SegQueue<WorkItem>,
    /// Worker requests issued but not yet picked up by a dispatcher
    outstanding_requests: AtomicUsize,
    max_outstanding: usize,
}

impl WorkQueue {
    pub fn new(max_outstanding: usize) -> Self {
        Self {
            items: SegQueue::new(),
            outstanding_requests: AtomicUsize::new(0),
            max_outstanding: max_outstanding.max(1),
        }
    }

    #[inline]
    pub fn push(&self, item: WorkItem) {
        self.items.push(item);
    }

    #[inline]
    pub fn pop(&self) -> Option<WorkItem> {
        self.items.pop()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Reserve a worker request unless the cap is reached
    pub fn try_add_request(&self) -> bool {
        self.outstanding_requests
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_outstanding).then_some(n + 1)
            })
            .is_ok()
    }

    /// A dispatcher took over one outstanding request
    pub fn mark_request_satisfied(&self) {
        let _ = self
            .outstanding_requests
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    #[inline]
    pub fn outstanding_requests(&self) -> usize {
        self.outstanding_requests.load(Ordering::Acquire)
    }
}
