/*!
 * Worker Threads
 *
 * Each worker parks on the pool's LIFO semaphore. A release hands it a
 * working slot; it then takes one worker request and dispatches queued
 * items until the queue runs dry, the pool drops above its goal, or the
 * dispatch quantum expires. A worker that idles past the timeout retires
 * unless a release is already on its way to it.
 */

use super::counts::ThreadCounts;
use super::hill_climbing::HillClimbingTransition;
use super::pool::PoolInner;
use super::queue::WorkItem;
use crate::core::limits::DISPATCH_QUANTUM;
use crate::monitoring::WorkItemSpan;
use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::debug;

/// Creates the OS threads backing pool workers
pub trait WorkerSpawner: Send + Sync {
    /// Start `body` on a new thread called `name`
    fn spawn(&self, name: String, body: Box<dyn FnOnce() + Send>) -> io::Result<()>;
}

/// Spawns detached `std::thread`s
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSpawner;

impl WorkerSpawner for ThreadSpawner {
    fn spawn(&self, name: String, body: Box<dyn FnOnce() + Send>) -> io::Result<()> {
        thread::Builder::new().name(name).spawn(body).map(|_| ())
    }
}

impl PoolInner {
    /// Start one worker thread
    pub(super) fn spawn_worker(self: &Arc<Self>) -> io::Result<()> {
        let worker_id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let pool = Arc::clone(self);
        self.spawner.spawn(
            format!("kernel-sync-worker-{}", worker_id),
            Box::new(move || pool.run_worker(worker_id)),
        )
    }

    fn run_worker(self: Arc<Self>, worker_id: u64) {
        debug!(worker_id, "worker started");

        loop {
            while self.semaphore.wait(Some(self.idle_timeout)) {
                self.work_one_request();
            }

            if self.try_retire() {
                debug!(worker_id, "worker retired after idle timeout");
                return;
            }
        }
    }

    /// Serve at most one worker request per semaphore wake
    ///
    /// After a dispatch ends the working slot is given up, so a worker that
    /// still has requests queued re-enters through the semaphore.
    pub(super) fn work_one_request(self: &Arc<Self>) {
        if !self.take_active_request() {
            return;
        }
        if !self.dispatch() {
            // Slot already released by should_stop_processing_work_now
            return;
        }

        let _ = self.counts.fetch_update(|c| {
            Some(ThreadCounts {
                num_processing_work: c.num_processing_work.saturating_sub(1),
                ..c
            })
        });
        // A request may have slipped in while the slot was given up
        if self.requested_workers() > 0 {
            self.maybe_add_working_worker();
        }
    }

    /// Run queued items for one request
    ///
    /// Returns `false` if this worker gave up its working slot because the
    /// pool is above its goal.
    fn dispatch(self: &Arc<Self>) -> bool {
        self.queue.mark_request_satisfied();

        let Some(mut item) = self.queue.pop() else {
            return true;
        };
        // More may be queued; bring in help before running anything
        self.ensure_thread_requested();

        let start = Instant::now();
        loop {
            self.execute(item);

            if !self.notify_work_item_complete() {
                return false;
            }
            if start.elapsed() >= DISPATCH_QUANTUM {
                if !self.queue.is_empty() {
                    self.ensure_thread_requested();
                }
                return true;
            }

            item = match self.queue.pop() {
                Some(next) => next,
                None => return true,
            };
        }
    }

    fn execute(&self, item: WorkItem) {
        let mut span = WorkItemSpan::new(self.slow_threshold);
        let result = {
            let _entered = span.enter();
            panic::catch_unwind(AssertUnwindSafe(item))
        };
        if let Err(payload) = result {
            span.record_panic(&panic_message(payload.as_ref()));
        }
    }

    /// Leave the pool after an idle timeout
    ///
    /// Fails when every existing worker holds a working slot, meaning a
    /// release was issued for this thread while it timed out.
    fn try_retire(&self) -> bool {
        let min = self.min_threads.load(Ordering::Acquire);
        let retired = self.counts.fetch_update(|c| {
            if c.num_existing_threads == c.num_processing_work {
                return None;
            }
            let existing = c.num_existing_threads - 1;
            Some(ThreadCounts {
                num_existing_threads: existing,
                num_threads_goal: min.max(existing.min(c.num_threads_goal)),
                ..c
            })
        });

        match retired {
            Ok((old, new)) => {
                if new.num_threads_goal != old.num_threads_goal {
                    self.sampler
                        .lock()
                        .hill_climbing
                        .force_change(new.num_threads_goal, HillClimbingTransition::ThreadTimedOut);
                }
                true
            }
            Err(_) => false,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
