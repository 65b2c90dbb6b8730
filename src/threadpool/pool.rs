/*!
 * Worker Pool Controller
 *
 * Owns the packed thread counts, injects and retires workers, and feeds
 * completion throughput to hill climbing.
 *
 * # Counts
 *
 * - `num_processing_work`: workers released from the LIFO semaphore to work
 * - `num_existing_threads`: worker threads alive
 * - `num_threads_goal`: target concurrency
 *
 * Every change is a CAS of the whole triple; no lock guards them.
 *
 * # Sampling
 *
 * There is no sampler thread. Each completed work item bumps a counter;
 * once the current sample interval has elapsed, whichever worker wins a
 * try-lock runs the hill-climbing update and applies the new goal.
 */

use super::config::PoolConfig;
use super::counts::{AtomicThreadCounts, ThreadCounts};
use super::hill_climbing::{HillClimbing, HillClimbingTransition};
use super::queue::WorkQueue;
use super::wait_thread::{RegisteredWait, Registration, WaitThread};
use super::worker::{ThreadSpawner, WorkerSpawner};
use crate::core::limits::MAX_POSSIBLE_THREAD_COUNT;
use crate::core::{Handle, ObjectKind, SyncError, SyncResult, Timeout};
use crate::sync::LifoSemaphore;
use crate::wait::WaitSubsystem;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

pub(super) struct Sampler {
    pub hill_climbing: HillClimbing,
    sample_start: Instant,
    prior_completions: u64,
    interval_ms: u32,
}

pub(crate) struct PoolInner {
    pub(super) counts: AtomicThreadCounts,
    pub(super) min_threads: AtomicU16,
    max_threads: AtomicU16,
    /// Serializes bound changes; readers use the atomics directly
    bounds_lock: Mutex<()>,
    processor_count: u16,
    /// Worker requests not yet taken by a woken worker
    requested_workers: AtomicU32,
    pub(super) semaphore: LifoSemaphore,
    pub(super) queue: WorkQueue,
    completed: AtomicU64,
    pub(super) sampler: Mutex<Sampler>,
    pub(super) spawner: Arc<dyn WorkerSpawner>,
    pub(super) idle_timeout: Duration,
    pub(super) slow_threshold: Duration,
    pub(super) next_worker_id: AtomicU64,
    waits: WaitSubsystem,
    /// Registration goes to the first thread with room
    wait_threads: Mutex<Vec<Arc<WaitThread>>>,
    next_registration_id: AtomicU64,
}

/// Point-in-time view of a pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub counts: ThreadCounts,
    pub min_threads: u16,
    pub max_threads: u16,
    pub requested_workers: u32,
    pub queued_work_items: usize,
    pub completed_work_items: u64,
    pub idle_workers: usize,
    pub pending_semaphore_signals: u32,
    pub wait_threads: usize,
    pub registered_waits: usize,
}

/// Self-tuning worker pool
///
/// Cloning is cheap and yields another handle onto the same pool.
#[derive(Clone)]
pub struct ThreadPool {
    pub(super) inner: Arc<PoolInner>,
}

impl ThreadPool {
    /// Pool with real OS worker threads
    pub fn new(config: PoolConfig) -> SyncResult<Self> {
        Self::with_spawner(config, Arc::new(ThreadSpawner))
    }

    /// Pool creating its workers through `spawner`
    ///
    /// Registered waits use the process-wide [`WaitSubsystem`].
    pub fn with_spawner(config: PoolConfig, spawner: Arc<dyn WorkerSpawner>) -> SyncResult<Self> {
        Self::with_wait_subsystem(config, spawner, WaitSubsystem::global().clone())
    }

    /// Pool whose registered waits watch handles of `waits`
    pub fn with_wait_subsystem(
        config: PoolConfig,
        spawner: Arc<dyn WorkerSpawner>,
        waits: WaitSubsystem,
    ) -> SyncResult<Self> {
        config.validate()?;
        Ok(Self::from_validated(config, spawner, waits))
    }

    /// Process-wide pool configured from the environment
    pub fn global() -> &'static ThreadPool {
        static GLOBAL: OnceLock<ThreadPool> = OnceLock::new();
        GLOBAL.get_or_init(|| {
            let config = PoolConfig::from_env().unwrap_or_else(|e| {
                warn!(error = %e, "invalid pool environment, using defaults");
                PoolConfig::default()
            });
            let waits = WaitSubsystem::global().clone();
            Self::from_validated(config, Arc::new(ThreadSpawner), waits)
        })
    }

    fn from_validated(
        config: PoolConfig,
        spawner: Arc<dyn WorkerSpawner>,
        waits: WaitSubsystem,
    ) -> Self {
        let hill_climbing = HillClimbing::new(config.hill_climbing.clone());
        let interval_ms = hill_climbing.sample_interval_ms();

        let inner = PoolInner {
            counts: AtomicThreadCounts::new(ThreadCounts::new(0, 0, config.min_threads)),
            min_threads: AtomicU16::new(config.min_threads),
            max_threads: AtomicU16::new(config.max_threads),
            bounds_lock: Mutex::new(()),
            processor_count: config.processor_count,
            requested_workers: AtomicU32::new(0),
            semaphore: LifoSemaphore::empty(u32::from(MAX_POSSIBLE_THREAD_COUNT)),
            queue: WorkQueue::new(config.processor_count as usize),
            completed: AtomicU64::new(0),
            sampler: Mutex::new(Sampler {
                hill_climbing,
                sample_start: Instant::now(),
                prior_completions: 0,
                interval_ms,
            }),
            spawner,
            idle_timeout: config.worker_idle_timeout(),
            slow_threshold: config.slow_work_item_threshold(),
            next_worker_id: AtomicU64::new(1),
            waits,
            wait_threads: Mutex::new(Vec::new()),
            next_registration_id: AtomicU64::new(1),
        };

        debug!(
            min_threads = config.min_threads,
            max_threads = config.max_threads,
            processor_count = config.processor_count,
            "thread pool created"
        );
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Queue `work` and make sure a worker is on its way
    pub fn queue_work_item<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.queue.push(Box::new(work));
        self.inner.ensure_thread_requested();
    }

    /// Queue `callback` each time `handle` is signaled or `timeout_ms`
    /// passes without a signal
    ///
    /// The callback receives `true` when it runs because of the timeout. With
    /// `execute_once` the wait is removed after its first completion;
    /// otherwise the timeout restarts after every completion. A wait on an
    /// object consumes it like any other wait, so an auto-reset event or a
    /// semaphore count is taken by the registration. Mutexes cannot be
    /// registered.
    pub fn register_wait<F>(
        &self,
        handle: Handle,
        timeout_ms: i32,
        callback: F,
        execute_once: bool,
    ) -> SyncResult<RegisteredWait>
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.inner
            .register_wait(handle, timeout_ms, Arc::new(callback), execute_once)
    }

    /// Subsystem owning the handles this pool's registered waits watch
    #[inline]
    pub fn wait_subsystem(&self) -> &WaitSubsystem {
        &self.inner.waits
    }

    /// Ask for one more working worker, up to the goal
    pub fn request_worker(&self) {
        self.inner.request_worker();
    }

    /// Report a finished work item from a worker thread
    ///
    /// Returns `false` when the calling worker should stop taking work
    /// because the pool has more workers than its goal.
    pub fn notify_work_item_complete(&self) -> bool {
        self.inner.notify_work_item_complete()
    }

    /// Raise the floor; fails if `n` is zero or above the maximum
    pub fn set_min_threads(&self, n: u16) -> bool {
        self.inner.set_min_threads(n)
    }

    /// Lower the ceiling; fails if `n` is below the minimum or the processor count
    pub fn set_max_threads(&self, n: u16) -> bool {
        self.inner.set_max_threads(n)
    }

    #[inline]
    pub fn min_threads(&self) -> u16 {
        self.inner.min_threads.load(Ordering::Acquire)
    }

    #[inline]
    pub fn max_threads(&self) -> u16 {
        self.inner.max_threads.load(Ordering::Acquire)
    }

    #[inline]
    pub fn processor_count(&self) -> u16 {
        self.inner.processor_count
    }

    /// Current packed counts
    #[inline]
    pub fn counts(&self) -> ThreadCounts {
        self.inner.counts.load()
    }

    pub fn stats(&self) -> PoolStats {
        let inner = &self.inner;
        let (wait_threads, registered_waits) = {
            let threads = inner.wait_threads.lock();
            (threads.len(), threads.iter().map(|t| t.len()).sum())
        };
        PoolStats {
            counts: inner.counts.load(),
            min_threads: self.min_threads(),
            max_threads: self.max_threads(),
            requested_workers: inner.requested_workers.load(Ordering::Acquire),
            queued_work_items: inner.queue.len(),
            completed_work_items: inner.completed.load(Ordering::Acquire),
            idle_workers: inner.semaphore.waiter_count(),
            pending_semaphore_signals: inner.semaphore.signal_count(),
            wait_threads,
            registered_waits,
        }
    }
}

impl PoolInner {
    pub(super) fn request_worker(self: &Arc<Self>) {
        self.requested_workers.fetch_add(1, Ordering::AcqRel);
        self.maybe_add_working_worker();
    }

    /// Request a worker unless enough requests are already outstanding
    pub(super) fn ensure_thread_requested(self: &Arc<Self>) {
        if self.queue.try_add_request() {
            self.request_worker();
        }
    }

    #[inline]
    pub(super) fn requested_workers(&self) -> u32 {
        self.requested_workers.load(Ordering::Acquire)
    }

    /// Consume one pending worker request
    pub(super) fn take_active_request(&self) -> bool {
        self.requested_workers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Grow `num_processing_work` by one (up to the goal), releasing parked
    /// workers and creating threads for whatever is missing
    pub(super) fn maybe_add_working_worker(self: &Arc<Self>) {
        let result = self.counts.fetch_update(|c| {
            let working = c
                .num_processing_work
                .max((c.num_processing_work + 1).min(c.num_threads_goal));
            let existing = c.num_existing_threads.max(working);
            let new = ThreadCounts::new(working, existing, c.num_threads_goal);
            (new != c).then_some(new)
        });
        let Ok((old, new)) = result else {
            return;
        };

        let to_release = new.num_processing_work - old.num_processing_work;
        let to_create = new.num_existing_threads - old.num_existing_threads;

        // Create threads before releasing the slots they fill
        let mut created = 0u16;
        for _ in 0..to_create {
            match self.spawn_worker() {
                Ok(()) => created += 1,
                Err(e) => {
                    error!(error = %e, "failed to create worker thread");
                    break;
                }
            }
        }
        let shortfall = to_create - created;

        // Each new thread is also a new working slot
        let to_release = to_release - shortfall;
        if to_release > 0 {
            if let Err(e) = self.semaphore.release(u32::from(to_release)) {
                error!(error = %e, "failed to release worker semaphore");
            }
        }

        if shortfall > 0 {
            // Take back the promise; the next request retries
            let _ = self.counts.fetch_update(|c| {
                Some(ThreadCounts {
                    num_processing_work: c.num_processing_work.saturating_sub(shortfall),
                    num_existing_threads: c.num_existing_threads.saturating_sub(shortfall),
                    ..c
                })
            });
            warn!(shortfall, "worker injection rolled back");
        } else if created > 0 {
            debug!(created, working = new.num_processing_work, "injected workers");
        }
    }

    pub(super) fn notify_work_item_complete(self: &Arc<Self>) -> bool {
        self.completed.fetch_add(1, Ordering::AcqRel);

        if let Some(mut sampler) = self.sampler.try_lock() {
            self.adjust_max_workers(&mut sampler);
        }

        !self.should_stop_processing_work_now()
    }

    /// Give up this worker's working slot if the pool is above its goal
    fn should_stop_processing_work_now(&self) -> bool {
        self.counts
            .fetch_update(|c| {
                (c.num_processing_work > c.num_threads_goal).then_some(ThreadCounts {
                    num_processing_work: c.num_processing_work - 1,
                    ..c
                })
            })
            .is_ok()
    }

    /// Run one hill-climbing step if the sample interval has elapsed
    fn adjust_max_workers(self: &Arc<Self>, sampler: &mut Sampler) {
        let now = Instant::now();
        let elapsed = now.duration_since(sampler.sample_start);
        if elapsed < Duration::from_millis(u64::from(sampler.interval_ms)) {
            return;
        }

        let counts = self.counts.load();
        if counts.num_existing_threads < counts.num_threads_goal {
            // Injection has not caught up with the goal yet
            return;
        }

        let total = self.completed.load(Ordering::Acquire);
        let completions = total - sampler.prior_completions;
        let (new_goal, interval_ms) = sampler.hill_climbing.update(
            counts.num_threads_goal,
            elapsed.as_secs_f64(),
            completions,
            self.min_threads.load(Ordering::Acquire),
            self.max_threads.load(Ordering::Acquire),
        );
        sampler.interval_ms = interval_ms;

        let mut current = counts;
        while new_goal != current.num_threads_goal {
            let new = ThreadCounts {
                num_threads_goal: new_goal,
                ..current
            };
            match self.counts.compare_exchange(current, new) {
                Ok(_) => {
                    debug!(
                        old_goal = current.num_threads_goal,
                        new_goal, "hill climbing adjusted goal"
                    );
                    if new_goal > current.num_threads_goal {
                        self.maybe_add_working_worker();
                    }
                    break;
                }
                Err(actual) => {
                    // Someone raised the goal at least as far; keep theirs
                    if actual.num_threads_goal > current.num_threads_goal
                        && actual.num_threads_goal >= new_goal
                    {
                        break;
                    }
                    current = actual;
                }
            }
        }

        sampler.prior_completions = total;
        sampler.sample_start = now;
    }

    fn set_min_threads(self: &Arc<Self>, n: u16) -> bool {
        let _bounds = self.bounds_lock.lock();
        if n == 0 || n > self.max_threads.load(Ordering::Acquire) {
            return false;
        }
        self.min_threads.store(n, Ordering::Release);

        let raised = self.counts.fetch_update(|c| {
            (c.num_threads_goal < n).then_some(ThreadCounts {
                num_threads_goal: n,
                ..c
            })
        });
        if let Ok((_, new)) = raised {
            self.force_goal_change(new.num_threads_goal);
            if self.requested_workers() > 0 {
                self.maybe_add_working_worker();
            }
        }

        debug!(min_threads = n, "minimum threads set");
        true
    }

    fn set_max_threads(&self, n: u16) -> bool {
        let _bounds = self.bounds_lock.lock();
        if n == 0 || n < self.min_threads.load(Ordering::Acquire) || n < self.processor_count {
            return false;
        }
        let n = n.min(MAX_POSSIBLE_THREAD_COUNT);
        self.max_threads.store(n, Ordering::Release);

        let lowered = self.counts.fetch_update(|c| {
            (c.num_threads_goal > n).then_some(ThreadCounts {
                num_threads_goal: n,
                ..c
            })
        });
        if let Ok((_, new)) = lowered {
            self.force_goal_change(new.num_threads_goal);
        }

        debug!(max_threads = n, "maximum threads set");
        true
    }

    fn register_wait(
        self: &Arc<Self>,
        handle: Handle,
        timeout_ms: i32,
        callback: super::wait_thread::WaitCallback,
        execute_once: bool,
    ) -> SyncResult<RegisteredWait> {
        let timeout = Timeout::from_millis(timeout_ms)?;
        if self.waits.kind(handle)? == ObjectKind::Mutex {
            return Err(SyncError::invalid_argument(format!(
                "handle {} is a mutex; registered waits cannot own mutexes",
                handle
            )));
        }

        let id = self.next_registration_id.fetch_add(1, Ordering::Relaxed);
        let mut registration =
            Registration::new(id, handle, timeout.as_duration(), callback, !execute_once);

        let mut threads = self.wait_threads.lock();
        for thread in threads.iter() {
            match thread.try_register(registration) {
                Ok(()) => return Ok(RegisteredWait::new(id, handle, Arc::clone(thread))),
                Err(rejected) => registration = rejected,
            }
        }

        // Every wait thread is full
        let thread = WaitThread::start(
            threads.len() as u64 + 1,
            self.waits.clone(),
            Arc::downgrade(self),
        )?;
        if thread.try_register(registration).is_err() {
            thread.shutdown();
            return Err(SyncError::ResourceExhausted(
                "new wait thread rejected its first registration".to_string(),
            ));
        }
        threads.push(Arc::clone(&thread));
        debug!(wait_threads = threads.len(), "wait thread added");
        Ok(RegisteredWait::new(id, handle, thread))
    }

    /// Tell hill climbing about a goal it did not choose
    fn force_goal_change(&self, goal: u16) {
        self.sampler
            .lock()
            .hill_climbing
            .force_change(goal, HillClimbingTransition::Initializing);
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        for thread in self.wait_threads.get_mut().drain(..) {
            thread.shutdown();
        }
    }
}
