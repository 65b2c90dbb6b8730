/*!
 * Registered Waits
 *
 * A wait thread blocks in a single wait-any over an auto-reset change event
 * (slot 0) and up to [`MAX_WAITS_PER_WAIT_THREAD`] registered handles. When
 * a handle is signaled or a registration's timeout elapses, its callback is
 * queued onto the pool as an ordinary work item. Registering or removing a
 * wait sets the change event so the thread rebuilds its handle list.
 *
 * The pool adds wait threads on demand once every existing one is full.
 */

use super::pool::PoolInner;
use crate::core::limits::{INFINITE, MAX_WAITS_PER_WAIT_THREAD};
use crate::core::{EventMode, Handle, SyncError, SyncResult, WaitAnyOutcome};
use crate::wait::WaitSubsystem;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Callback for a registered wait; the argument is `true` on timeout
pub type WaitCallback = Arc<dyn Fn(bool) + Send + Sync>;

pub(super) struct Registration {
    id: u64,
    handle: Handle,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    callback: WaitCallback,
    repeating: bool,
}

impl Registration {
    pub(super) fn new(
        id: u64,
        handle: Handle,
        timeout: Option<Duration>,
        callback: WaitCallback,
        repeating: bool,
    ) -> Self {
        Self {
            id,
            handle,
            timeout,
            deadline: timeout.map(|t| Instant::now() + t),
            callback,
            repeating,
        }
    }
}

pub(super) struct WaitThread {
    id: u64,
    waits: WaitSubsystem,
    change_event: Handle,
    registrations: Mutex<Vec<Registration>>,
    shutdown: AtomicBool,
}

impl WaitThread {
    /// Create the change event and start the thread
    pub(super) fn start(
        id: u64,
        waits: WaitSubsystem,
        pool: Weak<PoolInner>,
    ) -> SyncResult<Arc<Self>> {
        let change_event = waits.create_event(false, EventMode::AutoReset)?;
        let wait_thread = Arc::new(Self {
            id,
            waits,
            change_event,
            registrations: Mutex::new(Vec::with_capacity(MAX_WAITS_PER_WAIT_THREAD)),
            shutdown: AtomicBool::new(false),
        });

        let runner = Arc::clone(&wait_thread);
        let spawned = thread::Builder::new()
            .name(format!("kernel-sync-wait-{}", id))
            .spawn(move || runner.run(pool));
        if let Err(e) = spawned {
            let _ = wait_thread.waits.delete_handle(change_event);
            return Err(SyncError::ResourceExhausted(format!(
                "failed to create wait thread: {}",
                e
            )));
        }

        debug!(wait_thread = id, "wait thread started");
        Ok(wait_thread)
    }

    /// Add `registration` unless this thread is full
    pub(super) fn try_register(&self, registration: Registration) -> Result<(), Registration> {
        let mut registrations = self.registrations.lock();
        if registrations.len() >= MAX_WAITS_PER_WAIT_THREAD {
            return Err(registration);
        }
        trace!(
            wait_thread = self.id,
            registration = registration.id,
            handle = %registration.handle,
            "wait registered"
        );
        registrations.push(registration);
        drop(registrations);

        self.notify_changed();
        Ok(())
    }

    /// Drop a registration; `false` if it already fired once or was removed
    pub(super) fn unregister(&self, id: u64) -> bool {
        let mut registrations = self.registrations.lock();
        let Some(index) = registrations.iter().position(|r| r.id == id) else {
            return false;
        };
        registrations.remove(index);
        drop(registrations);

        self.notify_changed();
        true
    }

    #[inline]
    pub(super) fn len(&self) -> usize {
        self.registrations.lock().len()
    }

    pub(super) fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.notify_changed();
    }

    fn notify_changed(&self) {
        if let Err(e) = self.waits.set_event(self.change_event) {
            warn!(wait_thread = self.id, error = %e, "failed to signal wait thread");
        }
    }

    fn run(self: Arc<Self>, pool: Weak<PoolInner>) {
        let mut handles = Vec::with_capacity(MAX_WAITS_PER_WAIT_THREAD + 1);
        let mut ids = Vec::with_capacity(MAX_WAITS_PER_WAIT_THREAD);

        while !self.shutdown.load(Ordering::Acquire) {
            let timeout_ms = self.snapshot(&mut handles, &mut ids);
            let outcome = self.waits.wait_any(&handles, timeout_ms);

            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            let Some(pool) = pool.upgrade() else {
                break;
            };

            let signaled = match outcome {
                Ok(
                    WaitAnyOutcome::Signaled(0)
                    | WaitAnyOutcome::Abandoned(0)
                    | WaitAnyOutcome::TimedOut,
                ) => None,
                Ok(WaitAnyOutcome::Signaled(i) | WaitAnyOutcome::Abandoned(i)) => {
                    ids.get(i - 1).copied()
                }
                Err(e) => {
                    warn!(wait_thread = self.id, error = %e, "registered wait failed");
                    self.prune_invalid();
                    None
                }
            };
            self.complete(&pool, signaled);
        }

        let _ = self.waits.delete_handle(self.change_event);
        debug!(wait_thread = self.id, "wait thread stopped");
    }

    /// Fill the wait list and return the timeout until the nearest deadline
    fn snapshot(&self, handles: &mut Vec<Handle>, ids: &mut Vec<u64>) -> i32 {
        handles.clear();
        ids.clear();
        handles.push(self.change_event);

        let registrations = self.registrations.lock();
        let mut nearest: Option<Instant> = None;
        for registration in registrations.iter() {
            handles.push(registration.handle);
            ids.push(registration.id);
            if let Some(deadline) = registration.deadline {
                nearest = Some(nearest.map_or(deadline, |n| n.min(deadline)));
            }
        }

        match nearest {
            None => INFINITE,
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                // Round up so a wake never lands just short of the deadline
                let ms = remaining.as_nanos().div_ceil(1_000_000);
                ms.min(i32::MAX as u128) as i32
            }
        }
    }

    /// Queue callbacks for the signaled registration and every expired one
    fn complete(&self, pool: &Arc<PoolInner>, signaled: Option<u64>) {
        let now = Instant::now();
        let mut registrations = self.registrations.lock();

        let mut i = 0;
        while i < registrations.len() {
            let registration = &mut registrations[i];
            let timed_out = if signaled == Some(registration.id) {
                false
            } else if registration.deadline.is_some_and(|d| d <= now) {
                true
            } else {
                i += 1;
                continue;
            };

            let callback = Arc::clone(&registration.callback);
            pool.queue.push(Box::new(move || callback(timed_out)));
            pool.ensure_thread_requested();
            trace!(
                wait_thread = self.id,
                registration = registration.id,
                timed_out,
                "registered wait completed"
            );

            if registration.repeating {
                registration.deadline = registration.timeout.map(|t| now + t);
                i += 1;
            } else {
                registrations.remove(i);
            }
        }
    }

    /// Drop registrations whose handle was deleted
    fn prune_invalid(&self) {
        let mut registrations = self.registrations.lock();
        registrations.retain(|r| {
            let valid = self.waits.kind(r.handle).is_ok();
            if !valid {
                debug!(
                    wait_thread = self.id,
                    registration = r.id,
                    handle = %r.handle,
                    "registered handle no longer valid"
                );
            }
            valid
        });
    }
}

/// Token for a wait registered with [`ThreadPool::register_wait`]
///
/// Dropping the token leaves the registration in place.
///
/// [`ThreadPool::register_wait`]: super::ThreadPool::register_wait
pub struct RegisteredWait {
    id: u64,
    handle: Handle,
    thread: Arc<WaitThread>,
}

impl RegisteredWait {
    pub(super) fn new(id: u64, handle: Handle, thread: Arc<WaitThread>) -> Self {
        Self { id, handle, thread }
    }

    #[inline]
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Stop watching the handle
    ///
    /// Returns `false` if the wait was already removed, either by an earlier
    /// call or because a run-once wait fired. Callbacks already queued still
    /// run.
    pub fn unregister(&self) -> bool {
        self.thread.unregister(self.id)
    }
}

impl std::fmt::Debug for RegisteredWait {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredWait")
            .field("id", &self.id)
            .field("handle", &self.handle)
            .field("wait_thread", &self.thread.id)
            .finish()
    }
}
