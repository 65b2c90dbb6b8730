/*!
 * Wait Subsystem
 *
 * Handle-based mutexes, semaphores and events with wait-any, wait-all and
 * signal-and-wait, plus abandoned-mutex detection on thread exit.
 *
 * # Locking
 *
 * One subsystem lock guards the handle table, every object and waiter
 * queue, and the per-thread records. A signaler holding it may take a
 * waiter's monitor; a waiter takes its own monitor before dropping the
 * subsystem lock and never takes the subsystem lock while holding its
 * monitor. Order: subsystem lock -> thread monitor.
 *
 * # Wait Protocol
 *
 * 1. Under the subsystem lock: validate, try the fast path, bail on a zero
 *    timeout or a pending interrupt, register one node per object
 * 2. Take own monitor, mark `Waiting`, drop the subsystem lock, block
 * 3. A signaler that finds the waiter still `Waiting` performs the whole
 *    acquisition, unregisters every node and writes the result
 * 4. On timeout the waiter flips `Waiting -> NotWaiting` under its monitor;
 *    if a signaler got there first the acquisition stands
 */

use super::handle_table::HandleTable;
use super::object::{Acquired, WaitableObject};
use super::thread_info::{SignalState, ThreadWaitInfo};
use super::waiters::{NodeArena, NodeId};
use crate::core::limits::MAX_WAIT_HANDLES;
use crate::core::{
    EventMode, Handle, ObjectKind, SyncError, SyncResult, Timeout, WaitAllOutcome,
    WaitAnyOutcome, WaitOutcome,
};
use crate::sync::{MonitorGuard, ThreadToken};
use ahash::AHashMap;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Bookkeeping for one thread known to a subsystem
struct ThreadRecord {
    info: Arc<ThreadWaitInfo>,
    /// Reusable node per wait position
    nodes: Vec<NodeId>,
    /// Handles of the wait in progress; empty when not waiting on objects
    waited: Vec<Handle>,
    wait_all: bool,
    interruptible: bool,
    /// Owned mutexes in acquisition order
    owned: Vec<Handle>,
}

impl ThreadRecord {
    fn new(info: Arc<ThreadWaitInfo>) -> Self {
        Self {
            info,
            nodes: Vec::new(),
            waited: Vec::new(),
            wait_all: false,
            interruptible: false,
            owned: Vec::new(),
        }
    }
}

struct State {
    table: HandleTable<WaitableObject>,
    nodes: NodeArena,
    threads: AHashMap<ThreadToken, ThreadRecord>,
}

pub(crate) struct Shared {
    state: Mutex<State>,
}

/// How a blocking wait ended, before mapping to a public outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Satisfaction {
    Satisfied { index: usize, abandoned: bool },
    TimedOut,
}

impl Satisfaction {
    fn into_single(self) -> WaitOutcome {
        match self {
            Satisfaction::Satisfied {
                abandoned: false, ..
            } => WaitOutcome::Signaled,
            Satisfaction::Satisfied {
                abandoned: true, ..
            } => WaitOutcome::Abandoned,
            Satisfaction::TimedOut => WaitOutcome::TimedOut,
        }
    }
}

/// Point-in-time counters of a wait subsystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitStats {
    pub live_handles: usize,
    pub free_handles: usize,
    pub handle_capacity: usize,
    pub threads: usize,
    pub waiting_threads: usize,
    pub owned_mutexes: usize,
    pub waiter_nodes: usize,
}

/// Handle-based wait subsystem
///
/// Cloning is cheap and yields another handle onto the same subsystem.
#[derive(Clone)]
pub struct WaitSubsystem {
    shared: Arc<Shared>,
}

impl WaitSubsystem {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    table: HandleTable::new(),
                    nodes: NodeArena::default(),
                    threads: AHashMap::new(),
                }),
            }),
        }
    }

    /// Process-wide instance
    pub fn global() -> &'static WaitSubsystem {
        static GLOBAL: OnceLock<WaitSubsystem> = OnceLock::new();
        GLOBAL.get_or_init(WaitSubsystem::new)
    }

    // ------------------------------------------------------------------------
    // Creation and deletion
    // ------------------------------------------------------------------------

    /// Create a mutex, optionally owned by the calling thread
    pub fn create_mutex(&self, initially_owned: bool) -> SyncResult<Handle> {
        let info = ThreadWaitInfo::current();
        let mut state = self.lock_for(&info);
        let owner = initially_owned.then(|| info.token());

        let handle = state.table.new_handle(WaitableObject::mutex(owner))?;
        if initially_owned {
            if let Some(record) = state.threads.get_mut(&info.token()) {
                record.owned.push(handle);
            }
        }

        trace!(handle = %handle, initially_owned, "created mutex");
        Ok(handle)
    }

    /// Create a counting semaphore
    pub fn create_semaphore(&self, initial: i32, maximum: i32) -> SyncResult<Handle> {
        if maximum <= 0 {
            return Err(SyncError::invalid_argument(format!(
                "semaphore maximum {} must be positive",
                maximum
            )));
        }
        if initial < 0 || initial > maximum {
            return Err(SyncError::invalid_argument(format!(
                "semaphore initial count {} outside 0..={}",
                initial, maximum
            )));
        }

        let handle = self
            .shared
            .state
            .lock()
            .table
            .new_handle(WaitableObject::semaphore(initial as u32, maximum as u32))?;

        trace!(handle = %handle, initial, maximum, "created semaphore");
        Ok(handle)
    }

    /// Create an event
    pub fn create_event(&self, initially_set: bool, mode: EventMode) -> SyncResult<Handle> {
        let handle = self
            .shared
            .state
            .lock()
            .table
            .new_handle(WaitableObject::event(initially_set, mode))?;

        trace!(handle = %handle, initially_set, ?mode, "created event");
        Ok(handle)
    }

    /// Destroy the object behind `handle`
    ///
    /// Threads still queued on it are detached; they keep waiting on their
    /// other objects or until their timeout.
    pub fn delete_handle(&self, handle: Handle) -> SyncResult<()> {
        let mut state = self.shared.state.lock();
        let State {
            table,
            nodes,
            threads,
        } = &mut *state;

        let obj = table.get_mut(handle)?;
        if !obj.waiters.is_empty() {
            debug!(handle = %handle, "deleting object with queued waiters");
        }
        nodes.clear(&mut obj.waiters);

        if let Some(owner) = obj.owner() {
            if let Some(record) = threads.get_mut(&owner) {
                record.owned.retain(|&h| h != handle);
            }
        }

        table.delete_handle(handle)?;
        trace!(handle = %handle, "deleted handle");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Signaling
    // ------------------------------------------------------------------------

    /// Add `count` to a semaphore and wake waiters; returns the previous count
    pub fn release_semaphore(&self, handle: Handle, count: i32) -> SyncResult<u32> {
        if count <= 0 {
            return Err(SyncError::invalid_argument(format!(
                "release count {} must be positive",
                count
            )));
        }
        let mut state = self.shared.state.lock();
        release_semaphore_locked(&mut state, handle, count as u32)
    }

    /// Signal an event
    pub fn set_event(&self, handle: Handle) -> SyncResult<()> {
        let mut state = self.shared.state.lock();
        set_event_locked(&mut state, handle)
    }

    /// Clear an event's signal
    pub fn reset_event(&self, handle: Handle) -> SyncResult<()> {
        let mut state = self.shared.state.lock();
        let obj = state.table.get_mut(handle)?;
        obj.expect_kind(handle.raw(), ObjectKind::ManualResetEvent)?;
        obj.set_signaled(false);
        Ok(())
    }

    /// Release one level of the calling thread's ownership of a mutex
    pub fn release_mutex(&self, handle: Handle) -> SyncResult<()> {
        let thread = ThreadToken::current();
        let mut state = self.shared.state.lock();
        release_mutex_locked(&mut state, thread, handle)
    }

    // ------------------------------------------------------------------------
    // Waiting
    // ------------------------------------------------------------------------

    /// Wait for one object; `timeout_ms` of -1 waits forever
    pub fn wait(&self, handle: Handle, timeout_ms: i32) -> SyncResult<WaitOutcome> {
        let timeout = Timeout::from_millis(timeout_ms)?;
        let start = Instant::now();
        let info = ThreadWaitInfo::current();
        let state = self.lock_for(&info);

        self.wait_locked(state, &info, &[handle], false, timeout, start)
            .map(Satisfaction::into_single)
    }

    /// Wait until any object is signaled; the lowest signaled index wins
    pub fn wait_any(&self, handles: &[Handle], timeout_ms: i32) -> SyncResult<WaitAnyOutcome> {
        check_wait_count(handles)?;
        let timeout = Timeout::from_millis(timeout_ms)?;
        let start = Instant::now();
        let info = ThreadWaitInfo::current();
        let state = self.lock_for(&info);

        let outcome = self.wait_locked(state, &info, handles, false, timeout, start)?;
        Ok(match outcome {
            Satisfaction::Satisfied {
                index,
                abandoned: false,
            } => WaitAnyOutcome::Signaled(index),
            Satisfaction::Satisfied {
                index,
                abandoned: true,
            } => WaitAnyOutcome::Abandoned(index),
            Satisfaction::TimedOut => WaitAnyOutcome::TimedOut,
        })
    }

    /// Wait until every object is signaled, then acquire all of them at once
    pub fn wait_all(&self, handles: &[Handle], timeout_ms: i32) -> SyncResult<WaitAllOutcome> {
        check_wait_count(handles)?;
        let timeout = Timeout::from_millis(timeout_ms)?;
        let start = Instant::now();
        let info = ThreadWaitInfo::current();
        let state = self.lock_for(&info);

        let wait_all = handles.len() > 1;
        let outcome = self.wait_locked(state, &info, handles, wait_all, timeout, start)?;
        Ok(match outcome {
            Satisfaction::Satisfied {
                abandoned: false, ..
            } => WaitAllOutcome::Signaled,
            Satisfaction::Satisfied {
                index,
                abandoned: true,
            } => WaitAllOutcome::Abandoned(index),
            Satisfaction::TimedOut => WaitAllOutcome::TimedOut,
        })
    }

    /// Signal one object and start waiting on another, atomically
    ///
    /// No signal on `wait_on` can slip in between the two steps. If the
    /// signal fails nothing is waited on.
    pub fn signal_and_wait(
        &self,
        signal: Handle,
        wait_on: Handle,
        timeout_ms: i32,
    ) -> SyncResult<WaitOutcome> {
        let timeout = Timeout::from_millis(timeout_ms)?;
        let start = Instant::now();
        let info = ThreadWaitInfo::current();
        let mut state = self.lock_for(&info);

        state.table.get(wait_on)?;
        let kind = state.table.get(signal)?.kind();
        match kind {
            ObjectKind::Mutex => release_mutex_locked(&mut state, info.token(), signal)?,
            ObjectKind::Semaphore => {
                release_semaphore_locked(&mut state, signal, 1)?;
            }
            ObjectKind::AutoResetEvent | ObjectKind::ManualResetEvent => {
                set_event_locked(&mut state, signal)?
            }
        }

        self.wait_locked(state, &info, &[wait_on], false, timeout, start)
            .map(Satisfaction::into_single)
    }

    /// Sleep for `timeout_ms`; ends early with `Interrupted` on [`interrupt`](Self::interrupt)
    pub fn sleep(&self, timeout_ms: i32) -> SyncResult<()> {
        let timeout = Timeout::from_millis(timeout_ms)?;
        let start = Instant::now();
        let info = ThreadWaitInfo::current();
        let mut state = self.lock_for(&info);

        if info.take_pending_interrupt() {
            return Err(SyncError::Interrupted);
        }
        if timeout.is_zero() {
            drop(state);
            std::thread::yield_now();
            return Ok(());
        }

        if let Some(record) = state.threads.get_mut(&info.token()) {
            record.waited.clear();
            record.wait_all = false;
            record.interruptible = true;
        }

        let mut guard = info.monitor.acquire();
        *guard = SignalState::Waiting;
        drop(state);

        block(&mut guard, timeout.deadline_from(start));
        let woken = std::mem::replace(&mut *guard, SignalState::NotWaiting);
        drop(guard);

        // Interrupts arriving from here on stay pending
        if let Some(record) = self.shared.state.lock().threads.get_mut(&info.token()) {
            record.interruptible = false;
        }
        match woken {
            SignalState::Interrupted => Err(SyncError::Interrupted),
            _ => Ok(()),
        }
    }

    // ------------------------------------------------------------------------
    // Interruption
    // ------------------------------------------------------------------------

    /// Token of the calling thread, registered with this subsystem so that
    /// other threads can [`interrupt`](Self::interrupt) it
    pub fn current_thread(&self) -> ThreadToken {
        let info = ThreadWaitInfo::current();
        let _state = self.lock_for(&info);
        info.token()
    }

    /// Interrupt `thread`'s current interruptible wait or sleep
    ///
    /// Waits involving a mutex are never interrupted; the request stays
    /// pending until the thread's next interruptible wait.
    pub fn interrupt(&self, thread: ThreadToken) -> SyncResult<()> {
        let mut state = self.shared.state.lock();
        let (info, interruptible) = match state.threads.get(&thread) {
            Some(record) => (Arc::clone(&record.info), record.interruptible),
            None => {
                return Err(SyncError::invalid_argument(format!(
                    "thread {} is not registered with this wait subsystem",
                    thread
                )))
            }
        };

        let mut guard = info.monitor.acquire();
        if *guard == SignalState::Waiting && interruptible {
            unregister_wait(&mut state, thread);
            *guard = SignalState::Interrupted;
            guard.signal_release();
            debug!(thread = %thread, "interrupted wait");
        } else {
            info.set_pending_interrupt();
            debug!(thread = %thread, "interrupt pending");
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------------

    /// Kind of the object behind `handle`
    pub fn kind(&self, handle: Handle) -> SyncResult<ObjectKind> {
        Ok(self.shared.state.lock().table.get(handle)?.kind())
    }

    /// Owning thread of a mutex, `None` when free
    pub fn mutex_owner(&self, handle: Handle) -> SyncResult<Option<ThreadToken>> {
        let state = self.shared.state.lock();
        let obj = state.table.get(handle)?;
        obj.expect_kind(handle.raw(), ObjectKind::Mutex)?;
        Ok(obj.owner())
    }

    pub fn stats(&self) -> WaitStats {
        let state = self.shared.state.lock();
        WaitStats {
            live_handles: state.table.len(),
            free_handles: state.table.free_len(),
            handle_capacity: state.table.capacity(),
            threads: state.threads.len(),
            waiting_threads: state
                .threads
                .values()
                .filter(|r| !r.waited.is_empty())
                .count(),
            owned_mutexes: state.threads.values().map(|r| r.owned.len()).sum(),
            waiter_nodes: state.nodes.allocated(),
        }
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    /// Take the subsystem lock, creating the caller's record on first use
    fn lock_for(&self, info: &Arc<ThreadWaitInfo>) -> MutexGuard<'_, State> {
        let mut state = self.shared.state.lock();
        if !state.threads.contains_key(&info.token()) {
            state
                .threads
                .insert(info.token(), ThreadRecord::new(Arc::clone(info)));
            info.register(&self.shared);
        }
        state
    }

    fn wait_locked(
        &self,
        mut state: MutexGuard<'_, State>,
        info: &ThreadWaitInfo,
        handles: &[Handle],
        wait_all: bool,
        timeout: Timeout,
        start: Instant,
    ) -> SyncResult<Satisfaction> {
        let thread = info.token();

        for (i, &h) in handles.iter().enumerate() {
            state.table.get(h)?;
            if wait_all && handles[..i].contains(&h) {
                return Err(SyncError::DuplicateHandle { index: i });
            }
        }

        if let Some(done) = try_acquire_now(&mut state, thread, handles, wait_all)? {
            return Ok(done);
        }
        if timeout.is_zero() {
            return Ok(Satisfaction::TimedOut);
        }

        let interruptible = handles
            .iter()
            .all(|&h| state.table.get(h).map_or(true, |o| !o.is_mutex()));
        if interruptible && info.take_pending_interrupt() {
            return Err(SyncError::Interrupted);
        }

        register_wait(&mut state, thread, handles, wait_all, interruptible);
        let mut guard = info.monitor.acquire();
        *guard = SignalState::Waiting;
        drop(state);

        block(&mut guard, timeout.deadline_from(start));

        match std::mem::replace(&mut *guard, SignalState::NotWaiting) {
            SignalState::Satisfied { index, abandoned } => {
                Ok(Satisfaction::Satisfied { index, abandoned })
            }
            SignalState::Interrupted => Err(SyncError::Interrupted),
            SignalState::RecursionOverflow(h) => Err(SyncError::RecursionOverflow(h.raw())),
            SignalState::Waiting | SignalState::NotWaiting => {
                // Nobody claimed us before the deadline
                drop(guard);
                let mut state = self.shared.state.lock();
                unregister_wait(&mut state, thread);
                Ok(Satisfaction::TimedOut)
            }
        }
    }
}

impl Default for WaitSubsystem {
    fn default() -> Self {
        Self::new()
    }
}

impl Shared {
    /// Thread-exit hook: abandon every mutex `thread` still owns and forget it
    pub(crate) fn on_thread_exiting(&self, thread: ThreadToken) {
        let mut state = self.state.lock();
        let owned = match state.threads.get_mut(&thread) {
            Some(record) => std::mem::take(&mut record.owned),
            None => return,
        };

        // Most recently acquired first
        for &handle in owned.iter().rev() {
            let Ok(obj) = state.table.get_mut(handle) else {
                continue;
            };
            if obj.owner() != Some(thread) {
                continue;
            }
            obj.abandon();
            warn!(handle = %handle, thread = %thread, "mutex abandoned by exiting thread");
            wake_waiters(&mut state, handle);
        }

        unregister_wait(&mut state, thread);
        if let Some(record) = state.threads.remove(&thread) {
            for id in record.nodes {
                state.nodes.release(id);
            }
        }
    }
}

// ============================================================================
// Lock-held helpers
// ============================================================================

fn check_wait_count(handles: &[Handle]) -> SyncResult<()> {
    if handles.is_empty() {
        return Err(SyncError::invalid_argument("wait list is empty"));
    }
    if handles.len() > MAX_WAIT_HANDLES {
        return Err(SyncError::TooManyHandles {
            count: handles.len(),
            max: MAX_WAIT_HANDLES,
        });
    }
    Ok(())
}

#[inline]
fn block(guard: &mut MonitorGuard<'_, SignalState>, deadline: Option<Instant>) {
    while **guard == SignalState::Waiting {
        match deadline {
            None => guard.wait(),
            Some(deadline) => {
                if !guard.wait_until(deadline) {
                    break;
                }
            }
        }
    }
}

/// Acquire immediately if the wait is already satisfiable
fn try_acquire_now(
    state: &mut State,
    thread: ThreadToken,
    handles: &[Handle],
    wait_all: bool,
) -> SyncResult<Option<Satisfaction>> {
    if !wait_all {
        for (index, &h) in handles.iter().enumerate() {
            let obj = state.table.get(h)?;
            if obj.can_satisfy(thread) {
                if obj.would_overflow(thread) {
                    return Err(SyncError::RecursionOverflow(h.raw()));
                }
                let acquired = acquire_for(state, h, thread);
                return Ok(Some(Satisfaction::Satisfied {
                    index,
                    abandoned: acquired.abandoned,
                }));
            }
        }
        return Ok(None);
    }

    for &h in handles {
        let obj = state.table.get(h)?;
        if !obj.can_satisfy(thread) {
            return Ok(None);
        }
    }
    if let Some(&h) = handles
        .iter()
        .find(|&&h| state.table.get(h).map_or(false, |o| o.would_overflow(thread)))
    {
        return Err(SyncError::RecursionOverflow(h.raw()));
    }

    Ok(Some(acquire_all(state, thread, handles)))
}

/// Acquire every object of a wait-all; reports the first abandoned index
fn acquire_all(state: &mut State, thread: ThreadToken, handles: &[Handle]) -> Satisfaction {
    let mut first_abandoned = None;
    for (index, &h) in handles.iter().enumerate() {
        if acquire_for(state, h, thread).abandoned && first_abandoned.is_none() {
            first_abandoned = Some(index);
        }
    }
    Satisfaction::Satisfied {
        index: first_abandoned.unwrap_or(0),
        abandoned: first_abandoned.is_some(),
    }
}

/// Consume one object's signal for `thread` and track mutex ownership
fn acquire_for(state: &mut State, handle: Handle, thread: ThreadToken) -> Acquired {
    let Ok(obj) = state.table.get_mut(handle) else {
        return Acquired::default();
    };
    let acquired = obj.accept(thread);

    if acquired.newly_owned {
        if let Some(record) = state.threads.get_mut(&thread) {
            record.owned.push(handle);
        }
    }
    if acquired.abandoned {
        debug!(handle = %handle, thread = %thread, "acquired abandoned mutex");
    }
    acquired
}

fn register_wait(
    state: &mut State,
    thread: ThreadToken,
    handles: &[Handle],
    wait_all: bool,
    interruptible: bool,
) {
    let State {
        table,
        nodes,
        threads,
    } = state;
    let Some(record) = threads.get_mut(&thread) else {
        return;
    };

    while record.nodes.len() < handles.len() {
        let index = record.nodes.len();
        record.nodes.push(nodes.alloc(thread, index));
    }

    record.waited.clear();
    record.waited.extend_from_slice(handles);
    record.wait_all = wait_all;
    record.interruptible = interruptible;

    for (i, &h) in handles.iter().enumerate() {
        if let Ok(obj) = table.get_mut(h) {
            nodes.push_back(&mut obj.waiters, record.nodes[i], h);
        }
    }
}

/// Pull every node of `thread`'s current wait off its objects' queues
fn unregister_wait(state: &mut State, thread: ThreadToken) {
    let State {
        table,
        nodes,
        threads,
    } = state;
    let Some(record) = threads.get_mut(&thread) else {
        return;
    };

    for (i, &h) in record.waited.iter().enumerate() {
        let id = record.nodes[i];
        if nodes.get(id).queued_on() != Some(h) {
            continue;
        }
        if let Ok(obj) = table.get_mut(h) {
            nodes.unlink(&mut obj.waiters, id);
        }
    }
    record.waited.clear();
    record.interruptible = false;
}

/// Hand a newly signaled object to queued waiters in FIFO order
///
/// Stops as soon as the object is no longer signaled, so an auto-reset
/// event or a mutex satisfies at most one waiter and a semaphore at most
/// its count.
fn wake_waiters(state: &mut State, handle: Handle) {
    let ids = match state.table.get(handle) {
        Ok(obj) => state.nodes.snapshot(&obj.waiters),
        Err(_) => return,
    };

    for id in ids {
        let signaled = state.table.get(handle).map_or(false, |o| o.is_signaled());
        if !signaled {
            break;
        }
        if state.nodes.get(id).queued_on() != Some(handle) {
            continue;
        }
        try_signal_to_satisfy_wait(state, id, handle);
    }
}

/// Try to complete the wait that `id` belongs to using `handle`'s signal
///
/// For a wait-all this succeeds only if every other object is acquirable
/// too, in which case all of them are acquired together.
fn try_signal_to_satisfy_wait(state: &mut State, id: NodeId, handle: Handle) -> bool {
    let (thread, index) = {
        let node = state.nodes.get(id);
        (node.thread, node.index)
    };
    let (info, wait_all, waited) = match state.threads.get(&thread) {
        Some(record) => (
            Arc::clone(&record.info),
            record.wait_all,
            record.waited.clone(),
        ),
        None => return false,
    };

    let mut overflow = None;
    if wait_all {
        for &h in &waited {
            let Ok(obj) = state.table.get(h) else {
                return false;
            };
            if !obj.can_satisfy(thread) {
                return false;
            }
            if overflow.is_none() && obj.would_overflow(thread) {
                overflow = Some(h);
            }
        }
    }

    let mut guard = info.monitor.acquire();
    if *guard != SignalState::Waiting {
        return false;
    }

    let outcome = match overflow {
        Some(h) => SignalState::RecursionOverflow(h),
        None if wait_all => match acquire_all(state, thread, &waited) {
            Satisfaction::Satisfied { index, abandoned } => {
                SignalState::Satisfied { index, abandoned }
            }
            Satisfaction::TimedOut => SignalState::NotWaiting,
        },
        None => SignalState::Satisfied {
            index,
            abandoned: acquire_for(state, handle, thread).abandoned,
        },
    };

    unregister_wait(state, thread);
    *guard = outcome;
    guard.signal_release();

    trace!(thread = %thread, handle = %handle, ?outcome, "satisfied wait");
    matches!(outcome, SignalState::Satisfied { .. })
}

fn release_semaphore_locked(state: &mut State, handle: Handle, count: u32) -> SyncResult<u32> {
    let obj = state.table.get_mut(handle)?;
    obj.expect_kind(handle.raw(), ObjectKind::Semaphore)?;
    let previous = obj.add_count(count)?;
    wake_waiters(state, handle);
    Ok(previous)
}

fn set_event_locked(state: &mut State, handle: Handle) -> SyncResult<()> {
    let obj = state.table.get_mut(handle)?;
    obj.expect_kind(handle.raw(), ObjectKind::ManualResetEvent)?;
    obj.set_signaled(true);
    wake_waiters(state, handle);
    Ok(())
}

fn release_mutex_locked(state: &mut State, thread: ThreadToken, handle: Handle) -> SyncResult<()> {
    let obj = state.table.get_mut(handle)?;
    obj.expect_kind(handle.raw(), ObjectKind::Mutex)?;

    match obj.release_mutex(thread) {
        None => Err(SyncError::NotOwned(handle.raw())),
        Some(false) => Ok(()),
        Some(true) => {
            if let Some(record) = state.threads.get_mut(&thread) {
                if let Some(pos) = record.owned.iter().rposition(|&h| h == handle) {
                    record.owned.remove(pos);
                }
            }
            wake_waiters(state, handle);
            Ok(())
        }
    }
}
