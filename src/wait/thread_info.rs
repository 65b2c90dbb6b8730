/*!
 * Per-Thread Wait State
 *
 * Every thread that touches a wait subsystem gets one `ThreadWaitInfo`: the
 * monitor it blocks on, the state a signaler writes into it, and the pending
 * interrupt flag. The thread-local holder's destructor is the thread-exit
 * hook that abandons mutexes the thread still owns.
 */

use super::subsystem::Shared;
use crate::core::Handle;
use crate::sync::{LowLevelMonitor, ThreadToken};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// What the blocked thread finds when it wakes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SignalState {
    NotWaiting,
    Waiting,
    /// Wait satisfied; for wait-all `index` is the first abandoned mutex
    /// when `abandoned` is set
    Satisfied { index: usize, abandoned: bool },
    Interrupted,
    /// Wait-all could not complete: acquiring this mutex would overflow
    RecursionOverflow(Handle),
}

pub(crate) struct ThreadWaitInfo {
    token: ThreadToken,
    pub monitor: LowLevelMonitor<SignalState>,
    pending_interrupt: AtomicBool,
    /// Subsystems holding a record for this thread (leaf lock)
    subsystems: Mutex<Vec<Weak<Shared>>>,
}

struct CurrentThread(Arc<ThreadWaitInfo>);

impl Drop for CurrentThread {
    fn drop(&mut self) {
        self.0.on_thread_exiting();
    }
}

thread_local! {
    static CURRENT: CurrentThread = CurrentThread(Arc::new(ThreadWaitInfo {
        token: ThreadToken::current(),
        monitor: LowLevelMonitor::new(SignalState::NotWaiting),
        pending_interrupt: AtomicBool::new(false),
        subsystems: Mutex::new(Vec::new()),
    }));
}

impl ThreadWaitInfo {
    /// Wait state of the calling thread
    #[inline]
    pub fn current() -> Arc<Self> {
        CURRENT.with(|c| Arc::clone(&c.0))
    }

    #[inline(always)]
    pub fn token(&self) -> ThreadToken {
        self.token
    }

    #[inline]
    pub fn set_pending_interrupt(&self) {
        self.pending_interrupt.store(true, Ordering::Release);
    }

    /// Consume a pending interrupt
    #[inline]
    pub fn take_pending_interrupt(&self) -> bool {
        self.pending_interrupt.swap(false, Ordering::AcqRel)
    }

    /// Remember that `shared` keeps a record for this thread
    pub fn register(&self, shared: &Arc<Shared>) {
        let weak = Arc::downgrade(shared);
        let mut subsystems = self.subsystems.lock();
        subsystems.retain(|w| w.strong_count() > 0);
        if !subsystems.iter().any(|w| Weak::ptr_eq(w, &weak)) {
            subsystems.push(weak);
        }
    }

    fn on_thread_exiting(&self) {
        let subsystems = std::mem::take(&mut *self.subsystems.lock());
        for shared in subsystems.iter().filter_map(Weak::upgrade) {
            shared.on_thread_exiting(self.token);
        }
    }
}
