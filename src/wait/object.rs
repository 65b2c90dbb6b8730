/*!
 * Waitable Objects
 *
 * The three object variants and the rules for when each is signaled and
 * what acquiring it does. All methods run under the subsystem lock.
 */

use super::handle_table::TableEntry;
use super::waiters::WaiterList;
use crate::core::limits::MAX_MUTEX_RECURSION;
use crate::core::{EventMode, ObjectKind, SyncError, SyncResult};
use crate::sync::ThreadToken;

/// Variant-specific state
#[derive(Debug)]
pub(crate) enum ObjectState {
    Mutex {
        owner: Option<ThreadToken>,
        recursion: u32,
        /// Previous owner exited while holding it; reported once
        abandoned: bool,
    },
    Semaphore {
        count: u32,
        maximum: u32,
    },
    Event {
        signaled: bool,
        mode: EventMode,
    },
}

/// Result of acquiring an object on behalf of a thread
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Acquired {
    pub abandoned: bool,
    /// Mutex changed hands; caller records it in the owner's list
    pub newly_owned: bool,
}

/// A waitable object plus its FIFO waiter queue
#[derive(Debug)]
pub(crate) struct WaitableObject {
    pub state: ObjectState,
    pub waiters: WaiterList,
}

impl WaitableObject {
    pub fn mutex(owner: Option<ThreadToken>) -> Self {
        Self::with_state(ObjectState::Mutex {
            owner,
            recursion: u32::from(owner.is_some()),
            abandoned: false,
        })
    }

    pub fn semaphore(count: u32, maximum: u32) -> Self {
        Self::with_state(ObjectState::Semaphore { count, maximum })
    }

    pub fn event(signaled: bool, mode: EventMode) -> Self {
        Self::with_state(ObjectState::Event { signaled, mode })
    }

    fn with_state(state: ObjectState) -> Self {
        Self {
            state,
            waiters: WaiterList::default(),
        }
    }

    pub fn kind(&self) -> ObjectKind {
        match self.state {
            ObjectState::Mutex { .. } => ObjectKind::Mutex,
            ObjectState::Semaphore { .. } => ObjectKind::Semaphore,
            ObjectState::Event {
                mode: EventMode::AutoReset,
                ..
            } => ObjectKind::AutoResetEvent,
            ObjectState::Event {
                mode: EventMode::ManualReset,
                ..
            } => ObjectKind::ManualResetEvent,
        }
    }

    #[inline]
    pub fn is_mutex(&self) -> bool {
        matches!(self.state, ObjectState::Mutex { .. })
    }

    /// Acquirable by any thread right now
    #[inline]
    pub fn is_signaled(&self) -> bool {
        match self.state {
            ObjectState::Mutex { owner, .. } => owner.is_none(),
            ObjectState::Semaphore { count, .. } => count > 0,
            ObjectState::Event { signaled, .. } => signaled,
        }
    }

    /// Acquirable by `thread` right now (a mutex it already owns counts)
    #[inline]
    pub fn can_satisfy(&self, thread: ThreadToken) -> bool {
        match self.state {
            ObjectState::Mutex { owner, .. } => owner.is_none() || owner == Some(thread),
            _ => self.is_signaled(),
        }
    }

    /// Acquiring would push the recursion count of `thread`'s mutex past the limit
    #[inline]
    pub fn would_overflow(&self, thread: ThreadToken) -> bool {
        matches!(
            self.state,
            ObjectState::Mutex { owner: Some(o), recursion, .. }
                if o == thread && recursion >= MAX_MUTEX_RECURSION
        )
    }

    /// Consume the signal for `thread`
    ///
    /// Callers check [`can_satisfy`](Self::can_satisfy) and
    /// [`would_overflow`](Self::would_overflow) first.
    pub fn accept(&mut self, thread: ThreadToken) -> Acquired {
        debug_assert!(self.can_satisfy(thread));
        match &mut self.state {
            ObjectState::Mutex {
                owner,
                recursion,
                abandoned,
            } => {
                if *owner == Some(thread) {
                    *recursion += 1;
                    return Acquired {
                        abandoned: false,
                        newly_owned: false,
                    };
                }
                *owner = Some(thread);
                *recursion = 1;
                Acquired {
                    abandoned: std::mem::take(abandoned),
                    newly_owned: true,
                }
            }
            ObjectState::Semaphore { count, .. } => {
                *count -= 1;
                Acquired::default()
            }
            ObjectState::Event { signaled, mode } => {
                if *mode == EventMode::AutoReset {
                    *signaled = false;
                }
                Acquired::default()
            }
        }
    }

    /// Make a semaphore `release` units richer; returns the previous count
    pub fn add_count(&mut self, release: u32) -> SyncResult<u32> {
        match &mut self.state {
            ObjectState::Semaphore { count, maximum } => {
                let previous = *count;
                match previous.checked_add(release) {
                    Some(total) if total <= *maximum => {
                        *count = total;
                        Ok(previous)
                    }
                    _ => Err(SyncError::CountExceeded {
                        count: previous,
                        release,
                        maximum: *maximum,
                    }),
                }
            }
            _ => Err(SyncError::invalid_argument("release on a non-semaphore")),
        }
    }

    /// Set or clear an event's signaled flag
    pub fn set_signaled(&mut self, value: bool) {
        if let ObjectState::Event { signaled, .. } = &mut self.state {
            *signaled = value;
        }
    }

    /// Drop one level of `thread`'s ownership
    ///
    /// Returns `true` once the mutex is fully released.
    pub fn release_mutex(&mut self, thread: ThreadToken) -> Option<bool> {
        match &mut self.state {
            ObjectState::Mutex {
                owner, recursion, ..
            } if *owner == Some(thread) => {
                *recursion -= 1;
                if *recursion == 0 {
                    *owner = None;
                    Some(true)
                } else {
                    Some(false)
                }
            }
            _ => None,
        }
    }

    /// Owner exited: free the mutex and flag it abandoned
    pub fn abandon(&mut self) {
        if let ObjectState::Mutex {
            owner,
            recursion,
            abandoned,
        } = &mut self.state
        {
            *owner = None;
            *recursion = 0;
            *abandoned = true;
        }
    }

    /// Current owner if this is a held mutex
    #[inline]
    pub fn owner(&self) -> Option<ThreadToken> {
        match self.state {
            ObjectState::Mutex { owner, .. } => owner,
            _ => None,
        }
    }

    /// Fail with `WrongObjectType` unless this is a `expected`
    pub fn expect_kind(&self, raw: u32, expected: ObjectKind) -> SyncResult<()> {
        let actual = self.kind();
        let matches = match expected {
            ObjectKind::AutoResetEvent | ObjectKind::ManualResetEvent => actual.is_event(),
            _ => actual == expected,
        };
        if matches {
            Ok(())
        } else {
            Err(SyncError::WrongObjectType {
                handle: raw,
                expected,
                actual,
            })
        }
    }
}

impl TableEntry for WaitableObject {
    fn on_delete(&mut self) {
        debug_assert!(self.waiters.is_empty(), "waiters detached before delete");
    }
}
