/*!
 * Core Types
 * Handles, timeouts, and wait outcomes shared by every subsystem
 */

use super::errors::{SyncError, SyncResult};
use super::limits::{INFINITE, MAX_HANDLE_INDEX};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

// ============================================================================
// Handles
// ============================================================================

/// Opaque handle to a waitable object
///
/// The raw value is `index + 1`; `0` and `u32::MAX` (-1) are never issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(u32);

impl Handle {
    /// The null handle
    pub const INVALID: Handle = Handle(0);

    /// Wrap a raw handle value (no validation; lookups validate)
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Handle(raw)
    }

    /// Raw handle value
    #[inline(always)]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Whether this value could ever name a live object
    #[inline]
    pub const fn is_valid_value(self) -> bool {
        self.0 != 0 && self.0 != u32::MAX
    }

    #[inline]
    pub(crate) fn from_index(index: usize) -> Option<Self> {
        if index > MAX_HANDLE_INDEX {
            return None;
        }
        Some(Handle(index as u32 + 1))
    }

    #[inline]
    pub(crate) fn index(self) -> Option<usize> {
        if self.is_valid_value() {
            Some(self.0 as usize - 1)
        } else {
            None
        }
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

// ============================================================================
// Object kinds
// ============================================================================

/// Variant tag of a waitable object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Mutex,
    Semaphore,
    AutoResetEvent,
    ManualResetEvent,
}

impl ObjectKind {
    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Mutex => "mutex",
            Self::Semaphore => "semaphore",
            Self::AutoResetEvent => "auto-reset event",
            Self::ManualResetEvent => "manual-reset event",
        }
    }

    #[inline]
    pub const fn is_event(&self) -> bool {
        matches!(self, Self::AutoResetEvent | Self::ManualResetEvent)
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reset policy of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventMode {
    /// A successful wait consumes the signal; `set` wakes at most one waiter
    AutoReset,
    /// The signal stays set until `reset`; `set` wakes every waiter
    ManualReset,
}

// ============================================================================
// Timeouts
// ============================================================================

/// Validated wait timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    Infinite,
    Millis(u32),
}

impl Timeout {
    /// Parse a millisecond timeout where `-1` means infinite
    pub fn from_millis(ms: i32) -> SyncResult<Self> {
        match ms {
            INFINITE => Ok(Timeout::Infinite),
            ms if ms >= 0 => Ok(Timeout::Millis(ms as u32)),
            ms => Err(SyncError::invalid_argument(format!(
                "timeout {} ms is negative and not the infinite sentinel",
                ms
            ))),
        }
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        matches!(self, Timeout::Millis(0))
    }

    #[inline]
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Timeout::Infinite => None,
            Timeout::Millis(ms) => Some(Duration::from_millis(*ms as u64)),
        }
    }

    /// Absolute deadline relative to `start`, `None` when infinite
    #[inline]
    pub fn deadline_from(&self, start: Instant) -> Option<Instant> {
        self.as_duration().map(|d| start + d)
    }
}

// ============================================================================
// Wait outcomes
// ============================================================================

/// Outcome of a single-object wait
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitOutcome {
    Signaled,
    /// Acquired a mutex whose previous owner exited without releasing it
    Abandoned,
    TimedOut,
}

impl WaitOutcome {
    /// Whether the object was acquired (cleanly or abandoned)
    #[inline]
    pub const fn is_acquired(&self) -> bool {
        !matches!(self, WaitOutcome::TimedOut)
    }
}

/// Outcome of a wait-any
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitAnyOutcome {
    /// The object at `index` satisfied the wait
    Signaled(usize),
    /// The mutex at `index` satisfied the wait and was abandoned
    Abandoned(usize),
    TimedOut,
}

impl WaitAnyOutcome {
    /// Index of the object that satisfied the wait
    #[inline]
    pub const fn index(&self) -> Option<usize> {
        match self {
            Self::Signaled(i) | Self::Abandoned(i) => Some(*i),
            Self::TimedOut => None,
        }
    }
}

/// Outcome of a wait-all
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitAllOutcome {
    Signaled,
    /// All acquired; the first abandoned mutex in list order is at `index`
    Abandoned(usize),
    TimedOut,
}
