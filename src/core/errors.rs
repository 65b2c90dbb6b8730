/*!
 * Error Types
 * Centralized error handling with thiserror, miette, and serde support
 */

use super::types::ObjectKind;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for every fallible synchronization operation
pub type SyncResult<T> = Result<T, SyncError>;

/// Synchronization errors with serialization support
///
/// Timeouts and abandoned mutexes are deliberately absent: a timed-out wait
/// and an abandoned acquisition are outcomes, not failures.
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum SyncError {
    #[error("Invalid handle: {0:#x}")]
    #[diagnostic(
        code(sync::invalid_handle),
        help("The handle was deleted or never created. Handles are not reference counted.")
    )]
    InvalidHandle(u32),

    #[error("Invalid argument: {0}")]
    #[diagnostic(
        code(sync::invalid_argument),
        help("Timeouts must be -1 (infinite) or a non-negative number of milliseconds.")
    )]
    InvalidArgument(String),

    #[error("Semaphore count exceeded: count {count} + release {release} > maximum {maximum}")]
    #[diagnostic(
        code(sync::count_exceeded),
        help("The semaphore was released more times than it was acquired. No state was changed.")
    )]
    CountExceeded { count: u32, release: u32, maximum: u32 },

    #[error("Mutex {0:#x} is not owned by the calling thread")]
    #[diagnostic(
        code(sync::not_owned),
        help("Only the owning thread may release a mutex.")
    )]
    NotOwned(u32),

    #[error("Handle {handle:#x} refers to a {actual}, expected a {expected}")]
    #[diagnostic(code(sync::wrong_object_type))]
    WrongObjectType {
        handle: u32,
        expected: ObjectKind,
        actual: ObjectKind,
    },

    #[error("Mutex {0:#x} recursion count overflow")]
    #[diagnostic(
        code(sync::recursion_overflow),
        help("The mutex was reacquired too many times without being released.")
    )]
    RecursionOverflow(u32),

    #[error("Wait was interrupted")]
    #[diagnostic(code(sync::interrupted))]
    Interrupted,

    #[error("Too many handles: {count} (maximum {max})")]
    #[diagnostic(code(sync::too_many_handles))]
    TooManyHandles { count: usize, max: usize },

    #[error("Duplicate handle at index {index} in wait-all")]
    #[diagnostic(
        code(sync::duplicate_handle),
        help("Wait-all requires every handle to be distinct.")
    )]
    DuplicateHandle { index: usize },

    #[error("Resource exhausted: {0}")]
    #[diagnostic(
        code(sync::resource_exhausted),
        help("The handle table could not grow. Delete unused handles.")
    )]
    ResourceExhausted(String),
}

impl SyncError {
    /// Shorthand for an [`SyncError::InvalidArgument`] with a formatted message
    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        SyncError::InvalidArgument(msg.into())
    }

    /// Check if this error indicates a stale or unknown handle
    #[inline]
    pub fn is_invalid_handle(&self) -> bool {
        matches!(self, SyncError::InvalidHandle(_))
    }
}
