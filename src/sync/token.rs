/*!
 * Thread Tokens
 * Small, never-reused identifiers for OS threads
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: ThreadToken = ThreadToken(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed));
}

/// Identifier of a thread, unique for the life of the process (never 0)
///
/// `std::thread::ThreadId` is opaque; a plain integer packs into debug owner
/// fields and hashes cheaply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadToken(u64);

impl ThreadToken {
    /// Token of the calling thread
    #[inline]
    pub fn current() -> Self {
        CURRENT.with(|t| *t)
    }

    #[inline(always)]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ThreadToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}
