//! Synchronization primitives.
//!
//! All kernel state is protected by a single nesting lock, the [`PreemptLock`].
//! While it is held, no thread switch and no wakeup handler can touch kernel
//! state. The key token of the lock gives access to data stored in
//! [`LockedCell`](crate::cell::LockedCell) and
//! [`LockedRefCell`](crate::cell::LockedRefCell).
pub mod preempt_lock;
pub mod semaphore;

pub use preempt_lock::{PreemptLock, PreemptLockKey};
pub use semaphore::{Semaphore, TakeError};

/// A lock that can be acquired again by the thread of execution that already
/// holds it.
pub trait NestingLock {
    type Key<'a>: Copy;

    fn with<R>(f: impl FnOnce(Self::Key<'_>) -> R) -> R;
}
