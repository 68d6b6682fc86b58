use super::{JoinError, RawThread, ThreadExecutionState};
use crate::kernel::priority::ThreadPriority;
use crate::sync::{PreemptLock, PreemptLockKey};
use crate::time::Timeout;
use core::ptr::NonNull;

/// Handle to a thread structure, whoever its occupant is.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ThreadRef(NonNull<RawThread>);

unsafe impl Sync for ThreadRef {}
unsafe impl Send for ThreadRef {}

impl ThreadRef {
    pub(crate) const fn new(thread: &'static RawThread) -> ThreadRef {
        // SAFETY: references are never null
        ThreadRef(unsafe { NonNull::new_unchecked(thread as *const RawThread as *mut RawThread) })
    }

    /// # Safety
    /// `ptr` must point to a `RawThread` with static lifetime.
    pub(crate) unsafe fn from_ptr(ptr: *const RawThread) -> ThreadRef {
        ThreadRef(unsafe { NonNull::new_unchecked(ptr as *mut RawThread) })
    }

    pub(crate) fn raw(&self) -> &'static RawThread {
        // SAFETY: thread structures are statics
        unsafe { &*self.0.as_ptr() }
    }

    pub fn name(&self) -> &'static str {
        self.raw().name()
    }

    pub fn state(&self) -> ThreadExecutionState {
        self.raw().state()
    }

    pub fn priority(&self) -> ThreadPriority {
        PreemptLock::with(|pkey| self.raw().priority.get(pkey))
    }

    pub fn generation(&self) -> u32 {
        PreemptLock::with(|pkey| self.raw().generation.get(pkey))
    }

    /// Number of threads blocked joining the current occupant.
    pub fn joiners(&self) -> usize {
        PreemptLock::with(|pkey| self.raw().joiners.len(pkey))
    }

    /// Identity of the current occupant.
    pub fn occupant(&self) -> ThreadId {
        ThreadId {
            thread: *self,
            generation: self.generation(),
        }
    }

    /// Waits for the current occupant to terminate.
    pub fn join(&self, timeout: Timeout) -> Result<(), JoinError> {
        self.occupant().join(timeout)
    }
}

impl core::fmt::Debug for ThreadRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "ThreadRef({})", self.name())
    }
}

/// Identity of one occupant of a thread structure.
///
/// Once the structure is reused the id is stale, and it refers to a thread
/// that has terminated.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ThreadId {
    pub(crate) thread: ThreadRef,
    pub(crate) generation: u32,
}

impl ThreadId {
    pub(crate) const fn new(thread: ThreadRef, generation: u32) -> ThreadId {
        ThreadId { thread, generation }
    }

    pub fn thread(&self) -> ThreadRef {
        self.thread
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn name(&self) -> &'static str {
        self.thread.name()
    }

    pub(crate) fn is_occupant(&self, pkey: PreemptLockKey<'_>) -> bool {
        self.thread.raw().generation.get(pkey) == self.generation
    }

    /// `true` until the thread terminates.
    pub fn is_alive(&self) -> bool {
        PreemptLock::with(|pkey| {
            self.is_occupant(pkey) && self.thread.raw().state.get(pkey).is_alive()
        })
    }
}
