use super::{ThreadEntry, ThreadExecutionState, ThreadOptions, ThreadRef, WakeReason};
use crate::cell::{LockedCell, LockedRefCell};
use crate::kernel::hal::Context;
use crate::kernel::priority::{LOWEST_PRIORITY, ThreadPriority};
use crate::kernel::stack::{Stack, StackRegion};
use crate::kernel::wait_queue::WaitQueue;
use crate::sync::{PreemptLock, PreemptLockKey};
use crate::thread::ThreadBuilder;
use core::ptr::NonNull;

/// Caller-owned thread structure.
///
/// A `RawThread` is a slot that hosts one thread at a time. It starts out
/// [`Uninitialized`](ThreadExecutionState::Uninitialized), and can be passed to
/// [`create`](crate::thread::create) again once its occupant has
/// [`Terminated`](ThreadExecutionState::Terminated). Passing it while the
/// occupant is still live is a fatal kernel error.
///
/// ```no_run
/// use reslot::{RawThread, Stack};
///
/// static WORKER: RawThread = RawThread::new("worker");
/// static WORKER_STACK: Stack<2048> = Stack::new();
///
/// fn work(_: usize, _: usize, _: usize) {}
///
/// fn spawn_worker() {
///     let _worker = WORKER.builder(&WORKER_STACK).priority(5).spawn(work);
/// }
/// ```
pub struct RawThread {
    name: &'static str,
    pub(crate) state: LockedCell<ThreadExecutionState, PreemptLock>,
    // Bumped each time the structure is given a new occupant
    pub(crate) generation: LockedCell<u32, PreemptLock>,
    pub(crate) priority: LockedCell<ThreadPriority, PreemptLock>,
    pub(crate) options: LockedCell<ThreadOptions, PreemptLock>,
    pub(crate) entry: LockedCell<Option<ThreadEntry>, PreemptLock>,
    pub(crate) stack: LockedCell<Option<StackRegion>, PreemptLock>,
    pub(crate) joiners: WaitQueue,
    pub(crate) wake_reason: LockedCell<WakeReason, PreemptLock>,
    pub(crate) blocked_on: LockedCell<Option<NonNull<WaitQueue>>, PreemptLock>,
    pub(crate) context: LockedRefCell<Option<Context>, PreemptLock>,
}

impl RawThread {
    pub const fn new(name: &'static str) -> RawThread {
        RawThread {
            name,
            state: LockedCell::new(ThreadExecutionState::Uninitialized),
            generation: LockedCell::new(0),
            priority: LockedCell::new(LOWEST_PRIORITY),
            options: LockedCell::new(ThreadOptions::NONE),
            entry: LockedCell::new(None),
            stack: LockedCell::new(None),
            joiners: WaitQueue::new(),
            wake_reason: LockedCell::new(WakeReason::Notified),
            blocked_on: LockedCell::new(None),
            context: LockedRefCell::new(None),
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> ThreadExecutionState {
        PreemptLock::with(|pkey| self.state.get(pkey))
    }

    pub fn thread_ref(&'static self) -> ThreadRef {
        ThreadRef::new(self)
    }

    pub fn builder<const SIZE: usize>(
        &'static self,
        stack: &'static Stack<SIZE>,
    ) -> ThreadBuilder<SIZE> {
        ThreadBuilder::new(self, stack)
    }

    /// Returns the structure to its initial state between kernel runs.
    pub(crate) fn reset(&self, pkey: PreemptLockKey<'_>) {
        self.state.set(pkey, ThreadExecutionState::Uninitialized);
        self.entry.set(pkey, None);
        if let Some(stack) = self.stack.replace(pkey, None) {
            stack.unbind(pkey);
        }
        self.joiners.clear(pkey);
        self.wake_reason.set(pkey, WakeReason::Notified);
        self.blocked_on.set(pkey, None);
        self.context.replace(pkey, None);
    }
}

impl core::fmt::Debug for RawThread {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RawThread")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}
