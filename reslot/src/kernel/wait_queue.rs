use crate::cell::LockedRefCell;
use crate::kernel::hal::Context;
use crate::kernel::priority::is_more_urgent;
use crate::kernel::scheduler::{RawScheduler, Switch};
use crate::sync::{PreemptLock, PreemptLockKey};
use crate::thread::{ThreadRef, WakeReason};
use crate::time::Instant;
use alloc::collections::VecDeque;
use core::ptr::NonNull;

/// Threads blocked on one kernel object, most urgent first and FIFO within a
/// priority level.
///
/// A blocked thread records the queue it waits in, so that a timeout or an
/// abort can take it out again. The queue must therefore stay in place while
/// it has waiters.
pub(crate) struct WaitQueue {
    waiters: LockedRefCell<VecDeque<ThreadRef>, PreemptLock>,
}

impl WaitQueue {
    pub const fn new() -> WaitQueue {
        WaitQueue {
            waiters: LockedRefCell::new(VecDeque::new()),
        }
    }

    pub fn len(&self, pkey: PreemptLockKey<'_>) -> usize {
        self.waiters.borrow(pkey).len()
    }

    /// Queues the calling thread and takes it off the CPU.
    pub fn block(
        &self,
        pkey: PreemptLockKey<'_>,
        scheduler: &mut RawScheduler,
        thread: ThreadRef,
        context: Context,
        deadline: Option<Instant>,
    ) -> Switch {
        let priority = thread.raw().priority.get(pkey);
        {
            let mut waiters = self.waiters.borrow_mut(pkey);
            let index = waiters
                .iter()
                .position(|waiter| is_more_urgent(priority, waiter.raw().priority.get(pkey)))
                .unwrap_or(waiters.len());
            waiters.insert(index, thread);
        }
        thread.raw().blocked_on.set(pkey, Some(NonNull::from(self)));
        scheduler.block(pkey, thread, context, deadline)
    }

    /// Wakes the first waiter.
    pub fn release_one(
        &self,
        pkey: PreemptLockKey<'_>,
        scheduler: &mut RawScheduler,
        reason: WakeReason,
    ) -> Option<ThreadRef> {
        let thread = self.waiters.borrow_mut(pkey).pop_front()?;
        scheduler.wake(pkey, thread, reason);
        Some(thread)
    }

    /// Wakes every waiter in one step. Returns the number of threads woken.
    pub fn release_all(
        &self,
        pkey: PreemptLockKey<'_>,
        scheduler: &mut RawScheduler,
        reason: WakeReason,
    ) -> usize {
        let waiters = core::mem::take(&mut *self.waiters.borrow_mut(pkey));
        let count = waiters.len();
        for thread in waiters {
            scheduler.wake(pkey, thread, reason);
        }
        count
    }

    pub fn remove(&self, pkey: PreemptLockKey<'_>, thread: ThreadRef) -> bool {
        let mut waiters = self.waiters.borrow_mut(pkey);
        match waiters.iter().position(|waiter| *waiter == thread) {
            Some(index) => {
                waiters.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn clear(&self, pkey: PreemptLockKey<'_>) {
        self.waiters.borrow_mut(pkey).clear();
    }
}
