use crate::cell::LockedCell;
use crate::kernel::exception::{KernelError, fatal_error};
use crate::kernel::scheduler::{self, SCHEDULER, Switch};
use crate::kernel::wait_queue::WaitQueue;
use crate::sync::PreemptLock;
use crate::thread::{ThreadRef, WakeReason};
use crate::time::Timeout;
use core::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TakeError {
    /// Count was zero and `Timeout::NoWait` was given.
    WouldBlock,
    Timeout,
    /// The semaphore was reset while waiting.
    Reset,
}

impl fmt::Display for TakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TakeError::WouldBlock => "semaphore is not available",
            TakeError::Timeout => "timed out waiting for semaphore",
            TakeError::Reset => "semaphore was reset",
        };
        f.write_str(text)
    }
}

/// Counting semaphore.
///
/// Waiters are served most urgent first, and in arrival order within a
/// priority level. `give` hands the count directly to the first waiter.
pub struct Semaphore {
    count: LockedCell<u32, PreemptLock>,
    limit: u32,
    waiters: WaitQueue,
}

impl Semaphore {
    pub const fn new(initial: u32, limit: u32) -> Semaphore {
        assert!(limit > 0, "semaphore limit must be positive");
        assert!(initial <= limit, "initial count exceeds the limit");
        Semaphore {
            count: LockedCell::new(initial),
            limit,
            waiters: WaitQueue::new(),
        }
    }

    pub fn count(&self) -> u32 {
        PreemptLock::with(|pkey| self.count.get(pkey))
    }

    pub const fn limit(&self) -> u32 {
        self.limit
    }

    /// Wakes the first waiter, or increments the count up to the limit.
    pub fn give(&self) {
        scheduler::preemption_point();
        let switch = PreemptLock::with(|pkey| {
            let mut scheduler = SCHEDULER.borrow_mut(pkey);
            if self
                .waiters
                .release_one(pkey, &mut scheduler, WakeReason::Notified)
                .is_some()
            {
                scheduler.preempt(pkey)
            } else {
                self.count.update(pkey, |count| count.saturating_add(1).min(self.limit));
                None
            }
        });
        if let Some(switch) = switch {
            switch.perform();
        }
    }

    /// Decrements the count, waiting up to `timeout` for it to become positive.
    #[track_caller]
    pub fn take(&self, timeout: Timeout) -> Result<(), TakeError> {
        scheduler::preemption_point();

        enum Take {
            Done(Result<(), TakeError>),
            Wait(ThreadRef, Switch),
            NotThread,
        }

        let step = PreemptLock::with(|pkey| {
            let count = self.count.get(pkey);
            if count > 0 {
                self.count.set(pkey, count - 1);
                return Take::Done(Ok(()));
            }
            if timeout == Timeout::NoWait {
                return Take::Done(Err(TakeError::WouldBlock));
            }
            let mut scheduler = SCHEDULER.borrow_mut(pkey);
            let Some((current, context)) = scheduler.caller(pkey) else {
                return Take::NotThread;
            };
            let switch =
                self.waiters
                    .block(pkey, &mut scheduler, current, context, timeout.deadline());
            Take::Wait(current, switch)
        });

        match step {
            Take::Done(result) => result,
            Take::NotThread => fatal_error(&KernelError::InvalidContext {
                operation: "Semaphore::take",
            }),
            Take::Wait(current, switch) => {
                switch.perform();
                match scheduler::wake_reason(current) {
                    WakeReason::Notified => Ok(()),
                    WakeReason::TimedOut => Err(TakeError::Timeout),
                    WakeReason::Reset => Err(TakeError::Reset),
                }
            }
        }
    }

    /// Sets the count to zero and fails every pending `take` with
    /// [`TakeError::Reset`].
    pub fn reset(&self) {
        scheduler::preemption_point();
        let switch = PreemptLock::with(|pkey| {
            self.count.set(pkey, 0);
            let mut scheduler = SCHEDULER.borrow_mut(pkey);
            let woken = self
                .waiters
                .release_all(pkey, &mut scheduler, WakeReason::Reset);
            if woken > 0 { scheduler.preempt(pkey) } else { None }
        });
        if let Some(switch) = switch {
            switch.perform();
        }
    }

    /// Number of threads waiting in `take`.
    pub fn waiters(&self) -> usize {
        PreemptLock::with(|pkey| self.waiters.len(pkey))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_without_waiting() {
        static SEM: Semaphore = Semaphore::new(2, 3);
        assert_eq!(SEM.take(Timeout::NoWait), Ok(()));
        assert_eq!(SEM.take(Timeout::NoWait), Ok(()));
        assert_eq!(SEM.take(Timeout::NoWait), Err(TakeError::WouldBlock));
        assert_eq!(SEM.count(), 0);
    }

    #[test]
    fn give_saturates_at_limit() {
        static SEM: Semaphore = Semaphore::new(0, 2);
        for _ in 0..5 {
            SEM.give();
        }
        assert_eq!(SEM.count(), SEM.limit());
        SEM.reset();
        assert_eq!(SEM.count(), 0);
        assert_eq!(SEM.waiters(), 0);
    }
}
