//! Application Programming Interface
use crate::kernel::exception::{KernelError, fatal_error};
use crate::kernel::scheduler::{self, SCHEDULER};
use crate::sync::PreemptLock;
use crate::thread::ThreadId;
pub use crate::time::{Duration, Instant, Timeout};

/// Identity of the calling thread, or `None` outside of kernel threads.
pub fn current() -> Option<ThreadId> {
    PreemptLock::with(|pkey| {
        let scheduler = SCHEDULER.borrow(pkey);
        let (thread, _) = scheduler.caller(pkey)?;
        Some(ThreadId::new(thread, thread.raw().generation.get(pkey)))
    })
}

/// Lets other ready threads of the same priority run first.
pub fn yield_now() {
    scheduler::preemption_point();
    let switch = PreemptLock::with(|pkey| {
        let mut scheduler = SCHEDULER.borrow_mut(pkey);
        let (thread, context) = scheduler.caller(pkey)?;
        Some(scheduler.yield_current(pkey, thread, context))
    });
    if let Some(switch) = switch {
        switch.perform();
    }
}

/// Blocks the calling thread for at least `duration`.
#[track_caller]
pub fn sleep(duration: Duration) {
    sleep_until(Instant::now() + duration)
}

/// Blocks the calling thread until `deadline` has passed.
#[track_caller]
pub fn sleep_until(deadline: Instant) {
    scheduler::preemption_point();
    let switch = PreemptLock::with(|pkey| {
        let mut scheduler = SCHEDULER.borrow_mut(pkey);
        let (thread, context) = scheduler.caller(pkey)?;
        Some(scheduler.block(pkey, thread, context, Some(deadline)))
    });
    match switch {
        Some(switch) => switch.perform(),
        None => fatal_error(&KernelError::InvalidContext { operation: "sleep" }),
    }
}
