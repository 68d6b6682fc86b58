//! Priority-based preemptive scheduler.
//!
//! One thread holds the CPU at a time. Ready threads wait in one FIFO queue per
//! priority level. A thread that is preempted goes back to the front of its
//! level and a thread that yields goes to the back.
//!
//! Switches are decided under the kernel lock and carried out after it has
//! been released: the decision produces a [`Switch`], and the calling thread
//! performs it by resuming the next context and then suspending itself.
//!
//! The wakeup handler runs outside of kernel threads. When it readies a thread
//! that is more urgent than the running one it only flags a reschedule, and
//! the running thread is preempted at its next kernel call.
use crate::cell::LockedRefCell;
use crate::config::NUM_PRIORITIES;
use crate::kernel::exception;
use crate::kernel::hal::{self, Context};
use crate::kernel::priority::{ThreadPriority, is_more_urgent};
use crate::kernel::{self, ExitStatus, tracing};
use crate::sync::{PreemptLock, PreemptLockKey};
use crate::thread::{ThreadExecutionState, ThreadRef, WakeReason};
use crate::time::Instant;
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use reslot_khal::ContextInfo;

/// What the CPU does once the thread that had it stops running.
pub(crate) enum Next {
    Thread(Context),
    Idle,
    /// Nothing is ready and nothing waits for a deadline.
    Quiescent(ExitStatus),
}

impl Next {
    /// Hands the CPU over without waiting to get it back.
    pub fn dispatch(self) {
        match self {
            Next::Thread(context) => context.resume(),
            Next::Idle => {}
            Next::Quiescent(status) => kernel::halt(status),
        }
    }
}

/// A decided switch away from the calling thread.
#[must_use]
pub(crate) struct Switch {
    from: Context,
    to: Next,
}

impl Switch {
    /// Gives the CPU to the next thread and parks the caller until it is
    /// scheduled again. Must be called without the kernel lock.
    pub fn perform(self) {
        match self.to {
            Next::Thread(to) => {
                if to == self.from {
                    return;
                }
                to.resume();
            }
            Next::Idle => {}
            Next::Quiescent(status) => {
                kernel::halt(status);
                hal::exit_thread();
            }
        }
        self.from.suspend();
        kernel::check_halted();
        check_retired();
    }
}

pub(crate) struct RawScheduler {
    ready: [VecDeque<ThreadRef>; NUM_PRIORITIES],
    // Sorted by deadline
    sleepers: Vec<(Instant, ThreadRef)>,
    current: Option<ThreadRef>,
    reschedule_pending: bool,
    // Thread structures used during the current run
    threads: Vec<ThreadRef>,
    // Contexts of the run whose host threads may still be executing
    contexts: Vec<Context>,
    // Contexts of threads aborted while parked, to be abandoned once resumed
    retired: Vec<Context>,
}

pub(crate) static SCHEDULER: LockedRefCell<RawScheduler, PreemptLock> =
    LockedRefCell::new(RawScheduler::new());

impl RawScheduler {
    const fn new() -> RawScheduler {
        RawScheduler {
            ready: [const { VecDeque::new() }; NUM_PRIORITIES],
            sleepers: Vec::new(),
            current: None,
            reschedule_pending: false,
            threads: Vec::new(),
            contexts: Vec::new(),
            retired: Vec::new(),
        }
    }

    pub fn current_thread(&self) -> Option<ThreadRef> {
        self.current
    }

    /// The running thread and its context, if the caller is that thread.
    pub fn caller(&self, pkey: PreemptLockKey<'_>) -> Option<(ThreadRef, Context)> {
        let current = self.current?;
        let context = current.raw().context.borrow(pkey).clone()?;
        if hal::current_thread_context().as_ref() == Some(&context) {
            Some((current, context))
        } else {
            None
        }
    }

    pub fn register(&mut self, thread: ThreadRef, context: Context) {
        if !self.threads.contains(&thread) {
            self.threads.push(thread);
        }
        self.contexts.retain(|context| !context.is_finished());
        self.contexts.push(context);
    }

    pub fn make_ready(&mut self, pkey: PreemptLockKey<'_>, thread: ThreadRef) {
        let raw = thread.raw();
        raw.state.set(pkey, ThreadExecutionState::Ready);
        self.ready[raw.priority.get(pkey) as usize].push_back(thread);
        tracing::thread_ready(thread);
    }

    fn make_ready_front(&mut self, pkey: PreemptLockKey<'_>, thread: ThreadRef) {
        let raw = thread.raw();
        raw.state.set(pkey, ThreadExecutionState::Ready);
        self.ready[raw.priority.get(pkey) as usize].push_front(thread);
        tracing::thread_ready(thread);
    }

    fn remove_ready(&mut self, pkey: PreemptLockKey<'_>, thread: ThreadRef) {
        let queue = &mut self.ready[thread.raw().priority.get(pkey) as usize];
        if let Some(index) = queue.iter().position(|t| *t == thread) {
            queue.remove(index);
        }
    }

    fn pop_ready(&mut self) -> Option<ThreadRef> {
        self.ready.iter_mut().find_map(VecDeque::pop_front)
    }

    pub fn highest_ready_priority(&self) -> Option<ThreadPriority> {
        self.ready
            .iter()
            .position(|queue| !queue.is_empty())
            .map(|priority| priority as ThreadPriority)
    }

    pub fn add_sleeper(&mut self, thread: ThreadRef, deadline: Instant) {
        let index = self.sleepers.partition_point(|(at, _)| *at <= deadline);
        self.sleepers.insert(index, (deadline, thread));
        if index == 0 {
            self.arm_alarm();
        }
    }

    pub fn remove_sleeper(&mut self, thread: ThreadRef) {
        if let Some(index) = self.sleepers.iter().position(|(_, t)| *t == thread) {
            self.sleepers.remove(index);
            if index == 0 {
                self.arm_alarm();
            }
        }
    }

    fn arm_alarm(&self) {
        hal::set_wakeup(self.sleepers.first().map(|(at, _)| at.ticks()));
    }

    /// Makes a waiting thread ready. It must already be out of its wait queue.
    pub fn wake(&mut self, pkey: PreemptLockKey<'_>, thread: ThreadRef, reason: WakeReason) {
        let raw = thread.raw();
        raw.wake_reason.set(pkey, reason);
        raw.blocked_on.set(pkey, None);
        self.remove_sleeper(thread);
        self.make_ready(pkey, thread);
    }

    /// Takes the calling thread off the CPU until it is woken or `deadline`
    /// passes.
    pub fn block(
        &mut self,
        pkey: PreemptLockKey<'_>,
        thread: ThreadRef,
        context: Context,
        deadline: Option<Instant>,
    ) -> Switch {
        thread.raw().state.set(pkey, ThreadExecutionState::Blocked);
        if let Some(deadline) = deadline {
            self.add_sleeper(thread, deadline);
        }
        tracing::thread_blocked(thread);
        self.current = None;
        self.leave(pkey, context)
    }

    /// Moves the calling thread behind the other ready threads of its level.
    pub fn yield_current(
        &mut self,
        pkey: PreemptLockKey<'_>,
        thread: ThreadRef,
        context: Context,
    ) -> Switch {
        self.current = None;
        self.make_ready(pkey, thread);
        self.leave(pkey, context)
    }

    /// Switches away from `context`, whose thread is no longer current.
    pub fn leave(&mut self, pkey: PreemptLockKey<'_>, context: Context) -> Switch {
        Switch {
            from: context,
            to: self.pick_next(pkey),
        }
    }

    /// Preempts the caller if a more urgent thread is ready.
    pub fn preempt(&mut self, pkey: PreemptLockKey<'_>) -> Option<Switch> {
        self.reschedule_pending = false;
        let (current, context) = self.caller(pkey)?;
        let highest = self.highest_ready_priority()?;
        if !is_more_urgent(highest, current.raw().priority.get(pkey)) {
            return None;
        }
        self.current = None;
        self.make_ready_front(pkey, current);
        Some(self.leave(pkey, context))
    }

    /// Gives the CPU to the most urgent ready thread. Only valid while no
    /// thread is current.
    pub fn pick_next(&mut self, pkey: PreemptLockKey<'_>) -> Next {
        while let Some(next) = self.pop_ready() {
            let context = next.raw().context.borrow(pkey).clone();
            if let Some(context) = context {
                next.raw().state.set(pkey, ThreadExecutionState::Running);
                self.current = Some(next);
                tracing::thread_exec_begin(next);
                return Next::Thread(context);
            }
        }
        if self.sleepers.is_empty() {
            Next::Quiescent(self.quiescent_status(pkey))
        } else {
            tracing::system_idle();
            Next::Idle
        }
    }

    fn quiescent_status(&self, pkey: PreemptLockKey<'_>) -> ExitStatus {
        if self
            .threads
            .iter()
            .all(|thread| !thread.raw().state.get(pkey).is_alive())
        {
            ExitStatus::Completed
        } else {
            ExitStatus::Stalled
        }
    }

    /// Starts a ready thread on an idle CPU.
    pub fn dispatch_idle(&mut self, pkey: PreemptLockKey<'_>) -> Option<Next> {
        if self.current.is_some() {
            return None;
        }
        Some(self.pick_next(pkey))
    }

    /// Takes a live thread out of every queue it is in.
    fn detach(&mut self, pkey: PreemptLockKey<'_>, thread: ThreadRef) {
        let raw = thread.raw();
        match raw.state.get(pkey) {
            ThreadExecutionState::Ready => self.remove_ready(pkey, thread),
            ThreadExecutionState::Blocked | ThreadExecutionState::Delayed => {
                if let Some(queue) = raw.blocked_on.replace(pkey, None) {
                    // SAFETY: a wait queue outlives its waiters
                    unsafe { queue.as_ref() }.remove(pkey, thread);
                }
                self.remove_sleeper(thread);
            }
            _ => {}
        }
        if self.current == Some(thread) {
            self.current = None;
        }
    }

    /// Ends the life of a thread: marks it terminated, releases all of its
    /// joiners at once and frees its stack region.
    ///
    /// A thread terminated by another one is parked in the middle of a kernel
    /// call. Its context is resumed and abandons itself at once, so the host
    /// thread behind it finishes.
    pub fn terminate(&mut self, pkey: PreemptLockKey<'_>, thread: ThreadRef) {
        self.detach(pkey, thread);
        let raw = thread.raw();
        raw.state.set(pkey, ThreadExecutionState::Terminated);
        raw.joiners.release_all(pkey, self, WakeReason::Notified);
        if let Some(stack) = raw.stack.replace(pkey, None) {
            stack.unbind(pkey);
        }
        raw.entry.set(pkey, None);
        if let Some(context) = raw.context.replace(pkey, None) {
            if hal::current_thread_context().as_ref() != Some(&context) {
                context.resume();
                self.retired.push(context);
            }
        }
        tracing::thread_terminated(thread);
    }

    fn take_retired(&mut self, context: &Context) -> bool {
        match self.retired.iter().position(|retired| retired == context) {
            Some(index) => {
                self.retired.swap_remove(index);
                true
            }
            None => false,
        }
    }

    /// Readies every thread whose deadline has passed.
    fn expire(&mut self, pkey: PreemptLockKey<'_>, now: Instant) {
        let count = self.sleepers.partition_point(|(at, _)| *at <= now);
        let expired: Vec<_> = self.sleepers.drain(..count).collect();
        for (_, thread) in expired {
            let raw = thread.raw();
            match raw.state.get(pkey) {
                ThreadExecutionState::Delayed => self.make_ready(pkey, thread),
                ThreadExecutionState::Blocked => {
                    if let Some(queue) = raw.blocked_on.replace(pkey, None) {
                        // SAFETY: a wait queue outlives its waiters
                        unsafe { queue.as_ref() }.remove(pkey, thread);
                    }
                    raw.wake_reason.set(pkey, WakeReason::TimedOut);
                    self.make_ready(pkey, thread);
                }
                _ => {}
            }
        }
        self.arm_alarm();
    }

    /// Takes every thread of the run out of the wait queues it blocks on.
    pub fn release_waits(&mut self, pkey: PreemptLockKey<'_>) {
        for thread in &self.threads {
            if let Some(queue) = thread.raw().blocked_on.replace(pkey, None) {
                // SAFETY: a wait queue outlives its waiters
                unsafe { queue.as_ref() }.remove(pkey, *thread);
            }
        }
    }

    pub fn take_contexts(&mut self) -> Vec<Context> {
        core::mem::take(&mut self.contexts)
    }

    /// Forgets the threads of a finished run. Their contexts must be gone.
    pub fn reset(&mut self, pkey: PreemptLockKey<'_>) {
        for thread in self.threads.drain(..) {
            thread.raw().reset(pkey);
        }
        self.ready.iter_mut().for_each(VecDeque::clear);
        self.sleepers.clear();
        self.current = None;
        self.reschedule_pending = false;
        self.contexts.clear();
        self.retired.clear();
        hal::set_wakeup(None);
    }
}

/// Performs a reschedule flagged by the wakeup handler. Every kernel call
/// made by a thread starts here.
pub(crate) fn preemption_point() {
    kernel::check_halted();
    let switch = PreemptLock::with(|pkey| {
        let mut scheduler = SCHEDULER.borrow_mut(pkey);
        if scheduler.reschedule_pending {
            scheduler.preempt(pkey)
        } else {
            None
        }
    });
    if let Some(switch) = switch {
        switch.perform();
    }
}

/// Abandons the calling thread if it was terminated while it was parked.
pub(crate) fn check_retired() {
    let Some(context) = hal::current_thread_context() else {
        return;
    };
    if PreemptLock::with(|pkey| SCHEDULER.borrow_mut(pkey).take_retired(&context)) {
        hal::exit_thread()
    }
}

pub(crate) fn wake_reason(thread: ThreadRef) -> WakeReason {
    PreemptLock::with(|pkey| thread.raw().wake_reason.get(pkey))
}

/// Called by the HAL when the wakeup alarm expires.
pub(crate) fn wakeup_handler() {
    exception::enter_wakeup();
    let next = PreemptLock::with(|pkey| {
        if kernel::is_halted() {
            return None;
        }
        let mut scheduler = SCHEDULER.borrow_mut(pkey);
        scheduler.expire(pkey, Instant::now());
        match scheduler.current {
            Some(current) => {
                let priority = current.raw().priority.get(pkey);
                if scheduler
                    .highest_ready_priority()
                    .is_some_and(|highest| is_more_urgent(highest, priority))
                {
                    scheduler.reschedule_pending = true;
                }
                None
            }
            None => Some(scheduler.pick_next(pkey)),
        }
    });
    exception::leave_wakeup();
    if let Some(next) = next {
        next.dispatch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::KernelConfig;
    use crate::kernel::stack::Stack;
    use crate::sync::Semaphore;
    use crate::thread::{EntryFn, RawThread, ThreadOptions, create};
    use crate::time::Timeout;
    use core::sync::atomic::{AtomicUsize, Ordering};

    static A: RawThread = RawThread::new("a");
    static B: RawThread = RawThread::new("b");
    static C: RawThread = RawThread::new("c");

    fn with_priorities(f: impl FnOnce(PreemptLockKey<'_>, &mut RawScheduler)) {
        PreemptLock::with(|pkey| {
            A.priority.set(pkey, 3);
            B.priority.set(pkey, 3);
            C.priority.set(pkey, 1);
            let mut scheduler = RawScheduler::new();
            f(pkey, &mut scheduler);
        });
    }

    #[test]
    fn ready_queue_orders_by_priority_then_fifo() {
        with_priorities(|pkey, scheduler| {
            scheduler.make_ready(pkey, A.thread_ref());
            scheduler.make_ready(pkey, B.thread_ref());
            scheduler.make_ready(pkey, C.thread_ref());
            assert_eq!(scheduler.highest_ready_priority(), Some(1));
            assert_eq!(scheduler.pop_ready(), Some(C.thread_ref()));
            assert_eq!(scheduler.pop_ready(), Some(A.thread_ref()));
            assert_eq!(scheduler.pop_ready(), Some(B.thread_ref()));
            assert_eq!(scheduler.pop_ready(), None);
        });
    }

    #[test]
    fn preempted_thread_returns_to_front() {
        with_priorities(|pkey, scheduler| {
            scheduler.make_ready(pkey, A.thread_ref());
            scheduler.make_ready_front(pkey, B.thread_ref());
            assert_eq!(scheduler.pop_ready(), Some(B.thread_ref()));
            scheduler.remove_ready(pkey, A.thread_ref());
            assert_eq!(scheduler.highest_ready_priority(), None);
        });
    }

    #[test]
    fn sleepers_sorted_by_deadline() {
        with_priorities(|_pkey, scheduler| {
            scheduler.add_sleeper(A.thread_ref(), Instant::from_ticks(1_000));
            scheduler.add_sleeper(B.thread_ref(), Instant::from_ticks(500));
            scheduler.add_sleeper(C.thread_ref(), Instant::from_ticks(1_000));
            let order: Vec<_> = scheduler.sleepers.iter().map(|(_, t)| *t).collect();
            assert_eq!(order, [B.thread_ref(), A.thread_ref(), C.thread_ref()]);

            scheduler.remove_sleeper(B.thread_ref());
            assert_eq!(scheduler.sleepers[0], (Instant::from_ticks(1_000), A.thread_ref()));
            scheduler.sleepers.clear();
            hal::set_wakeup(None);
        });
    }

    static CYCLED: RawThread = RawThread::new("cycled");
    static CYCLED_STACK: Stack<2048> = Stack::new();
    static GATE: Semaphore = Semaphore::new(0, 1);
    static MOST_CONTEXTS: AtomicUsize = AtomicUsize::new(0);

    fn returns_at_once(_: usize, _: usize, _: usize) {}

    fn waits_at_gate(_: usize, _: usize, _: usize) {
        let _ = GATE.take(Timeout::Forever);
    }

    // Every other occupant is aborted while it waits
    fn cycle_main() {
        for round in 0..200 {
            let entry: EntryFn = if round % 2 == 0 {
                returns_at_once
            } else {
                waits_at_gate
            };
            let Ok(id) = create(
                &CYCLED,
                &CYCLED_STACK,
                entry,
                [0; 3],
                5,
                ThreadOptions::NONE,
                Timeout::NoWait,
            ) else {
                kernel::exit(1)
            };
            id.abort();
            if id.join(Timeout::Forever).is_err() {
                kernel::exit(2)
            }
            let contexts = PreemptLock::with(|pkey| SCHEDULER.borrow(pkey).contexts.len());
            MOST_CONTEXTS.fetch_max(contexts, Ordering::SeqCst);
        }
        kernel::exit(0)
    }

    #[test]
    fn terminated_contexts_do_not_accumulate() {
        let status = KernelConfig::new().main_priority(10).run(cycle_main);
        assert_eq!(status, ExitStatus::Exit(0));
        let most = MOST_CONTEXTS.load(Ordering::SeqCst);
        assert!(most < 20, "{} contexts held after 200 occupants", most);
    }
}
