//! Thread lifecycle: creation into caller-owned structures, joining, aborting
//! and termination.
mod builder;
mod raw_thread;
mod reference;

pub use builder::ThreadBuilder;
pub use raw_thread::RawThread;
pub use reference::{ThreadId, ThreadRef};

use crate::config::{MIN_STACK_SIZE, NUM_PRIORITIES};
use crate::kernel::exception::{KernelError, fatal_error};
use crate::kernel::hal::{self, Fault};
use crate::kernel::priority::{ThreadPriority, is_valid_priority};
use crate::kernel::scheduler::{self, SCHEDULER, Switch};
use crate::kernel::stack::{Stack, StackRegion};
use crate::kernel::{self, tracing};
use crate::sync::PreemptLock;
use crate::time::{Instant, Timeout};
use core::fmt;
use core::ops::BitOr;

#[derive(PartialEq, Eq, Hash, Copy, Clone, Debug)]
pub enum ThreadExecutionState {
    /// Never used, or reset after a kernel run.
    Uninitialized,
    /// Created with a start delay that has not passed yet.
    Delayed,
    Ready,
    Running,
    /// Waiting in a wait queue or sleeping.
    Blocked,
    /// The occupant has exited or was aborted. The structure may be reused.
    Terminated,
}

impl ThreadExecutionState {
    /// A live thread occupies its structure and stack.
    pub const fn is_alive(self) -> bool {
        !matches!(
            self,
            ThreadExecutionState::Uninitialized | ThreadExecutionState::Terminated
        )
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct ThreadOptions(u32);

impl ThreadOptions {
    pub const NONE: ThreadOptions = ThreadOptions(0);
    /// Exit or abort of the thread is a kernel panic.
    pub const ESSENTIAL: ThreadOptions = ThreadOptions(1 << 0);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: ThreadOptions) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: ThreadOptions) -> ThreadOptions {
        ThreadOptions(self.0 | other.0)
    }
}

impl BitOr for ThreadOptions {
    type Output = ThreadOptions;
    fn bitor(self, rhs: ThreadOptions) -> ThreadOptions {
        self.union(rhs)
    }
}

/// Thread entry point. Called with the three arguments given at creation.
pub type EntryFn = fn(usize, usize, usize);

#[derive(Clone, Copy)]
pub(crate) struct ThreadEntry {
    function: EntryFn,
    arguments: [usize; 3],
}

impl ThreadEntry {
    pub(crate) const fn new(function: EntryFn, arguments: [usize; 3]) -> ThreadEntry {
        ThreadEntry {
            function,
            arguments,
        }
    }
}

/// Why a blocked thread became ready again.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WakeReason {
    Notified,
    TimedOut,
    Reset,
}

/// Invalid arguments to [`create`]. The thread structure is left untouched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateError {
    StackTooSmall { size: usize, min: usize },
    InvalidPriority { priority: ThreadPriority, levels: usize },
    /// The stack region is bound to another live thread.
    StackInUse,
}

impl fmt::Display for CreateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CreateError::StackTooSmall { size, min } => {
                write!(f, "stack of {} bytes is below the minimum of {}", size, min)
            }
            CreateError::InvalidPriority { priority, levels } => {
                write!(f, "priority {} is outside of 0..{}", priority, levels)
            }
            CreateError::StackInUse => f.write_str("stack is in use by another thread"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinError {
    /// The thread did not terminate in time.
    Timeout,
    /// The thread is live and `Timeout::NoWait` was given.
    Busy,
    /// A thread cannot join itself.
    Deadlock,
}

impl fmt::Display for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            JoinError::Timeout => "timed out waiting for thread to terminate",
            JoinError::Busy => "thread is still running",
            JoinError::Deadlock => "thread cannot join itself",
        };
        f.write_str(text)
    }
}

#[derive(Debug)]
pub(crate) enum SpawnFailure {
    Reuse(ThreadExecutionState),
    Invalid(CreateError),
    Platform(Fault),
}

/// Creates a thread into `thread`, running `entry(arguments)` on `stack`.
///
/// `thread` may be uninitialized or hold a terminated thread. If it still
/// hosts a live thread the call does not return: the kernel reports
/// [`KernelError::ThreadReuse`] as a fatal error before anything about the
/// live thread is touched.
///
/// `delay` postpones the start: `NoWait` makes the thread ready at once,
/// `After` starts it once the time has passed and `Forever` waits for
/// [`ThreadId::start`]. A new thread that is more urgent than the caller
/// preempts it before this returns.
#[track_caller]
pub fn create<const SIZE: usize>(
    thread: &'static RawThread,
    stack: &'static Stack<SIZE>,
    entry: EntryFn,
    arguments: [usize; 3],
    priority: ThreadPriority,
    options: ThreadOptions,
    delay: Timeout,
) -> Result<ThreadId, CreateError> {
    scheduler::preemption_point();
    let entry = ThreadEntry::new(entry, arguments);
    match spawn(thread, stack.region(), entry, priority, options, delay) {
        Ok((id, switch)) => {
            if let Some(switch) = switch {
                switch.perform();
            }
            Ok(id)
        }
        Err(SpawnFailure::Invalid(error)) => Err(error),
        Err(SpawnFailure::Reuse(state)) => fatal_error(&KernelError::ThreadReuse {
            name: thread.name(),
            state,
        }),
        Err(SpawnFailure::Platform(fault)) => fatal_error(&KernelError::Platform(&fault)),
    }
}

pub(crate) fn spawn(
    thread: &'static RawThread,
    stack: StackRegion,
    entry: ThreadEntry,
    priority: ThreadPriority,
    options: ThreadOptions,
    delay: Timeout,
) -> Result<(ThreadId, Option<Switch>), SpawnFailure> {
    PreemptLock::with(|pkey| {
        let state = thread.state.get(pkey);
        if state.is_alive() {
            return Err(SpawnFailure::Reuse(state));
        }
        if !is_valid_priority(priority) {
            return Err(SpawnFailure::Invalid(CreateError::InvalidPriority {
                priority,
                levels: NUM_PRIORITIES,
            }));
        }
        if stack.size() < MIN_STACK_SIZE {
            return Err(SpawnFailure::Invalid(CreateError::StackTooSmall {
                size: stack.size(),
                min: MIN_STACK_SIZE,
            }));
        }
        if stack.is_bound(pkey) {
            return Err(SpawnFailure::Invalid(CreateError::StackInUse));
        }

        let context = hal::spawn(
            thread.name(),
            stack.size(),
            thread_trampoline,
            thread as *const RawThread as usize,
        )
        .map_err(SpawnFailure::Platform)?;

        let this = thread.thread_ref();
        let mut scheduler = SCHEDULER.borrow_mut(pkey);
        thread.joiners.clear(pkey);
        thread.entry.set(pkey, Some(entry));
        thread.priority.set(pkey, priority);
        thread.options.set(pkey, options);
        stack.bind(pkey);
        thread.stack.set(pkey, Some(stack));
        thread.wake_reason.set(pkey, WakeReason::Notified);
        thread.blocked_on.set(pkey, None);
        let generation = thread.generation.update(pkey, |g| g.wrapping_add(1));
        thread.context.replace(pkey, Some(context.clone()));
        scheduler.register(this, context);
        tracing::thread_new(this, generation);

        match delay {
            Timeout::NoWait => scheduler.make_ready(pkey, this),
            Timeout::After(duration) => {
                thread.state.set(pkey, ThreadExecutionState::Delayed);
                scheduler.add_sleeper(this, Instant::now() + duration);
            }
            Timeout::Forever => thread.state.set(pkey, ThreadExecutionState::Delayed),
        }

        let switch = scheduler.preempt(pkey);
        Ok((ThreadId::new(this, generation), switch))
    })
}

fn thread_trampoline(argument: usize) {
    // SAFETY: `spawn` passes the address of a static thread structure
    let thread = unsafe { ThreadRef::from_ptr(argument as *const RawThread) };
    kernel::check_halted();
    scheduler::check_retired();
    let entry = PreemptLock::with(|pkey| thread.raw().entry.get(pkey));
    if let Some(ThreadEntry {
        function,
        arguments: [a0, a1, a2],
    }) = entry
    {
        function(a0, a1, a2);
    }
    exit_current(thread);
}

// Entry function returned. The host context ends when this returns.
fn exit_current(thread: ThreadRef) {
    enum Exit {
        Terminated(scheduler::Next),
        StackCheckFail,
        Essential,
    }

    let exit = PreemptLock::with(|pkey| {
        let raw = thread.raw();
        if raw.stack.get(pkey).is_some_and(|stack| !stack.is_intact(pkey)) {
            return Exit::StackCheckFail;
        }
        if raw.options.get(pkey).contains(ThreadOptions::ESSENTIAL) {
            return Exit::Essential;
        }
        let mut scheduler = SCHEDULER.borrow_mut(pkey);
        scheduler.terminate(pkey, thread);
        Exit::Terminated(scheduler.pick_next(pkey))
    });

    match exit {
        Exit::Terminated(next) => next.dispatch(),
        Exit::StackCheckFail => fatal_error(&KernelError::StackCheckFail {
            name: thread.name(),
        }),
        Exit::Essential => fatal_error(&KernelError::EssentialThreadExit {
            name: thread.name(),
        }),
    }
}

impl ThreadId {
    /// Waits until the thread terminates.
    ///
    /// Returns at once if it already has, including when the structure has
    /// been reused since. All joiners of a thread are released together when
    /// it terminates.
    pub fn join(&self, timeout: Timeout) -> Result<(), JoinError> {
        scheduler::preemption_point();

        enum Join {
            Done(Result<(), JoinError>),
            Wait(ThreadRef, Switch),
            NotThread,
        }

        let step = PreemptLock::with(|pkey| {
            let target = self.thread.raw();
            if !self.is_occupant(pkey) || !target.state.get(pkey).is_alive() {
                return Join::Done(Ok(()));
            }
            let mut scheduler = SCHEDULER.borrow_mut(pkey);
            let Some((current, context)) = scheduler.caller(pkey) else {
                return Join::NotThread;
            };
            if current == self.thread {
                return Join::Done(Err(JoinError::Deadlock));
            }
            if timeout == Timeout::NoWait {
                return Join::Done(Err(JoinError::Busy));
            }
            let switch =
                target
                    .joiners
                    .block(pkey, &mut scheduler, current, context, timeout.deadline());
            Join::Wait(current, switch)
        });

        match step {
            Join::Done(result) => result,
            Join::NotThread => fatal_error(&KernelError::InvalidContext { operation: "join" }),
            Join::Wait(current, switch) => {
                switch.perform();
                match scheduler::wake_reason(current) {
                    WakeReason::TimedOut => Err(JoinError::Timeout),
                    _ => Ok(()),
                }
            }
        }
    }

    /// Terminates the thread wherever it is. Its joiners are released and the
    /// structure may be reused right away. Aborting a thread that has already
    /// terminated does nothing. A thread that aborts itself does not return.
    pub fn abort(&self) {
        scheduler::preemption_point();

        enum Abort {
            Nothing,
            Essential,
            Switch(Switch),
            Exit(scheduler::Next),
        }

        let action = PreemptLock::with(|pkey| {
            let raw = self.thread.raw();
            if !self.is_occupant(pkey) || !raw.state.get(pkey).is_alive() {
                return Abort::Nothing;
            }
            if raw.options.get(pkey).contains(ThreadOptions::ESSENTIAL) {
                return Abort::Essential;
            }
            let mut scheduler = SCHEDULER.borrow_mut(pkey);
            match scheduler.caller(pkey) {
                Some((current, _)) if current == self.thread => {
                    scheduler.terminate(pkey, current);
                    Abort::Exit(scheduler.pick_next(pkey))
                }
                _ => {
                    scheduler.terminate(pkey, self.thread);
                    scheduler.preempt(pkey).map_or(Abort::Nothing, Abort::Switch)
                }
            }
        });

        match action {
            Abort::Nothing => {}
            Abort::Essential => fatal_error(&KernelError::EssentialThreadExit {
                name: self.thread.name(),
            }),
            Abort::Switch(switch) => switch.perform(),
            Abort::Exit(next) => {
                next.dispatch();
                hal::exit_thread()
            }
        }
    }

    /// Starts a thread created with a start delay ahead of time.
    pub fn start(&self) {
        scheduler::preemption_point();
        let switch = PreemptLock::with(|pkey| {
            let raw = self.thread.raw();
            if !self.is_occupant(pkey) || raw.state.get(pkey) != ThreadExecutionState::Delayed {
                return None;
            }
            let mut scheduler = SCHEDULER.borrow_mut(pkey);
            scheduler.remove_sleeper(self.thread);
            scheduler.make_ready(pkey, self.thread);
            scheduler.preempt(pkey)
        });
        if let Some(switch) = switch {
            switch.perform();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_states() {
        use ThreadExecutionState::*;
        for state in [Delayed, Ready, Running, Blocked] {
            assert!(state.is_alive(), "{:?}", state);
        }
        assert!(!Uninitialized.is_alive());
        assert!(!Terminated.is_alive());
    }

    #[test]
    fn options_combine() {
        let options = ThreadOptions::NONE | ThreadOptions::ESSENTIAL;
        assert!(options.contains(ThreadOptions::ESSENTIAL));
        assert!(!ThreadOptions::NONE.contains(ThreadOptions::ESSENTIAL));
        assert!(ThreadOptions::ESSENTIAL.contains(ThreadOptions::NONE));
        assert_eq!(options.bits(), 1);
    }

    #[test]
    fn new_structure_is_uninitialized() {
        static SLOT: RawThread = RawThread::new("slot");
        assert_eq!(SLOT.state(), ThreadExecutionState::Uninitialized);
        assert_eq!(SLOT.thread_ref().joiners(), 0);
        assert!(!SLOT.thread_ref().occupant().is_alive());
    }
}
