pub mod exception;
pub(crate) mod hal;
pub mod priority;
pub(crate) mod scheduler;
pub mod stack;
pub(crate) mod tracing;
pub(crate) mod wait_queue;

use crate::cell::LockedCell;
use crate::config::{MAIN_PRIORITY, MAIN_STACK_SIZE};
use crate::printkln;
use crate::sync::PreemptLock;
use crate::thread::{self, RawThread, ThreadEntry, ThreadOptions};
use crate::time::Timeout;
use core::sync::atomic::{AtomicBool, Ordering};
use exception::{FATAL_ERROR_HANDLER, FatalErrorHandler};
use priority::ThreadPriority;
use reslot_khal::{ContextInfo, HardwareAbstractionLayer, KernelCallbacks};
use scheduler::SCHEDULER;
use stack::Stack;

/// How a kernel run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExitStatus {
    /// A thread called [`exit`].
    Exit(i32),
    /// A fatal error halted the kernel and no handler was installed.
    Aborted,
    /// A fatal error handler returned instead of ending the run.
    HandlerReturned,
    /// Every thread terminated.
    Completed,
    /// Nothing could run any more, but some threads never terminated.
    Stalled,
}

static HALTED: AtomicBool = AtomicBool::new(false);
static EXIT_STATUS: LockedCell<Option<ExitStatus>, PreemptLock> = LockedCell::new(None);

static MAIN_THREAD: RawThread = RawThread::new("main");
static MAIN_STACK: Stack<MAIN_STACK_SIZE> = Stack::new();

pub(crate) fn is_halted() -> bool {
    HALTED.load(Ordering::SeqCst)
}

/// Stops the kernel. The first status recorded is the result of the run.
pub(crate) fn halt(status: ExitStatus) {
    let first = PreemptLock::with(|pkey| {
        if EXIT_STATUS.get(pkey).is_none() {
            EXIT_STATUS.set(pkey, Some(status));
            true
        } else {
            false
        }
    });
    HALTED.store(true, Ordering::SeqCst);
    if first {
        tracing::kernel_halt(status);
    }
    hal::signal_halt();
}

/// Abandons the calling thread once the kernel has halted.
pub(crate) fn check_halted() {
    if is_halted() && hal::current_thread_context().is_some() {
        hal::exit_thread()
    }
}

/// Ends the kernel run with `Exit(code)`.
pub fn exit(code: i32) -> ! {
    halt(ExitStatus::Exit(code));
    hal::exit_thread()
}

fn main_entry(main: usize, _: usize, _: usize) {
    // SAFETY: `KernelConfig::run` passes a `fn()` as the first argument
    let main = unsafe { core::mem::transmute::<usize, fn()>(main) };
    main()
}

/// Kernel start-up options.
#[derive(Clone, Copy)]
pub struct KernelConfig {
    fatal_error_handler: Option<FatalErrorHandler>,
    main_priority: ThreadPriority,
}

impl KernelConfig {
    pub const fn new() -> KernelConfig {
        KernelConfig {
            fatal_error_handler: None,
            main_priority: MAIN_PRIORITY,
        }
    }

    /// Replaces the default fatal error handling for this run.
    pub const fn fatal_error_handler(mut self, handler: FatalErrorHandler) -> KernelConfig {
        self.fatal_error_handler = Some(handler);
        self
    }

    pub const fn main_priority(mut self, priority: ThreadPriority) -> KernelConfig {
        self.main_priority = priority;
        self
    }

    /// Boots the kernel with `main` as the main thread and blocks until the
    /// kernel halts.
    ///
    /// Runs in the same process take turns. When the run ends every thread
    /// structure used during it is uninitialized again.
    pub fn run(self, main: fn()) -> ExitStatus {
        let platform = hal::init(KernelCallbacks {
            wakeup_handler: scheduler::wakeup_handler,
            thread_panic_handler: exception::thread_panic_handler,
        });
        PreemptLock::with(|pkey| {
            FATAL_ERROR_HANDLER.set(pkey, self.fatal_error_handler);
            EXIT_STATUS.set(pkey, None);
        });
        HALTED.store(false, Ordering::SeqCst);

        let entry = ThreadEntry::new(main_entry, [main as usize, 0, 0]);
        let started = thread::spawn(
            &MAIN_THREAD,
            MAIN_STACK.region(),
            entry,
            self.main_priority,
            ThreadOptions::NONE,
            Timeout::NoWait,
        );
        match started {
            Ok(_) => {
                let next = PreemptLock::with(|pkey| SCHEDULER.borrow_mut(pkey).dispatch_idle(pkey));
                if let Some(next) = next {
                    next.dispatch();
                }
                platform.wait_halt();
            }
            Err(failure) => {
                printkln!("Failed to start the main thread: {:?}", failure);
                halt(ExitStatus::Aborted);
            }
        }

        teardown();
        let status = PreemptLock::with(|pkey| EXIT_STATUS.get(pkey)).unwrap_or(ExitStatus::Aborted);
        platform.shutdown();
        status
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::new()
    }
}

// Unwinds every thread of the halted run and returns all structures to
// the uninitialized state.
fn teardown() {
    let contexts = PreemptLock::with(|pkey| {
        let mut scheduler = SCHEDULER.borrow_mut(pkey);
        scheduler.release_waits(pkey);
        scheduler.take_contexts()
    });
    for context in &contexts {
        context.resume();
        context.join();
    }
    PreemptLock::with(|pkey| {
        SCHEDULER.borrow_mut(pkey).reset(pkey);
        FATAL_ERROR_HANDLER.set(pkey, None);
    });
}
