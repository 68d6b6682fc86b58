//! Fatal error reporting.
//!
//! Every unrecoverable kernel condition ends up in [`fatal_error`]. It prints a
//! report, hands a [`FatalError`] record to the installed handler, and halts
//! the kernel if the handler returns.
use crate::cell::LockedCell;
use crate::kernel::hal::{self, Fault};
use crate::kernel::priority::ThreadPriority;
use crate::kernel::scheduler::SCHEDULER;
use crate::kernel::{self, ExitStatus, tracing};
use crate::printkln;
use crate::sync::PreemptLock;
use crate::thread::{ThreadExecutionState, ThreadRef};
use core::fmt;
use core::panic::Location;
use core::sync::atomic::{AtomicBool, Ordering};
use unrecoverable_error::{UnrecoverableError, UnrecoverableErrorInfo};

/// Classification of a fatal error.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FatalReason {
    /// Stack canary of an exiting thread was overwritten.
    StackCheckFail = 2,
    /// A thread or the kernel hit an error that ends the current run.
    KernelOops = 3,
    /// Kernel invariant violated. Not recoverable.
    KernelPanic = 4,
}

impl FatalReason {
    /// Numeric reason code.
    pub const fn code(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for FatalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FatalReason::StackCheckFail => "Stack check failed",
            FatalReason::KernelOops => "Kernel oops",
            FatalReason::KernelPanic => "Kernel panic",
        };
        f.write_str(text)
    }
}

#[derive(Debug, UnrecoverableError)]
pub enum KernelError<'a> {
    /// Thread structure passed to `create` still hosts a live thread.
    #[unrecoverable_error("Attempt to reuse thread structure {name} while it is {state:?}")]
    ThreadReuse {
        name: &'static str,
        state: ThreadExecutionState,
    },

    #[unrecoverable_error("Stack overflow in thread {name}")]
    StackCheckFail { name: &'static str },

    #[unrecoverable_error("Essential thread {name} exited")]
    EssentialThreadExit { name: &'static str },

    #[unrecoverable_error("Thread {name} panicked: {message}")]
    ThreadPanic {
        name: &'static str,
        message: &'a str,
    },

    /// A thread-only kernel call was made from the boot or wakeup context.
    #[unrecoverable_error("{operation} called outside of a kernel thread")]
    InvalidContext { operation: &'static str },

    /// Error from the kernel HAL
    #[unrecoverable_error("Platform error: {0}")]
    Platform(&'a Fault),
}

impl KernelError<'_> {
    pub fn reason(&self) -> FatalReason {
        match self {
            KernelError::StackCheckFail { .. } => FatalReason::StackCheckFail,
            KernelError::ThreadReuse { .. } | KernelError::EssentialThreadExit { .. } => {
                FatalReason::KernelPanic
            }
            KernelError::ThreadPanic { .. }
            | KernelError::InvalidContext { .. }
            | KernelError::Platform(_) => FatalReason::KernelOops,
        }
    }
}

/// Where a fatal error was raised.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionContext {
    /// Kernel start-up, before the first thread runs.
    Boot,
    /// The wakeup alarm handler.
    Interrupt,
    Thread {
        thread: ThreadRef,
        name: &'static str,
        priority: ThreadPriority,
    },
}

static IN_WAKEUP: AtomicBool = AtomicBool::new(false);

pub(crate) fn enter_wakeup() {
    IN_WAKEUP.store(true, Ordering::SeqCst);
}

pub(crate) fn leave_wakeup() {
    IN_WAKEUP.store(false, Ordering::SeqCst);
}

impl ExecutionContext {
    pub fn current() -> ExecutionContext {
        if hal::current_thread_context().is_none() {
            if IN_WAKEUP.load(Ordering::SeqCst) {
                return ExecutionContext::Interrupt;
            }
            return ExecutionContext::Boot;
        }
        PreemptLock::with(|pkey| {
            let current = SCHEDULER
                .try_borrow(pkey)
                .ok()
                .and_then(|scheduler| scheduler.current_thread());
            match current {
                Some(thread) => ExecutionContext::Thread {
                    thread,
                    name: thread.name(),
                    priority: thread.raw().priority.get(pkey),
                },
                None => ExecutionContext::Boot,
            }
        })
    }
}

/// Record passed to the fatal error handler.
#[derive(Clone, Copy, Debug)]
pub struct FatalError<'a> {
    pub reason: FatalReason,
    pub error: &'a dyn UnrecoverableError,
    pub location: &'static Location<'static>,
    pub context: ExecutionContext,
}

impl fmt::Display for FatalError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (reason {}) at {}: {}",
            self.reason,
            self.reason.code(),
            self.location,
            self.error
        )?;
        if let ExecutionContext::Thread { name, priority, .. } = self.context {
            write!(f, " in thread {} with priority {}", name, priority)?;
        }
        Ok(())
    }
}

/// Fatal error handler installed with
/// [`KernelConfig::fatal_error_handler`](crate::KernelConfig::fatal_error_handler).
///
/// A handler normally ends the run with [`exit`](crate::exit). If it
/// returns, the kernel halts with [`ExitStatus::HandlerReturned`].
pub type FatalErrorHandler = fn(&FatalError<'_>);

pub(crate) static FATAL_ERROR_HANDLER: LockedCell<Option<FatalErrorHandler>, PreemptLock> =
    LockedCell::new(None);

/// Reports `error` and never returns to the caller.
///
/// Must not be called with the kernel lock held.
#[track_caller]
pub(crate) fn fatal_error(error: &KernelError<'_>) -> ! {
    let location = Location::caller();
    let reason = error.reason();
    tracing::fatal_error(reason);

    let report = FatalError {
        reason,
        error,
        location,
        context: ExecutionContext::current(),
    };
    printkln!("*** {} ***", report);

    let handler = PreemptLock::with(|pkey| FATAL_ERROR_HANDLER.get(pkey));
    let handled = match handler {
        Some(handler) => {
            handler(&report);
            true
        }
        None => match unrecoverable_error::error_handler() {
            Some(handler) => {
                handler(&UnrecoverableErrorInfo {
                    error,
                    location: Some(location),
                });
                true
            }
            None => false,
        },
    };
    if handled {
        printkln!("Fatal error handler returned, halting");
        kernel::halt(ExitStatus::HandlerReturned);
    } else {
        kernel::halt(ExitStatus::Aborted);
    }
    hal::exit_thread()
}

/// Reports a panic that escaped a thread entry function.
pub(crate) fn thread_panic_handler(message: &str) {
    let name = match ExecutionContext::current() {
        ExecutionContext::Thread { name, .. } => name,
        _ => "<unknown>",
    };
    fatal_error(&KernelError::ThreadPanic { name, message })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_follow_error_kind() {
        let reuse = KernelError::ThreadReuse {
            name: "worker",
            state: ThreadExecutionState::Blocked,
        };
        assert_eq!(reuse.reason(), FatalReason::KernelPanic);
        assert_eq!(
            KernelError::StackCheckFail { name: "worker" }.reason(),
            FatalReason::StackCheckFail
        );
        assert_eq!(
            KernelError::ThreadPanic {
                name: "worker",
                message: "boom"
            }
            .reason(),
            FatalReason::KernelOops
        );
        assert_eq!(
            KernelError::EssentialThreadExit { name: "main" }.reason(),
            FatalReason::KernelPanic
        );
    }

    #[test]
    fn reason_codes() {
        assert_eq!(FatalReason::StackCheckFail.code(), 2);
        assert_eq!(FatalReason::KernelOops.code(), 3);
        assert_eq!(FatalReason::KernelPanic.code(), 4);
    }

    #[test]
    fn kernel_error_display() {
        extern crate std;
        use std::string::ToString;

        let reuse = KernelError::ThreadReuse {
            name: "worker",
            state: ThreadExecutionState::Blocked,
        };
        assert_eq!(
            reuse.to_string(),
            "Attempt to reuse thread structure worker while it is Blocked"
        );
        let panic = KernelError::ThreadPanic {
            name: "worker",
            message: "boom",
        };
        assert_eq!(panic.to_string(), "Thread worker panicked: boom");
    }

    #[test]
    fn outside_threads_context_is_boot() {
        assert_eq!(ExecutionContext::current(), ExecutionContext::Boot);
    }
}
