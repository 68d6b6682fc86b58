//! Kernel trace points. With the `tracing` feature each event is printed on
//! the kernel console, otherwise the calls compile to nothing.
use crate::kernel::ExitStatus;
use crate::kernel::exception::FatalReason;
use crate::thread::ThreadRef;

#[allow(unused)]
#[inline(always)]
pub(crate) fn thread_new(thread: ThreadRef, generation: u32) {
    #[cfg(feature = "tracing")]
    crate::printkln!("[trace] new {} gen {}", thread.name(), generation);
}

#[allow(unused)]
#[inline(always)]
pub(crate) fn thread_ready(thread: ThreadRef) {
    #[cfg(feature = "tracing")]
    crate::printkln!("[trace] ready {}", thread.name());
}

#[allow(unused)]
#[inline(always)]
pub(crate) fn thread_exec_begin(thread: ThreadRef) {
    #[cfg(feature = "tracing")]
    crate::printkln!("[trace] exec {}", thread.name());
}

#[allow(unused)]
#[inline(always)]
pub(crate) fn thread_blocked(thread: ThreadRef) {
    #[cfg(feature = "tracing")]
    crate::printkln!("[trace] blocked {}", thread.name());
}

#[allow(unused)]
#[inline(always)]
pub(crate) fn thread_terminated(thread: ThreadRef) {
    #[cfg(feature = "tracing")]
    crate::printkln!("[trace] terminated {}", thread.name());
}

#[allow(unused)]
#[inline(always)]
pub(crate) fn system_idle() {
    #[cfg(feature = "tracing")]
    crate::printkln!("[trace] idle");
}

#[allow(unused)]
#[inline(always)]
pub(crate) fn fatal_error(reason: FatalReason) {
    #[cfg(feature = "tracing")]
    crate::printkln!("[trace] fatal {:?}", reason);
}

#[allow(unused)]
#[inline(always)]
pub(crate) fn kernel_halt(status: ExitStatus) {
    #[cfg(feature = "tracing")]
    crate::printkln!("[trace] halt {:?}", status);
}
