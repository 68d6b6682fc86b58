#![no_std]
//! Kernel hardware abstraction layer.
//!
//! The kernel is written against these traits, and exactly one backend crate
//! implements them for a target. A backend provides thread execution contexts,
//! a monotonic clock with a single wakeup alarm, and the means to start and halt
//! a kernel run.
pub mod callbacks;
pub use aligned::*;
pub use callbacks::KernelCallbacks;
pub use unrecoverable_error::*;

pub type Ticks = u64;

pub trait AlarmClockController {
    /// Timer frequency as Ticks per second
    const TICK_FREQ_HZ: Ticks;

    /// Monotonously growing tick counter since some earlier epoch
    fn clock_ticks() -> Ticks;

    /// Arms the wakeup alarm, or disarms it with `None`. When the alarm expires
    /// the backend calls [`KernelCallbacks::wakeup_handler`].
    fn set_wakeup(at: Option<Ticks>);
}

/// Execution context of one kernel thread.
///
/// A context is created suspended. It runs only between a `resume` issued by
/// another context and its own next `suspend`. A `resume` that arrives before
/// the matching `suspend` is remembered, so a switch never loses a wakeup.
pub trait ContextInfo: Clone + PartialEq {
    fn name(&self) -> &'static str;

    /// Allows the context to continue from its current or next suspension.
    fn resume(&self);

    /// Parks the calling context until it is resumed. Must only be called by
    /// the context itself.
    fn suspend(&self);

    /// Waits until the context has finished executing. Must not be called by
    /// the context itself.
    fn join(&self);

    /// Whether the context has finished executing, so that dropping it
    /// releases everything it held.
    fn is_finished(&self) -> bool;
}

pub trait FlowController {
    type StackAlignment: Alignment;
    type Context: ContextInfo;
    type Fault: UnrecoverableError;

    /// Creates a suspended context that calls `main(argument)` when first resumed.
    ///
    /// `stack_size` is the size of the stack region bound to the thread.
    fn spawn(
        name: &'static str,
        stack_size: usize,
        main: fn(usize),
        argument: usize,
    ) -> Result<Self::Context, Self::Fault>;

    /// Context of the calling thread of execution, or `None` outside of
    /// kernel threads.
    fn current_thread_context() -> Option<Self::Context>;

    /// Abandons the calling context without returning to its caller.
    fn exit_thread() -> !;
}

/// Exclusive ownership of the execution platform for one kernel run.
pub trait HardwareAbstractionLayer: AlarmClockController + FlowController + Sized {
    const NAME: &'static str;

    /// Takes ownership of the platform, waiting until a previous run has
    /// released it, and installs the kernel callbacks.
    fn init(callbacks: KernelCallbacks) -> Self;

    /// Blocks the boot context until [`HardwareAbstractionLayer::signal_halt`].
    fn wait_halt(&self);

    /// Wakes the boot context that waits in [`HardwareAbstractionLayer::wait_halt`].
    fn signal_halt();

    /// Stops the alarm clock and releases the platform.
    fn shutdown(self);
}
