/// Entry points into the kernel, called by the backend.
#[derive(Clone, Copy)]
pub struct KernelCallbacks {
    /// Called from the alarm clock context when the wakeup alarm expires.
    pub wakeup_handler: fn(),

    /// Called on the faulting context when a thread panics. `message` is the
    /// panic payload when it is a string. The handler must not return.
    pub thread_panic_handler: fn(message: &str),
}

impl core::fmt::Debug for KernelCallbacks {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KernelCallbacks").finish_non_exhaustive()
    }
}
