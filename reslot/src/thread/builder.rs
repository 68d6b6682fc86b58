use super::{CreateError, EntryFn, RawThread, ThreadId, ThreadOptions, create};
use crate::kernel::priority::{LOWEST_PRIORITY, ThreadPriority};
use crate::kernel::stack::Stack;
use crate::time::Timeout;

/// Collects the parameters of [`create`] for one thread structure and stack.
///
/// Defaults: lowest priority, no options, zero arguments, starts immediately.
#[must_use]
pub struct ThreadBuilder<const SIZE: usize> {
    thread: &'static RawThread,
    stack: &'static Stack<SIZE>,
    arguments: [usize; 3],
    priority: ThreadPriority,
    options: ThreadOptions,
    delay: Timeout,
}

impl<const SIZE: usize> ThreadBuilder<SIZE> {
    pub fn new(thread: &'static RawThread, stack: &'static Stack<SIZE>) -> Self {
        Self {
            thread,
            stack,
            arguments: [0; 3],
            priority: LOWEST_PRIORITY,
            options: ThreadOptions::NONE,
            delay: Timeout::NoWait,
        }
    }

    pub fn priority(mut self, priority: ThreadPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn options(mut self, options: ThreadOptions) -> Self {
        self.options = options;
        self
    }

    pub fn arguments(mut self, arguments: [usize; 3]) -> Self {
        self.arguments = arguments;
        self
    }

    /// Start delay. `Forever` leaves the thread waiting for
    /// [`ThreadId::start`].
    pub fn delay(mut self, delay: Timeout) -> Self {
        self.delay = delay;
        self
    }

    #[track_caller]
    pub fn spawn(self, entry: EntryFn) -> Result<ThreadId, CreateError> {
        create(
            self.thread,
            self.stack,
            entry,
            self.arguments,
            self.priority,
            self.options,
            self.delay,
        )
    }
}
