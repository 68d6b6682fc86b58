#![doc = include_str!("../../README.md")]
#![no_std]

extern crate alloc;

pub mod api;
pub mod cell;
pub mod config;
pub mod kernel;
pub mod sync;
pub mod thread;
pub mod time;

pub use api::*;
pub use kernel::exception::{
    ExecutionContext, FatalError, FatalErrorHandler, FatalReason, KernelError,
};
pub use kernel::hal::clock_ticks;
pub use kernel::priority::ThreadPriority;
pub use kernel::stack::Stack;
pub use kernel::{ExitStatus, KernelConfig, exit};
pub use sync::{Semaphore, TakeError};
pub use thread::{
    CreateError, EntryFn, JoinError, RawThread, ThreadBuilder, ThreadExecutionState, ThreadId,
    ThreadOptions, ThreadRef, create,
};

#[cfg(feature = "khal-sim")]
pub use reslot_khal_sim::{printk, printkln};
