//! Build-time kernel configuration.
//!
//! Each constant can be overridden with an environment variable of the same
//! name when the crate is compiled, e.g. `RESLOT_NUM_PRIORITIES=32 cargo build`.
use const_env::from_env;

#[from_env]
const RESLOT_NUM_PRIORITIES: usize = 16;

#[from_env]
const RESLOT_MIN_STACK_SIZE: usize = 256;

#[from_env]
const RESLOT_MAIN_STACK_SIZE: usize = 4096;

#[from_env]
const RESLOT_MAIN_PRIORITY: u8 = 0;

/// Number of thread priority levels. Valid priorities are `0..NUM_PRIORITIES`,
/// and a lower value is a higher priority.
pub const NUM_PRIORITIES: usize = RESLOT_NUM_PRIORITIES;

/// Smallest stack region accepted by thread creation, in bytes.
pub const MIN_STACK_SIZE: usize = RESLOT_MIN_STACK_SIZE;

/// Stack region size of the main thread.
pub const MAIN_STACK_SIZE: usize = RESLOT_MAIN_STACK_SIZE;

/// Default priority of the main thread.
pub const MAIN_PRIORITY: u8 = RESLOT_MAIN_PRIORITY;

const _: () = assert!(NUM_PRIORITIES > 0 && NUM_PRIORITIES <= 256);
const _: () = assert!((MAIN_PRIORITY as usize) < NUM_PRIORITIES);
const _: () = assert!(MAIN_STACK_SIZE >= MIN_STACK_SIZE);
