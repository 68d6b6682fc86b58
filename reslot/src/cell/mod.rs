//! Interior mutability for kernel state.
//!
//! Kernel data lives in statics wrapped in cells that are only accessible with
//! the key token of the lock that protects them.
pub use core::cell::{Ref, RefMut};
pub mod locked_cell;
pub use locked_cell::{LockedCell, LockedRefCell};
