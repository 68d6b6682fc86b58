#![no_std]
#![warn(missing_docs)]

//! A crate for reporting unrecoverable errors in `#![no_std]` environments.
//!
//! Unrecoverable errors are conditions after which the program cannot safely
//! continue, such as a kernel detecting that its own data structures are about
//! to be corrupted. They are reported through a handler that is expected to
//! never return: it halts the system, or in a test harness records the fault and
//! transfers control elsewhere.
//!
//! # Overview
//!
//! The crate provides:
//! - A trait for unrecoverable errors
//! - A process-wide handler slot that is installed at initialization time
//! - A default behavior that panics when no handler is installed
//! - Location tracking for errors
//! - Custom error formatting through derive macros
//!
//! # Usage
//!
//! ```rust,should_panic
//! use unrecoverable_error::{UnrecoverableError, unrecoverable_error};
//!
//! #[derive(Debug, UnrecoverableError)]
//! #[unrecoverable_error("Invalid configuration: {field} = {value}")]
//! struct ConfigError<'a> {
//!     field: &'a str,
//!     value: &'a str,
//! }
//!
//! // No handler installed, so this panics with the formatted message.
//! unrecoverable_error!(ConfigError {
//!     field: "timeout",
//!     value: "1000",
//! });
//! ```
//!
//! ## Installing a handler
//!
//! ```rust
//! use unrecoverable_error::{UnrecoverableErrorInfo, set_error_handler};
//!
//! fn halt(info: &UnrecoverableErrorInfo<'_>) {
//!     // Log the error, then stop the machine.
//!     let _ = info.location;
//!     loop {}
//! }
//!
//! set_error_handler(halt);
//! ```

extern crate self as unrecoverable_error;

use core::cell::Cell;
use core::fmt::{self, Debug, Display};
use core::panic::Location;
use critical_section::Mutex;

pub use unrecoverable_error_macros::{UnrecoverableError, unrecoverable_error};

/// A trait for unrecoverable errors.
///
/// This is similar to `core::error::Error`, but does not require the error to be
/// `'static` in the source return value, which is not necessary when the stack is
/// not unwound after the error is raised.
pub trait UnrecoverableError: Debug + Display {
    /// Returns the error that caused this one, if any.
    fn source(&self) -> Option<&dyn UnrecoverableError> {
        None
    }
}

/// Information about an unrecoverable error, passed to the installed handler.
pub struct UnrecoverableErrorInfo<'a> {
    /// The unrecoverable error that occurred
    pub error: &'a dyn UnrecoverableError,
    /// Location where the error was raised
    pub location: Option<&'a Location<'a>>,
}

impl Display for UnrecoverableErrorInfo<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            Some(location) => write!(f, "Unrecoverable error at {}: {}", location, self.error)?,
            None => write!(f, "Unrecoverable error: {}", self.error)?,
        }
        let mut source = self.error.source();
        while let Some(error) = source {
            write!(f, "\n  caused by: {}", error)?;
            source = error.source();
        }
        Ok(())
    }
}

/// Handler for unrecoverable errors.
///
/// A handler must not return. Returning is treated as a second failure by the
/// callers of [`handle_unrecoverable_error`].
pub type ErrorHandler = fn(&UnrecoverableErrorInfo<'_>);

static ERROR_HANDLER: Mutex<Cell<Option<ErrorHandler>>> = Mutex::new(Cell::new(None));

/// Installs the process-wide handler and returns the previously installed one.
pub fn set_error_handler(handler: ErrorHandler) -> Option<ErrorHandler> {
    critical_section::with(|cs| ERROR_HANDLER.borrow(cs).replace(Some(handler)))
}

/// Removes the process-wide handler, restoring the default panicking behavior.
pub fn take_error_handler() -> Option<ErrorHandler> {
    critical_section::with(|cs| ERROR_HANDLER.borrow(cs).take())
}

/// Currently installed process-wide handler.
pub fn error_handler() -> Option<ErrorHandler> {
    critical_section::with(|cs| ERROR_HANDLER.borrow(cs).get())
}

/// Handles an unrecoverable error.
///
/// Calls the installed handler with the caller location. If no handler is
/// installed, or if the handler returns, this function panics.
///
/// ```rust,should_panic
/// use unrecoverable_error::{UnrecoverableError, handle_unrecoverable_error};
///
/// #[derive(Debug, UnrecoverableError)]
/// #[unrecoverable_error("My error occurred")]
/// struct MyError;
///
/// handle_unrecoverable_error(&MyError);
/// ```
#[track_caller]
pub fn handle_unrecoverable_error(error: &dyn UnrecoverableError) -> ! {
    let info = UnrecoverableErrorInfo {
        error,
        location: Some(Location::caller()),
    };
    match error_handler() {
        Some(handler) => {
            handler(&info);
            panic!("Unrecoverable error handler returned. {}", info);
        }
        None => panic!("{}", info),
    }
}
