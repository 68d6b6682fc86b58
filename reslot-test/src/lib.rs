//! Harness for tests that boot the kernel.
//!
//! A test boots the kernel with [`run_test`] and reports its verdict from a
//! kernel thread with [`test_succeed`] or [`test_fail`]. Tests that provoke a
//! fatal error announce it first with [`expect_fault`]: the harness handler
//! turns the expected fault into success and anything else into failure.
use core::cell::Cell;
use critical_section::Mutex;
use reslot::{ExitStatus, FatalError, FatalReason, KernelConfig, printkln};
use std::sync::PoisonError;

// Harness runs are serialized so that a waiting test cannot clear the
// expectation of the running one.
static HARNESS: std::sync::Mutex<()> = std::sync::Mutex::new(());

static EXPECTED_FAULT: Mutex<Cell<Option<FatalReason>>> = Mutex::new(Cell::new(None));

/// Runs `main` as the main thread with the harness fatal error handler
/// installed, and returns how the run ended.
pub fn run(config: KernelConfig, main: fn()) -> ExitStatus {
    let _serial = HARNESS.lock().unwrap_or_else(PoisonError::into_inner);
    critical_section::with(|cs| EXPECTED_FAULT.borrow(cs).set(None));
    config.fatal_error_handler(fatal_error_handler).run(main)
}

/// Runs `main` and asserts that it passed.
pub fn run_test(main: fn()) {
    run_test_with(KernelConfig::new(), main)
}

pub fn run_test_with(config: KernelConfig, main: fn()) {
    let status = run(config, main);
    assert_eq!(status, ExitStatus::Exit(0), "kernel test did not pass");
}

/// The next fatal error is expected to have `reason`, and ends the test
/// successfully.
pub fn expect_fault(reason: FatalReason) {
    critical_section::with(|cs| EXPECTED_FAULT.borrow(cs).set(Some(reason)));
}

pub fn test_succeed() -> ! {
    printkln!("[ok]");
    reslot::exit(0)
}

pub fn test_fail() -> ! {
    printkln!("[failed]");
    reslot::exit(1)
}

/// Fails the test unless `condition` holds.
#[track_caller]
pub fn check(condition: bool, what: &str) {
    if !condition {
        printkln!("Check failed at {}: {}", core::panic::Location::caller(), what);
        test_fail();
    }
}

fn fatal_error_handler(error: &FatalError<'_>) {
    printkln!(
        "Caught system error -- reason {} ({})",
        error.reason.code(),
        error.reason
    );
    let expected = critical_section::with(|cs| EXPECTED_FAULT.borrow(cs).get());
    if expected == Some(error.reason) {
        printkln!("Fatal error expected as part of test case.");
        test_succeed();
    } else {
        printkln!("Unexpected fault during test");
        test_fail();
    }
}

/// Declares a `#[test]` that boots the kernel with `$main` as the main thread.
#[macro_export]
macro_rules! kernel_test {
    ($name:ident, $main:path) => {
        #[test]
        fn $name() {
            $crate::run_test($main)
        }
    };
    ($name:ident, $config:expr, $main:path) => {
        #[test]
        fn $name() {
            $crate::run_test_with($config, $main)
        }
    };
}
