//! One thread structure is reused by a creator thread. Two short lived
//! occupants are created and joined in turn, then an occupant that blocks on a
//! semaphore is created, and the structure is passed to `create` once more
//! while that occupant is still waiting. The kernel must stop with a kernel
//! panic instead of corrupting the blocked thread.
use reslot::config::NUM_PRIORITIES;
use reslot::{
    ExitStatus, FatalReason, KernelConfig, RawThread, Semaphore, Stack, ThreadExecutionState,
    ThreadOptions, Timeout, create,
};
use reslot_test::{check, expect_fault, run, test_fail};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

const STACK_SIZE: usize = 2048;

const REUSED_PRIORITY: u8 = (NUM_PRIORITIES - 2) as u8;
const CREATOR_PRIORITY: u8 = (NUM_PRIORITIES - 1) as u8;

static REUSED_THREAD: RawThread = RawThread::new("reused_thread");
static REUSED_STACK: Stack<STACK_SIZE> = Stack::new();
static CREATOR_THREAD: RawThread = RawThread::new("creator_thread");
static CREATOR_STACK: Stack<STACK_SIZE> = Stack::new();

static TEST_SEM: Semaphore = Semaphore::new(0, 1);

static RETURNED: AtomicUsize = AtomicUsize::new(0);
static WAITER_RESUMED: AtomicBool = AtomicBool::new(false);

fn reused_return(_: usize, _: usize, _: usize) {
    RETURNED.fetch_add(1, Ordering::SeqCst);
}

fn reused_wait_forever(_: usize, _: usize, _: usize) {
    let _ = TEST_SEM.take(Timeout::Forever);
    WAITER_RESUMED.store(true, Ordering::SeqCst);
    test_fail();
}

fn create_reused(entry: reslot::EntryFn) -> Option<reslot::ThreadId> {
    create(
        &REUSED_THREAD,
        &REUSED_STACK,
        entry,
        [0; 3],
        REUSED_PRIORITY,
        ThreadOptions::NONE,
        Timeout::NoWait,
    )
    .ok()
}

fn creator_thread(_: usize, _: usize, _: usize) {
    // Reuse after join
    let Some(first) = create_reused(reused_return) else {
        test_fail()
    };
    check(first.join(Timeout::Forever).is_ok(), "first occupant joined");

    let Some(second) = create_reused(reused_return) else {
        test_fail()
    };
    check(second != first, "second occupant has its own identity");
    check(
        REUSED_THREAD.thread_ref().joiners() == 0,
        "second occupant starts without joiners",
    );
    check(second.join(Timeout::Forever).is_ok(), "second occupant joined");
    check(RETURNED.load(Ordering::SeqCst) == 2, "both occupants ran");

    // Reuse before join
    let Some(waiting) = create_reused(reused_wait_forever) else {
        test_fail()
    };
    check(
        REUSED_THREAD.state() == ThreadExecutionState::Blocked,
        "occupant waits on the semaphore",
    );

    expect_fault(FatalReason::KernelPanic);
    let _ = create_reused(reused_wait_forever);

    // Creating over a live thread must not return
    TEST_SEM.give();
    TEST_SEM.give();
    let _ = waiting.join(Timeout::Forever);
    test_fail();
}

fn test_main() {
    let creator = create(
        &CREATOR_THREAD,
        &CREATOR_STACK,
        creator_thread,
        [0; 3],
        CREATOR_PRIORITY,
        ThreadOptions::NONE,
        Timeout::NoWait,
    );
    let Ok(creator) = creator else { test_fail() };
    let _ = creator.join(Timeout::Forever);
    test_fail();
}

#[test]
fn reuse_tid() {
    RETURNED.store(0, Ordering::SeqCst);
    let status = run(KernelConfig::new(), test_main);
    assert_eq!(status, ExitStatus::Exit(0));
    assert!(
        !WAITER_RESUMED.load(Ordering::SeqCst),
        "blocked occupant was resumed"
    );
}
