use reslot::{
    Duration, JoinError, KernelConfig, RawThread, Semaphore, Stack, TakeError,
    ThreadExecutionState, ThreadOptions, Timeout, create,
};
use reslot_test::{check, run_test, run_test_with, test_fail, test_succeed};
use std::sync::atomic::{AtomicUsize, Ordering};

const STACK_SIZE: usize = 2048;

static TARGET: RawThread = RawThread::new("target");
static TARGET_STACK: Stack<STACK_SIZE> = Stack::new();

static JOINERS: [RawThread; 3] = [
    RawThread::new("joiner_0"),
    RawThread::new("joiner_1"),
    RawThread::new("joiner_2"),
];
static JOINER_STACKS: [Stack<STACK_SIZE>; 3] = [Stack::new(), Stack::new(), Stack::new()];

fn spawn(
    thread: &'static RawThread,
    stack: &'static Stack<STACK_SIZE>,
    entry: reslot::EntryFn,
    priority: u8,
) -> reslot::ThreadId {
    match create(
        thread,
        stack,
        entry,
        [0; 3],
        priority,
        ThreadOptions::NONE,
        Timeout::NoWait,
    ) {
        Ok(id) => id,
        Err(_) => test_fail(),
    }
}

static RELEASE_TARGET: Semaphore = Semaphore::new(0, 1);
static RELEASED: AtomicUsize = AtomicUsize::new(0);

fn wait_for_release(_: usize, _: usize, _: usize) {
    let _ = RELEASE_TARGET.take(Timeout::Forever);
}

fn join_target(_: usize, _: usize, _: usize) {
    if TARGET.thread_ref().join(Timeout::Forever).is_ok() {
        RELEASED.fetch_add(1, Ordering::SeqCst);
    }
}

fn fan_out_main() {
    spawn(&TARGET, &TARGET_STACK, wait_for_release, 5);
    for (joiner, stack) in JOINERS.iter().zip(&JOINER_STACKS) {
        spawn(joiner, stack, join_target, 3);
    }
    check(TARGET.thread_ref().joiners() == 3, "three joiners wait");
    check(RELEASED.load(Ordering::SeqCst) == 0, "no joiner released yet");

    RELEASE_TARGET.give();
    check(
        TARGET.state() == ThreadExecutionState::Terminated,
        "target terminated",
    );
    check(RELEASED.load(Ordering::SeqCst) == 3, "every joiner released");
    check(TARGET.thread_ref().joiners() == 0, "no joiner left behind");
    for joiner in &JOINERS {
        check(
            joiner.state() == ThreadExecutionState::Terminated,
            "joiner ran to completion",
        );
    }
    test_succeed();
}

#[test]
fn termination_releases_all_joiners() {
    run_test_with(KernelConfig::new().main_priority(10), fan_out_main);
}

fn return_at_once(_: usize, _: usize, _: usize) {}

fn join_terminated_main() {
    let target = spawn(&TARGET, &TARGET_STACK, return_at_once, 5);
    check(
        TARGET.state() == ThreadExecutionState::Terminated,
        "target already terminated",
    );
    check(target.join(Timeout::NoWait).is_ok(), "join without waiting");
    check(target.join(Timeout::Forever).is_ok(), "join again");
    test_succeed();
}

#[test]
fn join_of_terminated_thread_returns_at_once() {
    run_test_with(KernelConfig::new().main_priority(10), join_terminated_main);
}

static NEVER_RELEASED: Semaphore = Semaphore::new(0, 1);

fn wait_forever(_: usize, _: usize, _: usize) {
    let _ = NEVER_RELEASED.take(Timeout::Forever);
}

fn join_timeout_main() {
    let target = spawn(&TARGET, &TARGET_STACK, wait_forever, 5);
    check(
        target.join(Timeout::NoWait) == Err(JoinError::Busy),
        "live thread is busy",
    );
    check(
        target.join(Timeout::from_millis(10)) == Err(JoinError::Timeout),
        "join times out",
    );
    check(TARGET.thread_ref().joiners() == 0, "timed out joiner removed");
    check(
        TARGET.state() == ThreadExecutionState::Blocked,
        "target still waits",
    );

    target.abort();
    check(NEVER_RELEASED.waiters() == 0, "aborted thread left the semaphore");
    check(target.join(Timeout::NoWait).is_ok(), "aborted thread joins at once");
    test_succeed();
}

#[test]
fn join_with_timeout() {
    run_test(join_timeout_main);
}

fn nap_then_exit(_: usize, _: usize, _: usize) {
    reslot::sleep(Duration::from_millis(2));
}

static UNSIGNALLED: Semaphore = Semaphore::new(0, 1);

// The target's wakeup and the joiner's timeout expire around the same tick
fn join_timeout_race_main() {
    for _ in 0..200 {
        let target = spawn(&TARGET, &TARGET_STACK, nap_then_exit, 5);
        let result = target.join(Timeout::from_millis(2));
        check(
            matches!(result, Ok(()) | Err(JoinError::Timeout)),
            "join ends by termination or by timeout",
        );
        check(TARGET.thread_ref().joiners() == 0, "joiner entry removed");

        // A late release must not wake the next wait of the joiner
        check(
            UNSIGNALLED.take(Timeout::from_millis(1)) == Err(TakeError::Timeout),
            "joiner released only once",
        );
        check(target.join(Timeout::Forever).is_ok(), "target terminated");
        check(TARGET.thread_ref().joiners() == 0, "no joiner left behind");
    }
    test_succeed();
}

#[test]
fn termination_racing_join_timeout() {
    run_test_with(KernelConfig::new().main_priority(10), join_timeout_race_main);
}

static SELF_JOIN: AtomicUsize = AtomicUsize::new(0);

fn join_self(_: usize, _: usize, _: usize) {
    let me = reslot::current().expect("called from a thread");
    if me.join(Timeout::Forever) == Err(JoinError::Deadlock) {
        SELF_JOIN.store(1, Ordering::SeqCst);
    }
}

fn self_join_main() {
    let target = spawn(&TARGET, &TARGET_STACK, join_self, 5);
    check(target.join(Timeout::Forever).is_ok(), "target joined");
    check(SELF_JOIN.load(Ordering::SeqCst) == 1, "self join is refused");
    test_succeed();
}

#[test]
fn thread_cannot_join_itself() {
    run_test(self_join_main);
}

static ABORT_GATE: Semaphore = Semaphore::new(0, 1);
static JOIN_RESULT: AtomicUsize = AtomicUsize::new(0);

fn wait_at_abort_gate(_: usize, _: usize, _: usize) {
    let _ = ABORT_GATE.take(Timeout::Forever);
    test_fail();
}

fn record_join(_: usize, _: usize, _: usize) {
    let result = TARGET.thread_ref().join(Timeout::Forever);
    JOIN_RESULT.store(if result.is_ok() { 1 } else { 2 }, Ordering::SeqCst);
}

fn abort_main() {
    let target = spawn(&TARGET, &TARGET_STACK, wait_at_abort_gate, 5);
    spawn(&JOINERS[0], &JOINER_STACKS[0], record_join, 3);
    check(TARGET.thread_ref().joiners() == 1, "joiner waits");

    target.abort();
    check(
        TARGET.state() == ThreadExecutionState::Terminated,
        "target terminated",
    );
    check(JOIN_RESULT.load(Ordering::SeqCst) == 1, "joiner released");
    check(ABORT_GATE.waiters() == 0, "aborted thread left the semaphore");

    // The structure and the stack are free again
    let next = spawn(&TARGET, &TARGET_STACK, return_at_once, 5);
    check(next != target, "new occupant");
    target.abort();
    check(next.join(Timeout::Forever).is_ok(), "new occupant joined");
    test_succeed();
}

#[test]
fn abort_releases_joiners() {
    run_test_with(KernelConfig::new().main_priority(10), abort_main);
}
