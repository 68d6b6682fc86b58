use reslot::{
    Instant, KernelConfig, RawThread, Semaphore, Stack, TakeError, ThreadOptions, Timeout, create,
};
use reslot_test::{check, run_test, run_test_with, test_fail, test_succeed};
use std::sync::Mutex;

const STACK_SIZE: usize = 2048;

static WAITERS: [RawThread; 3] = [
    RawThread::new("waiter_0"),
    RawThread::new("waiter_1"),
    RawThread::new("waiter_2"),
];
static WAITER_STACKS: [Stack<STACK_SIZE>; 3] = [Stack::new(), Stack::new(), Stack::new()];

static RESULTS: Mutex<Vec<(usize, Result<(), TakeError>)>> = Mutex::new(Vec::new());

fn spawn_waiter(index: usize, entry: reslot::EntryFn, priority: u8) {
    let created = create(
        &WAITERS[index],
        &WAITER_STACKS[index],
        entry,
        [index, 0, 0],
        priority,
        ThreadOptions::NONE,
        Timeout::NoWait,
    );
    if created.is_err() {
        test_fail();
    }
}

fn take_results() -> Vec<(usize, Result<(), TakeError>)> {
    core::mem::take(&mut *RESULTS.lock().unwrap())
}

fn take_timeout_main() {
    static SEM: Semaphore = Semaphore::new(0, 1);

    check(
        SEM.take(Timeout::NoWait) == Err(TakeError::WouldBlock),
        "empty semaphore would block",
    );
    let start = Instant::now();
    check(
        SEM.take(Timeout::from_millis(10)) == Err(TakeError::Timeout),
        "take times out",
    );
    check(
        start.elapsed() >= reslot::Duration::from_millis(10),
        "waited for the whole timeout",
    );
    check(SEM.waiters() == 0, "timed out waiter removed");

    SEM.give();
    check(SEM.count() == 1, "count given");
    check(SEM.take(Timeout::from_millis(10)).is_ok(), "available count taken");
    test_succeed();
}

#[test]
fn take_with_timeout() {
    run_test(take_timeout_main);
}

static ORDERED: Semaphore = Semaphore::new(0, 3);

fn take_ordered(index: usize, _: usize, _: usize) {
    let result = ORDERED.take(Timeout::Forever);
    RESULTS.lock().unwrap().push((index, result));
}

fn wake_order_main() {
    take_results();
    // Waiter 0 and 2 share a priority, waiter 1 is more urgent
    spawn_waiter(0, take_ordered, 6);
    spawn_waiter(1, take_ordered, 4);
    spawn_waiter(2, take_ordered, 6);
    check(ORDERED.waiters() == 3, "all waiters block");

    for _ in 0..3 {
        ORDERED.give();
    }
    let order: Vec<usize> = take_results().into_iter().map(|(index, _)| index).collect();
    check(order == [1, 0, 2], "most urgent first, then arrival order");
    check(ORDERED.count() == 0, "count handed to waiters");
    test_succeed();
}

#[test]
fn waiters_wake_by_priority_then_arrival() {
    run_test_with(KernelConfig::new().main_priority(10), wake_order_main);
}

static RESET: Semaphore = Semaphore::new(0, 1);

fn take_reset(index: usize, _: usize, _: usize) {
    let result = RESET.take(Timeout::Forever);
    RESULTS.lock().unwrap().push((index, result));
}

fn reset_main() {
    take_results();
    spawn_waiter(0, take_reset, 5);
    spawn_waiter(1, take_reset, 5);
    check(RESET.waiters() == 2, "both waiters block");

    RESET.reset();
    let reset: [(usize, Result<(), TakeError>); 2] =
        [(0, Err(TakeError::Reset)), (1, Err(TakeError::Reset))];
    check(
        take_results() == reset,
        "every waiter sees the reset",
    );
    check(RESET.count() == 0, "count cleared");
    check(RESET.waiters() == 0, "no waiter left");
    test_succeed();
}

#[test]
fn reset_fails_pending_takes() {
    run_test_with(KernelConfig::new().main_priority(10), reset_main);
}

static HANDOFF: Semaphore = Semaphore::new(0, 1);

fn take_handoff(index: usize, _: usize, _: usize) {
    let result = HANDOFF.take(Timeout::Forever);
    RESULTS.lock().unwrap().push((index, result));
}

fn handoff_main() {
    take_results();
    // Less urgent than main, so it blocks only once main waits
    spawn_waiter(0, take_handoff, 12);
    check(
        HANDOFF.take(Timeout::from_millis(5)) == Err(TakeError::Timeout),
        "main times out",
    );
    check(HANDOFF.waiters() == 1, "waiter blocks");

    HANDOFF.give();
    check(take_results().is_empty(), "less urgent waiter does not preempt");
    check(HANDOFF.count() == 0, "count handed to the waiter");
    check(HANDOFF.take(Timeout::NoWait) == Err(TakeError::WouldBlock), "count is gone");
    check(
        WAITERS[0].thread_ref().join(Timeout::Forever).is_ok(),
        "waiter joined",
    );
    let handed: [(usize, Result<(), TakeError>); 1] = [(0, Ok(()))];
    check(take_results() == handed, "waiter got the count");
    test_succeed();
}

#[test]
fn give_hands_count_to_waiter() {
    run_test_with(KernelConfig::new().main_priority(10), handoff_main);
}
