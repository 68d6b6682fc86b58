//! Host simulator for the reslot kernel.
//!
//! Every kernel thread runs on a host thread of its own, but only one of them
//! holds the virtual CPU at a time: a context executes between a `resume` from
//! another context and its own next `suspend`. The wakeup alarm is a host thread
//! that calls into the kernel like a timer interrupt would.
//!
//! The simulated machine is a process-wide resource. [`Simulator::init`] waits
//! until the previous kernel run has shut down, so concurrently running tests
//! take turns.
use const_env::from_env;
use reslot_khal::*;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[macro_use]
pub mod printk;

/// Minimum size of the host stack of a simulated thread. The host stack is
/// the larger of this and the stack region bound to the thread.
#[from_env]
const RESLOT_SIM_HOST_STACK_SIZE: usize = 262144;

pub const TIMER_FREQ_HZ: u64 = 1_000_000;

#[derive(Debug, UnrecoverableError)]
pub enum SimulatorError {
    #[unrecoverable_error("Failed to start host thread for {0:?}")]
    Spawn(&'static str),
}

/// Unwinding payload used to abandon a simulated thread.
pub struct ThreadExit;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct ContextShared {
    name: &'static str,
    // Sticky resume flag, consumed by `suspend`
    resumed: Mutex<bool>,
    resumption: Condvar,
    host_thread: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct VirtualContext {
    shared: Arc<ContextShared>,
}

impl VirtualContext {
    fn new(name: &'static str) -> VirtualContext {
        VirtualContext {
            shared: Arc::new(ContextShared {
                name,
                resumed: Mutex::new(false),
                resumption: Condvar::new(),
                host_thread: Mutex::new(None),
            }),
        }
    }
}

impl PartialEq for VirtualContext {
    fn eq(&self, other: &VirtualContext) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl core::fmt::Debug for VirtualContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "VirtualContext({})", self.shared.name)
    }
}

impl ContextInfo for VirtualContext {
    fn name(&self) -> &'static str {
        self.shared.name
    }

    fn resume(&self) {
        let mut resumed = lock(&self.shared.resumed);
        *resumed = true;
        self.shared.resumption.notify_one();
    }

    fn suspend(&self) {
        let mut resumed = lock(&self.shared.resumed);
        while !*resumed {
            resumed = self
                .shared
                .resumption
                .wait(resumed)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *resumed = false;
    }

    fn join(&self) {
        let handle = lock(&self.shared.host_thread).take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }

    fn is_finished(&self) -> bool {
        lock(&self.shared.host_thread)
            .as_ref()
            .is_none_or(JoinHandle::is_finished)
    }
}

std::thread_local! {
    static CURRENT_CONTEXT: RefCell<Option<VirtualContext>> = const { RefCell::new(None) };
}

static CALLBACKS: Mutex<Option<KernelCallbacks>> = Mutex::new(None);

fn callbacks() -> Option<KernelCallbacks> {
    *lock(&CALLBACKS)
}

fn panic_message(payload: &(dyn core::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "Box<dyn Any>"
    }
}

// Host thread body of a simulated thread. The thread stays parked until the
// scheduler switches to it for the first time.
fn thread_main_wrapper(context: VirtualContext, main: fn(usize), argument: usize) {
    CURRENT_CONTEXT.with(|current| *current.borrow_mut() = Some(context.clone()));
    context.suspend();

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| main(argument))) {
            if payload.is::<ThreadExit>() {
                return;
            }
            if let Some(callbacks) = callbacks() {
                (callbacks.thread_panic_handler)(panic_message(&*payload));
            }
        }
    }));

    if let Err(payload) = outcome {
        if !payload.is::<ThreadExit>() {
            printkln!(
                "Simulator: thread {} unwound from the panic handler: {}",
                context.name(),
                panic_message(&*payload)
            );
        }
    }
}

impl FlowController for Simulator {
    type StackAlignment = A16;
    type Context = VirtualContext;
    type Fault = SimulatorError;

    fn spawn(
        name: &'static str,
        stack_size: usize,
        main: fn(usize),
        argument: usize,
    ) -> Result<VirtualContext, SimulatorError> {
        let context = VirtualContext::new(name);
        let thread_context = context.clone();
        let handle = thread::Builder::new()
            .name(name.into())
            .stack_size(stack_size.max(RESLOT_SIM_HOST_STACK_SIZE))
            .spawn(move || thread_main_wrapper(thread_context, main, argument))
            .map_err(|_| SimulatorError::Spawn(name))?;
        *lock(&context.shared.host_thread) = Some(handle);
        Ok(context)
    }

    fn current_thread_context() -> Option<VirtualContext> {
        CURRENT_CONTEXT.with(|current| current.borrow().clone())
    }

    fn exit_thread() -> ! {
        panic::resume_unwind(Box::new(ThreadExit))
    }
}

struct TimerState {
    wakeup_at: Option<Ticks>,
    running: bool,
}

pub struct VirtualTimer {
    state: Mutex<TimerState>,
    alarm: Condvar,
    thread: Mutex<Option<JoinHandle<()>>>,
}

static TIMER: VirtualTimer = VirtualTimer {
    state: Mutex::new(TimerState {
        wakeup_at: None,
        running: false,
    }),
    alarm: Condvar::new(),
    thread: Mutex::new(None),
};

impl VirtualTimer {
    fn start(wakeup_handler: fn()) {
        {
            let mut state = lock(&TIMER.state);
            state.running = true;
            state.wakeup_at = None;
        }
        let handle = thread::Builder::new()
            .name("reslot-timer".into())
            .spawn(move || VirtualTimer::run(wakeup_handler));
        match handle {
            Ok(handle) => *lock(&TIMER.thread) = Some(handle),
            Err(_) => printkln!("Simulator: failed to start the alarm clock"),
        }
    }

    fn stop() {
        {
            let mut state = lock(&TIMER.state);
            state.running = false;
            state.wakeup_at = None;
            TIMER.alarm.notify_all();
        }
        let handle = lock(&TIMER.thread).take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    fn run(wakeup_handler: fn()) {
        let mut state = lock(&TIMER.state);
        while state.running {
            match state.wakeup_at {
                None => {
                    state = TIMER
                        .alarm
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(at) => {
                    let now = Simulator::clock_ticks();
                    if now >= at {
                        state.wakeup_at = None;
                        drop(state);
                        // A fatal error raised in the handler abandons it with `exit_thread`.
                        let _ = panic::catch_unwind(wakeup_handler);
                        state = lock(&TIMER.state);
                    } else {
                        let timeout = VirtualTimer::ticks_to_duration(at - now);
                        state = TIMER
                            .alarm
                            .wait_timeout(state, timeout)
                            .unwrap_or_else(PoisonError::into_inner)
                            .0;
                    }
                }
            }
        }
    }

    fn ticks_to_duration(ticks: Ticks) -> Duration {
        Duration::from_micros(ticks.saturating_mul(1_000_000) / TIMER_FREQ_HZ)
    }
}

impl AlarmClockController for Simulator {
    const TICK_FREQ_HZ: Ticks = TIMER_FREQ_HZ;

    fn clock_ticks() -> Ticks {
        static EPOCH: OnceLock<Instant> = OnceLock::new();
        let elapsed = EPOCH.get_or_init(Instant::now).elapsed();
        (elapsed.as_nanos() * TIMER_FREQ_HZ as u128 / 1_000_000_000) as Ticks
    }

    fn set_wakeup(at: Option<Ticks>) {
        let mut state = lock(&TIMER.state);
        state.wakeup_at = at;
        TIMER.alarm.notify_all();
    }
}

static CLAIMED: Mutex<bool> = Mutex::new(false);
static RELEASED: Condvar = Condvar::new();

static HALTED: Mutex<bool> = Mutex::new(false);
static HALT_SIGNAL: Condvar = Condvar::new();

pub type HAL = Simulator;

/// Ownership of the simulated machine for one kernel run.
pub struct Simulator {
    _private: (),
}

impl HardwareAbstractionLayer for Simulator {
    const NAME: &'static str = "Simulator";

    fn init(callbacks: KernelCallbacks) -> Simulator {
        let mut claimed = lock(&CLAIMED);
        while *claimed {
            claimed = RELEASED
                .wait(claimed)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *claimed = true;
        drop(claimed);

        *lock(&CALLBACKS) = Some(callbacks);
        *lock(&HALTED) = false;
        VirtualTimer::start(callbacks.wakeup_handler);
        Simulator { _private: () }
    }

    fn wait_halt(&self) {
        let mut halted = lock(&HALTED);
        while !*halted {
            halted = HALT_SIGNAL
                .wait(halted)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn signal_halt() {
        *lock(&HALTED) = true;
        HALT_SIGNAL.notify_all();
    }

    fn shutdown(self) {
        drop(self);
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        VirtualTimer::stop();
        *lock(&CALLBACKS) = None;
        *lock(&CLAIMED) = false;
        RELEASED.notify_one();
    }
}
