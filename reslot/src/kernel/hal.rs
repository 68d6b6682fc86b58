use reslot_khal::*;

#[cfg(feature = "khal-sim")]
pub(crate) use reslot_khal_sim as kernel_hal;

#[cfg(not(feature = "khal-sim"))]
compile_error!("reslot needs a kernel HAL backend, enable the `khal-sim` feature");

pub(crate) type Hal = kernel_hal::HAL;
pub type Context = <Hal as FlowController>::Context;
pub type Fault = <Hal as FlowController>::Fault;
pub type StackAlignment = <Hal as FlowController>::StackAlignment;

pub(crate) const TICK_FREQ_HZ: u64 = <Hal as AlarmClockController>::TICK_FREQ_HZ;

#[inline(always)]
pub fn clock_ticks() -> u64 {
    <Hal as AlarmClockController>::clock_ticks()
}

#[inline(always)]
pub(crate) fn set_wakeup(at: Option<u64>) {
    <Hal as AlarmClockController>::set_wakeup(at)
}

#[inline(always)]
pub(crate) fn spawn(
    name: &'static str,
    stack_size: usize,
    main: fn(usize),
    argument: usize,
) -> Result<Context, Fault> {
    <Hal as FlowController>::spawn(name, stack_size, main, argument)
}

#[inline(always)]
pub(crate) fn current_thread_context() -> Option<Context> {
    <Hal as FlowController>::current_thread_context()
}

#[inline(always)]
pub(crate) fn exit_thread() -> ! {
    <Hal as FlowController>::exit_thread()
}

#[inline(always)]
pub(crate) fn init(callbacks: KernelCallbacks) -> Hal {
    <Hal as HardwareAbstractionLayer>::init(callbacks)
}

#[inline(always)]
pub(crate) fn signal_halt() {
    <Hal as HardwareAbstractionLayer>::signal_halt()
}
