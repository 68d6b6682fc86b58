use std::io::Write;

#[doc(hidden)]
pub fn _print(args: core::fmt::Arguments<'_>) {
    // `print!` is captured by the test harness, including on kernel threads
    // spawned from a test.
    std::print!("{}", args);
    let _ = std::io::stdout().flush();
}

#[macro_export]
macro_rules! printk {
    ($($arg:tt)*) => {{
        $crate::printk::_print(::core::format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! printkln {
    () => ($crate::printk!("\n"));
    ($fmt:expr) => ({
        $crate::printk!(concat!($fmt, "\n"))
    });
    ($fmt:expr, $($arg:tt)*) => ({
        $crate::printk!(concat!($fmt, "\n"), $($arg)*)
    });
}
