//! Kernel print macros.
//!
//! All output funnels through the registered global console. The level gate
//! mirrors the classic printk scheme: messages above `LOG_LEVEL` are compiled
//! in but dropped at runtime, `cont!` appends to the current line without any
//! framing.

/// Log levels, lowest is most important.
pub mod level {
    pub const ERROR: u8 = 0;
    pub const WARN: u8 = 1;
    pub const INFO: u8 = 2;
    pub const DEBUG: u8 = 3;
}

/// Everything at or below this level is emitted.
pub const LOG_LEVEL: u8 = level::DEBUG;

#[doc(hidden)]
pub fn _print(args: core::fmt::Arguments) {
    use crate::console::console;
    console().write_fmt(args).unwrap();
}

#[doc(hidden)]
pub fn _print_gated(lvl: u8, args: core::fmt::Arguments) {
    if lvl <= LOG_LEVEL {
        _print(args);
    }
}

/// Macro similar to [std](https://doc.rust-lang.org/src/std/macros.rs.html)
/// but for writing into kernel-specific output (UART or QEMU console).
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::macros::_print(format_args!($($arg)*)));
}

/// Macro similar to [std](https://doc.rust-lang.org/src/std/macros.rs.html)
/// but for writing into kernel-specific output (UART or QEMU console).
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($fmt:expr) => ({
        $crate::macros::_print(format_args!(concat!($fmt, "\n")));
    });
    ($fmt:expr, $($arg:tt)*) => ({
        $crate::macros::_print(format_args!(concat!($fmt, "\n"), $($arg)*));
    })
}

/// Prints info text, with a newline.
#[macro_export]
macro_rules! info {
    ($fmt:expr) => ({
        $crate::macros::_print_gated(
            $crate::macros::level::INFO,
            format_args!(concat!($fmt, "\n")),
        );
    });
    ($fmt:expr, $($arg:tt)*) => ({
        $crate::macros::_print_gated(
            $crate::macros::level::INFO,
            format_args!(concat!($fmt, "\n"), $($arg)*),
        );
    })
}

/// Prints warning text, with a newline.
#[macro_export]
macro_rules! warn {
    ($fmt:expr) => ({
        $crate::macros::_print_gated(
            $crate::macros::level::WARN,
            format_args!(concat!($fmt, "\n")),
        );
    });
    ($fmt:expr, $($arg:tt)*) => ({
        $crate::macros::_print_gated(
            $crate::macros::level::WARN,
            format_args!(concat!($fmt, "\n"), $($arg)*),
        );
    })
}

/// Prints debug text, with a newline. Dropped entirely when the log level
/// does not permit it.
#[macro_export]
macro_rules! debug {
    ($fmt:expr) => ({
        $crate::macros::_print_gated(
            $crate::macros::level::DEBUG,
            format_args!(concat!($fmt, "\n")),
        );
    });
    ($fmt:expr, $($arg:tt)*) => ({
        $crate::macros::_print_gated(
            $crate::macros::level::DEBUG,
            format_args!(concat!($fmt, "\n"), $($arg)*),
        );
    })
}

/// Continuation print: appends to the current output line, no newline, no
/// level framing.
#[macro_export]
macro_rules! cont {
    ($($arg:tt)*) => ($crate::macros::_print(format_args!($($arg)*)));
}
