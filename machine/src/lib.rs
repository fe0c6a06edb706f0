#![no_std]
#![allow(stable_features)]
#![feature(custom_test_frameworks)]
#![test_runner(crate::tests::test_runner)]
#![reexport_test_harness_main = "test_main"]
#![allow(clippy::upper_case_acronyms)]
#![allow(clippy::enum_variant_names)]

#[cfg(not(target_arch = "aarch64"))]
use architecture_not_supported_sorry;

/// Architecture-specific code.
#[macro_use]
pub mod arch;
pub mod console;
pub mod device_tree;
pub mod devices;
pub mod drivers;
#[macro_use]
pub mod macros;
pub mod memory;
pub mod panic;
pub mod platform;
pub mod qemu;
pub mod synchronization;
pub mod tests;

pub use arch::endless_sleep;

/// Version string.
pub fn version() -> &'static str {
    concat!(
        env!("CARGO_PKG_NAME"),
        " version ",
        env!("CARGO_PKG_VERSION")
    )
}

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[panic_handler]
    fn panicked(info: &core::panic::PanicInfo) -> ! {
        panic::handler_for_tests(info)
    }

    /// Main for running tests.
    #[no_mangle]
    pub unsafe fn main() -> ! {
        platform::qemu_bring_up_console();
        test_main();
        qemu::exit_success()
    }
}
