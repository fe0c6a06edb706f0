#![no_std]
#![allow(stable_features)]
#![feature(custom_test_frameworks)]
#![test_runner(crate::test_runner)]
#![reexport_test_harness_main = "test_main"]
#![allow(clippy::missing_safety_doc)]

//! The Kestrel kernel.
//!
//! Brings the boot processor from a raw post-bootloader state into a state
//! where multiple kernel-mode threads run concurrently under a timer-driven
//! round-robin scheduler, sharing a single upper-half virtual address space
//! the kernel builds and maintains itself.

#[cfg(not(target_arch = "aarch64"))]
use architecture_not_supported_sorry;

pub mod boot;
pub mod cpu;
pub mod defaults;
pub mod exception;
pub mod irq;
pub mod kptr;
#[macro_use]
pub mod list;
pub mod panic;
pub mod processor;
pub mod sched;
pub mod stack;
pub mod task;
pub mod thread;
pub mod timer;
pub mod topology;
pub mod version;
pub mod vm;
pub mod zalloc;

/// The default runner for unit tests.
pub fn test_runner(tests: &[&dyn Fn()]) {
    machine::println!("Running {} tests", tests.len());

    for (i, test) in tests.iter().enumerate() {
        machine::print!("{:>3}. ", i + 1);

        test();

        machine::println!(".... PASSED");
    }
}

#[cfg(test)]
mod lib_tests {
    #[panic_handler]
    fn panicked(info: &core::panic::PanicInfo) -> ! {
        machine::panic::handler_for_tests(info)
    }

    /// Main for running tests.
    #[no_mangle]
    pub unsafe fn main() -> ! {
        machine::platform::qemu_bring_up_console();
        test_main();
        machine::qemu::exit_success()
    }
}
