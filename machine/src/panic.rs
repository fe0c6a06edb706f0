//! A minimal panic path for the machine library's own test builds.
//!
//! The kernel binary installs its own, much richer handler (banner,
//! backtrace, CPU state); this one exists so `machine` unit tests can link
//! and report failures on their own.

use core::panic::PanicInfo;

fn print_panic_info(info: &PanicInfo) {
    let (location, line, column) = match info.location() {
        Some(loc) => (loc.file(), loc.line(), loc.column()),
        _ => ("???", 0, 0),
    };

    crate::println!(
        "Kernel panic!\n\n\
        Panic location:\n      File '{}', line {}, column {}\n\n\
        {}",
        location,
        line,
        column,
        info.message(),
    );
}

pub fn handler(info: &PanicInfo) -> ! {
    // Protect against panic infinite loops if any of the following code panics itself.
    panic_prevent_reenter();
    print_panic_info(info);
    crate::endless_sleep()
}

/// Separate handler for test builds, which must exit QEMU with a failure
/// code so the runner notices.
pub fn handler_for_tests(info: &PanicInfo) -> ! {
    crate::println!("\n[failed]\n");
    // Protect against panic infinite loops if any of the following code panics itself.
    panic_prevent_reenter();
    print_panic_info(info);
    crate::qemu::exit_failure()
}

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

/// Stop immediately if called a second time.
///
/// # Note
///
/// Using atomics here relieves us from needing to use `unsafe` for the static
/// variable. On AArch64 `AtomicBool::load` and `AtomicBool::store` are
/// lowered to ordinary load and store instructions, so they are safe to use
/// even with MMU + caching deactivated.
pub fn panic_prevent_reenter() {
    use core::sync::atomic::{AtomicBool, Ordering};

    static PANIC_IN_PROGRESS: AtomicBool = AtomicBool::new(false);

    if !PANIC_IN_PROGRESS.load(Ordering::Relaxed) {
        PANIC_IN_PROGRESS.store(true, Ordering::Relaxed);

        return;
    }

    crate::endless_sleep()
}
