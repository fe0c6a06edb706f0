//! QEMU exit helpers for test builds.

#[cfg(any(test, feature = "qemu"))]
use qemu_exit::QEMUExit;

/// Exit QEMU reporting success.
pub fn exit_success() -> ! {
    #[cfg(any(test, feature = "qemu"))]
    {
        let handle = qemu_exit::AArch64::new();
        handle.exit_success()
    }

    #[cfg(not(any(test, feature = "qemu")))]
    crate::endless_sleep()
}

/// Exit QEMU reporting failure.
pub fn exit_failure() -> ! {
    #[cfg(any(test, feature = "qemu"))]
    {
        let handle = qemu_exit::AArch64::new();
        handle.exit_failure()
    }

    #[cfg(not(any(test, feature = "qemu")))]
    crate::endless_sleep()
}
