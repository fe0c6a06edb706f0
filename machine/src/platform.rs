//! Platform glue for the kestrel-virt machine.
//!
//! The bootloader hands over a PL011 at a physical base recorded in the boot
//! arguments; the kernel maps it at the fixed peripheral window below, so the
//! console device itself can live at a constant virtual address.

use crate::{console, drivers::PL011Uart};

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

/// Fixed virtual addresses of the peripheral windows.
pub mod memory {
    /// Base of the upper-half kernel window.
    pub const KERNEL_VIRT_BASE: u64 = 0xffff_fff0_0000_0000;

    /// Where the boot console (UART) gets mapped.
    pub const PERIPH_VIRT_BASE: u64 = 0xffff_ffff_1000_0000;

    /// Where the interrupt controller region gets mapped.
    pub const GIC_VIRT_BASE: u64 = 0xffff_ffff_1100_0000;
}

/// Debug UART line configuration.
pub const UART_BAUD_RATE: u32 = 115_200;
pub const UART_CLOCK: u64 = 0x16e_3600;

/// UART physical base on the QEMU virt machine, for test builds that run
/// with the MMU off.
pub const QEMU_UART_PHYS_BASE: usize = 0x0900_0000;

//--------------------------------------------------------------------------------------------------
// Global instances
//--------------------------------------------------------------------------------------------------

static PL011_UART: PL011Uart =
    unsafe { PL011Uart::new(memory::PERIPH_VIRT_BASE as usize) };

static QEMU_PL011_UART: PL011Uart = unsafe { PL011Uart::new(QEMU_UART_PHYS_BASE) };

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

/// Bring up the boot console on the mapped peripheral window and register it
/// as the global print sink.
///
/// # Safety
///
/// - The peripheral window must be mapped read-write before this is called.
pub unsafe fn console_init() {
    if PL011_UART.init(UART_CLOCK, UART_BAUD_RATE).is_err() {
        // No console to complain on; the null console stays registered.
        return;
    }
    console::register_console(&PL011_UART);
}

/// Console bring-up for unit test binaries running under QEMU with the MMU
/// disabled: talk to the UART at its physical address.
pub fn qemu_bring_up_console() {
    // QEMU's PL011 comes up usable; skip reprogramming and just register.
    console::register_console(&QEMU_PL011_UART);
}
