//! Exception vector installation.
//!
//! The base address is given by VBAR_EL1 and each entry has a defined offset
//! from this base address. Each table has 16 entries, with each entry being
//! 128 bytes (32 instructions) in size. The table effectively consists of 4
//! sets of 4 entries.
//!
//! When the processor takes an exception to AArch64 execution state, all of
//! the PSTATE interrupt masks are set automatically, so handlers run with
//! further exceptions disabled unless they explicitly re-enable them.

use {
    aarch64_cpu::{asm::barrier, registers::VBAR_EL1},
    snafu::Snafu,
    tock_registers::interfaces::Writeable,
};

/// Errors possibly returned from the traps module.
#[derive(Debug, Snafu)]
pub enum Error {
    /// IVT address is unaligned.
    #[snafu(display("Unaligned base address for interrupt vector table"))]
    Unaligned,
}

/// Configure base address of the interrupt vectors table.
/// Checks that the address is properly 2KiB aligned.
///
/// # Safety
///
/// Totally unsafe in the land of the hardware.
pub unsafe fn set_vbar_el1_checked(vec_base_addr: u64) -> Result<(), Error> {
    if vec_base_addr.trailing_zeros() < 11 {
        return Err(Error::Unaligned);
    }

    VBAR_EL1.set(vec_base_addr);

    // Force VBAR update to complete before next instruction.
    barrier::isb(barrier::SY);

    Ok(())
}
