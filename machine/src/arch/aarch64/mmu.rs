//! MMU interactions.
//!
//! The kernel builds its own translation tables (see the kernel crate's vm
//! modules); this module is the thin layer that installs a root table into
//! the translation-base registers and asks the MMU to translate individual
//! addresses via the `AT` instruction.

use {
    aarch64_cpu::{
        asm::barrier,
        registers::{PAR_EL1, TTBR0_EL1, TTBR1_EL1},
    },
    tock_registers::interfaces::{Readable, Writeable},
};

/// Only the bottom 48 bits of a TTBRn_EL1 value carry the table address.
pub const TTBR_BADDR_MASK: u64 = 0x0000_ffff_ffff_ffff;

/// Install the root table for the lower (TTBR0) half of the address space.
///
/// # Safety
///
/// - Changes the active translation regime.
#[inline]
pub unsafe fn set_tt_base(base: u64) {
    barrier::dsb(barrier::SY);
    TTBR0_EL1.set_baddr(base);
    barrier::isb(barrier::SY);
}

/// Install the root table for the upper (TTBR1) half of the address space.
///
/// # Safety
///
/// - Changes the active translation regime.
#[inline]
pub unsafe fn set_tt_base_alt(base: u64) {
    barrier::dsb(barrier::SY);
    TTBR1_EL1.set_baddr(base);
    barrier::isb(barrier::SY);
}

/// Current TTBR0_EL1 value.
pub fn tt_base() -> u64 {
    TTBR0_EL1.get()
}

/// Current TTBR1_EL1 value.
pub fn tt_base_alt() -> u64 {
    TTBR1_EL1.get()
}

/// Translate a kernel virtual address to its physical counterpart by asking
/// the MMU to perform a stage-1 EL1 read walk. Returns `None` if the address
/// does not translate.
pub fn kvtop(virt: u64) -> Option<u64> {
    unsafe {
        core::arch::asm!("at s1e1r, {addr}", addr = in(reg) virt, options(nostack));
    }
    crate::arch::sysreg::isb();

    let par = PAR_EL1.get();
    if par & 0x1 != 0 {
        // Failed translation.
        return None;
    }

    let page = par & 0x0000_ffff_ffff_f000;
    Some(page | (virt & 0xfff))
}
