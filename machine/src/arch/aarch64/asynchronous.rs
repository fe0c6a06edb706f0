//! Asynchronous exception (IRQ) masking.
//!
//! On a single core every shared mutation in the kernel is protected by
//! masking IRQs around the critical section; these are the primitives the
//! pseudo-locks in `synchronization` build on.

use {aarch64_cpu::registers::DAIF, tock_registers::interfaces::Readable};

/// Returns whether IRQs are masked on the executing core.
pub fn is_local_irq_masked() -> bool {
    DAIF.is_set(DAIF::I)
}

/// Unmask IRQs.
///
/// # Safety
///
/// - Changes the HW state of the executing core.
#[inline(always)]
pub unsafe fn local_irq_unmask() {
    core::arch::asm!("msr daifclr, #2", options(nomem, nostack));
}

/// Mask IRQs.
///
/// # Safety
///
/// - Changes the HW state of the executing core.
#[inline(always)]
pub unsafe fn local_irq_mask() {
    core::arch::asm!("msr daifset, #2", options(nomem, nostack));
}

/// Mask IRQs and return the previously saved interrupt mask bits.
///
/// # Safety
///
/// - Changes the HW state of the executing core.
#[inline(always)]
pub unsafe fn local_irq_mask_save() -> u64 {
    let saved = DAIF.get();
    local_irq_mask();

    saved
}

/// Restore the interrupt mask bits.
///
/// # Safety
///
/// - Changes the HW state of the executing core.
/// - No sanity checks on the input.
#[inline(always)]
pub unsafe fn local_irq_restore(saved: u64) {
    use tock_registers::interfaces::Writeable;
    DAIF.set(saved);
}

/// Executes the provided closure while IRQs are masked on the executing core.
///
/// While the function temporarily changes the HW state of the executing core,
/// it restores it to the previous state before returning, so this is deemed
/// safe.
#[inline(always)]
pub fn exec_with_irq_masked<T>(f: impl FnOnce() -> T) -> T {
    let saved = unsafe { local_irq_mask_save() };
    let ret = f();
    unsafe { local_irq_restore(saved) };

    ret
}
