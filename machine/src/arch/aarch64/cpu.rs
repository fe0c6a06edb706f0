use {
    aarch64_cpu::registers::MPIDR_EL1,
    tock_registers::interfaces::Readable,
};

/// Spin while `cond` is true.
pub fn loop_while<F: Fn() -> bool>(cond: F) {
    while cond() {
        aarch64_cpu::asm::nop();
    }
}

/// The multiprocessor affinity value of the executing core, with the
/// single-thread flag stripped and Aff3 folded down next to Aff2. The result
/// is the value the GIC redistributors report in their type registers.
pub fn affinity() -> u64 {
    let mpidr = MPIDR_EL1.get();
    (mpidr & !(0xff << 24)) | (((mpidr >> 32) & 0xff) << 24)
}

/// Affinity levels 0 and 1 only. This is what the machine topology uses to
/// match a core against the device tree `reg` properties.
pub fn core_affinity() -> u64 {
    MPIDR_EL1.get() & 0xff_ff
}

/// Extract an individual affinity level from an MPIDR value.
pub const fn affinity_level(mpidr: u64, level: u32) -> u64 {
    match level {
        0 => mpidr & 0xff,
        1 => (mpidr >> 8) & 0xff,
        2 => (mpidr >> 16) & 0xff,
        _ => (mpidr >> 32) & 0xff,
    }
}

/// Raw MPIDR_EL1 value.
pub fn mpidr() -> u64 {
    MPIDR_EL1.get()
}

/// Park the executing core.
pub fn halt() -> ! {
    crate::arch::endless_sleep()
}
