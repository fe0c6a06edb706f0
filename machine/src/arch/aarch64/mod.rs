use aarch64_cpu::asm;

#[macro_use]
pub mod sysreg;

pub mod asynchronous;
pub mod cpu;
pub mod mmu;
pub mod timer;
pub mod traps;

/// Expose CPU-specific no-op opcode.
pub use asm::nop;

/// Loop forever in sleep mode.
#[inline]
pub fn endless_sleep() -> ! {
    loop {
        asm::wfe();
    }
}
