//! The per-core countdown timer (EL1 physical generic timer).
//!
//! The scheduler is driven by this timer: `init` programs the first interval
//! and enables the counter, `reset` rearms it from the interrupt handler on
//! every tick.

use {
    aarch64_cpu::registers::{CNTPCT_EL0, CNTP_CTL_EL0, CNTP_TVAL_EL0},
    tock_registers::interfaces::{Readable, Writeable},
};

/// Program the first countdown interval and enable the timer.
pub fn init(reset_value: u64) {
    CNTP_TVAL_EL0.set(reset_value);
    CNTP_CTL_EL0.write(CNTP_CTL_EL0::ENABLE::SET + CNTP_CTL_EL0::IMASK::CLEAR);
}

/// Rearm the countdown. Called from the timer interrupt path on every tick.
pub fn reset(reset_value: u64) {
    CNTP_TVAL_EL0.set(reset_value);
}

/// Current physical counter value.
pub fn current() -> u64 {
    CNTPCT_EL0.get()
}
