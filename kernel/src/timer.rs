//! Machine timer glue.
//!
//! The scheduler runs off the per-CPU EL1 physical timer. Its interrupt id
//! is fixed by the architecture's PPI assignment.

use crate::{defaults::TIMER_RESET_VALUE, irq};

/// Interrupt id of the EL1 physical timer (PPI).
pub const TIMER_EL1PHYS_IRQ_ID: u32 = 30;

/// Register the timer interrupt and start the countdown. After this call
/// the next tick is always pending.
pub fn machine_init_timers() {
    irq::machine_register_interrupt(TIMER_EL1PHYS_IRQ_ID, 0)
        .expect("timer interrupt registration failed");
    machine::arch::timer::init(TIMER_RESET_VALUE);
}

/// Rearm the countdown; called from the interrupt path on every tick.
pub fn machine_timer_reset(reset: u64) {
    machine::arch::timer::reset(reset);
}
