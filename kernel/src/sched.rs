//! The thread scheduler.
//!
//! Round-robin over the global thread list, driven by the timer interrupt.
//! [`schedule`] is only ever entered from the interrupt path with IRQs
//! masked; it never re-enters itself, and the timer has already been rearmed
//! by the time it runs, so the next tick is pending before any thread
//! resumes.
//!
//! The restore path goes through two assembly primitives: `__fork64_exec`
//! reloads the callee-saved context block (which sits at offset zero of the
//! thread descriptor) and returns into `__fork64_return`, which runs the
//! scheduler tail and then branches to x19 with x20 as the argument - the
//! entry point on first execution, the saved exception link register on
//! every resume.

use {
    crate::{
        cpu, exception::ExceptionFrame, list_entry, task, thread,
        thread::{Thread, THREAD_STATE_ACTIVE},
    },
    core::arch::global_asm,
};

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

/// Callee-saved context block.
///
/// This is the first field of the thread descriptor; the context-switch
/// assembly indexes from the thread pointer with zero offset.
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct CpuContext {
    pub x19: u64,
    pub x20: u64,
    pub x21: u64,
    pub x22: u64,
    pub x23: u64,
    pub x24: u64,
    pub x25: u64,
    pub x26: u64,
    pub x27: u64,
    pub x28: u64,
    pub fp: u64, // x29
    pub lr: u64, // x30
    pub sp: u64,
    pub _res: u64,
}

//--------------------------------------------------------------------------------------------------
// Context-switch primitives
//--------------------------------------------------------------------------------------------------

global_asm!(
    r#"
    // __fork64_exec: restore the callee-saved context block of the thread in
    // x0 (the block is at offset 0) and return into the link register it
    // carries - always __fork64_return. x0 is preserved across the restore
    // so the tail still sees the thread pointer.
    .global __fork64_exec
__fork64_exec:
    ldp x19, x20, [x0, #0]
    ldp x21, x22, [x0, #16]
    ldp x23, x24, [x0, #32]
    ldp x25, x26, [x0, #48]
    ldp x27, x28, [x0, #64]
    ldp x29, x30, [x0, #80]
    ldr x9,  [x0, #96]
    mov sp, x9
    ret

    // __fork64_return: complete the switch. The scheduler tail publishes the
    // thread as active and unmasks IRQs; x19/x20 survive the call because
    // they are callee-saved.
    .global __fork64_return
__fork64_return:
    bl  sched_tail
    mov x0, x20
    br  x19
"#
);

extern "C" {
    fn __fork64_exec(thread: *mut Thread) -> !;
    fn __fork64_return() -> !;
}

/// Address of the trampoline the load path plants in the saved link
/// register.
pub fn fork64_return_addr() -> u64 {
    __fork64_return as usize as u64
}

/// Hand the CPU to `thread` by restoring its context block.
pub fn fork64_exec(thread: *mut Thread) -> ! {
    unsafe { __fork64_exec(thread) }
}

//--------------------------------------------------------------------------------------------------
// Scheduling
//--------------------------------------------------------------------------------------------------

/// The next thread after `current` on the global list, wrapping from the
/// tail to the head.
unsafe fn select_thread(current: *mut Thread) -> *mut Thread {
    thread::with_thread_list(|threads| unsafe {
        let node = threads.next_circular(&mut (*current).threads);
        list_entry!(node, Thread, threads)
    })
}

/// Pick the next active thread, save the outgoing context from the
/// exception frame, and switch. Entered from the timer interrupt with IRQs
/// masked; does not return - control continues in the chosen thread.
pub fn schedule(frame: &ExceptionFrame) -> ! {
    unsafe {
        machine::arch::asynchronous::local_irq_mask();

        let cpu = cpu::cpu_get_current();
        let thread = cpu.cpu_active_thread;

        // Walk forward until an active thread comes up; inactive threads
        // (in-flight destruction) are skipped.
        let mut next_thread = select_thread(thread);
        while (*next_thread).state != THREAD_STATE_ACTIVE {
            machine::debug!(
                "sched: skipping inactive thread {}",
                (*next_thread).thread_id
            );
            next_thread = select_thread(next_thread);
        }

        machine::debug!(
            "sched: switching to thread: {}.{}",
            (*(*next_thread).task).name(),
            (*next_thread).thread_id
        );

        task::set_current_task((*next_thread).task);
        thread::thread_save_context(thread, frame);
        thread::thread_load_context(next_thread)
    }
}

/// Scheduler tail: runs on the incoming thread's stack, right before the
/// thread itself. Publishes the new active thread and stack, then unmasks
/// IRQs.
#[no_mangle]
extern "C" fn sched_tail(thread: *mut Thread) {
    let stack = unsafe { (*thread).stack };
    let cpu_num = crate::topology::cpu_num();

    cpu::cpu_set_active_thread(cpu_num, thread);
    cpu::cpu_set_active_stack(cpu_num, stack);

    unsafe { machine::arch::asynchronous::local_irq_unmask() };
}

//--------------------------------------------------------------------------------------------------
// Testing
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// `__fork64_exec` loads pairs at these offsets.
    #[test_case]
    fn context_layout_matches_the_restore_asm() {
        use core::mem::offset_of;

        assert_eq!(offset_of!(CpuContext, x19), 0);
        assert_eq!(offset_of!(CpuContext, x21), 16);
        assert_eq!(offset_of!(CpuContext, x23), 32);
        assert_eq!(offset_of!(CpuContext, x25), 48);
        assert_eq!(offset_of!(CpuContext, x27), 64);
        assert_eq!(offset_of!(CpuContext, fp), 80);
        assert_eq!(offset_of!(CpuContext, lr), 88);
        assert_eq!(offset_of!(CpuContext, sp), 96);
    }
}
