//! Kernel exception handling.
//!
//! The vector stubs build an exception frame and tail-call the first-stage
//! handlers below. Synchronous exceptions are decoded from the syndrome
//! register and routed; every class is fatal in the current scope (there is
//! no userland to absorb a fault). The IRQ path acknowledges the interrupt,
//! rearms the timer and enters the scheduler.

use {
    crate::{defaults::TIMER_RESET_VALUE, irq, panic, sched, timer, vm::VirtAddr},
    core::{arch::global_asm, cell::UnsafeCell},
    machine::drivers::gicv3,
};

global_asm!(include_str!("vectors.S"));

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

/// Saved register state at exception entry, as the vector stubs lay it out.
/// Consumed read-only by handlers.
#[repr(C)]
pub struct ExceptionFrame {
    /// x0 - x28.
    pub regs: [u64; 29],
    pub fp: u64,
    pub lr: u64,
    /// Pre-exception stack pointer.
    pub sp: u64,
    /// Fault address register at entry.
    pub far: u64,
    /// Syndrome register at entry.
    pub esr: u64,
    /// Exception link register: where the exception returns to.
    pub elr: u64,
}

/// Exception classes of ESR_EL1.EC handled by the dispatcher.
pub mod esr_ec {
    pub const UNCATEGORIZED: u64 = 0x00;
    pub const SVC_64: u64 = 0x15;
    pub const MSR_TRAP: u64 = 0x18;
    pub const IABORT_EL0: u64 = 0x20;
    pub const IABORT_EL1: u64 = 0x21;
    pub const PC_ALIGN: u64 = 0x22;
    pub const DABORT_EL0: u64 = 0x24;
    pub const DABORT_EL1: u64 = 0x25;
    pub const BRK_AARCH64: u64 = 0x3c;
}

/// Fault status codes from the instruction-specific syndrome.
pub mod fsc {
    pub const ADDRESS_SIZE_FAULT_L0: u64 = 0x00;
    pub const ADDRESS_SIZE_FAULT_L1: u64 = 0x01;
    pub const ADDRESS_SIZE_FAULT_L2: u64 = 0x02;
    pub const ADDRESS_SIZE_FAULT_L3: u64 = 0x03;
    pub const TRANSLATION_FAULT_L0: u64 = 0x04;
    pub const TRANSLATION_FAULT_L1: u64 = 0x05;
    pub const TRANSLATION_FAULT_L2: u64 = 0x06;
    pub const TRANSLATION_FAULT_L3: u64 = 0x07;
    pub const ACCESS_FLAG_FAULT_L1: u64 = 0x09;
    pub const ACCESS_FLAG_FAULT_L2: u64 = 0x0a;
    pub const ACCESS_FLAG_FAULT_L3: u64 = 0x0b;
    pub const PERMISSION_FAULT_L1: u64 = 0x0d;
    pub const PERMISSION_FAULT_L2: u64 = 0x0e;
    pub const PERMISSION_FAULT_L3: u64 = 0x0f;
    pub const SYNC_EXT_ABORT_TT_L1: u64 = 0x15;
    pub const SYNC_EXT_ABORT_TT_L2: u64 = 0x16;
    pub const SYNC_EXT_ABORT_TT_L3: u64 = 0x17;
    pub const SYNC_PARITY_TT_L1: u64 = 0x1d;
    pub const SYNC_PARITY_TT_L2: u64 = 0x1e;
    pub const SYNC_PARITY_TT_L3: u64 = 0x1f;
    pub const ALIGNMENT_FAULT: u64 = 0x21;
}

type FaultStatus = u64;
type FaultAddress = VirtAddr;

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

/// Install the exception vector table.
pub fn handling_init() {
    extern "C" {
        static __EXCEPTION_VECTORS_START: UnsafeCell<()>;
    }

    unsafe {
        machine::arch::traps::set_vbar_el1_checked(__EXCEPTION_VECTORS_START.get() as u64)
            .expect("vector table misaligned");
    }
    machine::info!("exception: traps set up");
}

/// Exception class field of a syndrome value.
pub fn esr_class(esr: u64) -> u64 {
    (esr >> 26) & 0x3f
}

/// Instruction-specific syndrome field of a syndrome value.
pub fn esr_iss(esr: u64) -> u64 {
    esr & 0x1ff_ffff
}

//--------------------------------------------------------------------------------------------------
// Fault classification
//--------------------------------------------------------------------------------------------------

fn is_translation_fault(status: FaultStatus) -> bool {
    matches!(
        status,
        fsc::TRANSLATION_FAULT_L0
            | fsc::TRANSLATION_FAULT_L1
            | fsc::TRANSLATION_FAULT_L2
            | fsc::TRANSLATION_FAULT_L3
    )
}

fn is_address_size_fault(status: FaultStatus) -> bool {
    matches!(
        status,
        fsc::ADDRESS_SIZE_FAULT_L0
            | fsc::ADDRESS_SIZE_FAULT_L1
            | fsc::ADDRESS_SIZE_FAULT_L2
            | fsc::ADDRESS_SIZE_FAULT_L3
    )
}

fn is_permission_fault(status: FaultStatus) -> bool {
    matches!(
        status,
        fsc::PERMISSION_FAULT_L1 | fsc::PERMISSION_FAULT_L2 | fsc::PERMISSION_FAULT_L3
    )
}

fn is_alignment_fault(status: FaultStatus) -> bool {
    status == fsc::ALIGNMENT_FAULT
}

/// The translation level a fault occurred at, or -1 if the fault is not
/// translation-related.
fn vm_fault_level(status: FaultStatus) -> i32 {
    match status {
        fsc::TRANSLATION_FAULT_L0 | fsc::ADDRESS_SIZE_FAULT_L0 => 0,

        fsc::TRANSLATION_FAULT_L1
        | fsc::ADDRESS_SIZE_FAULT_L1
        | fsc::ACCESS_FLAG_FAULT_L1
        | fsc::PERMISSION_FAULT_L1
        | fsc::SYNC_EXT_ABORT_TT_L1
        | fsc::SYNC_PARITY_TT_L1 => 1,

        fsc::TRANSLATION_FAULT_L2
        | fsc::ADDRESS_SIZE_FAULT_L2
        | fsc::ACCESS_FLAG_FAULT_L2
        | fsc::PERMISSION_FAULT_L2
        | fsc::SYNC_EXT_ABORT_TT_L2
        | fsc::SYNC_PARITY_TT_L2 => 2,

        fsc::TRANSLATION_FAULT_L3
        | fsc::ADDRESS_SIZE_FAULT_L3
        | fsc::ACCESS_FLAG_FAULT_L3
        | fsc::PERMISSION_FAULT_L3
        | fsc::SYNC_EXT_ABORT_TT_L3
        | fsc::SYNC_PARITY_TT_L3 => 3,

        _ => -1,
    }
}

//--------------------------------------------------------------------------------------------------
// Abort inspection
//--------------------------------------------------------------------------------------------------

/// Memory access kinds an abort was attempting.
mod vm_prot {
    pub const READ: u32 = 0x1;
    pub const WRITE: u32 = 0x2;
    pub const EXECUTE: u32 = 0x4;
}

const ISS_DA_WNR: u64 = 1 << 6;
const ISS_DA_CM: u64 = 1 << 8;

type AbortInspector = fn(u64) -> (FaultStatus, u32);
type AbortHandler = fn(&ExceptionFrame, FaultAddress, FaultStatus) -> !;

/// Extract the fault status and access kind of a data abort from the
/// instruction-specific syndrome.
fn inspect_data_abort(iss: u64) -> (FaultStatus, u32) {
    let fault_code = iss & 0x3f;

    let fault_type = if (iss & ISS_DA_WNR != 0)
        && (iss & ISS_DA_CM == 0 || is_permission_fault(fault_code))
    {
        vm_prot::READ | vm_prot::WRITE
    } else {
        vm_prot::READ
    };

    (fault_code, fault_type)
}

/// Extract the fault status and access kind of an instruction abort.
fn inspect_instruction_abort(iss: u64) -> (FaultStatus, u32) {
    (iss & 0x3f, vm_prot::READ | vm_prot::EXECUTE)
}

//--------------------------------------------------------------------------------------------------
// Abort handlers
//--------------------------------------------------------------------------------------------------

fn handle_data_abort(frame: &ExceptionFrame, fault_address: FaultAddress, status: FaultStatus) -> ! {
    if is_translation_fault(status) {
        panic::panic_with_frame(
            frame,
            format_args!(
                "Data Abort - Translation Fault at {:#x}, Level {}",
                fault_address,
                vm_fault_level(status)
            ),
        );
    }

    if is_permission_fault(status) {
        panic::panic_with_frame(
            frame,
            format_args!(
                "Data Abort - Permission Fault at {:#x}, Level {}",
                fault_address,
                vm_fault_level(status)
            ),
        );
    }

    if is_alignment_fault(status) {
        panic::panic_with_frame(
            frame,
            format_args!("Alignment Fault at {:#x}", fault_address),
        );
    }

    if is_address_size_fault(status) {
        panic::panic_with_frame(
            frame,
            format_args!(
                "Data Abort - Address Size Fault at {:#x}, Level {}",
                fault_address,
                vm_fault_level(status)
            ),
        );
    }

    panic::panic_with_frame(
        frame,
        format_args!("Data Abort - Unknown ({:#x})", status),
    );
}

fn handle_instruction_abort(
    frame: &ExceptionFrame,
    fault_address: FaultAddress,
    status: FaultStatus,
) -> ! {
    if is_translation_fault(status) {
        panic::panic_with_frame(
            frame,
            format_args!(
                "Kernel Instruction Abort - Translation Fault at {:#x}, Level {}",
                fault_address,
                vm_fault_level(status)
            ),
        );
    }

    panic::panic_with_frame(
        frame,
        format_args!("Kernel Instruction Abort - Unknown ({:#x})", status),
    );
}

/// Common abort path: inspect the syndrome, then dispatch with the fault
/// address the entry stub captured from the fault-address register.
fn handle_abort(frame: &ExceptionFrame, handler: AbortHandler, inspect: AbortInspector) -> ! {
    let (fault_code, _fault_type) = inspect(esr_iss(frame.esr));
    handler(frame, frame.far, fault_code)
}

fn handle_breakpoint(frame: &ExceptionFrame) -> ! {
    panic::panic_with_frame(frame, format_args!("Breakpoint 64"));
}

fn handle_svc(frame: &ExceptionFrame) -> ! {
    // No syscalls yet.
    panic::panic_with_frame(frame, format_args!("Supervisor Call (64)"));
}

fn handle_msr_trap(frame: &ExceptionFrame) -> ! {
    panic::panic_with_frame(frame, format_args!("Trapped MSR, MRS, or System instruction"));
}

fn handle_undefined_instruction(frame: &ExceptionFrame) -> ! {
    panic::panic_with_frame(frame, format_args!("Undefined Instruction"));
}

//--------------------------------------------------------------------------------------------------
// First-stage handlers
//--------------------------------------------------------------------------------------------------

#[no_mangle]
unsafe extern "C" fn arm64_handler_synchronous(frame: *mut ExceptionFrame) {
    let frame = &*frame;
    let class = esr_class(frame.esr);

    match class {
        esr_ec::PC_ALIGN => {
            panic::panic_with_frame(frame, format_args!("PC Alignment Fault"));
        }

        esr_ec::DABORT_EL0 | esr_ec::DABORT_EL1 => {
            handle_abort(frame, handle_data_abort, inspect_data_abort);
        }

        esr_ec::BRK_AARCH64 => {
            handle_breakpoint(frame);
        }

        esr_ec::SVC_64 => {
            handle_svc(frame);
        }

        esr_ec::MSR_TRAP => {
            handle_msr_trap(frame);
        }

        esr_ec::IABORT_EL0 | esr_ec::IABORT_EL1 => {
            handle_abort(frame, handle_instruction_abort, inspect_instruction_abort);
        }

        esr_ec::UNCATEGORIZED => {
            handle_undefined_instruction(frame);
        }

        _ => {
            machine::println!("class: {:#x}", class);
            panic::panic_with_frame(frame, format_args!("Unknown Exception"));
        }
    }
}

#[no_mangle]
unsafe extern "C" fn arm64_handler_irq(frame: *mut ExceptionFrame) {
    let intid = gicv3::acknowledge();
    gicv3::end_of_interrupt(intid);

    irq::machine_irq_disable();

    if intid == timer::TIMER_EL1PHYS_IRQ_ID {
        // Rearm before entering the scheduler: the next tick must be
        // pending by the time any thread resumes.
        timer::machine_timer_reset(TIMER_RESET_VALUE);
        sched::schedule(&*frame);
    }
}

#[no_mangle]
unsafe extern "C" fn arm64_handler_fiq(_frame: *mut ExceptionFrame) {
    let intid = gicv3::acknowledge();
    gicv3::end_of_interrupt(intid);

    machine::println!("exception: fiq: intid: {}", intid);
}

#[no_mangle]
unsafe extern "C" fn arm64_handler_serror(frame: *mut ExceptionFrame) {
    panic::panic_with_frame(&*frame, format_args!("SError Interrupt"));
}

//--------------------------------------------------------------------------------------------------
// Testing
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn esr_field_extraction() {
        // Data abort from the current EL, DFSC = permission fault level 2,
        // write access.
        let esr = (esr_ec::DABORT_EL1 << 26) | ISS_DA_WNR | fsc::PERMISSION_FAULT_L2;

        assert_eq!(esr_class(esr), esr_ec::DABORT_EL1);
        assert_eq!(esr_iss(esr) & 0x3f, fsc::PERMISSION_FAULT_L2);
    }

    #[test_case]
    fn data_abort_inspection_decodes_writes() {
        let iss = ISS_DA_WNR | fsc::TRANSLATION_FAULT_L1;
        let (code, prot) = inspect_data_abort(iss);

        assert_eq!(code, fsc::TRANSLATION_FAULT_L1);
        assert_eq!(prot, vm_prot::READ | vm_prot::WRITE);
    }

    #[test_case]
    fn data_abort_inspection_decodes_reads() {
        let (code, prot) = inspect_data_abort(fsc::TRANSLATION_FAULT_L3);

        assert_eq!(code, fsc::TRANSLATION_FAULT_L3);
        assert_eq!(prot, vm_prot::READ);
    }

    #[test_case]
    fn cache_maintenance_writes_count_as_reads() {
        // WNR set but CM set and not a permission fault: reported as a read.
        let iss = ISS_DA_WNR | ISS_DA_CM | fsc::TRANSLATION_FAULT_L2;
        let (_, prot) = inspect_data_abort(iss);

        assert_eq!(prot, vm_prot::READ);
    }

    #[test_case]
    fn fault_kind_partition() {
        assert!(is_translation_fault(fsc::TRANSLATION_FAULT_L0));
        assert!(is_permission_fault(fsc::PERMISSION_FAULT_L3));
        assert!(is_alignment_fault(fsc::ALIGNMENT_FAULT));
        assert!(is_address_size_fault(fsc::ADDRESS_SIZE_FAULT_L2));

        assert!(!is_translation_fault(fsc::PERMISSION_FAULT_L1));
        assert!(!is_permission_fault(fsc::TRANSLATION_FAULT_L1));
    }

    #[test_case]
    fn fault_levels() {
        assert_eq!(vm_fault_level(fsc::TRANSLATION_FAULT_L0), 0);
        assert_eq!(vm_fault_level(fsc::PERMISSION_FAULT_L1), 1);
        assert_eq!(vm_fault_level(fsc::PERMISSION_FAULT_L2), 2);
        assert_eq!(vm_fault_level(fsc::TRANSLATION_FAULT_L3), 3);
        assert_eq!(vm_fault_level(fsc::ALIGNMENT_FAULT), -1);
    }

    #[test_case]
    fn frame_layout_matches_the_entry_stubs() {
        use core::mem::offset_of;

        // The vector stubs store at these offsets.
        assert_eq!(offset_of!(ExceptionFrame, regs), 0x00);
        assert_eq!(offset_of!(ExceptionFrame, fp), 0xe8);
        assert_eq!(offset_of!(ExceptionFrame, lr), 0xf0);
        assert_eq!(offset_of!(ExceptionFrame, sp), 0xf8);
        assert_eq!(offset_of!(ExceptionFrame, far), 0x100);
        assert_eq!(offset_of!(ExceptionFrame, esr), 0x108);
        assert_eq!(offset_of!(ExceptionFrame, elr), 0x110);
    }
}
