//! The kernel panic handler.
//!
//! Panic is terminal: interrupts are masked, a banner, the faulting
//! thread's identity, a frame-pointer backtrace and (when an exception
//! frame is available) the CPU register state are emitted, then the CPU
//! halts. A sticky flag guards against recursion - a panic from within the
//! panic handler goes straight to the halt.

use {
    crate::{cpu, exception::ExceptionFrame, task},
    core::{
        fmt,
        sync::atomic::{AtomicBool, Ordering},
    },
    machine::{cont, println},
};

//--------------------------------------------------------------------------------------------------
// Private Definitions
//--------------------------------------------------------------------------------------------------

/// Matches the architecture's frame-pointer chain; used only for backtrace
/// walking.
#[repr(C)]
struct FrameRecord {
    parent: *const FrameRecord,
    return_addr: u64,
}

/// Backtraces stop after this many records.
const BACKTRACE_DEPTH_MAX: usize = 20;

static PANIC_ACTIVE: AtomicBool = AtomicBool::new(false);

//--------------------------------------------------------------------------------------------------
// Private Code
//--------------------------------------------------------------------------------------------------

/// Walk the frame-pointer chain from the panic site.
fn print_backtrace(panic_cpu: &cpu::Cpu) {
    // The kernel can crash before the main thread has started; only name
    // the active thread once threading is live.
    if cpu::cpu_read_flag(panic_cpu.cpu_num, cpu::CPU_FLAG_THREADING_ENABLED) {
        let thread = unsafe { &*panic_cpu.cpu_active_thread };
        println!(
            "Process name: {}  Thread ID: {}",
            unsafe { (*thread.task).name() },
            thread.thread_id
        );
    } else {
        println!("Kernel faulted before main thread enabled");
    }
    println!();

    println!("Backtrace (CPU{}):", panic_cpu.cpu_num);

    let mut fr: *const FrameRecord;
    unsafe {
        core::arch::asm!("mov {fr}, x29", fr = out(reg) fr, options(nomem, nostack));
    }

    for i in 0..BACKTRACE_DEPTH_MAX {
        if fr.is_null() {
            break;
        }
        let record = unsafe { &*fr };
        if record.parent.is_null() {
            break;
        }

        println!("\t{}: {:#x}", i, record.return_addr);
        fr = record.parent;
    }
    println!();
}

fn print_cpu_state(frame: &ExceptionFrame) {
    println!("CPU State:");
    println!(
        "  x0: {:#018x}   x1: {:#018x}   x2: {:#018x}   x3: {:#018x}",
        frame.regs[0], frame.regs[1], frame.regs[2], frame.regs[3]
    );
    println!(
        "  x4: {:#018x}   x5: {:#018x}   x6: {:#018x}   x7: {:#018x}",
        frame.regs[4], frame.regs[5], frame.regs[6], frame.regs[7]
    );
    println!(
        "  x8: {:#018x}   x9: {:#018x}  x10: {:#018x}  x11: {:#018x}",
        frame.regs[8], frame.regs[9], frame.regs[10], frame.regs[11]
    );
    println!(
        " x12: {:#018x}  x13: {:#018x}  x14: {:#018x}  x15: {:#018x}",
        frame.regs[12], frame.regs[13], frame.regs[14], frame.regs[15]
    );
    println!(
        " x16: {:#018x}  x17: {:#018x}  x18: {:#018x}  x19: {:#018x}",
        frame.regs[16], frame.regs[17], frame.regs[18], frame.regs[19]
    );
    println!(
        " x20: {:#018x}  x21: {:#018x}  x22: {:#018x}  x23: {:#018x}",
        frame.regs[20], frame.regs[21], frame.regs[22], frame.regs[23]
    );
    println!(
        " x24: {:#018x}  x25: {:#018x}  x26: {:#018x}  x27: {:#018x}",
        frame.regs[24], frame.regs[25], frame.regs[26], frame.regs[27]
    );
    println!(
        " x28: {:#018x}   fp: {:#018x}   lr: {:#018x}   sp: {:#018x}",
        frame.regs[28], frame.fp, frame.lr, frame.sp
    );
    println!();

    println!("Exception taken at EL1");
    println!("  FAR_EL1: {:#018x}", frame.far);
    println!("  ESR_EL1: {:#018x}", frame.esr);
    println!();
}

/// The panic handler proper. Not exposed directly; reached through
/// [`panic_with_frame`] or the language panic hook in `main.rs`.
fn panic_common(frame: Option<&ExceptionFrame>, message: fmt::Arguments) -> ! {
    // A panic inside the panic handler jumps straight to the halt.
    if PANIC_ACTIVE.swap(true, Ordering::Relaxed) {
        machine::arch::cpu::halt();
    }

    // The kernel cannot recover from this state; the handler must be able
    // to complete and then halt the CPU.
    crate::irq::machine_irq_disable();

    // It is the executing CPU that panicked.
    let panic_cpu = cpu::cpu_get_current();
    let panic_pid = {
        let current = task::get_current_task();
        if current.is_null() {
            -1
        } else {
            unsafe { (*current).pid }
        }
    };

    println!();
    cont!("--- Kernel Panic - {}\n", message);

    println!(
        "CPU: {}  PID: {}  {}",
        panic_cpu.cpu_num,
        panic_pid,
        crate::version::KERNEL_VERSION
    );
    println!("Machine: {}", "kestrel-virt");
    println!("Kernel:  Kestrel Kernel Version {}", crate::version::KERNEL_BUILD_VERSION);

    print_backtrace(panic_cpu);

    if let Some(frame) = frame {
        print_cpu_state(frame);
    }

    println!("Kernel base: {:#x}", crate::defaults::KERNEL_VIRT_BASE);
    println!();

    cont!("---[end Kernel Panic - {} ]\n", message);

    machine::arch::cpu::halt();
}

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

/// Panic with the CPU state from an exception frame.
pub fn panic_with_frame(frame: &ExceptionFrame, message: fmt::Arguments) -> ! {
    panic_common(Some(frame), message)
}

/// Entry for the language panic hook.
pub fn handler(info: &core::panic::PanicInfo) -> ! {
    panic_common(None, format_args!("{}", info.message()))
}
