//! CPU descriptors.
//!
//! One record per logical CPU, indexed by logical CPU number in a bounded
//! array that is the source of truth. The descriptor tracks the per-CPU
//! stacks, the reset vector, the processor backpointer and - once threading
//! is up - the currently active thread and stack.

use {
    crate::{
        defaults::CPU_MAX,
        processor::Processor,
        thread::Thread,
        topology,
        vm::VirtAddr,
    },
    core::cell::UnsafeCell,
    machine::{arch::mmu, synchronization::interface::Mutex},
};

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

pub type CpuNumber = usize;

/// Set once the first kernel thread runs; gates access to
/// `cpu_active_thread` from the panic path.
pub const CPU_FLAG_THREADING_ENABLED: u32 = 1 << 0;

/// Per-CPU state.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Cpu {
    pub cpu_num: CpuNumber,
    pub cpu_flags: u32,

    pub processor: *mut Processor,

    /* Interrupt handling */
    pub excepstack_top: VirtAddr,
    pub intstack_top: VirtAddr,

    /* Reset */
    pub cpu_reset_handler: VirtAddr,

    /* Thread */
    pub cpu_active_thread: *mut Thread,
    pub cpu_active_stack: VirtAddr,
}

impl Cpu {
    const fn empty() -> Self {
        Self {
            cpu_num: 0,
            cpu_flags: 0,
            processor: core::ptr::null_mut(),
            excepstack_top: 0,
            intstack_top: 0,
            cpu_reset_handler: 0,
            cpu_active_thread: core::ptr::null_mut(),
            cpu_active_stack: 0,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Global instances
//--------------------------------------------------------------------------------------------------

struct CpuTable(UnsafeCell<[Cpu; CPU_MAX]>);

// SAFETY: single-core. Mutators run before interrupts are enabled or from
// the interrupt path itself, which is serialised by construction.
unsafe impl Sync for CpuTable {}

const EMPTY_CPU: Cpu = Cpu::empty();

static CPU_ENTRIES: CpuTable = CpuTable(UnsafeCell::new([EMPTY_CPU; CPU_MAX]));

static BOOT_CPU: machine::synchronization::IRQSafeNullLock<CpuNumber> =
    machine::synchronization::IRQSafeNullLock::new(0);

extern "C" {
    static __RESET_VECTOR: UnsafeCell<()>;
}

//--------------------------------------------------------------------------------------------------
// Private Code
//--------------------------------------------------------------------------------------------------

fn assert_valid_id(cpuid: CpuNumber) {
    if cpuid >= CPU_MAX {
        panic!("cpu: assertion failed: invalid cpu_id '{}'", cpuid);
    }
}

fn entry(cpuid: CpuNumber) -> *mut Cpu {
    assert_valid_id(cpuid);
    unsafe { (*CPU_ENTRIES.0.get()).as_mut_ptr().add(cpuid) }
}

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

/// Build a descriptor for the executing core and register it. Called during
/// early startup, while the bootloader's translation tables are still live
/// (the reset vector translation depends on them).
pub fn cpu_create(excepstack: VirtAddr, intstack: VirtAddr) -> Cpu {
    let reset_vector = unsafe { __RESET_VECTOR.get() } as VirtAddr;

    let cpu = Cpu {
        cpu_num: topology::cpu_num(),
        cpu_flags: 0,
        processor: core::ptr::null_mut(),
        excepstack_top: excepstack,
        intstack_top: intstack,
        cpu_reset_handler: mmu::kvtop(reset_vector)
            .expect("cpu: reset vector does not translate"),
        cpu_active_thread: core::ptr::null_mut(),
        cpu_active_stack: 0,
    };

    cpu_register(&cpu);
    cpu
}

/// Register a descriptor in the CPU array.
pub fn cpu_register(cpu: &Cpu) {
    assert_valid_id(cpu.cpu_num);
    unsafe { *entry(cpu.cpu_num) = *cpu };
}

/// Record which descriptor belongs to the boot CPU.
pub fn cpu_set_boot_cpu(cpu: &Cpu) {
    assert_valid_id(cpu.cpu_num);
    BOOT_CPU.lock(|boot| *boot = cpu.cpu_num);
}

/// Logical id of the boot CPU's descriptor.
pub fn boot_cpu_num() -> CpuNumber {
    BOOT_CPU.lock(|boot| *boot)
}

/// The descriptor for a logical CPU number.
pub fn cpu_get(cpuid: CpuNumber) -> &'static Cpu {
    unsafe { &*entry(cpuid) }
}

/// The executing core's descriptor.
pub fn cpu_get_current() -> &'static Cpu {
    cpu_get(topology::cpu_num())
}

pub fn cpu_set_flag(cpuid: CpuNumber, flag: u32) {
    unsafe { (*entry(cpuid)).cpu_flags |= flag };
}

pub fn cpu_read_flag(cpuid: CpuNumber, flag: u32) -> bool {
    unsafe { (*entry(cpuid)).cpu_flags & flag == flag }
}

pub fn cpu_set_active_stack(cpuid: CpuNumber, stack: VirtAddr) {
    unsafe { (*entry(cpuid)).cpu_active_stack = stack };
}

pub fn cpu_set_active_thread(cpuid: CpuNumber, thread: *mut Thread) {
    if thread.is_null() {
        panic!("cpu: failed to set cpu '{}' active thread: invalid thread", cpuid);
    }
    unsafe { (*entry(cpuid)).cpu_active_thread = thread };
}

pub fn cpu_set_processor(cpuid: CpuNumber, processor: *mut Processor) {
    unsafe { (*entry(cpuid)).processor = processor };
}

pub fn cpu_get_processor(cpuid: CpuNumber) -> *mut Processor {
    unsafe { (*entry(cpuid)).processor }
}
