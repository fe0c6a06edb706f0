//! Processors.
//!
//! Two interfaces describe a single core: the CPU descriptor (architecture
//! state: stacks, reset vector, active thread) and the processor descriptor,
//! a higher-level, architecture-agnostic record. The two are not strongly
//! linked; the processor tracks the cpu id it represents and the CPU
//! interface resolves it back through the descriptor array.
//!
//! Processors join the idle list at creation and are never destroyed in
//! this scope.

use {
    crate::{
        cpu,
        defaults::CPU_MAX,
        kptr::KPtr,
        list::{List, ListNode},
        thread::{Thread, THREAD_PRIORITY_LOW},
        topology,
        zalloc::{self, ZoneId},
    },
    machine::synchronization::{
        interface::{Mutex, ReadWriteEx},
        IRQSafeNullLock, InitStateLock,
    },
};

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

pub const PROCESSOR_STATE_INACTIVE: u32 = 0;
pub const PROCESSOR_STATE_ACTIVE: u32 = 1;
pub const PROCESSOR_STATE_IDLE: u32 = 2;

/// Processor descriptor. Allocated from the processor zone.
#[repr(C)]
pub struct Processor {
    /// A processor keeps track of three threads: the active one, the one to
    /// switch to next, and the one to run when idling.
    pub active_thread: *mut Thread,
    pub next_thread: *mut Thread,
    pub idle_thread: *mut Thread,

    pub priority: i32,
    pub cpu_id: usize,

    pub state: u32,

    /// Membership in the active or idle processor list.
    pub proc_list: ListNode,
}

//--------------------------------------------------------------------------------------------------
// Global instances
//--------------------------------------------------------------------------------------------------

static ACTIVE_PROCESSORS: IRQSafeNullLock<List> = IRQSafeNullLock::new(List::new());
static IDLE_PROCESSORS: IRQSafeNullLock<List> = IRQSafeNullLock::new(List::new());

static PROCESSOR_COUNT: IRQSafeNullLock<usize> = IRQSafeNullLock::new(0);
static PRIMARY_PROCESSOR: IRQSafeNullLock<KPtr<Processor>> = IRQSafeNullLock::new(KPtr::null());

static PROCESSOR_ZONE: InitStateLock<Option<ZoneId>> = InitStateLock::new(None);

fn processor_zone() -> ZoneId {
    PROCESSOR_ZONE.read(|z| z.expect("processor zone not initialised"))
}

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

/// Configure the processor interface: the processor lists, the processor
/// zone, and the primary (boot) processor.
pub fn processor_init() {
    ACTIVE_PROCESSORS.lock(|l| l.init());
    IDLE_PROCESSORS.lock(|l| l.init());

    let zone = zalloc::zone_create(
        core::mem::size_of::<Processor>() as u64,
        (CPU_MAX * core::mem::size_of::<Processor>()) as u64,
        "processor_zone",
    );
    PROCESSOR_ZONE.write(|z| *z = Some(zone));

    let primary = processor_create(topology::boot_cpu_num());
    PRIMARY_PROCESSOR.lock(|p| p.0 = primary);
    cpu::cpu_set_processor(unsafe { (*primary).cpu_id }, primary);

    machine::info!("processor: processor_init complete");
}

/// Create a processor for a cpu id: inactive, no threads, lowest priority,
/// parked on the idle list.
pub fn processor_create(cpu_id: usize) -> *mut Processor {
    let processor = zalloc::zalloc(processor_zone()) as *mut Processor;

    unsafe {
        core::ptr::write_bytes(processor as *mut u8, 0, core::mem::size_of::<Processor>());

        (*processor).state = PROCESSOR_STATE_INACTIVE;
        (*processor).active_thread = core::ptr::null_mut();
        (*processor).next_thread = core::ptr::null_mut();
        (*processor).idle_thread = core::ptr::null_mut();
        (*processor).priority = THREAD_PRIORITY_LOW;
        (*processor).cpu_id = cpu_id;

        IDLE_PROCESSORS.lock(|idle| unsafe { idle.push_back(&mut (*processor).proc_list) });
    }

    PROCESSOR_COUNT.lock(|count| *count += 1);

    machine::info!("processor: created processor with cpu_id '{}': {:p}", cpu_id, processor);
    processor
}

/// The boot processor.
pub fn primary_processor() -> *mut Processor {
    PRIMARY_PROCESSOR.lock(|p| p.0)
}

/// The processor bound to the executing core.
pub fn current_processor() -> *mut Processor {
    cpu::cpu_get_processor(topology::cpu_num())
}

/// Number of created processors.
pub fn processor_count() -> usize {
    PROCESSOR_COUNT.lock(|count| *count)
}
