//! Thread stack allocator.
//!
//! Thin wrapper over the kernel map: one virtual range per thread stack,
//! flanked by guard pages on both sides so overruns fault immediately. The
//! range bookkeeping lives in a small zone.

use {
    crate::{
        defaults::{THREAD_MAX, THREAD_STACK_SIZE},
        list::{List, ListNode},
        list_entry,
        thread::Thread,
        vm::{
            map::{self, VmFlags},
            VirtAddr,
        },
        zalloc::{self, ZoneId},
    },
    machine::synchronization::{
        interface::{Mutex, ReadWriteEx},
        IRQSafeNullLock, InitStateLock,
    },
};

//--------------------------------------------------------------------------------------------------
// Private Definitions
//--------------------------------------------------------------------------------------------------

#[repr(C)]
struct Stack {
    stack_base: VirtAddr,
    siblings: ListNode,
}

//--------------------------------------------------------------------------------------------------
// Global instances
//--------------------------------------------------------------------------------------------------

static STACK_ZONE: InitStateLock<Option<ZoneId>> = InitStateLock::new(None);
static STACKS: IRQSafeNullLock<List> = IRQSafeNullLock::new(List::new());

fn stack_zone() -> ZoneId {
    STACK_ZONE.read(|z| z.expect("stack zone not initialised"))
}

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

/// Create the stack zone.
pub fn stack_init() {
    let zone = zalloc::zone_create(
        core::mem::size_of::<Stack>() as u64,
        (THREAD_MAX * core::mem::size_of::<Stack>()) as u64,
        "stacks_zone",
    );
    STACK_ZONE.write(|z| *z = Some(zone));

    STACKS.lock(|stacks| stacks.init());

    machine::info!("stack: stack_init complete");
}

/// Allocate a guarded stack range and attach it to the thread. The thread's
/// stack pointer starts at the top of the range; stacks grow down towards
/// the leading guard page.
pub fn stack_alloc(thread: *mut Thread) {
    let stack = zalloc::zalloc(stack_zone()) as *mut Stack;

    let stack_base = map::with_kernel_map(|map| {
        map.alloc(THREAD_STACK_SIZE, VmFlags::GUARD_FIRST | VmFlags::GUARD_LAST)
    });

    unsafe {
        (*stack).stack_base = stack_base;
        STACKS.lock(|stacks| unsafe { stacks.push_back(&mut (*stack).siblings) });

        (*thread).stack_base = stack_base;
        (*thread).stack = stack_base + THREAD_STACK_SIZE;
    }
}

/// Release the stack bookkeeping for a destroyed thread. The virtual range
/// itself is not unmapped in this scope.
pub fn stack_free(thread: *mut Thread) {
    let stack_base = unsafe { (*thread).stack_base };

    machine::info!("stack: freeing stack: {:#x}", stack_base);

    STACKS.lock(|stacks| {
        for node in stacks.iter() {
            let stack = unsafe { list_entry!(node, Stack, siblings) };
            if unsafe { (*stack).stack_base } == stack_base {
                unsafe { List::remove(node) };
                zalloc::zfree(stack_zone(), stack as VirtAddr);
                break;
            }
        }
    });
}
