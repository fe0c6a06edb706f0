//! Threads.
//!
//! A thread owns a saved register context and a stack, and shares the
//! resources of its parent task. The context block must stay the first
//! field of the descriptor - the context-switch assembly indexes from the
//! thread pointer with zero offset - which is asserted at compile time.

use {
    crate::{
        cpu,
        defaults::{THREAD_MAX, THREAD_NAME_MAX},
        list::{List, ListNode},
        list_entry,
        sched::{self, CpuContext},
        stack,
        task::{self, Task},
        vm::VirtAddr,
        zalloc::{self, ZoneId},
    },
    machine::synchronization::{
        interface::{Mutex, ReadWriteEx},
        IRQSafeNullLock, InitStateLock,
    },
    static_assertions::const_assert_eq,
};

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

pub const THREAD_STATE_INACTIVE: u32 = 0;
pub const THREAD_STATE_ACTIVE: u32 = 1;

/// The kernel thread must be created first and carries this id.
pub const THREAD_ID_KERNEL: i32 = 0;

pub const THREAD_PRIORITY_MAX: i32 = 4;
pub const THREAD_PRIORITY_LOW: i32 = 0;

/// A thread entry point. Entered with the thread argument in the first
/// argument register; never returns.
pub type ThreadEntry = extern "C" fn(arg: u64) -> !;

/// Thread descriptor. Allocated from the thread zone.
#[repr(C)]
pub struct Thread {
    /// Callee-saved register context. The scheduler saves the callee
    /// registers here instead of on the stack; MUST be the first field.
    pub context: CpuContext,

    pub stack_base: VirtAddr,
    pub stack: VirtAddr,

    /// Thread identifier.
    pub thread_id: i32,

    /// Sibling of the parent task's thread list.
    pub siblings: ListNode,
    /// Member of the global thread list.
    pub threads: ListNode,

    /// Parent task.
    pub task: *mut Task,

    /// Entry point on first execution; re-entry point (saved ELR) after.
    pub entry: u64,
    pub args: u64,

    /// Preemption counter.
    pub preempt: i32,

    pub state: u32,

    pub ref_count: i32,

    pub name: [u8; THREAD_NAME_MAX],
}

// The save/restore assembly depends on this layout.
const_assert_eq!(core::mem::offset_of!(Thread, context), 0);

impl Thread {
    /// The thread name, up to the first NUL.
    pub fn name(&self) -> &str {
        let len = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(THREAD_NAME_MAX);
        core::str::from_utf8(&self.name[..len]).unwrap_or("<invalid>")
    }
}

//--------------------------------------------------------------------------------------------------
// Global instances
//--------------------------------------------------------------------------------------------------

static THREAD_ZONE: InitStateLock<Option<ZoneId>> = InitStateLock::new(None);

/// Global thread list, in creation order. The scheduler's round-robin walks
/// this.
static THREADS: IRQSafeNullLock<List> = IRQSafeNullLock::new(List::new());

/// Monotonic thread id source.
static THREAD_ID_NEXT: IRQSafeNullLock<i32> = IRQSafeNullLock::new(0);

//--------------------------------------------------------------------------------------------------
// Private Code
//--------------------------------------------------------------------------------------------------

fn thread_zone() -> ZoneId {
    THREAD_ZONE.read(|z| z.expect("thread zone not initialised"))
}

/// Prepare a fresh thread's context so that first entry jumps to `entry`.
fn thread_init_context(thread: *mut Thread, entry: u64) {
    unsafe {
        (*thread).entry = entry;
    }
}

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

/// Create the thread zone and initialise the stack allocator.
pub fn thread_init() {
    THREADS.lock(|threads| threads.init());

    let zone = zalloc::zone_create(
        core::mem::size_of::<Thread>() as u64,
        (THREAD_MAX * core::mem::size_of::<Thread>()) as u64,
        "thread_zone",
    );
    THREAD_ZONE.write(|z| *z = Some(zone));

    stack::stack_init();
}

/// Run `f` against the global thread list.
pub fn with_thread_list<R>(f: impl FnOnce(&mut List) -> R) -> R {
    THREADS.lock(f)
}

/// Create a thread with the given entry point and scheduler priority, and
/// assign it to the task. The priority is recorded by the caller's choice
/// of processor but not yet consulted for selection.
pub fn thread_create(
    parent_task: *mut Task,
    _priority: i32,
    entry: ThreadEntry,
    name: &str,
) -> *mut Thread {
    let thread = zalloc::zalloc(thread_zone()) as *mut Thread;

    unsafe {
        core::ptr::write_bytes(thread as *mut u8, 0, core::mem::size_of::<Thread>());

        (*thread).state = THREAD_STATE_INACTIVE;
        (*thread).ref_count = 2;
        (*thread).preempt = 0;

        (*thread).thread_id = THREAD_ID_NEXT.lock(|id| {
            let assigned = *id;
            *id += 1;
            assigned
        });

        // One stack per thread, guard pages on both sides.
        stack::stack_alloc(thread);

        thread_init_context(thread, entry as usize as u64);

        task::task_assign_thread(parent_task, thread);

        THREADS.lock(|threads| unsafe { threads.push_back(&mut (*thread).threads) });

        thread_set_name(thread, name);

        // The thread can be considered active from this point.
        (*thread).state = THREAD_STATE_ACTIVE;
    }

    thread
}

/// Create the kernel thread. It must be the first thread created; anything
/// else is a fatal configuration error.
pub fn kernel_thread_create(entry: ThreadEntry, priority: i32, args: u64) -> *mut Thread {
    let thread = thread_create(task::kernel_task(), priority, entry, "kthread_main");

    unsafe {
        if (*thread).thread_id != THREAD_ID_KERNEL {
            panic!("kernel_thread_create: kernel thread not created first");
        }

        (*thread).args = args;
        (*thread).state = THREAD_STATE_ACTIVE;

        machine::info!(
            "thread: created kernel thread {:p} at entry: {:#x}",
            thread,
            (*thread).entry
        );
    }

    thread
}

/// Destroy a thread: deactivate it, unlink it from its task and the global
/// list, release its stack and its zone slot. Destroying the running thread
/// is a fatal programming error. Takes effect at the thread's next
/// would-be selection - the scheduler skips inactive threads.
pub fn thread_destroy(thread: *mut Thread) {
    // Cannot be interrupted while doing this.
    thread_block();

    unsafe {
        if thread == cpu::cpu_get_current().cpu_active_thread {
            panic!("cannot destroy active thread");
        }

        machine::debug!(
            "thread: destroying {} ({}.{})",
            (*thread).name(),
            (*(*thread).task).name(),
            (*thread).thread_id
        );

        // Deactivate first so the scheduler will ignore it.
        (*thread).state = THREAD_STATE_INACTIVE;

        List::remove(&mut (*thread).siblings);
        List::remove(&mut (*thread).threads);

        stack::stack_free(thread);

        machine::info!(
            "thread: destroyed thread ({}.{})",
            (*(*thread).task).name(),
            (*thread).thread_id
        );

        zalloc::zfree(thread_zone(), thread as VirtAddr);
    }

    thread_unblock();
}

/// Hold the scheduler off the current thread until [`thread_unblock`].
pub fn thread_block() {
    unsafe { machine::arch::asynchronous::local_irq_mask() };
}

/// Release a [`thread_block`].
pub fn thread_unblock() {
    unsafe { machine::arch::asynchronous::local_irq_unmask() };
}

/// Reset the name of a thread, truncated to the name field.
pub fn thread_set_name(thread: *mut Thread, name: &str) {
    let len = name.len().min(THREAD_NAME_MAX - 1);
    unsafe {
        (*thread).name = [0; THREAD_NAME_MAX];
        (&mut (*thread).name)[..len].copy_from_slice(&name.as_bytes()[..len]);
    }
}

/// Load the context of a thread onto the current CPU. This switches to the
/// thread and does not return.
///
/// x19 holds the address the thread (re-)enters at, x20 the argument to
/// pass on first execution. The link register is pointed at the scheduler
/// trampoline, which completes the switch before handing over.
pub fn thread_load_context(thread: *mut Thread) -> ! {
    unsafe {
        machine::debug!(
            "thread: load_context: entry: {:#x}, stack: {:#x}",
            (*thread).entry,
            (*thread).stack
        );

        (*thread).context.x19 = (*thread).entry;
        (*thread).context.x20 = (*thread).args;
        (*thread).context.sp = (*thread).stack;
        (*thread).context.lr = sched::fork64_return_addr();
    }

    sched::fork64_exec(thread)
}

/// Save the interrupted CPU context into the outgoing thread, using the
/// frame the exception entry built. The exception link register becomes the
/// thread's re-entry point.
pub fn thread_save_context(thread: *mut Thread, frame: &crate::exception::ExceptionFrame) {
    unsafe {
        (*thread).context.x19 = frame.regs[19];
        (*thread).context.x20 = frame.regs[20];
        (*thread).context.x21 = frame.regs[21];
        (*thread).context.x22 = frame.regs[22];
        (*thread).context.x23 = frame.regs[23];
        (*thread).context.x24 = frame.regs[24];
        (*thread).context.x25 = frame.regs[25];
        (*thread).context.x26 = frame.regs[26];
        (*thread).context.x27 = frame.regs[27];
        (*thread).context.x28 = frame.regs[28];

        (*thread).context.fp = frame.fp;
        (*thread).context.sp = frame.sp;

        (*thread).entry = frame.elr;
        (*thread).stack = (*thread).context.sp;
    }
}

/// Debug view of the global thread list.
pub fn dump_threads() {
    machine::debug!("thread: dumping global thread list information:");

    THREADS.lock(|threads| {
        for node in threads.iter() {
            let thread = unsafe { &*list_entry!(node, Thread, threads) };
            machine::debug!(
                "thread[{}]: id '{}', task name '{}'",
                thread.thread_id,
                thread.thread_id,
                unsafe { (*thread.task).name() }
            );
        }
    });
}

//--------------------------------------------------------------------------------------------------
// Testing
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn set_name_copies_and_terminates() {
        let mut t: Thread = unsafe { core::mem::zeroed() };
        thread_set_name(&mut t, "test_thread_1");

        assert_eq!(t.name(), "test_thread_1");
    }

    #[test_case]
    fn set_name_truncates_long_names() {
        let mut t: Thread = unsafe { core::mem::zeroed() };
        let long = core::str::from_utf8(&[b'a'; 100]).unwrap();
        thread_set_name(&mut t, long);

        assert_eq!(t.name().len(), THREAD_NAME_MAX - 1);
    }

    #[test_case]
    fn fresh_thread_is_inactive() {
        let t: Thread = unsafe { core::mem::zeroed() };
        assert_eq!(t.state, THREAD_STATE_INACTIVE);
    }
}
