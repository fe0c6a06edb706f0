//! Tasks.
//!
//! A task groups threads: it owns the sibling-thread list and points at the
//! virtual-memory map its threads run in. The kernel task is created first
//! and owns the kernel map; every task gets a monotonic process id and a
//! place on the global task list. Tasks are never destroyed in this scope.

use {
    crate::{
        defaults::{TASK_MAX, TASK_NAME_MAX},
        kptr::KPtr,
        list::{List, ListNode},
        list_entry,
        thread::Thread,
        vm::map::{self, VmMap},
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

pub const TASK_STATE_INACTIVE: u32 = 0;
pub const TASK_STATE_ACTIVE: u32 = 1;

/// Task descriptor. Allocated from the task zone.
#[repr(C)]
pub struct Task {
    pub pid: i32,
    pub state: u32,
    pub name: [u8; TASK_NAME_MAX],

    /// The address space this task's threads run in.
    pub map: *mut VmMap,

    /// Statistics.
    pub current_time: u64,
    pub total_time: u64,

    pub priority: i32,
    pub preempt: i32,
    pub ref_count: i32,

    /// Membership in the global task list.
    pub tasks: ListNode,
    /// This task's threads.
    pub threads: List,
}

impl Task {
    /// The task name, up to the first NUL.
    pub fn name(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(TASK_NAME_MAX);
        core::str::from_utf8(&self.name[..len]).unwrap_or("<invalid>")
    }
}

//--------------------------------------------------------------------------------------------------
// Global instances
//--------------------------------------------------------------------------------------------------

static TASK_ZONE: InitStateLock<Option<ZoneId>> = InitStateLock::new(None);

/// Global task list.
static TASKS: IRQSafeNullLock<List> = IRQSafeNullLock::new(List::new());

/// Monotonic process id source.
static TASK_PID: IRQSafeNullLock<i32> = IRQSafeNullLock::new(0);

static KERNEL_TASK: IRQSafeNullLock<KPtr<Task>> = IRQSafeNullLock::new(KPtr::null());
static CURRENT_TASK: IRQSafeNullLock<KPtr<Task>> = IRQSafeNullLock::new(KPtr::null());

//--------------------------------------------------------------------------------------------------
// Private Code
//--------------------------------------------------------------------------------------------------

fn task_zone() -> ZoneId {
    TASK_ZONE.read(|z| z.expect("task zone not initialised"))
}

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

/// Create the task zone and the kernel task.
pub fn task_init() {
    TASKS.lock(|tasks| tasks.init());

    let zone = zalloc::zone_create(
        core::mem::size_of::<Task>() as u64,
        (TASK_MAX * core::mem::size_of::<Task>()) as u64,
        "task_zone",
    );
    TASK_ZONE.write(|z| *z = Some(zone));

    // The kernel task runs in the kernel map.
    let kernel_map = map::with_kernel_map(|map| map as *mut VmMap);
    let kernel_task = task_create(kernel_map, "kernel_task");

    KERNEL_TASK.lock(|t| t.0 = kernel_task);

    machine::info!("task: task_init complete");
}

/// Create a task over the given map. The task joins the global list with a
/// fresh pid and an empty sibling-thread list.
pub fn task_create(map: *mut VmMap, name: &str) -> *mut Task {
    let task = zalloc::zalloc(task_zone()) as *mut Task;

    unsafe {
        core::ptr::write_bytes(task as *mut u8, 0, core::mem::size_of::<Task>());

        (*task).ref_count = 2;
        (*task).state = TASK_STATE_INACTIVE;
        (*task).map = map;

        (*task).pid = TASK_PID.lock(|pid| {
            let assigned = *pid;
            *pid += 1;
            assigned
        });

        // Bounded name copy.
        let len = name.len().min(TASK_NAME_MAX - 1);
        (&mut (*task).name)[..len].copy_from_slice(&name.as_bytes()[..len]);

        (*task).threads.init();
        TASKS.lock(|tasks| unsafe { tasks.push_back(&mut (*task).tasks) });
    }

    task
}

/// Attach a thread to a task's sibling list and point the thread back at
/// its parent.
pub fn task_assign_thread(task: *mut Task, thread: *mut Thread) {
    unsafe {
        machine::info!(
            "task: attaching thread '{}' to task '{}'",
            (*thread).thread_id,
            (*task).name()
        );

        (*task).threads.push_back(&mut (*thread).siblings);
        (*thread).task = task;
    }
}

/// The kernel task.
pub fn kernel_task() -> *mut Task {
    KERNEL_TASK.lock(|t| t.0)
}

/// The task whose thread is currently running.
pub fn get_current_task() -> *mut Task {
    CURRENT_TASK.lock(|t| t.0)
}

pub fn set_current_task(task: *mut Task) {
    CURRENT_TASK.lock(|t| t.0 = task);
}

/// Debug view of the global task list and each task's threads.
pub fn dump_tasks() {
    machine::info!("task: dumping global task list information:");

    TASKS.lock(|tasks| {
        for node in tasks.iter() {
            let task = unsafe { &*list_entry!(node, Task, tasks) };
            machine::println!("task[{}]: pid '{}', name '{}':", task.pid, task.pid, task.name());

            if task.threads.is_empty() {
                machine::println!("    no threads on task");
                continue;
            }

            for tnode in task.threads.iter() {
                let thread = unsafe { &*list_entry!(tnode, Thread, siblings) };
                machine::println!(
                    "    thread[{}]: stack: {:#x}, entry: {:#x}",
                    thread.thread_id,
                    thread.stack,
                    thread.entry
                );
            }
        }
    });
}
