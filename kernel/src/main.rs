#![no_std]
#![no_main]

//! Kernel startup.
//!
//! Entered from the bootloader's assembly bring-up with the physical
//! address of the boot-arguments record in x0. Execution continues here
//! until virtual memory and tasking are set up, then jumps to the kernel
//! thread and never returns.

use {
    core::{
        cell::UnsafeCell,
        sync::atomic::{AtomicBool, AtomicI32, Ordering},
    },
    libkestrel::{
        boot::BootArgs,
        cpu, exception, irq, panic, processor, task,
        thread::{self, THREAD_PRIORITY_LOW, THREAD_PRIORITY_MAX},
        timer, topology, version, vm, zalloc,
    },
    machine::{info, println},
};

//--------------------------------------------------------------------------------------------------
// Boot-core stacks (linker script symbols)
//--------------------------------------------------------------------------------------------------

extern "C" {
    static __INTSTACK_TOP: UnsafeCell<()>;
    static __EXCEPSTACK_TOP: UnsafeCell<()>;
}

#[panic_handler]
fn panicked(info: &core::panic::PanicInfo) -> ! {
    panic::handler(info)
}

//--------------------------------------------------------------------------------------------------
// Private Code
//--------------------------------------------------------------------------------------------------

/// The platform's usable DRAM, from the device tree `memory@*` node; the
/// boot arguments are the fallback when the node is absent.
fn platform_get_memory(args: &BootArgs) -> (u64, u64) {
    let dt = machine::device_tree::device_tree();

    for node in dt.root().children() {
        let Ok(name) = node.name() else { continue };
        if !name.starts_with("memory") {
            continue;
        }
        if let Ok(Some(reg)) = machine::device_tree::find_prop(&node, "reg") {
            let reg = machine::device_tree::DeviceTreeProp::new(reg);
            if let Some((base, size)) = reg.payload_pairs_iter().next() {
                return (base, size);
            }
        }
    }

    (args.physbase, args.memsize)
}

//--------------------------------------------------------------------------------------------------
// Kernel entry
//--------------------------------------------------------------------------------------------------

/// The kernel enters here from the bootloader and completes the necessary
/// setup until the kernel task can be launched.
///
/// # Safety
///
/// - Called exactly once, on the boot CPU, with a valid boot-arguments
///   record.
#[no_mangle]
pub unsafe extern "C" fn kernel_init(boot_args: *mut BootArgs, _x1: u64, _x2: u64) -> ! {
    // Initialise the cpu data for the boot cpu. Uses the bootloader's
    // translation tables, which are still live.
    let mut boot_cpu = cpu::cpu_create(
        __EXCEPSTACK_TOP.get() as u64,
        __INTSTACK_TOP.get() as u64,
    );

    // Verify the boot parameters.
    let args = &mut *boot_args;
    args.verify();

    // Convert the fdt base to a kernel virtual address.
    if args.fdtbase < args.virtbase {
        args.fdtbase = args.virtbase + (args.fdtbase - args.physbase);
    }

    // Initialise the device tree.
    machine::device_tree::init(args.fdtbase as *const u8).expect("device tree init failed");

    // Update the address of the boot args record itself.
    let args_va = args.virtbase + (boot_args as u64 - args.physbase);
    let args = &mut *(args_va as *mut BootArgs);

    // Fetch the platform memory layout and set up virtual memory.
    let (membase, memsize) = platform_get_memory(args);
    vm::arm_vm_init(args, membase, memsize);

    // Initialise the console.
    machine::platform::console_init();

    // Take over the exception vectors; from here on faults decode properly.
    exception::handling_init();

    // Parse the machine cpu topology.
    topology::parse_cpu_topology().expect("cpu topology parse failed");
    boot_cpu.cpu_num = topology::boot_cpu_num();
    assert!(boot_cpu.cpu_num <= topology::max_cpu_num());

    cpu::cpu_register(&boot_cpu);
    cpu::cpu_set_boot_cpu(&boot_cpu);

    // Boot banner.
    println!(
        "Booting Kestrel on Physical CPU: {:#010x} [{:#x}]",
        boot_cpu.cpu_num, kernel_init as usize
    );
    println!("Kestrel Kernel Version {}", version::KERNEL_BUILD_VERSION);
    println!("loader version: {}", args.loader_version());

    println!("machine: {}", topology::machine_name());
    println!(
        "machine: detected '{}' cpus across '{}' clusters",
        topology::num_cpus(),
        topology::num_clusters()
    );

    // Configure the remaining virtual memory subsystems.
    vm::vm_configure();

    // Configure the zone allocator.
    zalloc::zone_init();

    // Enable interrupts.
    irq::machine_init_interrupts();

    // Processor init.
    processor::processor_init();

    // Task init, creates the kernel_task.
    task::task_init();

    // Thread init.
    thread::thread_init();

    // Create the main kernel thread.
    let kthread = thread::kernel_thread_create(kernel_thread_main, THREAD_PRIORITY_MAX, 0);
    println!("kthread created");

    task::dump_tasks();
    vm::pagetable_walk_ttbr1();

    thread::thread_load_context(kthread)

    /* NOTREACHED */
}

//--------------------------------------------------------------------------------------------------
// Kernel thread
//--------------------------------------------------------------------------------------------------

// The dummy threads below exercise the context-switching logic until the
// kernel has a real use for its threads.

static COUNTER: AtomicI32 = AtomicI32::new(0);
static THREAD_DESTROYED: AtomicBool = AtomicBool::new(false);

fn delay(mut interval: i64) {
    while interval > 0 {
        core::hint::spin_loop();
        interval -= 1;
    }
}

/// First thread of the kernel task.
extern "C" fn kernel_thread_main(_arg: u64) -> ! {
    info!("kthread: kernel_task: kernel_init complete");

    // Allow cpu_active_thread to be accessed.
    cpu::cpu_set_flag(topology::cpu_num(), cpu::CPU_FLAG_THREADING_ENABLED);

    // Create dummy threads.
    let test_thread = thread::thread_create(
        task::kernel_task(),
        THREAD_PRIORITY_LOW,
        test_thread_1,
        "test_thread_1",
    );

    thread::dump_threads();

    // Initialise timers to allow for scheduling.
    timer::machine_init_timers();

    let cpu = cpu::cpu_get_current();
    let thread = cpu.cpu_active_thread;
    unsafe {
        info!(
            "kthread: cpu[{}]: {}.{}",
            cpu.cpu_num,
            (*(*thread).task).name(),
            (*thread).thread_id
        );
    }

    loop {
        delay(70_000_000);

        info!("kthread: kthread_main: hello world");

        if COUNTER.load(Ordering::Relaxed) >= 5 && !THREAD_DESTROYED.load(Ordering::Relaxed) {
            thread::thread_destroy(test_thread);
            THREAD_DESTROYED.store(true, Ordering::Relaxed);

            thread::dump_threads();
        }
    }
}

extern "C" fn test_thread_1(_arg: u64) -> ! {
    info!("kthread: test_thread_1: initialised");
    loop {
        delay(140_000_000);

        info!(
            "kthread: still alive: {}",
            COUNTER.load(Ordering::Relaxed)
        );
        COUNTER.fetch_add(1, Ordering::Relaxed);
    }
}
