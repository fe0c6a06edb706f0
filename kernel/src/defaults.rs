//! Kernel default / tunable values.

/// Translation granule and page size.
pub const PAGE_SIZE: u64 = 4096;

/// Base of the upper-half kernel window. Must match the linker script and
/// the bootloader's reset-vector mapping.
pub const KERNEL_VIRT_BASE: u64 = machine::platform::memory::KERNEL_VIRT_BASE;

/// Largest virtual address the kernel map will hand out.
pub const KERNEL_VM_MAX_ADDRESS: u64 = 0xffff_fff3_ffff_ffff;

/// Virtual base the boot console is mapped at.
pub const PERIPH_VIRT_BASE: u64 = machine::platform::memory::PERIPH_VIRT_BASE;

/// Virtual base the interrupt-controller regions are mapped at.
pub const GIC_VIRT_BASE: u64 = machine::platform::memory::GIC_VIRT_BASE;

/// When enabled, the page-table builder descends to level-3 page entries;
/// when disabled, level-2 slots become 2 MiB block entries directly.
pub const VM_USE_L3_TABLES: bool = false;

/// Per-thread kernel stack size.
pub const THREAD_STACK_SIZE: u64 = PAGE_SIZE;

/// Bounded maxima the zones are sized against.
pub const CPU_MAX: usize = 16;
pub const CLUSTER_MAX: usize = 4;
pub const TASK_MAX: usize = 16;
pub const THREAD_MAX: usize = 24;

/// Maximum length of task and thread names.
pub const TASK_NAME_MAX: usize = 64;
pub const THREAD_NAME_MAX: usize = 64;

/// Countdown programmed into the per-CPU timer on init and on every tick.
pub const TIMER_RESET_VALUE: u64 = 0x500_0000;

/// Work around flattened-tree lookups failing for multi-component paths once
/// the kernel runs at high virtual addresses: resolve `/cpus` and then find
/// `cpu-map` by iterating its children.
pub const FDT_HIGH_VA_WORKAROUND: bool = true;
