//! Kernel virtual memory.
//!
//! Startup happens in two stages. `arm_vm_init` runs first, on the
//! bootloader's tables: it carves the pagetable region, builds the kernel
//! and invalid root tables, maps the kernel image and the boot console, and
//! installs the new roots. `vm_configure` runs once output works: it creates
//! the physical page descriptors and the kernel task's map.

use {
    crate::{
        boot::BootArgs,
        defaults::{KERNEL_VM_MAX_ADDRESS, PAGE_SIZE, PERIPH_VIRT_BASE},
        vm::{
            map::VmFlags,
            pmap::{
                Access, TtEntry, TTE_TYPE_BLOCK, TTE_TYPE_MASK, TTE_TYPE_PAGE, TTE_TYPE_TABLE,
                TT_BLOCK_MASK, TT_PAGE_MASK, TT_TABLE_MASK,
            },
        },
    },
    machine::{
        arch::mmu::{self, TTBR_BADDR_MASK},
        synchronization::{interface::ReadWriteEx, InitStateLock},
    },
};

pub mod map;
pub mod page;
pub mod pmap;

/// A physical address.
pub type PhysAddr = u64;
/// A virtual address.
pub type VirtAddr = u64;

//--------------------------------------------------------------------------------------------------
// Private Definitions
//--------------------------------------------------------------------------------------------------

#[derive(Clone, Copy)]
struct VmGlobals {
    memory_phys_base: PhysAddr,
    memory_phys_size: u64,
    memory_virt_base: VirtAddr,

    kernel_phys_base: PhysAddr,
    kernel_phys_size: u64,
    kernel_virt_base: VirtAddr,
}

//--------------------------------------------------------------------------------------------------
// Global instances
//--------------------------------------------------------------------------------------------------

static VM: InitStateLock<VmGlobals> = InitStateLock::new(VmGlobals {
    memory_phys_base: 0,
    memory_phys_size: 0,
    memory_virt_base: 0,
    kernel_phys_base: 0,
    kernel_phys_size: 0,
    kernel_virt_base: 0,
});

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

/// Translate a managed physical address to its kernel virtual alias.
pub fn ptokva(paddr: PhysAddr) -> VirtAddr {
    VM.read(|vm| paddr - vm.memory_phys_base + vm.memory_virt_base)
}

/// Whether a virtual address currently translates.
pub fn is_address_valid(va: VirtAddr) -> bool {
    mmu::kvtop(va).is_some()
}

/// Initialise the kernel pagetables and pmap structures, map the kernel
/// image and the boot console, and take over from the bootloader's tables.
///
/// # Safety
///
/// - Must run once, on the boot CPU, before the console or any allocator.
pub unsafe fn arm_vm_init(args: &BootArgs, membase: PhysAddr, memsize: u64) {
    assert!(membase > 0 && memsize > 0);

    VM.write(|vm| {
        vm.memory_phys_base = args.physbase;
        vm.memory_phys_size = memsize;
        vm.memory_virt_base = args.virtbase;

        vm.kernel_virt_base = args.virtbase;
        vm.kernel_phys_base = args.kernbase;
        vm.kernel_phys_size = args.kernsize;
    });

    // The pagetables region replaces the bootstrap pagetables.
    pmap::ptregion_create().expect("pagetable region double-init");

    let kernel = pmap::kernel_pmap_create(args.virtbase, KERNEL_VM_MAX_ADDRESS);
    let invalid = pmap::invalid_pmap_create();

    // Two regions to map before the rest of the virtual memory system comes
    // up: the kernel itself, at the same virtual base the reset vector used,
    // and the console, at the fixed peripheral window.
    pmap::tt_create(
        kernel.tte,
        args.kernbase,
        args.virtbase,
        args.kernsize,
        Access::ReadWrite,
    )
    .expect("kernel image mapping failed");

    pmap::tt_create(
        kernel.tte,
        args.uartbase,
        PERIPH_VIRT_BASE,
        args.uartsize,
        Access::ReadWrite,
    )
    .expect("console mapping failed");

    // Switch the MMU over: kernel root in the upper half, empty root in the
    // lower half so any low access faults.
    mmu::set_tt_base_alt(kernel.ttep & TTBR_BADDR_MASK);
    mmu::set_tt_base(invalid.ttep & TTBR_BADDR_MASK);
}

/// Configure the main virtual-memory interfaces: physical page descriptors
/// for all of usable RAM, then the kernel task's map with its kernel-code
/// entry.
pub fn vm_configure() {
    let (kern_base, mem_size, kern_size, virt_base) = VM.read(|vm| {
        (
            vm.kernel_phys_base,
            vm.memory_phys_size,
            vm.kernel_phys_size,
            vm.kernel_virt_base,
        )
    });

    page::bootstrap(kern_base, mem_size, kern_size);

    map::with_kernel_map(|map| {
        map.create(pmap::kernel_pmap(), virt_base, KERNEL_VM_MAX_ADDRESS);
        map.entry_create(virt_base, kern_size, VmFlags::KERNEL_CODE);
    });
}

//--------------------------------------------------------------------------------------------------
// Pagetable walks (debug)
//--------------------------------------------------------------------------------------------------

fn print_padding(n: usize) {
    for _ in 0..n {
        machine::cont!("\t");
    }
}

/// Walk one table: decode each entry, print blocks and pages, recurse into
/// tables until the last level.
fn pagetable_walk_inner(table_base: *const TtEntry, level: u32, padding: usize) {
    for idx in 0..(PAGE_SIZE / 8) as usize {
        let entry = unsafe { *table_base.add(idx) };
        let tte_type = entry & TTE_TYPE_MASK;

        if tte_type == TTE_TYPE_TABLE && level < 3 {
            let table_address = ptokva(entry & TT_TABLE_MASK);
            print_padding(padding);
            machine::cont!(
                "Level {} [{}]: Table descriptor @ {:#x}:\n",
                level,
                idx,
                entry & TT_TABLE_MASK
            );
            pagetable_walk_inner(table_address as *const TtEntry, level + 1, padding + 1);
            continue;
        }

        if tte_type == TTE_TYPE_BLOCK {
            let block_address = ptokva(entry & TT_BLOCK_MASK);
            print_padding(padding);
            machine::cont!(
                "Level {} [{}]: Block descriptor: {:#x} (mapped to {:#x})\n",
                level,
                idx,
                entry & TT_BLOCK_MASK,
                block_address
            );
            continue;
        }

        if tte_type == TTE_TYPE_PAGE {
            let page_address = entry & TT_PAGE_MASK;
            print_padding(padding);
            machine::cont!("Level {} [{}]: Page descriptor: {:#x}\n", level, idx, page_address);
        }
    }
}

/// Dump the upper-half (TTBR1) translation tables.
pub fn pagetable_walk_ttbr1() {
    let table_base = ptokva(mmu::tt_base_alt() & TTBR_BADDR_MASK);
    pagetable_walk_inner(table_base as *const TtEntry, 1, 0);
}

/// Dump the lower-half (TTBR0) translation tables.
pub fn pagetable_walk_ttbr0() {
    let table_base = ptokva(mmu::tt_base() & TTBR_BADDR_MASK);
    pagetable_walk_inner(table_base as *const TtEntry, 1, 0);
}

/// Dump an arbitrary table from `level` down.
pub fn pagetable_walk(table: *const TtEntry, level: u32) {
    pagetable_walk_inner(table, level, 0);
}
