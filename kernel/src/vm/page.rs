//! Physical page allocator.
//!
//! One descriptor per frame of usable RAM, laid out contiguously in a region
//! that starts where the kernel image ends (the linker only marks the start;
//! the final size is page-count × descriptor-size, known once the memory
//! size is). Frames occupied by the kernel image and by the descriptor
//! region itself are born allocated and mapped.

use {
    crate::{
        defaults::PAGE_SIZE,
        vm::{PhysAddr, VirtAddr},
    },
    bitflags::bitflags,
    core::cell::UnsafeCell,
    machine::synchronization::{interface::Mutex, IRQSafeNullLock},
};

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

/// Written into every guard page so a post-mortem can recognise guard-page
/// memory by content.
pub const GUARD_SENTINEL: u64 = 0xefbe_adde_efbe_adde;

bitflags! {
    #[derive(Default)]
    pub struct PageFlags: u32 {
        /// Frame is handed out (or reserved for the kernel image).
        const ALLOCATED = 0b01;
        /// Frame is present in the MMU tables.
        const MAPPED = 0b10;
    }
}

/// Physical page descriptor.
#[repr(C)]
pub struct Page {
    paddr: PhysAddr,
    idx: u64,
    flags: PageFlags,
}

//--------------------------------------------------------------------------------------------------
// Private Definitions
//--------------------------------------------------------------------------------------------------

struct PageRegion {
    /// First descriptor; the linker-provided end of the kernel image.
    pages: *mut Page,
    /// Number of descriptors (== frames of managed RAM).
    count: u64,
    /// Physical base the descriptor indices are relative to.
    phys_base: PhysAddr,
    initialised: bool,
}

// SAFETY: single-core, all mutation under the IRQ-masking lock.
unsafe impl Send for PageRegion {}

//--------------------------------------------------------------------------------------------------
// Global instances
//--------------------------------------------------------------------------------------------------

static PAGE_REGION: IRQSafeNullLock<PageRegion> = IRQSafeNullLock::new(PageRegion {
    pages: core::ptr::null_mut(),
    count: 0,
    phys_base: 0,
    initialised: false,
});

extern "C" {
    static __VM_REGION_START: UnsafeCell<()>;
}

//--------------------------------------------------------------------------------------------------
// Private Code
//--------------------------------------------------------------------------------------------------

impl PageRegion {
    #[inline]
    fn page(&self, idx: u64) -> &mut Page {
        debug_assert!(idx < self.count);
        unsafe { &mut *self.pages.add(idx as usize) }
    }
}

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

/// Size in bytes of the descriptor region for `count` frames.
pub const fn region_size_for(count: u64) -> u64 {
    count * core::mem::size_of::<Page>() as u64
}

/// Create one descriptor per frame of `memsize`, all free and unmapped, then
/// re-mark the frames covering the kernel image and the descriptor region
/// itself as allocated and mapped.
pub fn bootstrap(membase: PhysAddr, memsize: u64, kernsize: u64) {
    let page_count = memsize / PAGE_SIZE;
    let region_size = region_size_for(page_count);

    machine::info!(
        "vm_page: page count: {}, descriptor region {} KiB",
        page_count,
        region_size / 1024
    );

    PAGE_REGION.lock(|region| {
        assert!(!region.initialised, "page allocator bootstrapped twice");

        region.pages = unsafe { __VM_REGION_START.get() } as *mut Page;
        region.count = page_count;
        region.phys_base = membase;

        // Descriptor state for every frame: free, unmapped.
        let mut paddr = membase;
        for idx in 0..page_count {
            let page = region.page(idx);
            page.paddr = paddr;
            page.idx = idx;
            page.flags = PageFlags::empty();
            paddr += PAGE_SIZE;
        }

        // The kernel image and this descriptor array are live memory.
        let kern_page_count = ((kernsize + region_size) / PAGE_SIZE) + 1;
        for idx in 0..kern_page_count.min(page_count) {
            region.page(idx).flags = PageFlags::ALLOCATED | PageFlags::MAPPED;
        }

        region.initialised = true;

        machine::info!(
            "vm_page: initialised descriptor region {:p}..{:#x} ({} kernel frames reserved)",
            region.pages,
            region.pages as u64 + region_size,
            kern_page_count
        );
    });
}

/// Hand out the first free frame. Fatal if none is left.
pub fn alloc() -> PhysAddr {
    PAGE_REGION.lock(|region| {
        for idx in 0..region.count {
            let page = region.page(idx);
            if !page.flags.contains(PageFlags::ALLOCATED) {
                page.flags.insert(PageFlags::ALLOCATED);
                return page.paddr;
            }
        }
        panic!("vm_page: out of physical frames");
    })
}

/// Return a frame to the allocator.
pub fn free(paddr: PhysAddr) {
    PAGE_REGION.lock(|region| {
        let idx = (paddr - region.phys_base) / PAGE_SIZE;
        assert!(idx < region.count, "vm_page: free of unmanaged frame {:#x}", paddr);

        region.page(idx).flags.remove(PageFlags::ALLOCATED);
        machine::debug!("vm_page: freed page {}: {:#x}", idx, paddr);
    });
}

/// Record that a frame is present in the MMU tables.
pub fn set_mapped(paddr: PhysAddr) {
    PAGE_REGION.lock(|region| {
        let idx = (paddr - region.phys_base) / PAGE_SIZE;
        if idx < region.count {
            region.page(idx).flags.insert(PageFlags::MAPPED);
        }
    });
}

/// Overwrite an entire page with the guard sentinel so reads after a
/// guard violation show a recognisable pattern.
pub fn fill_guard(va: VirtAddr) {
    let words = (PAGE_SIZE as usize) / core::mem::size_of::<u64>();
    let base = va as *mut u64;
    for i in 0..words {
        unsafe { base.add(i).write_volatile(GUARD_SENTINEL) };
    }
}

/// (allocated, free) census across all descriptors.
pub fn census() -> (u64, u64) {
    PAGE_REGION.lock(|region| {
        let mut allocated = 0;
        for idx in 0..region.count {
            if region.page(idx).flags.contains(PageFlags::ALLOCATED) {
                allocated += 1;
            }
        }
        (allocated, region.count - allocated)
    })
}
