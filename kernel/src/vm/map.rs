//! Per-address-space virtual memory map.
//!
//! A map records which virtual ranges of its window are taken, as an ordered
//! intrusive list of entries. The allocator carves sequential ranges after
//! the last entry, backs them with physical frames through the page-table
//! builder, and can flank the body with guard pages that fault on write and
//! read back as sentinel fill.

use {
    crate::{
        defaults::PAGE_SIZE,
        list::{List, ListNode},
        list_entry,
        vm::{
            page,
            pmap::{self, Access, Pmap},
            VirtAddr,
        },
    },
    bitflags::bitflags,
    core::cell::UnsafeCell,
    machine::synchronization::{interface::Mutex, IRQSafeNullLock},
};

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

bitflags! {
    /// One namespace covers both operations: the alloc-side bits steer
    /// [`VmMap::alloc`], the entry-side bits are what
    /// [`VmMap::entry_create`] records on the entry.
    pub struct VmFlags: u32 {
        /// Install a guard page before the body.
        const GUARD_FIRST = 0b0001;
        /// Install a guard page after the body.
        const GUARD_LAST = 0b0010;
        /// Marks the kernel-image entry.
        const KERNEL_CODE = 0b0100;
        /// The recorded range is a guard page.
        const GUARD_PAGE = 0b1000;
    }
}

/// Bits [`VmMap::entry_create`] keeps on the recorded entry.
const ENTRY_FLAGS: VmFlags =
    VmFlags::from_bits_truncate(VmFlags::GUARD_PAGE.bits() | VmFlags::KERNEL_CODE.bits());

/// One allocated virtual range.
#[repr(C)]
pub struct VmMapEntry {
    pub base: VirtAddr,
    pub size: u64,
    pub flags: VmFlags,
    node: ListNode,
}

/// A virtual memory map for one address space.
pub struct VmMap {
    pmap: Pmap,
    /// Window bounds.
    pub min: VirtAddr,
    pub max: VirtAddr,
    /// Sum of all recorded entry sizes.
    pub size: u64,
    /// Not yet a real lock; becomes a ticket lock when a second CPU comes
    /// online.
    lock: bool,
    pub nentries: u32,
    entries: List,
}

// SAFETY: single-core; mutation happens under the IRQ-masking lock of the
// static holding the map.
unsafe impl Send for VmMap {}

//--------------------------------------------------------------------------------------------------
// Entry pool
//--------------------------------------------------------------------------------------------------

/// Entries are never destroyed in this scope, so they come from a bounded
/// static pool with a bump cursor.
const VM_MAP_ENTRY_MAX: usize = 64;

struct EntryPool {
    entries: UnsafeCell<[VmMapEntry; VM_MAP_ENTRY_MAX]>,
    cursor: UnsafeCell<usize>,
}

// SAFETY: single-core, only used with IRQs masked (map operations).
unsafe impl Sync for EntryPool {}

#[allow(clippy::declare_interior_mutable_const)]
const EMPTY_ENTRY: VmMapEntry = VmMapEntry {
    base: 0,
    size: 0,
    flags: VmFlags::empty(),
    node: ListNode::new(),
};

static ENTRY_POOL: EntryPool = EntryPool {
    entries: UnsafeCell::new([EMPTY_ENTRY; VM_MAP_ENTRY_MAX]),
    cursor: UnsafeCell::new(0),
};

fn entry_pool_take() -> *mut VmMapEntry {
    unsafe {
        let cursor = &mut *ENTRY_POOL.cursor.get();
        assert!(
            *cursor < VM_MAP_ENTRY_MAX,
            "vm_map: entry pool exhausted ({} entries)",
            VM_MAP_ENTRY_MAX
        );
        let entry = &mut (*ENTRY_POOL.entries.get())[*cursor] as *mut VmMapEntry;
        *cursor += 1;
        entry
    }
}

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

impl VmMap {
    pub const fn empty() -> Self {
        Self {
            pmap: Pmap::empty(),
            min: 0,
            max: 0,
            size: 0,
            lock: true,
            nentries: 0,
            entries: List::new(),
        }
    }

    /// Initialise this map, empty, over `[min, max]`, backed by `pmap`.
    pub fn create(&mut self, pmap: Pmap, min: VirtAddr, max: VirtAddr) {
        self.pmap = pmap;
        self.min = min;
        self.max = max;
        self.size = 0;
        self.nentries = 0;
        self.lock = true;
        self.entries.init();
        self.lock = false;

        machine::info!(
            "vm_map: created map for virtual range {:#x} - {:#x}",
            min,
            max
        );
    }

    fn lock_map(&mut self) {
        self.lock = true;
    }

    fn unlock_map(&mut self) {
        self.lock = false;
    }

    /// Record an entry describing an already-performed mapping. Only the
    /// entry-side flag bits are kept.
    pub fn entry_create(&mut self, base: VirtAddr, size: u64, flags: VmFlags) {
        self.lock_map();

        let entry = entry_pool_take();
        unsafe {
            (*entry).base = base;
            (*entry).size = size;
            (*entry).flags = flags & ENTRY_FLAGS;
            self.entries.push_back(&mut (*entry).node);
        }

        self.nentries += 1;
        self.size += size;

        self.unlock_map();
    }

    /// End of the last recorded entry, rounded up to a 4-byte boundary; the
    /// base the next allocation starts at.
    fn alloc_cursor(&self) -> VirtAddr {
        let last = self
            .entries
            .last()
            .expect("vm_map: alloc on a map with no entries");
        let last = unsafe { &*list_entry!(last, VmMapEntry, node) };

        machine::memory::align_up(last.base + last.size, 4)
    }

    /// Allocate `size` bytes of sequential virtual memory, mapped
    /// read-write, optionally flanked by guard pages. Returns the body base.
    ///
    /// A zero-byte body is legal; one backing page is still carved so the
    /// flanking guards enclose real memory.
    pub fn alloc(&mut self, size: u64, flags: VmFlags) -> VirtAddr {
        let root = self.pmap.tte;
        let mut vcursor = self.alloc_cursor();

        // Leading guard page: no-access mapping, sentinel filled.
        if flags.contains(VmFlags::GUARD_FIRST) {
            let frame = page::alloc();
            unsafe {
                pmap::tt_create(root, frame, vcursor, PAGE_SIZE, Access::NoAccess)
                    .expect("vm_map: guard mapping failed");
            }
            page::set_mapped(frame);
            self.entry_create(vcursor, PAGE_SIZE, VmFlags::GUARD_PAGE);
            page::fill_guard(vcursor);
            vcursor += PAGE_SIZE;
        }

        let vbase = vcursor;

        // Back the body with frames, one page-table entry each.
        let page_count = size.div_ceil(PAGE_SIZE).max(1);
        for _ in 0..page_count {
            let frame = page::alloc();
            unsafe {
                pmap::tt_create(root, frame, vcursor, PAGE_SIZE, Access::ReadWrite)
                    .expect("vm_map: body mapping failed");
            }
            page::set_mapped(frame);
            vcursor += PAGE_SIZE;
        }

        self.entry_create(vbase, page_count * PAGE_SIZE, flags & VmFlags::KERNEL_CODE);

        // Trailing guard page.
        if flags.contains(VmFlags::GUARD_LAST) {
            let frame = page::alloc();
            unsafe {
                pmap::tt_create(root, frame, vcursor, PAGE_SIZE, Access::NoAccess)
                    .expect("vm_map: guard mapping failed");
            }
            page::set_mapped(frame);
            page::fill_guard(vcursor);
            self.entry_create(vcursor, PAGE_SIZE, VmFlags::GUARD_PAGE);
        }

        vbase
    }

    /// Iterate the recorded entries in address order.
    pub fn entries(&self) -> impl Iterator<Item = &VmMapEntry> {
        self.entries
            .iter()
            .map(|node| unsafe { &*list_entry!(node, VmMapEntry, node) })
    }

    /// Debug view of this map.
    pub fn dump(&self) {
        machine::info!("vm_map: map {:p}", self as *const _);
        machine::println!("         min: {:#x}", self.min);
        machine::println!("         max: {:#x}", self.max);
        machine::println!("alloc'd size: {:#x}", self.size);
        machine::println!("       flags: lock: {}", self.lock as u32);
        machine::println!("     entries: {}", self.nentries);

        for (idx, entry) in self.entries().enumerate() {
            machine::print!(
                "  [{}]: {:#x} -> {:#x} ({} bytes)",
                idx,
                entry.base,
                entry.base + entry.size,
                entry.size
            );
            if entry.flags.contains(VmFlags::GUARD_PAGE) {
                machine::cont!("\t- GUARD_PAGE");
            } else if entry.flags.contains(VmFlags::KERNEL_CODE) {
                machine::cont!("\t- KERNEL_CODE");
            }
            machine::println!();
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Global instances
//--------------------------------------------------------------------------------------------------

/// The kernel task's map, spanning the upper-half kernel window.
static KERNEL_MAP: IRQSafeNullLock<VmMap> = IRQSafeNullLock::new(VmMap::empty());

/// Run `f` with exclusive access to the kernel map.
pub fn with_kernel_map<R>(f: impl FnOnce(&mut VmMap) -> R) -> R {
    KERNEL_MAP.lock(f)
}
