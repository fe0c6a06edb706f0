//! Physical map: translation-table construction and the pagetable region.
//!
//! The kernel's own tables are built here, long before any allocator exists:
//! intermediate and root tables are bump-allocated page-by-page from a fixed
//! region the linker reserves inside the image, which removes any recursion
//! between the table builder and the page allocator. The region is sized
//! once, against the maximum fan-out of the mapped window; running it dry is
//! a fatal configuration error.

use {
    crate::{
        defaults::{KERNEL_VIRT_BASE, PAGE_SIZE, VM_USE_L3_TABLES},
        vm::{ptokva, PhysAddr, VirtAddr},
    },
    core::cell::UnsafeCell,
    machine::synchronization::{interface::Mutex, IRQSafeNullLock},
    snafu::Snafu,
    tock_registers::{fields::FieldValue, register_bitfields},
};

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

/// A translation-table entry is a 64-bit word.
pub type TtEntry = u64;

/// Access permissions applied to a mapping.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Guard mapping: readable only so post-mortems can inspect the sentinel
    /// fill, never writable, never executable.
    NoAccess,
    ReadOnly,
    ReadWrite,
}

/// Couples a root translation table to the address-space window it governs.
///
/// Two of these exist: the kernel pmap (installed in TTBR1, upper half) and
/// the invalid pmap (installed in TTBR0 so any low-half access faults).
#[derive(Clone, Copy)]
pub struct Pmap {
    /// Root table, virtual.
    pub tte: *mut TtEntry,
    /// Root table, physical.
    pub ttep: PhysAddr,
    /// Smallest virtual address this root governs.
    pub min: VirtAddr,
    /// Largest virtual address this root governs.
    pub max: VirtAddr,
    /// Address-space identifier.
    pub asid: u8,
}

// SAFETY: single-core; pmaps are created during init and read-only after.
unsafe impl Send for Pmap {}

impl Pmap {
    pub const fn empty() -> Self {
        Self {
            tte: core::ptr::null_mut(),
            ttep: 0,
            min: 0,
            max: 0,
            asid: 0,
        }
    }
}

/// Errors from the table builder.
#[derive(Debug, Snafu)]
pub enum Error {
    /// The pagetable region can only be carved once.
    #[snafu(display("pagetable region already initialised"))]
    AlreadyInitialised,

    /// Refuse to map physical addresses that collide with the kernel window.
    #[snafu(display("physical base {:#x} above the kernel virtual base", pbase))]
    PhysAboveKernelBase { pbase: PhysAddr },
}

//--------------------------------------------------------------------------------------------------
// Translation-table entry encoding
//--------------------------------------------------------------------------------------------------

register_bitfields! {
    u64,
    // AArch64 stage-1 descriptor, 4 KiB granule.
    TTE [
        /// Unprivileged execute-never.
        UXN OFFSET(54) NUMBITS(1) [],
        /// Privileged execute-never.
        PXN OFFSET(53) NUMBITS(1) [],
        /// Access flag; pre-set on every emitted entry to avoid
        /// first-access faults.
        AF OFFSET(10) NUMBITS(1) [],
        /// Shareability.
        SH OFFSET(8) NUMBITS(2) [
            Outer = 0b10,
            Inner = 0b11
        ],
        /// Access permissions.
        AP OFFSET(6) NUMBITS(2) [
            RwEl1 = 0b00,
            RoEl1 = 0b10
        ],
        /// MAIR_EL1 attribute index.
        AttrIndx OFFSET(2) NUMBITS(3) [],
        /// Level 0-2: block (0) or table (1). Level 3: 1 marks a page entry.
        TYPE OFFSET(1) NUMBITS(1) [
            Block = 0,
            Table = 1
        ],
        VALID OFFSET(0) NUMBITS(1) []
    ]
}

/// Entry type bits.
pub const TTE_TYPE_MASK: u64 = 0x3;
pub const TTE_TYPE_TABLE: u64 = 0x3;
pub const TTE_TYPE_BLOCK: u64 = 0x1;
pub const TTE_TYPE_PAGE: u64 = 0x3;

/// Address fields of the three entry kinds.
pub const TT_TABLE_MASK: u64 = 0x0000_ffff_ffff_f000;
pub const TT_BLOCK_MASK: u64 = 0x0000_ffff_ffe0_0000;
pub const TT_PAGE_MASK: u64 = 0x0000_ffff_ffff_f000;

/// Per-level virtual-address decomposition.
pub const TT_L1_INDEX_MASK: u64 = 0x0000_007f_c000_0000;
pub const TT_L1_SHIFT: u64 = 30;
pub const TT_L1_SIZE: u64 = 0x4000_0000;

pub const TT_L2_INDEX_MASK: u64 = 0x0000_0000_3fe0_0000;
pub const TT_L2_SHIFT: u64 = 21;
pub const TT_L2_SIZE: u64 = 0x0020_0000;

pub const TT_L3_INDEX_MASK: u64 = 0x0000_0000_001f_f000;
pub const TT_L3_SHIFT: u64 = 12;
pub const TT_L3_SIZE: u64 = 0x0000_1000;

/// Entries per 4 KiB table.
const TTE_PER_TABLE: u64 = PAGE_SIZE / 8;

fn access_fields(access: Access) -> FieldValue<u64, TTE::Register> {
    match access {
        Access::NoAccess => TTE::AP::RoEl1 + TTE::PXN::SET + TTE::UXN::SET,
        Access::ReadOnly => TTE::AP::RoEl1 + TTE::PXN::CLEAR + TTE::UXN::SET,
        Access::ReadWrite => TTE::AP::RwEl1 + TTE::PXN::CLEAR + TTE::UXN::SET,
    }
}

/// Leaf template: valid, access flag pre-set, inner-shareable, attribute 0.
fn leaf_template(kind: FieldValue<u64, TTE::Register>, access: Access) -> u64 {
    (TTE::VALID::SET + TTE::AF::SET + TTE::SH::Inner + TTE::AttrIndx.val(0) + kind
        + access_fields(access))
        .value
}

/// A level-2 block entry mapping 2 MiB at `pa`.
pub(crate) fn block_entry(pa: PhysAddr, access: Access) -> TtEntry {
    leaf_template(TTE::TYPE::Block, access) | (pa & TT_BLOCK_MASK)
}

/// A level-3 page entry mapping 4 KiB at `pa`.
pub(crate) fn page_entry(pa: PhysAddr, access: Access) -> TtEntry {
    leaf_template(TTE::TYPE::Table, access) | (pa & TT_PAGE_MASK)
}

/// A table entry pointing at the next-level table at `pa`.
pub(crate) fn table_entry(pa: PhysAddr) -> TtEntry {
    (pa & TT_TABLE_MASK) | TTE_TYPE_TABLE
}

//--------------------------------------------------------------------------------------------------
// Pagetable region
//--------------------------------------------------------------------------------------------------

struct PtRegion {
    cursor: VirtAddr,
    end: VirtAddr,
    initialised: bool,
}

static PT_REGION: IRQSafeNullLock<PtRegion> = IRQSafeNullLock::new(PtRegion {
    cursor: 0,
    end: 0,
    initialised: false,
});

extern "C" {
    static __PT_REGION_START: UnsafeCell<()>;
    static __PT_REGION_END: UnsafeCell<()>;
}

/// Carve the pagetable region. Performed once, during virtual-memory init.
pub fn ptregion_create() -> Result<(), Error> {
    PT_REGION.lock(|region| {
        if region.initialised {
            return Err(Error::AlreadyInitialised);
        }

        region.cursor = unsafe { __PT_REGION_START.get() } as VirtAddr;
        region.end = unsafe { __PT_REGION_END.get() } as VirtAddr;
        region.initialised = true;

        machine::info!(
            "pmap: initialised pagetables region: {:#x} - {:#x}",
            region.cursor,
            region.end
        );
        Ok(())
    })
}

/// Take one page from the pagetable region for a new table, zeroed.
/// Exhaustion is fatal: the region is sized against the kernel window.
pub fn ptregion_alloc() -> VirtAddr {
    let vaddr = PT_REGION.lock(|region| {
        let vaddr = region.cursor;
        region.cursor += PAGE_SIZE;
        assert!(
            region.cursor <= region.end,
            "pmap: translation-table region exhausted"
        );
        vaddr
    });

    // Fresh tables must read as all-invalid.
    unsafe { core::ptr::write_bytes(vaddr as *mut u8, 0, PAGE_SIZE as usize) };
    vaddr
}

//--------------------------------------------------------------------------------------------------
// Translation-table construction
//--------------------------------------------------------------------------------------------------

/// Translate a kernel virtual address to physical via the live MMU.
/// Fatal if the address does not translate: the builder only ever hands it
/// addresses inside the mapped image.
fn kvtop(va: VirtAddr) -> PhysAddr {
    machine::arch::mmu::kvtop(va)
        .unwrap_or_else(|| panic!("pmap: kvtop failed for {:#x}", va))
}

/// Walk one next-level table slot: descend into an existing table or link in
/// a freshly allocated one.
unsafe fn descend(slot: *mut TtEntry) -> *mut TtEntry {
    if (*slot & TTE_TYPE_MASK) != TTE_TYPE_TABLE {
        let table_va = ptregion_alloc();
        *slot = table_entry(kvtop(table_va));
        table_va as *mut TtEntry
    } else {
        ptokva(*slot & TT_TABLE_MASK) as *mut TtEntry
    }
}

/// Install mappings translating `[vbase, vbase + size)` to `pbase` onward in
/// the table rooted at `root`.
///
/// Level-1 slots descend to level-2 tables; level-2 slots become 2 MiB block
/// entries, or descend to level-3 page entries when so configured.
///
/// # Safety
///
/// - `root` must point at a live root table from the pagetable region.
pub unsafe fn tt_create(
    root: *mut TtEntry,
    pbase: PhysAddr,
    vbase: VirtAddr,
    size: u64,
    access: Access,
) -> Result<(), Error> {
    if pbase > KERNEL_VIRT_BASE {
        return Err(Error::PhysAboveKernelBase { pbase });
    }

    let vend = vbase + size;

    let mut map_address = vbase;
    while map_address < vend {
        let l1_index = ((map_address & TT_L1_INDEX_MASK) >> TT_L1_SHIFT) as usize;
        debug_assert!((l1_index as u64) < TTE_PER_TABLE);
        let l2_table = descend(root.add(l1_index));

        let mut map_address_l2 = map_address;
        while map_address_l2 < map_address + TT_L1_SIZE && map_address_l2 < vend {
            let l2_index = ((map_address_l2 & TT_L2_INDEX_MASK) >> TT_L2_SHIFT) as usize;

            if VM_USE_L3_TABLES {
                let l3_table = descend(l2_table.add(l2_index));

                let mut map_address_l3 = map_address_l2;
                while map_address_l3 < map_address_l2 + TT_L2_SIZE && map_address_l3 < vend {
                    let l3_index =
                        ((map_address_l3 & TT_L3_INDEX_MASK) >> TT_L3_SHIFT) as usize;
                    *l3_table.add(l3_index) =
                        page_entry(pbase + (map_address_l3 - vbase), access);

                    map_address_l3 += TT_L3_SIZE;
                }
            } else {
                *l2_table.add(l2_index) =
                    block_entry(pbase + (map_address_l2 - vbase), access);
            }

            map_address_l2 += TT_L2_SIZE;
        }

        map_address += TT_L1_SIZE;
    }

    machine::debug!(
        "pmap: mapped {:#x} -> {:#x} to phys {:#x}",
        vbase,
        vend,
        pbase
    );
    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Kernel and invalid pmaps
//--------------------------------------------------------------------------------------------------

static KERNEL_PMAP: IRQSafeNullLock<Pmap> = IRQSafeNullLock::new(Pmap::empty());
static INVALID_PMAP: IRQSafeNullLock<Pmap> = IRQSafeNullLock::new(Pmap::empty());

/// Allocate and record the kernel root table.
pub fn kernel_pmap_create(min: VirtAddr, max: VirtAddr) -> Pmap {
    let tte = ptregion_alloc() as *mut TtEntry;
    let pmap = Pmap {
        tte,
        ttep: kvtop(tte as VirtAddr),
        min,
        max,
        asid: 0,
    };
    KERNEL_PMAP.lock(|p| *p = pmap);
    pmap
}

/// Allocate and record the invalid (lower-half) root table. Left empty so
/// that every low-half access faults.
pub fn invalid_pmap_create() -> Pmap {
    let tte = ptregion_alloc() as *mut TtEntry;
    let pmap = Pmap {
        tte,
        ttep: kvtop(tte as VirtAddr),
        min: 0,
        max: 0,
        asid: 0,
    };
    INVALID_PMAP.lock(|p| *p = pmap);
    pmap
}

/// The kernel pmap, by copy.
pub fn kernel_pmap() -> Pmap {
    KERNEL_PMAP.lock(|p| *p)
}

//--------------------------------------------------------------------------------------------------
// Testing
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn block_entry_type_and_af() {
        let entry = block_entry(0x4020_0000, Access::ReadWrite);

        // Valid block entry with the access flag pre-set.
        assert_eq!(entry & TTE_TYPE_MASK, TTE_TYPE_BLOCK);
        assert_ne!(entry & (1 << 10), 0);
        // Destination address field survives the mask.
        assert_eq!(entry & TT_BLOCK_MASK, 0x4020_0000);
    }

    #[test_case]
    fn page_entry_type_and_address() {
        let entry = page_entry(0x4000_1000, Access::ReadWrite);

        assert_eq!(entry & TTE_TYPE_MASK, TTE_TYPE_PAGE);
        assert_eq!(entry & TT_PAGE_MASK, 0x4000_1000);
    }

    #[test_case]
    fn table_entry_points_at_next_level() {
        let entry = table_entry(0x4001_2000);

        assert_eq!(entry & TTE_TYPE_MASK, TTE_TYPE_TABLE);
        assert_eq!(entry & TT_TABLE_MASK, 0x4001_2000);
    }

    #[test_case]
    fn guard_access_is_never_writable() {
        let entry = block_entry(0x4020_0000, Access::NoAccess);

        // AP[7:6] = 0b10 is EL1 read-only.
        assert_eq!((entry >> 6) & 0b11, 0b10);
        // Privileged execute-never.
        assert_ne!(entry & (1 << 53), 0);
    }

    #[test_case]
    fn block_address_is_masked_to_level_granularity() {
        // A sub-2MiB physical offset cannot leak into a block entry.
        let entry = block_entry(0x4020_1234, Access::ReadWrite);
        assert_eq!(entry & TT_BLOCK_MASK, 0x4020_0000);
    }

    #[test_case]
    fn level_index_decomposition() {
        let va: u64 = 0xffff_fff0_4030_1000;

        let l1 = (va & TT_L1_INDEX_MASK) >> TT_L1_SHIFT;
        let l2 = (va & TT_L2_INDEX_MASK) >> TT_L2_SHIFT;
        let l3 = (va & TT_L3_INDEX_MASK) >> TT_L3_SHIFT;

        assert!(l1 < 512);
        assert!(l2 < 512);
        assert!(l3 < 512);
        // Reassemble the in-window offset from the indices.
        let offset = (l1 << TT_L1_SHIFT) | (l2 << TT_L2_SHIFT) | (l3 << TT_L3_SHIFT);
        assert_eq!(offset, va & 0x0000_007f_ffff_f000);
    }
}
