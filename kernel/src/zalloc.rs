//! The zone allocator.
//!
//! Every other subsystem obtains its fixed-size descriptors here: a zone is
//! created once per descriptor type, sized against that type's compile-time
//! maximum, and backed by pages from the kernel map. Each backing page is
//! carved into slots of `size_of::<ZoneMeta>() + element size`; the metadata
//! header is a single list node, on exactly one of the zone's two lists
//! (free or used) at any time. The address handed to the caller is the slot
//! address plus the header size.
//!
//! Based on Mach's zalloc.

use {
    crate::{
        defaults::PAGE_SIZE,
        list::{List, ListNode},
        vm::{map, map::VmFlags, VirtAddr},
    },
    machine::synchronization::{interface::Mutex, IRQSafeNullLock},
};

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

/// Bounded zone table.
pub const ZONE_MAX: usize = 12;

/// Handle to a created zone.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ZoneId(usize);

/// Per-slot metadata: one list node, directly followed by the element.
#[repr(C)]
pub struct ZoneMeta {
    alloc: ListNode,
}

const META_SIZE: u64 = core::mem::size_of::<ZoneMeta>() as u64;

//--------------------------------------------------------------------------------------------------
// Private Definitions
//--------------------------------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq)]
enum ZoneState {
    Unused,
    Used,
}

struct Zone {
    /// Number of in-use elements.
    count: u32,
    /// Number of free elements.
    count_free: u32,

    /// Maximum zone size: capacity × element size, metadata excluded.
    max_size: u64,
    /// Zone element size.
    elem_size: u64,

    /// Number of backing pages.
    page_count: u64,

    /// Free and used slot headers.
    free_elems: List,
    used_elems: List,

    index: usize,
    name: &'static str,

    state: ZoneState,
}

impl Zone {
    const fn unused() -> Self {
        Self {
            count: 0,
            count_free: 0,
            max_size: 0,
            elem_size: 0,
            page_count: 0,
            free_elems: List::new(),
            used_elems: List::new(),
            index: 0,
            name: "",
            state: ZoneState::Unused,
        }
    }
}

struct ZoneTable {
    zones: [Zone; ZONE_MAX],
    num_used: u32,
}

// SAFETY: single-core, all mutation under the IRQ-masking lock.
unsafe impl Send for ZoneTable {}

//--------------------------------------------------------------------------------------------------
// Global instances
//--------------------------------------------------------------------------------------------------

const UNUSED_ZONE: Zone = Zone::unused();

static ZONES: IRQSafeNullLock<ZoneTable> = IRQSafeNullLock::new(ZoneTable {
    zones: [UNUSED_ZONE; ZONE_MAX],
    num_used: 0,
});

//--------------------------------------------------------------------------------------------------
// Private Code
//--------------------------------------------------------------------------------------------------

/// Capacity, data size and backing page count for a requested element size
/// and total byte budget.
pub(crate) fn zone_geometry(elem_size: u64, max: u64) -> (u32, u64, u64) {
    let count_free = (max / elem_size) as u32;
    let max_size = u64::from(count_free) * elem_size;

    // Backing pages must also hold each slot's metadata header.
    let mut page_count = (max_size + u64::from(count_free) * META_SIZE).div_ceil(PAGE_SIZE);
    if page_count == 0 {
        page_count = 1;
    }

    (count_free, max_size, page_count)
}

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

/// Reset the zone table. Runs once at boot, before any zone is created.
pub fn zone_init() {
    ZONES.lock(|table| {
        table.num_used = 0;
        for zone in table.zones.iter_mut() {
            *zone = Zone::unused();
        }
    });
}

/// Create a zone for elements of `elem_size` bytes, with capacity for `max`
/// bytes of element data, and seed its free list with every slot.
pub fn zone_create(elem_size: u64, max: u64, name: &'static str) -> ZoneId {
    machine::debug!(
        "zalloc: creating zone '{}' for alloc size {}, max size {}",
        name,
        elem_size,
        max
    );

    assert!(elem_size != 0, "zalloc: zone '{}': invalid element size", name);
    assert!(max != 0, "zalloc: zone '{}': invalid max zone size", name);

    let (count_free, max_size, page_count) = zone_geometry(elem_size, max);

    // The backing pages come from the kernel map before the zone table is
    // touched, keeping lock acquisition one-directional.
    let zone_page_base = map::with_kernel_map(|map| {
        map.alloc(page_count * PAGE_SIZE, VmFlags::empty())
    });

    ZONES.lock(|table| {
        // First unused slot in the bounded table.
        let index = table
            .zones
            .iter()
            .position(|z| z.state == ZoneState::Unused)
            .unwrap_or_else(|| {
                panic!("zalloc: failed to allocate a zone for '{}': no available zones", name)
            });

        let zone = &mut table.zones[index];
        zone.elem_size = elem_size;
        zone.count_free = count_free;
        zone.count = 0;
        zone.max_size = max_size;
        zone.page_count = page_count;
        zone.index = index;
        zone.name = name;

        zone.free_elems.init();
        zone.used_elems.init();

        // Carve the backing pages into slots and push every header onto the
        // free list.
        let block_size = elem_size + META_SIZE;
        for i in 0..u64::from(count_free) {
            let meta = (zone_page_base + i * block_size) as *mut ZoneMeta;
            unsafe {
                (*meta).alloc = ListNode::new();
                zone.free_elems.push_back(&mut (*meta).alloc);
            }
        }

        zone.state = ZoneState::Used;
        table.num_used += 1;

        machine::info!(
            "zalloc: created new zone '{}' with alloc size {} and max size {}",
            name,
            elem_size,
            max_size
        );

        ZoneId(index)
    })
}

/// Allocate one element from a zone. Fatal when the zone is exhausted;
/// zones are sized against compile-time maxima and have no recovery.
pub fn zalloc(zone: ZoneId) -> *mut u8 {
    ZONES.lock(|table| {
        let zone = &mut table.zones[zone.0];

        let meta = zone
            .free_elems
            .first()
            .unwrap_or_else(|| panic!("zalloc: zone '{}': no free slots", zone.name));

        unsafe {
            zone.used_elems.move_to_head(meta);
        }

        zone.count += 1;
        zone.count_free -= 1;

        let addr = meta as VirtAddr + META_SIZE;
        machine::debug!("zalloc: allocated element in zone '{}': {:#x}", zone.name, addr);
        addr as *mut u8
    })
}

/// Free the element at `addr` back to its zone. The element body is zeroed;
/// the metadata header is preserved. Freeing an address that is not on the
/// zone's used list is a fatal programming error.
pub fn zfree(zone: ZoneId, addr: VirtAddr) {
    ZONES.lock(|table| {
        let zone = &mut table.zones[zone.0];
        let meta_addr = addr - META_SIZE;

        let found = zone
            .used_elems
            .iter()
            .find(|&node| node as VirtAddr == meta_addr);

        match found {
            Some(node) => unsafe {
                core::ptr::write_bytes(addr as *mut u8, 0, zone.elem_size as usize);
                // Head insertion: the most-recently-freed slot is handed out
                // again first.
                zone.free_elems.move_to_head(node);

                zone.count -= 1;
                zone.count_free += 1;
            },
            None => panic!(
                "zalloc: failed to free element {:#x} from zone '{}': element does not exist in zone",
                addr, zone.name
            ),
        }
    });
}

/// (in-use, free) counts for a zone.
pub fn zone_counts(zone: ZoneId) -> (u32, u32) {
    ZONES.lock(|table| {
        let zone = &table.zones[zone.0];
        (zone.count, zone.count_free)
    })
}

/// Dump the contents of one zone.
pub fn zone_dump(zone: ZoneId) {
    ZONES.lock(|table| {
        let zone = &table.zones[zone.0];

        machine::debug!(
            "zone[{}]: '{}', size: {}",
            zone.index,
            zone.name,
            zone.max_size
        );
        machine::debug!("  free: {}:", zone.count_free);
        for meta in zone.free_elems.iter() {
            machine::debug!(
                "    meta: {:#x} | element: {:#x}",
                meta as VirtAddr,
                meta as VirtAddr + META_SIZE
            );
        }
        machine::debug!("  alloc: {}:", zone.count);
        for meta in zone.used_elems.iter() {
            machine::debug!(
                "    meta: {:#x} | element: {:#x}",
                meta as VirtAddr,
                meta as VirtAddr + META_SIZE
            );
        }
    });
}

/// Dump every used zone.
pub fn zone_dump_all() {
    let used: [bool; ZONE_MAX] =
        ZONES.lock(|table| core::array::from_fn(|i| table.zones[i].state == ZoneState::Used));

    for (index, is_used) in used.iter().enumerate() {
        if *is_used {
            zone_dump(ZoneId(index));
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Testing
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn geometry_of_a_small_zone() {
        // Ten 16-byte elements fit one page together with their headers.
        let (count_free, max_size, page_count) = zone_geometry(16, 160);
        assert_eq!(count_free, 10);
        assert_eq!(max_size, 160);
        assert_eq!(page_count, 1);
    }

    #[test_case]
    fn geometry_rounds_capacity_down() {
        // 100 bytes over 16-byte elements leaves room for 6 whole elements.
        let (count_free, max_size, _) = zone_geometry(16, 100);
        assert_eq!(count_free, 6);
        assert_eq!(max_size, 96);
    }

    #[test_case]
    fn geometry_counts_header_overhead() {
        // Element data alone fits one page, but headers push it to two.
        let (count_free, _, page_count) = zone_geometry(64, 4096);
        assert_eq!(count_free, 64);
        assert_eq!(page_count, 2);
    }
}
