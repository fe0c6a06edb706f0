//! Read-only lookup service over the flattened device tree blob.
//!
//! Uses the `DevTreeIndex` implementation for simpler navigation. The index
//! requires a single scratch buffer, which comes from a fixed carveout here
//! so the tree can be parsed before any allocator exists.

#![allow(dead_code)]

use {
    core::cell::UnsafeCell,
    fdt_rs::{
        base::DevTree,
        error::DevTreeError,
        index::{DevTreeIndex, DevTreeIndexNode, DevTreeIndexProp},
        prelude::*,
    },
    shrinkwraprs::Shrinkwrap,
};

//--------------------------------------------------------------------------------------------------
// Private Definitions
//--------------------------------------------------------------------------------------------------

/// Scratch space for the device tree index. Sized generously for the trees
/// this kernel boots with; exceeding it is a fatal configuration error.
const INDEX_BUF_SIZE: usize = 0x1_0000;

struct IndexBuf(UnsafeCell<[u8; INDEX_BUF_SIZE]>);

// SAFETY: written exactly once, during single-core init, before interrupts.
unsafe impl Sync for IndexBuf {}

static INDEX_BUF: IndexBuf = IndexBuf(UnsafeCell::new([0; INDEX_BUF_SIZE]));

struct GlobalDeviceTree(UnsafeCell<Option<DeviceTree<'static>>>);

// SAFETY: written exactly once, during single-core init, before interrupts.
unsafe impl Sync for GlobalDeviceTree {}

static DEVICE_TREE: GlobalDeviceTree = GlobalDeviceTree(UnsafeCell::new(None));

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

pub use fdt_rs::error::DevTreeError as Error;

/// Navigable device tree.
#[derive(Shrinkwrap)]
pub struct DeviceTree<'a>(DevTreeIndex<'a, 'a>);

/// A device tree node.
pub type Node<'r, 'dt> = DevTreeIndexNode<'r, 'dt, 'dt>;
/// A device tree property.
pub type Prop<'r, 'dt> = DevTreeIndexProp<'r, 'dt, 'dt>;

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

/// Parse and index the blob at `base`, making it available through
/// [`device_tree()`].
///
/// # Safety
///
/// - `base` must point at a mapped, complete FDT blob that outlives the
///   kernel.
/// - Must be called exactly once, before interrupts are enabled.
pub unsafe fn init(base: *const u8) -> Result<(), DevTreeError> {
    let tree = DevTree::from_raw_pointer(base)?;

    let layout = DevTreeIndex::get_layout(&tree)?;
    assert!(
        layout.size() <= INDEX_BUF_SIZE,
        "device tree index needs {} bytes, carveout is {}",
        layout.size(),
        INDEX_BUF_SIZE
    );

    let buf = &mut *INDEX_BUF.0.get();
    let index = DevTreeIndex::new(tree, &mut buf[..])?;

    *DEVICE_TREE.0.get() = Some(DeviceTree(index));
    Ok(())
}

/// The globally registered device tree.
///
/// Panics if [`init`] has not run yet.
pub fn device_tree() -> &'static DeviceTree<'static> {
    unsafe { (*DEVICE_TREE.0.get()).as_ref() }.expect("device tree not initialised")
}

/// Whether [`init`] has completed.
pub fn is_initialised() -> bool {
    unsafe { (*DEVICE_TREE.0.get()).is_some() }
}

/// Find the child of `node` with the given name.
pub fn find_child<'r, 'dt>(
    node: &Node<'r, 'dt>,
    name: &str,
) -> Result<Option<Node<'r, 'dt>>, DevTreeError> {
    for child in node.children() {
        if child.name()? == name {
            return Ok(Some(child));
        }
    }
    Ok(None)
}

/// Find the property of `node` with the given name.
pub fn find_prop<'r, 'dt>(
    node: &Node<'r, 'dt>,
    name: &str,
) -> Result<Option<Prop<'r, 'dt>>, DevTreeError> {
    for prop in node.props() {
        if prop.name()? == name {
            return Ok(Some(prop));
        }
    }
    Ok(None)
}

impl<'dt> DeviceTree<'dt> {
    /// The root node.
    pub fn root(&self) -> Node<'_, 'dt> {
        self.0.root()
    }

    /// Iterate path components separated by `/` starting from the root and
    /// resolve the named node.
    pub fn get_node_by_path(&self, path: &str) -> Result<Node<'_, 'dt>, DevTreeError> {
        let mut path = PathSplit::new(path);
        let mut node = self.0.root();

        if path.component().is_empty() {
            // Root "/".
            if !path.move_next() {
                return Ok(node);
            }
        }

        loop {
            node = find_child(&node, path.component())?
                .ok_or(DevTreeError::InvalidParameter("node not found"))?;

            if path.is_finished() {
                return Ok(node);
            }
            path.move_next();
        }
    }

    /// Resolve a path whose final component names a property of the
    /// preceding node.
    pub fn get_prop_by_path(&self, path: &str) -> Result<Prop<'_, 'dt>, DevTreeError> {
        let (node_path, prop_name) = path
            .rfind('/')
            .map(|split| (&path[..split], &path[split + 1..]))
            .ok_or(DevTreeError::InvalidParameter("not a property path"))?;

        let node = self.get_node_by_path(if node_path.is_empty() { "/" } else { node_path })?;
        find_prop(&node, prop_name)?.ok_or(DevTreeError::InvalidParameter("property not found"))
    }

    /// Find the node carrying the given phandle value.
    pub fn get_node_by_phandle(&self, phandle: u32) -> Result<Node<'_, 'dt>, DevTreeError> {
        for node in self.0.nodes() {
            if let Some(prop) = find_prop(&node, "phandle")? {
                if prop.u32(0)? == phandle {
                    return Ok(node);
                }
            }
        }
        Err(DevTreeError::InvalidParameter("phandle not found"))
    }

    /// Read a string property of a node.
    pub fn node_prop_str<'r>(
        &self,
        node: &Node<'r, 'dt>,
        name: &str,
    ) -> Result<&'dt str, DevTreeError> {
        let prop = find_prop(node, name)?
            .ok_or(DevTreeError::InvalidParameter("property not found"))?;
        prop.str()
    }

    /// Read a u32 property of a node.
    pub fn node_prop_u32<'r>(
        &self,
        node: &Node<'r, 'dt>,
        name: &str,
    ) -> Result<u32, DevTreeError> {
        let prop = find_prop(node, name)?
            .ok_or(DevTreeError::InvalidParameter("property not found"))?;
        prop.u32(0)
    }
}

fn get_cell_count(node: &Node, name: &str) -> u32 {
    const DEFAULT: u32 = 1;

    let mut current = Some(node.clone());
    while let Some(n) = current {
        if let Ok(Some(prop)) = find_prop(&n, name) {
            return prop.u32(0).unwrap_or(DEFAULT);
        }
        current = n.parent();
    }

    DEFAULT
}

/// `#address-cells` in effect for a node.
pub fn get_address_cells(node: &Node) -> u32 {
    get_cell_count(node, "#address-cells")
}

/// `#size-cells` in effect for a node.
pub fn get_size_cells(node: &Node) -> u32 {
    get_cell_count(node, "#size-cells")
}

/// Augments a `reg`-style property with an (address, size) pair accessor.
#[derive(Shrinkwrap)]
pub struct DeviceTreeProp<'r, 'dt>(Prop<'r, 'dt>);

impl<'r, 'dt> DeviceTreeProp<'r, 'dt> {
    pub fn new(source: Prop<'r, 'dt>) -> Self {
        Self(source)
    }

    /// Iterate the property payload as (address, size) pairs, each combined
    /// from the parent's `#address-cells`/`#size-cells` big-endian words.
    pub fn payload_pairs_iter<'a>(&'a self) -> PayloadPairsIter<'a, 'r, 'dt> {
        let address_cells = get_address_cells(&self.0.node());
        let size_cells = get_size_cells(&self.0.node());

        PayloadPairsIter {
            prop: &self.0,
            total: self.0.length(),
            offset: 0,
            address_cells,
            size_cells,
        }
    }
}

pub struct PayloadPairsIter<'a, 'r, 'dt> {
    prop: &'a Prop<'r, 'dt>,
    total: usize,
    offset: usize,
    address_cells: u32,
    size_cells: u32,
}

impl<'a, 'r, 'dt> PayloadPairsIter<'a, 'r, 'dt> {
    fn read(&self, cell_index: usize, cells: u32) -> Option<u64> {
        match cells {
            1 => self.prop.u32(cell_index).ok().map(u64::from),
            2 => {
                let hi = self.prop.u32(cell_index).ok()?;
                let lo = self.prop.u32(cell_index + 1).ok()?;
                Some(u64::from(hi) << 32 | u64::from(lo))
            }
            _ => None,
        }
    }
}

impl<'a, 'r, 'dt> Iterator for PayloadPairsIter<'a, 'r, 'dt> {
    /// Return a pair of (address, size) values on each iteration.
    type Item = (u64, u64);

    fn next(&mut self) -> Option<Self::Item> {
        let pair_bytes = ((self.address_cells + self.size_cells) * 4) as usize;
        if self.offset + pair_bytes > self.total {
            return None;
        }

        let cell_index = self.offset / 4;
        let addr = self.read(cell_index, self.address_cells)?;
        let size = self.read(cell_index + self.address_cells as usize, self.size_cells)?;

        self.offset += pair_bytes;
        Some((addr, size))
    }
}

// See "2.2.3 Path Names" in DTSpec v0.3.
struct PathSplit<'a> {
    path: &'a str,
    path_component: &'a str,
    index: usize,
    total: usize,
}

impl<'a> PathSplit<'a> {
    pub fn new(path: &'a str) -> PathSplit<'a> {
        let path = if let Some(p) = path.strip_suffix('/') {
            p
        } else {
            path
        };
        let mut split = PathSplit {
            path,
            path_component: "",
            index: 0,
            total: path.split('/').count(),
        };
        split.update();
        split
    }

    fn update(&mut self) {
        for (i, comp) in self.path.split('/').enumerate() {
            if i == self.index {
                self.path_component = comp;
                return;
            }
        }
    }

    pub fn component(&self) -> &'a str {
        self.path_component
    }

    pub fn level(&self) -> usize {
        self.index
    }

    pub fn is_finished(&self) -> bool {
        self.index >= self.total - 1
    }

    pub fn move_next(&mut self) -> bool {
        if self.index < self.total - 1 {
            self.index += 1;
            self.update();
            return true;
        }
        false
    }
}

//--------------------------------------------------------------------------------------------------
// Testing
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::PathSplit;

    #[test_case]
    fn test_single_level_path_split() {
        let mut path = PathSplit::new("/#address-cells");
        assert!(!path.is_finished());
        assert_eq!(path.level(), 0);
        assert_eq!(path.component(), "");

        assert!(path.move_next());

        assert!(path.is_finished());
        assert_eq!(path.level(), 1);
        assert_eq!(path.component(), "#address-cells");

        assert!(!path.move_next());
    }

    #[test_case]
    fn test_multiple_level_path_split() {
        let mut path = PathSplit::new("/cpus/cpu-map/cluster0");
        assert!(!path.is_finished());
        assert_eq!(path.component(), "");

        assert!(path.move_next());
        assert_eq!(path.component(), "cpus");

        assert!(path.move_next());
        assert_eq!(path.component(), "cpu-map");

        assert!(path.move_next());
        assert!(path.is_finished());
        assert_eq!(path.component(), "cluster0");

        assert!(!path.move_next());
    }

    #[test_case]
    fn test_trailing_slash_is_stripped() {
        let mut path = PathSplit::new("/cpus/");
        assert!(path.move_next());
        assert!(path.is_finished());
        assert_eq!(path.component(), "cpus");
    }
}
