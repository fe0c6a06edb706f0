//! Machine topology.
//!
//! Walks the device tree under `/cpus/cpu-map` to assign logical CPU ids to
//! physical affinity ids. Clusters and cpus are numbered from zero; the
//! physical id comes from the referenced cpu node's `reg` property, the
//! logical id is assigned by the kernel in discovery order.

use {
    crate::defaults::{CLUSTER_MAX, CPU_MAX, FDT_HIGH_VA_WORKAROUND},
    fdt_rs::prelude::PropReader,
    machine::{
        arch::cpu as arch_cpu,
        device_tree::{self, find_child, find_prop, Error as DevTreeError},
        synchronization::{interface::ReadWriteEx, InitStateLock},
    },
};

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

#[derive(Clone, Copy, Default)]
pub struct TopologyCpu {
    pub cpu_phys_id: u32,
    pub cpu_id: usize,
    pub cluster_id: usize,
}

#[derive(Clone, Copy, Default)]
pub struct TopologyCluster {
    pub cluster_id: usize,
    pub num_cpus: usize,
}

//--------------------------------------------------------------------------------------------------
// Private Definitions
//--------------------------------------------------------------------------------------------------

struct TopologyInfo {
    num_cpus: usize,
    num_clusters: usize,
    max_cpu_id: usize,
    max_cluster_id: usize,
    boot_cpu: Option<usize>,
    cpus: [TopologyCpu; CPU_MAX],
    clusters: [TopologyCluster; CLUSTER_MAX],
}

//--------------------------------------------------------------------------------------------------
// Global instances
//--------------------------------------------------------------------------------------------------

static TOPOLOGY: InitStateLock<TopologyInfo> = InitStateLock::new(TopologyInfo {
    num_cpus: 0,
    num_clusters: 0,
    max_cpu_id: 0,
    max_cluster_id: 0,
    boot_cpu: None,
    cpus: [TopologyCpu {
        cpu_phys_id: 0,
        cpu_id: 0,
        cluster_id: 0,
    }; CPU_MAX],
    clusters: [TopologyCluster {
        cluster_id: 0,
        num_cpus: 0,
    }; CLUSTER_MAX],
});

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

/// Read the CPU topology from the device tree.
///
/// Due to a known quirk of flattened-tree lookups at high virtual
/// addresses, `/cpus/cpu-map` cannot be resolved as one path: `/cpus` is
/// looked up first and `cpu-map` located by iterating its children. The
/// consequence is that `socket` levels inside the map are not supported.
pub fn parse_cpu_topology() -> Result<(), DevTreeError> {
    let dt = device_tree::device_tree();

    // The topology is only ever parsed on the boot CPU.
    let boot_affinity = arch_cpu::core_affinity() as u32;

    let cpu_map = if FDT_HIGH_VA_WORKAROUND {
        let cpus = dt.get_node_by_path("/cpus")?;
        find_child(&cpus, "cpu-map")?
            .ok_or(DevTreeError::InvalidParameter("no cpu-map node"))?
    } else {
        dt.get_node_by_path("/cpus/cpu-map")?
    };

    TOPOLOGY.write(|info| {
        info.num_cpus = 0;
        info.num_clusters = 0;

        // Clusters and their cpus, in device tree order. Each `cpu` prop is
        // a phandle to the node whose `reg` is the physical affinity id.
        for cluster_node in cpu_map.children() {
            assert!(info.num_clusters < CLUSTER_MAX, "too many cpu clusters");

            let mut cluster = TopologyCluster {
                cluster_id: info.num_clusters,
                num_cpus: 0,
            };

            for cpu_ref in cluster_node.children() {
                assert!(info.num_cpus < CPU_MAX, "too many cpus");

                let phandle = find_prop(&cpu_ref, "cpu")?
                    .ok_or(DevTreeError::InvalidParameter("cpu entry without phandle"))?
                    .u32(0)?;
                let cpu_node = dt.get_node_by_phandle(phandle)?;

                let cpu = TopologyCpu {
                    cpu_phys_id: dt.node_prop_u32(&cpu_node, "reg")?,
                    cpu_id: info.num_cpus,
                    cluster_id: cluster.cluster_id,
                };

                if cpu.cpu_phys_id == boot_affinity {
                    info.boot_cpu = Some(info.num_cpus);
                }

                info.max_cpu_id = info.max_cpu_id.max(cpu.cpu_id);
                info.cpus[info.num_cpus] = cpu;
                info.num_cpus += 1;
                cluster.num_cpus += 1;
            }

            info.max_cluster_id = info.max_cluster_id.max(cluster.cluster_id);
            info.clusters[info.num_clusters] = cluster;
            info.num_clusters += 1;
        }

        assert!(info.boot_cpu.is_some(), "boot cpu not present in topology");
        Ok(())
    })
}

/// Logical id of the boot CPU.
pub fn boot_cpu_num() -> usize {
    TOPOLOGY.read(|info| info.cpus[info.boot_cpu.expect("topology not parsed")].cpu_id)
}

pub fn num_cpus() -> usize {
    TOPOLOGY.read(|info| info.num_cpus)
}

pub fn num_clusters() -> usize {
    TOPOLOGY.read(|info| info.num_clusters)
}

pub fn max_cpu_num() -> usize {
    TOPOLOGY.read(|info| info.max_cpu_id)
}

/// Logical CPU number of the executing core: the affinity value from
/// MPIDR_EL1 translated through the topology. Before the topology is
/// parsed this falls back to the raw affinity value.
pub fn cpu_num() -> usize {
    let affinity = arch_cpu::core_affinity() as u32;

    TOPOLOGY.read(|info| {
        for cpu in info.cpus[..info.num_cpus].iter() {
            if cpu.cpu_phys_id == affinity {
                return cpu.cpu_id;
            }
        }
        affinity as usize
    })
}

/// The machine's `compatible` string from the device tree root.
pub fn machine_name() -> &'static str {
    let dt = device_tree::device_tree();
    dt.node_prop_str(&dt.root(), "compatible").unwrap_or("unknown")
}
