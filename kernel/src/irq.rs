//! Machine interrupt glue.
//!
//! Discovers the interrupt controller's distributor and redistributor
//! regions from the device tree, maps them into the peripheral window, and
//! hands them to the GICv3 driver. The rest is thin forwarding.

use {
    crate::{
        defaults::GIC_VIRT_BASE,
        topology,
        vm::pmap::{self, Access},
    },
    machine::drivers::gicv3,
};

//--------------------------------------------------------------------------------------------------
// Private Code
//--------------------------------------------------------------------------------------------------

/// Locate the `intc@*` node and read its `reg` property: two regions, the
/// distributor first, the redistributors second.
fn discover_gic_regions() -> ((u64, u64), (u64, u64)) {
    let dt = machine::device_tree::device_tree();

    let mut intc = None;
    for node in dt.root().children() {
        if let Ok(name) = node.name() {
            if name.starts_with("intc@") {
                intc = Some(node);
                break;
            }
        }
    }
    let intc = intc.expect("no interrupt controller in the device tree");

    let reg = machine::device_tree::find_prop(&intc, "reg")
        .ok()
        .flatten()
        .expect("interrupt controller without reg property");
    let reg = machine::device_tree::DeviceTreeProp::new(reg);

    let mut pairs = reg.payload_pairs_iter();
    let dist = pairs.next().expect("missing distributor region");
    let redist = pairs.next().expect("missing redistributor region");

    (dist, redist)
}

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

/// Map the interrupt-controller regions and configure the GIC for the boot
/// CPU.
pub fn machine_init_interrupts() {
    let ((gicd_phys, gicd_size), (gicr_phys, gicr_size)) = discover_gic_regions();

    // Both regions land in the peripheral window at their offsets from the
    // distributor base.
    let gicd_virt = GIC_VIRT_BASE;
    let gicr_virt = GIC_VIRT_BASE + (gicr_phys - gicd_phys);

    let root = pmap::kernel_pmap().tte;
    unsafe {
        pmap::tt_create(root, gicd_phys, gicd_virt, gicd_size, Access::ReadWrite)
            .expect("mapping the distributor failed");
        pmap::tt_create(root, gicr_phys, gicr_virt, gicr_size, Access::ReadWrite)
            .expect("mapping the redistributors failed");
    }

    let version = unsafe {
        gicv3::interface_init(
            gicd_virt as usize,
            gicr_virt as usize,
            topology::max_cpu_num(),
        )
    }
    .expect("interrupt controller init failed");

    machine::info!("irq: interrupt controller configured: GICv{}", version);
}

/// Unmask IRQs on the executing core.
pub fn machine_irq_enable() {
    unsafe { machine::arch::asynchronous::local_irq_unmask() };
}

/// Mask IRQs on the executing core.
pub fn machine_irq_disable() {
    unsafe { machine::arch::asynchronous::local_irq_mask() };
}

/// Configure and enable an interrupt id.
pub fn machine_register_interrupt(intid: u32, priority: u8) -> Result<(), gicv3::Error> {
    gicv3::irq_register(intid, priority)
}

/// Generate an inter-processor interrupt.
pub fn machine_send_interrupt(intid: u64, target: u64) {
    gicv3::send_sgi(intid, target);
}
