//! Arm GICv3 interrupt controller driver.
//!
//! Three register regions cooperate: the distributor governs global interrupt
//! configuration, the per-CPU redistributors govern SGIs and PPIs (ids below
//! 32), and the CPU interface (system registers) is the acknowledge /
//! end-of-interrupt path.
//!
//! The distributor and the redistributor region are memory mapped; the
//! caller discovers the two regions from the device tree and maps them
//! read-write before calling [`interface_init`].

use {
    crate::{
        arch::{
            cpu,
            sysreg::{dmb_st, dsb_sy, isb},
        },
        drivers::MMIODerefWrapper,
        synchronization::{interface::ReadWriteEx, InitStateLock},
    },
    snafu::Snafu,
    tock_registers::{
        interfaces::{ReadWriteable, Readable, Writeable},
        register_bitfields, register_structs,
        registers::{ReadOnly, ReadWrite},
    },
};

//--------------------------------------------------------------------------------------------------
// Private Definitions
//--------------------------------------------------------------------------------------------------

register_bitfields! {
    u32,

    /// Distributor Control Register.
    GICD_CTLR [
        /// Enable Non-secure Group 1 interrupts.
        EnableGrp1NS OFFSET(1) NUMBITS(1) [],
        /// Affinity Routing Enable.
        ARE OFFSET(4) NUMBITS(1) [],
        /// Disable Security.
        DS OFFSET(6) NUMBITS(1) []
    ],

    /// Peripheral ID2 Register; carries the architecture revision.
    GICD_PIDR2 [
        ArchRev OFFSET(4) NUMBITS(4) []
    ],

    /// Redistributor Wake Register.
    GICR_WAKER [
        /// The connected PE is asleep and the redistributor must wake it
        /// before forwarding interrupts.
        ProcessorSleep OFFSET(1) NUMBITS(1) [],
        /// All interfaces between the redistributor and the PE are quiescent.
        ChildrenAsleep OFFSET(2) NUMBITS(1) []
    ]
}

register_structs! {
    #[allow(non_snake_case)]
    GicdRegisterBlock {
        (0x0000 => CTLR: ReadWrite<u32, GICD_CTLR::Register>),
        (0x0004 => TYPER: ReadOnly<u32>),
        (0x0008 => IIDR: ReadOnly<u32>),
        (0x000c => _reserved0),
        (0x0080 => IGROUPR: [ReadWrite<u32>; 32]),
        (0x0100 => ISENABLER: [ReadWrite<u32>; 32]),
        (0x0180 => ICENABLER: [ReadWrite<u32>; 32]),
        (0x0200 => ISPENDR: [ReadWrite<u32>; 32]),
        (0x0280 => ICPENDR: [ReadWrite<u32>; 32]),
        (0x0300 => ISACTIVER: [ReadWrite<u32>; 32]),
        (0x0380 => ICACTIVER: [ReadWrite<u32>; 32]),
        (0x0400 => IPRIORITYR: [ReadWrite<u8>; 1024]),
        (0x0800 => ITARGETSR: [ReadWrite<u8>; 1024]),
        (0x0c00 => ICFGR: [ReadWrite<u32>; 64]),
        (0x0d00 => IGRPMODR: [ReadWrite<u32>; 64]),
        (0x0e00 => _reserved1),
        (0xffe8 => PIDR2: ReadOnly<u32, GICD_PIDR2::Register>),
        (0xffec => @END),
    },

    /// Redistributor RD_base frame (LPI configuration and wake control).
    #[allow(non_snake_case)]
    GicrRdRegisterBlock {
        (0x0000 => CTLR: ReadWrite<u32>),
        (0x0004 => IIDR: ReadOnly<u32>),
        /// The upper word reports the affinity value of the connected PE.
        (0x0008 => TYPER: [ReadOnly<u32>; 2]),
        (0x0010 => STATUSR: ReadWrite<u32>),
        (0x0014 => WAKER: ReadWrite<u32, GICR_WAKER::Register>),
        (0x0018 => @END),
    },

    /// Redistributor SGI_base frame (per-CPU interrupt configuration).
    #[allow(non_snake_case)]
    GicrSgiRegisterBlock {
        (0x0000 => _reserved0),
        (0x0080 => IGROUPR0: ReadWrite<u32>),
        (0x0084 => _reserved1),
        (0x0100 => ISENABLER0: ReadWrite<u32>),
        (0x0104 => _reserved2),
        (0x0180 => ICENABLER0: ReadWrite<u32>),
        (0x0184 => _reserved3),
        (0x0400 => IPRIORITYR: [ReadWrite<u8>; 32]),
        (0x0420 => _reserved4),
        (0x0d00 => IGRPMODR0: ReadWrite<u32>),
        (0x0d04 => @END),
    }
}

type GicdRegisters = MMIODerefWrapper<GicdRegisterBlock>;

/// Byte distance between two redistributor frames: one RD_base frame plus
/// one SGI_base frame, 64 KiB each.
const GICR_FRAME_STRIDE: usize = 0x20000;
/// Offset of the SGI_base frame within a redistributor frame.
const GICR_SGI_OFFSET: usize = 0x10000;

/// Ids below this are per-CPU (SGI/PPI) and configured via the
/// redistributor; shared peripheral interrupts start here.
const SPI_START: u32 = 32;
/// Highest valid shared peripheral interrupt id.
const SPI_END: u32 = 1019;

/// Minimum architecture revision this driver accepts.
const GIC_MIN_VERSION: u32 = 3;

struct GicInner {
    dist_base: usize,
    redist_base: usize,
    max_redist_idx: usize,
    version: u32,
    initialised: bool,
}

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

/// Errors returned by the GIC driver.
#[derive(Debug, Snafu)]
pub enum Error {
    /// The distributor identifies as an unsupported controller revision.
    #[snafu(display("GIC architecture revision {} below supported minimum {}", version, GIC_MIN_VERSION))]
    VersionMismatch { version: u32 },

    /// No redistributor matches the executing core's affinity.
    #[snafu(display("no redistributor found for affinity {:#x}", affinity))]
    RedistributorNotFound { affinity: u64 },

    /// Shared peripheral interrupts are not configurable in this scope.
    #[snafu(display("INTID {} is not configurable", intid))]
    NotConfigurable { intid: u32 },

    /// Ids above 1019 belong to the extended ranges.
    #[snafu(display("extended interrupt range not supported (INTID {})", intid))]
    ExtendedRangeUnsupported { intid: u32 },
}

/// Marker for [`send_sgi`]: route to the affinity-selected targets rather
/// than broadcast.
const SGI_IRM_TARGETED: u64 = 0;

//--------------------------------------------------------------------------------------------------
// Global instances
//--------------------------------------------------------------------------------------------------

static GIC: InitStateLock<GicInner> = InitStateLock::new(GicInner {
    dist_base: 0,
    redist_base: 0,
    max_redist_idx: 0,
    version: 0,
    initialised: false,
});

//--------------------------------------------------------------------------------------------------
// Private Code
//--------------------------------------------------------------------------------------------------

impl GicInner {
    fn dist(&self) -> GicdRegisters {
        unsafe { GicdRegisters::new(self.dist_base) }
    }

    fn redist_rd(&self, idx: usize) -> &'static GicrRdRegisterBlock {
        unsafe { &*((self.redist_base + idx * GICR_FRAME_STRIDE) as *const GicrRdRegisterBlock) }
    }

    fn redist_sgi(&self, idx: usize) -> &'static GicrSgiRegisterBlock {
        unsafe {
            &*((self.redist_base + idx * GICR_FRAME_STRIDE + GICR_SGI_OFFSET)
                as *const GicrSgiRegisterBlock)
        }
    }

    /// Search the redistributor region for the frame whose type register
    /// carries the given affinity.
    fn redist_id(&self, affinity: u64) -> Result<usize, Error> {
        let mut index = 0;
        loop {
            if u64::from(self.redist_rd(index).TYPER[1].get()) == affinity {
                return Ok(index);
            }
            index += 1;
            if index > self.max_redist_idx {
                return Err(Error::RedistributorNotFound { affinity });
            }
        }
    }

    fn version_probe(&self) -> Result<u32, Error> {
        let version = self.dist().PIDR2.read(GICD_PIDR2::ArchRev);
        if version < GIC_MIN_VERSION {
            return Err(Error::VersionMismatch { version });
        }
        Ok(version)
    }

    /// Enable affinity routing and non-secure group-1 forwarding in the
    /// distributor.
    fn dist_init(&mut self) -> Result<(), Error> {
        self.version = self.version_probe()?;

        let dist = self.dist();
        dist.CTLR.write(GICD_CTLR::ARE::SET + GICD_CTLR::DS::SET);
        dist.CTLR.modify(GICD_CTLR::EnableGrp1NS::SET);

        dsb_sy();
        isb();
        Ok(())
    }

    /// Wake the redistributor that serves the executing core.
    fn redist_init(&mut self) -> Result<(), Error> {
        let redist_id = self.redist_id(cpu::affinity())?;
        let rd = self.redist_rd(redist_id);

        rd.WAKER.modify(GICR_WAKER::ProcessorSleep::CLEAR);

        // Poll ChildrenAsleep until it reads 0; at that point the
        // redistributor has woken up.
        cpu::loop_while(|| rd.WAKER.is_set(GICR_WAKER::ChildrenAsleep));

        dsb_sy();
        isb();
        Ok(())
    }

    /// Enable the system-register CPU interface, accept all priorities and
    /// enable group-1 interrupt delivery.
    fn cpuif_init(&mut self) {
        let sre = sysreg_read!("icc_sre_el1") | 0b101;
        sysreg_write!("icc_sre_el1", sre);

        sysreg_write!("icc_pmr_el1", 0xff);

        let igrpen = sysreg_read!("icc_igrpen1_el1") | 0x1;
        sysreg_write!("icc_igrpen1_el1", igrpen);

        dsb_sy();
        isb();
    }

    fn irq_control(&self, intid: u32, enable: bool) -> Result<(), Error> {
        if intid >= SPI_START {
            // Shared interrupts live in the distributor; nothing in this
            // scope enables them.
            return Ok(());
        }

        let redist_id = self.redist_id(cpu::affinity())?;
        let bit = 1 << (intid & 0x1f);

        let sgi = self.redist_sgi(redist_id);
        if enable {
            sgi.ISENABLER0.set(bit);
        } else {
            sgi.ICENABLER0.set(bit);
        }

        dmb_st();
        isb();
        Ok(())
    }

    fn irq_register(&self, intid: u32, priority: u8) -> Result<(), Error> {
        if intid < SPI_START {
            let redist_id = self.redist_id(cpu::affinity())?;
            let sgi = self.redist_sgi(redist_id);

            sgi.IPRIORITYR[intid as usize].set(priority);

            // Non-secure group 1: group bit set, group-modifier bit clear.
            let bit = 1 << (intid & 0x1f);
            sgi.IGROUPR0.set(sgi.IGROUPR0.get() | bit);
            sgi.IGRPMODR0.set(sgi.IGRPMODR0.get() & !bit);

            self.irq_control(intid, true)?;

            dsb_sy();
            isb();
            Ok(())
        } else if intid <= SPI_END {
            Err(Error::NotConfigurable { intid })
        } else {
            Err(Error::ExtendedRangeUnsupported { intid })
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

/// Configure the distributor, the executing core's redistributor and the CPU
/// interface. Returns the probed architecture revision.
///
/// # Safety
///
/// - Both register regions must be mapped read-write at the given virtual
///   addresses before calling this.
pub unsafe fn interface_init(
    dist_base: usize,
    redist_base: usize,
    max_redist_idx: usize,
) -> Result<u32, Error> {
    GIC.write(|gic| {
        gic.dist_base = dist_base;
        gic.redist_base = redist_base;
        gic.max_redist_idx = max_redist_idx;

        gic.dist_init()?;
        gic.redist_init()?;
        gic.cpuif_init();

        gic.initialised = true;
        Ok(gic.version)
    })
}

/// Configure an interrupt: priority, non-secure group 1, enabled.
pub fn irq_register(intid: u32, priority: u8) -> Result<(), Error> {
    GIC.read(|gic| gic.irq_register(intid, priority))
}

/// Enable a configured interrupt.
pub fn irq_enable(intid: u32) {
    GIC.read(|gic| gic.irq_control(intid, true)).ok();
}

/// Disable a configured interrupt.
pub fn irq_disable(intid: u32) {
    GIC.read(|gic| gic.irq_control(intid, false)).ok();
}

/// Generate a software-generated (inter-processor) interrupt for the target
/// list on the executing core's cluster.
pub fn send_sgi(intid: u64, target_list: u64) {
    let mpidr = cpu::mpidr();

    let aff1 = cpu::affinity_level(mpidr, 1);
    let aff2 = cpu::affinity_level(mpidr, 2);
    let aff3 = cpu::affinity_level(mpidr, 3);

    let sgi_val = (aff3 << 48)
        | (SGI_IRM_TARGETED << 40)
        | (aff2 << 32)
        | (intid << 24)
        | (aff1 << 16)
        | target_list;

    sysreg_write!("icc_sgi1r_el1", sgi_val);

    dsb_sy();
    isb();
}

/// Acknowledge the highest-priority pending group-1 interrupt, returning its
/// id.
pub fn acknowledge() -> u32 {
    sysreg_read!("icc_iar1_el1") as u32
}

/// Signal end-of-interrupt for a previously acknowledged id.
pub fn end_of_interrupt(intid: u32) {
    sysreg_write!("icc_eoir1_el1", u64::from(intid));
}
