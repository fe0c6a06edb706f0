//! Boot arguments.
//!
//! The bootloader constructs this record in shared non-secure memory and
//! passes its physical address in x0. It holds the initial memory layout,
//! the device tree and UART locations, and the loader's version string.

/// The record revision this kernel understands.
pub const BOOT_ARGS_VERSION_1_1: u32 = 0x11;

/// Kernel boot arguments, exactly as the bootloader lays them out.
#[repr(C)]
pub struct BootArgs {
    pub version: u32,

    /* virtual memory properties */
    pub virtbase: u64,
    pub physbase: u64,
    pub memsize: u64,

    /* kernel region */
    pub kernbase: u64,
    pub kernsize: u64,

    /* device tree */
    pub fdtbase: u64,
    pub fdtsize: u64,

    /* uart */
    pub uartbase: u64,
    pub uartsize: u64,

    /* misc */
    pub flags: u32,
    pub loader_vers: [u8; 32],
}

impl BootArgs {
    /// Panics unless the record carries the supported version tag.
    pub fn verify(&self) {
        if self.version != BOOT_ARGS_VERSION_1_1 {
            panic!(
                "boot_args version mismatch: got {:#x}, expected {:#x}",
                self.version, BOOT_ARGS_VERSION_1_1
            );
        }
    }

    /// The loader version as a string, up to the first NUL.
    pub fn loader_version(&self) -> &str {
        let len = self
            .loader_vers
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.loader_vers.len());
        core::str::from_utf8(&self.loader_vers[..len]).unwrap_or("<invalid>")
    }
}

//--------------------------------------------------------------------------------------------------
// Testing
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_args() -> BootArgs {
        let mut vers = [0u8; 32];
        vers[..10].copy_from_slice(b"loader-1.0");
        BootArgs {
            version: BOOT_ARGS_VERSION_1_1,
            virtbase: 0xffff_fff0_0000_0000,
            physbase: 0x4000_0000,
            memsize: 128 * 1024 * 1024,
            kernbase: 0x4010_0000,
            kernsize: 1024 * 1024,
            fdtbase: 0x4000_0000,
            fdtsize: 0x1_0000,
            uartbase: 0x0900_0000,
            uartsize: 0x1000,
            flags: 0,
            loader_vers: vers,
        }
    }

    #[test_case]
    fn verify_accepts_current_version() {
        sample_args().verify();
    }

    #[test_case]
    fn loader_version_stops_at_nul() {
        assert_eq!(sample_args().loader_version(), "loader-1.0");
    }
}
