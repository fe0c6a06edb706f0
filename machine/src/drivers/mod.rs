//! Device drivers.

pub mod gicv3;
pub mod pl011;

pub use pl011::PL011Uart;

use core::{marker::PhantomData, ops};

/// Zero-cost wrapper giving typed register-block access to an MMIO base
/// address.
pub struct MMIODerefWrapper<T> {
    base_addr: usize,
    phantom: PhantomData<fn() -> T>,
}

impl<T> MMIODerefWrapper<T> {
    /// Create an instance.
    ///
    /// # Safety
    ///
    /// - The user must ensure to provide a correct MMIO start address.
    pub const unsafe fn new(base_addr: usize) -> Self {
        Self {
            base_addr,
            phantom: PhantomData,
        }
    }
}

impl<T> ops::Deref for MMIODerefWrapper<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*(self.base_addr as *const _) }
    }
}
