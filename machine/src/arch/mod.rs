//! Conditional re-export of the architecture backend.

#[cfg(target_arch = "aarch64")]
#[macro_use]
pub mod aarch64;

#[cfg(target_arch = "aarch64")]
pub use aarch64::*;
