//! Kernel identification strings.

pub const KERNEL_BUILD_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const KERNEL_VERSION: &str = concat!("kestrel-", env!("CARGO_PKG_VERSION"));
