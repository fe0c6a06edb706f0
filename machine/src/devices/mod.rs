//! Device interfaces.

pub mod serial;

pub use serial::SerialOps;
