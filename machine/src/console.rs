use crate::synchronization::{interface::Mutex, IRQSafeNullLock};

pub mod null_console;

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

/// Console interfaces.
pub mod interface {
    use {crate::devices::serial::SerialOps, core::fmt};

    /// Console write functions.
    pub trait Write {
        /// Write a Rust format string.
        fn write_fmt(&self, args: fmt::Arguments) -> fmt::Result;
    }

    /// A trait that must be implemented by devices that are candidates for the
    /// global console.
    pub trait ConsoleOps: SerialOps {
        /// Send a character.
        fn write_char(&self, c: char) {
            self.write_byte(c as u8);
        }
        /// Display a string.
        fn write_string(&self, string: &str) {
            for b in string.bytes() {
                self.write_byte(b);
            }
        }
        /// Receive a character.
        fn read_char(&self) -> char {
            self.read_byte() as char
        }
    }

    /// Trait alias for a full-fledged console.
    pub trait All: Write + ConsoleOps {}
}

//--------------------------------------------------------------------------------------------------
// Global instances
//--------------------------------------------------------------------------------------------------

static CONSOLE: IRQSafeNullLock<&'static (dyn interface::All + Sync)> =
    IRQSafeNullLock::new(&null_console::NULL_CONSOLE);

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

/// Register a new console.
pub fn register_console(new_console: &'static (dyn interface::All + Sync)) {
    CONSOLE.lock(|con| *con = new_console);
}

/// Return a reference to the currently registered console.
///
/// This is the global console used by all printing macros.
pub fn console() -> &'static dyn interface::All {
    CONSOLE.lock(|con| *con)
}
