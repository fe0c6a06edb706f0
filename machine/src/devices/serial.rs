/// Byte-oriented serial operations.
pub trait SerialOps {
    /// Read one byte from serial without translation.
    fn read_byte(&self) -> u8;
    /// Write one byte to serial without translation.
    fn write_byte(&self, byte: u8);
    /// Wait until the TX buffer is drained.
    fn flush(&self);
    /// Consume and discard pending RX input.
    fn clear_rx(&self);
}
