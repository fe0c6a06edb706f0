//! Arm PL011 UART driver.
//!
//! <http://infocenter.arm.com/help/topic/com.arm.doc.ddi0183g/DDI0183G_uart_pl011_r1p5_trm.pdf>

use {
    crate::{
        arch::cpu::loop_while,
        console::interface,
        devices::serial::SerialOps,
        drivers::MMIODerefWrapper,
        synchronization::{interface::Mutex, IRQSafeNullLock},
    },
    core::fmt::{self, Arguments},
    tock_registers::{
        interfaces::{Readable, Writeable},
        register_bitfields, register_structs,
        registers::{ReadOnly, ReadWrite, WriteOnly},
    },
};

//--------------------------------------------------------------------------------------------------
// Private Definitions
//--------------------------------------------------------------------------------------------------

// PL011 UART registers.
register_bitfields! {
    u32,

    /// Flag Register
    FR [
        /// Transmit FIFO empty. If the FIFO is disabled, this bit is set when
        /// the transmit holding register is empty. If the FIFO is enabled,
        /// the TXFE bit is set when the transmit FIFO is empty.
        TXFE OFFSET(7) NUMBITS(1) [],

        /// Receive FIFO full.
        RXFF OFFSET(6) NUMBITS(1) [],

        /// Transmit FIFO full. If the FIFO is disabled, this bit is set when
        /// the transmit holding register is full. If the FIFO is enabled, the
        /// TXFF bit is set when the transmit FIFO is full.
        TXFF OFFSET(5) NUMBITS(1) [],

        /// Receive FIFO empty.
        RXFE OFFSET(4) NUMBITS(1) [],

        /// UART busy. This bit remains set until the complete byte, including
        /// all the stop bits, has been sent from the shift register.
        BUSY OFFSET(3) NUMBITS(1) []
    ],

    /// Integer Baud rate divisor
    IBRD [
        /// Integer Baud rate divisor
        BAUD_DIVINT OFFSET(0) NUMBITS(16) []
    ],

    /// Fractional Baud rate divisor
    FBRD [
        /// Fractional Baud rate divisor
        BAUD_DIVFRAC OFFSET(0) NUMBITS(6) []
    ],

    /// Line Control register
    LCR_H [
        /// Word length. These bits indicate the number of data bits
        /// transmitted or received in a frame.
        WordLength OFFSET(5) NUMBITS(2) [
            FiveBit = 0b00,
            SixBit = 0b01,
            SevenBit = 0b10,
            EightBit = 0b11
        ],

        Fifos OFFSET(4) NUMBITS(1) [
            Disabled = 0,
            Enabled = 1
        ],

        /// Use 2 stop bits
        Stop2 OFFSET(3) NUMBITS(1) [
            Disabled = 0,
            Enabled = 1
        ],

        Parity OFFSET(1) NUMBITS(1) [
            Disabled = 0,
            Enabled = 1
        ]
    ],

    /// Control Register
    CR [
        /// Receive enable.
        RXE OFFSET(9) NUMBITS(1) [
            Disabled = 0,
            Enabled = 1
        ],

        /// Transmit enable.
        TXE OFFSET(8) NUMBITS(1) [
            Disabled = 0,
            Enabled = 1
        ],

        /// UART enable. If the UART is disabled in the middle of transmission
        /// or reception, it completes the current character before stopping.
        UARTEN OFFSET(0) NUMBITS(1) [
            Disabled = 0,
            Enabled = 1
        ]
    ],

    /// Interrupt Clear Register
    ICR [
        /// Meta field for all pending interrupts.
        ALL OFFSET(0) NUMBITS(11) []
    ]
}

register_structs! {
    #[allow(non_snake_case)]
    RegisterBlock {
        (0x00 => Data: ReadWrite<u32>),
        (0x04 => Status: ReadWrite<u32>),
        (0x08 => _reserved_1),
        (0x18 => Flag: ReadOnly<u32, FR::Register>),
        (0x1c => _reserved_2),
        (0x24 => IntegerBaudRate: WriteOnly<u32, IBRD::Register>),
        (0x28 => FractionalBaudRate: WriteOnly<u32, FBRD::Register>),
        (0x2c => LineControl: ReadWrite<u32, LCR_H::Register>),
        (0x30 => Control: WriteOnly<u32, CR::Register>),
        (0x34 => _reserved_3),
        (0x44 => InterruptClear: WriteOnly<u32, ICR::Register>),
        (0x48 => _reserved_4),
        (0x1000 => @END),
    }
}

type Registers = MMIODerefWrapper<RegisterBlock>;

struct PL011UartInner {
    registers: Registers,
}

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

pub struct PL011Uart {
    inner: IRQSafeNullLock<PL011UartInner>,
}

pub struct RateDivisors {
    integer_baud_rate_divisor: u32,
    fractional_baud_rate_divisor: u32,
}

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

impl RateDivisors {
    // Set integer & fractional part of baud rate.
    // Integer = clock/(16 * Baud)
    // Fraction = (Fractional part * 64) + 0.5
    //
    // Use an integer-only calculation: 64 * clock / (16 * rate) =
    // 4 * clock / rate, then the 6 lowest bits are the fractional part and
    // the next 16 bits the integer part.
    pub fn from_clock_and_rate(clock: u64, baud_rate: u32) -> Result<RateDivisors, &'static str> {
        let value = 4 * clock / baud_rate as u64;
        let i = ((value >> 6) & 0xffff) as u32;
        let f = (value & 0x3f) as u32;

        if value >> 6 > 0xffff {
            return Err("PL011 UART setup failed due to integer baud rate divisor out of range");
        }

        Ok(RateDivisors {
            integer_baud_rate_divisor: i,
            fractional_baud_rate_divisor: f,
        })
    }
}

impl PL011Uart {
    pub const COMPATIBLE: &'static str = "arm,pl011";

    /// Create an instance.
    ///
    /// # Safety
    ///
    /// - The user must ensure to provide a correct MMIO start address.
    pub const unsafe fn new(base_addr: usize) -> Self {
        Self {
            inner: IRQSafeNullLock::new(PL011UartInner::new(base_addr)),
        }
    }

    /// Set up baud rate and characteristics (115200 8N1).
    ///
    /// # Safety
    ///
    /// - The peripheral window must already be mapped.
    pub unsafe fn init(&self, clock: u64, baud_rate: u32) -> Result<(), &'static str> {
        self.inner.lock(|inner| inner.prepare(clock, baud_rate))
    }
}

//--------------------------------------------------------------------------------------------------
// Private Code
//--------------------------------------------------------------------------------------------------

impl PL011UartInner {
    /// Create an instance.
    ///
    /// # Safety
    ///
    /// - The user must ensure to provide a correct MMIO start address.
    pub const unsafe fn new(base_addr: usize) -> Self {
        Self {
            registers: Registers::new(base_addr),
        }
    }

    pub fn prepare(&self, clock: u64, baud_rate: u32) -> Result<(), &'static str> {
        // Turn off UART.
        self.registers.Control.set(0);

        // Wait for any ongoing transmissions to complete.
        self.flush_internal();

        // Flush TX FIFO.
        self.registers.LineControl.write(LCR_H::Fifos::Disabled);

        // Clear pending interrupts.
        self.registers.InterruptClear.write(ICR::ALL::SET);

        // From the PL011 Technical Reference Manual:
        //
        // The LCR_H, IBRD, and FBRD registers form the single 30-bit wide LCR
        // Register that is updated on a single write strobe generated by a
        // LCR_H write. To internally update the contents of IBRD or FBRD, a
        // LCR_H write must always be performed at the end.
        let divisors = RateDivisors::from_clock_and_rate(clock, baud_rate)?;
        self.registers
            .IntegerBaudRate
            .write(IBRD::BAUD_DIVINT.val(divisors.integer_baud_rate_divisor & 0xffff));
        self.registers
            .FractionalBaudRate
            .write(FBRD::BAUD_DIVFRAC.val(divisors.fractional_baud_rate_divisor & 0b11_1111));
        self.registers
            .LineControl
            .write(LCR_H::WordLength::EightBit + LCR_H::Fifos::Enabled + LCR_H::Parity::Disabled);

        // Turn on UART.
        self.registers
            .Control
            .write(CR::UARTEN::Enabled + CR::TXE::Enabled + CR::RXE::Enabled);

        Ok(())
    }

    fn flush_internal(&self) {
        loop_while(|| self.registers.Flag.is_set(FR::BUSY));
    }
}

impl SerialOps for PL011UartInner {
    fn read_byte(&self) -> u8 {
        // Wait until something is in the buffer.
        loop_while(|| self.registers.Flag.is_set(FR::RXFE));

        self.registers.Data.get() as u8
    }

    fn write_byte(&self, b: u8) {
        // Wait while the transmit FIFO is full.
        loop_while(|| self.registers.Flag.is_set(FR::TXFF));

        self.registers.Data.set(b as u32);
    }

    /// Wait until the TX FIFO is empty, aka all characters have been put on
    /// the line.
    fn flush(&self) {
        self.flush_internal();
    }

    /// Consume input until RX FIFO is empty, aka all pending characters have
    /// been consumed.
    fn clear_rx(&self) {
        loop_while(|| {
            let pending = !self.registers.Flag.is_set(FR::RXFE);
            if pending {
                self.read_byte();
            }
            pending
        });
    }
}

impl interface::ConsoleOps for PL011UartInner {}

impl fmt::Write for PL011UartInner {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        use interface::ConsoleOps;
        self.write_string(s);
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// OS Interface Code
//--------------------------------------------------------------------------------------------------

impl interface::Write for PL011Uart {
    fn write_fmt(&self, args: Arguments) -> fmt::Result {
        self.inner.lock(|inner| fmt::Write::write_fmt(inner, args))
    }
}

impl SerialOps for PL011Uart {
    fn read_byte(&self) -> u8 {
        self.inner.lock(|inner| inner.read_byte())
    }

    fn write_byte(&self, byte: u8) {
        self.inner.lock(|inner| inner.write_byte(byte))
    }

    fn flush(&self) {
        self.inner.lock(|inner| inner.flush())
    }

    fn clear_rx(&self) {
        self.inner.lock(|inner| inner.clear_rx())
    }
}

impl interface::ConsoleOps for PL011Uart {
    fn write_char(&self, c: char) {
        self.inner.lock(|inner| interface::ConsoleOps::write_char(inner, c))
    }

    fn write_string(&self, string: &str) {
        self.inner
            .lock(|inner| interface::ConsoleOps::write_string(inner, string))
    }

    fn read_char(&self) -> char {
        self.inner.lock(|inner| interface::ConsoleOps::read_char(inner))
    }
}

impl interface::All for PL011Uart {}

//--------------------------------------------------------------------------------------------------
// Testing
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn test_divisors() {
        const CLOCK: u64 = 3_000_000;
        const BAUD_RATE: u32 = 115_200;

        let divisors = RateDivisors::from_clock_and_rate(CLOCK, BAUD_RATE);
        assert!(divisors.is_ok());
        let divisors = divisors.unwrap();
        assert_eq!(divisors.integer_baud_rate_divisor, 1);
        assert_eq!(divisors.fractional_baud_rate_divisor, 40);
    }

    #[test_case]
    fn test_divisor_overflow() {
        // An absurdly slow baud rate pushes the integer divisor out of its
        // 16-bit field.
        let divisors = RateDivisors::from_clock_and_rate(4_000_000_000, 1);
        assert!(divisors.is_err());
    }
}
