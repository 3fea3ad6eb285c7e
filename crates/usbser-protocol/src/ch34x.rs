//! WCH CH340/CH341 register protocol
//!
//! Every request is a vendor request to the device. Registers are addressed
//! in pairs: the high byte of `wValue` names one register and the low byte
//! another, with `wIndex` carrying the two new values.

use crate::control::ControlSetup;
use crate::error::ProtocolError;
use crate::line::{DataBits, Parity, StopBits};

pub const REQ_READ_VERSION: u8 = 0x5f;
pub const REQ_WRITE_REG: u8 = 0x9a;
pub const REQ_READ_REG: u8 = 0x95;
pub const REQ_SERIAL_INIT: u8 = 0xa1;
pub const REQ_MODEM_CTRL: u8 = 0xa4;

pub const REG_BREAK: u8 = 0x05;
pub const REG_LCR: u8 = 0x18;
pub const NBREAK_BITS: u8 = 0x01;

pub const LCR_ENABLE_RX: u8 = 0x80;
pub const LCR_ENABLE_TX: u8 = 0x40;
pub const LCR_MARK_SPACE: u8 = 0x20;
pub const LCR_PAR_EVEN: u8 = 0x10;
pub const LCR_ENABLE_PAR: u8 = 0x08;
pub const LCR_STOP_BITS_2: u8 = 0x04;
pub const LCR_CS8: u8 = 0x03;
pub const LCR_CS7: u8 = 0x02;
pub const LCR_CS6: u8 = 0x01;
pub const LCR_CS5: u8 = 0x00;

pub const BAUDBASE_FACTOR: u32 = 1_532_620_800;
pub const BAUDBASE_DIVMAX: u32 = 3;

/// Register pair written with the encoded baud divisor
pub const BAUD_REGISTERS: u16 = 0x1312;
/// Register pair written with the line control byte
pub const LCR_REGISTERS: u16 = 0x2518;
/// LCR in the high byte, break in the low byte
pub const BREAK_REGISTERS: u16 = ((REG_LCR as u16) << 8) | REG_BREAK as u16;

pub const VERSION_LEN: usize = 2;

/// Encode a baud rate into the prescaler/divisor word
///
/// The factor is scaled down by 8 per prescaler step until it fits in 16 bits.
pub fn baud_divisor(baud: u32) -> Result<u16, ProtocolError> {
    let unsupported = ProtocolError::UnsupportedBaudRate { requested: baud };
    if baud == 0 {
        return Err(unsupported);
    }
    let mut factor = BAUDBASE_FACTOR / baud;
    if factor == 0 {
        return Err(unsupported);
    }
    let mut divisor = BAUDBASE_DIVMAX;
    while factor > 0xfff0 && divisor > 0 {
        factor >>= 3;
        divisor -= 1;
    }
    if factor > 0xfff0 {
        return Err(unsupported);
    }

    let factor = 0x1_0000 - factor;
    let encoded = (factor & 0xff00) | divisor | (1 << 7);
    Ok(encoded as u16)
}

pub fn data_bits_code(data_bits: DataBits) -> u8 {
    match data_bits {
        DataBits::Five => LCR_CS5,
        DataBits::Six => LCR_CS6,
        DataBits::Seven => LCR_CS7,
        DataBits::Eight => LCR_CS8,
    }
}

pub fn parity_code(parity: Parity) -> u8 {
    match parity {
        Parity::None => 0,
        Parity::Odd => LCR_ENABLE_PAR,
        Parity::Even => LCR_ENABLE_PAR | LCR_PAR_EVEN,
        Parity::Mark => LCR_ENABLE_PAR | LCR_MARK_SPACE,
        Parity::Space => LCR_ENABLE_PAR | LCR_MARK_SPACE | LCR_PAR_EVEN,
    }
}

pub fn stop_bits_code(stop_bits: StopBits) -> Result<u8, ProtocolError> {
    match stop_bits {
        StopBits::One => Ok(0),
        StopBits::Two => Ok(LCR_STOP_BITS_2),
        StopBits::OneAndHalf => Err(ProtocolError::Unsupported(
            "1.5 stop bits on CH34x".to_string(),
        )),
    }
}

/// Line control register, always with receiver and transmitter enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lcr {
    pub data_bits: u8,
    pub parity: u8,
    pub stop_bits: u8,
}

impl Default for Lcr {
    fn default() -> Self {
        Self {
            data_bits: LCR_CS8,
            parity: 0,
            stop_bits: 0,
        }
    }
}

impl Lcr {
    pub fn value(&self) -> u8 {
        LCR_ENABLE_RX | LCR_ENABLE_TX | self.data_bits | self.parity | self.stop_bits
    }
}

pub fn read_version() -> ControlSetup {
    ControlSetup::vendor_device(REQ_READ_VERSION, 0, 0)
}

pub fn serial_init() -> ControlSetup {
    ControlSetup::vendor_device(REQ_SERIAL_INIT, 0, 0)
}

pub fn write_baud(divisor: u16) -> ControlSetup {
    ControlSetup::vendor_device(REQ_WRITE_REG, BAUD_REGISTERS, divisor)
}

pub fn write_lcr(lcr: Lcr) -> ControlSetup {
    ControlSetup::vendor_device(REQ_WRITE_REG, LCR_REGISTERS, u16::from(lcr.value()))
}

/// DTR/RTS are active low on this chip
pub fn modem_control(control: u8) -> ControlSetup {
    ControlSetup::vendor_device(REQ_MODEM_CTRL, u16::from(!control), 0)
}

pub fn read_break() -> ControlSetup {
    ControlSetup::vendor_device(REQ_READ_REG, BREAK_REGISTERS, 0)
}

/// Apply break on/off to the `[break, lcr]` register pair read back from the chip
pub fn apply_break(regs: [u8; 2], on: bool) -> [u8; 2] {
    let [mut brk, mut lcr] = regs;
    if on {
        brk &= !NBREAK_BITS;
        lcr &= !LCR_ENABLE_TX;
    } else {
        brk |= NBREAK_BITS;
        lcr |= LCR_ENABLE_TX;
    }
    [brk, lcr]
}

pub fn write_break(regs: [u8; 2]) -> ControlSetup {
    ControlSetup::vendor_device(REQ_WRITE_REG, BREAK_REGISTERS, u16::from_le_bytes(regs))
}
