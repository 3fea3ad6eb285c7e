//! Prolific PL2303 register protocol
//!
//! The PL2303 speaks a CDC-like class protocol for line coding and break,
//! plus a set of vendor register reads/writes used during initialization.
//! Three hardware generations exist and they disagree on request codes.
//!
//! # Line coding block
//! ```text
//! byte 0-3  baud rate, little endian
//! byte 4    stop bits   (0 = 1, 1 = 1.5, 2 = 2)
//! byte 5    parity      (0 = none, 1 = odd, 2 = even, 3 = mark, 4 = space)
//! byte 6    data bits   (5..8)
//! ```

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use crate::control::ControlSetup;
use crate::error::ProtocolError;
use crate::line::{DataBits, Parity, StopBits};

pub const VENDOR_WRITE_REQUEST: u8 = 0x01;
pub const VENDOR_WRITE_NREQUEST: u8 = 0x80;
pub const VENDOR_READ_REQUEST: u8 = 0x01;
pub const VENDOR_READ_NREQUEST: u8 = 0x81;

pub const SET_LINE_REQUEST: u8 = 0x20;
pub const GET_LINE_REQUEST: u8 = 0x21;
pub const SET_CONTROL_REQUEST: u8 = 0x22;
pub const BREAK_REQUEST: u8 = 0x23;

pub const CONTROL_DTR: u8 = 0x01;
pub const CONTROL_RTS: u8 = 0x02;

pub const BREAK_ON: u16 = 0xffff;
pub const BREAK_OFF: u16 = 0x0000;

/// Vendor register read that only HX-class silicon answers
pub const READ_TYPE_HX_STATUS: u16 = 0x8080;

pub const HXN_RESET_REG: u16 = 0x07;
pub const HXN_RESET_UPSTREAM_PIPE: u16 = 0x02;
pub const HXN_RESET_DOWNSTREAM_PIPE: u16 = 0x01;

/// Length of the GET_LINE / SET_LINE data stage
pub const LINE_CODING_LEN: usize = 7;

/// Supported baud rates in ascending order
pub const BAUD_RATES: [u32; 25] = [
    75, 150, 300, 600, 1200, 1800, 2400, 3600, 4800, 7200, 9600, 14400, 19200, 28800, 38400,
    57600, 115200, 230400, 460800, 614400, 921600, 1228800, 2457600, 3000000, 6000000,
];

/// PL2303 hardware generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChipType {
    /// Type 0 and type 1 (difference unknown)
    Type01,
    /// HX generation
    Hx,
    /// HXN generation (G-series), different vendor request codes
    Hxn,
}

impl ChipType {
    pub fn name(&self) -> &'static str {
        match self {
            ChipType::Type01 => "Type 0/1",
            ChipType::Hx => "HX",
            ChipType::Hxn => "HXN",
        }
    }

    /// Request code for vendor register reads
    pub fn vendor_read_request(&self) -> u8 {
        match self {
            ChipType::Hxn => VENDOR_READ_NREQUEST,
            _ => VENDOR_READ_REQUEST,
        }
    }

    /// Request code for vendor register writes
    pub fn vendor_write_request(&self) -> u8 {
        match self {
            ChipType::Hxn => VENDOR_WRITE_NREQUEST,
            _ => VENDOR_WRITE_REQUEST,
        }
    }
}

impl fmt::Display for ChipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What the device descriptor alone says about the generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorClass {
    /// Definitely type 0 or 1
    Type01,
    /// HX or HXN; tell them apart with [`READ_TYPE_HX_STATUS`]
    NeedsHxProbe,
}

/// Classify a device from `bDeviceClass` and `bMaxPacketSize0`
///
/// Descriptors matching none of the known layouts are treated as type 0/1.
pub fn classify_descriptor(device_class: u8, max_packet_size_0: u8) -> DescriptorClass {
    if device_class == 0x02 {
        return DescriptorClass::Type01;
    }
    if max_packet_size_0 == 0x40 {
        return DescriptorClass::NeedsHxProbe;
    }
    // 0x00 and 0xff are type 0/1; anything else falls back to the same
    DescriptorClass::Type01
}

/// Resolve the HX/HXN ambiguity from the status probe outcome
///
/// `probe_len` is the number of bytes the status read returned, `None` if
/// the transfer failed outright.
pub fn chip_type_from_probe(probe_len: Option<usize>) -> ChipType {
    match probe_len {
        Some(1) => ChipType::Hx,
        _ => ChipType::Hxn,
    }
}

/// Per-device behaviour flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Quirks(u8);

impl Quirks {
    pub const NONE: Quirks = Quirks(0);
    pub const UART_STATE_IDX0: Quirks = Quirks(1 << 0);
    pub const LEGACY: Quirks = Quirks(1 << 1);
    pub const ENDPOINT_HACK: Quirks = Quirks(1 << 2);

    pub const fn from_bits(bits: u8) -> Self {
        Quirks(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Quirks) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    /// Table quirks combined with the legacy flag implied by the generation
    pub fn for_chip(self, chip: ChipType) -> Quirks {
        match chip {
            ChipType::Type01 => self | Quirks::LEGACY,
            _ => self,
        }
    }
}

impl BitOr for Quirks {
    type Output = Quirks;

    fn bitor(self, rhs: Quirks) -> Quirks {
        Quirks(self.0 | rhs.0)
    }
}

impl BitOrAssign for Quirks {
    fn bitor_assign(&mut self, rhs: Quirks) {
        self.0 |= rhs.0;
    }
}

/// One step of the vendor register handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VendorOp {
    Read { value: u16 },
    Write { value: u16, index: u16 },
}

/// Magic register sequence run on open by every generation except HXN
pub fn init_handshake(legacy: bool) -> [VendorOp; 11] {
    use VendorOp::{Read, Write};
    [
        Read { value: 0x8484 },
        Write { value: 0x0404, index: 0 },
        Read { value: 0x8484 },
        Read { value: 0x8383 },
        Read { value: 0x8484 },
        Write { value: 0x0404, index: 1 },
        Read { value: 0x8484 },
        Read { value: 0x8383 },
        Write { value: 0, index: 1 },
        Write { value: 1, index: 0 },
        Write {
            value: 2,
            index: if legacy { 0x24 } else { 0x44 },
        },
    ]
}

/// How the data pipes are reset after the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipeReset {
    /// Clear the halt condition on both bulk endpoints
    ClearHalt,
    /// Issue these vendor register writes
    VendorWrites(Vec<(u16, u16)>),
}

pub fn pipe_reset(chip: ChipType, quirks: Quirks) -> PipeReset {
    if quirks.contains(Quirks::LEGACY) {
        PipeReset::ClearHalt
    } else if chip == ChipType::Hxn {
        PipeReset::VendorWrites(vec![(
            HXN_RESET_REG,
            HXN_RESET_UPSTREAM_PIPE | HXN_RESET_DOWNSTREAM_PIPE,
        )])
    } else {
        PipeReset::VendorWrites(vec![(8, 0), (9, 0)])
    }
}

pub fn vendor_read(chip: ChipType, value: u16) -> ControlSetup {
    ControlSetup::vendor_device(chip.vendor_read_request(), value, 0)
}

pub fn vendor_write(chip: ChipType, value: u16, index: u16) -> ControlSetup {
    ControlSetup::vendor_device(chip.vendor_write_request(), value, index)
}

/// Status read used to tell HX from HXN (always the legacy request code)
pub fn hx_status_probe() -> ControlSetup {
    ControlSetup::vendor_device(VENDOR_READ_REQUEST, READ_TYPE_HX_STATUS, 0)
}

pub fn get_line() -> ControlSetup {
    ControlSetup::class_interface(GET_LINE_REQUEST, 0, 0)
}

pub fn set_line() -> ControlSetup {
    ControlSetup::class_interface(SET_LINE_REQUEST, 0, 0)
}

pub fn set_control_lines(control: u8) -> ControlSetup {
    ControlSetup::class_interface(SET_CONTROL_REQUEST, u16::from(control), 0)
}

pub fn set_break(on: bool) -> ControlSetup {
    ControlSetup::class_interface(BREAK_REQUEST, if on { BREAK_ON } else { BREAK_OFF }, 0)
}

/// Smallest supported baud rate not below `requested`
pub fn resolve_baud_rate(requested: u32) -> Result<u32, ProtocolError> {
    let idx = BAUD_RATES.partition_point(|&b| b < requested);
    BAUD_RATES
        .get(idx)
        .copied()
        .ok_or(ProtocolError::UnsupportedBaudRate { requested })
}

/// The 7-byte line coding block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LineCoding([u8; LINE_CODING_LEN]);

impl LineCoding {
    /// Build from a GET_LINE response
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        let bytes: [u8; LINE_CODING_LEN] =
            data.try_into().map_err(|_| ProtocolError::ShortResponse {
                expected: LINE_CODING_LEN,
                actual: data.len(),
            })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; LINE_CODING_LEN] {
        &self.0
    }

    pub fn baud_rate(&self) -> u32 {
        u32::from_le_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    pub fn with_baud_rate(mut self, baud: u32) -> Self {
        self.0[..4].copy_from_slice(&baud.to_le_bytes());
        self
    }

    pub fn with_stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.0[4] = match stop_bits {
            StopBits::One => 0,
            StopBits::OneAndHalf => 1,
            StopBits::Two => 2,
        };
        self
    }

    pub fn with_parity(mut self, parity: Parity) -> Self {
        self.0[5] = match parity {
            Parity::None => 0,
            Parity::Odd => 1,
            Parity::Even => 2,
            Parity::Mark => 3,
            Parity::Space => 4,
        };
        self
    }

    pub fn with_data_bits(mut self, data_bits: DataBits) -> Self {
        self.0[6] = data_bits.bits();
        self
    }
}
