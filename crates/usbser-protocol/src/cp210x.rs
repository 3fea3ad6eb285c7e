//! Silicon Labs CP210x interface protocol
//!
//! All requests are vendor requests addressed to interface 0. Line settings
//! live in one 16-bit word:
//!
//! ```text
//! bits 15-8  data bits (5..8)
//! bits  7-4  parity    (0 none, 1 odd, 2 even, 3 mark, 4 space)
//! bits  3-0  stop bits (0 one, 1 one and a half, 2 two)
//! ```
//!
//! With event embedding enabled the chip inserts escape sequences into the
//! bulk-IN stream, which [`EventDecoder`] strips out again.

use crate::control::ControlSetup;
use crate::error::ProtocolError;
use crate::line::{DataBits, Parity, StopBits};

pub const REQ_IFC_ENABLE: u8 = 0x00;
pub const REQ_SET_LINE_CTL: u8 = 0x03;
pub const REQ_GET_LINE_CTL: u8 = 0x04;
pub const REQ_SET_BREAK: u8 = 0x05;
pub const REQ_GET_COMM_STATUS: u8 = 0x10;
pub const REQ_EMBED_EVENTS: u8 = 0x15;
pub const REQ_GET_BAUDRATE: u8 = 0x1d;
pub const REQ_SET_BAUDRATE: u8 = 0x1e;

pub const UART_ENABLE: u16 = 0x0001;
pub const UART_DISABLE: u16 = 0x0000;

pub const LINE_CTL_DATA_MASK: u16 = 0xff00;
pub const LINE_CTL_PARITY_MASK: u16 = 0x00f0;
pub const LINE_CTL_STOP_MASK: u16 = 0x000f;

pub const ESCAPE_CHAR: u8 = 0xec;

/// `ulErrors` bit reporting a break condition
pub const SERIAL_BREAK_ERROR: u32 = 0x0001;

pub const COMM_STATUS_LEN: usize = 19;

pub const LSR_OVERRUN: u8 = 0x02;
pub const LSR_PARITY: u8 = 0x04;
pub const LSR_FRAME: u8 = 0x08;
pub const LSR_BREAK: u8 = 0x10;

/// Cached copy of the chip's line control word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LineControl(pub u16);

impl LineControl {
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        match data {
            [lo, hi, ..] => Ok(Self(u16::from_le_bytes([*lo, *hi]))),
            _ => Err(ProtocolError::ShortResponse {
                expected: 2,
                actual: data.len(),
            }),
        }
    }

    pub fn to_bytes(self) -> [u8; 2] {
        self.0.to_le_bytes()
    }

    pub fn with_data_bits(self, data_bits: DataBits) -> Self {
        Self((self.0 & !LINE_CTL_DATA_MASK) | (u16::from(data_bits.bits()) << 8))
    }

    pub fn with_parity(self, parity: Parity) -> Self {
        let code: u16 = match parity {
            Parity::None => 0,
            Parity::Odd => 1,
            Parity::Even => 2,
            Parity::Mark => 3,
            Parity::Space => 4,
        };
        Self((self.0 & !LINE_CTL_PARITY_MASK) | (code << 4))
    }

    pub fn with_stop_bits(self, stop_bits: StopBits) -> Self {
        let code: u16 = match stop_bits {
            StopBits::One => 0,
            StopBits::OneAndHalf => 1,
            StopBits::Two => 2,
        };
        Self((self.0 & !LINE_CTL_STOP_MASK) | code)
    }

    pub fn data_bits_code(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn parity_code(self) -> u8 {
        ((self.0 & LINE_CTL_PARITY_MASK) >> 4) as u8
    }

    pub fn stop_bits_code(self) -> u8 {
        (self.0 & LINE_CTL_STOP_MASK) as u8
    }
}

pub fn ifc_enable(enable: bool) -> ControlSetup {
    let value = if enable { UART_ENABLE } else { UART_DISABLE };
    ControlSetup::vendor_interface(REQ_IFC_ENABLE, value, 0)
}

pub fn get_line_ctl() -> ControlSetup {
    ControlSetup::vendor_interface(REQ_GET_LINE_CTL, 0, 0)
}

/// The line control word travels in `wValue`, not in a data stage
pub fn set_line_ctl(line: LineControl) -> ControlSetup {
    ControlSetup::vendor_interface(REQ_SET_LINE_CTL, line.0, 0)
}

/// Baud rate is sent as a 4-byte little-endian data stage
pub fn set_baud_rate() -> ControlSetup {
    ControlSetup::vendor_interface(REQ_SET_BAUDRATE, 0, 0)
}

pub fn get_baud_rate() -> ControlSetup {
    ControlSetup::vendor_interface(REQ_GET_BAUDRATE, 0, 0)
}

pub fn baud_rate_payload(baud: u32) -> [u8; 4] {
    baud.to_le_bytes()
}

pub fn set_break(on: bool) -> ControlSetup {
    ControlSetup::vendor_interface(REQ_SET_BREAK, u16::from(on), 0)
}

pub fn get_comm_status() -> ControlSetup {
    ControlSetup::vendor_interface(REQ_GET_COMM_STATUS, 0, 0)
}

/// Enable (or disable with 0) in-band event escaping
pub fn embed_events(escape: u8) -> ControlSetup {
    ControlSetup::vendor_interface(REQ_EMBED_EVENTS, u16::from(escape), 0)
}

/// GET_COMM_STATUS response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommStatus {
    pub errors: u32,
    pub hold_reasons: u32,
    pub amount_in_in_queue: u32,
    pub amount_in_out_queue: u32,
    pub eof_received: u8,
    pub wait_for_immediate: u8,
    pub reserved: u8,
}

impl CommStatus {
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < COMM_STATUS_LEN {
            return Err(ProtocolError::ShortResponse {
                expected: COMM_STATUS_LEN,
                actual: data.len(),
            });
        }
        let word = |at: usize| u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);
        Ok(Self {
            errors: word(0),
            hold_reasons: word(4),
            amount_in_in_queue: word(8),
            amount_in_out_queue: word(12),
            eof_received: data[16],
            wait_for_immediate: data[17],
            reserved: data[18],
        })
    }

    pub fn break_active(&self) -> bool {
        self.errors & SERIAL_BREAK_ERROR != 0
    }
}

/// Out-of-band information recovered from the escaped stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEvent {
    /// Line status register value
    LineStatus(u8),
    /// Modem status register value
    ModemStatus(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum EscapeState {
    #[default]
    Data,
    Escape,
    LsrData0,
    LsrData1 { lsr: u8 },
    Lsr,
    Msr,
}

/// Decoder for the in-band escape sequences
///
/// State survives across calls so a sequence split between two bulk
/// transfers decodes the same as one delivered whole.
#[derive(Debug, Clone, Default)]
pub struct EventDecoder {
    state: EscapeState,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Strip escapes from `input`, returning payload bytes and line events
    pub fn decode(&mut self, input: &[u8]) -> (Vec<u8>, Vec<LineEvent>) {
        let mut data = Vec::with_capacity(input.len());
        let mut events = Vec::new();

        for &byte in input {
            self.state = match self.state {
                EscapeState::Data if byte == ESCAPE_CHAR => EscapeState::Escape,
                EscapeState::Data => {
                    data.push(byte);
                    EscapeState::Data
                }
                EscapeState::Escape => match byte {
                    0 => {
                        data.push(ESCAPE_CHAR);
                        EscapeState::Data
                    }
                    1 => EscapeState::LsrData0,
                    2 => EscapeState::Lsr,
                    3 => EscapeState::Msr,
                    other => {
                        tracing::warn!("Unknown CP210x escape code: {:#04x}", other);
                        EscapeState::Data
                    }
                },
                EscapeState::LsrData0 => EscapeState::LsrData1 { lsr: byte },
                EscapeState::LsrData1 { lsr } => {
                    events.push(LineEvent::LineStatus(lsr));
                    data.push(byte);
                    EscapeState::Data
                }
                EscapeState::Lsr => {
                    events.push(LineEvent::LineStatus(byte));
                    EscapeState::Data
                }
                EscapeState::Msr => {
                    events.push(LineEvent::ModemStatus(byte));
                    EscapeState::Data
                }
            };
        }

        (data, events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_control_8e1() {
        let line = LineControl(0)
            .with_data_bits(DataBits::Eight)
            .with_parity(Parity::Even)
            .with_stop_bits(StopBits::One);
        assert_eq!(line.0, 0x0820);
        assert_eq!(line.data_bits_code(), 8);
        assert_eq!(line.parity_code(), 2);
    }

    #[test]
    fn test_line_control_from_short() {
        assert!(LineControl::from_bytes(&[0x20]).is_err());
        assert_eq!(LineControl::from_bytes(&[0x20, 0x08]).unwrap().0, 0x0820);
    }

    #[test]
    fn test_parity_codes() {
        assert_eq!(LineControl(0).with_parity(Parity::Mark).0, 0x30);
        assert_eq!(LineControl(0).with_parity(Parity::Space).0, 0x40);
        assert_eq!(LineControl(0).with_stop_bits(StopBits::Two).0, 0x02);
    }

    #[test]
    fn test_request_layout() {
        assert_eq!(ifc_enable(true).value, 1);
        assert_eq!(set_line_ctl(LineControl(0x0800)).value, 0x0800);
        assert_eq!(set_break(true).value, 1);
        assert_eq!(embed_events(ESCAPE_CHAR).value, 0xec);
        assert_eq!(baud_rate_payload(115_200), [0x00, 0xc2, 0x01, 0x00]);
    }

    #[test]
    fn test_set_line_ctl_setup() {
        use crate::control::{ControlType, Recipient};

        let setup = set_line_ctl(LineControl(0x0820));
        assert_eq!(
            setup,
            ControlSetup {
                control_type: ControlType::Vendor,
                recipient: Recipient::Interface,
                request: 0x03,
                value: 0x0820,
                index: 0,
            }
        );
    }

    #[test]
    fn test_comm_status_parse() {
        let mut raw = [0u8; COMM_STATUS_LEN];
        raw[0] = 0x01;
        raw[8] = 0x10;
        let status = CommStatus::parse(&raw).unwrap();
        assert!(status.break_active());
        assert_eq!(status.amount_in_in_queue, 16);
        assert!(CommStatus::parse(&raw[..10]).is_err());
    }

    #[test]
    fn test_decoder_plain_data() {
        let mut dec = EventDecoder::new();
        let (data, events) = dec.decode(b"hello");
        assert_eq!(data, b"hello");
        assert!(events.is_empty());
    }

    #[test]
    fn test_decoder_escapes() {
        let mut dec = EventDecoder::new();
        let input = [b'a', 0xec, 0x00, 0xec, 0x02, LSR_BREAK, 0xec, 0x01, LSR_PARITY, b'b', 0xec, 0x03, 0x30];
        let (data, events) = dec.decode(&input);
        assert_eq!(data, vec![b'a', 0xec, b'b']);
        assert_eq!(
            events,
            vec![
                LineEvent::LineStatus(LSR_BREAK),
                LineEvent::LineStatus(LSR_PARITY),
                LineEvent::ModemStatus(0x30),
            ]
        );
    }

    #[test]
    fn test_decoder_split_sequence() {
        let mut dec = EventDecoder::new();
        let (first, _) = dec.decode(&[b'x', 0xec]);
        let (second, events) = dec.decode(&[0x02, LSR_BREAK, b'y']);
        assert_eq!(first, b"x");
        assert_eq!(second, b"y");
        assert_eq!(events, vec![LineEvent::LineStatus(LSR_BREAK)]);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn data_bits() -> impl Strategy<Value = DataBits> {
            prop_oneof![
                Just(DataBits::Five),
                Just(DataBits::Six),
                Just(DataBits::Seven),
                Just(DataBits::Eight),
            ]
        }

        fn parity() -> impl Strategy<Value = Parity> {
            prop_oneof![
                Just(Parity::None),
                Just(Parity::Odd),
                Just(Parity::Even),
                Just(Parity::Mark),
                Just(Parity::Space),
            ]
        }

        proptest! {
            #[test]
            fn fields_are_independent(start: u16, bits in data_bits(), par in parity()) {
                let a = LineControl(start).with_data_bits(bits).with_parity(par);
                let b = LineControl(start).with_parity(par).with_data_bits(bits);
                prop_assert_eq!(a, b);
                prop_assert_eq!(a.data_bits_code(), bits.bits());
                prop_assert_eq!(a.stop_bits_code(), (start & 0x0f) as u8);
            }

            #[test]
            fn unescaped_input_passes_through(input in proptest::collection::vec(0u8..0xec, 0..128)) {
                let (data, events) = EventDecoder::new().decode(&input);
                prop_assert_eq!(data, input);
                prop_assert!(events.is_empty());
            }
        }
    }
}
