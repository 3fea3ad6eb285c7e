//! USB-serial chip protocol encodings
//!
//! This crate knows how to talk to PL2303, CH34x and CP210x bridges at the
//! register level but performs no I/O. Each chip module turns line settings
//! into [`ControlSetup`] descriptions and payload bytes, and parses whatever
//! the chip sends back.
//!
//! # Chip families
//! - [`pl2303`]: Prolific, three hardware generations with distinct request codes
//! - [`ch34x`]: WCH, prescaler/divisor baud encoding and packed LCR
//! - [`cp210x`]: Silicon Labs, 16-bit line control word and comm status polling

pub mod ch34x;
pub mod control;
pub mod cp210x;
pub mod error;
pub mod line;
pub mod pl2303;

pub use control::{ControlSetup, ControlType, Direction, Recipient};
pub use error::ProtocolError;
pub use line::{DataBits, FlowControl, Framing, LineConfig, Parity, StopBits, DEFAULT_BAUD_RATE};

use std::fmt;

/// USB-serial bridge family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ChipFamily {
    Pl2303,
    Ch34x,
    Cp210x,
}

impl ChipFamily {
    /// Name used as the prefix of port names
    pub fn name(&self) -> &'static str {
        match self {
            ChipFamily::Pl2303 => "PL2303",
            ChipFamily::Ch34x => "CH34x",
            ChipFamily::Cp210x => "CP210x",
        }
    }
}

impl fmt::Display for ChipFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
