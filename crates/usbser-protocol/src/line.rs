//! Line configuration model shared by every backend
//!
//! These are the values a caller asks for. Each chip module translates them
//! into its own register layout.

use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;

/// Baud rate every backend programs right after open
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Number of data bits per character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataBits {
    Five,
    Six,
    Seven,
    #[default]
    Eight,
}

impl DataBits {
    /// Number of bits as an integer
    pub fn bits(self) -> u8 {
        match self {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        }
    }

    /// Inverse of [`DataBits::bits`]
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            5 => Some(DataBits::Five),
            6 => Some(DataBits::Six),
            7 => Some(DataBits::Seven),
            8 => Some(DataBits::Eight),
            _ => None,
        }
    }
}

/// Parity mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
    Mark,
    Space,
}

impl Parity {
    /// Single-letter form used in framing strings such as `8N1`
    pub fn letter(self) -> char {
        match self {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
            Parity::Mark => 'M',
            Parity::Space => 'S',
        }
    }

    fn from_letter(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'N' => Some(Parity::None),
            'O' => Some(Parity::Odd),
            'E' => Some(Parity::Even),
            'M' => Some(Parity::Mark),
            'S' => Some(Parity::Space),
            _ => None,
        }
    }
}

/// Number of stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StopBits {
    #[default]
    One,
    OneAndHalf,
    Two,
}

impl StopBits {
    fn label(self) -> &'static str {
        match self {
            StopBits::One => "1",
            StopBits::OneAndHalf => "1.5",
            StopBits::Two => "2",
        }
    }
}

/// Flow control mode
///
/// Only [`FlowControl::None`] is implemented by the USB-direct backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FlowControl {
    #[default]
    None,
    /// RTS/CTS
    Hardware,
    /// XON/XOFF
    Software,
}

/// Complete line configuration of a UART
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LineConfig {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }
}

impl LineConfig {
    /// Replace data bits, parity and stop bits from a framing string like `8N1`
    pub fn with_framing(self, framing: &str) -> Result<Self, ProtocolError> {
        let framing: Framing = framing.parse()?;
        Ok(Self {
            data_bits: framing.data_bits,
            parity: framing.parity,
            stop_bits: framing.stop_bits,
            ..self
        })
    }

    /// Framing part of this configuration
    pub fn framing(&self) -> Framing {
        Framing {
            data_bits: self.data_bits,
            parity: self.parity,
            stop_bits: self.stop_bits,
        }
    }
}

impl fmt::Display for LineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.baud_rate, self.framing())
    }
}

/// Data bits, parity and stop bits in the conventional `8N1` notation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Framing {
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.data_bits.bits(),
            self.parity.letter(),
            self.stop_bits.label()
        )
    }
}

impl FromStr for Framing {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || ProtocolError::InvalidFraming(s.to_string());

        let mut chars = s.chars();
        let data_bits = chars
            .next()
            .and_then(|c| c.to_digit(10))
            .and_then(|d| DataBits::from_bits(d as u8))
            .ok_or_else(invalid)?;
        let parity = chars
            .next()
            .and_then(Parity::from_letter)
            .ok_or_else(invalid)?;
        let stop_bits = match chars.as_str() {
            "1" => StopBits::One,
            "1.5" => StopBits::OneAndHalf,
            "2" => StopBits::Two,
            _ => return Err(invalid()),
        };

        Ok(Self {
            data_bits,
            parity,
            stop_bits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_9600_8n1() {
        let config = LineConfig::default();
        assert_eq!(config.to_string(), "9600 8N1");
    }

    #[test]
    fn test_parse_framing() {
        let framing: Framing = "7e2".parse().unwrap();
        assert_eq!(framing.data_bits, DataBits::Seven);
        assert_eq!(framing.parity, Parity::Even);
        assert_eq!(framing.stop_bits, StopBits::Two);

        let framing: Framing = "5S1.5".parse().unwrap();
        assert_eq!(framing.stop_bits, StopBits::OneAndHalf);
        assert_eq!(framing.to_string(), "5S1.5");
    }

    #[test]
    fn test_parse_framing_rejects_garbage() {
        assert!("9N1".parse::<Framing>().is_err());
        assert!("8X1".parse::<Framing>().is_err());
        assert!("8N3".parse::<Framing>().is_err());
        assert!("".parse::<Framing>().is_err());
    }

    #[test]
    fn test_with_framing_keeps_baud() {
        let config = LineConfig {
            baud_rate: 115_200,
            ..Default::default()
        }
        .with_framing("8O1")
        .unwrap();
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.parity, Parity::Odd);
    }
}
