//! USB control request descriptions
//!
//! Chip modules describe every control transfer they need as a
//! [`ControlSetup`]. The transport layer maps these onto the USB stack, and
//! tests compare them bit for bit against the expected `bmRequestType`.

/// Request type field of `bmRequestType` (bits 5-6)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlType {
    Standard,
    Class,
    Vendor,
}

/// Recipient field of `bmRequestType` (bits 0-4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Recipient {
    Device,
    Interface,
    Endpoint,
    Other,
}

/// Data stage direction of a control transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Device to host
    In,
    /// Host to device
    Out,
}

/// Setup packet fields of a control transfer, minus length and direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControlSetup {
    pub control_type: ControlType,
    pub recipient: Recipient,
    pub request: u8,
    pub value: u16,
    pub index: u16,
}

impl ControlSetup {
    /// Vendor request addressed to the device
    pub const fn vendor_device(request: u8, value: u16, index: u16) -> Self {
        Self {
            control_type: ControlType::Vendor,
            recipient: Recipient::Device,
            request,
            value,
            index,
        }
    }

    /// Vendor request addressed to an interface
    pub const fn vendor_interface(request: u8, value: u16, index: u16) -> Self {
        Self {
            control_type: ControlType::Vendor,
            recipient: Recipient::Interface,
            request,
            value,
            index,
        }
    }

    /// Class request addressed to an interface
    pub const fn class_interface(request: u8, value: u16, index: u16) -> Self {
        Self {
            control_type: ControlType::Class,
            recipient: Recipient::Interface,
            request,
            value,
            index,
        }
    }

    /// Raw `bmRequestType` byte for a transfer in the given direction
    pub fn request_type(&self, direction: Direction) -> u8 {
        let dir = match direction {
            Direction::In => 0x80,
            Direction::Out => 0x00,
        };
        let kind = match self.control_type {
            ControlType::Standard => 0x00,
            ControlType::Class => 0x20,
            ControlType::Vendor => 0x40,
        };
        let recipient = match self.recipient {
            Recipient::Device => 0x00,
            Recipient::Interface => 0x01,
            Recipient::Endpoint => 0x02,
            Recipient::Other => 0x03,
        };
        dir | kind | recipient
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_type_bytes() {
        let vendor = ControlSetup::vendor_device(0x01, 0, 0);
        assert_eq!(vendor.request_type(Direction::Out), 0x40);
        assert_eq!(vendor.request_type(Direction::In), 0xC0);

        let class = ControlSetup::class_interface(0x20, 0, 0);
        assert_eq!(class.request_type(Direction::Out), 0x21);
        assert_eq!(class.request_type(Direction::In), 0xA1);

        let iface = ControlSetup::vendor_interface(0x03, 0, 0);
        assert_eq!(iface.request_type(Direction::Out), 0x41);
        assert_eq!(iface.request_type(Direction::In), 0xC1);
    }
}
