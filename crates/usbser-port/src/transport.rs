//! USB transport abstraction
//!
//! Chip drivers never touch a USB stack directly. They go through
//! [`UsbDevice`] (an enumerated, not yet opened device) and [`UsbHandle`]
//! (an opened device with interface 0 claimed). The [`nusb`](crate::nusb_backend)
//! backend implements these for real hardware; tests substitute a recording
//! mock.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use usbser_protocol::ControlSetup;

use crate::error::{PortError, UsbError};

/// Where a device sits on the bus and what it claims to be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
    pub bus: u8,
    pub address: u8,
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} bus {} addr {}",
            self.vendor_id, self.product_id, self.bus, self.address
        )
    }
}

/// Device descriptor fields the drivers care about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceDescriptor {
    /// `bDeviceClass`
    pub device_class: u8,
    /// `bMaxPacketSize0`
    pub max_packet_size_0: u8,
}

/// Bulk endpoint addresses of interface 0, alternate setting 0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkEndpoints {
    pub data_in: u8,
    pub data_out: u8,
}

impl BulkEndpoints {
    /// Pick the bulk IN and OUT addresses out of an endpoint list
    ///
    /// Takes `(address, is_bulk)` pairs. The last bulk endpoint in each
    /// direction wins.
    pub fn from_endpoints(
        endpoints: impl IntoIterator<Item = (u8, bool)>,
    ) -> Result<Self, PortError> {
        let mut data_in = None;
        let mut data_out = None;
        for (address, is_bulk) in endpoints {
            if !is_bulk {
                continue;
            }
            if address & 0x80 != 0 {
                data_in = Some(address);
            } else {
                data_out = Some(address);
            }
        }
        match (data_in, data_out) {
            (Some(data_in), Some(data_out)) => Ok(Self { data_in, data_out }),
            (None, _) => Err(PortError::MissingEndpoint { direction: "IN" }),
            (_, None) => Err(PortError::MissingEndpoint { direction: "OUT" }),
        }
    }
}

/// An enumerated USB device that can be opened
pub trait UsbDevice: Send + Sync + 'static {
    fn identity(&self) -> DeviceIdentity;

    /// Open the device, detach any kernel driver and claim interface 0
    fn open(&self) -> Result<Arc<dyn UsbHandle>, UsbError>;
}

/// An open device with interface 0 claimed
///
/// Dropping the last reference releases the interface and closes the device.
pub trait UsbHandle: Send + Sync {
    fn descriptor(&self) -> DeviceDescriptor;

    /// Endpoints of interface 0, alternate setting 0, as `(address, is_bulk)`
    fn endpoints(&self) -> Result<Vec<(u8, bool)>, UsbError>;

    /// Control transfer with a device-to-host data stage of up to `length` bytes
    fn control_in(
        &self,
        setup: ControlSetup,
        length: u16,
        timeout: Duration,
    ) -> Result<Vec<u8>, UsbError>;

    /// Control transfer with an optional host-to-device data stage
    fn control_out(
        &self,
        setup: ControlSetup,
        data: &[u8],
        timeout: Duration,
    ) -> Result<(), UsbError>;

    fn clear_halt(&self, endpoint: u8) -> Result<(), UsbError>;

    /// Blocking bulk read of up to `length` bytes
    ///
    /// A timeout is not an error: whatever arrived before it (possibly
    /// nothing) is returned.
    fn read_bulk(&self, endpoint: u8, length: usize, timeout: Duration)
        -> Result<Vec<u8>, UsbError>;

    /// Queue a bulk write and return without waiting for completion
    fn submit_bulk(&self, endpoint: u8, data: Vec<u8>) -> Result<(), UsbError>;

    /// Cancel every queued bulk transfer
    fn cancel_transfers(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_selection() {
        let endpoints =
            BulkEndpoints::from_endpoints([(0x81, false), (0x02, true), (0x83, true)]).unwrap();
        assert_eq!(
            endpoints,
            BulkEndpoints {
                data_in: 0x83,
                data_out: 0x02
            }
        );
    }

    #[test]
    fn test_endpoint_selection_missing_direction() {
        assert!(matches!(
            BulkEndpoints::from_endpoints([(0x81, true)]),
            Err(PortError::MissingEndpoint { direction: "OUT" })
        ));
        assert!(matches!(
            BulkEndpoints::from_endpoints([(0x81, false), (0x02, true)]),
            Err(PortError::MissingEndpoint { direction: "IN" })
        ));
        assert!(matches!(
            BulkEndpoints::from_endpoints([]),
            Err(PortError::MissingEndpoint { .. })
        ));
    }

    #[test]
    fn test_identity_display() {
        let id = DeviceIdentity {
            vendor_id: 0x067b,
            product_id: 0x2303,
            bus: 1,
            address: 4,
        };
        assert_eq!(id.to_string(), "067b:2303 bus 1 addr 4");
    }
}
