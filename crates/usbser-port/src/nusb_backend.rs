//! Transport backed by the `nusb` crate
//!
//! All nusb calls are made through the blocking `.wait()` form; the reader
//! worker is a plain thread and control transfers are short.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use nusb::descriptors::TransferType;
use nusb::transfer::{Bulk, ControlIn, ControlOut, In, Out, TransferError};
use nusb::{Endpoint, MaybeFuture};
use tracing::{debug, trace};
use usbser_protocol::{ControlSetup, ControlType, Recipient};

use crate::error::UsbError;
use crate::transport::{DeviceDescriptor, DeviceIdentity, UsbDevice, UsbHandle};

const INTERFACE: u8 = 0;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn control_type(setup: &ControlSetup) -> nusb::transfer::ControlType {
    match setup.control_type {
        ControlType::Standard => nusb::transfer::ControlType::Standard,
        ControlType::Class => nusb::transfer::ControlType::Class,
        ControlType::Vendor => nusb::transfer::ControlType::Vendor,
    }
}

fn recipient(setup: &ControlSetup) -> nusb::transfer::Recipient {
    match setup.recipient {
        Recipient::Device => nusb::transfer::Recipient::Device,
        Recipient::Interface => nusb::transfer::Recipient::Interface,
        Recipient::Endpoint => nusb::transfer::Recipient::Endpoint,
        Recipient::Other => nusb::transfer::Recipient::Other,
    }
}

fn transfer_error(err: TransferError) -> UsbError {
    match err {
        TransferError::Cancelled => UsbError::Timeout,
        TransferError::Disconnected => UsbError::Disconnected,
        other => UsbError::Transfer(other.to_string()),
    }
}

/// A device found by `nusb::list_devices`
#[derive(Debug, Clone)]
pub struct NusbDevice {
    info: nusb::DeviceInfo,
}

impl NusbDevice {
    /// Snapshot of every USB device currently attached
    pub fn list() -> Result<Vec<NusbDevice>, UsbError> {
        let devices = nusb::list_devices()
            .wait()
            .map_err(|e| UsbError::Enumerate(e.to_string()))?
            .map(|info| NusbDevice { info })
            .collect();
        Ok(devices)
    }
}

impl UsbDevice for NusbDevice {
    fn identity(&self) -> DeviceIdentity {
        DeviceIdentity {
            vendor_id: self.info.vendor_id(),
            product_id: self.info.product_id(),
            // bus_id() is numeric on Linux; other platforms fall back to 0
            bus: self.info.bus_id().parse::<u8>().unwrap_or(0),
            address: self.info.device_address(),
        }
    }

    fn open(&self) -> Result<Arc<dyn UsbHandle>, UsbError> {
        let device = self
            .info
            .open()
            .wait()
            .map_err(|e| UsbError::Open(e.to_string()))?;
        let interface = device
            .detach_and_claim_interface(INTERFACE)
            .wait()
            .map_err(|e| UsbError::Claim {
                interface: INTERFACE,
                message: e.to_string(),
            })?;
        debug!("Claimed interface {} on {}", INTERFACE, self.identity());

        Ok(Arc::new(NusbHandle {
            device,
            interface,
            bulk_in: Mutex::new(None),
            bulk_out: Mutex::new(None),
        }))
    }
}

/// Open nusb device with interface 0 claimed
pub struct NusbHandle {
    device: nusb::Device,
    interface: nusb::Interface,
    bulk_in: Mutex<Option<Endpoint<Bulk, In>>>,
    bulk_out: Mutex<Option<Endpoint<Bulk, Out>>>,
}

impl NusbHandle {
    fn open_in(&self, address: u8) -> Result<Endpoint<Bulk, In>, UsbError> {
        self.interface
            .endpoint::<Bulk, In>(address)
            .map_err(|e| UsbError::Endpoint {
                address,
                message: e.to_string(),
            })
    }

    fn open_out(&self, address: u8) -> Result<Endpoint<Bulk, Out>, UsbError> {
        self.interface
            .endpoint::<Bulk, Out>(address)
            .map_err(|e| UsbError::Endpoint {
                address,
                message: e.to_string(),
            })
    }
}

impl UsbHandle for NusbHandle {
    fn descriptor(&self) -> DeviceDescriptor {
        let desc = self.device.device_descriptor();
        DeviceDescriptor {
            device_class: desc.class(),
            max_packet_size_0: desc.max_packet_size_0(),
        }
    }

    fn endpoints(&self) -> Result<Vec<(u8, bool)>, UsbError> {
        let config = self
            .device
            .active_configuration()
            .map_err(|e| UsbError::Transfer(e.to_string()))?;

        let alt = config
            .interfaces()
            .find(|group| group.interface_number() == INTERFACE)
            .and_then(|group| group.alt_settings().next());

        Ok(alt
            .map(|alt| {
                alt.endpoints()
                    .map(|ep| (ep.address(), ep.transfer_type() == TransferType::Bulk))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn control_in(
        &self,
        setup: ControlSetup,
        length: u16,
        timeout: Duration,
    ) -> Result<Vec<u8>, UsbError> {
        self.interface
            .control_in(
                ControlIn {
                    control_type: control_type(&setup),
                    recipient: recipient(&setup),
                    request: setup.request,
                    value: setup.value,
                    index: setup.index,
                    length,
                },
                timeout,
            )
            .wait()
            .map_err(transfer_error)
    }

    fn control_out(
        &self,
        setup: ControlSetup,
        data: &[u8],
        timeout: Duration,
    ) -> Result<(), UsbError> {
        self.interface
            .control_out(
                ControlOut {
                    control_type: control_type(&setup),
                    recipient: recipient(&setup),
                    request: setup.request,
                    value: setup.value,
                    index: setup.index,
                    data,
                },
                timeout,
            )
            .wait()
            .map_err(transfer_error)
    }

    fn clear_halt(&self, endpoint: u8) -> Result<(), UsbError> {
        let result = if endpoint & 0x80 != 0 {
            let mut slot = lock(&self.bulk_in);
            if slot.is_none() {
                *slot = Some(self.open_in(endpoint)?);
            }
            match slot.as_mut() {
                Some(ep) => ep.clear_halt().wait(),
                None => return Ok(()),
            }
        } else {
            let mut slot = lock(&self.bulk_out);
            if slot.is_none() {
                *slot = Some(self.open_out(endpoint)?);
            }
            match slot.as_mut() {
                Some(ep) => ep.clear_halt().wait(),
                None => return Ok(()),
            }
        };
        result.map_err(|e| UsbError::Transfer(e.to_string()))
    }

    fn read_bulk(
        &self,
        endpoint: u8,
        length: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, UsbError> {
        let mut slot = lock(&self.bulk_in);
        if slot.is_none() {
            *slot = Some(self.open_in(endpoint)?);
        }
        let Some(ep) = slot.as_mut() else {
            return Ok(Vec::new());
        };

        let buffer = ep.allocate(length);
        let completion = ep.transfer_blocking(buffer, timeout);
        let received = completion.buffer[..completion.actual_len].to_vec();
        match completion.status {
            Ok(()) => Ok(received),
            // Timed out; keep whatever made it across
            Err(TransferError::Cancelled) => Ok(received),
            Err(e) => Err(transfer_error(e)),
        }
    }

    fn submit_bulk(&self, endpoint: u8, data: Vec<u8>) -> Result<(), UsbError> {
        let mut slot = lock(&self.bulk_out);
        if slot.is_none() {
            *slot = Some(self.open_out(endpoint)?);
        }
        let Some(ep) = slot.as_mut() else {
            return Ok(());
        };

        // Reap finished writes so their buffers are released
        while ep.pending() > 0 {
            match ep.wait_next_complete(Duration::ZERO) {
                Some(done) => {
                    if let Err(e) = done.status {
                        debug!("Bulk OUT transfer failed: {}", e);
                    }
                }
                None => break,
            }
        }

        let mut buffer = ep.allocate(data.len());
        buffer.extend_from_slice(&data);
        ep.submit(buffer);
        trace!("Submitted {} bytes to endpoint {:#04x}", data.len(), endpoint);
        Ok(())
    }

    fn cancel_transfers(&self) {
        if let Some(ep) = lock(&self.bulk_out).as_mut() {
            ep.cancel_all();
        }
        if let Some(ep) = lock(&self.bulk_in).as_mut() {
            ep.cancel_all();
        }
    }
}
