//! Serial ports over user-space USB drivers
//!
//! This crate provides the [`SerialPort`] contract and its backends:
//!
//! - [`Pl2303Port`], [`Ch34xPort`] and [`Cp210xPort`] drive the chip directly
//!   over USB (through [`nusb`](nusb_backend)) without any kernel serial driver
//! - [`NativePort`] wraps a port the operating system already provides
//! - [`LoopbackPort`] echoes what it is sent
//!
//! Received data and break transitions are published as [`PortEvent`]s on a
//! broadcast channel; see [`SerialPort::subscribe`].
//!
//! # Threads
//! An open USB-direct port runs one reader thread that polls the bulk-IN
//! endpoint. `close()` stops and joins it before the device is released.
//! Writes are queued and never waited on.

pub mod break_timer;
pub mod ch34x;
pub mod cp210x;
pub mod error;
pub mod events;
pub mod loopback;
pub mod native;
pub mod nusb_backend;
pub mod pl2303;
pub mod port;
pub mod reader;
pub mod transport;
pub mod usb_port;

pub use ch34x::{Ch34xDriver, Ch34xPort};
pub use cp210x::{Cp210xDriver, Cp210xOptions, Cp210xPort};
pub use error::{PortError, UsbError};
pub use events::{BreakSource, EventSender, PortEvent, PortEventReceiver, PortState};
pub use loopback::{LoopbackPort, LOOPBACK_PORT_NAME};
pub use native::NativePort;
pub use nusb_backend::NusbDevice;
pub use pl2303::{Pl2303Driver, Pl2303Port};
pub use port::{SerialPort, DEFAULT_BREAK_DURATION};
pub use transport::{BulkEndpoints, DeviceDescriptor, DeviceIdentity, UsbDevice, UsbHandle};
pub use usb_port::{ChipDriver, ChipIo, UsbPortConfig, UsbSerialPort};

// Re-export the line model so callers need only this crate
pub use usbser_protocol::{
    ChipFamily, DataBits, FlowControl, Framing, LineConfig, Parity, StopBits, DEFAULT_BAUD_RATE,
};
