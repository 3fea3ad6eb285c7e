//! USB Serial Simulation Library
//!
//! This crate provides virtual USB devices for testing the user-space serial
//! drivers without hardware attached. It includes:
//!
//! - **VirtualUsbDevice**: a scriptable device that records every transfer and
//!   answers control reads from a rule table
//! - **Chip presets**: devices pre-wired to behave like a PL2303, CH34x or
//!   CP210x closely enough for the drivers to initialize
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use usbser_port::{Cp210xDriver, Cp210xPort, SerialPort};
//! use usbser_sim::chips;
//!
//! let device = chips::cp210x();
//! let port = Cp210xPort::new(Arc::new(device.clone()), Cp210xDriver::default());
//!
//! port.open().unwrap();
//! port.send_data(b"hello").unwrap();
//! assert_eq!(device.written(), b"hello");
//! port.close();
//! ```

pub mod chips;
pub mod device;

pub use device::{Transfer, VirtualUsbDevice};
