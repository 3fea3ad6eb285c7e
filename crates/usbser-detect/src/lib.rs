//! USB Serial Port Detection Library
//!
//! This crate finds the serial ports usbser can open:
//!
//! - **USB-direct**: PL2303, CH34x and CP210x adapters matched by VID/PID
//!   and driven without a kernel serial driver
//! - **Native**: ports the operating system already provides
//! - **Loop-back**: a virtual port that echoes what it is sent
//!
//! # Example
//!
//! ```rust,no_run
//! use usbser_detect::PortScanner;
//!
//! let scanner = PortScanner::new();
//! let ports = scanner.scan().unwrap();
//!
//! for (index, found) in ports.iter().enumerate() {
//!     println!("{}: {}", index, found.summary);
//! }
//! ```

pub mod error;
pub mod scanner;
pub mod usb_ids;

pub use error::DetectError;
pub use scanner::{DiscoveredPort, PortKind, PortScanner, PortSummary, ScannerConfig, SerialPortInfo};
pub use usb_ids::{lookup, ChipMatch, UsbId};
