//! Error types for port discovery

use thiserror::Error;
use usbser_port::UsbError;

/// Errors that can occur during discovery
#[derive(Debug, Error)]
pub enum DetectError {
    /// Failed to list USB devices
    #[error("failed to enumerate USB devices: {0}")]
    Usb(#[from] UsbError),

    /// Failed to list the operating system's serial ports
    #[error("failed to enumerate serial ports: {0}")]
    EnumerationFailed(String),

    /// Serial port error
    #[error("serial port error: {0}")]
    SerialPort(#[from] serialport::Error),
}
