//! Error types for ports and the USB transport

use thiserror::Error;

/// Failures reported by the USB transport layer
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UsbError {
    /// Device list could not be read
    #[error("failed to enumerate USB devices: {0}")]
    Enumerate(String),

    /// Device could not be opened
    #[error("failed to open device: {0}")]
    Open(String),

    /// Interface could not be claimed (kernel driver still bound, permissions)
    #[error("failed to claim interface {interface}: {message}")]
    Claim { interface: u8, message: String },

    /// Endpoint could not be opened
    #[error("endpoint {address:#04x} unavailable: {message}")]
    Endpoint { address: u8, message: String },

    /// Control or bulk transfer failed
    #[error("transfer failed: {0}")]
    Transfer(String),

    /// Transfer did not complete in time
    #[error("transfer timed out")]
    Timeout,

    /// Device went away
    #[error("device disconnected")]
    Disconnected,
}

/// Errors surfaced through the [`SerialPort`](crate::SerialPort) contract
#[derive(Debug, Error)]
pub enum PortError {
    /// Operation requires an open port
    #[error("port is not open")]
    NotOpen,

    /// `open()` called on a port that is already open
    #[error("port is already open")]
    AlreadyOpen,

    /// Interface 0 lacks a bulk IN or bulk OUT endpoint
    #[error("device has no bulk {direction} endpoint on interface 0")]
    MissingEndpoint { direction: &'static str },

    /// Setting cannot be encoded for this chip
    #[error("protocol error: {0}")]
    Protocol(#[from] usbser_protocol::ProtocolError),

    /// USB transport error
    #[error("USB error: {0}")]
    Usb(#[from] UsbError),

    /// OS serial port error
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
