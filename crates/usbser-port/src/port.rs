//! The serial port contract
//!
//! Every backend (USB-direct chip drivers, the OS-native wrapper and the
//! loop-back port) implements [`SerialPort`]. Methods take `&self` so a port
//! can be shared between the thread that reads events and the thread that
//! sends data.

use std::time::Duration;

use usbser_protocol::{DataBits, FlowControl, LineConfig, Parity, StopBits};

use crate::error::PortError;
use crate::events::{PortEventReceiver, PortState};

/// Break length used when the caller has no preference
pub const DEFAULT_BREAK_DURATION: Duration = Duration::from_millis(100);

pub trait SerialPort: Send + Sync {
    /// Human readable name, e.g. `CP210x Bus 1 Addr 7`
    fn port_name(&self) -> String;

    /// Claim the device, initialize the chip and start the reader
    ///
    /// Line settings are reset to 9600 8N1 on every open.
    fn open(&self) -> Result<(), PortError>;

    /// Stop the reader, release break and the device. No-op when closed.
    fn close(&self);

    fn state(&self) -> PortState;

    fn is_open(&self) -> bool {
        self.state() == PortState::Open
    }

    // Setters leave the cached value untouched when the device rejects them.
    // Asking for the cached value issues no device request.

    fn set_baud_rate(&self, baud_rate: u32) -> Result<(), PortError>;
    fn set_data_bits(&self, data_bits: DataBits) -> Result<(), PortError>;
    fn set_parity(&self, parity: Parity) -> Result<(), PortError>;
    fn set_stop_bits(&self, stop_bits: StopBits) -> Result<(), PortError>;
    fn set_flow_control(&self, flow_control: FlowControl) -> Result<(), PortError>;

    /// Apply every field of `config`, stopping at the first failure
    fn apply_line_config(&self, config: &LineConfig) -> Result<(), PortError> {
        self.set_baud_rate(config.baud_rate)?;
        self.set_data_bits(config.data_bits)?;
        self.set_parity(config.parity)?;
        self.set_stop_bits(config.stop_bits)?;
        self.set_flow_control(config.flow_control)
    }

    /// Last applied line configuration (never re-read from hardware)
    fn line_config(&self) -> LineConfig;

    fn baud_rate(&self) -> u32 {
        self.line_config().baud_rate
    }

    fn data_bits(&self) -> DataBits {
        self.line_config().data_bits
    }

    fn parity(&self) -> Parity {
        self.line_config().parity
    }

    fn stop_bits(&self) -> StopBits {
        self.line_config().stop_bits
    }

    fn flow_control(&self) -> FlowControl {
        self.line_config().flow_control
    }

    /// Queue `data` for transmission without waiting for delivery
    fn send_data(&self, data: &[u8]) -> Result<(), PortError>;

    /// Assert break now and release it after `duration`
    ///
    /// Triggering again before the release cancels the pending release.
    fn trigger_break(&self, duration: Duration) -> Result<(), PortError>;

    /// Receive data and break events from this port
    fn subscribe(&self) -> PortEventReceiver;
}
