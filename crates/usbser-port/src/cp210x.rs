//! Silicon Labs CP210x driver
//!
//! The only family that can see a break sent by the far end: the reader
//! polls GET_COMM_STATUS after every read and, with event embedding on, also
//! picks line status out of the data stream.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};
use usbser_protocol::cp210x::{
    self, CommStatus, EventDecoder, LineControl, LineEvent, COMM_STATUS_LEN, ESCAPE_CHAR,
};
use usbser_protocol::{ChipFamily, DataBits, Parity, StopBits, DEFAULT_BAUD_RATE};

use crate::error::PortError;
use crate::events::{BreakSource, EventSender};
use crate::reader::ReadHook;
use crate::transport::UsbHandle;
use crate::usb_port::{ChipDriver, ChipIo, UsbPortConfig, UsbSerialPort};

pub type Cp210xPort = UsbSerialPort<Cp210xDriver>;

/// Receive-side features of the CP210x driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Cp210xOptions {
    /// Issue GET_COMM_STATUS once per reader cycle to detect remote break
    pub poll_comm_status: bool,
    /// Ask the chip to embed line status events in the data stream
    pub embed_events: bool,
}

impl Default for Cp210xOptions {
    fn default() -> Self {
        Self {
            poll_comm_status: true,
            embed_events: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Cp210xDriver {
    options: Cp210xOptions,
}

impl Cp210xDriver {
    pub fn new(options: Cp210xOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> Cp210xOptions {
        self.options
    }

    /// GET_LINE_CTL, modify, SET_LINE_CTL
    fn update_line_control<F>(&self, io: &ChipIo<'_>, f: F) -> Result<(), PortError>
    where
        F: FnOnce(LineControl) -> LineControl,
    {
        let current = LineControl::from_bytes(&io.control_in(cp210x::get_line_ctl(), 2)?)?;
        let next = f(current);
        io.control_out(cp210x::set_line_ctl(next), &[])?;
        Ok(())
    }
}

impl ChipDriver for Cp210xDriver {
    const FAMILY: ChipFamily = ChipFamily::Cp210x;

    fn init(&mut self, io: &ChipIo<'_>) -> Result<(), PortError> {
        io.control_out(cp210x::ifc_enable(true), &[])?;

        if self.options.embed_events {
            if let Err(e) = io.control_out(cp210x::embed_events(ESCAPE_CHAR), &[]) {
                warn!("{}: enabling event embedding failed: {}", io.name(), e);
                self.options.embed_events = false;
            }
        }

        self.write_baud_rate(io, DEFAULT_BAUD_RATE)?;
        self.update_line_control(io, |line| {
            line.with_data_bits(DataBits::Eight)
                .with_parity(Parity::None)
                .with_stop_bits(StopBits::One)
        })
    }

    fn write_baud_rate(&mut self, io: &ChipIo<'_>, baud_rate: u32) -> Result<(), PortError> {
        io.control_out(cp210x::set_baud_rate(), &cp210x::baud_rate_payload(baud_rate))?;
        Ok(())
    }

    fn write_data_bits(&mut self, io: &ChipIo<'_>, data_bits: DataBits) -> Result<(), PortError> {
        self.update_line_control(io, |line| line.with_data_bits(data_bits))
    }

    fn write_parity(&mut self, io: &ChipIo<'_>, parity: Parity) -> Result<(), PortError> {
        self.update_line_control(io, |line| line.with_parity(parity))
    }

    fn write_stop_bits(&mut self, io: &ChipIo<'_>, stop_bits: StopBits) -> Result<(), PortError> {
        self.update_line_control(io, |line| line.with_stop_bits(stop_bits))
    }

    fn write_break(&mut self, io: &ChipIo<'_>, on: bool) -> Result<(), PortError> {
        io.control_out(cp210x::set_break(on), &[])?;
        Ok(())
    }

    fn read_hook(&self, config: &UsbPortConfig) -> Box<dyn ReadHook> {
        Box::new(Cp210xReader {
            poll_comm_status: self.options.poll_comm_status,
            decoder: self.options.embed_events.then(EventDecoder::new),
            control_timeout: config.control_timeout,
        })
    }
}

/// Reader extension tracking break asserted by the remote end
struct Cp210xReader {
    poll_comm_status: bool,
    decoder: Option<EventDecoder>,
    control_timeout: Duration,
}

impl Cp210xReader {
    fn set_remote_break(&self, active: bool, events: &EventSender) {
        if events.set_break(BreakSource::Remote, active) {
            debug!("Remote break {}", if active { "asserted" } else { "released" });
        }
    }

    fn on_line_event(&mut self, event: LineEvent, events: &EventSender) {
        match event {
            LineEvent::LineStatus(lsr) => {
                if lsr & cp210x::LSR_BREAK != 0 {
                    self.set_remote_break(true, events);
                }
                if lsr & cp210x::LSR_OVERRUN != 0 {
                    warn!("CP210x receive overrun");
                }
                if lsr & cp210x::LSR_PARITY != 0 {
                    debug!("CP210x parity error");
                }
                if lsr & cp210x::LSR_FRAME != 0 {
                    debug!("CP210x framing error");
                }
            }
            LineEvent::ModemStatus(msr) => trace!("CP210x modem status {:#04x}", msr),
        }
    }
}

impl ReadHook for Cp210xReader {
    fn on_data(&mut self, data: Vec<u8>, events: &EventSender) {
        let Some(decoder) = self.decoder.as_mut() else {
            events.data(data);
            return;
        };
        let (payload, line_events) = decoder.decode(&data);
        for event in line_events {
            self.on_line_event(event, events);
        }
        if !payload.is_empty() {
            events.data(payload);
        }
    }

    fn after_read(&mut self, handle: &dyn UsbHandle, events: &EventSender) {
        if !self.poll_comm_status {
            return;
        }
        let status = handle
            .control_in(
                cp210x::get_comm_status(),
                COMM_STATUS_LEN as u16,
                self.control_timeout,
            )
            .map_err(PortError::from)
            .and_then(|raw| Ok(CommStatus::parse(&raw)?));
        match status {
            Ok(status) => self.set_remote_break(status.break_active(), events),
            Err(e) => trace!("GET_COMM_STATUS failed: {}", e),
        }
    }
}
