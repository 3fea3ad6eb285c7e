//! WCH CH34x driver

use std::time::Duration;

use tracing::{info, warn};
use usbser_protocol::ch34x::{self, Lcr, VERSION_LEN};
use usbser_protocol::{ChipFamily, DataBits, Parity, ProtocolError, StopBits, DEFAULT_BAUD_RATE};

use crate::error::PortError;
use crate::usb_port::{ChipDriver, ChipIo, UsbPortConfig, UsbSerialPort, READ_CHUNK_SIZE};

pub type Ch34xPort = UsbSerialPort<Ch34xDriver>;

#[derive(Debug, Clone, Default)]
pub struct Ch34xDriver {
    lcr: Lcr,
}

impl Ch34xDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn write_lcr(&mut self, io: &ChipIo<'_>, lcr: Lcr) -> Result<(), PortError> {
        io.control_out(ch34x::write_lcr(lcr), &[])?;
        self.lcr = lcr;
        Ok(())
    }
}

impl ChipDriver for Ch34xDriver {
    const FAMILY: ChipFamily = ChipFamily::Ch34x;

    fn default_config() -> UsbPortConfig {
        UsbPortConfig {
            control_timeout: Duration::from_millis(300),
            read_timeout: Duration::from_millis(100),
            read_chunk_size: READ_CHUNK_SIZE,
        }
    }

    fn init(&mut self, io: &ChipIo<'_>) -> Result<(), PortError> {
        match io.control_in(ch34x::read_version(), VERSION_LEN as u16) {
            Ok(version) => info!(
                "{}: CH34x version {:#04x}",
                io.name(),
                version.first().copied().unwrap_or_default()
            ),
            Err(e) => warn!("{}: version read failed: {}", io.name(), e),
        }

        io.control_out(ch34x::serial_init(), &[])?;
        self.write_baud_rate(io, DEFAULT_BAUD_RATE)?;
        self.write_lcr(io, Lcr::default())?;
        io.control_out(ch34x::modem_control(0), &[])?;
        Ok(())
    }

    fn resolve_baud_rate(&self, requested: u32) -> Result<u32, PortError> {
        ch34x::baud_divisor(requested)?;
        Ok(requested)
    }

    fn write_baud_rate(&mut self, io: &ChipIo<'_>, baud_rate: u32) -> Result<(), PortError> {
        let divisor = ch34x::baud_divisor(baud_rate)?;
        io.control_out(ch34x::write_baud(divisor), &[])?;
        Ok(())
    }

    fn write_data_bits(&mut self, io: &ChipIo<'_>, data_bits: DataBits) -> Result<(), PortError> {
        let lcr = Lcr {
            data_bits: ch34x::data_bits_code(data_bits),
            ..self.lcr
        };
        self.write_lcr(io, lcr)
    }

    fn write_parity(&mut self, io: &ChipIo<'_>, parity: Parity) -> Result<(), PortError> {
        let lcr = Lcr {
            parity: ch34x::parity_code(parity),
            ..self.lcr
        };
        self.write_lcr(io, lcr)
    }

    fn write_stop_bits(&mut self, io: &ChipIo<'_>, stop_bits: StopBits) -> Result<(), PortError> {
        let lcr = Lcr {
            stop_bits: ch34x::stop_bits_code(stop_bits)?,
            ..self.lcr
        };
        self.write_lcr(io, lcr)
    }

    fn write_break(&mut self, io: &ChipIo<'_>, on: bool) -> Result<(), PortError> {
        let regs = io.control_in(ch34x::read_break(), 2)?;
        let regs: [u8; 2] = match regs.as_slice() {
            [brk, lcr, ..] => [*brk, *lcr],
            _ => {
                return Err(ProtocolError::ShortResponse {
                    expected: 2,
                    actual: regs.len(),
                }
                .into())
            }
        };
        io.control_out(ch34x::write_break(ch34x::apply_break(regs, on)), &[])?;
        Ok(())
    }
}
