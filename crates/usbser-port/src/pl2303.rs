//! Prolific PL2303 driver
//!
//! The chip generation is only known after the device is open: the
//! descriptor narrows it down and a vendor status read settles HX versus
//! HXN. Everything after that (handshake, request codes, pipe reset) depends
//! on the answer.

use std::time::Duration;

use tracing::{debug, info, warn};
use usbser_protocol::pl2303::{
    self, ChipType, DescriptorClass, LineCoding, PipeReset, Quirks, VendorOp, LINE_CODING_LEN,
};
use usbser_protocol::{ChipFamily, DataBits, Parity, StopBits, DEFAULT_BAUD_RATE};

use crate::error::PortError;
use crate::usb_port::{ChipDriver, ChipIo, UsbPortConfig, UsbSerialPort, READ_CHUNK_SIZE};

pub type Pl2303Port = UsbSerialPort<Pl2303Driver>;

#[derive(Debug, Clone)]
pub struct Pl2303Driver {
    table_quirks: Quirks,
    chip: ChipType,
    quirks: Quirks,
    coding: LineCoding,
}

impl Pl2303Driver {
    /// `quirks` are the flags from the product ID table
    pub fn new(quirks: Quirks) -> Self {
        Self {
            table_quirks: quirks,
            chip: ChipType::Type01,
            quirks,
            coding: LineCoding::default(),
        }
    }

    fn detect_chip(io: &ChipIo<'_>) -> ChipType {
        let desc = io.descriptor();
        match pl2303::classify_descriptor(desc.device_class, desc.max_packet_size_0) {
            DescriptorClass::Type01 => ChipType::Type01,
            DescriptorClass::NeedsHxProbe => {
                let probe = io.control_in(pl2303::hx_status_probe(), 1);
                if let Err(e) = &probe {
                    debug!("{}: HX status probe failed: {}", io.name(), e);
                }
                pl2303::chip_type_from_probe(probe.ok().map(|data| data.len()))
            }
        }
    }

    fn run_handshake(&self, io: &ChipIo<'_>) {
        let legacy = self.quirks.contains(Quirks::LEGACY);
        for op in pl2303::init_handshake(legacy) {
            let result = match op {
                VendorOp::Read { value } => io
                    .control_in(pl2303::vendor_read(self.chip, value), 1)
                    .map(|_| ()),
                VendorOp::Write { value, index } => {
                    io.control_out(pl2303::vendor_write(self.chip, value, index), &[])
                }
            };
            if let Err(e) = result {
                warn!("{}: handshake step {:?} failed: {}", io.name(), op, e);
            }
        }
    }

    fn reset_pipes(&self, io: &ChipIo<'_>) {
        match pl2303::pipe_reset(self.chip, self.quirks) {
            PipeReset::ClearHalt => {
                let endpoints = io.endpoints();
                for endpoint in [endpoints.data_in, endpoints.data_out] {
                    if let Err(e) = io.clear_halt(endpoint) {
                        warn!("{}: clear halt on {:#04x} failed: {}", io.name(), endpoint, e);
                    }
                }
            }
            PipeReset::VendorWrites(writes) => {
                for (value, index) in writes {
                    if let Err(e) = io.control_out(pl2303::vendor_write(self.chip, value, index), &[])
                    {
                        warn!("{}: pipe reset write {:#x} failed: {}", io.name(), value, e);
                    }
                }
            }
        }
    }

    fn read_line_coding(io: &ChipIo<'_>) -> LineCoding {
        match io.control_in(pl2303::get_line(), LINE_CODING_LEN as u16) {
            Ok(data) => LineCoding::from_bytes(&data).unwrap_or_else(|e| {
                debug!("{}: {}", io.name(), e);
                LineCoding::default()
            }),
            Err(e) => {
                debug!("{}: GET_LINE failed: {}", io.name(), e);
                LineCoding::default()
            }
        }
    }

    /// Write a modified copy of the line coding, keeping it only on success
    fn write_coding(&mut self, io: &ChipIo<'_>, coding: LineCoding) -> Result<(), PortError> {
        io.control_out(pl2303::set_line(), coding.as_bytes())?;
        self.coding = coding;
        Ok(())
    }

    pub fn chip_type(&self) -> ChipType {
        self.chip
    }

    pub fn quirks(&self) -> Quirks {
        self.quirks
    }
}

impl ChipDriver for Pl2303Driver {
    const FAMILY: ChipFamily = ChipFamily::Pl2303;

    fn default_config() -> UsbPortConfig {
        UsbPortConfig {
            control_timeout: Duration::from_millis(100),
            read_timeout: Duration::from_millis(300),
            read_chunk_size: READ_CHUNK_SIZE,
        }
    }

    fn init(&mut self, io: &ChipIo<'_>) -> Result<(), PortError> {
        self.chip = Self::detect_chip(io);
        self.quirks = self.table_quirks.for_chip(self.chip);
        info!(
            "{}: PL2303 type {}, quirks {:#04x}",
            io.name(),
            self.chip,
            self.quirks.bits()
        );

        if self.chip != ChipType::Hxn {
            self.run_handshake(io);
        }
        self.reset_pipes(io);

        let coding = Self::read_line_coding(io)
            .with_data_bits(DataBits::Eight)
            .with_parity(Parity::None)
            .with_stop_bits(StopBits::One)
            .with_baud_rate(DEFAULT_BAUD_RATE);
        self.write_coding(io, coding)?;

        io.control_out(pl2303::set_control_lines(0), &[])?;
        Ok(())
    }

    fn resolve_baud_rate(&self, requested: u32) -> Result<u32, PortError> {
        Ok(pl2303::resolve_baud_rate(requested)?)
    }

    fn write_baud_rate(&mut self, io: &ChipIo<'_>, baud_rate: u32) -> Result<(), PortError> {
        self.write_coding(io, self.coding.with_baud_rate(baud_rate))
    }

    fn write_data_bits(&mut self, io: &ChipIo<'_>, data_bits: DataBits) -> Result<(), PortError> {
        self.write_coding(io, self.coding.with_data_bits(data_bits))
    }

    fn write_parity(&mut self, io: &ChipIo<'_>, parity: Parity) -> Result<(), PortError> {
        self.write_coding(io, self.coding.with_parity(parity))
    }

    fn write_stop_bits(&mut self, io: &ChipIo<'_>, stop_bits: StopBits) -> Result<(), PortError> {
        self.write_coding(io, self.coding.with_stop_bits(stop_bits))
    }

    fn write_break(&mut self, io: &ChipIo<'_>, on: bool) -> Result<(), PortError> {
        io.control_out(pl2303::set_break(on), &[])?;
        Ok(())
    }
}
