//! Generic USB-direct serial port
//!
//! [`UsbSerialPort`] owns everything the three chip families have in common:
//! the open/close state machine, the line setting cache, the reader worker and
//! the break timer. Chip specifics live behind [`ChipDriver`].
//!
//! # Locking
//! `session` guards the open device and the driver state. `open()` holds it
//! for the whole initialization, setters and the break timer take it for one
//! request sequence, and the reader never takes it. `line` is only held for
//! short copies so getters never wait on USB traffic.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use usbser_protocol::{
    ChipFamily, ControlSetup, DataBits, FlowControl, LineConfig, Parity, ProtocolError, StopBits,
};

use crate::break_timer::{BreakTimer, TimerTicket};
use crate::error::{PortError, UsbError};
use crate::events::{BreakSource, EventSender, PortEventReceiver, PortState};
use crate::port::SerialPort;
use crate::reader::{PassThrough, ReadHook, ReadSettings, ReaderWorker};
use crate::transport::{BulkEndpoints, DeviceDescriptor, DeviceIdentity, UsbDevice, UsbHandle};

/// Bulk-IN chunk size used by every chip
pub const READ_CHUNK_SIZE: usize = 64;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Timeouts and sizes for one USB-direct port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbPortConfig {
    /// Timeout for every control transfer
    pub control_timeout: Duration,
    /// Bulk-IN poll timeout; also bounds how long `close()` waits
    pub read_timeout: Duration,
    /// Bytes requested per bulk-IN transfer
    pub read_chunk_size: usize,
}

impl Default for UsbPortConfig {
    fn default() -> Self {
        Self {
            control_timeout: Duration::from_millis(300),
            read_timeout: Duration::from_millis(300),
            read_chunk_size: READ_CHUNK_SIZE,
        }
    }
}

/// Control transfer access handed to chip drivers
pub struct ChipIo<'a> {
    handle: &'a dyn UsbHandle,
    endpoints: BulkEndpoints,
    timeout: Duration,
    name: &'a str,
}

impl<'a> ChipIo<'a> {
    pub fn new(
        handle: &'a dyn UsbHandle,
        endpoints: BulkEndpoints,
        timeout: Duration,
        name: &'a str,
    ) -> Self {
        Self {
            handle,
            endpoints,
            timeout,
            name,
        }
    }

    pub fn control_in(&self, setup: ControlSetup, length: u16) -> Result<Vec<u8>, UsbError> {
        debug!(
            "{}: control in req={:#04x} value={:#06x} index={:#06x} len={}",
            self.name, setup.request, setup.value, setup.index, length
        );
        self.handle.control_in(setup, length, self.timeout)
    }

    pub fn control_out(&self, setup: ControlSetup, data: &[u8]) -> Result<(), UsbError> {
        debug!(
            "{}: control out req={:#04x} value={:#06x} index={:#06x} data={:02x?}",
            self.name, setup.request, setup.value, setup.index, data
        );
        self.handle.control_out(setup, data, self.timeout)
    }

    pub fn clear_halt(&self, endpoint: u8) -> Result<(), UsbError> {
        self.handle.clear_halt(endpoint)
    }

    pub fn descriptor(&self) -> DeviceDescriptor {
        self.handle.descriptor()
    }

    pub fn endpoints(&self) -> BulkEndpoints {
        self.endpoints
    }

    pub fn name(&self) -> &str {
        self.name
    }
}

/// Register-level behaviour of one chip family
///
/// A driver value is cloned fresh from the port's template on every open, so
/// whatever state it accumulates lives exactly as long as the session.
pub trait ChipDriver: Clone + Send + Sync + 'static {
    const FAMILY: ChipFamily;

    fn default_config() -> UsbPortConfig {
        UsbPortConfig::default()
    }

    /// Bring the chip up and program 9600 8N1 with control lines deasserted
    fn init(&mut self, io: &ChipIo<'_>) -> Result<(), PortError>;

    /// Rate the chip will actually run at for `requested`
    fn resolve_baud_rate(&self, requested: u32) -> Result<u32, PortError> {
        Ok(requested)
    }

    fn write_baud_rate(&mut self, io: &ChipIo<'_>, baud_rate: u32) -> Result<(), PortError>;
    fn write_data_bits(&mut self, io: &ChipIo<'_>, data_bits: DataBits) -> Result<(), PortError>;
    fn write_parity(&mut self, io: &ChipIo<'_>, parity: Parity) -> Result<(), PortError>;
    fn write_stop_bits(&mut self, io: &ChipIo<'_>, stop_bits: StopBits) -> Result<(), PortError>;
    fn write_break(&mut self, io: &ChipIo<'_>, on: bool) -> Result<(), PortError>;

    /// Receive-side processing for the reader worker
    fn read_hook(&self, _config: &UsbPortConfig) -> Box<dyn ReadHook> {
        Box::new(PassThrough)
    }
}

struct Session<C> {
    handle: Arc<dyn UsbHandle>,
    endpoints: BulkEndpoints,
    driver: C,
    reader: Option<ReaderWorker>,
}

impl<C> Session<C> {
    fn split<'a>(&'a mut self, timeout: Duration, name: &'a str) -> (&'a mut C, ChipIo<'a>) {
        let io = ChipIo::new(&*self.handle, self.endpoints, timeout, name);
        (&mut self.driver, io)
    }
}

struct Inner<C> {
    device: Arc<dyn UsbDevice>,
    identity: DeviceIdentity,
    name: String,
    template: C,
    config: UsbPortConfig,
    state: Mutex<PortState>,
    session: Mutex<Option<Session<C>>>,
    line: Mutex<LineConfig>,
    break_timer: BreakTimer,
    events: EventSender,
}

impl<C: ChipDriver> Inner<C> {
    fn set_state(&self, state: PortState) {
        *lock(&self.state) = state;
    }

    fn start(&self) -> Result<Session<C>, PortError> {
        let handle = self.device.open()?;

        let endpoints = BulkEndpoints::from_endpoints(handle.endpoints()?)?;
        debug!(
            "{}: bulk IN {:#04x}, bulk OUT {:#04x}",
            self.name, endpoints.data_in, endpoints.data_out
        );

        let mut driver = self.template.clone();
        let io = ChipIo::new(&*handle, endpoints, self.config.control_timeout, &self.name);
        driver.init(&io)?;

        *lock(&self.line) = LineConfig::default();
        self.events.clear_breaks();

        let settings = ReadSettings {
            endpoint: endpoints.data_in,
            chunk_size: self.config.read_chunk_size,
            timeout: self.config.read_timeout,
        };
        let reader = ReaderWorker::spawn(
            &self.name,
            handle.clone(),
            settings,
            driver.read_hook(&self.config),
            self.events.clone(),
        )?;

        Ok(Session {
            handle,
            endpoints,
            driver,
            reader: Some(reader),
        })
    }

    /// Run one setter against the open session
    fn apply<F>(&self, what: &str, f: F) -> Result<(), PortError>
    where
        F: FnOnce(&mut C, &ChipIo<'_>, &mut LineConfig) -> Result<(), PortError>,
    {
        let mut guard = lock(&self.session);
        let session = guard.as_mut().ok_or(PortError::NotOpen)?;
        let (driver, io) = session.split(self.config.control_timeout, &self.name);

        // Work on a copy so a failed write leaves the cache as it was
        let mut line = *lock(&self.line);
        match f(driver, &io, &mut line) {
            Ok(()) => {
                *lock(&self.line) = line;
                Ok(())
            }
            Err(e) => {
                warn!("{}: failed to set {}: {}", self.name, what, e);
                Err(e)
            }
        }
    }

    fn release_break(&self, ticket: &TimerTicket) {
        let mut guard = lock(&self.session);
        if !ticket.is_current() {
            return;
        }
        let Some(session) = guard.as_mut() else {
            return;
        };
        let (driver, io) = session.split(self.config.control_timeout, &self.name);
        match driver.write_break(&io, false) {
            Ok(()) => {
                debug!("{}: break released", self.name);
                self.events.set_break(BreakSource::Local, false);
            }
            Err(e) => warn!("{}: failed to release break: {}", self.name, e),
        }
    }
}

/// A serial port driven directly over USB
pub struct UsbSerialPort<C: ChipDriver> {
    inner: Arc<Inner<C>>,
}

impl<C: ChipDriver> UsbSerialPort<C> {
    /// Wrap an enumerated device
    ///
    /// Applications normally get ports from `usbser_detect::PortScanner`,
    /// which picks the driver and quirks from the device's IDs.
    pub fn new(device: Arc<dyn UsbDevice>, driver: C) -> Self {
        Self::with_config(device, driver, C::default_config())
    }

    pub fn with_config(device: Arc<dyn UsbDevice>, driver: C, config: UsbPortConfig) -> Self {
        let identity = device.identity();
        let name = format!(
            "{} Bus {} Addr {}",
            C::FAMILY,
            identity.bus,
            identity.address
        );
        Self {
            inner: Arc::new(Inner {
                device,
                identity,
                name,
                template: driver,
                config,
                state: Mutex::new(PortState::Closed),
                session: Mutex::new(None),
                line: Mutex::new(LineConfig::default()),
                break_timer: BreakTimer::new(),
                events: EventSender::new(),
            }),
        }
    }

    pub fn family(&self) -> ChipFamily {
        C::FAMILY
    }

    pub fn identity(&self) -> DeviceIdentity {
        self.inner.identity
    }

    pub fn config(&self) -> &UsbPortConfig {
        &self.inner.config
    }
}

impl<C: ChipDriver> SerialPort for UsbSerialPort<C> {
    fn port_name(&self) -> String {
        self.inner.name.clone()
    }

    fn open(&self) -> Result<(), PortError> {
        let inner = &self.inner;
        let mut session = lock(&inner.session);
        if session.is_some() {
            return Err(PortError::AlreadyOpen);
        }

        inner.set_state(PortState::Opening);
        match inner.start() {
            Ok(started) => {
                *session = Some(started);
                inner.set_state(PortState::Open);
                info!("{}: opened", inner.name);
                Ok(())
            }
            Err(e) => {
                inner.set_state(PortState::Closed);
                warn!("{}: open failed: {}", inner.name, e);
                Err(e)
            }
        }
    }

    fn close(&self) {
        let inner = &self.inner;
        inner.break_timer.cancel();

        let mut guard = lock(&inner.session);
        let Some(mut session) = guard.take() else {
            return;
        };

        if inner.events.break_held_by(BreakSource::Local) {
            let (driver, io) = session.split(inner.config.control_timeout, &inner.name);
            if let Err(e) = driver.write_break(&io, false) {
                warn!("{}: failed to release break on close: {}", inner.name, e);
            }
        }

        if let Some(reader) = session.reader.take() {
            reader.stop();
        }
        session.handle.cancel_transfers();
        drop(session);
        // Reader is gone, so neither end can re-assert
        inner.events.clear_breaks();

        inner.set_state(PortState::Closed);
        info!("{}: closed", inner.name);
    }

    fn state(&self) -> PortState {
        *lock(&self.inner.state)
    }

    fn set_baud_rate(&self, baud_rate: u32) -> Result<(), PortError> {
        self.inner.apply("baud rate", |driver, io, line| {
            let resolved = driver.resolve_baud_rate(baud_rate)?;
            if resolved == line.baud_rate {
                return Ok(());
            }
            driver.write_baud_rate(io, resolved)?;
            if resolved != baud_rate {
                debug!("{}: baud rate {} rounded to {}", io.name(), baud_rate, resolved);
            }
            line.baud_rate = resolved;
            Ok(())
        })
    }

    fn set_data_bits(&self, data_bits: DataBits) -> Result<(), PortError> {
        self.inner.apply("data bits", |driver, io, line| {
            if data_bits == line.data_bits {
                return Ok(());
            }
            driver.write_data_bits(io, data_bits)?;
            line.data_bits = data_bits;
            Ok(())
        })
    }

    fn set_parity(&self, parity: Parity) -> Result<(), PortError> {
        self.inner.apply("parity", |driver, io, line| {
            if parity == line.parity {
                return Ok(());
            }
            driver.write_parity(io, parity)?;
            line.parity = parity;
            Ok(())
        })
    }

    fn set_stop_bits(&self, stop_bits: StopBits) -> Result<(), PortError> {
        self.inner.apply("stop bits", |driver, io, line| {
            if stop_bits == line.stop_bits {
                return Ok(());
            }
            driver.write_stop_bits(io, stop_bits)?;
            line.stop_bits = stop_bits;
            Ok(())
        })
    }

    fn set_flow_control(&self, flow_control: FlowControl) -> Result<(), PortError> {
        self.inner.apply("flow control", |_, _, line| {
            if flow_control == line.flow_control {
                return Ok(());
            }
            Err(ProtocolError::Unsupported(format!(
                "{:?} flow control on {}",
                flow_control,
                C::FAMILY
            ))
            .into())
        })
    }

    fn line_config(&self) -> LineConfig {
        *lock(&self.inner.line)
    }

    fn send_data(&self, data: &[u8]) -> Result<(), PortError> {
        let guard = lock(&self.inner.session);
        let session = guard.as_ref().ok_or(PortError::NotOpen)?;
        session
            .handle
            .submit_bulk(session.endpoints.data_out, data.to_vec())
            .map_err(|e| {
                warn!("{}: failed to submit {} bytes: {}", self.inner.name, data.len(), e);
                PortError::from(e)
            })
    }

    fn trigger_break(&self, duration: Duration) -> Result<(), PortError> {
        let inner = &self.inner;
        let mut guard = lock(&inner.session);
        let session = guard.as_mut().ok_or(PortError::NotOpen)?;

        // Any pending release belongs to the previous break
        inner.break_timer.cancel();

        let (driver, io) = session.split(inner.config.control_timeout, &inner.name);
        if let Err(e) = driver.write_break(&io, true) {
            warn!("{}: failed to assert break: {}", inner.name, e);
            return Err(e);
        }
        debug!("{}: break asserted for {:?}", inner.name, duration);
        inner.events.set_break(BreakSource::Local, true);

        let weak = Arc::downgrade(&self.inner);
        inner.break_timer.schedule(duration, move |ticket| {
            if let Some(inner) = weak.upgrade() {
                inner.release_break(&ticket);
            }
        });
        Ok(())
    }

    fn subscribe(&self) -> PortEventReceiver {
        self.inner.events.subscribe()
    }
}

impl<C: ChipDriver> Drop for UsbSerialPort<C> {
    fn drop(&mut self) {
        self.close();
    }
}
