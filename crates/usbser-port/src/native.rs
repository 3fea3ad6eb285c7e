//! OS-native serial ports through the `serialport` crate
//!
//! For devices the operating system already drives (CDC-ACM, FTDI, or any
//! chip whose kernel driver is left bound).

use std::io::{ErrorKind, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};
use usbser_protocol::{DataBits, FlowControl, LineConfig, Parity, ProtocolError, StopBits};

use crate::break_timer::{BreakTimer, TimerTicket};
use crate::error::PortError;
use crate::events::{EventSender, PortEventReceiver, PortState};
use crate::port::SerialPort;
use crate::reader::ReaderWorker;
use crate::usb_port::lock;

/// Read timeout of the native reader thread
pub const NATIVE_READ_TIMEOUT: Duration = Duration::from_millis(100);

const READ_BUFFER_SIZE: usize = 1024;

fn to_data_bits(data_bits: DataBits) -> serialport::DataBits {
    match data_bits {
        DataBits::Five => serialport::DataBits::Five,
        DataBits::Six => serialport::DataBits::Six,
        DataBits::Seven => serialport::DataBits::Seven,
        DataBits::Eight => serialport::DataBits::Eight,
    }
}

fn to_parity(parity: Parity) -> Result<serialport::Parity, ProtocolError> {
    match parity {
        Parity::None => Ok(serialport::Parity::None),
        Parity::Odd => Ok(serialport::Parity::Odd),
        Parity::Even => Ok(serialport::Parity::Even),
        Parity::Mark | Parity::Space => Err(ProtocolError::Unsupported(format!(
            "{:?} parity on native ports",
            parity
        ))),
    }
}

fn to_stop_bits(stop_bits: StopBits) -> Result<serialport::StopBits, ProtocolError> {
    match stop_bits {
        StopBits::One => Ok(serialport::StopBits::One),
        StopBits::Two => Ok(serialport::StopBits::Two),
        StopBits::OneAndHalf => Err(ProtocolError::Unsupported(
            "1.5 stop bits on native ports".to_string(),
        )),
    }
}

fn to_flow_control(flow_control: FlowControl) -> serialport::FlowControl {
    match flow_control {
        FlowControl::None => serialport::FlowControl::None,
        FlowControl::Hardware => serialport::FlowControl::Hardware,
        FlowControl::Software => serialport::FlowControl::Software,
    }
}

struct Session {
    port: Box<dyn serialport::SerialPort>,
    reader: Option<ReaderWorker>,
}

struct Inner {
    path: String,
    state: Mutex<PortState>,
    session: Mutex<Option<Session>>,
    line: Mutex<LineConfig>,
    break_active: Mutex<bool>,
    break_timer: BreakTimer,
    events: EventSender,
}

impl Inner {
    fn apply<F>(&self, what: &str, f: F) -> Result<(), PortError>
    where
        F: FnOnce(&mut dyn serialport::SerialPort, &mut LineConfig) -> Result<(), PortError>,
    {
        let mut guard = lock(&self.session);
        let session = guard.as_mut().ok_or(PortError::NotOpen)?;
        let mut line = *lock(&self.line);
        match f(session.port.as_mut(), &mut line) {
            Ok(()) => {
                *lock(&self.line) = line;
                Ok(())
            }
            Err(e) => {
                warn!("{}: failed to set {}: {}", self.path, what, e);
                Err(e)
            }
        }
    }

    fn set_break_flag(&self, active: bool) {
        let mut current = lock(&self.break_active);
        if *current != active {
            *current = active;
            self.events.break_changed(active);
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
        match session.port.clear_break() {
            Ok(()) => self.set_break_flag(false),
            Err(e) => warn!("{}: failed to release break: {}", self.path, e),
        }
    }
}

/// A port opened through the operating system's serial driver
pub struct NativePort {
    inner: Arc<Inner>,
}

impl NativePort {
    /// `path` is the OS port name, e.g. `/dev/ttyUSB0` or `COM3`
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                path: path.into(),
                state: Mutex::new(PortState::Closed),
                session: Mutex::new(None),
                line: Mutex::new(LineConfig::default()),
                break_active: Mutex::new(false),
                break_timer: BreakTimer::new(),
                events: EventSender::new(),
            }),
        }
    }

    fn start(&self) -> Result<Session, PortError> {
        let inner = &self.inner;
        let line = LineConfig::default();
        let port = serialport::new(&inner.path, line.baud_rate)
            .data_bits(to_data_bits(line.data_bits))
            .parity(to_parity(line.parity)?)
            .stop_bits(to_stop_bits(line.stop_bits)?)
            .flow_control(to_flow_control(line.flow_control))
            .timeout(NATIVE_READ_TIMEOUT)
            .open()?;

        let mut reader_port = port.try_clone()?;
        let events = inner.events.clone();
        let path = inner.path.clone();
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];
        let reader = ReaderWorker::spawn_with(&inner.path, move || {
            match reader_port.read(&mut buffer) {
                Ok(0) => {}
                Ok(n) => events.data(buffer[..n].to_vec()),
                Err(e) if e.kind() == ErrorKind::TimedOut => {}
                Err(e) => {
                    debug!("{}: read failed: {}", path, e);
                    std::thread::sleep(NATIVE_READ_TIMEOUT);
                }
            }
        })?;

        *lock(&inner.line) = line;
        Ok(Session {
            port,
            reader: Some(reader),
        })
    }
}

impl SerialPort for NativePort {
    fn port_name(&self) -> String {
        self.inner.path.clone()
    }

    fn open(&self) -> Result<(), PortError> {
        let inner = &self.inner;
        let mut session = lock(&inner.session);
        if session.is_some() {
            return Err(PortError::AlreadyOpen);
        }
        *lock(&inner.state) = PortState::Opening;
        match self.start() {
            Ok(started) => {
                *session = Some(started);
                *lock(&inner.state) = PortState::Open;
                info!("{}: opened", inner.path);
                Ok(())
            }
            Err(e) => {
                *lock(&inner.state) = PortState::Closed;
                warn!("{}: open failed: {}", inner.path, e);
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
        if *lock(&inner.break_active) {
            if let Err(e) = session.port.clear_break() {
                warn!("{}: failed to release break on close: {}", inner.path, e);
            }
            inner.set_break_flag(false);
        }
        if let Some(reader) = session.reader.take() {
            reader.stop();
        }
        drop(session);
        *lock(&inner.state) = PortState::Closed;
        info!("{}: closed", inner.path);
    }

    fn state(&self) -> PortState {
        *lock(&self.inner.state)
    }

    fn set_baud_rate(&self, baud_rate: u32) -> Result<(), PortError> {
        self.inner.apply("baud rate", |port, line| {
            if baud_rate != line.baud_rate {
                port.set_baud_rate(baud_rate)?;
                line.baud_rate = baud_rate;
            }
            Ok(())
        })
    }

    fn set_data_bits(&self, data_bits: DataBits) -> Result<(), PortError> {
        self.inner.apply("data bits", |port, line| {
            if data_bits != line.data_bits {
                port.set_data_bits(to_data_bits(data_bits))?;
                line.data_bits = data_bits;
            }
            Ok(())
        })
    }

    fn set_parity(&self, parity: Parity) -> Result<(), PortError> {
        self.inner.apply("parity", |port, line| {
            if parity != line.parity {
                port.set_parity(to_parity(parity)?)?;
                line.parity = parity;
            }
            Ok(())
        })
    }

    fn set_stop_bits(&self, stop_bits: StopBits) -> Result<(), PortError> {
        self.inner.apply("stop bits", |port, line| {
            if stop_bits != line.stop_bits {
                port.set_stop_bits(to_stop_bits(stop_bits)?)?;
                line.stop_bits = stop_bits;
            }
            Ok(())
        })
    }

    fn set_flow_control(&self, flow_control: FlowControl) -> Result<(), PortError> {
        self.inner.apply("flow control", |port, line| {
            if flow_control != line.flow_control {
                port.set_flow_control(to_flow_control(flow_control))?;
                line.flow_control = flow_control;
            }
            Ok(())
        })
    }

    fn line_config(&self) -> LineConfig {
        *lock(&self.inner.line)
    }

    fn send_data(&self, data: &[u8]) -> Result<(), PortError> {
        let mut guard = lock(&self.inner.session);
        let session = guard.as_mut().ok_or(PortError::NotOpen)?;
        session.port.write_all(data).map_err(|e| {
            warn!("{}: write failed: {}", self.inner.path, e);
            PortError::from(e)
        })
    }

    fn trigger_break(&self, duration: Duration) -> Result<(), PortError> {
        let inner = &self.inner;
        let mut guard = lock(&inner.session);
        let session = guard.as_mut().ok_or(PortError::NotOpen)?;
        inner.break_timer.cancel();
        session.port.set_break()?;
        inner.set_break_flag(true);

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

impl Drop for NativePort {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_mappings() {
        assert!(to_parity(Parity::Mark).is_err());
        assert!(to_stop_bits(StopBits::OneAndHalf).is_err());
        assert_eq!(to_parity(Parity::Even).unwrap(), serialport::Parity::Even);
    }

    #[test]
    fn test_closed_native_port() {
        let port = NativePort::new("/dev/does-not-exist");
        assert_eq!(port.port_name(), "/dev/does-not-exist");
        assert!(matches!(port.set_parity(Parity::Odd), Err(PortError::NotOpen)));
        assert!(port.open().is_err());
        assert_eq!(port.state(), PortState::Closed);
    }
}
