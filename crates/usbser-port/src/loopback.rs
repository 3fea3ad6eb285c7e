//! Loop-back port
//!
//! Echoes everything sent to it as received data. Useful for exercising a
//! terminal without hardware attached.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info};
use usbser_protocol::{DataBits, FlowControl, LineConfig, Parity, StopBits};

use crate::break_timer::BreakTimer;
use crate::error::PortError;
use crate::events::{EventSender, PortEventReceiver, PortState};
use crate::port::SerialPort;
use crate::usb_port::lock;

pub const LOOPBACK_PORT_NAME: &str = "loopback";

struct Inner {
    state: Mutex<PortState>,
    line: Mutex<LineConfig>,
    break_active: Mutex<bool>,
    break_timer: BreakTimer,
    events: EventSender,
}

impl Inner {
    fn require_open(&self) -> Result<(), PortError> {
        match *lock(&self.state) {
            PortState::Open => Ok(()),
            _ => Err(PortError::NotOpen),
        }
    }

    fn update(&self, f: impl FnOnce(&mut LineConfig)) -> Result<(), PortError> {
        self.require_open()?;
        f(&mut lock(&self.line));
        Ok(())
    }

    fn set_break(&self, active: bool) {
        let mut current = lock(&self.break_active);
        if *current != active {
            *current = active;
            self.events.break_changed(active);
        }
    }
}

pub struct LoopbackPort {
    inner: Arc<Inner>,
}

impl LoopbackPort {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(PortState::Closed),
                line: Mutex::new(LineConfig::default()),
                break_active: Mutex::new(false),
                break_timer: BreakTimer::new(),
                events: EventSender::new(),
            }),
        }
    }
}

impl Default for LoopbackPort {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialPort for LoopbackPort {
    fn port_name(&self) -> String {
        LOOPBACK_PORT_NAME.to_string()
    }

    fn open(&self) -> Result<(), PortError> {
        let mut state = lock(&self.inner.state);
        if *state == PortState::Open {
            return Err(PortError::AlreadyOpen);
        }
        *lock(&self.inner.line) = LineConfig::default();
        *state = PortState::Open;
        info!("{}: opened", LOOPBACK_PORT_NAME);
        Ok(())
    }

    fn close(&self) {
        self.inner.break_timer.cancel();
        let mut state = lock(&self.inner.state);
        if *state == PortState::Closed {
            return;
        }
        self.inner.set_break(false);
        *state = PortState::Closed;
        info!("{}: closed", LOOPBACK_PORT_NAME);
    }

    fn state(&self) -> PortState {
        *lock(&self.inner.state)
    }

    fn set_baud_rate(&self, baud_rate: u32) -> Result<(), PortError> {
        self.inner.update(|line| line.baud_rate = baud_rate)
    }

    fn set_data_bits(&self, data_bits: DataBits) -> Result<(), PortError> {
        self.inner.update(|line| line.data_bits = data_bits)
    }

    fn set_parity(&self, parity: Parity) -> Result<(), PortError> {
        self.inner.update(|line| line.parity = parity)
    }

    fn set_stop_bits(&self, stop_bits: StopBits) -> Result<(), PortError> {
        self.inner.update(|line| line.stop_bits = stop_bits)
    }

    fn set_flow_control(&self, flow_control: FlowControl) -> Result<(), PortError> {
        self.inner.update(|line| line.flow_control = flow_control)
    }

    fn line_config(&self) -> LineConfig {
        *lock(&self.inner.line)
    }

    fn send_data(&self, data: &[u8]) -> Result<(), PortError> {
        self.inner.require_open()?;
        debug!("{}: echo {} bytes", LOOPBACK_PORT_NAME, data.len());
        self.inner.events.data(data.to_vec());
        Ok(())
    }

    fn trigger_break(&self, duration: Duration) -> Result<(), PortError> {
        let state = lock(&self.inner.state);
        if *state != PortState::Open {
            return Err(PortError::NotOpen);
        }
        self.inner.set_break(true);
        let weak = Arc::downgrade(&self.inner);
        self.inner.break_timer.schedule(duration, move |ticket| {
            if let Some(inner) = weak.upgrade() {
                let _state = lock(&inner.state);
                if ticket.is_current() {
                    inner.set_break(false);
                }
            }
        });
        drop(state);
        Ok(())
    }

    fn subscribe(&self) -> PortEventReceiver {
        self.inner.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::PortEvent;

    #[test]
    fn test_closed_port_rejects_everything() {
        let port = LoopbackPort::new();
        assert!(matches!(port.send_data(b"x"), Err(PortError::NotOpen)));
        assert!(matches!(port.set_baud_rate(115_200), Err(PortError::NotOpen)));
        assert_eq!(port.baud_rate(), 9600);
    }

    #[test]
    fn test_echo() {
        let port = LoopbackPort::new();
        let mut rx = port.subscribe();
        port.open().unwrap();
        port.send_data(b"ping").unwrap();
        assert_eq!(rx.try_recv().unwrap(), PortEvent::Data(b"ping".to_vec()));
    }

    #[test]
    fn test_settings_reset_on_open() {
        let port = LoopbackPort::new();
        port.open().unwrap();
        port.set_baud_rate(57_600).unwrap();
        port.set_parity(Parity::Odd).unwrap();
        assert_eq!(port.line_config().to_string(), "57600 8O1");
        port.close();
        port.open().unwrap();
        assert_eq!(port.line_config(), LineConfig::default());
    }

    #[test]
    fn test_break_round_trip() {
        let port = LoopbackPort::new();
        let mut rx = port.subscribe();
        port.open().unwrap();
        port.trigger_break(Duration::from_millis(20)).unwrap();
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(rx.try_recv().unwrap(), PortEvent::BreakChanged(true));
        assert_eq!(rx.try_recv().unwrap(), PortEvent::BreakChanged(false));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_double_open() {
        let port = LoopbackPort::new();
        port.open().unwrap();
        assert!(matches!(port.open(), Err(PortError::AlreadyOpen)));
        port.close();
        port.close();
        assert_eq!(port.state(), PortState::Closed);
    }
}
