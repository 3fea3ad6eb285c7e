//! Port events and lifecycle state
//!
//! Every port publishes what it receives through a broadcast channel. Worker
//! threads send, any number of consumers on other threads subscribe, and a
//! port with no subscribers simply drops its events.
//!
//! Break can be held by this end or by the remote end. `BreakChanged`
//! follows the line as a whole: it fires when the first side asserts and
//! when the last side releases.

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::trace;

use crate::usb_port::lock;

/// Default number of buffered events per subscriber
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Something that happened on an open port
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortEvent {
    /// Bytes received from the device, in device order
    Data(Vec<u8>),
    /// Break condition asserted (`true`) or released (`false`)
    BreakChanged(bool),
}

impl PortEvent {
    /// Check if this event carries received bytes
    pub fn is_data(&self) -> bool {
        matches!(self, PortEvent::Data(_))
    }
}

/// Receiving side handed out by [`SerialPort::subscribe`](crate::SerialPort::subscribe)
pub type PortEventReceiver = broadcast::Receiver<PortEvent>;

/// Lifecycle of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PortState {
    #[default]
    Closed,
    /// `open()` is running chip initialization
    Opening,
    Open,
}

/// Which end of the line is holding break
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BreakSource {
    /// Asserted through `trigger_break`
    Local,
    /// Reported by the chip as received from the other end
    Remote,
}

#[derive(Debug, Default)]
struct BreakLines {
    local: bool,
    remote: bool,
}

impl BreakLines {
    fn active(&self) -> bool {
        self.local || self.remote
    }

    fn slot(&mut self, source: BreakSource) -> &mut bool {
        match source {
            BreakSource::Local => &mut self.local,
            BreakSource::Remote => &mut self.remote,
        }
    }
}

/// Cloneable sending side shared between a port and its workers
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: broadcast::Sender<PortEvent>,
    breaks: Arc<Mutex<BreakLines>>,
}

impl EventSender {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            breaks: Arc::new(Mutex::new(BreakLines::default())),
        }
    }

    pub fn subscribe(&self) -> PortEventReceiver {
        self.tx.subscribe()
    }

    /// Publish an event; succeeds even when nobody is listening
    pub fn emit(&self, event: PortEvent) {
        if self.tx.send(event).is_err() {
            trace!("No subscribers, event dropped");
        }
    }

    pub fn data(&self, data: Vec<u8>) {
        self.emit(PortEvent::Data(data));
    }

    pub fn break_changed(&self, active: bool) {
        self.emit(PortEvent::BreakChanged(active));
    }

    /// Record a break transition from one end of the line
    ///
    /// Returns whether `source` changed. `BreakChanged` is only emitted when
    /// the combined state of both ends changes.
    pub fn set_break(&self, source: BreakSource, active: bool) -> bool {
        let mut lines = lock(&self.breaks);
        let before = lines.active();
        let slot = lines.slot(source);
        if *slot == active {
            return false;
        }
        *slot = active;
        let after = lines.active();
        if before != after {
            self.break_changed(after);
        }
        true
    }

    pub fn break_held_by(&self, source: BreakSource) -> bool {
        *lock(&self.breaks).slot(source)
    }

    /// Combined break state of the line
    pub fn break_active(&self) -> bool {
        lock(&self.breaks).active()
    }

    /// Forget both ends, emitting a release if break was active
    pub fn clear_breaks(&self) {
        let mut lines = lock(&self.breaks);
        let was_active = lines.active();
        *lines = BreakLines::default();
        if was_active {
            self.break_changed(false);
        }
    }
}

impl Default for EventSender {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers() {
        let events = EventSender::new();
        events.data(vec![1, 2, 3]);
    }

    #[test]
    fn test_subscribers_see_events_in_order() {
        let events = EventSender::new();
        let mut rx = events.subscribe();
        events.data(vec![0x41]);
        events.break_changed(true);
        assert_eq!(rx.try_recv().unwrap(), PortEvent::Data(vec![0x41]));
        assert_eq!(rx.try_recv().unwrap(), PortEvent::BreakChanged(true));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_break_follows_combined_state() {
        let events = EventSender::new();
        let mut rx = events.subscribe();

        assert!(events.set_break(BreakSource::Local, true));
        assert!(events.set_break(BreakSource::Remote, true));
        // Remote still holds the line
        assert!(events.set_break(BreakSource::Local, false));
        assert!(events.break_active());
        assert!(!events.set_break(BreakSource::Local, false));
        assert!(events.set_break(BreakSource::Remote, false));

        assert_eq!(rx.try_recv().unwrap(), PortEvent::BreakChanged(true));
        assert_eq!(rx.try_recv().unwrap(), PortEvent::BreakChanged(false));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_clear_breaks() {
        let events = EventSender::new();
        let mut rx = events.subscribe();
        events.clear_breaks();
        assert!(rx.try_recv().is_err());

        events.set_break(BreakSource::Remote, true);
        events.clear_breaks();
        assert!(!events.break_held_by(BreakSource::Remote));
        assert_eq!(rx.try_recv().unwrap(), PortEvent::BreakChanged(true));
        assert_eq!(rx.try_recv().unwrap(), PortEvent::BreakChanged(false));
    }

    #[test]
    fn test_clones_share_break_state() {
        let events = EventSender::new();
        let worker = events.clone();
        worker.set_break(BreakSource::Remote, true);
        assert!(events.break_active());
        assert!(!events.break_held_by(BreakSource::Local));
    }

    #[test]
    fn test_event_classification() {
        assert!(PortEvent::Data(vec![]).is_data());
        assert!(!PortEvent::BreakChanged(false).is_data());
    }
}
