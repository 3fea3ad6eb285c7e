//! Background bulk-IN reader
//!
//! One thread per open port polls the data endpoint with a short timeout and
//! publishes what arrives. `close()` raises the stop flag and joins, so the
//! worker is gone before the USB handle is released.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::error::UsbError;
use crate::events::EventSender;
use crate::transport::UsbHandle;

/// Per-chip processing of the receive stream
pub trait ReadHook: Send + 'static {
    /// Handle one non-empty chunk read from the endpoint
    fn on_data(&mut self, data: Vec<u8>, events: &EventSender) {
        events.data(data);
    }

    /// Runs once per loop iteration after the read attempt
    fn after_read(&mut self, _handle: &dyn UsbHandle, _events: &EventSender) {}
}

/// Forwards every chunk unchanged
#[derive(Debug, Default)]
pub struct PassThrough;

impl ReadHook for PassThrough {}

/// Endpoint and timing used by the reader loop
#[derive(Debug, Clone, Copy)]
pub struct ReadSettings {
    pub endpoint: u8,
    pub chunk_size: usize,
    pub timeout: Duration,
}

/// Handle to a running reader thread
#[derive(Debug)]
pub struct ReaderWorker {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ReaderWorker {
    /// Start the bulk-IN polling loop for a USB-direct port
    pub fn spawn(
        name: &str,
        handle: Arc<dyn UsbHandle>,
        settings: ReadSettings,
        mut hook: Box<dyn ReadHook>,
        events: EventSender,
    ) -> std::io::Result<Self> {
        let port_name = name.to_string();
        Self::spawn_with(name, move || {
            read_once(&port_name, &*handle, settings, hook.as_mut(), &events);
            hook.after_read(&*handle, &events);
        })
    }

    /// Run `poll` repeatedly on a new thread until stopped
    ///
    /// `poll` must block for a bounded time; the stop flag is only checked
    /// between calls.
    pub fn spawn_with<F>(name: &str, mut poll: F) -> std::io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let port_name = name.to_string();

        let thread = thread::Builder::new()
            .name(format!("usbser-reader {}", name))
            .spawn(move || {
                debug!("{}: reader started", port_name);
                while !stop_flag.load(Ordering::Acquire) {
                    poll();
                }
                debug!("{}: reader stopped", port_name);
            })?;

        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Raise the stop flag and wait for the thread to exit
    ///
    /// Returns after at most one read timeout plus the hook's own work.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Reader thread panicked");
            }
        }
    }
}

impl Drop for ReaderWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn read_once(
    port_name: &str,
    handle: &dyn UsbHandle,
    settings: ReadSettings,
    hook: &mut dyn ReadHook,
    events: &EventSender,
) {
    match handle.read_bulk(settings.endpoint, settings.chunk_size, settings.timeout) {
        Ok(data) if data.is_empty() => trace!("{}: read timeout, no data", port_name),
        Ok(data) => {
            trace!("{}: received {} bytes", port_name, data.len());
            hook.on_data(data, events);
        }
        Err(UsbError::Timeout) => trace!("{}: read timeout", port_name),
        Err(e) => {
            debug!("{}: bulk read failed: {}", port_name, e);
            // Keep a dead device from turning this into a busy loop
            thread::sleep(settings.timeout);
        }
    }
}
