//! Virtual USB device
//!
//! Records every transfer a driver issues and answers control reads from a
//! small rule table. Bulk-IN data is injected by the test and handed to the
//! reader thread the way a real endpoint would, including blocking until the
//! read timeout when nothing is queued.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::trace;
use usbser_port::{DeviceDescriptor, DeviceIdentity, UsbDevice, UsbError, UsbHandle};
use usbser_protocol::ControlSetup;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One transfer observed by the virtual device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transfer {
    ControlIn { setup: ControlSetup, length: u16 },
    ControlOut { setup: ControlSetup, data: Vec<u8> },
    ClearHalt { endpoint: u8 },
    BulkOut { endpoint: u8, data: Vec<u8> },
}

impl Transfer {
    /// Control request code, `None` for non-control transfers
    pub fn request(&self) -> Option<u8> {
        match self {
            Transfer::ControlIn { setup, .. } | Transfer::ControlOut { setup, .. } => {
                Some(setup.request)
            }
            _ => None,
        }
    }

    pub fn is_control_out(&self, request: u8) -> bool {
        matches!(self, Transfer::ControlOut { setup, .. } if setup.request == request)
    }

    pub fn is_control_in(&self, request: u8) -> bool {
        matches!(self, Transfer::ControlIn { setup, .. } if setup.request == request)
    }
}

/// How a control-OUT request feeds a later control-IN read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mirror {
    /// Store `wValue` (little endian)
    Value { get_request: u8 },
    /// Store the data stage
    Data { get_request: u8 },
}

#[derive(Debug, Default)]
struct Rules {
    /// Fixed answers keyed by (request, value)
    responses: HashMap<(u8, u16), Vec<u8>>,
    /// Registers written by one request and read by another
    mirrors: HashMap<u8, Mirror>,
    registers: HashMap<u8, Vec<u8>>,
    /// Failing requests; `None` value matches any `wValue`
    failures: HashSet<(u8, Option<u16>)>,
    fail_bulk_in: bool,
}

impl Rules {
    fn fails(&self, setup: &ControlSetup) -> bool {
        self.failures.contains(&(setup.request, None))
            || self.failures.contains(&(setup.request, Some(setup.value)))
    }
}

#[derive(Debug, Default)]
struct Shared {
    log: Mutex<Vec<Transfer>>,
    rules: Mutex<Rules>,
    bulk_in: Mutex<VecDeque<Vec<u8>>>,
    bulk_ready: Condvar,
    open_handles: AtomicUsize,
    opens: AtomicUsize,
}

impl Shared {
    fn record(&self, transfer: Transfer) {
        trace!("virtual device: {:?}", transfer);
        lock(&self.log).push(transfer);
    }
}

/// A scriptable USB device
///
/// Cloning yields another view of the same device, so a test can hand one
/// clone to a port and keep another for inspection.
#[derive(Debug, Clone)]
pub struct VirtualUsbDevice {
    identity: DeviceIdentity,
    descriptor: DeviceDescriptor,
    endpoints: Vec<(u8, bool)>,
    open_error: Option<UsbError>,
    shared: Arc<Shared>,
}

impl VirtualUsbDevice {
    /// Device with one bulk IN (0x81) and one bulk OUT (0x02) endpoint
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            identity: DeviceIdentity {
                vendor_id,
                product_id,
                bus: 1,
                address: 1,
            },
            descriptor: DeviceDescriptor {
                device_class: 0x00,
                max_packet_size_0: 0x40,
            },
            endpoints: vec![(0x81, true), (0x02, true)],
            open_error: None,
            shared: Arc::new(Shared::default()),
        }
    }

    pub fn at(mut self, bus: u8, address: u8) -> Self {
        self.identity.bus = bus;
        self.identity.address = address;
        self
    }

    pub fn with_descriptor(mut self, device_class: u8, max_packet_size_0: u8) -> Self {
        self.descriptor = DeviceDescriptor {
            device_class,
            max_packet_size_0,
        };
        self
    }

    /// Replace the endpoint list of interface 0 with `(address, is_bulk)` pairs
    pub fn with_endpoints(mut self, endpoints: &[(u8, bool)]) -> Self {
        self.endpoints = endpoints.to_vec();
        self
    }

    /// Make `open()` fail
    pub fn failing_open(mut self, error: UsbError) -> Self {
        self.open_error = Some(error);
        self
    }

    /// Answer control-IN `request`/`value` with `data`
    pub fn respond(&self, request: u8, value: u16, data: &[u8]) {
        lock(&self.shared.rules)
            .responses
            .insert((request, value), data.to_vec());
    }

    /// Control-OUT `set_request` stores its `wValue`; `get_request` reads it back
    pub fn mirror_value(&self, set_request: u8, get_request: u8) {
        lock(&self.shared.rules)
            .mirrors
            .insert(set_request, Mirror::Value { get_request });
    }

    /// Control-OUT `set_request` stores its data stage; `get_request` reads it back
    pub fn mirror_data(&self, set_request: u8, get_request: u8) {
        lock(&self.shared.rules)
            .mirrors
            .insert(set_request, Mirror::Data { get_request });
    }

    /// Seed the register read by `get_request`
    pub fn set_register(&self, get_request: u8, data: &[u8]) {
        lock(&self.shared.rules)
            .registers
            .insert(get_request, data.to_vec());
    }

    /// Fail every control transfer with `request` (any `wValue` when `None`)
    pub fn fail_control(&self, request: u8, value: Option<u16>) {
        lock(&self.shared.rules).failures.insert((request, value));
    }

    pub fn clear_failures(&self) {
        let mut rules = lock(&self.shared.rules);
        rules.failures.clear();
        rules.fail_bulk_in = false;
    }

    /// Make bulk reads return a transfer error
    pub fn fail_bulk_in(&self, fail: bool) {
        lock(&self.shared.rules).fail_bulk_in = fail;
    }

    /// Queue one chunk for the next bulk-IN read
    pub fn inject(&self, data: &[u8]) {
        lock(&self.shared.bulk_in).push_back(data.to_vec());
        self.shared.bulk_ready.notify_all();
    }

    /// Every transfer recorded so far
    pub fn transfers(&self) -> Vec<Transfer> {
        lock(&self.shared.log).clone()
    }

    pub fn clear_transfers(&self) {
        lock(&self.shared.log).clear();
    }

    /// Recorded control-OUT transfers with `request`
    pub fn control_outs(&self, request: u8) -> Vec<ControlSetup> {
        lock(&self.shared.log)
            .iter()
            .filter_map(|t| match t {
                Transfer::ControlOut { setup, .. } if setup.request == request => Some(*setup),
                _ => None,
            })
            .collect()
    }

    /// Data written to the bulk-OUT endpoint, concatenated
    pub fn written(&self) -> Vec<u8> {
        lock(&self.shared.log)
            .iter()
            .filter_map(|t| match t {
                Transfer::BulkOut { data, .. } => Some(data.as_slice()),
                _ => None,
            })
            .flatten()
            .copied()
            .collect()
    }

    /// Current contents of the register read by `get_request`
    pub fn register(&self, get_request: u8) -> Option<Vec<u8>> {
        lock(&self.shared.rules).registers.get(&get_request).cloned()
    }

    /// Handles that are open and not yet dropped
    pub fn open_handles(&self) -> usize {
        self.shared.open_handles.load(Ordering::SeqCst)
    }

    /// Number of successful `open()` calls
    pub fn open_count(&self) -> usize {
        self.shared.opens.load(Ordering::SeqCst)
    }
}

impl UsbDevice for VirtualUsbDevice {
    fn identity(&self) -> DeviceIdentity {
        self.identity
    }

    fn open(&self) -> Result<Arc<dyn UsbHandle>, UsbError> {
        if let Some(err) = &self.open_error {
            return Err(err.clone());
        }
        self.shared.opens.fetch_add(1, Ordering::SeqCst);
        self.shared.open_handles.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(VirtualHandle {
            descriptor: self.descriptor,
            endpoints: self.endpoints.clone(),
            shared: self.shared.clone(),
        }))
    }
}

struct VirtualHandle {
    descriptor: DeviceDescriptor,
    endpoints: Vec<(u8, bool)>,
    shared: Arc<Shared>,
}

impl Drop for VirtualHandle {
    fn drop(&mut self) {
        self.shared.open_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

impl UsbHandle for VirtualHandle {
    fn descriptor(&self) -> DeviceDescriptor {
        self.descriptor
    }

    fn endpoints(&self) -> Result<Vec<(u8, bool)>, UsbError> {
        Ok(self.endpoints.clone())
    }

    fn control_in(
        &self,
        setup: ControlSetup,
        length: u16,
        _timeout: Duration,
    ) -> Result<Vec<u8>, UsbError> {
        self.shared.record(Transfer::ControlIn { setup, length });
        let rules = lock(&self.shared.rules);
        if rules.fails(&setup) {
            return Err(UsbError::Transfer("stall".to_string()));
        }
        let mut data = rules
            .responses
            .get(&(setup.request, setup.value))
            .or_else(|| rules.registers.get(&setup.request))
            .cloned()
            .unwrap_or_else(|| vec![0; usize::from(length)]);
        data.truncate(usize::from(length));
        Ok(data)
    }

    fn control_out(
        &self,
        setup: ControlSetup,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<(), UsbError> {
        self.shared.record(Transfer::ControlOut {
            setup,
            data: data.to_vec(),
        });
        let mut rules = lock(&self.shared.rules);
        if rules.fails(&setup) {
            return Err(UsbError::Transfer("stall".to_string()));
        }
        match rules.mirrors.get(&setup.request).copied() {
            Some(Mirror::Value { get_request }) => {
                rules
                    .registers
                    .insert(get_request, setup.value.to_le_bytes().to_vec());
            }
            Some(Mirror::Data { get_request }) => {
                rules.registers.insert(get_request, data.to_vec());
            }
            None => {}
        }
        Ok(())
    }

    fn clear_halt(&self, endpoint: u8) -> Result<(), UsbError> {
        self.shared.record(Transfer::ClearHalt { endpoint });
        Ok(())
    }

    fn read_bulk(
        &self,
        _endpoint: u8,
        length: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, UsbError> {
        if lock(&self.shared.rules).fail_bulk_in {
            std::thread::sleep(timeout.min(Duration::from_millis(10)));
            return Err(UsbError::Transfer("bulk read failed".to_string()));
        }

        let queue = lock(&self.shared.bulk_in);
        let (mut queue, _) = self
            .shared
            .bulk_ready
            .wait_timeout_while(queue, timeout, |q| q.is_empty())
            .unwrap_or_else(PoisonError::into_inner);

        let Some(mut chunk) = queue.pop_front() else {
            return Ok(Vec::new());
        };
        if chunk.len() > length {
            let rest = chunk.split_off(length);
            queue.push_front(rest);
        }
        Ok(chunk)
    }

    fn submit_bulk(&self, endpoint: u8, data: Vec<u8>) -> Result<(), UsbError> {
        self.shared.record(Transfer::BulkOut { endpoint, data });
        Ok(())
    }

    fn cancel_transfers(&self) {}
}
