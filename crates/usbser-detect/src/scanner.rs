//! Port scanner
//!
//! Walks the USB device list once, builds a driver for every device found in
//! the ID tables, then appends the OS-native ports and the loop-back port.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serialport::{available_ports, SerialPortType};
use tracing::{debug, info};
use usbser_port::{
    Ch34xDriver, Ch34xPort, ChipFamily, Cp210xDriver, Cp210xOptions, Cp210xPort, LoopbackPort,
    NativePort, NusbDevice, Pl2303Driver, Pl2303Port, SerialPort, UsbDevice, LOOPBACK_PORT_NAME,
};

use crate::error::DetectError;
use crate::usb_ids::{self, ChipMatch};

/// Information about an OS serial port
#[derive(Debug, Clone)]
pub struct SerialPortInfo {
    /// Port name (e.g., /dev/ttyUSB0, COM3)
    pub port: String,
    /// USB Vendor ID (if USB)
    pub vid: Option<u16>,
    /// USB Product ID (if USB)
    pub pid: Option<u16>,
    /// USB product string
    pub product: Option<String>,
}

impl SerialPortInfo {
    /// Create from serialport crate's port info
    fn from_serialport(name: String, port_type: &SerialPortType) -> Self {
        match port_type {
            SerialPortType::UsbPort(usb) => Self {
                port: name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                product: usb.product.clone(),
            },
            _ => Self {
                port: name,
                vid: None,
                pid: None,
                product: None,
            },
        }
    }
}

/// Which backend a discovered port uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortKind {
    /// Driven directly over USB
    Usb(ChipFamily),
    /// Driven by the operating system
    Native,
    Loopback,
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortKind::Usb(family) => write!(f, "{}", family),
            PortKind::Native => write!(f, "native"),
            PortKind::Loopback => write!(f, "loopback"),
        }
    }
}

/// Listing entry for a discovered port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSummary {
    pub name: String,
    pub kind: PortKind,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    /// USB product string, native ports only
    pub product: Option<String>,
}

impl fmt::Display for PortSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.kind)?;
        if let (Some(vid), Some(pid)) = (self.vid, self.pid) {
            write!(f, " [{:04x}:{:04x}]", vid, pid)?;
        }
        if let Some(product) = &self.product {
            write!(f, " {}", product)?;
        }
        Ok(())
    }
}

/// A port ready to be opened, with its listing entry
pub struct DiscoveredPort {
    pub summary: PortSummary,
    pub port: Box<dyn SerialPort>,
}

impl fmt::Debug for DiscoveredPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveredPort")
            .field("summary", &self.summary)
            .finish_non_exhaustive()
    }
}

/// Port scanner configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Drive CP210x devices directly
    pub cp210x: bool,
    /// Drive CH34x devices directly
    pub ch34x: bool,
    /// Drive PL2303 devices directly
    pub pl2303: bool,
    /// List ports the operating system provides
    pub include_native: bool,
    /// Append the loop-back port
    pub include_loopback: bool,
    /// Skip native ports whose name contains one of these
    pub skip_patterns: Vec<String>,
    /// Options for every CP210x port created
    pub cp210x_options: Cp210xOptions,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            cp210x: true,
            ch34x: true,
            pl2303: true,
            include_native: true,
            include_loopback: true,
            skip_patterns: vec![
                // Bluetooth ports on macOS
                "Bluetooth".to_string(),
                // Debug/logging ports
                "debug".to_string(),
            ],
            cp210x_options: Cp210xOptions::default(),
        }
    }
}

impl ScannerConfig {
    fn wants(&self, family: ChipFamily) -> bool {
        match family {
            ChipFamily::Cp210x => self.cp210x,
            ChipFamily::Ch34x => self.ch34x,
            ChipFamily::Pl2303 => self.pl2303,
        }
    }
}

/// Port scanner
pub struct PortScanner {
    config: ScannerConfig,
}

impl PortScanner {
    /// Create a new scanner with default configuration
    pub fn new() -> Self {
        Self::with_config(ScannerConfig::default())
    }

    /// Create a scanner with custom configuration
    pub fn with_config(config: ScannerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Discover every port: USB-direct first, then native, then loop-back
    pub fn scan(&self) -> Result<Vec<DiscoveredPort>, DetectError> {
        info!("Scanning for serial ports...");
        let devices = NusbDevice::list()?
            .into_iter()
            .map(|d| Arc::new(d) as Arc<dyn UsbDevice>);
        let mut ports = self.enumerate_with(devices);

        if self.config.include_native {
            ports.extend(self.enumerate_native()?.into_iter().map(|info| {
                let port = NativePort::new(info.port.clone());
                DiscoveredPort {
                    summary: PortSummary {
                        name: info.port,
                        kind: PortKind::Native,
                        vid: info.vid,
                        pid: info.pid,
                        product: info.product,
                    },
                    port: Box::new(port),
                }
            }));
        }

        if self.config.include_loopback {
            ports.push(loopback_port());
        }

        if ports.is_empty() {
            info!("No serial ports found");
        } else {
            info!("Found {} port(s)", ports.len());
            for port in &ports {
                info!("  {}", port.summary);
            }
        }
        Ok(ports)
    }

    /// Just the ports, in scan order
    pub fn scan_ports(&self) -> Result<Vec<Box<dyn SerialPort>>, DetectError> {
        Ok(self.scan()?.into_iter().map(|d| d.port).collect())
    }

    /// Build USB-direct ports for the matching devices in `devices`
    ///
    /// Unknown devices are skipped. The result is grouped by family in
    /// CP210x, CH34x, PL2303 order, keeping device order within a family.
    pub fn enumerate_with<I>(&self, devices: I) -> Vec<DiscoveredPort>
    where
        I: IntoIterator<Item = Arc<dyn UsbDevice>>,
    {
        let mut cp210x = Vec::new();
        let mut ch34x = Vec::new();
        let mut pl2303 = Vec::new();

        for device in devices {
            let identity = device.identity();
            let Some(matched) = usb_ids::lookup(identity.vendor_id, identity.product_id) else {
                continue;
            };
            if !self.config.wants(matched.family()) {
                debug!("Skipping {} ({} disabled)", identity, matched.family());
                continue;
            }

            let port: Box<dyn SerialPort> = match matched {
                ChipMatch::Cp210x => Box::new(Cp210xPort::new(
                    device,
                    Cp210xDriver::new(self.config.cp210x_options),
                )),
                ChipMatch::Ch34x => Box::new(Ch34xPort::new(device, Ch34xDriver::new())),
                ChipMatch::Pl2303(quirks) => {
                    Box::new(Pl2303Port::new(device, Pl2303Driver::new(quirks)))
                }
            };
            let bucket = match matched.family() {
                ChipFamily::Cp210x => &mut cp210x,
                ChipFamily::Ch34x => &mut ch34x,
                ChipFamily::Pl2303 => &mut pl2303,
            };
            debug!("{} matched {}", identity, matched.family());
            bucket.push(DiscoveredPort {
                summary: PortSummary {
                    name: port.port_name(),
                    kind: PortKind::Usb(matched.family()),
                    vid: Some(identity.vendor_id),
                    pid: Some(identity.product_id),
                    product: None,
                },
                port,
            });
        }

        cp210x.into_iter().chain(ch34x).chain(pl2303).collect()
    }

    /// Enumerate the ports the operating system provides
    pub fn enumerate_native(&self) -> Result<Vec<SerialPortInfo>, DetectError> {
        let ports = available_ports().map_err(|e| DetectError::EnumerationFailed(e.to_string()))?;

        Ok(ports
            .into_iter()
            .map(|p| SerialPortInfo::from_serialport(p.port_name, &p.port_type))
            .filter(|p| !self.should_skip_port(p))
            .collect())
    }

    /// Check if a native port should be skipped
    fn should_skip_port(&self, port: &SerialPortInfo) -> bool {
        self.config
            .skip_patterns
            .iter()
            .any(|pattern| port.port.contains(pattern.as_str()))
    }
}

impl Default for PortScanner {
    fn default() -> Self {
        Self::new()
    }
}

fn loopback_port() -> DiscoveredPort {
    DiscoveredPort {
        summary: PortSummary {
            name: LOOPBACK_PORT_NAME.to_string(),
            kind: PortKind::Loopback,
            vid: None,
            pid: None,
            product: None,
        },
        port: Box::new(LoopbackPort::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serialport::UsbPortInfo;

    #[test]
    fn test_serial_port_info_from_usb() {
        let usb_info = SerialPortType::UsbPort(UsbPortInfo {
            vid: 0x067b,
            pid: 0x2303,
            serial_number: Some("12345".to_string()),
            manufacturer: Some("Prolific".to_string()),
            product: Some("USB-Serial Controller".to_string()),
        });

        let info = SerialPortInfo::from_serialport("/dev/ttyUSB0".to_string(), &usb_info);

        assert_eq!(info.vid, Some(0x067b));
        assert_eq!(info.pid, Some(0x2303));
        assert_eq!(info.product.as_deref(), Some("USB-Serial Controller"));
    }

    #[test]
    fn test_skip_patterns() {
        let scanner = PortScanner::new();
        let bt = SerialPortInfo::from_serialport(
            "/dev/cu.Bluetooth-Incoming-Port".to_string(),
            &SerialPortType::Unknown,
        );
        let usb = SerialPortInfo::from_serialport("/dev/ttyUSB0".to_string(), &SerialPortType::Unknown);
        assert!(scanner.should_skip_port(&bt));
        assert!(!scanner.should_skip_port(&usb));
    }

    #[test]
    fn test_summary_display() {
        let summary = PortSummary {
            name: "CH34x Bus 1 Addr 4".to_string(),
            kind: PortKind::Usb(ChipFamily::Ch34x),
            vid: Some(0x1a86),
            pid: Some(0x7523),
            product: None,
        };
        assert_eq!(summary.to_string(), "CH34x Bus 1 Addr 4 (CH34x) [1a86:7523]");
        assert_eq!(loopback_port().summary.to_string(), "loopback (loopback)");
    }

    #[test]
    fn test_config_defaults_fill_missing_fields() {
        let config: ScannerConfig = serde_json::from_str(r#"{"pl2303": false}"#).unwrap();
        assert!(!config.pl2303);
        assert!(config.cp210x);
        assert!(config.include_loopback);
        assert!(config.cp210x_options.poll_comm_status);
    }
}
