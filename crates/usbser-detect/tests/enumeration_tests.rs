//! Enumeration over synthetic device lists

use std::sync::Arc;

use usbser_detect::{PortKind, PortScanner, ScannerConfig};
use usbser_port::{ChipFamily, SerialPort, UsbDevice};
use usbser_sim::{chips, VirtualUsbDevice};

fn devices(list: &[VirtualUsbDevice]) -> Vec<Arc<dyn UsbDevice>> {
    list.iter()
        .map(|d| Arc::new(d.clone()) as Arc<dyn UsbDevice>)
        .collect()
}

#[test]
fn unknown_devices_are_skipped() {
    let list = [
        chips::pl2303_hx(),
        chips::ch34x().at(1, 2),
        // FTDI, not driven directly
        VirtualUsbDevice::new(0x0403, 0x6001).at(1, 3),
    ];

    let ports = PortScanner::new().enumerate_with(devices(&list));

    assert_eq!(ports.len(), 2);
    assert_eq!(ports[0].summary.kind, PortKind::Usb(ChipFamily::Ch34x));
    assert_eq!(ports[1].summary.kind, PortKind::Usb(ChipFamily::Pl2303));
}

#[test]
fn families_in_fixed_order() {
    let list = [
        chips::pl2303_hx().at(2, 1),
        chips::cp210x().at(2, 2),
        chips::ch34x().at(2, 3),
        chips::cp210x().at(2, 4),
    ];

    let names: Vec<String> = PortScanner::new()
        .enumerate_with(devices(&list))
        .into_iter()
        .map(|d| d.summary.name)
        .collect();

    assert_eq!(
        names,
        vec![
            "CP210x Bus 2 Addr 2",
            "CP210x Bus 2 Addr 4",
            "CH34x Bus 2 Addr 3",
            "PL2303 Bus 2 Addr 1",
        ]
    );
}

#[test]
fn enumeration_does_not_open_devices() {
    let device = chips::cp210x();
    let ports = PortScanner::new().enumerate_with(devices(&[device.clone()]));

    assert_eq!(ports.len(), 1);
    assert_eq!(device.open_count(), 0);
    assert!(!ports[0].port.is_open());
}

#[test]
fn disabled_family_is_skipped() {
    let config = ScannerConfig {
        ch34x: false,
        ..Default::default()
    };
    let list = [chips::ch34x(), chips::pl2303_type01()];

    let ports = PortScanner::with_config(config).enumerate_with(devices(&list));

    assert_eq!(ports.len(), 1);
    assert_eq!(ports[0].summary.vid, Some(chips::PROLIFIC_VID));
}

#[test]
fn enumerated_port_is_usable() {
    let device = chips::pl2303_hx();
    let mut ports = PortScanner::new().enumerate_with(devices(&[device.clone()]));
    let port = ports.remove(0).port;

    port.open().unwrap();
    port.send_data(b"AT\r").unwrap();
    assert_eq!(device.written(), b"AT\r");
    port.close();
    assert_eq!(device.open_handles(), 0);
}

#[test]
fn pl2303_quirk_entry_still_opens() {
    // 0x2303 carries the endpoint quirk in the table
    let device = chips::pl2303_hx();
    let ports = PortScanner::new().enumerate_with(devices(&[device]));

    assert_eq!(ports[0].summary.pid, Some(0x2303));
    ports[0].port.open().unwrap();
    assert!(ports[0].port.is_open());
}
