//! Preset virtual chips
//!
//! Each preset answers the reads its driver makes during open and keeps
//! read-back registers consistent with what was last written.

use usbser_protocol::{ch34x, cp210x, pl2303};

use crate::device::VirtualUsbDevice;

pub const PROLIFIC_VID: u16 = 0x067b;
pub const PL2303_PID: u16 = 0x2303;
pub const WCH_VID: u16 = 0x1a86;
pub const CH340_PID: u16 = 0x7523;
pub const SILABS_VID: u16 = 0x10c4;
pub const CP2102_PID: u16 = 0xea60;

/// 9600 baud, 1 stop bit, no parity, 8 data bits
const PL2303_DEFAULT_CODING: [u8; pl2303::LINE_CODING_LEN] = [0x80, 0x25, 0x00, 0x00, 0x00, 0x00, 0x08];

fn pl2303_base() -> VirtualUsbDevice {
    let device = VirtualUsbDevice::new(PROLIFIC_VID, PL2303_PID);
    device.mirror_data(pl2303::SET_LINE_REQUEST, pl2303::GET_LINE_REQUEST);
    device.set_register(pl2303::GET_LINE_REQUEST, &PL2303_DEFAULT_CODING);
    device
}

/// PL2303HX: 64-byte EP0 and a one-byte answer to the status probe
pub fn pl2303_hx() -> VirtualUsbDevice {
    let device = pl2303_base().with_descriptor(0x00, 0x40);
    device.respond(
        pl2303::VENDOR_READ_REQUEST,
        pl2303::READ_TYPE_HX_STATUS,
        &[0x00],
    );
    device
}

/// PL2303HXN: same descriptor as HX but the status probe stalls
pub fn pl2303_hxn() -> VirtualUsbDevice {
    let device = pl2303_base().with_descriptor(0x00, 0x40);
    device.fail_control(
        pl2303::VENDOR_READ_REQUEST,
        Some(pl2303::READ_TYPE_HX_STATUS),
    );
    device
}

/// Type 0/1 PL2303 reporting the communications device class
pub fn pl2303_type01() -> VirtualUsbDevice {
    pl2303_base().with_descriptor(0x02, 0x08)
}

/// CH340 with break and LCR registers at their power-on values
pub fn ch34x() -> VirtualUsbDevice {
    let device = VirtualUsbDevice::new(WCH_VID, CH340_PID).with_descriptor(0xff, 0x08);
    device.respond(ch34x::REQ_READ_VERSION, 0, &[0x31, 0x00]);
    device.respond(
        ch34x::REQ_READ_REG,
        ch34x::BREAK_REGISTERS,
        &[ch34x::NBREAK_BITS, ch34x::LCR_ENABLE_RX | ch34x::LCR_ENABLE_TX | ch34x::LCR_CS8],
    );
    device
}

/// CP2102 whose line control register reads back the last SET_LINE_CTL
pub fn cp210x() -> VirtualUsbDevice {
    let device = VirtualUsbDevice::new(SILABS_VID, CP2102_PID);
    device.mirror_value(cp210x::REQ_SET_LINE_CTL, cp210x::REQ_GET_LINE_CTL);
    device.set_register(cp210x::REQ_GET_LINE_CTL, &0x0800u16.to_le_bytes());
    device
}

/// GET_COMM_STATUS answer with the break error bit set or clear
pub fn comm_status(break_active: bool) -> [u8; cp210x::COMM_STATUS_LEN] {
    let mut status = [0u8; cp210x::COMM_STATUS_LEN];
    if break_active {
        status[..4].copy_from_slice(&cp210x::SERIAL_BREAK_ERROR.to_le_bytes());
    }
    status
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use usbser_port::{UsbDevice, UsbHandle};
    use usbser_protocol::cp210x::{CommStatus, LineControl};

    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(10);

    #[test]
    fn test_cp210x_line_control_reads_back() {
        let device = cp210x();
        let handle = device.open().unwrap();
        let line = LineControl(0x0800).with_parity(usbser_protocol::Parity::Even);
        handle
            .control_out(cp210x::set_line_ctl(line), &[], TIMEOUT)
            .unwrap();
        let raw = handle.control_in(cp210x::get_line_ctl(), 2, TIMEOUT).unwrap();
        assert_eq!(LineControl::from_bytes(&raw).unwrap(), line);
    }

    #[test]
    fn test_pl2303_probe_outcomes() {
        let hx = pl2303_hx().open().unwrap();
        assert_eq!(hx.control_in(pl2303::hx_status_probe(), 1, TIMEOUT).unwrap().len(), 1);

        let hxn = pl2303_hxn().open().unwrap();
        assert!(hxn.control_in(pl2303::hx_status_probe(), 1, TIMEOUT).is_err());
        // Other vendor reads still succeed
        assert!(hxn
            .control_in(pl2303::vendor_read(pl2303::ChipType::Hx, 0x8484), 1, TIMEOUT)
            .is_ok());
    }

    #[test]
    fn test_comm_status_break_bit() {
        assert!(CommStatus::parse(&comm_status(true)).unwrap().break_active());
        assert!(!CommStatus::parse(&comm_status(false)).unwrap().break_active());
    }

    #[test]
    fn test_injected_data_is_chunked() {
        let device = ch34x();
        let handle = device.open().unwrap();
        device.inject(&[1, 2, 3, 4, 5]);
        assert_eq!(handle.read_bulk(0x81, 3, TIMEOUT).unwrap(), vec![1, 2, 3]);
        assert_eq!(handle.read_bulk(0x81, 3, TIMEOUT).unwrap(), vec![4, 5]);
        assert!(handle.read_bulk(0x81, 3, TIMEOUT).unwrap().is_empty());
    }

    #[test]
    fn test_open_handle_count() {
        let device = pl2303_type01();
        let handle = device.open().unwrap();
        assert_eq!(device.open_handles(), 1);
        drop(handle);
        assert_eq!(device.open_handles(), 0);
        assert_eq!(device.open_count(), 1);
    }
}
