//! USB Vendor/Product ID database for the supported chips
//!
//! A device is driven directly only when its (VID, PID) pair appears here.
//! PL2303 entries also carry the quirk flags the driver starts from.

use usbser_protocol::pl2303::Quirks;
use usbser_protocol::ChipFamily;

/// USB Vendor ID / Product ID pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UsbId {
    pub vid: u16,
    pub pid: u16,
}

impl UsbId {
    pub const fn new(vid: u16, pid: u16) -> Self {
        Self { vid, pid }
    }
}

/// Prolific PL2303
pub mod prolific {
    use super::{Quirks, UsbId};

    pub const VID: u16 = 0x067B;

    pub const PL2303: UsbId = UsbId::new(VID, 0x2303);

    /// Known product IDs with their table quirks, in lookup order
    pub const PRODUCTS: &[(u16, Quirks)] = &[
        (0x2303, Quirks::ENDPOINT_HACK),
        (0x2304, Quirks::NONE),
        (0x23a3, Quirks::NONE),
        (0x23b3, Quirks::NONE),
        (0x23c3, Quirks::NONE),
        (0x23d3, Quirks::NONE),
        (0x23e3, Quirks::NONE),
        (0x23f3, Quirks::NONE),
        (0x04bb, Quirks::NONE),
        (0x1234, Quirks::NONE),
        (0xaaa0, Quirks::NONE),
        (0xaaa2, Quirks::NONE),
        (0xaaa8, Quirks::NONE),
        (0x0611, Quirks::NONE),
        (0x0612, Quirks::NONE),
        (0x0609, Quirks::NONE),
        (0x331a, Quirks::NONE),
        (0x0307, Quirks::NONE),
        (0xe1f1, Quirks::NONE),
    ];

    /// Table quirks for `pid`, `None` if the product is unknown
    pub fn quirks(pid: u16) -> Option<Quirks> {
        PRODUCTS
            .iter()
            .find(|(known, _)| *known == pid)
            .map(|(_, quirks)| *quirks)
    }
}

/// WCH CH340/CH341
pub mod wch {
    use super::UsbId;

    pub const VID: u16 = 0x1A86;
    /// Older parts report the WinChipHead vendor ID
    pub const LEGACY_VID: u16 = 0x4348;

    pub const CH340: UsbId = UsbId::new(VID, 0x7523);
    pub const CH341: UsbId = UsbId::new(VID, 0x5523);
    pub const CH341_LEGACY: UsbId = UsbId::new(LEGACY_VID, 0x5523);

    pub const ALL: &[UsbId] = &[CH341_LEGACY, CH340, CH341];
}

/// Silicon Labs CP210x
pub mod silabs {
    use super::UsbId;

    pub const VID: u16 = 0x10C4;

    /// CP2101 through CP2104 share one product ID
    pub const CP2102: UsbId = UsbId::new(VID, 0xEA60);
    pub const CP2105: UsbId = UsbId::new(VID, 0xEA70);

    pub const ALL: &[UsbId] = &[CP2102, CP2105];
}

/// Which driver a device matched, with its PL2303 table quirks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipMatch {
    Pl2303(Quirks),
    Ch34x,
    Cp210x,
}

impl ChipMatch {
    pub fn family(&self) -> ChipFamily {
        match self {
            ChipMatch::Pl2303(_) => ChipFamily::Pl2303,
            ChipMatch::Ch34x => ChipFamily::Ch34x,
            ChipMatch::Cp210x => ChipFamily::Cp210x,
        }
    }
}

/// Look up a device by its descriptor IDs
pub fn lookup(vid: u16, pid: u16) -> Option<ChipMatch> {
    let id = UsbId::new(vid, pid);
    if silabs::ALL.contains(&id) {
        return Some(ChipMatch::Cp210x);
    }
    if wch::ALL.contains(&id) {
        return Some(ChipMatch::Ch34x);
    }
    if vid == prolific::VID {
        return prolific::quirks(pid).map(ChipMatch::Pl2303);
    }
    None
}


#[cfg(test)]
mod proptest_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn unknown_vendors_never_match(vid in any::<u16>(), pid in any::<u16>()) {
            prop_assume!(![prolific::VID, wch::VID, wch::LEGACY_VID, silabs::VID].contains(&vid));
            prop_assert_eq!(lookup(vid, pid), None);
        }

        #[test]
        fn every_prolific_match_is_in_table(pid in any::<u16>()) {
            if let Some(ChipMatch::Pl2303(quirks)) = lookup(prolific::VID, pid) {
                prop_assert!(prolific::PRODUCTS.contains(&(pid, quirks)));
            } else {
                prop_assert!(prolific::PRODUCTS.iter().all(|(known, _)| *known != pid));
            }
        }
    }
}
