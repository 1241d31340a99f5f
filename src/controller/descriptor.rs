//! Device identification: which attached HID interfaces are controllers and
//! which decoder family handles them.

use crate::controller::decoder::generic::GenericDevice;
use crate::controller::decoder::schema::ReportSchema;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub const VALVE_VENDOR_ID: u16 = 0x28DE;
pub const SONY_VENDOR_ID: u16 = 0x054C;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusType {
    Usb,
    Bluetooth,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerFamily {
    SteamWired,
    SteamDongle,
    SteamBluetooth,
    Ds4Usb,
    Ds4Bluetooth,
    GenericHid,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct Capabilities: u16 {
        const GYRO = 1 << 0;
        const HAPTICS = 1 << 1;
        const LEFT_PAD = 1 << 2;
        const RIGHT_PAD = 1 << 3;
        const RIGHT_STICK = 1 << 4;
        const TOUCHPAD = 1 << 5;
        const WIRELESS_LINK = 1 << 6;
        const BATTERY = 1 << 7;
    }
}

impl ControllerFamily {
    pub fn capabilities(self) -> Capabilities {
        match self {
            ControllerFamily::SteamWired => {
                Capabilities::GYRO
                    | Capabilities::HAPTICS
                    | Capabilities::LEFT_PAD
                    | Capabilities::RIGHT_PAD
            }
            ControllerFamily::SteamDongle => {
                Capabilities::GYRO
                    | Capabilities::HAPTICS
                    | Capabilities::LEFT_PAD
                    | Capabilities::RIGHT_PAD
                    | Capabilities::WIRELESS_LINK
                    | Capabilities::BATTERY
            }
            ControllerFamily::SteamBluetooth => {
                Capabilities::GYRO | Capabilities::LEFT_PAD | Capabilities::RIGHT_PAD
            }
            ControllerFamily::Ds4Usb => {
                Capabilities::GYRO
                    | Capabilities::HAPTICS
                    | Capabilities::RIGHT_STICK
                    | Capabilities::TOUCHPAD
                    | Capabilities::BATTERY
            }
            ControllerFamily::Ds4Bluetooth => {
                Capabilities::GYRO
                    | Capabilities::RIGHT_STICK
                    | Capabilities::TOUCHPAD
                    | Capabilities::BATTERY
            }
            ControllerFamily::GenericHid => Capabilities::RIGHT_STICK,
        }
    }
}

impl fmt::Display for ControllerFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControllerFamily::SteamWired => "steam_wired",
            ControllerFamily::SteamDongle => "steam_dongle",
            ControllerFamily::SteamBluetooth => "steam_bluetooth",
            ControllerFamily::Ds4Usb => "ds4_usb",
            ControllerFamily::Ds4Bluetooth => "ds4_bluetooth",
            ControllerFamily::GenericHid => "generic_hid",
        };
        f.write_str(name)
    }
}

/// A HID interface as reported by enumeration, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCandidate {
    pub vendor_id: u16,
    pub product_id: u16,
    pub interface: i32,
    pub bus: BusType,
    pub path: String,
    pub serial: Option<String>,
    pub product: Option<String>,
}

/// Identity and capabilities of one attachable controller interface.
#[derive(Debug, Clone, Serialize)]
pub struct ControllerDescriptor {
    pub vendor_id: u16,
    pub product_id: u16,
    pub interface: i32,
    pub bus: BusType,
    pub path: String,
    pub serial: Option<String>,
    pub name: String,
    pub family: ControllerFamily,
    pub capabilities: Capabilities,
    #[serde(skip)]
    pub schema: Option<Arc<ReportSchema>>,
}

impl ControllerDescriptor {
    pub fn is_wireless(&self) -> bool {
        self.capabilities.contains(Capabilities::WIRELESS_LINK)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceMatch {
    Any,
    Exactly(i32),
    Range(i32, i32),
}

impl InterfaceMatch {
    fn matches(self, interface: i32) -> bool {
        match self {
            InterfaceMatch::Any => true,
            InterfaceMatch::Exactly(n) => interface == n,
            InterfaceMatch::Range(lo, hi) => (lo..=hi).contains(&interface),
        }
    }
}

pub struct KnownDevice {
    pub vendor_id: u16,
    pub product_id: u16,
    pub interfaces: InterfaceMatch,
    pub bus: Option<BusType>,
    pub family: ControllerFamily,
    pub name: &'static str,
}

/// Built-in device table. Bus-specific rows come before catch-all rows.
pub const KNOWN_DEVICES: &[KnownDevice] = &[
    KnownDevice {
        vendor_id: VALVE_VENDOR_ID,
        product_id: 0x1102,
        interfaces: InterfaceMatch::Exactly(2),
        bus: None,
        family: ControllerFamily::SteamWired,
        name: "Steam Controller",
    },
    // Each dongle interface carries one wireless controller
    KnownDevice {
        vendor_id: VALVE_VENDOR_ID,
        product_id: 0x1142,
        interfaces: InterfaceMatch::Range(1, 4),
        bus: None,
        family: ControllerFamily::SteamDongle,
        name: "Steam Controller (wireless)",
    },
    KnownDevice {
        vendor_id: VALVE_VENDOR_ID,
        product_id: 0x1106,
        interfaces: InterfaceMatch::Any,
        bus: None,
        family: ControllerFamily::SteamBluetooth,
        name: "Steam Controller (Bluetooth)",
    },
    KnownDevice {
        vendor_id: SONY_VENDOR_ID,
        product_id: 0x05C4,
        interfaces: InterfaceMatch::Any,
        bus: Some(BusType::Bluetooth),
        family: ControllerFamily::Ds4Bluetooth,
        name: "DualShock 4",
    },
    KnownDevice {
        vendor_id: SONY_VENDOR_ID,
        product_id: 0x09CC,
        interfaces: InterfaceMatch::Any,
        bus: Some(BusType::Bluetooth),
        family: ControllerFamily::Ds4Bluetooth,
        name: "DualShock 4 v2",
    },
    KnownDevice {
        vendor_id: SONY_VENDOR_ID,
        product_id: 0x05C4,
        interfaces: InterfaceMatch::Any,
        bus: None,
        family: ControllerFamily::Ds4Usb,
        name: "DualShock 4",
    },
    KnownDevice {
        vendor_id: SONY_VENDOR_ID,
        product_id: 0x09CC,
        interfaces: InterfaceMatch::Any,
        bus: None,
        family: ControllerFamily::Ds4Usb,
        name: "DualShock 4 v2",
    },
    KnownDevice {
        vendor_id: SONY_VENDOR_ID,
        product_id: 0x0BA0,
        interfaces: InterfaceMatch::Any,
        bus: None,
        family: ControllerFamily::Ds4Usb,
        name: "DualShock 4 USB receiver",
    },
];

/// Vendor/product pairs worth enumerating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceFilter {
    pub vendor_id: u16,
    pub product_id: u16,
}

pub fn device_filters(generic: &[GenericDevice]) -> Vec<DeviceFilter> {
    let mut filters: Vec<DeviceFilter> = KNOWN_DEVICES
        .iter()
        .map(|d| DeviceFilter {
            vendor_id: d.vendor_id,
            product_id: d.product_id,
        })
        .chain(generic.iter().map(|g| DeviceFilter {
            vendor_id: g.vendor_id,
            product_id: g.product_id,
        }))
        .collect();
    filters.sort_by_key(|f| (f.vendor_id, f.product_id));
    filters.dedup();
    filters
}

/// Turn an enumerated interface into a descriptor, if any family handles it.
///
/// Built-in families win over configured generic devices with the same ids.
pub fn classify(candidate: &DeviceCandidate, generic: &[GenericDevice]) -> Option<ControllerDescriptor> {
    let known = KNOWN_DEVICES.iter().find(|d| {
        d.vendor_id == candidate.vendor_id
            && d.product_id == candidate.product_id
            && d.interfaces.matches(candidate.interface)
            && d.bus.map_or(true, |bus| bus == candidate.bus)
    });

    if let Some(known) = known {
        return Some(ControllerDescriptor {
            vendor_id: candidate.vendor_id,
            product_id: candidate.product_id,
            interface: candidate.interface,
            bus: candidate.bus,
            path: candidate.path.clone(),
            serial: candidate.serial.clone(),
            name: known.name.to_string(),
            family: known.family,
            capabilities: known.family.capabilities(),
            schema: None,
        });
    }

    generic
        .iter()
        .find(|g| g.matches(candidate))
        .map(|g| ControllerDescriptor {
            vendor_id: candidate.vendor_id,
            product_id: candidate.product_id,
            interface: candidate.interface,
            bus: candidate.bus,
            path: candidate.path.clone(),
            serial: candidate.serial.clone(),
            name: g.name.clone(),
            family: ControllerFamily::GenericHid,
            capabilities: ControllerFamily::GenericHid.capabilities(),
            schema: Some(g.schema.clone()),
        })
}
