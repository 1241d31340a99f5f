use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HapticSide {
    Left,
    Right,
    Both,
}

impl HapticSide {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "LEFT" => Some(HapticSide::Left),
            "RIGHT" => Some(HapticSide::Right),
            "BOTH" => Some(HapticSide::Both),
            _ => None,
        }
    }
}

/// A rumble pulse train: `count` pulses of `period` microseconds each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HapticRequest {
    pub side: HapticSide,
    pub amplitude: u16,
    pub period: u16,
    pub count: u16,
}

impl HapticRequest {
    pub const DEFAULT_PERIOD: u16 = 1024;
    pub const DEFAULT_COUNT: u16 = 1;

    pub fn duration(&self) -> Duration {
        Duration::from_micros(self.period as u64 * self.count.max(1) as u64)
    }
}

/// Raw report to send to the device, by HID report kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputReport {
    Feature(Vec<u8>),
    Output(Vec<u8>),
    /// Read (and discard) feature report `id` of `len` bytes. Some devices
    /// change their report mode when a particular feature report is read.
    GetFeature { id: u8, len: usize },
}

/// Reports that realize one haptic request. Devices without duration control
/// get a follow-up `stop` report after the pulse train has elapsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HapticCommand {
    pub start: OutputReport,
    pub stop: Option<(Duration, OutputReport)>,
}
