use crate::output::codes::{CodeKind, OutputClass};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OutputError {
    /// The device went away or cannot be created right now.
    #[error("Virtual {0} unavailable: {1}")]
    OutputUnavailable(OutputClass, String),

    #[error("Virtual input backend: {0}")]
    Backend(String),
}

/// One input event for a virtual device; the sync report is implied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputEvent {
    pub kind: CodeKind,
    pub code: u16,
    pub value: i32,
}

/// Identity the virtual devices announce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub name_prefix: String,
    pub vendor: u16,
    pub product: u16,
    pub version: u16,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            name_prefix: "padbridge".into(),
            // Xbox 360 pad, so games pick the right default layout
            vendor: 0x045e,
            product: 0x028e,
            version: 0x0110,
        }
    }
}

impl OutputSettings {
    pub fn device_name(&self, class: OutputClass, slot: u8) -> String {
        format!("{} {} {}", self.name_prefix, class, slot)
    }
}

pub trait VirtualOutput: Send {
    /// Write the events followed by one sync report.
    fn emit(&mut self, events: &[OutputEvent]) -> Result<(), OutputError>;
}

pub trait VirtualDeviceFactory: Send + Sync {
    /// Fails when virtual devices cannot be created at all.
    fn probe(&self) -> Result<(), OutputError>;

    fn create(&self, class: OutputClass, slot: u8) -> Result<Box<dyn VirtualOutput>, OutputError>;
}
