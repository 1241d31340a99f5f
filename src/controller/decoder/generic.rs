//! Config-driven decoder for HID gamepads without a dedicated family.
//!
//! ```toml
//! [[generic_devices]]
//! name = "Retro pad"
//! vendor_id = 0x0810
//! product_id = 0xE501
//! report_len = 8
//! report_id = 0x01
//!
//! [[generic_devices.fields]]
//! field = "stick_x"
//! offset = 3
//! width = "u8"
//! scale = { kind = "linear", center = 128, factor = 256 }
//!
//! [[generic_devices.buttons]]
//! offset = 5
//! bit = 5
//! button = "A"
//! ```

use crate::controller::decoder::schema::{
    ButtonBit, FieldSpec, HatSpec, ReportSchema, SequenceSpec, TagSpec,
};
use crate::controller::descriptor::DeviceCandidate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericDeviceConfig {
    pub name: String,
    pub vendor_id: u16,
    pub product_id: u16,
    #[serde(default)]
    pub interface: Option<i32>,
    pub report_len: usize,
    /// Expected value of byte 0, when the device numbers its reports.
    #[serde(default)]
    pub report_id: Option<u8>,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub buttons: Vec<ButtonBit>,
    #[serde(default)]
    pub hat: Option<HatSpec>,
    #[serde(default)]
    pub sequence: Option<SequenceSpec>,
}

/// A validated generic device entry with its compiled schema.
#[derive(Debug, Clone)]
pub struct GenericDevice {
    pub name: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub interface: Option<i32>,
    pub schema: Arc<ReportSchema>,
}

impl GenericDevice {
    pub fn from_config(config: &GenericDeviceConfig) -> Result<Self, String> {
        let schema = ReportSchema {
            name: config.name.clone(),
            report_len: config.report_len,
            tags: config
                .report_id
                .map(|value| vec![TagSpec { offset: 0, value }])
                .unwrap_or_default(),
            fields: config.fields.clone(),
            buttons: config.buttons.clone(),
            hat: config.hat,
            sequence: config.sequence,
            battery: None,
        };
        schema.validate()?;

        Ok(Self {
            name: config.name.clone(),
            vendor_id: config.vendor_id,
            product_id: config.product_id,
            interface: config.interface,
            schema: Arc::new(schema),
        })
    }

    pub fn matches(&self, candidate: &DeviceCandidate) -> bool {
        self.vendor_id == candidate.vendor_id
            && self.product_id == candidate.product_id
            && self.interface.map_or(true, |i| i == candidate.interface)
    }
}
