//! Controller model: device identification and report decoding
//!
//! 1. [`descriptor`] - Which HID interfaces are controllers, and of which family
//! 2. [`decoder`] - Family schemas turning raw reports into snapshots
//! 3. [`state`] - The normalized [`ControllerState`] every family produces
//! 4. [`haptics`] - Rumble requests and the reports that carry them
//!
//! # Architecture
//!
//! ```text
//! hidraw ──► ReportDecoder ──► ControllerState ──► mapping
//!             (per family)     (Copy snapshot)
//! ```
//!
//! Nothing in here performs I/O; sessions in `device` own the transport.

pub mod decoder;
pub mod descriptor;
pub mod haptics;
pub mod state;

pub use decoder::{DecodeOutcome, LinkStatus, MalformedReport, PacketGap, ReportDecoder};
pub use descriptor::{BusType, Capabilities, ControllerDescriptor, ControllerFamily, DeviceCandidate};
pub use haptics::{HapticRequest, HapticSide};
pub use state::{AnalogInput, Axis2, Button, Buttons, ControllerState, GyroAxis, Trigger};
