//! Physical controller I/O.
//!
//! ```text
//!  udev ──► DeviceManager ──open──► DeviceSession (blocking thread per device)
//!               │                        │
//!            slots ◄──── link events ────┘
//!               │
//!               └──► SlotChange ──► mapping pipeline
//! ```

pub mod error;
pub mod hid;
pub mod hotplug;
pub mod manager;
pub mod session;
pub mod transport;

pub use error::{DeviceError, TransportError};
pub use manager::{DeviceFailure, DeviceInfo, DeviceManager, ManagerSettings, SlotChange};
pub use session::{ConnectionPhase, DisconnectReason, SessionSettings, SessionStatus};
pub use transport::{DeviceChannel, DeviceTransport, HotplugEvent, HotplugSource};
