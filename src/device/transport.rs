//! Seams between the daemon and the operating system's HID stack.
//!
//! The manager and sessions only ever talk to these traits; `hid` and
//! `hotplug` hold the Linux implementations, tests supply in-memory fakes.

use crate::controller::descriptor::{ControllerDescriptor, DeviceCandidate, DeviceFilter};
use crate::controller::haptics::OutputReport;
use crate::device::error::{DeviceError, TransportError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// An open, exclusively owned device channel.
pub trait DeviceChannel: Send {
    /// Read one report. Returns `Ok(0)` when `timeout` elapsed without data.
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError>;

    fn send(&mut self, report: &OutputReport) -> Result<(), TransportError>;
}

pub trait DeviceTransport: Send + Sync {
    /// List attached interfaces matching any of `filters`.
    fn enumerate(&self, filters: &[DeviceFilter]) -> Result<Vec<DeviceCandidate>, DeviceError>;

    fn open(&self, descriptor: &ControllerDescriptor) -> Result<Box<dyn DeviceChannel>, DeviceError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotplugEvent {
    Attached(String),
    Detached(String),
}

/// Blocking watcher for device add/remove notifications.
pub trait HotplugSource: Send {
    /// Run until `cancel` fires or the receiver is dropped.
    fn watch(
        self: Box<Self>,
        events: mpsc::UnboundedSender<HotplugEvent>,
        cancel: CancellationToken,
    ) -> Result<(), DeviceError>;
}
