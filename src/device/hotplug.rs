//! udev hidraw monitor.

use crate::device::error::DeviceError;
use crate::device::transport::{HotplugEvent, HotplugSource};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Default)]
pub struct UdevHotplug;

impl HotplugSource for UdevHotplug {
    fn watch(
        self: Box<Self>,
        events: mpsc::UnboundedSender<HotplugEvent>,
        cancel: CancellationToken,
    ) -> Result<(), DeviceError> {
        let socket = udev::MonitorBuilder::new()
            .and_then(|b| b.match_subsystem("hidraw"))
            .and_then(|b| b.listen())
            .map_err(|e| DeviceError::Transport(format!("udev monitor: {e}")))?;
        info!("Watching hidraw hotplug events");

        while !cancel.is_cancelled() {
            for event in socket.iter() {
                let Some(node) = event.devnode() else {
                    continue;
                };
                let path = node.to_string_lossy().into_owned();
                let notification = match event.event_type() {
                    udev::EventType::Add => HotplugEvent::Attached(path),
                    udev::EventType::Remove => HotplugEvent::Detached(path),
                    _ => continue,
                };
                debug!("Hotplug: {:?}", notification);
                if events.send(notification).is_err() {
                    return Ok(());
                }
            }
            std::thread::sleep(POLL_INTERVAL);
        }
        Ok(())
    }
}
