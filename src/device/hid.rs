//! `hidapi` backed transport.

use crate::controller::descriptor::{BusType, ControllerDescriptor, DeviceCandidate, DeviceFilter};
use crate::controller::haptics::OutputReport;
use crate::device::error::{DeviceError, TransportError};
use crate::device::transport::{DeviceChannel, DeviceTransport};
use hidapi::{HidApi, HidDevice};
use parking_lot::Mutex;
use std::ffi::CString;
use std::io::ErrorKind;
use std::time::Duration;
use tracing::{debug, info};

pub struct HidTransport {
    api: Mutex<HidApi>,
}

impl HidTransport {
    pub fn new() -> Result<Self, DeviceError> {
        let api = HidApi::new().map_err(|e| DeviceError::Transport(e.to_string()))?;
        info!("HID API initialized");
        Ok(Self {
            api: Mutex::new(api),
        })
    }
}

fn bus_type(bus: hidapi::BusType) -> BusType {
    match bus {
        hidapi::BusType::Usb => BusType::Usb,
        hidapi::BusType::Bluetooth => BusType::Bluetooth,
        _ => BusType::Unknown,
    }
}

/// hidapi folds every open failure into one string, so probe the node first
/// to tell permission problems from vanished devices.
fn check_access(path: &str) -> Result<(), DeviceError> {
    match std::fs::OpenOptions::new().read(true).write(true).open(path) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {
            Err(DeviceError::PermissionDenied(path.to_string()))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Err(DeviceError::NotFound(path.to_string())),
        Err(e) => Err(DeviceError::Transport(format!("{path}: {e}"))),
    }
}

impl DeviceTransport for HidTransport {
    fn enumerate(&self, filters: &[DeviceFilter]) -> Result<Vec<DeviceCandidate>, DeviceError> {
        let mut api = self.api.lock();
        api.refresh_devices()
            .map_err(|e| DeviceError::Transport(e.to_string()))?;

        let candidates: Vec<DeviceCandidate> = api
            .device_list()
            .filter(|info| {
                filters
                    .iter()
                    .any(|f| f.vendor_id == info.vendor_id() && f.product_id == info.product_id())
            })
            .map(|info| DeviceCandidate {
                vendor_id: info.vendor_id(),
                product_id: info.product_id(),
                interface: info.interface_number(),
                bus: bus_type(info.bus_type()),
                path: info.path().to_string_lossy().into_owned(),
                serial: info.serial_number().map(str::to_owned),
                product: info.product_string().map(str::to_owned),
            })
            .collect();
        debug!("Enumerated {} matching HID interfaces", candidates.len());
        Ok(candidates)
    }

    fn open(&self, descriptor: &ControllerDescriptor) -> Result<Box<dyn DeviceChannel>, DeviceError> {
        check_access(&descriptor.path)?;
        let path = CString::new(descriptor.path.clone())
            .map_err(|_| DeviceError::NotFound(descriptor.path.clone()))?;
        let device = self
            .api
            .lock()
            .open_path(&path)
            .map_err(|e| DeviceError::Transport(format!("{}: {e}", descriptor.path)))?;
        info!("Opened {} at {}", descriptor.name, descriptor.path);
        Ok(Box::new(HidChannel {
            device,
            path: descriptor.path.clone(),
        }))
    }
}

pub struct HidChannel {
    device: HidDevice,
    path: String,
}

impl DeviceChannel for HidChannel {
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        let millis = timeout.as_millis().min(i32::MAX as u128) as i32;
        self.device
            .read_timeout(buf, millis)
            .map_err(|e| TransportError::Disconnected(format!("{}: {e}", self.path)))
    }

    fn send(&mut self, report: &OutputReport) -> Result<(), TransportError> {
        match report {
            OutputReport::Feature(data) => self.device.send_feature_report(data),
            OutputReport::Output(data) => self.device.write(data).map(|_| ()),
            OutputReport::GetFeature { id, len } => {
                let mut buf = vec![0u8; (*len).max(1)];
                buf[0] = *id;
                self.device.get_feature_report(&mut buf).map(|_| ())
            }
        }
        .map_err(|e| TransportError::Io(format!("{}: {e}", self.path)))
    }
}
