//! Virtual devices through the kernel's uinput interface.

use crate::output::codes::{
    abs_range, CodeKind, OutputClass, GAMEPAD_AXES, GAMEPAD_BUTTONS, KEYBOARD_KEYS, MOUSE_AXES, MOUSE_BUTTONS,
};
use crate::output::device::{OutputError, OutputEvent, OutputSettings, VirtualDeviceFactory, VirtualOutput};
use evdev::uinput::VirtualDevice;
use evdev::{
    AbsInfo, AttributeSet, BusType, EventType, InputEvent, InputId, KeyCode, RelativeAxisCode, UinputAbsSetup,
};
use std::io;
use std::path::Path;
use tracing::{debug, info};

const UINPUT_NODE: &str = "/dev/uinput";

const STICK_FUZZ: i32 = 16;
const STICK_FLAT: i32 = 128;

fn backend(class: OutputClass, e: io::Error) -> OutputError {
    match e.kind() {
        io::ErrorKind::PermissionDenied | io::ErrorKind::NotFound => {
            OutputError::OutputUnavailable(class, e.to_string())
        }
        _ => OutputError::Backend(format!("{class}: {e}")),
    }
}

pub struct UinputDevice {
    class: OutputClass,
    device: VirtualDevice,
}

impl VirtualOutput for UinputDevice {
    fn emit(&mut self, events: &[OutputEvent]) -> Result<(), OutputError> {
        let events: Vec<InputEvent> = events
            .iter()
            .map(|e| {
                let kind = match e.kind {
                    CodeKind::Key => EventType::KEY,
                    CodeKind::Abs => EventType::ABSOLUTE,
                    CodeKind::Rel => EventType::RELATIVE,
                };
                InputEvent::new(kind.0, e.code, e.value)
            })
            .collect();
        // emit() hängt den SYN_REPORT selbst an
        self.device
            .emit(&events)
            .map_err(|e| OutputError::OutputUnavailable(self.class, e.to_string()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct UinputFactory {
    settings: OutputSettings,
}

impl UinputFactory {
    pub fn new(settings: OutputSettings) -> Self {
        Self { settings }
    }

    fn keys(table: &[(&str, KeyCode)]) -> AttributeSet<KeyCode> {
        let mut keys = AttributeSet::<KeyCode>::new();
        for (_, key) in table {
            keys.insert(*key);
        }
        keys
    }

    fn build(&self, class: OutputClass, slot: u8) -> io::Result<VirtualDevice> {
        let name = self.settings.device_name(class, slot);
        let input_id = InputId::new(
            BusType::BUS_USB,
            self.settings.vendor,
            self.settings.product,
            self.settings.version,
        );
        let builder = VirtualDevice::builder()?.name(&name).input_id(input_id);

        match class {
            OutputClass::Gamepad => {
                let mut builder = builder.with_keys(&Self::keys(GAMEPAD_BUTTONS))?;
                for (_, axis) in GAMEPAD_AXES {
                    let (min, max) = abs_range(axis.0);
                    let info = if min == -32768 {
                        AbsInfo::new(0, min, max, STICK_FUZZ, STICK_FLAT, 0)
                    } else {
                        AbsInfo::new(0, min, max, 0, 0, 0)
                    };
                    builder = builder.with_absolute_axis(&UinputAbsSetup::new(*axis, info))?;
                }
                builder.build()
            }
            OutputClass::Mouse => {
                let mut axes = AttributeSet::<RelativeAxisCode>::new();
                for (_, axis) in MOUSE_AXES {
                    axes.insert(*axis);
                }
                builder
                    .with_keys(&Self::keys(MOUSE_BUTTONS))?
                    .with_relative_axes(&axes)?
                    .build()
            }
            OutputClass::Keyboard => builder.with_keys(&Self::keys(KEYBOARD_KEYS))?.build(),
        }
    }
}

impl VirtualDeviceFactory for UinputFactory {
    fn probe(&self) -> Result<(), OutputError> {
        let node = Path::new(UINPUT_NODE);
        if !node.exists() {
            return Err(OutputError::Backend(format!(
                "{UINPUT_NODE} missing, is the uinput module loaded?"
            )));
        }
        std::fs::OpenOptions::new()
            .write(true)
            .open(node)
            .map(|_| ())
            .map_err(|e| OutputError::Backend(format!("cannot open {UINPUT_NODE}: {e}")))
    }

    fn create(&self, class: OutputClass, slot: u8) -> Result<Box<dyn VirtualOutput>, OutputError> {
        debug!("Creating virtual {} for slot {}", class, slot);
        let device = self.build(class, slot).map_err(|e| backend(class, e))?;
        info!("Virtual {} for slot {} created", class, slot);
        Ok(Box::new(UinputDevice { class, device }))
    }
}
