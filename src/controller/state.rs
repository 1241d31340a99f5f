//! Normalized controller snapshot shared by every decoder family.
//!
//! A [`ControllerState`] is a plain `Copy` value. Decoders produce a fresh one
//! per accepted report and hand it to the mapping pipeline through a watch
//! channel, so nothing here owns resources.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Pressed buttons. Bit positions are internal and never leave the process.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct Buttons: u32 {
        const A = 1 << 0;
        const B = 1 << 1;
        const X = 1 << 2;
        const Y = 1 << 3;
        const LB = 1 << 4;
        const RB = 1 << 5;
        const LT = 1 << 6;
        const RT = 1 << 7;
        const BACK = 1 << 8;
        const START = 1 << 9;
        const C = 1 << 10;
        const LGRIP = 1 << 11;
        const RGRIP = 1 << 12;
        const LPAD = 1 << 13;
        const RPAD = 1 << 14;
        const LPADTOUCH = 1 << 15;
        const RPADTOUCH = 1 << 16;
        const STICKPRESS = 1 << 17;
        const RSTICKPRESS = 1 << 18;
        const CPADTOUCH = 1 << 19;
        const CPADPRESS = 1 << 20;
        const DPAD_UP = 1 << 21;
        const DPAD_DOWN = 1 << 22;
        const DPAD_LEFT = 1 << 23;
        const DPAD_RIGHT = 1 << 24;
    }
}

/// A single physical button, used by profiles and the control protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Button {
    A,
    B,
    X,
    Y,
    LB,
    RB,
    LT,
    RT,
    Back,
    Start,
    C,
    LGrip,
    RGrip,
    LPad,
    RPad,
    LPadTouch,
    RPadTouch,
    StickPress,
    RStickPress,
    CPadTouch,
    CPadPress,
    #[serde(rename = "DPAD_UP")]
    DpadUp,
    #[serde(rename = "DPAD_DOWN")]
    DpadDown,
    #[serde(rename = "DPAD_LEFT")]
    DpadLeft,
    #[serde(rename = "DPAD_RIGHT")]
    DpadRight,
}

impl Button {
    pub const ALL: [Button; 25] = [
        Button::A,
        Button::B,
        Button::X,
        Button::Y,
        Button::LB,
        Button::RB,
        Button::LT,
        Button::RT,
        Button::Back,
        Button::Start,
        Button::C,
        Button::LGrip,
        Button::RGrip,
        Button::LPad,
        Button::RPad,
        Button::LPadTouch,
        Button::RPadTouch,
        Button::StickPress,
        Button::RStickPress,
        Button::CPadTouch,
        Button::CPadPress,
        Button::DpadUp,
        Button::DpadDown,
        Button::DpadLeft,
        Button::DpadRight,
    ];

    // PlayStation face buttons share the Xbox positions
    pub const CROSS: Button = Button::A;
    pub const CIRCLE: Button = Button::B;
    pub const SQUARE: Button = Button::X;
    pub const TRIANGLE: Button = Button::Y;

    pub fn flag(self) -> Buttons {
        match self {
            Button::A => Buttons::A,
            Button::B => Buttons::B,
            Button::X => Buttons::X,
            Button::Y => Buttons::Y,
            Button::LB => Buttons::LB,
            Button::RB => Buttons::RB,
            Button::LT => Buttons::LT,
            Button::RT => Buttons::RT,
            Button::Back => Buttons::BACK,
            Button::Start => Buttons::START,
            Button::C => Buttons::C,
            Button::LGrip => Buttons::LGRIP,
            Button::RGrip => Buttons::RGRIP,
            Button::LPad => Buttons::LPAD,
            Button::RPad => Buttons::RPAD,
            Button::LPadTouch => Buttons::LPADTOUCH,
            Button::RPadTouch => Buttons::RPADTOUCH,
            Button::StickPress => Buttons::STICKPRESS,
            Button::RStickPress => Buttons::RSTICKPRESS,
            Button::CPadTouch => Buttons::CPADTOUCH,
            Button::CPadPress => Buttons::CPADPRESS,
            Button::DpadUp => Buttons::DPAD_UP,
            Button::DpadDown => Buttons::DPAD_DOWN,
            Button::DpadLeft => Buttons::DPAD_LEFT,
            Button::DpadRight => Buttons::DPAD_RIGHT,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Button::A => "A",
            Button::B => "B",
            Button::X => "X",
            Button::Y => "Y",
            Button::LB => "LB",
            Button::RB => "RB",
            Button::LT => "LT",
            Button::RT => "RT",
            Button::Back => "BACK",
            Button::Start => "START",
            Button::C => "C",
            Button::LGrip => "LGRIP",
            Button::RGrip => "RGRIP",
            Button::LPad => "LPAD",
            Button::RPad => "RPAD",
            Button::LPadTouch => "LPADTOUCH",
            Button::RPadTouch => "RPADTOUCH",
            Button::StickPress => "STICKPRESS",
            Button::RStickPress => "RSTICKPRESS",
            Button::CPadTouch => "CPADTOUCH",
            Button::CPadPress => "CPADPRESS",
            Button::DpadUp => "DPAD_UP",
            Button::DpadDown => "DPAD_DOWN",
            Button::DpadLeft => "DPAD_LEFT",
            Button::DpadRight => "DPAD_RIGHT",
        }
    }

    /// Case-insensitive lookup that also accepts PlayStation aliases.
    pub fn from_name(name: &str) -> Option<Button> {
        let upper = name.trim().to_ascii_uppercase();
        match upper.as_str() {
            "CROSS" => return Some(Button::CROSS),
            "CIRCLE" => return Some(Button::CIRCLE),
            "SQUARE" => return Some(Button::SQUARE),
            "TRIANGLE" => return Some(Button::TRIANGLE),
            "SELECT" | "SHARE" => return Some(Button::Back),
            "OPTIONS" => return Some(Button::Start),
            "PS" | "GUIDE" | "STEAM" => return Some(Button::C),
            "L1" => return Some(Button::LB),
            "R1" => return Some(Button::RB),
            "L3" => return Some(Button::StickPress),
            "R3" => return Some(Button::RStickPress),
            _ => {}
        }
        Button::ALL.into_iter().find(|b| b.name() == upper)
    }
}

/// Two-axis analog value. Positive y points up, positive x points right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Axis2 {
    pub x: i16,
    pub y: i16,
}

impl Axis2 {
    pub const CENTER: Axis2 = Axis2 { x: 0, y: 0 };

    pub fn new(x: i16, y: i16) -> Self {
        Self { x, y }
    }

    /// Normalized components in `-1.0..=1.0`.
    pub fn normalized(self) -> (f32, f32) {
        (normalize(self.x), normalize(self.y))
    }
}

/// Three-axis motion sample. For gyro data x is pitch, y is roll and z is yaw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

/// Analog inputs that carry an x/y pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AnalogInput {
    Stick,
    RStick,
    LPad,
    RPad,
    CPad,
}

impl AnalogInput {
    pub const ALL: [AnalogInput; 5] = [
        AnalogInput::Stick,
        AnalogInput::RStick,
        AnalogInput::LPad,
        AnalogInput::RPad,
        AnalogInput::CPad,
    ];

    pub fn name(self) -> &'static str {
        match self {
            AnalogInput::Stick => "STICK",
            AnalogInput::RStick => "RSTICK",
            AnalogInput::LPad => "LPAD",
            AnalogInput::RPad => "RPAD",
            AnalogInput::CPad => "CPAD",
        }
    }

    pub fn from_name(name: &str) -> Option<AnalogInput> {
        let upper = name.trim().to_ascii_uppercase();
        AnalogInput::ALL.into_iter().find(|a| a.name() == upper)
    }

    /// Touch surfaces report positions only while touched.
    pub fn is_pad(self) -> bool {
        matches!(self, AnalogInput::LPad | AnalogInput::RPad | AnalogInput::CPad)
    }

    /// Button that signals a touch on this pad, if the input is a pad.
    pub fn touch_button(self) -> Option<Button> {
        match self {
            AnalogInput::LPad => Some(Button::LPadTouch),
            AnalogInput::RPad => Some(Button::RPadTouch),
            AnalogInput::CPad => Some(Button::CPadTouch),
            AnalogInput::Stick | AnalogInput::RStick => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Trigger {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GyroAxis {
    Pitch,
    Roll,
    Yaw,
}

/// Normalized, device-independent snapshot of one controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ControllerState {
    pub seq: u32,
    pub buttons: Buttons,
    pub stick: Axis2,
    pub rstick: Axis2,
    pub lpad: Axis2,
    pub rpad: Axis2,
    pub cpad: Axis2,
    pub ltrig: u8,
    pub rtrig: u8,
    pub accel: Vector3,
    pub gyro: Vector3,
    pub battery: Option<u8>,
}

impl ControllerState {
    pub fn pressed(&self, button: Button) -> bool {
        self.buttons.contains(button.flag())
    }

    pub fn set_button(&mut self, button: Button, pressed: bool) {
        self.buttons.set(button.flag(), pressed);
    }

    pub fn analog(&self, input: AnalogInput) -> Axis2 {
        match input {
            AnalogInput::Stick => self.stick,
            AnalogInput::RStick => self.rstick,
            AnalogInput::LPad => self.lpad,
            AnalogInput::RPad => self.rpad,
            AnalogInput::CPad => self.cpad,
        }
    }

    /// Whether the analog input currently reports a meaningful position.
    pub fn analog_active(&self, input: AnalogInput) -> bool {
        match input.touch_button() {
            Some(touch) => self.pressed(touch),
            None => true,
        }
    }

    pub fn trigger(&self, trigger: Trigger) -> u8 {
        match trigger {
            Trigger::Left => self.ltrig,
            Trigger::Right => self.rtrig,
        }
    }

    pub fn gyro_axis(&self, axis: GyroAxis) -> i16 {
        match axis {
            GyroAxis::Pitch => self.gyro.x,
            GyroAxis::Roll => self.gyro.y,
            GyroAxis::Yaw => self.gyro.z,
        }
    }

    /// Buttons that differ between `self` and `previous`, each with its new state.
    pub fn button_changes(&self, previous: &ControllerState) -> Vec<(Button, bool)> {
        let changed = self.buttons ^ previous.buttons;
        if changed.is_empty() {
            return Vec::new();
        }
        Button::ALL
            .into_iter()
            .filter(|b| changed.contains(b.flag()))
            .map(|b| (b, self.pressed(b)))
            .collect()
    }
}

fn normalize(value: i16) -> f32 {
    if value < 0 {
        value as f32 / 32768.0
    } else {
        value as f32 / 32767.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn button_names_round_trip() {
        for button in Button::ALL {
            assert_eq!(Button::from_name(button.name()), Some(button));
        }
        assert_eq!(Button::from_name("cross"), Some(Button::A));
        assert_eq!(Button::from_name("Options"), Some(Button::Start));
        assert_eq!(Button::from_name("nope"), None);
    }

    #[test]
    fn every_button_has_a_distinct_flag() {
        let mut seen = Buttons::empty();
        for button in Button::ALL {
            assert!(!seen.intersects(button.flag()), "{button:?} overlaps");
            seen |= button.flag();
        }
    }

    #[test]
    fn button_changes_reports_edges_only() {
        let mut before = ControllerState::default();
        before.set_button(Button::A, true);
        before.set_button(Button::B, true);
        let mut after = before;
        after.set_button(Button::A, false);
        after.set_button(Button::X, true);

        let mut changes = after.button_changes(&before);
        changes.sort();
        assert_eq!(changes, vec![(Button::A, false), (Button::X, true)]);
    }

    #[test]
    fn pads_are_active_only_while_touched() {
        let mut state = ControllerState::default();
        assert!(state.analog_active(AnalogInput::Stick));
        assert!(!state.analog_active(AnalogInput::RPad));
        state.set_button(Button::RPadTouch, true);
        assert!(state.analog_active(AnalogInput::RPad));
    }
}
