//! Symbolic names for virtual input codes, as used in the action syntax.
//!
//! Names follow the kernel's `input-event-codes.h`. The class of a code
//! decides which virtual device carries it: `KEY_*` goes to the keyboard,
//! mouse buttons and `REL_*` to the mouse, gamepad buttons and `ABS_*` to
//! the gamepad.

use evdev::{AbsoluteAxisCode, KeyCode, RelativeAxisCode};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputClass {
    Gamepad,
    Mouse,
    Keyboard,
}

impl OutputClass {
    pub const ALL: [OutputClass; 3] = [OutputClass::Gamepad, OutputClass::Mouse, OutputClass::Keyboard];
}

impl fmt::Display for OutputClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputClass::Gamepad => "gamepad",
            OutputClass::Mouse => "mouse",
            OutputClass::Keyboard => "keyboard",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeKind {
    Key,
    Abs,
    Rel,
}

/// One virtual input target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct OutputCode {
    pub class: OutputClass,
    pub kind: CodeKind,
    pub code: u16,
}

impl OutputCode {
    pub const fn key(class: OutputClass, code: KeyCode) -> Self {
        Self {
            class,
            kind: CodeKind::Key,
            code: code.0,
        }
    }

    pub const fn abs(code: AbsoluteAxisCode) -> Self {
        Self {
            class: OutputClass::Gamepad,
            kind: CodeKind::Abs,
            code: code.0,
        }
    }

    pub const fn rel(code: RelativeAxisCode) -> Self {
        Self {
            class: OutputClass::Mouse,
            kind: CodeKind::Rel,
            code: code.0,
        }
    }

    /// Value range of an absolute axis.
    pub fn abs_range(self) -> (i32, i32) {
        abs_range(self.code)
    }
}

pub const STICK_MIN: i32 = -32768;
pub const STICK_MAX: i32 = 32767;
pub const TRIGGER_MAX: i32 = 255;

pub fn abs_range(code: u16) -> (i32, i32) {
    match AbsoluteAxisCode(code) {
        AbsoluteAxisCode::ABS_Z | AbsoluteAxisCode::ABS_RZ => (0, TRIGGER_MAX),
        AbsoluteAxisCode::ABS_HAT0X | AbsoluteAxisCode::ABS_HAT0Y => (-1, 1),
        _ => (STICK_MIN, STICK_MAX),
    }
}

/// Buttons the virtual gamepad advertises.
pub const GAMEPAD_BUTTONS: &[(&str, KeyCode)] = &[
    ("BTN_SOUTH", KeyCode::BTN_SOUTH),
    ("BTN_EAST", KeyCode::BTN_EAST),
    ("BTN_NORTH", KeyCode::BTN_NORTH),
    ("BTN_WEST", KeyCode::BTN_WEST),
    ("BTN_TL", KeyCode::BTN_TL),
    ("BTN_TR", KeyCode::BTN_TR),
    ("BTN_TL2", KeyCode::BTN_TL2),
    ("BTN_TR2", KeyCode::BTN_TR2),
    ("BTN_SELECT", KeyCode::BTN_SELECT),
    ("BTN_START", KeyCode::BTN_START),
    ("BTN_MODE", KeyCode::BTN_MODE),
    ("BTN_THUMBL", KeyCode::BTN_THUMBL),
    ("BTN_THUMBR", KeyCode::BTN_THUMBR),
    // Kernel aliases
    ("BTN_A", KeyCode::BTN_SOUTH),
    ("BTN_B", KeyCode::BTN_EAST),
    ("BTN_X", KeyCode::BTN_NORTH),
    ("BTN_Y", KeyCode::BTN_WEST),
];

pub const GAMEPAD_AXES: &[(&str, AbsoluteAxisCode)] = &[
    ("ABS_X", AbsoluteAxisCode::ABS_X),
    ("ABS_Y", AbsoluteAxisCode::ABS_Y),
    ("ABS_RX", AbsoluteAxisCode::ABS_RX),
    ("ABS_RY", AbsoluteAxisCode::ABS_RY),
    ("ABS_Z", AbsoluteAxisCode::ABS_Z),
    ("ABS_RZ", AbsoluteAxisCode::ABS_RZ),
    ("ABS_HAT0X", AbsoluteAxisCode::ABS_HAT0X),
    ("ABS_HAT0Y", AbsoluteAxisCode::ABS_HAT0Y),
];

pub const MOUSE_BUTTONS: &[(&str, KeyCode)] = &[
    ("BTN_LEFT", KeyCode::BTN_LEFT),
    ("BTN_RIGHT", KeyCode::BTN_RIGHT),
    ("BTN_MIDDLE", KeyCode::BTN_MIDDLE),
    ("BTN_SIDE", KeyCode::BTN_SIDE),
    ("BTN_EXTRA", KeyCode::BTN_EXTRA),
];

pub const MOUSE_AXES: &[(&str, RelativeAxisCode)] = &[
    ("REL_X", RelativeAxisCode::REL_X),
    ("REL_Y", RelativeAxisCode::REL_Y),
    ("REL_WHEEL", RelativeAxisCode::REL_WHEEL),
    ("REL_HWHEEL", RelativeAxisCode::REL_HWHEEL),
];

pub const KEYBOARD_KEYS: &[(&str, KeyCode)] = &[
    ("KEY_ESC", KeyCode::KEY_ESC),
    ("KEY_1", KeyCode::KEY_1),
    ("KEY_2", KeyCode::KEY_2),
    ("KEY_3", KeyCode::KEY_3),
    ("KEY_4", KeyCode::KEY_4),
    ("KEY_5", KeyCode::KEY_5),
    ("KEY_6", KeyCode::KEY_6),
    ("KEY_7", KeyCode::KEY_7),
    ("KEY_8", KeyCode::KEY_8),
    ("KEY_9", KeyCode::KEY_9),
    ("KEY_0", KeyCode::KEY_0),
    ("KEY_MINUS", KeyCode::KEY_MINUS),
    ("KEY_EQUAL", KeyCode::KEY_EQUAL),
    ("KEY_BACKSPACE", KeyCode::KEY_BACKSPACE),
    ("KEY_TAB", KeyCode::KEY_TAB),
    ("KEY_Q", KeyCode::KEY_Q),
    ("KEY_W", KeyCode::KEY_W),
    ("KEY_E", KeyCode::KEY_E),
    ("KEY_R", KeyCode::KEY_R),
    ("KEY_T", KeyCode::KEY_T),
    ("KEY_Y", KeyCode::KEY_Y),
    ("KEY_U", KeyCode::KEY_U),
    ("KEY_I", KeyCode::KEY_I),
    ("KEY_O", KeyCode::KEY_O),
    ("KEY_P", KeyCode::KEY_P),
    ("KEY_LEFTBRACE", KeyCode::KEY_LEFTBRACE),
    ("KEY_RIGHTBRACE", KeyCode::KEY_RIGHTBRACE),
    ("KEY_ENTER", KeyCode::KEY_ENTER),
    ("KEY_LEFTCTRL", KeyCode::KEY_LEFTCTRL),
    ("KEY_A", KeyCode::KEY_A),
    ("KEY_S", KeyCode::KEY_S),
    ("KEY_D", KeyCode::KEY_D),
    ("KEY_F", KeyCode::KEY_F),
    ("KEY_G", KeyCode::KEY_G),
    ("KEY_H", KeyCode::KEY_H),
    ("KEY_J", KeyCode::KEY_J),
    ("KEY_K", KeyCode::KEY_K),
    ("KEY_L", KeyCode::KEY_L),
    ("KEY_SEMICOLON", KeyCode::KEY_SEMICOLON),
    ("KEY_APOSTROPHE", KeyCode::KEY_APOSTROPHE),
    ("KEY_GRAVE", KeyCode::KEY_GRAVE),
    ("KEY_LEFTSHIFT", KeyCode::KEY_LEFTSHIFT),
    ("KEY_BACKSLASH", KeyCode::KEY_BACKSLASH),
    ("KEY_Z", KeyCode::KEY_Z),
    ("KEY_X", KeyCode::KEY_X),
    ("KEY_C", KeyCode::KEY_C),
    ("KEY_V", KeyCode::KEY_V),
    ("KEY_B", KeyCode::KEY_B),
    ("KEY_N", KeyCode::KEY_N),
    ("KEY_M", KeyCode::KEY_M),
    ("KEY_COMMA", KeyCode::KEY_COMMA),
    ("KEY_DOT", KeyCode::KEY_DOT),
    ("KEY_SLASH", KeyCode::KEY_SLASH),
    ("KEY_RIGHTSHIFT", KeyCode::KEY_RIGHTSHIFT),
    ("KEY_LEFTALT", KeyCode::KEY_LEFTALT),
    ("KEY_SPACE", KeyCode::KEY_SPACE),
    ("KEY_CAPSLOCK", KeyCode::KEY_CAPSLOCK),
    ("KEY_F1", KeyCode::KEY_F1),
    ("KEY_F2", KeyCode::KEY_F2),
    ("KEY_F3", KeyCode::KEY_F3),
    ("KEY_F4", KeyCode::KEY_F4),
    ("KEY_F5", KeyCode::KEY_F5),
    ("KEY_F6", KeyCode::KEY_F6),
    ("KEY_F7", KeyCode::KEY_F7),
    ("KEY_F8", KeyCode::KEY_F8),
    ("KEY_F9", KeyCode::KEY_F9),
    ("KEY_F10", KeyCode::KEY_F10),
    ("KEY_F11", KeyCode::KEY_F11),
    ("KEY_F12", KeyCode::KEY_F12),
    ("KEY_RIGHTCTRL", KeyCode::KEY_RIGHTCTRL),
    ("KEY_RIGHTALT", KeyCode::KEY_RIGHTALT),
    ("KEY_HOME", KeyCode::KEY_HOME),
    ("KEY_UP", KeyCode::KEY_UP),
    ("KEY_PAGEUP", KeyCode::KEY_PAGEUP),
    ("KEY_LEFT", KeyCode::KEY_LEFT),
    ("KEY_RIGHT", KeyCode::KEY_RIGHT),
    ("KEY_END", KeyCode::KEY_END),
    ("KEY_DOWN", KeyCode::KEY_DOWN),
    ("KEY_PAGEDOWN", KeyCode::KEY_PAGEDOWN),
    ("KEY_INSERT", KeyCode::KEY_INSERT),
    ("KEY_DELETE", KeyCode::KEY_DELETE),
    ("KEY_MUTE", KeyCode::KEY_MUTE),
    ("KEY_VOLUMEDOWN", KeyCode::KEY_VOLUMEDOWN),
    ("KEY_VOLUMEUP", KeyCode::KEY_VOLUMEUP),
    ("KEY_LEFTMETA", KeyCode::KEY_LEFTMETA),
    ("KEY_RIGHTMETA", KeyCode::KEY_RIGHTMETA),
    ("KEY_NEXTSONG", KeyCode::KEY_NEXTSONG),
    ("KEY_PLAYPAUSE", KeyCode::KEY_PLAYPAUSE),
    ("KEY_PREVIOUSSONG", KeyCode::KEY_PREVIOUSSONG),
];

fn find<T: Copy>(table: &[(&str, T)], name: &str) -> Option<T> {
    table
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, code)| *code)
}

/// Resolve a symbolic code name.
pub fn lookup(name: &str) -> Option<OutputCode> {
    let name = name.trim();
    if let Some(code) = find(KEYBOARD_KEYS, name) {
        return Some(OutputCode::key(OutputClass::Keyboard, code));
    }
    if let Some(code) = find(MOUSE_BUTTONS, name) {
        return Some(OutputCode::key(OutputClass::Mouse, code));
    }
    if let Some(code) = find(GAMEPAD_BUTTONS, name) {
        return Some(OutputCode::key(OutputClass::Gamepad, code));
    }
    if let Some(code) = find(GAMEPAD_AXES, name) {
        return Some(OutputCode::abs(code));
    }
    find(MOUSE_AXES, name).map(OutputCode::rel)
}

/// Display name of a code, for logs and diagnostics.
pub fn name_of(code: OutputCode) -> &'static str {
    let hit = match code.kind {
        CodeKind::Key => {
            let table = match code.class {
                OutputClass::Keyboard => KEYBOARD_KEYS,
                OutputClass::Mouse => MOUSE_BUTTONS,
                OutputClass::Gamepad => GAMEPAD_BUTTONS,
            };
            table.iter().find(|(_, k)| k.0 == code.code).map(|(n, _)| *n)
        }
        CodeKind::Abs => GAMEPAD_AXES.iter().find(|(_, a)| a.0 == code.code).map(|(n, _)| *n),
        CodeKind::Rel => MOUSE_AXES.iter().find(|(_, r)| r.0 == code.code).map(|(n, _)| *n),
    };
    hit.unwrap_or("UNKNOWN")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_resolve_to_their_device_class() {
        let a = lookup("KEY_A").expect("keyboard key");
        assert_eq!(a.class, OutputClass::Keyboard);
        assert_eq!(a.code, KeyCode::KEY_A.0);

        let south = lookup("btn_south").expect("gamepad button");
        assert_eq!(south.class, OutputClass::Gamepad);
        assert_eq!(lookup("BTN_A"), Some(south));

        assert_eq!(lookup("BTN_LEFT").map(|c| c.class), Some(OutputClass::Mouse));
        assert_eq!(lookup("REL_WHEEL").map(|c| c.kind), Some(CodeKind::Rel));
        assert_eq!(lookup("ABS_HAT0X").map(|c| c.abs_range()), Some((-1, 1)));
        assert_eq!(lookup("KEY_DOES_NOT_EXIST"), None);
    }

    #[test]
    fn trigger_axes_are_unipolar() {
        assert_eq!(abs_range(AbsoluteAxisCode::ABS_Z.0), (0, 255));
        assert_eq!(abs_range(AbsoluteAxisCode::ABS_RX.0), (STICK_MIN, STICK_MAX));
    }

    #[test]
    fn display_names_round_trip() {
        for name in ["KEY_SPACE", "BTN_SOUTH", "ABS_RY", "REL_X", "BTN_MIDDLE"] {
            let code = lookup(name).expect("known code");
            assert_eq!(name_of(code), name);
        }
    }
}
