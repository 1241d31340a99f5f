//! DualShock 4 input reports.
//!
//! USB sends report `0x01` (64 bytes), Bluetooth sends report `0x11`
//! (78 bytes) with the same payload shifted two bytes to the right. Offsets
//! below are relative to the first payload byte, which is byte 1 over USB
//! and byte 3 over Bluetooth.
//!
//! A freshly paired Bluetooth pad only sends a basic `0x01` report (10
//! bytes, sticks, buttons and triggers) until feature report `0x02` is read
//! from it. The basic report is decoded as well so input works while the
//! switch is pending.
//!
//! | Offset | Type | Field |
//! |--------|------|-------|
//! | 0–3 | u8 ×4 | LX, LY, RX, RY (128 = center, y grows downward) |
//! | 4 | bits | hat (low nibble), square, cross, circle, triangle |
//! | 5 | bits | L1, R1, L2, R2, share, options, L3, R3 |
//! | 6 | bits | PS, touchpad click, 6-bit counter in bits 2..8 |
//! | 7, 8 | u8 | L2, R2 analog |
//! | 12–17 | i16 ×3 | gyro pitch, yaw, roll |
//! | 18–23 | i16 ×3 | accelerometer |
//! | 29 | u8 | battery level in the low nibble, 0..=10 |
//! | 34 | u8 | first touch, bit 7 clear while touching |
//! | 35–37 | u12 ×2 | first touch x (0..1920), y (0..943) |

use crate::controller::decoder::schema::{
    BatterySpec, ButtonBit, Field, FieldSpec, HatSpec, ReportSchema, Scale, SequenceSpec, TagSpec,
    Width,
};
use crate::controller::haptics::{HapticCommand, HapticRequest, HapticSide, OutputReport};
use crate::controller::state::Button;

pub const USB_REPORT_ID: u8 = 0x01;
pub const USB_REPORT_LEN: usize = 64;
pub const BT_REPORT_ID: u8 = 0x11;
pub const BT_REPORT_LEN: usize = 78;
pub const BT_BASIC_REPORT_ID: u8 = 0x01;
pub const BT_BASIC_REPORT_LEN: usize = 10;

/// Reading this feature report switches a Bluetooth pad to full reports.
pub const BT_MODE_FEATURE_ID: u8 = 0x02;
const BT_MODE_FEATURE_LEN: usize = 37;

const RUMBLE_REPORT_ID: u8 = 0x05;
const RUMBLE_REPORT_LEN: usize = 32;

const TOUCH_X: Scale = Scale::Linear {
    center: 960,
    factor: 16,
    invert: false,
};
const TOUCH_Y: Scale = Scale::Linear {
    center: 471,
    factor: 32,
    invert: true,
};

const BUTTON_BITS: &[(usize, u8, Button)] = &[
    (4, 4, Button::SQUARE),
    (4, 5, Button::CROSS),
    (4, 6, Button::CIRCLE),
    (4, 7, Button::TRIANGLE),
    (5, 0, Button::LB),
    (5, 1, Button::RB),
    (5, 2, Button::LT),
    (5, 3, Button::RT),
    (5, 4, Button::Back),
    (5, 5, Button::Start),
    (5, 6, Button::StickPress),
    (5, 7, Button::RStickPress),
    (6, 0, Button::C),
    (6, 1, Button::CPadPress),
];

fn layout(name: &str, report_id: u8, report_len: usize, data: usize) -> ReportSchema {
    let field = |field, offset: usize, width, scale| FieldSpec {
        field,
        offset: data + offset,
        width,
        scale,
    };

    let mut buttons: Vec<ButtonBit> = BUTTON_BITS
        .iter()
        .map(|&(offset, bit, button)| ButtonBit {
            offset: data + offset,
            bit,
            button,
            active_low: false,
        })
        .collect();
    buttons.push(ButtonBit {
        offset: data + 34,
        bit: 7,
        button: Button::CPadTouch,
        active_low: true,
    });

    ReportSchema {
        name: name.into(),
        report_len,
        tags: vec![TagSpec {
            offset: 0,
            value: report_id,
        }],
        fields: vec![
            field(Field::StickX, 0, Width::U8, Scale::CENTERED_U8),
            field(Field::StickY, 1, Width::U8, Scale::CENTERED_U8_INVERTED),
            field(Field::RStickX, 2, Width::U8, Scale::CENTERED_U8),
            field(Field::RStickY, 3, Width::U8, Scale::CENTERED_U8_INVERTED),
            field(Field::LTrig, 7, Width::U8, Scale::Raw),
            field(Field::RTrig, 8, Width::U8, Scale::Raw),
            field(Field::GyroPitch, 12, Width::I16, Scale::Raw),
            field(Field::GyroYaw, 14, Width::I16, Scale::Raw),
            field(Field::GyroRoll, 16, Width::I16, Scale::Raw),
            field(Field::AccelX, 18, Width::I16, Scale::Raw),
            field(Field::AccelY, 20, Width::I16, Scale::Raw),
            field(Field::AccelZ, 22, Width::I16, Scale::Raw),
            field(Field::CPadX, 35, Width::U12Low, TOUCH_X),
            field(Field::CPadY, 36, Width::U12High, TOUCH_Y),
        ],
        buttons,
        hat: Some(HatSpec {
            offset: data + 4,
            shift: 0,
        }),
        sequence: Some(SequenceSpec {
            offset: data + 6,
            width: Width::U8,
            shift: 2,
            bits: 6,
        }),
        battery: Some(BatterySpec {
            offset: data + 29,
            mask: 0x0F,
            full: 10,
        }),
    }
}

pub fn usb_schema() -> ReportSchema {
    layout("ds4-usb", USB_REPORT_ID, USB_REPORT_LEN, 1)
}

pub fn bluetooth_schema() -> ReportSchema {
    layout("ds4-bluetooth", BT_REPORT_ID, BT_REPORT_LEN, 3)
}

/// The USB layout cut down to what fits in the basic Bluetooth report.
pub fn bluetooth_basic_schema() -> ReportSchema {
    let mut schema = layout("ds4-bluetooth-basic", BT_BASIC_REPORT_ID, BT_BASIC_REPORT_LEN, 1);
    schema
        .fields
        .retain(|f| f.offset + f.width.bytes() <= BT_BASIC_REPORT_LEN);
    schema.buttons.retain(|b| b.offset < BT_BASIC_REPORT_LEN);
    schema.battery = None;
    schema
}

pub fn bluetooth_init_reports() -> Vec<OutputReport> {
    vec![OutputReport::GetFeature {
        id: BT_MODE_FEATURE_ID,
        len: BT_MODE_FEATURE_LEN,
    }]
}

fn rumble_report(weak: u8, strong: u8) -> OutputReport {
    let mut report = vec![0u8; RUMBLE_REPORT_LEN];
    report[0] = RUMBLE_REPORT_ID;
    report[1] = 0xFF;
    report[4] = weak;
    report[5] = strong;
    // Light bar
    report[8] = 0x40;
    OutputReport::Output(report)
}

/// The DS4 keeps rumbling until told otherwise, so every pulse train gets a
/// stop report scheduled after its duration.
pub fn haptic(request: &HapticRequest) -> HapticCommand {
    let level = (request.amplitude >> 8) as u8;
    let (weak, strong) = match request.side {
        HapticSide::Right => (level, 0),
        HapticSide::Left => (0, level),
        HapticSide::Both => (level, level),
    };
    HapticCommand {
        start: rumble_report(weak, strong),
        stop: Some((request.duration(), rumble_report(0, 0))),
    }
}
