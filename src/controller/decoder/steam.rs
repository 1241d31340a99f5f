//! Steam Controller input reports, shared by the wired controller and the
//! wireless dongle.
//!
//! Every report is 64 bytes. Byte 2 carries the packet type:
//!
//! | Type | Meaning |
//! |------|---------|
//! | 0x01 | input state |
//! | 0x03 | wireless link status (byte 4: 0x01 lost, 0x02 up, 0x03 pairing) |
//! | 0x04 | battery status (u16 millivolts at 12..14) |
//! | else | idle / keep-alive |
//!
//! Input layout:
//!
//! | Offset | Type | Field |
//! |--------|------|-------|
//! | 0 | u8 | report id `0x01` |
//! | 1 | u8 | `0x00` |
//! | 2 | u8 | packet type `0x01` |
//! | 3 | u8 | payload length `0x3C` |
//! | 4–7 | u32 | sequence |
//! | 8–10 | bits | buttons |
//! | 11 | u8 | left trigger |
//! | 12 | u8 | right trigger |
//! | 16–19 | i16 ×2 | stick, or left pad while LPADTOUCH is set |
//! | 20–23 | i16 ×2 | right pad |
//! | 28–33 | i16 ×3 | accelerometer |
//! | 34–39 | i16 ×3 | gyro pitch, roll, yaw |

use crate::controller::decoder::schema::{
    ButtonBit, Field, FieldSpec, ReportSchema, Scale, SequenceSpec, TagSpec, Width,
};
use crate::controller::decoder::{LinkStatus, MalformedReport};
use crate::controller::haptics::{HapticCommand, HapticRequest, HapticSide, OutputReport};
use crate::controller::state::{Axis2, Button, ControllerState};

pub const REPORT_LEN: usize = 64;
pub const REPORT_ID: u8 = 0x01;
pub const PAYLOAD_LEN: u8 = 0x3C;

pub const PACKET_INPUT: u8 = 0x01;
pub const PACKET_STATUS: u8 = 0x03;
pub const PACKET_BATTERY: u8 = 0x04;

const STATUS_LINK_LOST: u8 = 0x01;
const STATUS_LINK_UP: u8 = 0x02;

// Two AA cells
const BATTERY_EMPTY_MV: u32 = 2000;
const BATTERY_FULL_MV: u32 = 3000;

const FEATURE_LEN: usize = 65;
const CMD_CLEAR_MAPPINGS: u8 = 0x81;
const CMD_CONFIGURE: u8 = 0x87;
const CMD_FEEDBACK: u8 = 0x8F;

/// (byte, bit, button) in the three button bytes.
pub(crate) const BUTTON_BITS: &[(usize, u8, Button)] = &[
    (8, 0, Button::RT),
    (8, 1, Button::LT),
    (8, 2, Button::RB),
    (8, 3, Button::LB),
    (8, 4, Button::Y),
    (8, 5, Button::B),
    (8, 6, Button::X),
    (8, 7, Button::A),
    // Left pad click quadrants
    (9, 0, Button::DpadUp),
    (9, 1, Button::DpadRight),
    (9, 2, Button::DpadLeft),
    (9, 3, Button::DpadDown),
    (9, 4, Button::Back),
    (9, 5, Button::C),
    (9, 6, Button::Start),
    (9, 7, Button::LGrip),
    (10, 0, Button::RGrip),
    (10, 1, Button::LPad),
    (10, 2, Button::RPad),
    (10, 3, Button::LPadTouch),
    (10, 4, Button::RPadTouch),
    (10, 6, Button::StickPress),
];

const FIELDS: &[(Field, usize, Width)] = &[
    (Field::LTrig, 11, Width::U8),
    (Field::RTrig, 12, Width::U8),
    (Field::StickX, 16, Width::I16),
    (Field::StickY, 18, Width::I16),
    (Field::RPadX, 20, Width::I16),
    (Field::RPadY, 22, Width::I16),
    (Field::AccelX, 28, Width::I16),
    (Field::AccelY, 30, Width::I16),
    (Field::AccelZ, 32, Width::I16),
    (Field::GyroPitch, 34, Width::I16),
    (Field::GyroRoll, 36, Width::I16),
    (Field::GyroYaw, 38, Width::I16),
];

pub fn schema() -> ReportSchema {
    ReportSchema {
        name: "steam".into(),
        report_len: REPORT_LEN,
        tags: vec![
            TagSpec { offset: 0, value: REPORT_ID },
            TagSpec { offset: 1, value: 0x00 },
            TagSpec { offset: 2, value: PACKET_INPUT },
            TagSpec { offset: 3, value: PAYLOAD_LEN },
        ],
        fields: FIELDS
            .iter()
            .map(|&(field, offset, width)| FieldSpec {
                field,
                offset,
                width,
                scale: Scale::Raw,
            })
            .collect(),
        buttons: BUTTON_BITS
            .iter()
            .map(|&(offset, bit, button)| ButtonBit {
                offset,
                bit,
                button,
                active_low: false,
            })
            .collect(),
        hat: None,
        sequence: Some(SequenceSpec {
            offset: 4,
            width: Width::U32,
            shift: 0,
            bits: 32,
        }),
        battery: None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SteamPacket {
    Input,
    Link(LinkStatus),
    Battery(u8),
    Idle,
}

pub fn classify(buf: &[u8]) -> Result<SteamPacket, MalformedReport> {
    if buf.len() != REPORT_LEN {
        return Err(MalformedReport::Length {
            expected: REPORT_LEN,
            got: buf.len(),
        });
    }
    if buf[0] != REPORT_ID {
        return Err(MalformedReport::Tag {
            offset: 0,
            expected: REPORT_ID,
            got: buf[0],
        });
    }

    Ok(match buf[2] {
        PACKET_INPUT => SteamPacket::Input,
        PACKET_STATUS => match buf[4] {
            STATUS_LINK_LOST => SteamPacket::Link(LinkStatus::Disconnected),
            STATUS_LINK_UP => SteamPacket::Link(LinkStatus::Connected),
            _ => SteamPacket::Idle,
        },
        PACKET_BATTERY => {
            let millivolts = u16::from_le_bytes([buf[12], buf[13]]) as u32;
            let span = BATTERY_FULL_MV - BATTERY_EMPTY_MV;
            let level = millivolts.clamp(BATTERY_EMPTY_MV, BATTERY_FULL_MV) - BATTERY_EMPTY_MV;
            SteamPacket::Battery((level * 100 / span) as u8)
        }
        _ => SteamPacket::Idle,
    })
}

/// The stick and the left pad share bytes 16..20; LPADTOUCH says which one.
pub fn split_left_pad(state: &mut ControllerState) {
    if state.pressed(Button::LPadTouch) {
        state.lpad = state.stick;
        state.stick = Axis2::CENTER;
    }
}

pub fn merge_left_pad(state: &ControllerState) -> ControllerState {
    let mut merged = *state;
    if state.pressed(Button::LPadTouch) {
        merged.stick = state.lpad;
    }
    merged
}

fn feature(payload: &[u8]) -> OutputReport {
    let mut report = vec![0u8; FEATURE_LEN];
    report[1..1 + payload.len()].copy_from_slice(payload);
    OutputReport::Feature(report)
}

/// Turn off the built-in keyboard and mouse emulation.
pub fn init_reports() -> Vec<OutputReport> {
    vec![
        feature(&[CMD_CLEAR_MAPPINGS]),
        feature(&[CMD_CONFIGURE, 0x03, 0x08, 0x07]),
    ]
}

pub fn haptic(request: &HapticRequest) -> HapticCommand {
    let position = match request.side {
        HapticSide::Right => 0x00,
        HapticSide::Left => 0x01,
        HapticSide::Both => 0x02,
    };
    let mut payload = vec![CMD_FEEDBACK, 0x07, position];
    payload.extend_from_slice(&request.amplitude.to_le_bytes());
    payload.extend_from_slice(&request.period.to_le_bytes());
    payload.extend_from_slice(&request.count.to_le_bytes());
    HapticCommand {
        start: feature(&payload),
        stop: None,
    }
}
