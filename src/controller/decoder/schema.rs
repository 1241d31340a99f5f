//! Declarative report layouts.
//!
//! Every decoder family is a [`ReportSchema`]: a list of byte offsets, widths
//! and scaling rules for the fields it carries. Built-in families define their
//! schema in code, generic HID devices load theirs from the config file. The
//! same table drives decoding and the fixture encoder used by tests.

use crate::controller::decoder::MalformedReport;
use crate::controller::state::{Button, ControllerState};
use serde::{Deserialize, Serialize};

/// A scalar slot of [`ControllerState`] that a report can fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    StickX,
    StickY,
    RStickX,
    RStickY,
    LPadX,
    LPadY,
    RPadX,
    RPadY,
    CPadX,
    CPadY,
    LTrig,
    RTrig,
    AccelX,
    AccelY,
    AccelZ,
    GyroPitch,
    GyroRoll,
    GyroYaw,
}

impl Field {
    pub const ALL: [Field; 18] = [
        Field::StickX,
        Field::StickY,
        Field::RStickX,
        Field::RStickY,
        Field::LPadX,
        Field::LPadY,
        Field::RPadX,
        Field::RPadY,
        Field::CPadX,
        Field::CPadY,
        Field::LTrig,
        Field::RTrig,
        Field::AccelX,
        Field::AccelY,
        Field::AccelZ,
        Field::GyroPitch,
        Field::GyroRoll,
        Field::GyroYaw,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Field::StickX => "STICK_X",
            Field::StickY => "STICK_Y",
            Field::RStickX => "RSTICK_X",
            Field::RStickY => "RSTICK_Y",
            Field::LPadX => "LPAD_X",
            Field::LPadY => "LPAD_Y",
            Field::RPadX => "RPAD_X",
            Field::RPadY => "RPAD_Y",
            Field::CPadX => "CPAD_X",
            Field::CPadY => "CPAD_Y",
            Field::LTrig => "LTRIG",
            Field::RTrig => "RTRIG",
            Field::AccelX => "ACCEL_X",
            Field::AccelY => "ACCEL_Y",
            Field::AccelZ => "ACCEL_Z",
            Field::GyroPitch => "GYRO_PITCH",
            Field::GyroRoll => "GYRO_ROLL",
            Field::GyroYaw => "GYRO_YAW",
        }
    }

    pub fn from_name(name: &str) -> Option<Field> {
        let name = name.trim();
        Field::ALL.into_iter().find(|f| f.name().eq_ignore_ascii_case(name))
    }

    fn range(self) -> (i32, i32) {
        match self {
            Field::LTrig | Field::RTrig => (0, u8::MAX as i32),
            _ => (i16::MIN as i32, i16::MAX as i32),
        }
    }

    pub fn get(self, state: &ControllerState) -> i32 {
        let value = match self {
            Field::StickX => state.stick.x,
            Field::StickY => state.stick.y,
            Field::RStickX => state.rstick.x,
            Field::RStickY => state.rstick.y,
            Field::LPadX => state.lpad.x,
            Field::LPadY => state.lpad.y,
            Field::RPadX => state.rpad.x,
            Field::RPadY => state.rpad.y,
            Field::CPadX => state.cpad.x,
            Field::CPadY => state.cpad.y,
            Field::LTrig => return state.ltrig as i32,
            Field::RTrig => return state.rtrig as i32,
            Field::AccelX => state.accel.x,
            Field::AccelY => state.accel.y,
            Field::AccelZ => state.accel.z,
            Field::GyroPitch => state.gyro.x,
            Field::GyroRoll => state.gyro.y,
            Field::GyroYaw => state.gyro.z,
        };
        value as i32
    }

    /// Store `value`, clamped to the slot's range.
    pub fn set(self, state: &mut ControllerState, value: i32) {
        let (lo, hi) = self.range();
        let value = value.clamp(lo, hi);
        let wide = value as i16;
        match self {
            Field::StickX => state.stick.x = wide,
            Field::StickY => state.stick.y = wide,
            Field::RStickX => state.rstick.x = wide,
            Field::RStickY => state.rstick.y = wide,
            Field::LPadX => state.lpad.x = wide,
            Field::LPadY => state.lpad.y = wide,
            Field::RPadX => state.rpad.x = wide,
            Field::RPadY => state.rpad.y = wide,
            Field::CPadX => state.cpad.x = wide,
            Field::CPadY => state.cpad.y = wide,
            Field::LTrig => state.ltrig = value as u8,
            Field::RTrig => state.rtrig = value as u8,
            Field::AccelX => state.accel.x = wide,
            Field::AccelY => state.accel.y = wide,
            Field::AccelZ => state.accel.z = wide,
            Field::GyroPitch => state.gyro.x = wide,
            Field::GyroRoll => state.gyro.y = wide,
            Field::GyroYaw => state.gyro.z = wide,
        }
    }
}

/// Storage width of a raw field. Multi-byte widths are little-endian.
///
/// `U12Low` and `U12High` are the two halves of a packed 12+12 bit pair:
/// low takes byte `o` and the low nibble of `o + 1`, high takes the high
/// nibble of `o` and byte `o + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Width {
    U8,
    I8,
    U16,
    I16,
    U32,
    U12Low,
    U12High,
}

impl Width {
    pub fn bytes(self) -> usize {
        match self {
            Width::U8 | Width::I8 => 1,
            Width::U16 | Width::I16 | Width::U12Low | Width::U12High => 2,
            Width::U32 => 4,
        }
    }

    fn span(self, offset: usize) -> Result<std::ops::Range<usize>, MalformedReport> {
        let end = offset
            .checked_add(self.bytes())
            .ok_or(MalformedReport::OutOfBounds { offset })?;
        Ok(offset..end)
    }

    pub fn read(self, buf: &[u8], offset: usize) -> Result<i64, MalformedReport> {
        let bytes = buf
            .get(self.span(offset)?)
            .ok_or(MalformedReport::OutOfBounds { offset })?;
        Ok(match self {
            Width::U8 => bytes[0] as i64,
            Width::I8 => bytes[0] as i8 as i64,
            Width::U16 => u16::from_le_bytes([bytes[0], bytes[1]]) as i64,
            Width::I16 => i16::from_le_bytes([bytes[0], bytes[1]]) as i64,
            Width::U32 => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64,
            Width::U12Low => (bytes[0] as i64) | (((bytes[1] & 0x0F) as i64) << 8),
            Width::U12High => ((bytes[0] >> 4) as i64) | ((bytes[1] as i64) << 4),
        })
    }

    pub fn write(self, buf: &mut [u8], offset: usize, value: i64) -> Result<(), MalformedReport> {
        let bytes = buf
            .get_mut(self.span(offset)?)
            .ok_or(MalformedReport::OutOfBounds { offset })?;
        match self {
            Width::U8 | Width::I8 => bytes[0] = value as u8,
            Width::U16 | Width::I16 => bytes.copy_from_slice(&(value as u16).to_le_bytes()),
            Width::U32 => bytes.copy_from_slice(&(value as u32).to_le_bytes()),
            Width::U12Low => {
                bytes[0] = (value & 0xFF) as u8;
                bytes[1] = (bytes[1] & 0xF0) | ((value >> 8) & 0x0F) as u8;
            }
            Width::U12High => {
                bytes[0] = (bytes[0] & 0x0F) | (((value & 0x0F) as u8) << 4);
                bytes[1] = ((value >> 4) & 0xFF) as u8;
            }
        }
        Ok(())
    }
}

/// Mapping from raw storage value to normalized value.
///
/// `Linear` computes `(raw - center) * factor`, negated when `invert` is set,
/// then clamps to the field's range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Scale {
    #[default]
    Raw,
    Linear {
        center: i32,
        factor: i32,
        #[serde(default)]
        invert: bool,
    },
}

impl Scale {
    /// 8-bit axis centered on 128, spread over the full i16 range.
    pub const CENTERED_U8: Scale = Scale::Linear {
        center: 128,
        factor: 256,
        invert: false,
    };
    pub const CENTERED_U8_INVERTED: Scale = Scale::Linear {
        center: 128,
        factor: 256,
        invert: true,
    };

    fn apply(self, raw: i64) -> i32 {
        match self {
            Scale::Raw => raw.clamp(i32::MIN as i64, i32::MAX as i64) as i32,
            Scale::Linear {
                center,
                factor,
                invert,
            } => {
                let value = (raw - center as i64) * factor as i64;
                let value = if invert { -value } else { value };
                value.clamp(i32::MIN as i64, i32::MAX as i64) as i32
            }
        }
    }

    fn unapply(self, value: i32) -> i64 {
        match self {
            Scale::Raw => value as i64,
            Scale::Linear {
                center,
                factor,
                invert,
            } => {
                let steps = div_ceil(value as i64, factor.max(1) as i64);
                if invert {
                    center as i64 - steps
                } else {
                    center as i64 + steps
                }
            }
        }
    }
}

fn div_ceil(a: i64, b: i64) -> i64 {
    let q = a / b;
    if a % b != 0 && ((a > 0) == (b > 0)) {
        q + 1
    } else {
        q
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub field: Field,
    pub offset: usize,
    pub width: Width,
    #[serde(default)]
    pub scale: Scale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonBit {
    pub offset: usize,
    pub bit: u8,
    pub button: Button,
    /// The bit reads 0 while the button is active.
    #[serde(default)]
    pub active_low: bool,
}

/// 4-bit hat switch: 0 is north, values go clockwise, 8 and above is neutral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HatSpec {
    pub offset: usize,
    #[serde(default)]
    pub shift: u8,
}

const HAT_DIRECTIONS: [(bool, bool, bool, bool); 8] = [
    // up, right, down, left
    (true, false, false, false),
    (true, true, false, false),
    (false, true, false, false),
    (false, true, true, false),
    (false, false, true, false),
    (false, false, true, true),
    (false, false, false, true),
    (true, false, false, true),
];
const HAT_NEUTRAL: u8 = 8;

impl HatSpec {
    fn decode(&self, buf: &[u8], state: &mut ControllerState) -> Result<(), MalformedReport> {
        let byte = *buf
            .get(self.offset)
            .ok_or(MalformedReport::OutOfBounds { offset: self.offset })?;
        let value = (byte >> self.shift) & 0x0F;
        if let Some(&(up, right, down, left)) = HAT_DIRECTIONS.get(value as usize) {
            state.set_button(Button::DpadUp, up);
            state.set_button(Button::DpadRight, right);
            state.set_button(Button::DpadDown, down);
            state.set_button(Button::DpadLeft, left);
        }
        Ok(())
    }

    fn encode(&self, state: &ControllerState, buf: &mut [u8]) -> Result<(), MalformedReport> {
        let pressed = (
            state.pressed(Button::DpadUp),
            state.pressed(Button::DpadRight),
            state.pressed(Button::DpadDown),
            state.pressed(Button::DpadLeft),
        );
        let value = HAT_DIRECTIONS
            .iter()
            .position(|d| *d == pressed)
            .map(|p| p as u8)
            .unwrap_or(HAT_NEUTRAL);
        let byte = buf
            .get_mut(self.offset)
            .ok_or(MalformedReport::OutOfBounds { offset: self.offset })?;
        *byte = (*byte & !(0x0F << self.shift)) | (value << self.shift);
        Ok(())
    }
}

/// Rolling packet counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceSpec {
    pub offset: usize,
    pub width: Width,
    #[serde(default)]
    pub shift: u8,
    pub bits: u8,
}

impl SequenceSpec {
    fn mask(&self) -> u64 {
        if self.bits >= 32 {
            u32::MAX as u64
        } else {
            (1u64 << self.bits) - 1
        }
    }

    /// Number of distinct counter values before wrap-around.
    pub fn modulus(&self) -> u64 {
        self.mask() + 1
    }

    fn read(&self, buf: &[u8]) -> Result<u32, MalformedReport> {
        let raw = self.width.read(buf, self.offset)? as u64;
        Ok(((raw >> self.shift) & self.mask()) as u32)
    }

    fn write(&self, buf: &mut [u8], seq: u32) -> Result<(), MalformedReport> {
        let old = self.width.read(buf, self.offset)? as u64;
        let field_mask = self.mask() << self.shift;
        let merged = (old & !field_mask) | (((seq as u64) & self.mask()) << self.shift);
        self.width.write(buf, self.offset, merged as i64)
    }
}

/// Battery level stored as a fraction of `full` in the masked bits of one byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatterySpec {
    pub offset: usize,
    pub mask: u8,
    pub full: u8,
}

impl BatterySpec {
    pub fn read(&self, buf: &[u8]) -> Result<u8, MalformedReport> {
        let byte = *buf
            .get(self.offset)
            .ok_or(MalformedReport::OutOfBounds { offset: self.offset })?;
        let level = ((byte & self.mask) >> self.mask.trailing_zeros()) as u32;
        Ok((level * 100 / self.full.max(1) as u32).min(100) as u8)
    }

    /// Store a percentage in the masked bits, rounding up so that `read`
    /// gives back the same percentage for levels it produced.
    pub fn write(&self, buf: &mut [u8], percent: u8) -> Result<(), MalformedReport> {
        let byte = buf
            .get_mut(self.offset)
            .ok_or(MalformedReport::OutOfBounds { offset: self.offset })?;
        let level = (percent.min(100) as u32 * self.full as u32).div_ceil(100);
        let shift = self.mask.trailing_zeros();
        let raw = ((level << shift) as u8) & self.mask;
        *byte = (*byte & !self.mask) | raw;
        Ok(())
    }
}

/// A byte that must hold a fixed value for the report to be accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSpec {
    pub offset: usize,
    pub value: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReportSchema {
    pub name: String,
    pub report_len: usize,
    #[serde(default)]
    pub tags: Vec<TagSpec>,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub buttons: Vec<ButtonBit>,
    #[serde(default)]
    pub hat: Option<HatSpec>,
    #[serde(default)]
    pub sequence: Option<SequenceSpec>,
    #[serde(default)]
    pub battery: Option<BatterySpec>,
}

impl ReportSchema {
    /// Every offset must fit inside `report_len`.
    pub fn validate(&self) -> Result<(), String> {
        let fits = |offset: usize, len: usize| {
            offset
                .checked_add(len)
                .is_some_and(|end| end <= self.report_len)
        };
        if self.report_len == 0 {
            return Err(format!("{}: report_len must be positive", self.name));
        }
        if let Some(tag) = self.tags.iter().find(|t| !fits(t.offset, 1)) {
            return Err(format!("{}: tag offset {} out of range", self.name, tag.offset));
        }
        if let Some(spec) = self.fields.iter().find(|f| !fits(f.offset, f.width.bytes())) {
            return Err(format!(
                "{}: field {:?} at offset {} out of range",
                self.name, spec.field, spec.offset
            ));
        }
        if let Some(bit) = self.buttons.iter().find(|b| !fits(b.offset, 1) || b.bit > 7) {
            return Err(format!(
                "{}: button {:?} at {}:{} out of range",
                self.name, bit.button, bit.offset, bit.bit
            ));
        }
        if let Some(hat) = &self.hat {
            if !fits(hat.offset, 1) || hat.shift > 4 {
                return Err(format!("{}: hat at offset {} out of range", self.name, hat.offset));
            }
        }
        if let Some(seq) = &self.sequence {
            if !fits(seq.offset, seq.width.bytes()) || seq.bits == 0 {
                return Err(format!("{}: sequence at offset {} invalid", self.name, seq.offset));
            }
        }
        if let Some(battery) = &self.battery {
            if !fits(battery.offset, 1) || battery.mask == 0 || battery.full == 0 {
                return Err(format!("{}: battery at offset {} invalid", self.name, battery.offset));
            }
        }
        Ok(())
    }

    pub fn check_frame(&self, buf: &[u8]) -> Result<(), MalformedReport> {
        if buf.len() != self.report_len {
            return Err(MalformedReport::Length {
                expected: self.report_len,
                got: buf.len(),
            });
        }
        for tag in &self.tags {
            let got = buf[tag.offset];
            if got != tag.value {
                return Err(MalformedReport::Tag {
                    offset: tag.offset,
                    expected: tag.value,
                    got,
                });
            }
        }
        Ok(())
    }

    /// Decode a complete report. The caller's buffer is never retained.
    pub fn decode(&self, buf: &[u8]) -> Result<ControllerState, MalformedReport> {
        self.check_frame(buf)?;

        let mut state = ControllerState::default();
        for spec in &self.fields {
            let raw = spec.width.read(buf, spec.offset)?;
            spec.field.set(&mut state, spec.scale.apply(raw));
        }
        for bit in &self.buttons {
            let byte = buf[bit.offset];
            let set = byte & (1 << bit.bit) != 0;
            state.set_button(bit.button, set != bit.active_low);
        }
        if let Some(hat) = &self.hat {
            hat.decode(buf, &mut state)?;
        }
        if let Some(seq) = &self.sequence {
            state.seq = seq.read(buf)?;
        }
        if let Some(battery) = &self.battery {
            state.battery = Some(battery.read(buf)?);
        }
        Ok(state)
    }

    /// Write `state` into `buf` using the same layout. Used to build test
    /// fixtures; bytes the schema does not describe are left untouched.
    pub fn encode(&self, state: &ControllerState, buf: &mut [u8]) -> Result<(), MalformedReport> {
        if buf.len() != self.report_len {
            return Err(MalformedReport::Length {
                expected: self.report_len,
                got: buf.len(),
            });
        }
        for tag in &self.tags {
            buf[tag.offset] = tag.value;
        }
        for spec in &self.fields {
            let value = spec.scale.unapply(spec.field.get(state));
            spec.width.write(buf, spec.offset, value)?;
        }
        for bit in &self.buttons {
            let active = state.pressed(bit.button) != bit.active_low;
            if active {
                buf[bit.offset] |= 1 << bit.bit;
            } else {
                buf[bit.offset] &= !(1 << bit.bit);
            }
        }
        if let Some(hat) = &self.hat {
            hat.encode(state, buf)?;
        }
        if let Some(seq) = &self.sequence {
            seq.write(buf, state.seq)?;
        }
        if let (Some(battery), Some(percent)) = (&self.battery, state.battery) {
            battery.write(buf, percent)?;
        }
        Ok(())
    }

    pub fn sequence_modulus(&self) -> Option<u64> {
        self.sequence.as_ref().map(SequenceSpec::modulus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_schema() -> ReportSchema {
        ReportSchema {
            name: "tiny".into(),
            report_len: 8,
            tags: vec![TagSpec { offset: 0, value: 0x07 }],
            fields: vec![
                FieldSpec {
                    field: Field::StickX,
                    offset: 1,
                    width: Width::U8,
                    scale: Scale::CENTERED_U8,
                },
                FieldSpec {
                    field: Field::StickY,
                    offset: 2,
                    width: Width::U8,
                    scale: Scale::CENTERED_U8_INVERTED,
                },
                FieldSpec {
                    field: Field::LTrig,
                    offset: 3,
                    width: Width::U8,
                    scale: Scale::Raw,
                },
            ],
            buttons: vec![ButtonBit {
                offset: 4,
                bit: 3,
                button: Button::A,
                active_low: false,
            }],
            hat: Some(HatSpec { offset: 5, shift: 0 }),
            sequence: Some(SequenceSpec {
                offset: 6,
                width: Width::U8,
                shift: 2,
                bits: 6,
            }),
            battery: None,
        }
    }

    #[test]
    fn rejects_wrong_length_and_tag() {
        let schema = tiny_schema();
        assert_eq!(
            schema.decode(&[0x07; 4]),
            Err(MalformedReport::Length { expected: 8, got: 4 })
        );
        assert_eq!(
            schema.decode(&[0x01, 0, 0, 0, 0, 0, 0, 0]),
            Err(MalformedReport::Tag {
                offset: 0,
                expected: 0x07,
                got: 0x01
            })
        );
    }

    #[test]
    fn centered_axes_cover_full_range() -> Result<(), MalformedReport> {
        let schema = tiny_schema();
        let state = schema.decode(&[0x07, 0, 0, 200, 0b1000, 8, 0, 0])?;
        assert_eq!(state.stick.x, i16::MIN);
        assert_eq!(state.stick.y, i16::MAX);
        assert_eq!(state.ltrig, 200);
        assert!(state.pressed(Button::A));
        assert!(!state.pressed(Button::DpadUp));

        let centered = schema.decode(&[0x07, 128, 128, 0, 0, 8, 0, 0])?;
        assert_eq!(centered.stick.x, 0);
        assert_eq!(centered.stick.y, 0);
        Ok(())
    }

    #[test]
    fn hat_diagonals_set_two_buttons() -> Result<(), MalformedReport> {
        let schema = tiny_schema();
        let state = schema.decode(&[0x07, 128, 128, 0, 0, 3, 0, 0])?;
        assert!(state.pressed(Button::DpadRight));
        assert!(state.pressed(Button::DpadDown));
        assert!(!state.pressed(Button::DpadUp));
        Ok(())
    }

    #[test]
    fn sequence_uses_shifted_bits() -> Result<(), MalformedReport> {
        let schema = tiny_schema();
        let state = schema.decode(&[0x07, 128, 128, 0, 0, 8, 0b1111_0111, 0])?;
        assert_eq!(state.seq, 0b11_1101);
        assert_eq!(schema.sequence_modulus(), Some(64));
        Ok(())
    }

    #[test]
    fn packed_twelve_bit_pair() -> Result<(), MalformedReport> {
        let mut buf = [0u8; 3];
        Width::U12Low.write(&mut buf, 0, 0xABC)?;
        Width::U12High.write(&mut buf, 1, 0x123)?;
        assert_eq!(Width::U12Low.read(&buf, 0)?, 0xABC);
        assert_eq!(Width::U12High.read(&buf, 1)?, 0x123);
        Ok(())
    }

    #[test]
    fn validate_catches_out_of_range_fields() {
        let mut schema = tiny_schema();
        assert!(schema.validate().is_ok());
        schema.fields.push(FieldSpec {
            field: Field::GyroYaw,
            offset: 7,
            width: Width::I16,
            scale: Scale::Raw,
        });
        assert!(schema.validate().is_err());
    }

    #[test]
    fn validate_survives_huge_offsets() {
        let mut schema = tiny_schema();
        schema.fields.push(FieldSpec {
            field: Field::GyroYaw,
            offset: usize::MAX,
            width: Width::I16,
            scale: Scale::Raw,
        });
        assert!(schema.validate().is_err());
        assert_eq!(
            Width::I16.read(&[0u8; 4], usize::MAX),
            Err(MalformedReport::OutOfBounds { offset: usize::MAX })
        );
    }

    #[test]
    fn battery_is_validated_and_encoded() -> Result<(), MalformedReport> {
        let mut schema = tiny_schema();
        schema.battery = Some(BatterySpec {
            offset: 8,
            mask: 0x0F,
            full: 10,
        });
        assert!(schema.validate().is_err());

        schema.battery = Some(BatterySpec {
            offset: 7,
            mask: 0xF0,
            full: 10,
        });
        assert!(schema.validate().is_ok());
        let state = ControllerState {
            battery: Some(70),
            ..Default::default()
        };
        let mut buf = [0u8; 8];
        buf[7] = 0x05;
        schema.encode(&state, &mut buf)?;
        assert_eq!(buf[7], 0x75);
        assert_eq!(schema.decode(&buf)?.battery, Some(70));
        Ok(())
    }
}
