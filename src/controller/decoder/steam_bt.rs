//! Steam Controller over Bluetooth LE.
//!
//! The controller sends 20-byte packets. Byte 1 carries the packet number in
//! its low nibble and bit `0x40` once the payload is complete; a payload that
//! does not fit one packet continues in the next ones. The payload is the
//! concatenation of bytes 2.. of every packet.
//!
//! A payload starts with a little-endian section mask, followed by the
//! sections it names, in this order:
//!
//! | Mask | Bytes | Section |
//! |------|-------|---------|
//! | 0x0010 | 3 | buttons, same bit order as the wired report |
//! | 0x0020 | 2 | left, right trigger |
//! | 0x0080 | 4 | stick x, y (i16) |
//! | 0x0100 | 4 | left pad x, y (i16) |
//! | 0x0200 | 4 | right pad x, y (i16) |
//! | 0x1800 | 20 | accel x, y, z, gyro pitch, roll, yaw, quaternion (i16) |
//!
//! A mask containing `0x5000` is a keep-alive. Sections missing from a
//! payload keep their last value.

use crate::controller::decoder::schema::ReportSchema;
use crate::controller::decoder::steam::BUTTON_BITS;
use crate::controller::decoder::MalformedReport;
use crate::controller::state::{Axis2, ControllerState};
use bitflags::bitflags;

pub const PACKET_LEN: usize = 20;
const HEADER_LEN: usize = 2;
const CHUNK_LEN: usize = PACKET_LEN - HEADER_LEN;
const END_OF_PAYLOAD: u8 = 0x40;
/// Longest payload the controller sends is three packets.
const MAX_PAYLOAD: usize = CHUNK_LEN * 4;

/// First button byte of the wired report; the bit table is shared.
const WIRED_BUTTON_OFFSET: usize = 8;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Sections: u16 {
        const BUTTONS = 0x0010;
        const TRIGGERS = 0x0020;
        const STICK = 0x0080;
        const LPAD = 0x0100;
        const RPAD = 0x0200;
        const MOTION = 0x1800;
        const PING = 0x5000;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BtPacket {
    /// More packets of the same payload follow.
    Partial,
    Ping,
    Input(ControllerState),
}

/// Reassembles payloads and keeps the state sections are merged into.
#[derive(Debug, Default)]
pub struct Assembler {
    payload: Vec<u8>,
    in_payload: bool,
    state: ControllerState,
}

struct Cursor<'a> {
    payload: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], MalformedReport> {
        let bytes = self
            .payload
            .get(self.pos..self.pos + len)
            .ok_or(MalformedReport::OutOfBounds { offset: self.pos })?;
        self.pos += len;
        Ok(bytes)
    }

    fn i16s<const N: usize>(&mut self) -> Result<[i16; N], MalformedReport> {
        let bytes = self.take(N * 2)?;
        let mut out = [0i16; N];
        for (value, pair) in out.iter_mut().zip(bytes.chunks_exact(2)) {
            *value = i16::from_le_bytes([pair[0], pair[1]]);
        }
        Ok(out)
    }
}

impl Assembler {
    pub fn push(&mut self, buf: &[u8]) -> Result<BtPacket, MalformedReport> {
        if buf.len() != PACKET_LEN {
            self.in_payload = false;
            return Err(MalformedReport::Length {
                expected: PACKET_LEN,
                got: buf.len(),
            });
        }
        if !self.in_payload {
            self.payload.clear();
        }
        if self.payload.len() + CHUNK_LEN > MAX_PAYLOAD {
            self.in_payload = false;
            return Err(MalformedReport::OutOfBounds {
                offset: self.payload.len(),
            });
        }
        self.payload.extend_from_slice(&buf[HEADER_LEN..]);

        let complete = buf[1] & END_OF_PAYLOAD != 0;
        self.in_payload = !complete;
        if !complete {
            return Ok(BtPacket::Partial);
        }

        let payload = std::mem::take(&mut self.payload);
        let packet = self.apply(&payload);
        self.payload = payload;
        packet
    }

    /// Merge one complete payload. The stored state only changes when every
    /// announced section was present.
    fn apply(&mut self, payload: &[u8]) -> Result<BtPacket, MalformedReport> {
        let mut cursor = Cursor { payload, pos: 0 };
        let mask = cursor.take(2)?;
        let sections = Sections::from_bits_retain(u16::from_le_bytes([mask[0], mask[1]]));
        if sections.contains(Sections::PING) {
            return Ok(BtPacket::Ping);
        }

        let mut state = self.state;
        if sections.contains(Sections::BUTTONS) {
            let bytes = cursor.take(3)?;
            for &(offset, bit, button) in BUTTON_BITS {
                let byte = bytes[offset - WIRED_BUTTON_OFFSET];
                state.set_button(button, byte & (1 << bit) != 0);
            }
        }
        if sections.contains(Sections::TRIGGERS) {
            let bytes = cursor.take(2)?;
            state.ltrig = bytes[0];
            state.rtrig = bytes[1];
        }
        if sections.contains(Sections::STICK) {
            let [x, y] = cursor.i16s::<2>()?;
            state.stick = Axis2::new(x, y);
        }
        if sections.contains(Sections::LPAD) {
            let [x, y] = cursor.i16s::<2>()?;
            state.lpad = Axis2::new(x, y);
        }
        if sections.contains(Sections::RPAD) {
            let [x, y] = cursor.i16s::<2>()?;
            state.rpad = Axis2::new(x, y);
        }
        if sections.contains(Sections::MOTION) {
            // Quaternion follows the six axes and is not used
            let [ax, ay, az, pitch, roll, yaw, ..] = cursor.i16s::<10>()?;
            state.accel.x = ax;
            state.accel.y = ay;
            state.accel.z = az;
            state.gyro.x = pitch;
            state.gyro.y = roll;
            state.gyro.z = yaw;
        }

        self.state = state;
        Ok(BtPacket::Input(state))
    }
}

/// Frame size only; the payload is decoded by [`Assembler`].
pub fn frame_schema() -> ReportSchema {
    ReportSchema {
        name: "steam-bluetooth".into(),
        report_len: PACKET_LEN,
        ..Default::default()
    }
}

/// Split `sections` of `state` into packets as the controller would send
/// them. Fixture helper.
pub fn encode(state: &ControllerState, sections: Sections) -> Vec<Vec<u8>> {
    let mut payload = Vec::with_capacity(MAX_PAYLOAD);
    payload.extend_from_slice(&sections.bits().to_le_bytes());
    if sections.contains(Sections::BUTTONS) {
        let mut bytes = [0u8; 3];
        for &(offset, bit, button) in BUTTON_BITS {
            if state.pressed(button) {
                bytes[offset - WIRED_BUTTON_OFFSET] |= 1 << bit;
            }
        }
        payload.extend_from_slice(&bytes);
    }
    if sections.contains(Sections::TRIGGERS) {
        payload.extend_from_slice(&[state.ltrig, state.rtrig]);
    }
    fn push_i16(payload: &mut Vec<u8>, values: &[i16]) {
        for value in values {
            payload.extend_from_slice(&value.to_le_bytes());
        }
    }
    if sections.contains(Sections::STICK) {
        push_i16(&mut payload, &[state.stick.x, state.stick.y]);
    }
    if sections.contains(Sections::LPAD) {
        push_i16(&mut payload, &[state.lpad.x, state.lpad.y]);
    }
    if sections.contains(Sections::RPAD) {
        push_i16(&mut payload, &[state.rpad.x, state.rpad.y]);
    }
    if sections.contains(Sections::MOTION) {
        push_i16(
            &mut payload,
            &[
                state.accel.x,
                state.accel.y,
                state.accel.z,
                state.gyro.x,
                state.gyro.y,
                state.gyro.z,
                0,
                0,
                0,
                0,
            ],
        );
    }

    let chunks: Vec<&[u8]> = payload.chunks(CHUNK_LEN).collect();
    let last = chunks.len().saturating_sub(1);
    chunks
        .iter()
        .enumerate()
        .map(|(number, chunk)| {
            let mut packet = vec![0u8; PACKET_LEN];
            packet[0] = 0x03;
            packet[1] = (number as u8 & 0x0F) | if number == last { END_OF_PAYLOAD } else { 0 };
            packet[HEADER_LEN..HEADER_LEN + chunk.len()].copy_from_slice(chunk);
            packet
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::state::Button;

    fn feed(assembler: &mut Assembler, packets: Vec<Vec<u8>>) -> Result<BtPacket, MalformedReport> {
        let mut last = Ok(BtPacket::Partial);
        for packet in packets {
            last = assembler.push(&packet);
        }
        last
    }

    #[test]
    fn short_payload_fits_one_packet() -> Result<(), MalformedReport> {
        let mut state = ControllerState::default();
        state.set_button(Button::A, true);
        state.set_button(Button::StickPress, true);
        state.ltrig = 200;
        state.stick = Axis2::new(-1200, 3400);

        let packets = encode(&state, Sections::BUTTONS | Sections::TRIGGERS | Sections::STICK);
        assert_eq!(packets.len(), 1);
        let mut assembler = Assembler::default();
        assert_eq!(assembler.push(&packets[0])?, BtPacket::Input(state));
        Ok(())
    }

    #[test]
    fn long_payload_is_reassembled() -> Result<(), MalformedReport> {
        let mut state = ControllerState::default();
        state.set_button(Button::RPadTouch, true);
        state.rpad = Axis2::new(500, -500);
        state.lpad = Axis2::new(-7, 7);
        state.gyro.z = -321;
        state.accel.x = 16384;

        let every = Sections::BUTTONS
            | Sections::TRIGGERS
            | Sections::STICK
            | Sections::LPAD
            | Sections::RPAD
            | Sections::MOTION;
        let packets = encode(&state, every);
        assert!(packets.len() > 1);
        let mut assembler = Assembler::default();
        for packet in &packets[..packets.len() - 1] {
            assert_eq!(assembler.push(packet)?, BtPacket::Partial);
        }
        assert_eq!(assembler.push(&packets[packets.len() - 1])?, BtPacket::Input(state));
        Ok(())
    }

    #[test]
    fn missing_sections_keep_previous_values() -> Result<(), MalformedReport> {
        let mut assembler = Assembler::default();
        let mut state = ControllerState::default();
        state.stick = Axis2::new(9000, 0);
        feed(&mut assembler, encode(&state, Sections::STICK))?;

        let mut pressed = ControllerState::default();
        pressed.set_button(Button::B, true);
        match feed(&mut assembler, encode(&pressed, Sections::BUTTONS))? {
            BtPacket::Input(merged) => {
                assert!(merged.pressed(Button::B));
                assert_eq!(merged.stick.x, 9000);
            }
            other => panic!("unexpected packet {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn ping_is_not_input() -> Result<(), MalformedReport> {
        let mut packet = vec![0u8; PACKET_LEN];
        packet[1] = END_OF_PAYLOAD;
        packet[2..4].copy_from_slice(&Sections::PING.bits().to_le_bytes());
        assert_eq!(Assembler::default().push(&packet)?, BtPacket::Ping);
        Ok(())
    }

    #[test]
    fn truncated_section_leaves_state_alone() {
        let mut assembler = Assembler::default();
        let mut packet = vec![0u8; PACKET_LEN];
        packet[1] = END_OF_PAYLOAD;
        // All sections announced, one packet of data
        packet[2..4].copy_from_slice(&0x1BB0u16.to_le_bytes());
        packet[4] = 0xFF;
        assert!(matches!(
            assembler.push(&packet),
            Err(MalformedReport::OutOfBounds { .. })
        ));
        assert_eq!(assembler.state, ControllerState::default());
    }

    #[test]
    fn wrong_length_and_runaway_payloads_are_rejected() {
        let mut assembler = Assembler::default();
        assert_eq!(
            assembler.push(&[0u8; 12]),
            Err(MalformedReport::Length {
                expected: PACKET_LEN,
                got: 12
            })
        );

        // Never-ending payload
        let unfinished = vec![0u8; PACKET_LEN];
        let mut results = Vec::new();
        for _ in 0..6 {
            results.push(assembler.push(&unfinished));
        }
        assert!(results.iter().any(|r| r.is_err()));
    }
}
