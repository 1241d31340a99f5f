//! Report decoding: raw HID buffers in, [`ControllerState`] snapshots out.
//!
//! A [`ReportDecoder`] is bound to one session. It owns the family schema,
//! remembers the last sequence number for gap detection and knows which
//! reports the family needs for initialization and haptics.

pub mod ds4;
pub mod generic;
pub mod schema;
pub mod steam;
pub mod steam_bt;

use crate::controller::descriptor::{ControllerDescriptor, ControllerFamily};
use crate::controller::haptics::{HapticCommand, HapticRequest, OutputReport};
use crate::controller::state::ControllerState;
use schema::ReportSchema;
use serde::Serialize;
use std::sync::Arc;
use steam::SteamPacket;
use steam_bt::BtPacket;
use tracing::debug;

/// Report rejected before any field was trusted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedReport {
    #[error("Report length {got} does not match expected {expected}")]
    Length { expected: usize, got: usize },

    #[error("Unexpected byte {got:#04x} at offset {offset}, expected {expected:#04x}")]
    Tag { offset: usize, expected: u8, got: u8 },

    #[error("Field at offset {offset} runs past the end of the report")]
    OutOfBounds { offset: usize },
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum DecoderError {
    #[error("No report layout available for {0}")]
    MissingSchema(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Connected,
    Disconnected,
}

/// Reports lost between two accepted input reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PacketGap {
    pub expected: u32,
    pub got: u32,
    pub lost: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    State {
        state: ControllerState,
        gap: Option<PacketGap>,
    },
    Link(LinkStatus),
    Battery(u8),
    Idle,
}

pub struct ReportDecoder {
    family: ControllerFamily,
    schema: Arc<ReportSchema>,
    /// Reduced layout the device may send before it is switched to `schema`.
    basic: Option<Arc<ReportSchema>>,
    /// Payload reassembly for Steam Controllers on Bluetooth.
    assembler: Option<steam_bt::Assembler>,
    last_seq: Option<u32>,
    battery: Option<u8>,
}

impl ReportDecoder {
    pub fn for_descriptor(descriptor: &ControllerDescriptor) -> Result<Self, DecoderError> {
        let schema = match descriptor.family {
            ControllerFamily::SteamWired | ControllerFamily::SteamDongle => Arc::new(steam::schema()),
            ControllerFamily::SteamBluetooth => Arc::new(steam_bt::frame_schema()),
            ControllerFamily::Ds4Usb => Arc::new(ds4::usb_schema()),
            ControllerFamily::Ds4Bluetooth => Arc::new(ds4::bluetooth_schema()),
            ControllerFamily::GenericHid => descriptor
                .schema
                .clone()
                .ok_or_else(|| DecoderError::MissingSchema(descriptor.name.clone()))?,
        };
        debug!(
            "Decoder for {} uses layout {} ({} bytes)",
            descriptor.path, schema.name, schema.report_len
        );
        let basic = match descriptor.family {
            ControllerFamily::Ds4Bluetooth => Some(Arc::new(ds4::bluetooth_basic_schema())),
            _ => None,
        };
        let assembler = (descriptor.family == ControllerFamily::SteamBluetooth).then(steam_bt::Assembler::default);
        Ok(Self {
            family: descriptor.family,
            schema,
            basic,
            assembler,
            last_seq: None,
            battery: None,
        })
    }

    pub fn family(&self) -> ControllerFamily {
        self.family
    }

    /// Read buffer size for this family.
    pub fn report_len(&self) -> usize {
        self.schema.report_len
    }

    /// Forget sequence history, e.g. after a wireless link drop.
    pub fn reset(&mut self) {
        self.last_seq = None;
    }

    pub fn decode(&mut self, buf: &[u8]) -> Result<DecodeOutcome, MalformedReport> {
        match self.family {
            ControllerFamily::SteamWired | ControllerFamily::SteamDongle => {
                match steam::classify(buf)? {
                    SteamPacket::Input => {
                        let mut state = self.schema.decode(buf)?;
                        steam::split_left_pad(&mut state);
                        Ok(self.accept(state))
                    }
                    SteamPacket::Link(status) => {
                        if status == LinkStatus::Disconnected {
                            self.reset();
                        }
                        Ok(DecodeOutcome::Link(status))
                    }
                    SteamPacket::Battery(level) => {
                        self.battery = Some(level);
                        Ok(DecodeOutcome::Battery(level))
                    }
                    SteamPacket::Idle => Ok(DecodeOutcome::Idle),
                }
            }
            ControllerFamily::SteamBluetooth => {
                let assembler = self.assembler.get_or_insert_with(steam_bt::Assembler::default);
                match assembler.push(buf)? {
                    BtPacket::Input(state) => Ok(self.accept(state)),
                    BtPacket::Partial | BtPacket::Ping => Ok(DecodeOutcome::Idle),
                }
            }
            _ => {
                let schema = match &self.basic {
                    Some(basic) if buf.len() == basic.report_len => Arc::clone(basic),
                    _ => Arc::clone(&self.schema),
                };
                let state = schema.decode(buf)?;
                Ok(self.accept(state))
            }
        }
    }

    fn accept(&mut self, mut state: ControllerState) -> DecodeOutcome {
        if state.battery.is_none() {
            state.battery = self.battery;
        }

        let gap = match (self.schema.sequence_modulus(), self.last_seq) {
            (Some(modulus), Some(last)) => {
                let expected = ((last as u64 + 1) % modulus) as u32;
                if state.seq == expected {
                    None
                } else {
                    let lost = ((state.seq as u64 + modulus - expected as u64) % modulus) as u32;
                    Some(PacketGap {
                        expected,
                        got: state.seq,
                        lost,
                    })
                }
            }
            _ => None,
        };
        if self.schema.sequence.is_some() {
            self.last_seq = Some(state.seq);
        }

        DecodeOutcome::State { state, gap }
    }

    /// Reports to send once the device (or its wireless link) comes up.
    pub fn init_reports(&self) -> Vec<OutputReport> {
        match self.family {
            ControllerFamily::SteamWired | ControllerFamily::SteamDongle => steam::init_reports(),
            ControllerFamily::Ds4Bluetooth => ds4::bluetooth_init_reports(),
            _ => Vec::new(),
        }
    }

    pub fn haptic(&self, request: &HapticRequest) -> Option<HapticCommand> {
        match self.family {
            ControllerFamily::SteamWired | ControllerFamily::SteamDongle => {
                Some(steam::haptic(request))
            }
            ControllerFamily::Ds4Usb => Some(ds4::haptic(request)),
            ControllerFamily::SteamBluetooth
            | ControllerFamily::Ds4Bluetooth
            | ControllerFamily::GenericHid => None,
        }
    }

    /// Build a report that decodes back to `state`. Fixture helper for tests
    /// and tools; bytes outside the layout are zero.
    pub fn encode_state(&self, state: &ControllerState) -> Result<Vec<u8>, MalformedReport> {
        let mut buf = vec![0u8; self.schema.report_len];
        match self.family {
            ControllerFamily::SteamWired | ControllerFamily::SteamDongle => {
                self.schema.encode(&steam::merge_left_pad(state), &mut buf)?
            }
            // Buttons, triggers and stick fit a single packet
            ControllerFamily::SteamBluetooth => {
                let sections = steam_bt::Sections::BUTTONS | steam_bt::Sections::TRIGGERS | steam_bt::Sections::STICK;
                return Ok(steam_bt::encode(state, sections).concat());
            }
            _ => self.schema.encode(state, &mut buf)?,
        }
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::descriptor::{BusType, Capabilities};
    use crate::controller::state::{Axis2, Button};
    use proptest::prelude::*;

    fn descriptor(family: ControllerFamily) -> ControllerDescriptor {
        ControllerDescriptor {
            vendor_id: 0x28DE,
            product_id: 0x1102,
            interface: 2,
            bus: BusType::Usb,
            path: "/dev/hidraw0".into(),
            serial: None,
            name: "test".into(),
            family,
            capabilities: Capabilities::empty(),
            schema: None,
        }
    }

    fn steam_state(seq: u32) -> ControllerState {
        let mut state = ControllerState {
            seq,
            ..Default::default()
        };
        state.stick = Axis2::new(-4000, 12000);
        state.rpad = Axis2::new(300, -300);
        state.ltrig = 40;
        state.set_button(Button::A, true);
        state
    }

    #[test]
    fn generic_family_requires_schema() {
        assert!(ReportDecoder::for_descriptor(&descriptor(ControllerFamily::GenericHid)).is_err());
    }

    #[test]
    fn steam_input_round_trips() -> Result<(), Box<dyn std::error::Error>> {
        let mut decoder = ReportDecoder::for_descriptor(&descriptor(ControllerFamily::SteamWired))?;
        let state = steam_state(7);
        let buf = decoder.encode_state(&state)?;
        assert_eq!(
            decoder.decode(&buf)?,
            DecodeOutcome::State { state, gap: None }
        );
        Ok(())
    }

    #[test]
    fn sequence_gaps_are_reported_not_fatal() -> Result<(), Box<dyn std::error::Error>> {
        let mut decoder = ReportDecoder::for_descriptor(&descriptor(ControllerFamily::SteamWired))?;
        decoder.decode(&decoder.encode_state(&steam_state(10))?)?;
        let outcome = decoder.decode(&decoder.encode_state(&steam_state(14))?)?;
        match outcome {
            DecodeOutcome::State { gap, .. } => assert_eq!(
                gap,
                Some(PacketGap {
                    expected: 11,
                    got: 14,
                    lost: 3
                })
            ),
            other => panic!("unexpected outcome {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn sequence_wraps_without_gap() -> Result<(), Box<dyn std::error::Error>> {
        let mut decoder = ReportDecoder::for_descriptor(&descriptor(ControllerFamily::SteamWired))?;
        decoder.decode(&decoder.encode_state(&steam_state(u32::MAX))?)?;
        let outcome = decoder.decode(&decoder.encode_state(&steam_state(0))?)?;
        assert!(matches!(outcome, DecodeOutcome::State { gap: None, .. }));
        Ok(())
    }

    #[test]
    fn dongle_battery_is_carried_into_states() -> Result<(), Box<dyn std::error::Error>> {
        let mut decoder = ReportDecoder::for_descriptor(&descriptor(ControllerFamily::SteamDongle))?;
        let mut battery = vec![0u8; steam::REPORT_LEN];
        battery[0] = steam::REPORT_ID;
        battery[2] = steam::PACKET_BATTERY;
        battery[12..14].copy_from_slice(&3000u16.to_le_bytes());
        assert_eq!(decoder.decode(&battery)?, DecodeOutcome::Battery(100));

        match decoder.decode(&decoder.encode_state(&steam_state(1))?)? {
            DecodeOutcome::State { state, .. } => assert_eq!(state.battery, Some(100)),
            other => panic!("unexpected outcome {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn only_haptic_capable_families_build_commands() -> Result<(), Box<dyn std::error::Error>> {
        let request = HapticRequest {
            side: crate::controller::haptics::HapticSide::Both,
            amplitude: 512,
            period: 1024,
            count: 1,
        };
        let steam = ReportDecoder::for_descriptor(&descriptor(ControllerFamily::SteamWired))?;
        let bt = ReportDecoder::for_descriptor(&descriptor(ControllerFamily::Ds4Bluetooth))?;
        assert!(steam.haptic(&request).is_some());
        assert!(bt.haptic(&request).is_none());
        Ok(())
    }

    #[test]
    fn ds4_bluetooth_accepts_basic_then_full_reports() -> Result<(), Box<dyn std::error::Error>> {
        let mut decoder = ReportDecoder::for_descriptor(&descriptor(ControllerFamily::Ds4Bluetooth))?;
        let mut pressed = ControllerState::default();
        pressed.set_button(Button::CROSS, true);

        let mut basic = vec![0u8; ds4::BT_BASIC_REPORT_LEN];
        ds4::bluetooth_basic_schema().encode(&pressed, &mut basic)?;
        match decoder.decode(&basic)? {
            DecodeOutcome::State { state, .. } => assert!(state.pressed(Button::CROSS)),
            other => panic!("unexpected outcome {other:?}"),
        }

        let full = decoder.encode_state(&ControllerState::default())?;
        assert_eq!(full.len(), ds4::BT_REPORT_LEN);
        match decoder.decode(&full)? {
            DecodeOutcome::State { state, .. } => assert!(!state.pressed(Button::CROSS)),
            other => panic!("unexpected outcome {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn steam_bluetooth_merges_partial_updates() -> Result<(), Box<dyn std::error::Error>> {
        let mut decoder = ReportDecoder::for_descriptor(&descriptor(ControllerFamily::SteamBluetooth))?;
        assert_eq!(decoder.report_len(), steam_bt::PACKET_LEN);

        let mut state = ControllerState::default();
        state.rpad = Axis2::new(640, -640);
        state.gyro.y = 77;
        let every = steam_bt::Sections::RPAD | steam_bt::Sections::MOTION;
        let packets = steam_bt::encode(&state, every);
        let (last, first) = packets.split_last().ok_or("no packets")?;
        for packet in first {
            assert_eq!(decoder.decode(packet)?, DecodeOutcome::Idle);
        }
        assert!(matches!(decoder.decode(last)?, DecodeOutcome::State { .. }));

        let mut pressed = ControllerState::default();
        pressed.set_button(Button::Y, true);
        match decoder.decode(&decoder.encode_state(&pressed)?)? {
            DecodeOutcome::State { state: merged, gap } => {
                assert!(merged.pressed(Button::Y));
                assert_eq!(merged.rpad, Axis2::new(640, -640));
                assert_eq!(merged.gyro.y, 77);
                assert_eq!(gap, None);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        Ok(())
    }

    proptest! {
        #[test]
        fn steam_bt_decode_never_panics(packets in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..24), 0..8)) {
            let mut decoder = ReportDecoder::for_descriptor(&descriptor(ControllerFamily::SteamBluetooth))
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            for packet in packets {
                let _ = decoder.decode(&packet);
            }
        }

        #[test]
        fn steam_decode_never_panics(buf in prop::collection::vec(any::<u8>(), 0..80)) {
            let mut decoder = ReportDecoder::for_descriptor(&descriptor(ControllerFamily::SteamDongle))
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            let _ = decoder.decode(&buf);
        }

        #[test]
        fn steam_states_survive_encoding(
            seq in any::<u32>(),
            stick in (any::<i16>(), any::<i16>()),
            rpad in (any::<i16>(), any::<i16>()),
            triggers in (any::<u8>(), any::<u8>()),
            gyro in (any::<i16>(), any::<i16>(), any::<i16>()),
            touching in any::<bool>(),
            pressed in prop::sample::subsequence(vec![Button::A, Button::B, Button::LB, Button::Start, Button::RGrip, Button::StickPress], 0..6),
        ) {
            let mut decoder = ReportDecoder::for_descriptor(&descriptor(ControllerFamily::SteamWired))
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            let mut state = ControllerState { seq, ..Default::default() };
            if touching {
                state.lpad = Axis2::new(stick.0, stick.1);
            } else {
                state.stick = Axis2::new(stick.0, stick.1);
            }
            state.set_button(Button::LPadTouch, touching);
            state.rpad = Axis2::new(rpad.0, rpad.1);
            state.ltrig = triggers.0;
            state.rtrig = triggers.1;
            state.gyro.x = gyro.0;
            state.gyro.y = gyro.1;
            state.gyro.z = gyro.2;
            for button in pressed {
                state.set_button(button, true);
            }

            let buf = decoder.encode_state(&state).map_err(|e| TestCaseError::fail(e.to_string()))?;
            let decoded = decoder.decode(&buf).map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert_eq!(decoded, DecodeOutcome::State { state, gap: None });
        }
    }
}
