//! Line protocol of the control socket.
//!
//! ```text
//! GET_STATE <slot>
//! SET_PROFILE <slot> <name>
//! SUBSCRIBE <class>[,<class>...]
//! LIST_DEVICES
//! LIST_PROFILES
//! TEST_INPUT <slot> <input> <value>
//! FOCUS <class> [title]
//! ```
//!
//! Arguments are separated by whitespace; names containing spaces are
//! written in double quotes. Every request is answered with exactly one
//! `OK <json>` or `ERR <kind> <message>` line.

use crate::control::events::EventClass;
use crate::mapping::error::RegistryError;
use crate::mapping::manager::TestTarget;
use serde::Serialize;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("{0}")]
    UnknownCommand(String),

    #[error("{0}")]
    BadArgument(String),

    #[error("slot {0} has no controller")]
    SlotNotFound(u8),

    #[error("\"{0}\"")]
    ProfileNotFound(String),
}

impl ControlError {
    pub fn kind(&self) -> &'static str {
        match self {
            ControlError::UnknownCommand(_) => "UnknownCommand",
            ControlError::BadArgument(_) => "BadArgument",
            ControlError::SlotNotFound(_) => "SlotNotFound",
            ControlError::ProfileNotFound(_) => "ProfileNotFound",
        }
    }
}

impl From<RegistryError> for ControlError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::ProfileNotFound(name) => ControlError::ProfileNotFound(name),
            RegistryError::SlotNotFound(slot) => ControlError::SlotNotFound(slot),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    GetState { slot: u8 },
    SetProfile { slot: u8, name: String },
    Subscribe { classes: HashSet<EventClass> },
    ListDevices,
    ListProfiles,
    TestInput { slot: u8, target: TestTarget, value: i32 },
    Focus { class: String, title: String },
}

/// Whitespace separated words; double quotes group, `\` escapes inside quotes.
fn split_words(line: &str) -> Result<Vec<String>, ControlError> {
    let mut words = Vec::new();
    let mut chars = line.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        let mut word = String::new();
        if c == '"' {
            chars.next();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '"' => {
                        closed = true;
                        break;
                    }
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            word.push(escaped);
                        }
                    }
                    c => word.push(c),
                }
            }
            if !closed {
                return Err(ControlError::BadArgument("unterminated quote".into()));
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                word.push(c);
                chars.next();
            }
        }
        words.push(word);
    }
    Ok(words)
}

fn slot_arg(word: Option<&String>) -> Result<u8, ControlError> {
    let word = word.ok_or_else(|| ControlError::BadArgument("missing slot".into()))?;
    word.parse()
        .map_err(|_| ControlError::BadArgument(format!("invalid slot '{word}'")))
}

fn expect_args(command: &str, args: &[String], min: usize, max: usize) -> Result<(), ControlError> {
    if args.len() < min || args.len() > max {
        return Err(ControlError::BadArgument(format!(
            "{command} takes {min}..={max} arguments, got {}",
            args.len()
        )));
    }
    Ok(())
}

pub fn parse_request(line: &str) -> Result<Request, ControlError> {
    let words = split_words(line)?;
    let Some((command, args)) = words.split_first() else {
        return Err(ControlError::UnknownCommand("empty request".into()));
    };
    let command = command.to_ascii_uppercase();

    match command.as_str() {
        "GET_STATE" => {
            expect_args(&command, args, 1, 1)?;
            Ok(Request::GetState {
                slot: slot_arg(args.first())?,
            })
        }
        "SET_PROFILE" => {
            expect_args(&command, args, 2, 2)?;
            Ok(Request::SetProfile {
                slot: slot_arg(args.first())?,
                name: args[1].clone(),
            })
        }
        "SUBSCRIBE" => {
            if args.is_empty() {
                return Err(ControlError::BadArgument("SUBSCRIBE needs at least one class".into()));
            }
            let mut classes = HashSet::new();
            for name in args.iter().flat_map(|a| a.split(',')).filter(|n| !n.is_empty()) {
                let class = EventClass::from_name(name)
                    .ok_or_else(|| ControlError::BadArgument(format!("unknown event class '{name}'")))?;
                classes.insert(class);
            }
            Ok(Request::Subscribe { classes })
        }
        "LIST_DEVICES" => {
            expect_args(&command, args, 0, 0)?;
            Ok(Request::ListDevices)
        }
        "LIST_PROFILES" => {
            expect_args(&command, args, 0, 0)?;
            Ok(Request::ListProfiles)
        }
        "TEST_INPUT" => {
            expect_args(&command, args, 3, 3)?;
            let slot = slot_arg(args.first())?;
            let target = TestTarget::from_name(&args[1])
                .ok_or_else(|| ControlError::BadArgument(format!("unknown input '{}'", args[1])))?;
            let value = args[2]
                .parse()
                .map_err(|_| ControlError::BadArgument(format!("invalid value '{}'", args[2])))?;
            Ok(Request::TestInput { slot, target, value })
        }
        "FOCUS" => {
            expect_args(&command, args, 1, 2)?;
            Ok(Request::Focus {
                class: args[0].clone(),
                title: args.get(1).cloned().unwrap_or_default(),
            })
        }
        _ => Err(ControlError::UnknownCommand(format!("unknown command '{command}'"))),
    }
}

pub fn ok_line<T: Serialize>(payload: &T) -> String {
    match serde_json::to_string(payload) {
        Ok(json) => format!("OK {json}"),
        Err(e) => format!("ERR BadArgument unserializable response: {e}"),
    }
}

pub fn err_line(error: &ControlError) -> String {
    // Antworten bleiben einzeilig
    let message = error.to_string().replace(['\n', '\r'], " ");
    format!("ERR {} {}", error.kind(), message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::decoder::schema::Field;
    use crate::controller::state::Button;

    #[test]
    fn parses_requests() -> Result<(), ControlError> {
        assert_eq!(parse_request("GET_STATE 0")?, Request::GetState { slot: 0 });
        assert_eq!(
            parse_request(r#"set_profile 1 "Two Words""#)?,
            Request::SetProfile {
                slot: 1,
                name: "Two Words".into()
            }
        );
        assert_eq!(
            parse_request("SUBSCRIBE device,errors profile")?,
            Request::Subscribe {
                classes: [EventClass::Device, EventClass::Errors, EventClass::Profile]
                    .into_iter()
                    .collect()
            }
        );
        assert_eq!(parse_request("LIST_DEVICES")?, Request::ListDevices);
        assert_eq!(
            parse_request("TEST_INPUT 0 CROSS 1")?,
            Request::TestInput {
                slot: 0,
                target: TestTarget::Button(Button::A),
                value: 1
            }
        );
        assert_eq!(
            parse_request("TEST_INPUT 2 STICK_X -32768")?,
            Request::TestInput {
                slot: 2,
                target: TestTarget::Field(Field::StickX),
                value: -32768
            }
        );
        assert_eq!(
            parse_request(r#"FOCUS firefox "Mozilla Firefox""#)?,
            Request::Focus {
                class: "firefox".into(),
                title: "Mozilla Firefox".into()
            }
        );
        Ok(())
    }

    #[test]
    fn rejects_bad_requests() {
        assert!(matches!(parse_request("REBOOT"), Err(ControlError::UnknownCommand(_))));
        assert!(matches!(parse_request(""), Err(ControlError::UnknownCommand(_))));
        assert!(matches!(parse_request("GET_STATE x"), Err(ControlError::BadArgument(_))));
        assert!(matches!(parse_request("GET_STATE 300"), Err(ControlError::BadArgument(_))));
        assert!(matches!(parse_request("SET_PROFILE 0"), Err(ControlError::BadArgument(_))));
        assert!(matches!(parse_request("SUBSCRIBE weather"), Err(ControlError::BadArgument(_))));
        assert!(matches!(parse_request("TEST_INPUT 0 PEDAL 1"), Err(ControlError::BadArgument(_))));
        assert!(matches!(parse_request(r#"FOCUS "open"#), Err(ControlError::BadArgument(_))));
    }

    #[test]
    fn response_lines() {
        assert_eq!(
            err_line(&ControlError::ProfileNotFound("Racing".into())),
            r#"ERR ProfileNotFound "Racing""#
        );
        assert_eq!(err_line(&ControlError::SlotNotFound(3)), "ERR SlotNotFound slot 3 has no controller");
        assert_eq!(ok_line(&serde_json::json!({"slot": 1})), r#"OK {"slot":1}"#);
    }
}
