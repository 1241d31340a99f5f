//! Action specifications (what a binding does) and the runtime actions the
//! engine produces each tick.

use crate::controller::haptics::{HapticRequest, HapticSide};
use crate::mapping::error::ProfileConfigError;
use crate::mapping::parser::{self, Expr};
use crate::output::codes::{self, CodeKind, OutputCode};
use std::time::Duration;

/// Hold time of a tapped key inside a macro
pub const MACRO_TAP: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, PartialEq)]
pub enum MacroStep {
    Tap(OutputCode),
    Press(OutputCode),
    Release(OutputCode),
    Sleep(Duration),
}

/// Parsed form of a binding's action string.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionSpec {
    /// Held while the source is held.
    Button(OutputCode),
    /// Press on the rising edge, no release.
    Press(OutputCode),
    /// Release on the rising edge.
    Release(OutputCode),
    /// Analog sources drive the axis; digital sources hold `value`.
    Axis { target: OutputCode, value: Option<i32> },
    Mouse { target: OutputCode, speed: f32 },
    Macro(Vec<MacroStep>),
    Profile(String),
    Feedback(HapticRequest),
}

/// One output instruction produced by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Button { target: OutputCode, pressed: bool },
    Axis { target: OutputCode, value: i32 },
    Delta { target: OutputCode, delta: i32 },
    SwitchProfile(String),
    Haptic(HapticRequest),
}

impl Action {
    pub fn press(target: OutputCode) -> Self {
        Action::Button { target, pressed: true }
    }

    pub fn release(target: OutputCode) -> Self {
        Action::Button { target, pressed: false }
    }
}

fn bad(msg: String) -> ProfileConfigError {
    ProfileConfigError::BadArgument(msg)
}

fn code_arg(call: &str, expr: Option<&Expr>, kind: CodeKind) -> Result<OutputCode, ProfileConfigError> {
    let name = match expr {
        Some(Expr::Ident(name)) | Some(Expr::Str(name)) => name,
        Some(other) => return Err(bad(format!("{call}() expects a code, got {other:?}"))),
        None => return Err(bad(format!("{call}() expects a code"))),
    };
    let code = codes::lookup(name).ok_or_else(|| ProfileConfigError::UnknownCode(name.clone()))?;
    if code.kind != kind {
        return Err(bad(format!("{call}() cannot drive {name}")));
    }
    Ok(code)
}

fn number_arg(call: &str, expr: Option<&Expr>) -> Result<Option<f64>, ProfileConfigError> {
    match expr {
        None => Ok(None),
        Some(Expr::Number(value)) => Ok(Some(*value)),
        Some(other) => Err(bad(format!("{call}() expects a number, got {other:?}"))),
    }
}

fn u16_arg(call: &str, expr: Option<&Expr>, default: u16) -> Result<u16, ProfileConfigError> {
    match number_arg(call, expr)? {
        None => Ok(default),
        Some(value) if (0.0..=u16::MAX as f64).contains(&value) => Ok(value as u16),
        Some(value) => Err(bad(format!("{call}() argument {value} out of range"))),
    }
}

fn arity(call: &str, args: &[Expr], min: usize, max: usize) -> Result<(), ProfileConfigError> {
    if args.len() < min || args.len() > max {
        return Err(bad(format!(
            "{call}() takes {min}..={max} arguments, got {}",
            args.len()
        )));
    }
    Ok(())
}

fn macro_step(expr: &Expr) -> Result<MacroStep, ProfileConfigError> {
    match expr {
        Expr::Ident(_) => Ok(MacroStep::Tap(code_arg("macro", Some(expr), CodeKind::Key)?)),
        Expr::Call { name, args } => {
            let name = name.to_ascii_lowercase();
            match name.as_str() {
                "button" | "tap" => {
                    arity(&name, args, 1, 1)?;
                    Ok(MacroStep::Tap(code_arg(&name, args.first(), CodeKind::Key)?))
                }
                "press" => {
                    arity(&name, args, 1, 1)?;
                    Ok(MacroStep::Press(code_arg(&name, args.first(), CodeKind::Key)?))
                }
                "release" => {
                    arity(&name, args, 1, 1)?;
                    Ok(MacroStep::Release(code_arg(&name, args.first(), CodeKind::Key)?))
                }
                "sleep" => {
                    arity(&name, args, 1, 1)?;
                    match number_arg(&name, args.first())? {
                        Some(ms) if ms >= 0.0 => Ok(MacroStep::Sleep(Duration::from_millis(ms as u64))),
                        _ => Err(bad("sleep() expects a non-negative number of milliseconds".into())),
                    }
                }
                "macro" => Err(bad("macros cannot be nested".into())),
                _ => Err(ProfileConfigError::UnknownAction(name)),
            }
        }
        other => Err(bad(format!("invalid macro step {other:?}"))),
    }
}

impl ActionSpec {
    pub fn parse(text: &str) -> Result<Self, ProfileConfigError> {
        Self::from_expr(&parser::parse(text)?)
    }

    fn from_expr(expr: &Expr) -> Result<Self, ProfileConfigError> {
        let (name, args) = match expr {
            Expr::Call { name, args } => (name.to_ascii_lowercase(), args.as_slice()),
            // Kurzform: nur der Code
            Expr::Ident(code) => {
                let target = codes::lookup(code).ok_or_else(|| ProfileConfigError::UnknownCode(code.clone()))?;
                return Ok(match target.kind {
                    CodeKind::Key => ActionSpec::Button(target),
                    CodeKind::Abs => ActionSpec::Axis { target, value: None },
                    CodeKind::Rel => ActionSpec::Mouse { target, speed: 1.0 },
                });
            }
            other => return Err(bad(format!("not an action: {other:?}"))),
        };

        match name.as_str() {
            "button" => {
                arity(&name, args, 1, 1)?;
                Ok(ActionSpec::Button(code_arg(&name, args.first(), CodeKind::Key)?))
            }
            "press" => {
                arity(&name, args, 1, 1)?;
                Ok(ActionSpec::Press(code_arg(&name, args.first(), CodeKind::Key)?))
            }
            "release" => {
                arity(&name, args, 1, 1)?;
                Ok(ActionSpec::Release(code_arg(&name, args.first(), CodeKind::Key)?))
            }
            "axis" => {
                arity(&name, args, 1, 2)?;
                let target = code_arg(&name, args.first(), CodeKind::Abs)?;
                let value = number_arg(&name, args.get(1))?.map(|v| v.round() as i32);
                Ok(ActionSpec::Axis { target, value })
            }
            "mouse" => {
                arity(&name, args, 1, 2)?;
                let target = code_arg(&name, args.first(), CodeKind::Rel)?;
                let speed = number_arg(&name, args.get(1))?.unwrap_or(1.0) as f32;
                Ok(ActionSpec::Mouse { target, speed })
            }
            "macro" => {
                if args.is_empty() {
                    return Err(bad("macro() needs at least one step".into()));
                }
                let steps = args.iter().map(macro_step).collect::<Result<Vec<_>, _>>()?;
                Ok(ActionSpec::Macro(steps))
            }
            "profile" => {
                arity(&name, args, 1, 1)?;
                match args.first() {
                    Some(Expr::Str(profile)) | Some(Expr::Ident(profile)) => Ok(ActionSpec::Profile(profile.clone())),
                    _ => Err(bad("profile() expects a profile name".into())),
                }
            }
            "feedback" => {
                arity(&name, args, 2, 4)?;
                let side = match args.first() {
                    Some(Expr::Ident(side)) | Some(Expr::Str(side)) => HapticSide::from_name(side)
                        .ok_or_else(|| bad(format!("feedback() side must be LEFT, RIGHT or BOTH, got {side}")))?,
                    _ => return Err(bad("feedback() expects a side".into())),
                };
                Ok(ActionSpec::Feedback(HapticRequest {
                    side,
                    amplitude: u16_arg(&name, args.get(1), 0)?,
                    period: u16_arg(&name, args.get(2), HapticRequest::DEFAULT_PERIOD)?,
                    count: u16_arg(&name, args.get(3), HapticRequest::DEFAULT_COUNT)?,
                }))
            }
            _ => Err(ProfileConfigError::UnknownAction(name)),
        }
    }

    /// Actions that follow an analog value instead of edges.
    pub fn is_continuous(&self) -> bool {
        matches!(
            self,
            ActionSpec::Axis { value: None, .. } | ActionSpec::Mouse { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(name: &str) -> OutputCode {
        codes::lookup(name).expect("known code")
    }

    #[test]
    fn parses_every_action_form() -> Result<(), ProfileConfigError> {
        assert_eq!(ActionSpec::parse("button(KEY_A)")?, ActionSpec::Button(code("KEY_A")));
        assert_eq!(ActionSpec::parse("button(BTN_SOUTH)")?, ActionSpec::Button(code("BTN_SOUTH")));
        assert_eq!(
            ActionSpec::parse("axis(ABS_X)")?,
            ActionSpec::Axis {
                target: code("ABS_X"),
                value: None
            }
        );
        assert_eq!(
            ActionSpec::parse("axis(ABS_HAT0X, -1)")?,
            ActionSpec::Axis {
                target: code("ABS_HAT0X"),
                value: Some(-1)
            }
        );
        assert_eq!(
            ActionSpec::parse("mouse(REL_X, 2.0)")?,
            ActionSpec::Mouse {
                target: code("REL_X"),
                speed: 2.0
            }
        );
        assert_eq!(ActionSpec::parse("press(KEY_LEFTSHIFT)")?, ActionSpec::Press(code("KEY_LEFTSHIFT")));
        assert_eq!(ActionSpec::parse("release(KEY_LEFTSHIFT)")?, ActionSpec::Release(code("KEY_LEFTSHIFT")));
        assert_eq!(ActionSpec::parse(r#"profile("Racing")"#)?, ActionSpec::Profile("Racing".into()));
        assert_eq!(
            ActionSpec::parse("feedback(LEFT, 512)")?,
            ActionSpec::Feedback(HapticRequest {
                side: HapticSide::Left,
                amplitude: 512,
                period: HapticRequest::DEFAULT_PERIOD,
                count: HapticRequest::DEFAULT_COUNT,
            })
        );
        Ok(())
    }

    #[test]
    fn macro_steps_expand() -> Result<(), ProfileConfigError> {
        let spec = ActionSpec::parse("macro(button(KEY_A), sleep(50), press(KEY_B), release(KEY_B), KEY_C)")?;
        assert_eq!(
            spec,
            ActionSpec::Macro(vec![
                MacroStep::Tap(code("KEY_A")),
                MacroStep::Sleep(Duration::from_millis(50)),
                MacroStep::Press(code("KEY_B")),
                MacroStep::Release(code("KEY_B")),
                MacroStep::Tap(code("KEY_C")),
            ])
        );
        Ok(())
    }

    #[test]
    fn shorthand_picks_action_by_code_kind() -> Result<(), ProfileConfigError> {
        assert_eq!(ActionSpec::parse("KEY_ENTER")?, ActionSpec::Button(code("KEY_ENTER")));
        assert!(ActionSpec::parse("ABS_RX")?.is_continuous());
        assert!(ActionSpec::parse("REL_Y")?.is_continuous());
        Ok(())
    }

    #[test]
    fn unknown_names_are_config_errors() {
        assert_eq!(
            ActionSpec::parse("explode(KEY_A)"),
            Err(ProfileConfigError::UnknownAction("explode".into()))
        );
        assert_eq!(
            ActionSpec::parse("button(KEY_NOPE)"),
            Err(ProfileConfigError::UnknownCode("KEY_NOPE".into()))
        );
        assert!(matches!(
            ActionSpec::parse("button(ABS_X)"),
            Err(ProfileConfigError::BadArgument(_))
        ));
        assert!(matches!(
            ActionSpec::parse("macro(macro(KEY_A))"),
            Err(ProfileConfigError::BadArgument(_))
        ));
        assert!(matches!(
            ActionSpec::parse("feedback(UP, 10)"),
            Err(ProfileConfigError::BadArgument(_))
        ));
    }
}
