//! Profiles: named, ordered bindings from physical sources to actions.
//!
//! ```toml
//! [[profiles]]
//! name = "Desktop"
//! deadzone = 0.15
//!
//! [[profiles.bindings]]
//! source = "A"
//! action = "button(BTN_LEFT)"
//!
//! [[profiles.bindings]]
//! source = "A"
//! mode = "LGRIP"
//! action = "macro(button(KEY_LEFTCTRL), sleep(30), button(KEY_C))"
//!
//! [[profiles.bindings]]
//! source = "RPAD_X"
//! action = "mouse(REL_X, 1.5)"
//! ```
//!
//! Source syntax: button names (`A`, `LB`, `DPAD_UP`, ...), analog axes
//! (`STICK_X`, `RPAD_Y`), triggers as analog (`LTRIG`) or digital with a
//! threshold (`LTRIG@128`), eight-way regions (`STICK:N`, `LPAD:SW`) and gyro
//! axes (`GYRO_YAW`).

use crate::controller::state::{AnalogInput, Button, ControllerState, GyroAxis, Trigger};
use crate::mapping::action::ActionSpec;
use crate::mapping::error::ProfileConfigError;
use crate::mapping::region::Section;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

pub const DEFAULT_PROFILE: &str = "Default";
pub const DEFAULT_DEADZONE: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AxisComponent {
    X,
    Y,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputSource {
    Button(Button),
    Threshold { trigger: Trigger, level: u8 },
    Region { input: AnalogInput, section: Section },
    Axis { input: AnalogInput, component: AxisComponent },
    Trigger(Trigger),
    Gyro(GyroAxis),
}

fn trigger_from_name(name: &str) -> Option<Trigger> {
    match name {
        "LTRIG" | "L2" => Some(Trigger::Left),
        "RTRIG" | "R2" => Some(Trigger::Right),
        _ => None,
    }
}

fn trigger_name(trigger: Trigger) -> &'static str {
    match trigger {
        Trigger::Left => "LTRIG",
        Trigger::Right => "RTRIG",
    }
}

impl InputSource {
    pub fn parse(text: &str) -> Result<Self, ProfileConfigError> {
        let upper = text.trim().to_ascii_uppercase();
        let unknown = || ProfileConfigError::UnknownCode(text.trim().to_string());

        if let Some((lhs, level)) = upper.split_once('@') {
            let trigger = trigger_from_name(lhs).ok_or_else(unknown)?;
            let level: u8 = level
                .parse()
                .map_err(|_| ProfileConfigError::BadArgument(format!("threshold in '{text}' must be 1..=255")))?;
            if level == 0 {
                return Err(ProfileConfigError::BadArgument(format!(
                    "threshold in '{text}' must be 1..=255"
                )));
            }
            return Ok(InputSource::Threshold { trigger, level });
        }

        if let Some((lhs, section)) = upper.split_once(':') {
            let input = AnalogInput::from_name(lhs).ok_or_else(unknown)?;
            let section = Section::from_name(section)
                .filter(|s| *s != Section::Center)
                .ok_or_else(|| ProfileConfigError::BadArgument(format!("unknown direction in '{text}'")))?;
            return Ok(InputSource::Region { input, section });
        }

        if let Some(trigger) = trigger_from_name(&upper) {
            return Ok(InputSource::Trigger(trigger));
        }

        match upper.as_str() {
            "GYRO_PITCH" => return Ok(InputSource::Gyro(GyroAxis::Pitch)),
            "GYRO_ROLL" => return Ok(InputSource::Gyro(GyroAxis::Roll)),
            "GYRO_YAW" => return Ok(InputSource::Gyro(GyroAxis::Yaw)),
            _ => {}
        }

        for (suffix, component) in [("_X", AxisComponent::X), ("_Y", AxisComponent::Y)] {
            if let Some(input) = upper.strip_suffix(suffix).and_then(AnalogInput::from_name) {
                return Ok(InputSource::Axis { input, component });
            }
        }

        Button::from_name(&upper).map(InputSource::Button).ok_or_else(unknown)
    }

    /// Digital sources fire on edges, the rest produce a value every tick.
    pub fn is_digital(&self) -> bool {
        matches!(
            self,
            InputSource::Button(_) | InputSource::Threshold { .. } | InputSource::Region { .. }
        )
    }
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputSource::Button(button) => f.write_str(button.name()),
            InputSource::Threshold { trigger, level } => write!(f, "{}@{}", trigger_name(*trigger), level),
            InputSource::Region { input, section } => write!(f, "{}:{}", input.name(), section.short_name()),
            InputSource::Axis { input, component } => {
                write!(f, "{}_{:?}", input.name(), component)
            }
            InputSource::Trigger(trigger) => f.write_str(trigger_name(*trigger)),
            InputSource::Gyro(axis) => write!(f, "GYRO_{}", format!("{:?}", axis).to_ascii_uppercase()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseCurve {
    #[default]
    Linear,
    Quadratic,
    Cubic,
}

impl ResponseCurve {
    /// Sign-preserving curve over `-1.0..=1.0`.
    pub fn apply(self, value: f32) -> f32 {
        match self {
            ResponseCurve::Linear => value,
            ResponseCurve::Quadratic => value * value.abs(),
            ResponseCurve::Cubic => value * value * value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingConfig {
    pub source: String,
    pub action: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub deadzone: Option<f32>,
    #[serde(default)]
    pub sensitivity: Option<f32>,
    #[serde(default)]
    pub curve: Option<ResponseCurve>,
}

impl BindingConfig {
    pub fn new(source: &str, action: &str) -> Self {
        Self {
            source: source.into(),
            action: action.into(),
            mode: None,
            deadzone: None,
            sensitivity: None,
            curve: None,
        }
    }

    pub fn with_mode(mut self, mode: &str) -> Self {
        self.mode = Some(mode.into());
        self
    }

    pub fn with_deadzone(mut self, deadzone: f32) -> Self {
        self.deadzone = Some(deadzone);
        self
    }

    pub fn with_sensitivity(mut self, sensitivity: f32) -> Self {
        self.sensitivity = Some(sensitivity);
        self
    }
}

fn default_deadzone() -> f32 {
    DEFAULT_DEADZONE
}

fn default_sensitivity() -> f32 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileConfig {
    pub name: String,
    #[serde(default = "default_deadzone")]
    pub deadzone: f32,
    #[serde(default = "default_sensitivity")]
    pub sensitivity: f32,
    #[serde(default)]
    pub curve: ResponseCurve,
    #[serde(default)]
    pub bindings: Vec<BindingConfig>,
}

impl ProfileConfig {
    pub fn new(name: &str, bindings: Vec<BindingConfig>) -> Self {
        Self {
            name: name.into(),
            deadzone: DEFAULT_DEADZONE,
            sensitivity: 1.0,
            curve: ResponseCurve::Linear,
            bindings,
        }
    }

    /// Xbox-style virtual gamepad. Kernel gamepads report +y downwards,
    /// hence the inverted y axes.
    pub fn builtin_default() -> Self {
        let mut bindings: Vec<BindingConfig> = [
            ("A", "button(BTN_A)"),
            ("B", "button(BTN_B)"),
            ("X", "button(BTN_X)"),
            ("Y", "button(BTN_Y)"),
            ("LB", "button(BTN_TL)"),
            ("RB", "button(BTN_TR)"),
            ("BACK", "button(BTN_SELECT)"),
            ("START", "button(BTN_START)"),
            ("C", "button(BTN_MODE)"),
            ("STICKPRESS", "button(BTN_THUMBL)"),
            ("RSTICKPRESS", "button(BTN_THUMBR)"),
            ("RPAD", "button(BTN_THUMBR)"),
            ("DPAD_UP", "axis(ABS_HAT0Y, -1)"),
            ("DPAD_DOWN", "axis(ABS_HAT0Y, 1)"),
            ("DPAD_LEFT", "axis(ABS_HAT0X, -1)"),
            ("DPAD_RIGHT", "axis(ABS_HAT0X, 1)"),
            ("STICK_X", "axis(ABS_X)"),
            ("RSTICK_X", "axis(ABS_RX)"),
            ("RPAD_X", "axis(ABS_RX)"),
        ]
        .into_iter()
        .map(|(source, action)| BindingConfig::new(source, action))
        .collect();

        for (source, action) in [("STICK_Y", "axis(ABS_Y)"), ("RSTICK_Y", "axis(ABS_RY)"), ("RPAD_Y", "axis(ABS_RY)")] {
            bindings.push(BindingConfig::new(source, action).with_sensitivity(-1.0));
        }
        bindings.push(BindingConfig::new("LTRIG", "axis(ABS_Z)").with_deadzone(0.0));
        bindings.push(BindingConfig::new("RTRIG", "axis(ABS_RZ)").with_deadzone(0.0));

        ProfileConfig::new(DEFAULT_PROFILE, bindings)
    }
}

/// A validated binding with its modifiers resolved against the profile.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub source: InputSource,
    pub mode: Option<Button>,
    pub action: ActionSpec,
    pub deadzone: f32,
    pub sensitivity: f32,
    pub curve: ResponseCurve,
}

/// Bindings sharing one source, in declared order.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceGroup {
    pub source: InputSource,
    pub bindings: Vec<usize>,
}

/// Immutable once built; activation swaps the whole `Arc<Profile>`.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub name: String,
    pub bindings: Vec<Binding>,
    pub groups: Vec<SourceGroup>,
}

fn check_modifier(name: &str, what: &str, value: f32, range: std::ops::Range<f32>) -> Result<f32, ProfileConfigError> {
    if value.is_finite() && range.contains(&value) {
        Ok(value)
    } else {
        Err(ProfileConfigError::BadArgument(format!(
            "{what} {value} out of range in profile '{name}'"
        )))
    }
}

impl Profile {
    pub fn from_config(config: &ProfileConfig) -> Result<Self, ProfileConfigError> {
        let name = config.name.trim();
        if name.is_empty() {
            return Err(ProfileConfigError::BadArgument("profile without a name".into()));
        }
        check_modifier(name, "deadzone", config.deadzone, 0.0..1.0)?;
        check_modifier(name, "sensitivity", config.sensitivity, -100.0..100.0)?;

        let mut bindings = Vec::with_capacity(config.bindings.len());
        let mut groups: Vec<SourceGroup> = Vec::new();

        for (index, entry) in config.bindings.iter().enumerate() {
            let source = InputSource::parse(&entry.source)?;
            let action = ActionSpec::parse(&entry.action)?;
            let mode = match &entry.mode {
                Some(mode) => Some(
                    Button::from_name(mode).ok_or_else(|| ProfileConfigError::UnknownCode(mode.clone()))?,
                ),
                None => None,
            };

            if source.is_digital() == action.is_continuous() {
                let kind = if source.is_digital() { "an analog" } else { "a digital" };
                return Err(ProfileConfigError::BadArgument(format!(
                    "'{}' needs {} source, got {}",
                    entry.action, kind, source
                )));
            }
            if mode.is_some() && mode.map(InputSource::Button) == Some(source) {
                return Err(ProfileConfigError::BadArgument(format!(
                    "{source} cannot be its own modeshift button"
                )));
            }

            let binding = Binding {
                source,
                mode,
                action,
                deadzone: check_modifier(name, "deadzone", entry.deadzone.unwrap_or(config.deadzone), 0.0..1.0)?,
                sensitivity: check_modifier(
                    name,
                    "sensitivity",
                    entry.sensitivity.unwrap_or(config.sensitivity),
                    -100.0..100.0,
                )?,
                curve: entry.curve.unwrap_or(config.curve),
            };

            match groups.iter_mut().find(|g| g.source == source) {
                Some(group) => {
                    if let Some(&other) = group.bindings.iter().find(|&&i| bindings_eq_layer(&bindings[i], &binding)) {
                        return Err(ProfileConfigError::OverlappingBindings {
                            profile: name.to_string(),
                            input: source.to_string(),
                            layer: mode.map_or_else(|| "base layer".to_string(), |m| format!("mode {}", m.name())),
                            first: other + 1,
                            second: index + 1,
                        });
                    }
                    group.bindings.push(index);
                }
                None => groups.push(SourceGroup {
                    source,
                    bindings: vec![index],
                }),
            }
            bindings.push(binding);
        }

        debug!(
            "Profile '{}' loaded: {} bindings on {} sources",
            name,
            bindings.len(),
            groups.len()
        );
        Ok(Self {
            name: name.to_string(),
            bindings,
            groups,
        })
    }

    /// Effective binding of a group for the current buttons: the first
    /// binding whose modeshift button is held, else the base binding.
    pub fn resolve(&self, group: &SourceGroup, state: &ControllerState) -> Option<usize> {
        let mut base = None;
        for &index in &group.bindings {
            match self.bindings[index].mode {
                Some(mode) if state.pressed(mode) => return Some(index),
                Some(_) => {}
                None => {
                    if base.is_none() {
                        base = Some(index);
                    }
                }
            }
        }
        base
    }
}

fn bindings_eq_layer(a: &Binding, b: &Binding) -> bool {
    a.mode == b.mode
}
