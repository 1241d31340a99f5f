//! Mapping Engine: setzt Controller-Zustände anhand des aktiven Profils in
//! Aktionen um.
//!
//! Die Engine läuft einmal pro Tick und Slot. Digitale Quellen (Tasten,
//! Trigger-Schwellen, Regionen) reagieren auf Flanken, analoge Quellen
//! liefern in jedem Tick einen Wert. Welche Bindung eine Quelle gerade
//! bedient, hängt von gehaltenen Modeshift-Tasten ab.

use crate::controller::state::{AnalogInput, ControllerState};
use crate::mapping::action::{Action, ActionSpec};
use crate::mapping::macros::MacroPlayer;
use crate::mapping::profile::{AxisComponent, Binding, InputSource, Profile};
use crate::mapping::region::{Region, Section};
use crate::output::codes::OutputCode;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Pixel pro Sekunde bei voll ausgelenktem Stick und Geschwindigkeit 1.0
pub const MOUSE_VELOCITY: f32 = 1000.0;

/// Pixel für eine volle Padbreite im Trackpad-Modus
pub const PAD_TRAVEL: f32 = 1000.0;

/// Längere Pausen zwischen Ticks zählen nicht als Mausbewegung
const MAX_TICK_GAP: Duration = Duration::from_millis(100);

fn apply_deadzone(value: f32, deadzone: f32) -> f32 {
    let magnitude = value.abs();
    if magnitude <= deadzone {
        0.0
    } else {
        value.signum() * ((magnitude - deadzone) / (1.0 - deadzone)).min(1.0)
    }
}

/// Radiale Deadzone, damit Diagonalen nicht eckig werden
fn radial_deadzone(x: f32, y: f32, deadzone: f32) -> (f32, f32) {
    let magnitude = (x * x + y * y).sqrt();
    if magnitude <= deadzone || magnitude == 0.0 {
        return (0.0, 0.0);
    }
    let scaled = ((magnitude - deadzone) / (1.0 - deadzone)).min(1.0);
    let factor = scaled / magnitude;
    (x * factor, y * factor)
}

fn component((x, y): (f32, f32), component: AxisComponent) -> f32 {
    match component {
        AxisComponent::X => x,
        AxisComponent::Y => y,
    }
}

/// Normalized value in `-1.0..=1.0` scaled onto an absolute axis range.
pub fn axis_value(target: OutputCode, value: f32) -> i32 {
    let (min, max) = target.abs_range();
    let value = value.clamp(-1.0, 1.0);
    let raw = if value >= 0.0 {
        value * max as f32
    } else {
        -value * min as f32
    };
    (raw.round() as i32).clamp(min, max)
}

pub struct MappingEngine {
    slot: u8,
    profile: Option<Arc<Profile>>,
    /// Zählt Profilwechsel, trennt Makros alter Profile von neuen
    generation: u64,
    previous: ControllerState,
    sections: HashMap<AnalogInput, Section>,
    /// Aktive Bindung je digitaler Quelle
    engaged: HashMap<InputSource, usize>,
    /// Nachkommaanteile der Mausbewegung je Bindung
    remainders: HashMap<usize, f32>,
    macros: MacroPlayer,
    last_tick: Option<Instant>,
}

impl MappingEngine {
    pub fn new(slot: u8) -> Self {
        Self {
            slot,
            profile: None,
            generation: 0,
            previous: ControllerState::default(),
            sections: HashMap::new(),
            engaged: HashMap::new(),
            remainders: HashMap::new(),
            macros: MacroPlayer::new(),
            last_tick: None,
        }
    }

    pub fn profile(&self) -> Option<&Arc<Profile>> {
        self.profile.as_ref()
    }

    pub fn previous(&self) -> &ControllerState {
        &self.previous
    }

    /// Ein Tick: Zustand gegen Profil auswerten. Ein neues Profil wird
    /// vorher übernommen und die Ausgaben des alten freigegeben.
    pub fn apply(&mut self, state: &ControllerState, profile: &Arc<Profile>, now: Instant) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.profile.as_ref().map_or(true, |p| !Arc::ptr_eq(p, profile)) {
            actions.extend(self.switch_profile(Arc::clone(profile)));
        }

        let dt = self
            .last_tick
            .map(|t| now.saturating_duration_since(t).min(MAX_TICK_GAP))
            .unwrap_or_default()
            .as_secs_f32();
        let sections = self.locate_sections(state);

        for group in &profile.groups {
            let source = group.source;
            if source.is_digital() {
                let active = digital_active(&source, state, &sections);
                let was_active = digital_active(&source, &self.previous, &self.sections);
                let effective = if active { profile.resolve(group, state) } else { None };

                if let Some(&index) = self.engaged.get(&source) {
                    if effective != Some(index) {
                        self.engaged.remove(&source);
                        disengage(&profile.bindings[index], &mut actions);
                    }
                }

                if active && !was_active && !self.engaged.contains_key(&source) {
                    if let Some(index) = effective {
                        self.engage(&profile.bindings[index], index, now, &mut actions);
                        self.engaged.insert(source, index);
                    }
                }

                // Feste Achswerte gelten, solange die Bindung greift
                if let Some(&index) = self.engaged.get(&source) {
                    if let ActionSpec::Axis {
                        target,
                        value: Some(value),
                    } = profile.bindings[index].action
                    {
                        actions.push(Action::Axis { target, value });
                    }
                }
            } else if let Some(index) = profile.resolve(group, state) {
                self.drive_analog(&profile.bindings[index], index, state, dt, &mut actions);
            }
        }

        actions.extend(self.macros.advance(now));

        self.previous = *state;
        self.sections = sections;
        self.last_tick = Some(now);
        actions
    }

    /// Profil wechseln: gehaltene Ausgaben des alten Profils freigeben.
    pub fn switch_profile(&mut self, profile: Arc<Profile>) -> Vec<Action> {
        let mut actions = Vec::new();
        if let Some(old) = self.profile.take() {
            let mut engaged: Vec<usize> = self.engaged.drain().map(|(_, index)| index).collect();
            engaged.sort_unstable();
            for index in engaged {
                disengage(&old.bindings[index], &mut actions);
            }
            info!("Slot {}: profile '{}' -> '{}'", self.slot, old.name, profile.name);
        } else {
            debug!("Slot {}: profile '{}'", self.slot, profile.name);
        }
        self.remainders.clear();
        self.generation += 1;
        self.profile = Some(profile);
        actions
    }

    /// Alles loslassen, was diese Engine noch hält (Slot wird frei).
    pub fn release_all(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        if let Some(profile) = &self.profile {
            let mut engaged: Vec<usize> = self.engaged.drain().map(|(_, index)| index).collect();
            engaged.sort_unstable();
            for index in engaged {
                disengage(&profile.bindings[index], &mut actions);
            }
        }
        actions.extend(self.macros.cancel_all());
        self.remainders.clear();
        actions
    }

    fn locate_sections(&self, state: &ControllerState) -> HashMap<AnalogInput, Section> {
        AnalogInput::ALL
            .into_iter()
            .map(|input| {
                let section = if state.analog_active(input) {
                    let (x, y) = state.analog(input).normalized();
                    let previous = self.sections.get(&input).copied().unwrap_or_default();
                    Region::locate(x, y, previous)
                } else {
                    Section::Center
                };
                (input, section)
            })
            .collect()
    }

    fn engage(&mut self, binding: &Binding, index: usize, now: Instant, actions: &mut Vec<Action>) {
        match &binding.action {
            ActionSpec::Button(target) | ActionSpec::Press(target) => actions.push(Action::press(*target)),
            ActionSpec::Release(target) => actions.push(Action::release(*target)),
            ActionSpec::Mouse { target, speed } => {
                let delta = (speed * binding.sensitivity).round() as i32;
                if delta != 0 {
                    actions.push(Action::Delta {
                        target: *target,
                        delta,
                    });
                }
            }
            ActionSpec::Macro(steps) => {
                self.macros.start((self.generation, index), steps, now);
            }
            ActionSpec::Profile(name) => actions.push(Action::SwitchProfile(name.clone())),
            ActionSpec::Feedback(request) => actions.push(Action::Haptic(*request)),
            // Wird pro Tick in apply() ausgegeben
            ActionSpec::Axis { .. } => {}
        }
    }

    fn drive_analog(
        &mut self,
        binding: &Binding,
        index: usize,
        state: &ControllerState,
        dt: f32,
        actions: &mut Vec<Action>,
    ) {
        match binding.action {
            ActionSpec::Axis { target, value: None } => {
                let value = analog_value(&binding.source, binding, state);
                if value != 0.0 {
                    let value = axis_value(target, value);
                    if value != 0 {
                        actions.push(Action::Axis { target, value });
                    }
                }
            }
            ActionSpec::Mouse { target, speed } => {
                let amount = match binding.source {
                    InputSource::Axis { input, component: axis } if input.is_pad() => {
                        pad_delta(input, axis, state, &self.previous) * speed * binding.sensitivity * PAD_TRAVEL
                    }
                    _ => analog_value(&binding.source, binding, state) * speed * MOUSE_VELOCITY * dt,
                };
                let remainder = self.remainders.entry(index).or_insert(0.0);
                let total = *remainder + amount;
                let whole = total.trunc();
                *remainder = total - whole;
                if whole != 0.0 {
                    actions.push(Action::Delta {
                        target,
                        delta: whole as i32,
                    });
                }
            }
            _ => {}
        }
    }
}

fn digital_active(source: &InputSource, state: &ControllerState, sections: &HashMap<AnalogInput, Section>) -> bool {
    match *source {
        InputSource::Button(button) => state.pressed(button),
        InputSource::Threshold { trigger, level } => state.trigger(trigger) >= level,
        InputSource::Region { input, section } => sections.get(&input) == Some(&section),
        _ => false,
    }
}

fn disengage(binding: &Binding, actions: &mut Vec<Action>) {
    if let ActionSpec::Button(target) = binding.action {
        actions.push(Action::release(target));
    }
}

/// Analogwert nach Deadzone, Kurve und Empfindlichkeit.
fn analog_value(source: &InputSource, binding: &Binding, state: &ControllerState) -> f32 {
    let raw = match *source {
        InputSource::Axis { input, component: axis } => {
            if !state.analog_active(input) {
                return 0.0;
            }
            let (x, y) = state.analog(input).normalized();
            component(radial_deadzone(x, y, binding.deadzone), axis)
        }
        InputSource::Trigger(trigger) => apply_deadzone(state.trigger(trigger) as f32 / 255.0, binding.deadzone),
        InputSource::Gyro(axis) => apply_deadzone(state.gyro_axis(axis) as f32 / 32768.0, binding.deadzone),
        _ => 0.0,
    };
    binding.curve.apply(raw) * binding.sensitivity
}

/// Bewegung eines berührten Pads seit dem letzten Tick
fn pad_delta(input: AnalogInput, axis: AxisComponent, state: &ControllerState, previous: &ControllerState) -> f32 {
    if !(state.analog_active(input) && previous.analog_active(input)) {
        return 0.0;
    }
    component(state.analog(input).normalized(), axis) - component(previous.analog(input).normalized(), axis)
}
