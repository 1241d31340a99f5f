//! Manager für die Mapping-Pipeline aller Slots
//!
//! Ein einziger Task tickt in festem Intervall. Pro Tick und Slot wird der
//! neueste Controller-Zustand gelesen, durch die Engine gegen das aktive
//! Profil ausgewertet und über die Senke des Slots ausgegeben. Slot-Wechsel,
//! Testeingaben und Fokuswechsel werden zwischen den Ticks verarbeitet.

use crate::control::events::{DaemonEvent, EventBus};
use crate::controller::decoder::schema::Field;
use crate::controller::descriptor::ControllerDescriptor;
use crate::controller::haptics::HapticRequest;
use crate::controller::state::{Button, ControllerState};
use crate::device::manager::SlotChange;
use crate::mapping::action::Action;
use crate::mapping::autoswitch::Autoswitcher;
use crate::mapping::engine::MappingEngine;
use crate::mapping::error::RegistryError;
use crate::mapping::profile::Profile;
use crate::mapping::registry::ProfileRegistry;
use crate::output::device::VirtualDeviceFactory;
use crate::output::sink::OutputSink;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub tick_interval: Duration,
    /// Publish button edges as `buttons` events
    pub diagnostics: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(4),
            diagnostics: false,
        }
    }
}

/// Target of a raw test input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestTarget {
    Button(Button),
    Field(Field),
}

impl TestTarget {
    pub fn from_name(name: &str) -> Option<Self> {
        Button::from_name(name)
            .map(TestTarget::Button)
            .or_else(|| Field::from_name(name).map(TestTarget::Field))
    }
}

#[derive(Debug)]
pub enum PipelineCommand {
    TestInput {
        slot: u8,
        target: TestTarget,
        value: i32,
        reply: oneshot::Sender<Result<(), RegistryError>>,
    },
    Focus {
        class: String,
        title: String,
    },
}

/// Testeingaben, die über den Gerätezustand gelegt werden. Ein Wert von 0
/// entfernt die Überlagerung wieder.
#[derive(Debug, Default, Clone)]
pub struct TestOverlay {
    buttons: HashMap<Button, bool>,
    fields: HashMap<Field, i32>,
}

impl TestOverlay {
    pub fn set(&mut self, target: TestTarget, value: i32) {
        match target {
            TestTarget::Button(button) if value != 0 => {
                self.buttons.insert(button, true);
            }
            TestTarget::Button(button) => {
                self.buttons.remove(&button);
            }
            TestTarget::Field(field) if value != 0 => {
                self.fields.insert(field, value);
            }
            TestTarget::Field(field) => {
                self.fields.remove(&field);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buttons.is_empty() && self.fields.is_empty()
    }

    pub fn apply(&self, mut state: ControllerState) -> ControllerState {
        for (button, pressed) in &self.buttons {
            state.set_button(*button, *pressed);
        }
        for (field, value) in &self.fields {
            field.set(&mut state, *value);
        }
        state
    }
}

struct SlotRuntime {
    descriptor: ControllerDescriptor,
    state_rx: watch::Receiver<ControllerState>,
    profile_rx: watch::Receiver<Arc<Profile>>,
    haptic_tx: mpsc::Sender<HapticRequest>,
    engine: MappingEngine,
    sink: OutputSink,
    overlay: TestOverlay,
    last_state: ControllerState,
}

pub struct MappingEngineManager {
    registry: Arc<ProfileRegistry>,
    factory: Arc<dyn VirtualDeviceFactory>,
    bus: EventBus,
    autoswitch: Autoswitcher,
    settings: PipelineSettings,
    slots: BTreeMap<u8, SlotRuntime>,
}

impl MappingEngineManager {
    pub fn new(
        registry: Arc<ProfileRegistry>,
        factory: Arc<dyn VirtualDeviceFactory>,
        bus: EventBus,
        autoswitch: Autoswitcher,
        settings: PipelineSettings,
    ) -> Self {
        info!(
            "Creating new MappingEngineManager (tick {:?}, diagnostics {})",
            settings.tick_interval, settings.diagnostics
        );
        Self {
            registry,
            factory,
            bus,
            autoswitch,
            settings,
            slots: BTreeMap::new(),
        }
    }

    pub fn slots(&self) -> Vec<u8> {
        self.slots.keys().copied().collect()
    }

    pub fn handle_slot_change(&mut self, change: SlotChange) {
        match change {
            SlotChange::Attached {
                slot,
                descriptor,
                state_rx,
                haptic_tx,
            } => self.attach(slot, descriptor, state_rx, haptic_tx),
            SlotChange::Detached { slot } => self.detach(slot),
        }
    }

    fn attach(
        &mut self,
        slot: u8,
        descriptor: ControllerDescriptor,
        state_rx: watch::Receiver<ControllerState>,
        haptic_tx: mpsc::Sender<HapticRequest>,
    ) {
        if self.slots.contains_key(&slot) {
            warn!("Slot {} attached twice, replacing the old runtime", slot);
            self.detach(slot);
        }
        let profile_rx = self.registry.attach(slot);
        info!(
            "Slot {}: {} ({:?}) on profile '{}'",
            slot,
            descriptor.name,
            descriptor.family,
            profile_rx.borrow().name
        );
        self.slots.insert(
            slot,
            SlotRuntime {
                descriptor,
                state_rx,
                profile_rx,
                haptic_tx,
                engine: MappingEngine::new(slot),
                sink: OutputSink::new(slot, Arc::clone(&self.factory)),
                overlay: TestOverlay::default(),
                last_state: ControllerState::default(),
            },
        );
    }

    fn detach(&mut self, slot: u8) {
        let Some(mut runtime) = self.slots.remove(&slot) else {
            debug!("Slot {} was not attached", slot);
            return;
        };
        let actions = runtime.engine.release_all();
        runtime.sink.emit(&actions);
        for e in runtime.sink.release_all() {
            warn!("Slot {}: releasing outputs failed: {}", slot, e);
        }
        self.registry.detach(slot);
        info!("Slot {}: {} detached", slot, runtime.descriptor.name);
    }

    pub fn handle_command(&mut self, command: PipelineCommand) {
        match command {
            PipelineCommand::TestInput {
                slot,
                target,
                value,
                reply,
            } => {
                let result = match self.slots.get_mut(&slot) {
                    Some(runtime) => {
                        debug!("Slot {}: test input {:?} = {}", slot, target, value);
                        runtime.overlay.set(target, value);
                        Ok(())
                    }
                    None => Err(RegistryError::SlotNotFound(slot)),
                };
                // Der Client kann inzwischen weg sein
                let _ = reply.send(result);
            }
            PipelineCommand::Focus { class, title } => {
                if let Some(profile) = self.autoswitch.on_focus(&class, &title) {
                    match self.registry.activate_all(&profile) {
                        Ok(count) => debug!("Focus '{}': {} slots on '{}'", class, count, profile),
                        Err(e) => {
                            warn!("Autoswitch to {} failed: {}", profile, e);
                            self.bus
                                .publish(DaemonEvent::error("autoswitch", format!("profile {e} not found")));
                        }
                    }
                }
            }
        }
    }

    /// One pass over all slots.
    pub fn tick(&mut self, now: Instant) {
        for (slot, runtime) in self.slots.iter_mut() {
            let state = runtime.overlay.apply(*runtime.state_rx.borrow_and_update());

            if self.settings.diagnostics {
                for (button, pressed) in state.button_changes(&runtime.last_state) {
                    self.bus.publish(DaemonEvent::Button {
                        slot: *slot,
                        button,
                        pressed,
                    });
                }
            }
            runtime.last_state = state;

            let profile = runtime.profile_rx.borrow_and_update().clone();
            let actions = runtime.engine.apply(&state, &profile, now);

            for action in &actions {
                match action {
                    Action::SwitchProfile(name) => {
                        if let Err(e) = self.registry.activate(*slot, name) {
                            warn!("Slot {}: profile switch failed: {}", slot, e);
                            self.bus.publish(DaemonEvent::error(
                                "profile",
                                format!("slot {slot}: profile {e} not found"),
                            ));
                        }
                    }
                    Action::Haptic(request) => {
                        if let Err(e) = runtime.haptic_tx.try_send(*request) {
                            debug!("Slot {}: haptic request dropped: {}", slot, e);
                        }
                    }
                    _ => {}
                }
            }

            runtime.sink.emit(&actions);
            for e in runtime.sink.flush_at(now) {
                self.bus.publish(DaemonEvent::error("output", e.to_string()));
            }
        }
    }

    /// Release every slot's outputs.
    pub fn shutdown(&mut self) {
        let slots: Vec<u8> = self.slots.keys().copied().collect();
        for slot in slots {
            self.detach(slot);
        }
        info!("MappingEngineManager stopped");
    }

    pub async fn run(
        mut self,
        mut slot_rx: mpsc::UnboundedReceiver<SlotChange>,
        mut command_rx: mpsc::Receiver<PipelineCommand>,
        cancel: CancellationToken,
    ) {
        let mut interval = tokio::time::interval(self.settings.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(change) = slot_rx.recv() => self.handle_slot_change(change),
                Some(command) = command_rx.recv() => self.handle_command(command),
                _ = interval.tick() => self.tick(Instant::now()),
            }
        }
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::state::Axis2;

    #[test]
    fn overlay_sets_and_clears() {
        let mut overlay = TestOverlay::default();
        overlay.set(TestTarget::Button(Button::A), 1);
        overlay.set(TestTarget::Field(Field::StickX), 40000);

        let state = overlay.apply(ControllerState::default());
        assert!(state.pressed(Button::A));
        assert_eq!(state.stick, Axis2::new(32767, 0));

        overlay.set(TestTarget::Button(Button::A), 0);
        overlay.set(TestTarget::Field(Field::StickX), 0);
        assert!(overlay.is_empty());
    }

    #[test]
    fn test_targets_parse() {
        assert_eq!(TestTarget::from_name("a"), Some(TestTarget::Button(Button::A)));
        assert_eq!(TestTarget::from_name("rtrig"), Some(TestTarget::Field(Field::RTrig)));
        assert_eq!(TestTarget::from_name("GYRO_YAW"), Some(TestTarget::Field(Field::GyroYaw)));
        assert_eq!(TestTarget::from_name("WHEEL"), None);
    }
}
