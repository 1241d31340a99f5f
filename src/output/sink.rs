//! Output sink of one slot.
//!
//! Actions are collected with [`OutputSink::emit`] and written once per tick
//! by [`OutputSink::flush`]. Targets held by several bindings are reference
//! counted so the device sees one press and one release. Relative axes add
//! up over the tick; absolute axes take the clamped sum of this tick's
//! contributions and fall back to 0 when nothing drives them.

use crate::mapping::action::Action;
use crate::output::codes::{self, CodeKind, OutputClass, OutputCode};
use crate::output::device::{OutputError, OutputEvent, VirtualDeviceFactory, VirtualOutput};
use crate::output::RateLimiter;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Minimum spacing of attempts to recreate a failed device
pub const RECREATE_INTERVAL: Duration = Duration::from_secs(1);

enum DeviceSlot {
    Ready(Box<dyn VirtualOutput>),
    Failed(RateLimiter),
}

pub struct OutputSink {
    slot: u8,
    factory: Arc<dyn VirtualDeviceFactory>,
    devices: HashMap<OutputClass, DeviceSlot>,
    held: HashMap<OutputCode, u32>,
    /// Tastenflanken in Reihenfolge
    keys: Vec<OutputEvent>,
    key_classes: Vec<OutputClass>,
    relative: BTreeMap<OutputCode, i32>,
    absolute: BTreeMap<OutputCode, i32>,
    last_absolute: BTreeMap<OutputCode, i32>,
}

impl OutputSink {
    pub fn new(slot: u8, factory: Arc<dyn VirtualDeviceFactory>) -> Self {
        Self {
            slot,
            factory,
            devices: HashMap::new(),
            held: HashMap::new(),
            keys: Vec::new(),
            key_classes: Vec::new(),
            relative: BTreeMap::new(),
            absolute: BTreeMap::new(),
            last_absolute: BTreeMap::new(),
        }
    }

    pub fn slot(&self) -> u8 {
        self.slot
    }

    pub fn is_held(&self, target: OutputCode) -> bool {
        self.held.get(&target).is_some_and(|count| *count > 0)
    }

    fn push_key(&mut self, target: OutputCode, value: i32) {
        self.keys.push(OutputEvent {
            kind: CodeKind::Key,
            code: target.code,
            value,
        });
        self.key_classes.push(target.class);
    }

    /// Queue actions for the next flush. Profile switches and haptics are
    /// not output events and are ignored here.
    pub fn emit(&mut self, actions: &[Action]) {
        for action in actions {
            match action {
                Action::Button { target, pressed: true } => {
                    let count = self.held.entry(*target).or_insert(0);
                    *count += 1;
                    if *count == 1 {
                        self.push_key(*target, 1);
                    }
                }
                Action::Button { target, pressed: false } => {
                    if let Some(count) = self.held.get_mut(target) {
                        *count -= 1;
                        if *count == 0 {
                            self.held.remove(target);
                            self.push_key(*target, 0);
                        }
                    }
                }
                Action::Axis { target, value } => {
                    *self.absolute.entry(*target).or_insert(0) += *value;
                }
                Action::Delta { target, delta } => {
                    *self.relative.entry(*target).or_insert(0) += *delta;
                }
                Action::SwitchProfile(_) | Action::Haptic(_) => {
                    trace!("Slot {}: {:?} is not an output event", self.slot, action);
                }
            }
        }
    }

    /// Write this tick's events. Failures drop the affected device and its
    /// events; the device is recreated later on demand.
    pub fn flush(&mut self) -> Vec<OutputError> {
        self.flush_at(Instant::now())
    }

    pub fn flush_at(&mut self, now: Instant) -> Vec<OutputError> {
        let mut batches: BTreeMap<OutputClass, Vec<OutputEvent>> = BTreeMap::new();

        for (event, class) in self.keys.drain(..).zip(self.key_classes.drain(..)) {
            batches.entry(class).or_default().push(event);
        }

        let absolute = std::mem::take(&mut self.absolute);
        let mut targets: Vec<OutputCode> = self.last_absolute.keys().copied().collect();
        targets.extend(absolute.keys().copied());
        targets.sort_unstable();
        targets.dedup();
        for target in targets {
            let (min, max) = codes::abs_range(target.code);
            let value = absolute.get(&target).copied().unwrap_or(0).clamp(min, max);
            if self.last_absolute.get(&target).copied().unwrap_or(0) != value {
                self.last_absolute.insert(target, value);
                batches.entry(target.class).or_default().push(OutputEvent {
                    kind: CodeKind::Abs,
                    code: target.code,
                    value,
                });
            }
        }

        for (target, delta) in std::mem::take(&mut self.relative) {
            if delta != 0 {
                batches.entry(target.class).or_default().push(OutputEvent {
                    kind: CodeKind::Rel,
                    code: target.code,
                    value: delta,
                });
            }
        }

        let mut errors = Vec::new();
        for (class, events) in batches {
            if let Err(e) = self.write(class, &events, now) {
                errors.push(e);
            }
        }
        errors
    }

    fn write(&mut self, class: OutputClass, events: &[OutputEvent], now: Instant) -> Result<(), OutputError> {
        let slot = self.slot;
        let entry = self
            .devices
            .entry(class)
            .or_insert_with(|| DeviceSlot::Failed(RateLimiter::new(RECREATE_INTERVAL)));

        if let DeviceSlot::Failed(limiter) = &mut *entry {
            if !limiter.should_process(now) {
                trace!("Slot {}: virtual {} still unavailable, {} events dropped", slot, class, events.len());
                return Ok(());
            }
            match self.factory.create(class, slot) {
                Ok(device) => *entry = DeviceSlot::Ready(device),
                Err(e) => {
                    warn!("Slot {}: {}", slot, e);
                    return Err(e);
                }
            }
        }

        let DeviceSlot::Ready(device) = &mut *entry else {
            return Ok(());
        };
        match device.emit(events) {
            Ok(()) => {
                debug!("Slot {}: {} events to virtual {}", slot, events.len(), class);
                Ok(())
            }
            Err(e) => {
                warn!("Slot {}: virtual {} dropped: {}", slot, class, e);
                *entry = DeviceSlot::Failed(RateLimiter::started_at(RECREATE_INTERVAL, now));
                // Das Gerät ist weg, der Kernel hat seine Tasten losgelassen
                self.held.retain(|code, _| code.class != class);
                self.last_absolute.retain(|code, _| code.class != class);
                Err(e)
            }
        }
    }

    /// Release everything this slot holds and write it out.
    pub fn release_all(&mut self) -> Vec<OutputError> {
        let mut held: Vec<OutputCode> = self.held.drain().map(|(code, _)| code).collect();
        held.sort_unstable();
        for target in held {
            self.push_key(target, 0);
        }
        self.absolute.clear();
        self.relative.clear();
        self.flush()
    }
}
