//! Daemon event fan-out to subscribed control clients.

use crate::controller::state::Button;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventClass {
    Device,
    Profile,
    Buttons,
    Errors,
}

impl EventClass {
    pub const ALL: [EventClass; 4] = [
        EventClass::Device,
        EventClass::Profile,
        EventClass::Buttons,
        EventClass::Errors,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EventClass::Device => "device",
            EventClass::Profile => "profile",
            EventClass::Buttons => "buttons",
            EventClass::Errors => "errors",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL.into_iter().find(|c| c.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for EventClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DaemonEvent {
    DeviceAttached {
        slot: u8,
        path: String,
        name: String,
        family: String,
    },
    DeviceDetached {
        slot: u8,
        path: String,
    },
    DeviceLost {
        path: String,
        reason: String,
    },
    ProfileChanged {
        slot: u8,
        profile: String,
    },
    Button {
        slot: u8,
        button: Button,
        pressed: bool,
    },
    Error {
        source: String,
        message: String,
    },
}

impl DaemonEvent {
    pub fn class(&self) -> EventClass {
        match self {
            DaemonEvent::DeviceAttached { .. }
            | DaemonEvent::DeviceDetached { .. }
            | DaemonEvent::DeviceLost { .. } => EventClass::Device,
            DaemonEvent::ProfileChanged { .. } => EventClass::Profile,
            DaemonEvent::Button { .. } => EventClass::Buttons,
            DaemonEvent::Error { .. } => EventClass::Errors,
        }
    }

    pub fn error(source: impl Into<String>, message: impl Into<String>) -> Self {
        DaemonEvent::Error {
            source: source.into(),
            message: message.into(),
        }
    }

    /// Wire form: `EVENT <class> <json>`.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        Ok(format!("EVENT {} {}", self.class(), serde_json::to_string(self)?))
    }
}

struct Subscriber {
    id: u64,
    classes: HashSet<EventClass>,
    tx: mpsc::Sender<String>,
    overflow: CancellationToken,
}

#[derive(Default)]
struct BusInner {
    next_id: u64,
    subscribers: Vec<Subscriber>,
}

/// Cheap to clone; every clone publishes to the same subscribers.
///
/// Publishing never blocks. A subscriber whose queue is full is dropped and
/// its `overflow` token cancelled, which disconnects the client.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &self,
        classes: HashSet<EventClass>,
        tx: mpsc::Sender<String>,
        overflow: CancellationToken,
    ) -> u64 {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        debug!("Subscriber {} registered for {:?}", id, classes);
        inner.subscribers.push(Subscriber {
            id,
            classes,
            tx,
            overflow,
        });
        id
    }

    /// Replace the class set of an existing subscriber.
    pub fn update(&self, id: u64, classes: HashSet<EventClass>) -> bool {
        let mut inner = self.inner.lock();
        match inner.subscribers.iter_mut().find(|s| s.id == id) {
            Some(subscriber) => {
                subscriber.classes = classes;
                true
            }
            None => false,
        }
    }

    pub fn unsubscribe(&self, id: u64) {
        self.inner.lock().subscribers.retain(|s| s.id != id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    pub fn publish(&self, event: DaemonEvent) {
        let class = event.class();
        let mut inner = self.inner.lock();
        if !inner.subscribers.iter().any(|s| s.classes.contains(&class)) {
            return;
        }

        let line = match event.to_line() {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to serialize {:?}: {}", event, e);
                return;
            }
        };

        inner.subscribers.retain(|subscriber| {
            if !subscriber.classes.contains(&class) {
                return true;
            }
            match subscriber.tx.try_send(line.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!("Subscriber {} is not keeping up, disconnecting", subscriber.id);
                    subscriber.overflow.cancel();
                    false
                }
                Err(TrySendError::Closed(_)) => false,
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classes(list: &[EventClass]) -> HashSet<EventClass> {
        list.iter().copied().collect()
    }

    #[test]
    fn event_lines_carry_class_and_json() -> Result<(), Box<dyn std::error::Error>> {
        let line = DaemonEvent::ProfileChanged {
            slot: 0,
            profile: "Desktop".into(),
        }
        .to_line()?;
        assert_eq!(
            line,
            r#"EVENT profile {"event":"profile_changed","slot":0,"profile":"Desktop"}"#
        );

        let line = DaemonEvent::Button {
            slot: 1,
            button: Button::DpadUp,
            pressed: true,
        }
        .to_line()?;
        assert!(line.starts_with("EVENT buttons "));
        assert!(line.contains(r#""button":"DPAD_UP""#));
        Ok(())
    }

    #[test]
    fn only_matching_classes_are_delivered() {
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::channel(8);
        bus.subscribe(classes(&[EventClass::Profile]), tx, CancellationToken::new());

        bus.publish(DaemonEvent::error("device", "boom"));
        bus.publish(DaemonEvent::ProfileChanged {
            slot: 0,
            profile: "Default".into(),
        });

        let line = rx.try_recv().expect("profile event delivered");
        assert!(line.starts_with("EVENT profile"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn full_subscriber_is_dropped_and_signalled() {
        let bus = EventBus::new();
        let (tx, _rx) = mpsc::channel(1);
        let overflow = CancellationToken::new();
        bus.subscribe(classes(&[EventClass::Errors]), tx, overflow.clone());

        bus.publish(DaemonEvent::error("a", "1"));
        assert!(!overflow.is_cancelled());
        bus.publish(DaemonEvent::error("a", "2"));

        assert!(overflow.is_cancelled());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn closed_subscribers_are_pruned() {
        let bus = EventBus::new();
        let (tx, rx) = mpsc::channel(4);
        bus.subscribe(classes(&EventClass::ALL), tx, CancellationToken::new());
        drop(rx);
        bus.publish(DaemonEvent::error("a", "1"));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn class_names_parse_case_insensitively() {
        assert_eq!(EventClass::from_name("Buttons"), Some(EventClass::Buttons));
        assert_eq!(EventClass::from_name("nope"), None);
    }
}
