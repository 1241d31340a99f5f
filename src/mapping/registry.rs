//! Profilverwaltung: geladene Profile und das aktive Profil je Slot.
//!
//! Jeder Slot hat einen `watch`-Kanal mit seinem aktiven Profil. Die
//! Pipeline liest ihn einmal pro Tick; ein Wechsel tauscht nur den `Arc`,
//! ein Tick sieht also immer genau ein Profil.

use crate::control::events::{DaemonEvent, EventBus};
use crate::mapping::error::{ProfileConfigError, RegistryError};
use crate::mapping::profile::{Profile, ProfileConfig, DEFAULT_PROFILE};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

pub struct ProfileRegistry {
    profiles: RwLock<BTreeMap<String, Arc<Profile>>>,
    default_name: RwLock<String>,
    slots: Mutex<BTreeMap<u8, watch::Sender<Arc<Profile>>>>,
    bus: EventBus,
}

impl ProfileRegistry {
    /// Registry mit dem eingebauten Standardprofil.
    pub fn new(bus: EventBus) -> Result<Self, ProfileConfigError> {
        let builtin = Arc::new(Profile::from_config(&ProfileConfig::builtin_default())?);
        let mut profiles = BTreeMap::new();
        profiles.insert(builtin.name.clone(), builtin);
        Ok(Self {
            profiles: RwLock::new(profiles),
            default_name: RwLock::new(DEFAULT_PROFILE.to_string()),
            slots: Mutex::new(BTreeMap::new()),
            bus,
        })
    }

    /// Load the given profiles and pick the default. Invalid profiles are
    /// skipped and reported; the rest still load.
    pub fn with_profiles(
        bus: EventBus,
        configs: &[ProfileConfig],
        default_profile: Option<&str>,
    ) -> Result<(Self, Vec<ProfileConfigError>), ProfileConfigError> {
        let registry = Self::new(bus)?;
        let mut rejected = Vec::new();
        for config in configs {
            if let Err(e) = registry.install(config) {
                rejected.push(e);
            }
        }
        if let Some(name) = default_profile {
            registry.set_default(name)?;
        }
        Ok((registry, rejected))
    }

    /// Validate and store a profile. On error the previous version of the
    /// profile (if any) stays in place.
    pub fn install(&self, config: &ProfileConfig) -> Result<Arc<Profile>, ProfileConfigError> {
        let profile = match Profile::from_config(config) {
            Ok(profile) => Arc::new(profile),
            Err(e) => {
                warn!("Profile '{}' rejected: {}", config.name, e);
                self.bus
                    .publish(DaemonEvent::error("profile", format!("profile '{}' rejected: {}", config.name, e)));
                return Err(e);
            }
        };

        self.profiles
            .write()
            .insert(profile.name.clone(), Arc::clone(&profile));

        // Slots, die das Profil gerade nutzen, bekommen die neue Fassung
        for sender in self.slots.lock().values() {
            sender.send_if_modified(|active| {
                if active.name == profile.name {
                    *active = Arc::clone(&profile);
                    true
                } else {
                    false
                }
            });
        }
        info!("Profile '{}' installed ({} bindings)", profile.name, profile.bindings.len());
        Ok(profile)
    }

    pub fn set_default(&self, name: &str) -> Result<(), ProfileConfigError> {
        if !self.profiles.read().contains_key(name) {
            return Err(ProfileConfigError::UnknownProfile(name.to_string()));
        }
        *self.default_name.write() = name.to_string();
        Ok(())
    }

    pub fn default_name(&self) -> String {
        self.default_name.read().clone()
    }

    pub fn default_profile(&self) -> Arc<Profile> {
        let profiles = self.profiles.read();
        let name = self.default_name.read();
        match profiles.get(name.as_str()) {
            Some(profile) => Arc::clone(profile),
            // set_default prüft den Namen, Profile werden nie entfernt
            None => profiles
                .values()
                .next()
                .cloned()
                .unwrap_or_else(|| Arc::new(Profile {
                    name: DEFAULT_PROFILE.to_string(),
                    bindings: Vec::new(),
                    groups: Vec::new(),
                })),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Profile>> {
        self.profiles.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.profiles.read().keys().cloned().collect()
    }

    /// A new slot starts on the default profile.
    pub fn attach(&self, slot: u8) -> watch::Receiver<Arc<Profile>> {
        let profile = self.default_profile();
        let mut slots = self.slots.lock();
        let sender = slots.entry(slot).or_insert_with(|| watch::channel(Arc::clone(&profile)).0);
        sender.send_replace(profile);
        sender.subscribe()
    }

    pub fn detach(&self, slot: u8) {
        self.slots.lock().remove(&slot);
    }

    pub fn active(&self, slot: u8) -> Option<Arc<Profile>> {
        self.slots.lock().get(&slot).map(|s| s.borrow().clone())
    }

    pub fn active_slots(&self) -> Vec<(u8, String)> {
        self.slots
            .lock()
            .iter()
            .map(|(slot, s)| (*slot, s.borrow().name.clone()))
            .collect()
    }

    pub fn activate(&self, slot: u8, name: &str) -> Result<(), RegistryError> {
        let profile = self
            .get(name)
            .ok_or_else(|| RegistryError::ProfileNotFound(name.to_string()))?;
        {
            let slots = self.slots.lock();
            let sender = slots.get(&slot).ok_or(RegistryError::SlotNotFound(slot))?;
            sender.send_replace(profile);
        }
        info!("Slot {} switched to profile '{}'", slot, name);
        self.bus.publish(DaemonEvent::ProfileChanged {
            slot,
            profile: name.to_string(),
        });
        Ok(())
    }

    /// Switch every slot at once. Returns the number of slots switched.
    pub fn activate_all(&self, name: &str) -> Result<usize, RegistryError> {
        let profile = self
            .get(name)
            .ok_or_else(|| RegistryError::ProfileNotFound(name.to_string()))?;
        let switched: Vec<u8> = {
            let slots = self.slots.lock();
            for sender in slots.values() {
                sender.send_replace(Arc::clone(&profile));
            }
            slots.keys().copied().collect()
        };
        info!("All slots switched to profile '{}'", name);
        for slot in &switched {
            self.bus.publish(DaemonEvent::ProfileChanged {
                slot: *slot,
                profile: name.to_string(),
            });
        }
        Ok(switched.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::profile::BindingConfig;

    fn racing() -> ProfileConfig {
        ProfileConfig::new("Racing", vec![BindingConfig::new("RTRIG", "axis(ABS_RZ)")])
    }

    #[test]
    fn slots_start_on_default_and_switch() -> Result<(), Box<dyn std::error::Error>> {
        let (registry, rejected) = ProfileRegistry::with_profiles(EventBus::default(), &[racing()], None)?;
        assert!(rejected.is_empty());
        assert_eq!(registry.names(), vec!["Default".to_string(), "Racing".to_string()]);

        let rx = registry.attach(0);
        assert_eq!(rx.borrow().name, "Default");

        registry.activate(0, "Racing")?;
        assert!(rx.has_changed()?);
        assert_eq!(rx.borrow().name, "Racing");
        Ok(())
    }

    #[test]
    fn activation_errors() -> Result<(), ProfileConfigError> {
        let registry = ProfileRegistry::new(EventBus::default())?;
        registry.attach(1);
        assert_eq!(
            registry.activate(1, "Missing"),
            Err(RegistryError::ProfileNotFound("Missing".into()))
        );
        assert_eq!(registry.activate(2, "Default"), Err(RegistryError::SlotNotFound(2)));
        Ok(())
    }

    #[test]
    fn rejected_profile_keeps_previous_version() -> Result<(), Box<dyn std::error::Error>> {
        let registry = ProfileRegistry::new(EventBus::default())?;
        registry.install(&racing())?;
        let rx = registry.attach(0);
        registry.activate(0, "Racing")?;

        let mut broken = racing();
        broken.bindings.push(BindingConfig::new("RTRIG", "axis(ABS_Z)"));
        assert!(registry.install(&broken).is_err());
        assert_eq!(registry.get("Racing").map(|p| p.bindings.len()), Some(1));
        assert_eq!(rx.borrow().bindings.len(), 1);
        Ok(())
    }

    #[test]
    fn reinstall_updates_active_slots() -> Result<(), Box<dyn std::error::Error>> {
        let registry = ProfileRegistry::new(EventBus::default())?;
        registry.install(&racing())?;
        let rx = registry.attach(0);
        registry.activate(0, "Racing")?;

        let mut updated = racing();
        updated.bindings.push(BindingConfig::new("LTRIG", "axis(ABS_Z)"));
        registry.install(&updated)?;
        assert_eq!(rx.borrow().bindings.len(), 2);
        Ok(())
    }

    #[test]
    fn activate_all_switches_every_slot() -> Result<(), Box<dyn std::error::Error>> {
        let registry = ProfileRegistry::new(EventBus::default())?;
        registry.install(&racing())?;
        let a = registry.attach(0);
        let b = registry.attach(3);
        assert_eq!(registry.activate_all("Racing")?, 2);
        assert_eq!(a.borrow().name, "Racing");
        assert_eq!(b.borrow().name, "Racing");
        assert_eq!(
            registry.active_slots(),
            vec![(0, "Racing".to_string()), (3, "Racing".to_string())]
        );
        Ok(())
    }

    #[test]
    fn unknown_default_is_rejected() -> Result<(), ProfileConfigError> {
        let registry = ProfileRegistry::new(EventBus::default())?;
        assert_eq!(
            registry.set_default("Nope"),
            Err(ProfileConfigError::UnknownProfile("Nope".into()))
        );
        Ok(())
    }
}
