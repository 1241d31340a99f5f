//! Device manager: enumerates controllers, owns their sessions and assigns
//! player slots.
//!
//! # Slots
//!
//! A slot is assigned when a controller becomes usable: on open for wired
//! devices, on link-up for wireless receivers. The lowest free index wins.
//! Slots are released on link-down or disconnect, and a controller that was
//! waiting for a slot takes the freed one.
//!
//! # Retries
//!
//! Devices that could not be opened for lack of permission, or that went
//! silent, are retried after `retry_interval`. A session that gave up on
//! malformed reports is reopened right away.
//!
//! Enumeration and opening block on the HID stack, so they run on the
//! blocking pool. The slot table is locked only to pick candidates and to
//! install the sessions that were opened.

use crate::control::events::{DaemonEvent, EventBus};
use crate::controller::decoder::generic::GenericDevice;
use crate::controller::descriptor::{classify, device_filters, ControllerDescriptor, DeviceFilter};
use crate::controller::haptics::HapticRequest;
use crate::controller::state::ControllerState;
use crate::device::error::DeviceError;
use crate::device::session::{
    DeviceSession, DisconnectReason, Opening, SessionEvent, SessionEventKind, SessionHandle, SessionLink,
    SessionSettings, SessionStatus,
};
use crate::device::transport::{DeviceTransport, HotplugEvent};
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Clone, Debug)]
pub struct ManagerSettings {
    pub max_slots: u8,
    pub retry_interval: Duration,
    pub session: SessionSettings,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            max_slots: 4,
            retry_interval: Duration::from_millis(5000),
            session: SessionSettings::default(),
        }
    }
}

/// Slot lifecycle notifications for the mapping pipeline.
#[derive(Debug)]
pub enum SlotChange {
    Attached {
        slot: u8,
        descriptor: ControllerDescriptor,
        state_rx: watch::Receiver<ControllerState>,
        haptic_tx: mpsc::Sender<HapticRequest>,
    },
    Detached {
        slot: u8,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub slot: Option<u8>,
    pub descriptor: ControllerDescriptor,
    pub status: SessionStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceFailure {
    pub path: String,
    pub error: String,
    pub at: DateTime<Local>,
}

struct SessionEntry {
    handle: SessionHandle,
    descriptor: ControllerDescriptor,
    slot: Option<u8>,
    state_rx: watch::Receiver<ControllerState>,
    status_rx: watch::Receiver<SessionStatus>,
    haptic_tx: mpsc::Sender<HapticRequest>,
}

#[derive(Default)]
struct SlotTable {
    sessions: HashMap<String, SessionEntry>,
    slots: BTreeMap<u8, String>,
    retry: HashMap<String, Instant>,
    failures: HashMap<String, DeviceFailure>,
}

impl SlotTable {
    fn free_slot(&self, max_slots: u8) -> Option<u8> {
        (0..max_slots).find(|slot| !self.slots.contains_key(slot))
    }
}

struct Shared {
    transport: Arc<dyn DeviceTransport>,
    generic: Vec<GenericDevice>,
    filters: Vec<DeviceFilter>,
    settings: ManagerSettings,
    slots_tx: mpsc::UnboundedSender<SlotChange>,
    session_tx: mpsc::UnboundedSender<SessionEvent>,
    bus: EventBus,
    cancel: CancellationToken,
    table: Mutex<SlotTable>,
    next_session_id: AtomicU64,
}

/// A device opened (or not) off the runtime, waiting to be installed.
struct Opened {
    descriptor: ControllerDescriptor,
    result: Result<(DeviceSession<Opening>, SessionLink), DeviceError>,
}

#[derive(Clone)]
pub struct DeviceManager {
    shared: Arc<Shared>,
}

impl DeviceManager {
    pub fn new(
        transport: Arc<dyn DeviceTransport>,
        generic: Vec<GenericDevice>,
        settings: ManagerSettings,
        slots_tx: mpsc::UnboundedSender<SlotChange>,
        bus: EventBus,
        cancel: CancellationToken,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let filters = device_filters(&generic);
        let manager = Self {
            shared: Arc::new(Shared {
                transport,
                generic,
                filters,
                settings,
                slots_tx,
                session_tx,
                bus,
                cancel,
                table: Mutex::new(SlotTable::default()),
                next_session_id: AtomicU64::new(0),
            }),
        };
        (manager, session_rx)
    }

    /// Enumerate and open every recognized controller not yet in a session.
    /// Returns the number of sessions opened.
    pub async fn rescan(&self) -> Result<usize, DeviceError> {
        let manager = self.clone();
        let probed = tokio::task::spawn_blocking(move || manager.probe())
            .await
            .map_err(|e| DeviceError::Transport(format!("device scan aborted: {e}")))??;

        let mut table = self.shared.table.lock();
        let mut opened = 0;
        for device in probed {
            if self.install(&mut table, device) {
                opened += 1;
            }
        }

        if opened > 0 {
            info!("Opened {} controller session(s)", opened);
        }
        Ok(opened)
    }

    /// Blocking half of [`rescan`](Self::rescan).
    fn probe(&self) -> Result<Vec<Opened>, DeviceError> {
        let candidates = self.shared.transport.enumerate(&self.shared.filters)?;
        let now = Instant::now();

        let pending: Vec<ControllerDescriptor> = {
            let mut table = self.shared.table.lock();
            table
                .retry
                .retain(|path, _| candidates.iter().any(|c| &c.path == path));
            candidates
                .iter()
                .filter(|c| !table.sessions.contains_key(&c.path))
                .filter(|c| !table.retry.get(&c.path).is_some_and(|due| now < *due))
                .filter_map(|c| classify(c, &self.shared.generic))
                .collect()
        };

        Ok(pending
            .into_iter()
            .map(|descriptor| {
                let id = self.shared.next_session_id.fetch_add(1, Ordering::Relaxed) + 1;
                let result = DeviceSession::<Opening>::open(
                    id,
                    descriptor.clone(),
                    self.shared.transport.as_ref(),
                    self.shared.settings.session.clone(),
                    self.shared.session_tx.clone(),
                );
                Opened { descriptor, result }
            })
            .collect())
    }

    fn install(&self, table: &mut SlotTable, opened: Opened) -> bool {
        let Opened { descriptor, result } = opened;
        let path = descriptor.path.clone();

        match result {
            Ok((session, link)) => {
                if table.sessions.contains_key(&path) {
                    debug!("{} got a session meanwhile, closing the duplicate", path);
                    return false;
                }
                table.retry.remove(&path);
                table.failures.remove(&path);
                let handle = SessionHandle::spawn(session, self.shared.cancel.child_token());
                let wired = !descriptor.is_wireless();
                info!("Controller {} ({}) on {}", descriptor.name, descriptor.family, path);
                table.sessions.insert(
                    path.clone(),
                    SessionEntry {
                        handle,
                        descriptor,
                        slot: None,
                        state_rx: link.state_rx,
                        status_rx: link.status_rx,
                        haptic_tx: link.haptic_tx,
                    },
                );
                if wired {
                    self.attach_slot(table, &path);
                }
                true
            }
            Err(e) => {
                match &e {
                    DeviceError::PermissionDenied(_) => {
                        warn!("No access to {}, will retry: {}", path, e);
                    }
                    _ => error!("Failed to open {}: {}", path, e),
                }
                self.record_failure(table, &path, &e.to_string());
                table
                    .retry
                    .insert(path, Instant::now() + self.shared.settings.retry_interval);
                false
            }
        }
    }

    fn record_failure(&self, table: &mut SlotTable, path: &str, error: &str) {
        table.failures.insert(
            path.to_string(),
            DeviceFailure {
                path: path.to_string(),
                error: error.to_string(),
                at: Local::now(),
            },
        );
        self.shared
            .bus
            .publish(DaemonEvent::error(path.to_string(), error.to_string()));
    }

    fn attach_slot(&self, table: &mut SlotTable, path: &str) {
        let Some(slot) = table.free_slot(self.shared.settings.max_slots) else {
            warn!("All {} slots in use, {} waits", self.shared.settings.max_slots, path);
            return;
        };
        let Some(entry) = table.sessions.get_mut(path) else {
            return;
        };
        if entry.slot.is_some() {
            return;
        }

        entry.slot = Some(slot);
        let change = SlotChange::Attached {
            slot,
            descriptor: entry.descriptor.clone(),
            state_rx: entry.state_rx.clone(),
            haptic_tx: entry.haptic_tx.clone(),
        };
        let event = DaemonEvent::DeviceAttached {
            slot,
            path: path.to_string(),
            name: entry.descriptor.name.clone(),
            family: entry.descriptor.family.to_string(),
        };
        table.slots.insert(slot, path.to_string());

        info!("Slot {} -> {}", slot, path);
        if self.shared.slots_tx.send(change).is_err() {
            debug!("Pipeline gone, slot {} not announced", slot);
        }
        self.shared.bus.publish(event);
    }

    fn release_slot(&self, table: &mut SlotTable, path: &str, reassign: bool) {
        let Some(slot) = table.sessions.get_mut(path).and_then(|entry| entry.slot.take()) else {
            return;
        };
        table.slots.remove(&slot);
        info!("Slot {} released by {}", slot, path);

        if self.shared.slots_tx.send(SlotChange::Detached { slot }).is_err() {
            debug!("Pipeline gone, slot {} release not announced", slot);
        }
        self.shared.bus.publish(DaemonEvent::DeviceDetached {
            slot,
            path: path.to_string(),
        });

        if !reassign {
            return;
        }
        // Hand the slot to a linked controller that was left without one
        let waiting = table
            .sessions
            .iter()
            .filter(|(p, entry)| {
                p.as_str() != path && entry.slot.is_none() && entry.status_rx.borrow().linked
            })
            .map(|(p, _)| p.clone())
            .min();
        if let Some(waiting) = waiting {
            self.attach_slot(table, &waiting);
        }
    }

    pub async fn handle_session_event(&self, event: SessionEvent) {
        let mut rescan = false;
        {
            let mut table = self.shared.table.lock();
            let current = table
                .sessions
                .get(&event.path)
                .is_some_and(|entry| entry.handle.id == event.session_id);
            if !current {
                debug!("Ignoring event from stale session {}: {:?}", event.session_id, event.kind);
                return;
            }

            match event.kind {
                SessionEventKind::LinkUp => self.attach_slot(&mut table, &event.path),
                SessionEventKind::LinkDown => self.release_slot(&mut table, &event.path, true),
                SessionEventKind::Gap(gap) => {
                    debug!("{} lost {} report(s)", event.path, gap.lost)
                }
                SessionEventKind::Disconnected(reason) => {
                    self.release_slot(&mut table, &event.path, true);
                    table.sessions.remove(&event.path);

                    if reason != DisconnectReason::Shutdown {
                        self.shared.bus.publish(DaemonEvent::DeviceLost {
                            path: event.path.clone(),
                            reason: format!("{:?}", reason),
                        });
                    }
                    match reason {
                        DisconnectReason::ReadTimeout | DisconnectReason::TransportLost => {
                            self.record_failure(&mut table, &event.path, &format!("{:?}", reason));
                            table.retry.insert(
                                event.path.clone(),
                                Instant::now() + self.shared.settings.retry_interval,
                            );
                        }
                        DisconnectReason::ForcedReconnect => rescan = true,
                        DisconnectReason::Shutdown => {}
                    }
                }
            }
        }

        if rescan {
            info!("Reopening {} after malformed reports", event.path);
            if let Err(e) = self.rescan().await {
                error!("Rescan failed: {}", e);
            }
        }
    }

    pub async fn handle_hotplug(&self, event: HotplugEvent) {
        match event {
            HotplugEvent::Attached(path) => {
                debug!("Hotplug add {}", path);
                self.shared.table.lock().retry.remove(&path);
                if let Err(e) = self.rescan().await {
                    error!("Rescan after hotplug failed: {}", e);
                }
            }
            HotplugEvent::Detached(path) => {
                let mut table = self.shared.table.lock();
                table.retry.remove(&path);
                if !table.sessions.contains_key(&path) {
                    return;
                }
                info!("{} unplugged", path);
                self.release_slot(&mut table, &path, true);
                if let Some(entry) = table.sessions.remove(&path) {
                    entry.handle.cancel();
                }
            }
        }
    }

    fn retry_due(&self) -> bool {
        let now = Instant::now();
        self.shared.table.lock().retry.values().any(|due| now >= *due)
    }

    /// Sorted by slot; slotless devices last.
    pub fn devices(&self) -> Vec<DeviceInfo> {
        let table = self.shared.table.lock();
        let mut devices: Vec<DeviceInfo> = table
            .sessions
            .values()
            .map(|entry| DeviceInfo {
                slot: entry.slot,
                descriptor: entry.descriptor.clone(),
                status: entry.status_rx.borrow().clone(),
            })
            .collect();
        devices.sort_by(|a, b| {
            (a.slot.is_none(), a.slot, &a.descriptor.path).cmp(&(b.slot.is_none(), b.slot, &b.descriptor.path))
        });
        devices
    }

    pub fn failures(&self) -> Vec<DeviceFailure> {
        let table = self.shared.table.lock();
        let mut failures: Vec<DeviceFailure> = table.failures.values().cloned().collect();
        failures.sort_by(|a, b| a.path.cmp(&b.path));
        failures
    }

    pub fn occupied_slots(&self) -> Vec<u8> {
        self.shared.table.lock().slots.keys().copied().collect()
    }

    pub fn has_slot(&self, slot: u8) -> bool {
        self.shared.table.lock().slots.contains_key(&slot)
    }

    /// Latest published state and device info of the controller in `slot`.
    pub fn slot_state(&self, slot: u8) -> Option<(DeviceInfo, ControllerState)> {
        let table = self.shared.table.lock();
        let path = table.slots.get(&slot)?;
        let entry = table.sessions.get(path)?;
        let info = DeviceInfo {
            slot: entry.slot,
            descriptor: entry.descriptor.clone(),
            status: entry.status_rx.borrow().clone(),
        };
        let state = *entry.state_rx.borrow();
        Some((info, state))
    }

    /// Drive session and hotplug notifications until cancelled.
    pub async fn run(
        self,
        mut session_rx: mpsc::UnboundedReceiver<SessionEvent>,
        mut hotplug_rx: mpsc::UnboundedReceiver<HotplugEvent>,
    ) {
        if let Err(e) = self.rescan().await {
            error!("Initial device scan failed: {}", e);
            self.shared
                .bus
                .publish(DaemonEvent::error("enumerate", e.to_string()));
        }

        let mut hotplug_alive = true;
        let mut retry_tick = tokio::time::interval(self.shared.settings.retry_interval.max(Duration::from_millis(10)));
        retry_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!("Device manager running");

        loop {
            tokio::select! {
                _ = self.shared.cancel.cancelled() => break,
                Some(event) = session_rx.recv() => self.handle_session_event(event).await,
                event = hotplug_rx.recv(), if hotplug_alive => match event {
                    Some(event) => self.handle_hotplug(event).await,
                    None => {
                        warn!("Hotplug notifications stopped, falling back to periodic scans");
                        hotplug_alive = false;
                    }
                },
                _ = retry_tick.tick() => {
                    if !hotplug_alive || self.retry_due() {
                        if let Err(e) = self.rescan().await {
                            debug!("Periodic rescan failed: {}", e);
                        }
                    }
                }
            }
        }
        debug!("Device manager loop exited");
    }

    /// Stop every session, releasing their slots, and wait up to `grace` for
    /// the read threads to exit.
    pub async fn shutdown(&self, grace: Duration) {
        let handles: Vec<SessionHandle> = {
            let mut table = self.shared.table.lock();
            let paths: Vec<String> = table.sessions.keys().cloned().collect();
            for path in &paths {
                self.release_slot(&mut table, path, false);
            }
            table.sessions.drain().map(|(_, entry)| entry.handle).collect()
        };
        for handle in &handles {
            handle.cancel();
        }

        info!("Stopping {} session(s)", handles.len());
        let deadline = Instant::now() + grace;
        for handle in handles {
            let remaining = deadline.saturating_duration_since(Instant::now());
            handle.join(remaining).await;
        }
    }
}
