//! Device session: one open controller channel and its blocking read loop.
//!
//! # State Machine
//!
//! ```text
//! Opening ──► Active ◄──► Stalled
//!               │            │
//!               └─────┬──────┘
//!                     ▼
//!               Disconnected (terminal)
//! ```
//!
//! A session is created by [`DeviceSession::open`], initialized into
//! `Active` and then driven by [`run`] on a dedicated blocking thread. Every
//! read is bounded by the configured timeout, so cancellation and liveness
//! are reassessed at least once per timeout.
//!
//! Observers never touch the session. They get a latest-value `watch` cell
//! for [`ControllerState`], another for [`SessionStatus`], and a bounded queue
//! for haptic requests.

use crate::controller::decoder::{DecodeOutcome, LinkStatus, PacketGap, ReportDecoder};
use crate::controller::descriptor::ControllerDescriptor;
use crate::controller::haptics::{HapticRequest, OutputReport};
use crate::controller::state::ControllerState;
use crate::device::error::DeviceError;
use crate::device::transport::{DeviceChannel, DeviceTransport};
use chrono::{DateTime, Local};
use serde::Serialize;
use statum::{machine, state};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// Session settings
#[derive(Clone, Debug)]
pub struct SessionSettings {
    pub read_timeout: Duration,
    pub max_read_timeouts: u32,
    pub max_malformed_reports: u32,
    pub haptic_queue: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(1000),
            max_read_timeouts: 3,
            max_malformed_reports: 3,
            haptic_queue: 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    ReadTimeout,
    TransportLost,
    ForcedReconnect,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    Opening,
    Active,
    Stalled,
    Disconnected,
}

/// Published diagnostics for one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub phase: ConnectionPhase,
    pub linked: bool,
    pub reports: u64,
    pub malformed: u64,
    pub gaps: u64,
    pub lost_packets: u64,
    pub timeouts: u64,
    pub battery: Option<u8>,
    pub last_report: Option<DateTime<Local>>,
    pub disconnect_reason: Option<DisconnectReason>,
}

impl SessionStatus {
    fn new(linked: bool) -> Self {
        Self {
            phase: ConnectionPhase::Opening,
            linked,
            reports: 0,
            malformed: 0,
            gaps: 0,
            lost_packets: 0,
            timeouts: 0,
            battery: None,
            last_report: None,
            disconnect_reason: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEventKind {
    LinkUp,
    LinkDown,
    Gap(PacketGap),
    Disconnected(DisconnectReason),
}

/// Notification from a session thread to the device manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub session_id: u64,
    pub path: String,
    pub kind: SessionEventKind,
}

/// Receiving ends handed to the manager when a session opens.
pub struct SessionLink {
    pub state_rx: watch::Receiver<ControllerState>,
    pub status_rx: watch::Receiver<SessionStatus>,
    pub haptic_tx: mpsc::Sender<HapticRequest>,
}

#[state]
#[derive(Debug, Clone)]
pub enum SessionState {
    Opening,
    Active,
    Stalled,
    Disconnected(DisconnectReason),
}

#[machine]
pub struct DeviceSession<S: SessionState> {
    id: u64,
    descriptor: ControllerDescriptor,
    channel: Option<Box<dyn DeviceChannel>>,
    decoder: ReportDecoder,
    settings: SessionSettings,
    state_tx: watch::Sender<ControllerState>,
    status_tx: watch::Sender<SessionStatus>,
    haptic_rx: mpsc::Receiver<HapticRequest>,
    events: mpsc::UnboundedSender<SessionEvent>,
    pending_stop: Option<(Instant, OutputReport)>,
    buffer: Vec<u8>,
    linked: bool,
    consecutive_timeouts: u32,
    consecutive_malformed: u32,
}

enum ReadResult {
    Report(usize),
    Timeout,
    Lost(String),
}

// Methods available in all states
impl<S: SessionState> DeviceSession<S> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn descriptor(&self) -> &ControllerDescriptor {
        &self.descriptor
    }

    fn notify(&self, kind: SessionEventKind) {
        let event = SessionEvent {
            session_id: self.id,
            path: self.descriptor.path.clone(),
            kind,
        };
        if self.events.send(event).is_err() {
            debug!("Device manager gone, dropping session event for {}", self.descriptor.path);
        }
    }

    fn set_phase(&self, phase: ConnectionPhase) {
        self.status_tx.send_modify(|status| status.phase = phase);
    }

    fn send_report(&mut self, report: &OutputReport, what: &str) {
        let Some(channel) = self.channel.as_mut() else {
            return;
        };
        if let Err(e) = channel.send(report) {
            warn!("{} write to {} failed, dropped: {}", what, self.descriptor.path, e);
        }
    }

    fn send_init(&mut self) {
        for report in self.decoder.init_reports() {
            self.send_report(&report, "Init");
        }
    }

    fn set_linked(&mut self, linked: bool) {
        if self.linked == linked {
            return;
        }
        self.linked = linked;
        self.consecutive_timeouts = 0;
        self.status_tx.send_modify(|status| status.linked = linked);

        if linked {
            info!("Wireless controller linked on {}", self.descriptor.path);
            self.send_init();
            self.notify(SessionEventKind::LinkUp);
        } else {
            info!("Wireless controller unlinked on {}", self.descriptor.path);
            self.decoder.reset();
            self.state_tx.send_replace(ControllerState::default());
            self.pending_stop = None;
            self.notify(SessionEventKind::LinkDown);
        }
    }

    /// Write queued haptic requests. Failures are logged and dropped.
    fn flush_haptics(&mut self) {
        if let Some((due, _)) = &self.pending_stop {
            if Instant::now() >= *due {
                if let Some((_, report)) = self.pending_stop.take() {
                    self.send_report(&report, "Haptic stop");
                }
            }
        }

        while let Ok(request) = self.haptic_rx.try_recv() {
            if !self.linked {
                debug!("Dropping haptic request for unlinked {}", self.descriptor.path);
                continue;
            }
            match self.decoder.haptic(&request) {
                Some(command) => {
                    self.send_report(&command.start, "Haptic");
                    self.pending_stop = command.stop.map(|(after, report)| (Instant::now() + after, report));
                }
                None => debug!("{} has no haptics, request dropped", self.descriptor.family),
            }
        }
    }

    fn read(&mut self) -> ReadResult {
        let Some(channel) = self.channel.as_mut() else {
            return ReadResult::Lost("channel released".into());
        };
        match channel.read_timeout(&mut self.buffer, self.settings.read_timeout) {
            Ok(0) => ReadResult::Timeout,
            Ok(len) => ReadResult::Report(len),
            Err(e) => ReadResult::Lost(e.to_string()),
        }
    }

    /// Decode one report. Returns `false` once malformed reports have piled
    /// up past the limit and the session should reconnect.
    fn handle_report(&mut self, len: usize) -> bool {
        self.consecutive_timeouts = 0;
        let outcome = self.decoder.decode(&self.buffer[..len]);

        match outcome {
            Ok(outcome) => {
                self.consecutive_malformed = 0;
                match outcome {
                    DecodeOutcome::State { state, gap } => {
                        if !self.linked {
                            self.set_linked(true);
                        }
                        if let Some(gap) = gap {
                            debug!(
                                "Sequence gap on {}: expected {}, got {} ({} lost)",
                                self.descriptor.path, gap.expected, gap.got, gap.lost
                            );
                            self.notify(SessionEventKind::Gap(gap));
                        }
                        self.state_tx.send_replace(state);
                        self.status_tx.send_modify(|status| {
                            status.reports += 1;
                            status.last_report = Some(Local::now());
                            if state.battery.is_some() {
                                status.battery = state.battery;
                            }
                            if let Some(gap) = gap {
                                status.gaps += 1;
                                status.lost_packets += gap.lost as u64;
                            }
                        });
                    }
                    DecodeOutcome::Link(LinkStatus::Connected) => self.set_linked(true),
                    DecodeOutcome::Link(LinkStatus::Disconnected) => self.set_linked(false),
                    DecodeOutcome::Battery(level) => {
                        self.status_tx.send_modify(|status| status.battery = Some(level));
                    }
                    DecodeOutcome::Idle => {}
                }
                true
            }
            Err(e) => {
                self.consecutive_malformed += 1;
                self.status_tx.send_modify(|status| status.malformed += 1);
                warn!(
                    "Malformed report from {} ({} in a row): {}",
                    self.descriptor.path, self.consecutive_malformed, e
                );
                self.consecutive_malformed < self.settings.max_malformed_reports
            }
        }
    }

    /// A timed-out read. Returns `true` when the timeout counts toward
    /// disconnection.
    fn note_timeout(&mut self) -> bool {
        if !self.linked {
            // Dongle without a controller: silence is expected
            return false;
        }
        self.consecutive_timeouts += 1;
        self.status_tx.send_modify(|status| status.timeouts += 1);
        true
    }

    fn release(&mut self, reason: DisconnectReason) {
        self.channel = None;
        self.pending_stop = None;
        self.state_tx.send_replace(ControllerState::default());
        self.status_tx.send_modify(|status| {
            status.phase = ConnectionPhase::Disconnected;
            status.disconnect_reason = Some(reason);
        });
        match reason {
            DisconnectReason::Shutdown => {
                info!("Session for {} closed", self.descriptor.path)
            }
            _ => warn!("Session for {} disconnected: {:?}", self.descriptor.path, reason),
        }
        self.notify(SessionEventKind::Disconnected(reason));
    }
}

impl DeviceSession<Opening> {
    /// Open the device channel and prepare a session for it.
    pub fn open(
        id: u64,
        descriptor: ControllerDescriptor,
        transport: &dyn DeviceTransport,
        settings: SessionSettings,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<(Self, SessionLink), DeviceError> {
        let decoder = ReportDecoder::for_descriptor(&descriptor)?;
        let channel = transport.open(&descriptor)?;

        let linked = !descriptor.is_wireless();
        let (state_tx, state_rx) = watch::channel(ControllerState::default());
        let (status_tx, status_rx) = watch::channel(SessionStatus::new(linked));
        let (haptic_tx, haptic_rx) = mpsc::channel(settings.haptic_queue.max(1));
        // Room for oversized reports, so they fail the length check
        let buffer = vec![0u8; decoder.report_len() + 16];

        debug!(
            "Opened session {} for {} ({}), wireless: {}",
            id,
            descriptor.path,
            descriptor.family,
            descriptor.is_wireless()
        );

        let session = Self::new(
            id,
            descriptor,
            Some(channel),
            decoder,
            settings,
            state_tx,
            status_tx,
            haptic_rx,
            events,
            None,
            buffer,
            linked,
            0,
            0,
        );
        let link = SessionLink {
            state_rx,
            status_rx,
            haptic_tx,
        };
        Ok((session, link))
    }

    /// Send the family's init commands and start reading.
    pub fn initialize(mut self) -> DeviceSession<Active> {
        if self.linked {
            self.send_init();
        }
        self.set_phase(ConnectionPhase::Active);
        info!("Session for {} active", self.descriptor.path);
        self.transition()
    }
}

/// Where the read loop currently is.
pub enum SessionPhase {
    Active(DeviceSession<Active>),
    Stalled(DeviceSession<Stalled>),
    Disconnected(DeviceSession<Disconnected>),
}

impl SessionPhase {
    fn shutdown(self) -> SessionPhase {
        match self {
            SessionPhase::Active(s) => SessionPhase::Disconnected(s.disconnect(DisconnectReason::Shutdown)),
            SessionPhase::Stalled(s) => SessionPhase::Disconnected(s.disconnect(DisconnectReason::Shutdown)),
            done @ SessionPhase::Disconnected(_) => done,
        }
    }
}

impl DeviceSession<Active> {
    pub fn step(mut self) -> SessionPhase {
        self.flush_haptics();
        match self.read() {
            ReadResult::Report(len) => {
                if self.handle_report(len) {
                    SessionPhase::Active(self)
                } else {
                    SessionPhase::Disconnected(self.disconnect(DisconnectReason::ForcedReconnect))
                }
            }
            ReadResult::Timeout => {
                if !self.note_timeout() {
                    return SessionPhase::Active(self);
                }
                if self.consecutive_timeouts >= self.settings.max_read_timeouts {
                    return SessionPhase::Disconnected(self.disconnect(DisconnectReason::ReadTimeout));
                }
                debug!("Read timeout on {}, session stalled", self.descriptor.path);
                self.set_phase(ConnectionPhase::Stalled);
                SessionPhase::Stalled(self.transition())
            }
            ReadResult::Lost(reason) => {
                error!("Lost {}: {}", self.descriptor.path, reason);
                SessionPhase::Disconnected(self.disconnect(DisconnectReason::TransportLost))
            }
        }
    }

    fn disconnect(mut self, reason: DisconnectReason) -> DeviceSession<Disconnected> {
        self.release(reason);
        self.transition_with(reason)
    }
}

impl DeviceSession<Stalled> {
    pub fn step(mut self) -> SessionPhase {
        self.flush_haptics();
        match self.read() {
            ReadResult::Report(len) => {
                if !self.handle_report(len) {
                    return SessionPhase::Disconnected(self.disconnect(DisconnectReason::ForcedReconnect));
                }
                info!("{} responding again", self.descriptor.path);
                self.set_phase(ConnectionPhase::Active);
                SessionPhase::Active(self.transition())
            }
            ReadResult::Timeout => {
                if !self.note_timeout() {
                    // Link dropped while stalled
                    self.set_phase(ConnectionPhase::Active);
                    return SessionPhase::Active(self.transition());
                }
                if self.consecutive_timeouts >= self.settings.max_read_timeouts {
                    SessionPhase::Disconnected(self.disconnect(DisconnectReason::ReadTimeout))
                } else {
                    SessionPhase::Stalled(self)
                }
            }
            ReadResult::Lost(reason) => {
                error!("Lost {}: {}", self.descriptor.path, reason);
                SessionPhase::Disconnected(self.disconnect(DisconnectReason::TransportLost))
            }
        }
    }

    fn disconnect(mut self, reason: DisconnectReason) -> DeviceSession<Disconnected> {
        self.release(reason);
        self.transition_with(reason)
    }
}

impl DeviceSession<Disconnected> {
    pub fn reason(&self) -> DisconnectReason {
        self.get_state_data()
            .copied()
            .unwrap_or(DisconnectReason::TransportLost)
    }
}

/// Drive a session until it disconnects or `cancel` fires.
pub fn run(session: DeviceSession<Active>, cancel: CancellationToken) -> DisconnectReason {
    let mut phase = SessionPhase::Active(session);
    loop {
        if cancel.is_cancelled() {
            phase = phase.shutdown();
        }
        phase = match phase {
            SessionPhase::Active(s) => s.step(),
            SessionPhase::Stalled(s) => s.step(),
            SessionPhase::Disconnected(s) => return s.reason(),
        };
    }
}

/// Running session thread, owned by the device manager.
pub struct SessionHandle {
    pub id: u64,
    cancel: CancellationToken,
    join: tokio::task::JoinHandle<DisconnectReason>,
}

impl SessionHandle {
    pub fn spawn(session: DeviceSession<Opening>, cancel: CancellationToken) -> Self {
        let id = session.id();
        let path = session.descriptor().path.clone();
        let token = cancel.clone();
        let join = tokio::task::spawn_blocking(move || {
            let active = session.initialize();
            let reason = run(active, token);
            debug!("Read loop for {} exited: {:?}", path, reason);
            reason
        });
        Self { id, cancel, join }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the read loop to exit, giving up after `grace`.
    pub async fn join(self, grace: Duration) -> Option<DisconnectReason> {
        self.cancel.cancel();
        match tokio::time::timeout(grace, self.join).await {
            Ok(Ok(reason)) => Some(reason),
            Ok(Err(e)) => {
                error!("Session thread {} panicked: {}", self.id, e);
                None
            }
            Err(_) => {
                warn!("Session {} did not stop within {:?}", self.id, grace);
                None
            }
        }
    }
}
