//! Unix socket server for the line protocol.
//!
//! Each client gets its own task, a bounded outbound queue shared by
//! responses and subscribed events, and a writer task draining that queue.
//! A client whose queue overflows is disconnected.

use crate::control::events::{EventBus, EventClass};
use crate::control::protocol::{err_line, ok_line, parse_request, ControlError, Request};
use crate::device::manager::{DeviceInfo, DeviceManager};
use crate::mapping::manager::PipelineCommand;
use crate::mapping::registry::ProfileRegistry;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const SOCKET_NAME: &str = "padbridge.sock";

/// Longest request line accepted before the client is dropped. Also bounds
/// what is buffered for a line that never ends.
pub const MAX_LINE: usize = 4096;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlSettings {
    pub socket_path: PathBuf,
    pub client_queue: usize,
    /// Clients without a subscription that send nothing for this long are dropped.
    #[serde(with = "crate::config::millis")]
    pub idle_timeout: Duration,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            client_queue: 64,
            idle_timeout: Duration::from_secs(60),
        }
    }
}

pub fn default_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(SOCKET_NAME)
}

/// Per-client state the dispatcher needs for `SUBSCRIBE`.
pub struct ClientState {
    pub id: u64,
    subscription: Option<u64>,
    tx: mpsc::Sender<String>,
    disconnect: CancellationToken,
}

impl ClientState {
    pub fn new(id: u64, tx: mpsc::Sender<String>, disconnect: CancellationToken) -> Self {
        Self {
            id,
            subscription: None,
            tx,
            disconnect,
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    /// Queue a line for the writer. A full queue disconnects the client.
    pub fn send(&self, line: String) -> bool {
        match self.tx.try_send(line) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Client {} outbound queue full, disconnecting", self.id);
                self.disconnect.cancel();
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

#[derive(Serialize)]
struct DeviceEntry {
    #[serde(flatten)]
    info: DeviceInfo,
    profile: Option<String>,
}

/// Everything a request can touch. Shared by all clients.
pub struct ControlContext {
    pub devices: DeviceManager,
    pub registry: Arc<ProfileRegistry>,
    pub pipeline_tx: mpsc::Sender<PipelineCommand>,
    pub bus: EventBus,
}

impl ControlContext {
    pub fn new(
        devices: DeviceManager,
        registry: Arc<ProfileRegistry>,
        pipeline_tx: mpsc::Sender<PipelineCommand>,
        bus: EventBus,
    ) -> Self {
        Self {
            devices,
            registry,
            pipeline_tx,
            bus,
        }
    }

    /// Parse and execute one request line, returning the response line.
    pub async fn handle_line(&self, line: &str, client: &mut ClientState) -> String {
        let result = match parse_request(line) {
            Ok(request) => {
                debug!("Client {}: {:?}", client.id, request);
                self.dispatch(request, client).await
            }
            Err(e) => Err(e),
        };
        match result {
            Ok(payload) => ok_line(&payload),
            Err(e) => {
                debug!("Client {}: {} {}", client.id, e.kind(), e);
                err_line(&e)
            }
        }
    }

    pub async fn dispatch(&self, request: Request, client: &mut ClientState) -> Result<Value, ControlError> {
        match request {
            Request::GetState { slot } => {
                let (info, state) = self.devices.slot_state(slot).ok_or(ControlError::SlotNotFound(slot))?;
                let profile = self.registry.active(slot).map(|p| p.name.clone());
                Ok(json!({
                    "slot": slot,
                    "name": info.descriptor.name,
                    "family": info.descriptor.family,
                    "path": info.descriptor.path,
                    "linked": info.status.linked,
                    "profile": profile,
                    "state": state,
                }))
            }
            Request::SetProfile { slot, name } => {
                if self.registry.get(&name).is_none() {
                    return Err(ControlError::ProfileNotFound(name));
                }
                if !self.devices.has_slot(slot) {
                    return Err(ControlError::SlotNotFound(slot));
                }
                self.registry.activate(slot, &name)?;
                Ok(json!({ "slot": slot, "profile": name }))
            }
            Request::Subscribe { classes } => {
                let mut names: Vec<&str> = classes.iter().map(|c| c.name()).collect();
                names.sort_unstable();
                self.subscribe(client, classes);
                Ok(json!({ "subscribed": names }))
            }
            Request::ListDevices => {
                let devices: Vec<DeviceEntry> = self
                    .devices
                    .devices()
                    .into_iter()
                    .map(|info| {
                        let profile = info
                            .slot
                            .and_then(|slot| self.registry.active(slot))
                            .map(|p| p.name.clone());
                        DeviceEntry { info, profile }
                    })
                    .collect();
                Ok(json!({
                    "devices": devices,
                    "failures": self.devices.failures(),
                }))
            }
            Request::ListProfiles => Ok(json!({
                "profiles": self.registry.names(),
                "default": self.registry.default_name(),
                "active": self
                    .registry
                    .active_slots()
                    .into_iter()
                    .map(|(slot, name)| json!({ "slot": slot, "profile": name }))
                    .collect::<Vec<_>>(),
            })),
            Request::TestInput { slot, target, value } => {
                let (reply, reply_rx) = oneshot::channel();
                let command = PipelineCommand::TestInput {
                    slot,
                    target,
                    value,
                    reply,
                };
                // Ohne Pipeline gibt es keine belegten Slots
                if self.pipeline_tx.send(command).await.is_err() {
                    return Err(ControlError::SlotNotFound(slot));
                }
                match reply_rx.await {
                    Ok(result) => result?,
                    Err(_) => return Err(ControlError::SlotNotFound(slot)),
                }
                Ok(json!({ "slot": slot, "value": value }))
            }
            Request::Focus { class, title } => {
                let command = PipelineCommand::Focus {
                    class: class.clone(),
                    title,
                };
                if self.pipeline_tx.send(command).await.is_err() {
                    warn!("Pipeline gone, focus change to '{}' ignored", class);
                }
                Ok(json!({ "class": class }))
            }
        }
    }

    fn subscribe(&self, client: &mut ClientState, classes: HashSet<EventClass>) {
        match client.subscription {
            Some(id) if self.bus.update(id, classes.clone()) => {}
            _ => {
                let id = self
                    .bus
                    .subscribe(classes, client.tx.clone(), client.disconnect.clone());
                client.subscription = Some(id);
            }
        }
    }

    fn unsubscribe(&self, client: &mut ClientState) {
        if let Some(id) = client.subscription.take() {
            self.bus.unsubscribe(id);
        }
    }
}

pub struct ControlServer {
    listener: UnixListener,
    settings: ControlSettings,
}

impl ControlServer {
    /// Bind the socket, replacing a stale one. Fails if another instance
    /// still answers on the path.
    pub fn bind(settings: ControlSettings) -> io::Result<Self> {
        let path = &settings.socket_path;
        if path.exists() {
            if std::os::unix::net::UnixStream::connect(path).is_ok() {
                return Err(io::Error::new(
                    io::ErrorKind::AddrInUse,
                    format!("{} is served by another process", path.display()),
                ));
            }
            debug!("Removing stale socket {}", path.display());
            std::fs::remove_file(path)?;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(path)?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        info!("Control socket listening on {}", path.display());
        Ok(Self { listener, settings })
    }

    pub fn path(&self) -> &Path {
        &self.settings.socket_path
    }

    pub async fn run(self, context: Arc<ControlContext>, cancel: CancellationToken) {
        let mut clients = JoinSet::new();
        let mut next_id = 0u64;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        next_id += 1;
                        let client = ClientTask {
                            id: next_id,
                            context: Arc::clone(&context),
                            settings: self.settings.clone(),
                            disconnect: cancel.child_token(),
                        };
                        clients.spawn(client.serve(stream));
                    }
                    Err(e) => {
                        error!("Accept on control socket failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                Some(_) = clients.join_next(), if !clients.is_empty() => {}
            }
        }

        debug!("Control server stopping, {} client(s) connected", clients.len());
        while clients.join_next().await.is_some() {}
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.settings.socket_path) {
            debug!("Could not remove {}: {}", self.settings.socket_path.display(), e);
        }
    }
}

struct ClientTask {
    id: u64,
    context: Arc<ControlContext>,
    settings: ControlSettings,
    disconnect: CancellationToken,
}

impl ClientTask {
    async fn serve(self, stream: UnixStream) {
        let connected_at: DateTime<Local> = Local::now();
        let mut last_seen = connected_at;
        info!("Control client {} connected", self.id);

        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::channel(self.settings.client_queue.max(1));
        let writer = tokio::spawn(write_lines(self.id, write_half, rx, self.disconnect.clone()));

        let mut client = ClientState::new(self.id, tx, self.disconnect.clone());
        let mut reader = FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_LINE));

        loop {
            let read = tokio::select! {
                _ = self.disconnect.cancelled() => break,
                read = tokio::time::timeout(self.settings.idle_timeout, reader.next()) => read,
            };
            match read {
                // Teilweise gelesene Zeilen bleiben im Codec-Puffer
                Err(_) if client.is_subscribed() => continue,
                Err(_) => {
                    info!("Control client {} idle since {}, dropping", self.id, last_seen.format("%H:%M:%S"));
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(LinesCodecError::MaxLineLengthExceeded))) => {
                    warn!("Control client {} sent an oversized request", self.id);
                    break;
                }
                Ok(Some(Err(LinesCodecError::Io(e)))) => {
                    debug!("Control client {} read error: {}", self.id, e);
                    break;
                }
                Ok(Some(Ok(line))) => {
                    last_seen = Local::now();
                    let request = line.trim();
                    if request.is_empty() {
                        continue;
                    }
                    let response = self.context.handle_line(request, &mut client).await;
                    if !client.send(response) {
                        break;
                    }
                }
            }
        }

        self.context.unsubscribe(&mut client);
        drop(client);
        // Bereits eingereihte Antworten noch ausliefern
        match tokio::time::timeout(self.settings.idle_timeout, writer).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Writer of control client {} failed: {}", self.id, e),
            Err(_) => {
                self.disconnect.cancel();
                debug!("Writer of control client {} timed out", self.id);
            }
        }
        info!(
            "Control client {} disconnected (connected {}, last request {})",
            self.id,
            connected_at.format("%H:%M:%S"),
            last_seen.format("%H:%M:%S")
        );
    }
}

async fn write_lines(
    id: u64,
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::Receiver<String>,
    disconnect: CancellationToken,
) {
    loop {
        let line = tokio::select! {
            biased;
            _ = disconnect.cancelled() => break,
            line = rx.recv() => match line {
                Some(line) => line,
                None => break,
            },
        };
        let mut bytes = line.into_bytes();
        bytes.push(b'\n');
        if let Err(e) = writer.write_all(&bytes).await {
            debug!("Control client {} write failed: {}", id, e);
            disconnect.cancel();
            break;
        }
    }
    if let Err(e) = writer.shutdown().await {
        debug!("Control client {} shutdown: {}", id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_queue_disconnects_client() {
        let (tx, _rx) = mpsc::channel(1);
        let disconnect = CancellationToken::new();
        let client = ClientState::new(1, tx, disconnect.clone());
        assert!(client.send("OK {}".into()));
        assert!(!client.send("OK {}".into()));
        assert!(disconnect.is_cancelled());
    }

    #[test]
    fn settings_parse_from_toml() -> Result<(), toml::de::Error> {
        let settings: ControlSettings = toml::from_str(
            r#"
            socket_path = "/tmp/pb.sock"
            idle_timeout = 1500
            "#,
        )?;
        assert_eq!(settings.socket_path, PathBuf::from("/tmp/pb.sock"));
        assert_eq!(settings.idle_timeout, Duration::from_millis(1500));
        assert_eq!(settings.client_queue, 64);
        Ok(())
    }

    #[tokio::test]
    async fn bind_replaces_stale_socket() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("stale.sock");
        drop(std::os::unix::net::UnixListener::bind(&path)?);
        assert!(path.exists());

        let settings = ControlSettings {
            socket_path: path.clone(),
            ..ControlSettings::default()
        };
        let server = ControlServer::bind(settings.clone())?;
        assert!(matches!(
            ControlServer::bind(settings),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse
        ));
        drop(server);
        assert!(!path.exists());
        Ok(())
    }
}
