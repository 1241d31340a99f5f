//! In-memory stand-ins for hidraw and uinput, shared by the integration tests.
#![allow(dead_code)]

use padbridge::config::DaemonConfig;
use padbridge::controller::descriptor::{classify, BusType, ControllerDescriptor, DeviceCandidate, DeviceFilter};
use padbridge::controller::haptics::OutputReport;
use padbridge::controller::{ControllerState, ReportDecoder};
use padbridge::daemon::{Backends, Daemon};
use padbridge::device::{DeviceChannel, DeviceError, DeviceTransport, TransportError};
use padbridge::output::{codes, CodeKind, OutputClass, OutputError, OutputEvent, VirtualDeviceFactory, VirtualOutput};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio_util::sync::CancellationToken;

pub const SONY: u16 = 0x054C;
pub const DS4: u16 = 0x05C4;

#[derive(Default)]
pub struct FakeDevice {
    pub candidate: Option<DeviceCandidate>,
    queue: Mutex<VecDeque<Vec<u8>>>,
    /// Report repeated whenever the queue is empty, like a polling controller
    streaming: Mutex<Option<Vec<u8>>>,
    unplugged: Mutex<bool>,
    pub sent: Mutex<Vec<OutputReport>>,
}

struct FakeChannel(Arc<FakeDevice>);

impl DeviceChannel for FakeChannel {
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        if *self.0.unplugged.lock() {
            return Err(TransportError::Disconnected("unplugged".into()));
        }
        let next = self.0.queue.lock().pop_front();
        let report = match next {
            Some(report) => Some(report),
            None => self.0.streaming.lock().clone(),
        };
        match report {
            Some(report) => {
                std::thread::sleep(Duration::from_millis(1));
                let len = report.len().min(buf.len());
                buf[..len].copy_from_slice(&report[..len]);
                Ok(len)
            }
            None => {
                std::thread::sleep(timeout);
                Ok(0)
            }
        }
    }

    fn send(&mut self, report: &OutputReport) -> Result<(), TransportError> {
        self.0.sent.lock().push(report.clone());
        Ok(())
    }
}

/// Transport over a set of fake hidraw nodes.
#[derive(Default)]
pub struct FakeHid {
    devices: Mutex<BTreeMap<String, Arc<FakeDevice>>>,
}

impl FakeHid {
    pub fn plug(&self, candidate: DeviceCandidate) -> Arc<FakeDevice> {
        let device = Arc::new(FakeDevice {
            candidate: Some(candidate.clone()),
            ..Default::default()
        });
        self.devices.lock().insert(candidate.path, Arc::clone(&device));
        device
    }

    pub fn unplug(&self, path: &str) {
        if let Some(device) = self.devices.lock().remove(path) {
            *device.unplugged.lock() = true;
        }
    }
}

impl DeviceTransport for FakeHid {
    fn enumerate(&self, filters: &[DeviceFilter]) -> Result<Vec<DeviceCandidate>, DeviceError> {
        Ok(self
            .devices
            .lock()
            .values()
            .filter_map(|d| d.candidate.clone())
            .filter(|c| {
                filters
                    .iter()
                    .any(|f| f.vendor_id == c.vendor_id && f.product_id == c.product_id)
            })
            .collect())
    }

    fn open(&self, descriptor: &ControllerDescriptor) -> Result<Box<dyn DeviceChannel>, DeviceError> {
        let devices = self.devices.lock();
        let device = devices
            .get(&descriptor.path)
            .ok_or_else(|| DeviceError::NotFound(descriptor.path.clone()))?;
        Ok(Box::new(FakeChannel(Arc::clone(device))))
    }
}

impl FakeDevice {
    pub fn push(&self, report: Vec<u8>) {
        self.queue.lock().push_back(report);
    }

    pub fn stream(&self, report: Option<Vec<u8>>) {
        *self.streaming.lock() = report;
    }
}

pub fn ds4_candidate(path: &str) -> DeviceCandidate {
    DeviceCandidate {
        vendor_id: SONY,
        product_id: DS4,
        interface: 0,
        bus: BusType::Usb,
        path: path.into(),
        serial: None,
        product: Some("Wireless Controller".into()),
    }
}

/// Raw DS4 USB report carrying `state`.
pub fn ds4_report(state: &ControllerState) -> Vec<u8> {
    let descriptor = classify(&ds4_candidate("/dev/hidraw-fixture"), &[]).expect("DS4 is a known device");
    let decoder = ReportDecoder::for_descriptor(&descriptor).expect("DS4 decoder");
    decoder.encode_state(state).expect("DS4 fixture encodes")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Emitted {
    pub class: OutputClass,
    pub slot: u8,
    pub event: OutputEvent,
}

struct FakeOutput {
    class: OutputClass,
    slot: u8,
    log: Arc<Mutex<Vec<Emitted>>>,
}

impl VirtualOutput for FakeOutput {
    fn emit(&mut self, events: &[OutputEvent]) -> Result<(), OutputError> {
        let mut log = self.log.lock();
        log.extend(events.iter().map(|event| Emitted {
            class: self.class,
            slot: self.slot,
            event: *event,
        }));
        Ok(())
    }
}

/// Records everything written to virtual devices.
#[derive(Default)]
pub struct FakeUinput {
    pub log: Arc<Mutex<Vec<Emitted>>>,
    pub unavailable: bool,
}

impl FakeUinput {
    pub fn events(&self) -> Vec<Emitted> {
        self.log.lock().clone()
    }

    /// Values written to `name` (e.g. `BTN_A`) on `slot`.
    pub fn values(&self, slot: u8, name: &str) -> Vec<i32> {
        let code = codes::lookup(name).expect("known output code");
        self.log
            .lock()
            .iter()
            .filter(|e| e.slot == slot && e.class == code.class && e.event.kind == code.kind && e.event.code == code.code)
            .map(|e| e.event.value)
            .collect()
    }

    pub fn key_presses(&self, slot: u8, name: &str) -> usize {
        self.values(slot, name).iter().filter(|v| **v == 1).count()
    }
}

impl VirtualDeviceFactory for FakeUinput {
    fn probe(&self) -> Result<(), OutputError> {
        if self.unavailable {
            return Err(OutputError::Backend("/dev/uinput missing".into()));
        }
        Ok(())
    }

    fn create(&self, class: OutputClass, slot: u8) -> Result<Box<dyn VirtualOutput>, OutputError> {
        Ok(Box::new(FakeOutput {
            class,
            slot,
            log: Arc::clone(&self.log),
        }))
    }
}

pub fn key_event(name: &str, value: i32) -> OutputEvent {
    let code = codes::lookup(name).expect("known output code");
    assert_eq!(code.kind, CodeKind::Key);
    OutputEvent {
        kind: CodeKind::Key,
        code: code.code,
        value,
    }
}

/// Fast timings and a private socket.
pub fn test_config(dir: &Path) -> DaemonConfig {
    let mut config = DaemonConfig::default();
    config.control.socket_path = dir.join("padbridge.sock");
    config.control.idle_timeout = Duration::from_secs(5);
    config.daemon.tick_interval_ms = 2;
    config.daemon.read_timeout_ms = 10;
    config.daemon.retry_interval_ms = 50;
    config.daemon.shutdown_grace_ms = 500;
    config
}

pub struct Harness {
    pub daemon: Daemon,
    pub hid: Arc<FakeHid>,
    pub uinput: Arc<FakeUinput>,
    pub cancel: CancellationToken,
    pub dir: tempfile::TempDir,
}

impl Harness {
    pub fn start(configure: impl FnOnce(&mut DaemonConfig)) -> Self {
        Self::start_with(Arc::new(FakeHid::default()), configure)
    }

    pub fn start_with(hid: Arc<FakeHid>, configure: impl FnOnce(&mut DaemonConfig)) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut config = test_config(dir.path());
        configure(&mut config);

        let uinput = Arc::new(FakeUinput::default());
        let backends = Backends {
            transport: hid.clone(),
            hotplug: None,
            factory: uinput.clone(),
        };
        let cancel = CancellationToken::new();
        let daemon = Daemon::start(config, backends, cancel.clone()).expect("daemon starts");
        Self {
            daemon,
            hid,
            uinput,
            cancel,
            dir,
        }
    }

    pub fn socket_path(&self) -> std::path::PathBuf {
        self.dir.path().join("padbridge.sock")
    }

    pub async fn stop(self) {
        self.daemon.shutdown().await;
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    pub async fn connect(path: &Path) -> Self {
        let stream = UnixStream::connect(path).await.expect("control socket accepts");
        let (read_half, writer) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer,
        }
    }

    pub async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .expect("request written");
    }

    /// Write bytes as they are, without a trailing newline.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(bytes).await
    }

    /// Next line, or `None` at EOF.
    pub async fn read_line(&mut self) -> Option<String> {
        let mut line = String::new();
        let read = tokio::time::timeout(Duration::from_secs(5), self.reader.read_line(&mut line))
            .await
            .expect("daemon answers in time")
            .expect("socket readable");
        (read > 0).then(|| line.trim_end().to_string())
    }

    /// Whether the daemon closed the connection. A reset counts as closed.
    pub async fn closed(&mut self) -> bool {
        let mut line = String::new();
        let read = tokio::time::timeout(Duration::from_secs(5), self.reader.read_line(&mut line))
            .await
            .expect("daemon answers in time");
        matches!(read, Ok(0) | Err(_))
    }

    /// Send a request and return its response, collecting interleaved events.
    pub async fn request(&mut self, line: &str) -> (String, Vec<String>) {
        self.send(line).await;
        let mut events = Vec::new();
        loop {
            let line = self.read_line().await.expect("response before EOF");
            if line.starts_with("EVENT ") {
                events.push(line);
            } else {
                return (line, events);
            }
        }
    }
}

pub fn ok_payload(line: &str) -> serde_json::Value {
    let json = line
        .strip_prefix("OK ")
        .unwrap_or_else(|| panic!("expected OK response, got {line}"));
    serde_json::from_str(json).expect("OK payload is JSON")
}
