//! Wires the device manager, mapping pipeline and control server together
//! and runs them until cancelled.
//!
//! ```text
//!  hotplug thread ──► DeviceManager ──SlotChange──► MappingEngineManager ──► uinput
//!                         ▲   │                          ▲
//!                         │   └── EventBus ──┐           │ PipelineCommand
//!                         │                  ▼           │
//!                         └──────────── ControlServer ───┘
//! ```

use crate::config::DaemonConfig;
use crate::control::events::{DaemonEvent, EventBus};
use crate::control::server::{ControlContext, ControlServer};
use crate::device::manager::DeviceManager;
use crate::device::transport::{DeviceTransport, HotplugSource};
use crate::mapping::autoswitch::Autoswitcher;
use crate::mapping::error::ProfileConfigError;
use crate::mapping::manager::MappingEngineManager;
use crate::mapping::registry::ProfileRegistry;
use crate::output::device::{OutputError, VirtualDeviceFactory};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const PIPELINE_QUEUE: usize = 64;

/// Startup failures. Everything after startup is logged and reported as
/// events instead.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("virtual input devices unavailable: {0}")]
    Output(#[from] OutputError),

    #[error("control socket: {0}")]
    Socket(#[from] std::io::Error),

    #[error("built-in profile: {0}")]
    Profile(#[from] ProfileConfigError),
}

/// OS-facing backends, swapped for fakes in tests.
pub struct Backends {
    pub transport: Arc<dyn DeviceTransport>,
    pub hotplug: Option<Box<dyn HotplugSource>>,
    pub factory: Arc<dyn VirtualDeviceFactory>,
}

/// Handles into a running daemon.
pub struct Daemon {
    pub devices: DeviceManager,
    pub registry: Arc<ProfileRegistry>,
    pub bus: EventBus,
    cancel: CancellationToken,
    grace: Duration,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    hotplug: Option<JoinHandle<()>>,
}

fn build_registry(config: &DaemonConfig, bus: &EventBus) -> Result<Arc<ProfileRegistry>, DaemonError> {
    let (registry, rejected) = ProfileRegistry::with_profiles(bus.clone(), &config.profiles, None)?;
    for e in &rejected {
        warn!("Skipping profile: {}", e);
    }
    if let Some(name) = &config.default_profile {
        if let Err(e) = registry.set_default(name) {
            warn!("Default profile not usable, keeping '{}': {}", registry.default_name(), e);
            bus.publish(DaemonEvent::error("config", e.to_string()));
        }
    }
    info!(
        "{} profile(s) loaded, default '{}'",
        registry.names().len(),
        registry.default_name()
    );
    Ok(Arc::new(registry))
}

fn build_autoswitch(config: &DaemonConfig, registry: &ProfileRegistry) -> Result<Autoswitcher, DaemonError> {
    let default = registry.default_name();
    let autoswitch = match Autoswitcher::from_config(&config.autoswitch, &default) {
        Ok(autoswitch) => autoswitch,
        Err(e) => {
            warn!("Autoswitch disabled: {}", e);
            Autoswitcher::from_config(&[], &default)?
        }
    };
    for profile in autoswitch.profiles() {
        if registry.get(profile).is_none() {
            warn!("Autoswitch rule names unknown profile '{}'", profile);
        }
    }
    Ok(autoswitch)
}

impl Daemon {
    /// Start every component. Fails only when virtual devices cannot be
    /// created or the control socket cannot be bound.
    pub fn start(config: DaemonConfig, backends: Backends, cancel: CancellationToken) -> Result<Self, DaemonError> {
        backends.factory.probe()?;
        let server = ControlServer::bind(config.control.clone())?;

        let bus = EventBus::new();
        let registry = build_registry(&config, &bus)?;
        let autoswitch = build_autoswitch(&config, &registry)?;

        let (generic, broken) = config.generic_devices();
        for e in &broken {
            warn!("Ignoring {}", e);
        }

        let (slot_tx, slot_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::channel(PIPELINE_QUEUE);
        let (hotplug_tx, hotplug_rx) = mpsc::unbounded_channel();

        let (devices, session_rx) = DeviceManager::new(
            Arc::clone(&backends.transport),
            generic,
            config.daemon.manager_settings(),
            slot_tx,
            bus.clone(),
            cancel.clone(),
        );

        let pipeline = MappingEngineManager::new(
            Arc::clone(&registry),
            Arc::clone(&backends.factory),
            bus.clone(),
            autoswitch,
            config.daemon.pipeline_settings(),
        );

        let hotplug = match backends.hotplug {
            Some(source) => {
                let cancel = cancel.clone();
                Some(tokio::task::spawn_blocking(move || {
                    if let Err(e) = source.watch(hotplug_tx, cancel) {
                        error!("Hotplug watcher failed: {}", e);
                    }
                }))
            }
            None => {
                debug!("No hotplug source, relying on periodic scans");
                drop(hotplug_tx);
                None
            }
        };

        let context = Arc::new(ControlContext::new(
            devices.clone(),
            Arc::clone(&registry),
            command_tx,
            bus.clone(),
        ));

        let tasks = vec![
            ("pipeline", tokio::spawn(pipeline.run(slot_rx, command_rx, cancel.clone()))),
            ("devices", tokio::spawn(devices.clone().run(session_rx, hotplug_rx))),
            ("control", tokio::spawn(server.run(context, cancel.clone()))),
        ];

        info!("padbridge running");
        Ok(Self {
            devices,
            registry,
            bus,
            cancel,
            grace: config.daemon.shutdown_grace(),
            tasks,
            hotplug,
        })
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for cancellation, then stop sessions and tasks within the grace
    /// period.
    pub async fn run_until_cancelled(self) {
        self.cancel.cancelled().await;
        self.shutdown().await;
    }

    pub async fn shutdown(self) {
        info!("Shutting down (grace {:?})", self.grace);
        self.cancel.cancel();
        let deadline = Instant::now() + self.grace;

        self.devices.shutdown(self.grace).await;

        let mut handles = self.tasks;
        if let Some(hotplug) = self.hotplug {
            handles.push(("hotplug", hotplug));
        }
        for (name, handle) in handles {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, handle).await {
                Ok(Ok(())) => debug!("{} task stopped", name),
                Ok(Err(e)) => error!("{} task failed: {}", name, e),
                Err(_) => warn!("{} task did not stop within the grace period", name),
            }
        }
        info!("padbridge stopped");
    }
}
