use color_eyre::{eyre::eyre, Result};
use padbridge::config::{config_path, DaemonConfig};
use padbridge::daemon::{Backends, Daemon};
use padbridge::device::hid::HidTransport;
use padbridge::device::hotplug::UdevHotplug;
use padbridge::output::UinputFactory;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let path = config_path();
    info!("Loading configuration from {}", path.display());
    let config = DaemonConfig::load_from(&path)
        .await
        .map_err(|e| eyre!("Failed to load configuration: {}", e))?;

    let transport = HidTransport::new().map_err(|e| eyre!("Failed to initialize HID access: {}", e))?;
    let backends = Backends {
        transport: Arc::new(transport),
        hotplug: Some(Box::new(UdevHotplug)),
        factory: Arc::new(UinputFactory::new(config.output.clone())),
    };

    let cancel = CancellationToken::new();
    let daemon = Daemon::start(config, backends, cancel.clone()).map_err(|e| eyre!("Failed to start: {}", e))?;

    // Signale lösen den geordneten Shutdown aus
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("Waiting for Ctrl-C failed: {}", e);
                }
                info!("Interrupted");
            }
            _ = terminate.recv() => info!("Terminated"),
            _ = cancel.cancelled() => {}
        }
        cancel.cancel();
    });

    daemon.run_until_cancelled().await;
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}
