//! Transceiver Modules Management Daemon
//!
//! Main entry point for the modulesmgrd daemon.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sonic_modulesmgrd::config::DEFAULT_CONFIG_PATH;
use sonic_modulesmgrd::{
    EngineSettings, ModuleChanges, ModulesMgmtTask, ModulesMgrConfig, PollMultiplexer,
    RedisStateTable, ResultPublisher, ShutdownCoordinator, SysfsAttributes, SysfsEepromReader,
    SystemdNotifier, detect_independent_mode, discover_port_count,
};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// SONiC transceiver modules management daemon
#[derive(Parser, Debug)]
#[command(name = "modulesmgrd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level used when RUST_LOG is not set
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Number of physical ports, overrides the configuration
    #[arg(short = 'p', long)]
    port_count: Option<usize>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(&args.log_level) {
        eprintln!("modulesmgrd: {:#}", e);
        return ExitCode::FAILURE;
    }

    info!("modulesmgrd: Starting transceiver modules management daemon");

    match run_daemon(args).await {
        Ok(()) => {
            info!("modulesmgrd: Daemon exiting normally");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %format!("{:#}", e), "modulesmgrd: Daemon exiting with error");
            ExitCode::FAILURE
        }
    }
}

/// Initialize structured logging
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Invalid log level")?;

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("Failed to set logger")?;
    Ok(())
}

async fn run_daemon(args: Args) -> Result<()> {
    let mut config = ModulesMgrConfig::load_or_default(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    if let Some(count) = args.port_count {
        config.platform.port_count = Some(count);
    }
    config.validate().context("Invalid configuration")?;

    let independent_mode = detect_independent_mode(&config.platform.sai_profile_path)
        .context("Failed to read SAI profile")?;
    let port_count = discover_port_count(&config.platform).context("Failed to discover ports")?;
    info!(
        port_count,
        independent_mode,
        sysfs_root = %config.platform.sysfs_root.display(),
        "modulesmgrd: Platform detected"
    );

    let shutdown = ShutdownCoordinator::new();
    setup_signal_handlers(shutdown.clone());

    let (tx, rx) = mpsc::channel(config.channel.capacity);
    let consumer = tokio::spawn(consume_changes(rx));

    let table = RedisStateTable::new(&config.namespaces, config.timing.publish_timeout())
        .context("Failed to open STATE_DB")?;
    let publisher = ResultPublisher::new(
        config.namespace_names(),
        Box::new(tx),
        Arc::new(table),
        config.timing.publish_timeout(),
    );

    let attrs = SysfsAttributes::from_config(&config.platform, &config.attributes);
    let eeprom = Arc::new(SysfsEepromReader::new(attrs.clone()));
    let settings = EngineSettings::from_config(&config, independent_mode, port_count);

    let mut task = ModulesMgmtTask::new(
        attrs,
        eeprom,
        Box::new(PollMultiplexer::new()),
        publisher,
        settings,
        shutdown,
    )
    .with_notifier(SystemdNotifier::new());

    // The engine blocks on poll(2) and sleeps between sweeps.
    tokio::task::spawn_blocking(move || task.run())
        .await
        .context("Module detection task failed")?;

    if let Err(e) = consumer.await {
        warn!(error = %e, "modulesmgrd: Change consumer ended abnormally");
    }

    info!("modulesmgrd: Graceful shutdown complete");
    Ok(())
}

/// Logs every published change-set.
async fn consume_changes(mut rx: mpsc::Receiver<ModuleChanges>) {
    while let Some(changes) = rx.recv().await {
        match serde_json::to_string(&changes) {
            Ok(json) => info!(changes = %json, "modulesmgrd: Module changes"),
            Err(e) => warn!(error = %e, "modulesmgrd: Failed to encode module changes"),
        }
    }
}

/// Setup signal handlers for graceful shutdown
fn setup_signal_handlers(shutdown: ShutdownCoordinator) {
    tokio::spawn(async move {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                warn!(error = %e, "modulesmgrd: Cannot install SIGTERM handler");
                if signal::ctrl_c().await.is_ok() {
                    info!("modulesmgrd: Received SIGINT");
                    shutdown.request_shutdown();
                }
                return;
            }
        };

        tokio::select! {
            _ = signal::ctrl_c() => info!("modulesmgrd: Received SIGINT"),
            _ = sigterm.recv() => info!("modulesmgrd: Received SIGTERM"),
        }
        shutdown.request_shutdown();
    });
}
