// SPDX-License-Identifier: GPL-3.0-only

//! livecopy - install, upgrade and reset live system media
//!
//! Lists candidate devices, follows hotplug events and runs provisioning
//! batches on the devices named on the command line. Settings come from a
//! TOML configuration file.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::BufReader;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use livecopy_core::task::{self, Operation};
use livecopy_core::{
    BatchOutcome, EventGrammar, HotplugMonitor, Installer, Resetter, Session, SystemSource,
    Upgrader,
};
use livecopy_sys::{HostTools, LsblkResolver, MonitorKind, MonitorProcess};
use livecopy_types::{OperationMode, PrintMode, StorageDevice};

mod config;
mod console;

use config::{Config, LogConfig};
use console::ConsoleReporter;

#[derive(Parser)]
#[command(name = "livecopy")]
#[command(about = "Install, upgrade and reset live system USB media", long_about = None)]
struct Cli {
    /// Configuration file (default: /etc/livecopy/livecopy.toml)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Also write logs to daily files in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List devices that are candidates for an operation
    List {
        #[arg(value_enum, default_value_t = Mode::Install)]
        mode: Mode,
        /// Print the list as JSON
        #[arg(long)]
        json: bool,
    },
    /// Follow devices being plugged in and removed
    Watch {
        #[arg(value_enum, default_value_t = Mode::Install)]
        mode: Mode,
    },
    /// Install the live system onto devices
    Install {
        /// Device names, e.g. sdb or /dev/sdb
        #[arg(required = true)]
        devices: Vec<String>,
    },
    /// Upgrade the live system on devices, keeping user data
    Upgrade {
        #[arg(required = true)]
        devices: Vec<String>,
    },
    /// Reset devices to a clean state
    Reset {
        #[arg(required = true)]
        devices: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Install,
    Upgrade,
    Reset,
}

impl From<Mode> for OperationMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Install => OperationMode::Install,
            Mode::Upgrade => OperationMode::Upgrade,
            Mode::Reset => OperationMode::Reset,
        }
    }
}

fn init_logging(log: &LogConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("livecopy=info,warn"));

    let (file_layer, guard) = match &log.directory {
        Some(directory) => {
            std::fs::create_dir_all(directory)
                .with_context(|| format!("failed to create log directory {}", directory.display()))?;
            let appender = tracing_appender::rolling::daily(directory, "livecopy.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(guard)
}

fn host_session(config: &Config) -> Arc<Session> {
    Arc::new(Session::new(
        Arc::new(HostTools::new()),
        Arc::new(LsblkResolver::new()),
        config.session.clone(),
    ))
}

/// Refresh the mode's device list and pick the named devices from it.
async fn select_devices(
    session: &Session,
    mode: OperationMode,
    names: &[String],
) -> Result<Vec<StorageDevice>> {
    session.refresh(mode, &ConsoleReporter).await?;
    let listed = session.registry(mode).snapshot();
    names
        .iter()
        .map(|name| {
            let name = name.trim_start_matches("/dev/");
            listed
                .iter()
                .find(|device| device.device == name)
                .cloned()
                .with_context(|| format!("/dev/{name} is not eligible for {mode}"))
        })
        .collect()
}

async fn open_source(session: &Session, config: &Config) -> Result<SystemSource> {
    let source = match &config.source.iso {
        Some(iso) => SystemSource::from_iso(iso, session.mount_stack())
            .await
            .with_context(|| format!("failed to open {}", iso.display()))?,
        None => SystemSource::from_medium(&config.source.medium)
            .await
            .context("no live system to copy from")?,
    };
    tracing::info!(version = source.version(), "system source opened");
    Ok(source)
}

/// Run `operation` in the background, print its progress and request a stop
/// after the current device on Ctrl-C.
async fn follow(operation: Operation, devices: Vec<StorageDevice>, interactive: bool) -> Result<BatchOutcome> {
    let selector = interactive.then(console::document_prompt);
    let mut handle = task::spawn(operation, devices, selector);
    tracing::debug!(id = %handle.id, mode = %handle.mode, "operation started");

    let mut interrupted = false;
    loop {
        tokio::select! {
            event = handle.events.recv() => match event {
                Some(event) => console::print_event(&event),
                None => break,
            },
            signal = tokio::signal::ctrl_c(), if !interrupted => {
                signal.context("failed to listen for Ctrl-C")?;
                interrupted = true;
                eprintln!("stopping after the current device");
                handle.request_stop();
            }
        }
    }

    let outcome = handle.wait().await?;
    console::print_results(&outcome.results);
    if outcome.stopped {
        println!("stopped before all devices were processed");
    }
    Ok(outcome)
}

async fn release_source(source: Arc<SystemSource>) -> Result<()> {
    match Arc::try_unwrap(source) {
        Ok(mut source) => Ok(source.release().await?),
        Err(_) => {
            tracing::warn!("system source still in use, not released");
            Ok(())
        }
    }
}

async fn watch(session: Arc<Session>, mode: OperationMode) -> Result<()> {
    let kind = MonitorKind::detect()?;
    session.coordinator.set_active_mode(Some(mode));
    session.refresh(mode, &ConsoleReporter).await?;
    let registry = session.registry(mode).clone();
    console::print_devices(&registry.snapshot());

    let (process, stdout) = MonitorProcess::spawn(kind)?;
    tracing::debug!(pid = ?process.id(), "monitor running");
    let monitor = HotplugMonitor::new(
        session.clone(),
        EventGrammar::for_monitor(kind),
        Arc::new(ConsoleReporter),
    );
    let mut changes = registry.subscribe();
    let events = monitor.run(BufReader::new(stdout));
    tokio::pin!(events);

    loop {
        tokio::select! {
            result = &mut events => {
                result?;
                bail!("hotplug monitor exited");
            }
            changed = changes.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                println!();
                console::print_devices(&registry.snapshot());
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                session.coordinator.set_active_mode(None);
                return Ok(());
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    if cli.log_dir.is_some() {
        config.log.directory = cli.log_dir.clone();
    }
    let _guard = init_logging(&config.log)?;

    tracing::info!("livecopy v{}", env!("CARGO_PKG_VERSION"));

    // Partitioning, mounting and probing need root
    if unsafe { libc::geteuid() } != 0 {
        tracing::error!("livecopy must run as root");
        bail!("livecopy must run with root privileges");
    }

    let session = host_session(&config);
    let outcome = match cli.command {
        Commands::List { mode, json } => {
            let mode = mode.into();
            session.refresh(mode, &ConsoleReporter).await?;
            let devices = session.registry(mode).snapshot();
            if json {
                println!("{}", serde_json::to_string_pretty(&devices)?);
            } else {
                console::print_devices(&devices);
            }
            return Ok(());
        }
        Commands::Watch { mode } => return watch(session, mode.into()).await,
        Commands::Install { devices } => {
            let devices = select_devices(&session, OperationMode::Install, &devices).await?;
            let mut source = open_source(&session, &config).await?;
            if let Some(dir) = &config.source.exchange_dir {
                source = source.with_exchange_dir(dir);
            }
            if let Some(dir) = &config.source.data_dir {
                source = source.with_data_dir(dir);
            }
            let source = Arc::new(source);
            let installer = Installer::new(session.clone(), source.clone(), config.install.clone());
            let outcome = follow(Operation::Install(installer), devices, false).await;
            release_source(source).await?;
            let outcome = outcome?;
            if let Some(number) = outcome.next_auto_number {
                println!("next auto number: {number}");
            }
            outcome
        }
        Commands::Upgrade { devices } => {
            let devices = select_devices(&session, OperationMode::Upgrade, &devices).await?;
            let source = Arc::new(open_source(&session, &config).await?);
            let upgrader = Upgrader::new(session.clone(), source.clone(), config.upgrade.clone());
            let outcome = follow(Operation::Upgrade(upgrader), devices, false).await;
            release_source(source).await?;
            outcome?
        }
        Commands::Reset { devices } => {
            let devices = select_devices(&session, OperationMode::Reset, &devices).await?;
            let interactive = config.reset.printing.mode == PrintMode::Interactive;
            let resetter = Resetter::new(session.clone(), config.reset.clone());
            follow(Operation::Reset(resetter), devices, interactive).await?
        }
    };

    if outcome.failed() > 0 {
        bail!("{} of {} device(s) failed", outcome.failed(), outcome.results.len());
    }
    Ok(())
}
