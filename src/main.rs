//! gaitscope - gait telemetry capture
//!
//! Captures JSON telemetry from a gait device, keeps rolling channel history,
//! detects gait cycles and saves them.
//!
//! # Usage
//!
//! ```bash
//! # Capture from a serial port in raw mode with cycle detection
//! gaitscope --port /dev/ttyUSB0
//!
//! # Capture the firmware-filtered channels for 30 seconds
//! gaitscope --port COM3 --mode filtered --duration 30
//!
//! # Replay synthetic data from the simulator
//! gait-simulation --cycles 20 | gaitscope --stdin
//!
//! # Send a saved cycle to the device as its gait table
//! gaitscope upload --port /dev/ttyUSB0 data/gait_cycle_data.json
//! ```
//!
//! # Environment Variables
//!
//! - `GAIT_CONFIG`: Path to a TOML config file (default: ./gait_config.toml)
//! - `GAIT_PORT`: Serial port, same as `--port`
//! - `RUST_LOG`: Logging level (default: info)

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use gaitscope::acquisition::list_ports;
use gaitscope::config::CaptureConfig;
use gaitscope::pipeline::{CaptureSession, ProcessingMode};
use gaitscope::storage;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "gaitscope")]
#[command(about = "Gait telemetry capture and cycle detection")]
#[command(version)]
struct CliArgs {
    /// Serial port of the device (e.g. /dev/ttyUSB0, COM3)
    #[arg(short, long, env = "GAIT_PORT", global = true)]
    port: Option<String>,

    /// Override the configured baud rate
    #[arg(short, long, global = true)]
    baud: Option<u32>,

    /// Path to a TOML config file (overrides GAIT_CONFIG and ./gait_config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Read device output from stdin instead of a serial port
    /// Use with the simulator: gait-simulation | gaitscope --stdin
    #[arg(long)]
    stdin: bool,

    /// Processing mode: raw (cycle detection) or filtered (kinematics)
    #[arg(short, long, default_value = "raw")]
    mode: ProcessingMode,

    /// Stop after this many seconds (default: run until Ctrl+C or end of input)
    #[arg(short, long)]
    duration: Option<u64>,

    /// Extra command to send after capture starts (repeatable), e.g. --send az
    #[arg(long = "send", value_name = "CMD")]
    send: Vec<String>,

    /// Directory for exports and the autosaved cycle (default: [storage] data_dir)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Do not overwrite the latest-cycle file on every detection
    #[arg(long)]
    no_autosave: bool,

    /// Seconds between status lines
    #[arg(long, default_value = "5")]
    status_interval: u64,

    #[command(subcommand)]
    command: Option<SubCommand>,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// List serial ports visible to this host
    ListPorts,

    /// Write the effective configuration to a TOML file
    InitConfig {
        /// Destination path
        #[arg(default_value = "gait_config.toml")]
        path: PathBuf,
    },

    /// Upload a saved gait cycle file to the device as its gait table
    Upload {
        /// Cycle file written by a previous capture
        file: PathBuf,

        /// Seconds to wait for the device to confirm the upload
        #[arg(long, default_value = "1")]
        listen: u64,
    },
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_json);

    let mut config = match &args.config {
        Some(path) => CaptureConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => CaptureConfig::load(),
    };
    if let Some(baud) = args.baud {
        config.link.baud_rate = baud;
    }
    if let Some(port) = &args.port {
        config.link.port = Some(port.clone());
    }
    if let Some(dir) = &args.output {
        config.storage.data_dir = dir.clone();
    }
    if args.no_autosave {
        config.storage.autosave_cycle = false;
    }
    config.validate().context("Invalid configuration")?;

    match &args.command {
        Some(SubCommand::ListPorts) => print_ports(),
        Some(SubCommand::InitConfig { path }) => {
            config.save_to_file(path)?;
            println!("Wrote {}", path.display());
            Ok(())
        }
        Some(SubCommand::Upload { file, listen }) => upload(config, file, *listen).await,
        None => capture(config, &args).await,
    }
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

fn print_ports() -> Result<()> {
    let ports = list_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{:<24} {}", port.name, port.description);
    }
    Ok(())
}

// ============================================================================
// Capture
// ============================================================================

async fn capture(config: CaptureConfig, args: &CliArgs) -> Result<()> {
    let mut session = CaptureSession::new(config);

    if args.stdin {
        session.connect_io("stdin", tokio::io::stdin(), tokio::io::sink())?;
    } else {
        session
            .connect_serial(None)
            .context("Failed to open the device link (see `gaitscope list-ports`)")?;
    }

    session.activate(args.mode)?;
    let start_command = session.config().link.start_command.clone();
    if !start_command.is_empty() {
        session.send_command(&start_command).await?;
    }
    for command in &args.send {
        session.send_command(command).await?;
    }

    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, stopping capture...");
        shutdown_token.cancel();
    });
    if let Some(secs) = args.duration {
        let timer_token = cancel_token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            info!(seconds = secs, "Capture duration reached");
            timer_token.cancel();
        });
    }

    run_status_loop(&mut session, &cancel_token, args.status_interval.max(1)).await;
    finish(session, args.mode).await
}

/// Drain raw lines, autosave new cycles and log status until cancelled or the link ends.
async fn run_status_loop(session: &mut CaptureSession, cancel_token: &CancellationToken, status_secs: u64) {
    let cycles = session.cycles();
    let storage_config = session.config().storage.clone();
    let mut saved_generation = cycles.generation();
    let mut tick = tokio::time::interval(Duration::from_millis(200));
    let mut ticks = 0u64;
    let ticks_per_status = status_secs * 5;

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            _ = tick.tick() => {}
        }
        ticks += 1;

        for line in session.drain_raw_lines() {
            debug!(target: "device", "{line}");
        }

        let generation = cycles.generation();
        if storage_config.autosave_cycle && generation != saved_generation {
            if let Some(record) = cycles.latest() {
                if let Err(e) = storage::save_cycle(&storage_config.cycle_path(), &record) {
                    warn!(error = %e, "Autosave of gait cycle failed");
                }
            }
            saved_generation = generation;
        }

        if ticks % ticks_per_status == 0 {
            info!("{}", session.stats());
        }

        if !session.link_alive() {
            info!("Device link ended");
            break;
        }
    }
}

/// Stop the device stream, export what was captured and close the link.
async fn finish(mut session: CaptureSession, mode: ProcessingMode) -> Result<()> {
    let stop_command = session.config().link.stop_command.clone();
    if session.link_alive() && !stop_command.is_empty() {
        if let Err(e) = session.send_command(&stop_command).await {
            warn!(error = %e, "Failed to send stop command");
        }
    }

    if !session.link_alive() {
        let timeout = session.config().tasks.join_timeout();
        if !session.wait_for_drain(timeout).await {
            warn!("Consumer did not finish draining the handoff channel");
        }
    }

    // Raw mode drops its history on deactivation, so snapshot first.
    let history = session.store(mode).snapshot_all();
    let cycle = session.cycles().latest();
    session.deactivate().await?;

    let stats = session.stats();
    let data_dir = session.config().storage.data_dir.clone();
    let export = storage::export_session(&data_dir, chrono::Local::now(), cycle.as_deref(), &history)?;
    if let Some(path) = &export.cycle_file {
        info!(path = %path.display(), "Latest cycle exported");
    }
    if let Some(path) = &export.history_file {
        info!(path = %path.display(), samples = history.len(), "History exported");
    }

    session.disconnect().await?;
    info!("{}", stats);
    Ok(())
}

// ============================================================================
// Upload
// ============================================================================

async fn upload(config: CaptureConfig, file: &std::path::Path, listen_secs: u64) -> Result<()> {
    let record = storage::load_cycle(file)?;
    if record.sample_count() == 0 {
        bail!("{} holds no samples", file.display());
    }

    let mut session = CaptureSession::new(config);
    session.connect_serial(None)?;
    let acks_before = session.stats().ingest.upload_acks;
    session.upload_gait(&record).await?;

    let timeout = session.config().upload.ack_timeout().max(Duration::from_secs(listen_secs));
    if session.wait_for_upload_ack(acks_before, timeout).await {
        info!(points = record.sample_count(), "Device confirmed gait table");
    } else {
        warn!(
            marker = %session.config().upload.ack_marker,
            "No load confirmation from the device within {:?}", timeout
        );
    }
    for line in session.drain_raw_lines() {
        info!(target: "device", "{line}");
    }
    session.disconnect().await?;
    Ok(())
}
