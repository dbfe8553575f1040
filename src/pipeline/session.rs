//! Capture session: link ownership and the single active-mode slot.
//!
//! A [`CaptureSession`] owns at most one open link (with its dispatcher task)
//! and at most one active [`ProcessingMode`] consumer. Every transition is a
//! checked method on `&mut self`; a rejected transition returns a
//! [`SessionError`] and leaves the session untouched.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::consumer::{ConsumerStats, ModeConsumer};
use super::mode::ProcessingMode;
use super::task::TaskHandle;
use crate::acquisition::{
    open_serial, CommandWriter, DispatcherExit, IngestCounters, IngestStats, LinkError,
    SampleDispatcher,
};
use crate::buffers::ChannelBufferStore;
use crate::config::CaptureConfig;
use crate::cycle::{CycleDetector, CycleStore};
use crate::storage::{upload_payload, StorageError};
use crate::types::{CycleRecord, TelemetrySample};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("No link is open")]
    NotConnected,

    #[error("Already connected to {0}")]
    AlreadyConnected(String),

    #[error("No serial port given (use --port or [link] port)")]
    NoPortConfigured,

    #[error("Cannot start {requested} mode: {active} mode is active")]
    ModeActive {
        active: ProcessingMode,
        requested: ProcessingMode,
    },

    #[error("No processing mode is active")]
    NoActiveMode,

    #[error("A previous consumer is still draining the handoff channel")]
    ConsumerBusy,

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

const DRAIN_POLL: Duration = Duration::from_millis(10);

type Handoff = Arc<Mutex<mpsc::UnboundedReceiver<TelemetrySample>>>;

struct Link {
    name: String,
    writer: Arc<CommandWriter>,
    handoff: Handoff,
    raw_lines: mpsc::Receiver<String>,
    dispatcher: TaskHandle<DispatcherExit>,
}

struct ActiveMode {
    mode: ProcessingMode,
    consumer: TaskHandle<ConsumerStats>,
}

/// Point-in-time session summary.
#[derive(Debug, Clone)]
pub struct SessionStats {
    pub link: Option<String>,
    pub link_alive: bool,
    pub mode: Option<ProcessingMode>,
    pub raw_samples: usize,
    pub filtered_samples: usize,
    pub cycles_detected: u64,
    pub ingest: IngestStats,
}

impl std::fmt::Display for SessionStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let link = match (&self.link, self.link_alive) {
            (Some(name), true) => name.clone(),
            (Some(name), false) => format!("{name} (closed)"),
            (None, _) => "-".to_string(),
        };
        let mode = self.mode.map_or("idle", ProcessingMode::name);
        write!(
            f,
            "link={} mode={} raw={} filtered={} cycles={} | {}",
            link, mode, self.raw_samples, self.filtered_samples, self.cycles_detected, self.ingest
        )
    }
}

pub struct CaptureSession {
    config: CaptureConfig,
    raw_store: Arc<ChannelBufferStore>,
    filtered_store: Arc<ChannelBufferStore>,
    cycles: Arc<CycleStore>,
    counters: Arc<IngestCounters>,
    link: Option<Link>,
    active: Option<ActiveMode>,
}

impl CaptureSession {
    pub fn new(config: CaptureConfig) -> Self {
        let capacity = config.buffers.capacity;
        Self {
            raw_store: Arc::new(ChannelBufferStore::new(
                ProcessingMode::Raw.name(),
                ProcessingMode::Raw.capabilities().channels,
                capacity,
            )),
            filtered_store: Arc::new(ChannelBufferStore::new(
                ProcessingMode::Filtered.name(),
                ProcessingMode::Filtered.capabilities().channels,
                capacity,
            )),
            cycles: Arc::new(CycleStore::new()),
            counters: Arc::new(IngestCounters::new()),
            config,
            link: None,
            active: None,
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    // ========================================================================
    // Link
    // ========================================================================

    /// Open the serial port `port`, or `[link] port` from the config.
    pub fn connect_serial(&mut self, port: Option<&str>) -> Result<(), SessionError> {
        if let Some(link) = &self.link {
            return Err(SessionError::AlreadyConnected(link.name.clone()));
        }
        let port = port
            .map(str::to_string)
            .or_else(|| self.config.link.port.clone())
            .ok_or(SessionError::NoPortConfigured)?;

        let stream = open_serial(&port, self.config.link.baud_rate)?;
        let (reader, writer) = tokio::io::split(stream);
        self.connect_io(port, reader, writer)
    }

    /// Attach any reader/writer pair as the device link (stdin/stdout, a test duplex, ...).
    pub fn connect_io<R, W>(&mut self, name: impl Into<String>, reader: R, writer: W) -> Result<(), SessionError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Send + 'static,
    {
        let name = name.into();
        if let Some(link) = &self.link {
            return Err(SessionError::AlreadyConnected(link.name.clone()));
        }

        let (sample_tx, sample_rx) = mpsc::unbounded_channel();
        let (raw_tx, raw_rx) = mpsc::channel(self.config.link.raw_line_backlog.max(1));
        let cancel_token = CancellationToken::new();
        let dispatcher = SampleDispatcher::new(
            name.clone(),
            reader,
            &self.config.link,
            sample_tx,
            raw_tx,
            Arc::clone(&self.counters),
            cancel_token.clone(),
        )
        .with_ack_marker(self.config.upload.ack_marker.clone());

        self.link = Some(Link {
            writer: Arc::new(CommandWriter::new(name.clone(), writer)),
            handoff: Arc::new(Mutex::new(sample_rx)),
            raw_lines: raw_rx,
            dispatcher: TaskHandle::spawn("dispatcher", cancel_token, dispatcher.run()),
            name: name.clone(),
        });
        info!(link = %name, "Link connected");
        Ok(())
    }

    /// Stop the active mode (if any), then the dispatcher, and close the link.
    pub async fn disconnect(&mut self) -> Result<(), SessionError> {
        if self.link.is_none() {
            return Err(SessionError::NotConnected);
        }
        if self.active.is_some() {
            self.deactivate().await?;
        }
        let Some(link) = self.link.take() else {
            return Err(SessionError::NotConnected);
        };

        let exit = link.dispatcher.stop(self.config.tasks.join_timeout()).await;
        link.writer.close().await;
        info!(link = %link.name, exit = ?exit, "Link disconnected");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// `false` once the dispatcher has ended, e.g. at end of stream.
    pub fn link_alive(&self) -> bool {
        self.link.as_ref().is_some_and(|l| !l.dispatcher.is_finished())
    }

    pub fn link_name(&self) -> Option<&str> {
        self.link.as_ref().map(|l| l.name.as_str())
    }

    // ========================================================================
    // Mode slot
    // ========================================================================

    /// Start `mode`'s consumer.
    ///
    /// Fails without side effects when disconnected, when any mode is already
    /// active, or when a consumer that missed its stop deadline still holds
    /// the handoff channel. Samples queued while no mode was active are
    /// discarded first.
    pub fn activate(&mut self, mode: ProcessingMode) -> Result<(), SessionError> {
        let Some(link) = &self.link else {
            return Err(SessionError::NotConnected);
        };
        if let Some(active) = &self.active {
            return Err(SessionError::ModeActive {
                active: active.mode,
                requested: mode,
            });
        }
        let mut receiver = Arc::clone(&link.handoff)
            .try_lock_owned()
            .map_err(|_| SessionError::ConsumerBusy)?;

        let mut stale = 0usize;
        while receiver.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!(mode = %mode, stale, "Discarded samples queued while idle");
        }

        let caps = mode.capabilities();
        let cancel_token = CancellationToken::new();
        let consumer = ModeConsumer {
            mode,
            receiver,
            store: self.store(mode),
            detector: caps
                .detect_cycles
                .then(|| CycleDetector::new(self.config.cycle.clone())),
            cycles: Arc::clone(&self.cycles),
            cancel_token: cancel_token.clone(),
        };

        self.active = Some(ActiveMode {
            mode,
            consumer: TaskHandle::spawn("consumer", cancel_token, consumer.run()),
        });
        info!(mode = %mode, "Processing mode activated");
        Ok(())
    }

    /// Stop the active consumer and apply its stop policy.
    ///
    /// Raw mode discards its rolling history; Filtered mode keeps it until
    /// [`clear`](Self::clear). The detected cycle is kept in both cases.
    pub async fn deactivate(&mut self) -> Result<ProcessingMode, SessionError> {
        let active = self.active.take().ok_or(SessionError::NoActiveMode)?;
        let mode = active.mode;

        let stats = active.consumer.stop(self.config.tasks.join_timeout()).await;
        if !mode.capabilities().retain_on_stop {
            self.store(mode).clear();
        }
        info!(mode = %mode, stats = ?stats, "Processing mode deactivated");
        Ok(mode)
    }

    /// Wait for the link to end and the active consumer to drain what it delivered.
    ///
    /// The consumer exits on its own once the dispatcher is gone and the
    /// handoff channel is empty. Returns `false` if either is still running
    /// after `timeout`.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let drained = self.active.as_ref().map_or(true, |a| a.consumer.is_finished());
            if !self.link_alive() && drained {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(DRAIN_POLL).await;
        }
    }

    /// Wait until the device acknowledged a gait table after `since` acks.
    ///
    /// `since` is [`IngestStats::upload_acks`](crate::acquisition::IngestStats)
    /// read before the upload.
    pub async fn wait_for_upload_ack(&self, since: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.counters.snapshot().upload_acks > since {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(DRAIN_POLL).await;
        }
    }

    pub fn active_mode(&self) -> Option<ProcessingMode> {
        self.active.as_ref().map(|a| a.mode)
    }

    // ========================================================================
    // Data access
    // ========================================================================

    pub fn store(&self, mode: ProcessingMode) -> Arc<ChannelBufferStore> {
        match mode {
            ProcessingMode::Raw => Arc::clone(&self.raw_store),
            ProcessingMode::Filtered => Arc::clone(&self.filtered_store),
        }
    }

    pub fn cycles(&self) -> Arc<CycleStore> {
        Arc::clone(&self.cycles)
    }

    /// Empty both stores and the cycle store.
    ///
    /// Bumping the store epoch makes a running Raw consumer reset its
    /// detector before the next sample.
    pub fn clear(&self) {
        self.raw_store.clear();
        self.filtered_store.clear();
        self.cycles.clear();
        info!("Capture data cleared");
    }

    /// Take every raw text line received since the last call.
    pub fn drain_raw_lines(&mut self) -> Vec<String> {
        let Some(link) = self.link.as_mut() else {
            return Vec::new();
        };
        let mut lines = Vec::new();
        while let Ok(line) = link.raw_lines.try_recv() {
            lines.push(line);
        }
        lines
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            link: self.link_name().map(str::to_string),
            link_alive: self.link_alive(),
            mode: self.active_mode(),
            raw_samples: self.raw_store.len(),
            filtered_samples: self.filtered_store.len(),
            cycles_detected: self.cycles.generation(),
            ingest: self.counters.snapshot(),
        }
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Write `command` plus newline to the device and flush.
    pub async fn send_command(&self, command: &str) -> Result<(), SessionError> {
        let link = self.link.as_ref().ok_or(SessionError::NotConnected)?;
        link.writer.send(command).await?;
        Ok(())
    }

    /// Upload `record` as the device's gait table.
    ///
    /// Sends the upload command, waits the handshake delay, then writes the
    /// record as one compact JSON line.
    pub async fn upload_gait(&self, record: &CycleRecord) -> Result<(), SessionError> {
        let link = self.link.as_ref().ok_or(SessionError::NotConnected)?;
        let payload = upload_payload(record)?;

        link.writer.send(&self.config.upload.command).await?;
        tokio::time::sleep(Duration::from_millis(self.config.upload.handshake_delay_ms)).await;
        link.writer.send(&payload).await?;

        info!(
            link = %link.name,
            samples = record.sample_count(),
            bytes = payload.len(),
            "Gait table uploaded"
        );
        Ok(())
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if let Some(active) = &self.active {
            warn!(mode = %active.mode, "Session dropped with an active mode");
            active.consumer.cancel();
        }
        if let Some(link) = &self.link {
            link.dispatcher.cancel();
        }
    }
}
