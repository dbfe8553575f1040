//! Link reader task: bytes in, [`TelemetrySample`]s out.
//!
//! One dispatcher runs per open link. It frames the byte stream, extracts
//! records and publishes every accepted sample on the unbounded handoff
//! channel. It does not interpret any field. Surviving text lines also go to
//! a bounded raw-line channel for display; when that fills up, new lines are
//! dropped rather than stalling ingestion.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::framer::LineFramer;
use super::record::{Extraction, RecordExtractor};
use super::stats::IngestCounters;
use crate::config::LinkConfig;
use crate::types::TelemetrySample;

/// Why the dispatcher loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherExit {
    Cancelled,
    EndOfStream,
    /// Every handoff receiver is gone.
    ReceiverClosed,
}

pub struct SampleDispatcher<R> {
    source: String,
    reader: R,
    framer: LineFramer,
    extractor: RecordExtractor,
    samples: mpsc::UnboundedSender<TelemetrySample>,
    raw_lines: mpsc::Sender<String>,
    counters: Arc<IngestCounters>,
    chunk_size: usize,
    backoff: Duration,
    cancel_token: CancellationToken,
}

impl<R: AsyncRead + Unpin + Send + 'static> SampleDispatcher<R> {
    pub fn new(
        source: impl Into<String>,
        reader: R,
        link: &LinkConfig,
        samples: mpsc::UnboundedSender<TelemetrySample>,
        raw_lines: mpsc::Sender<String>,
        counters: Arc<IngestCounters>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            source: source.into(),
            reader,
            framer: LineFramer::new(),
            extractor: RecordExtractor::new(link.prompt_markers.clone(), Arc::clone(&counters)),
            samples,
            raw_lines,
            counters,
            chunk_size: link.read_chunk_bytes.max(1),
            backoff: link.read_error_backoff(),
            cancel_token,
        }
    }

    /// Count device lines containing `marker` in [`IngestStats::upload_acks`](super::IngestStats).
    pub fn with_ack_marker(mut self, marker: impl Into<String>) -> Self {
        self.extractor = self.extractor.with_ack_marker(marker);
        self
    }

    /// Run until cancelled, end of stream, or the handoff receiver is dropped.
    ///
    /// Read errors never end the loop; they are logged and retried after a
    /// short back-off.
    pub async fn run(mut self) -> DispatcherExit {
        info!(source = %self.source, "Sample dispatcher started");
        let mut buf = vec![0u8; self.chunk_size];
        let mut error_streak = 0u64;

        let exit = loop {
            let read = tokio::select! {
                _ = self.cancel_token.cancelled() => break DispatcherExit::Cancelled,
                read = self.reader.read(&mut buf) => read,
            };

            match read {
                Ok(0) => {
                    if let Some(tail) = self.framer.take_partial() {
                        if self.handle_line(&tail).is_err() {
                            break DispatcherExit::ReceiverClosed;
                        }
                    }
                    break DispatcherExit::EndOfStream;
                }
                Ok(n) => {
                    error_streak = 0;
                    self.counters.add_bytes(n);
                    let lines = self.framer.push(&buf[..n]);
                    if lines.iter().any(|line| self.handle_line(line).is_err()) {
                        break DispatcherExit::ReceiverClosed;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.counters.read_error();
                    error_streak += 1;
                    if error_streak == 1 {
                        warn!(source = %self.source, error = %e, "Link read failed, backing off");
                    } else {
                        debug!(source = %self.source, attempt = error_streak, error = %e, "Link read still failing");
                    }
                    tokio::select! {
                        _ = self.cancel_token.cancelled() => break DispatcherExit::Cancelled,
                        () = tokio::time::sleep(self.backoff) => {}
                    }
                }
            }
        };

        info!(
            source = %self.source,
            exit = ?exit,
            stats = %self.counters.snapshot(),
            "Sample dispatcher stopped"
        );
        exit
    }

    /// Returns `Err(())` once the handoff channel is closed.
    fn handle_line(&self, line: &str) -> Result<(), ()> {
        let extraction = self.extractor.extract(line);

        if let Some(text) = extraction.line() {
            if self.raw_lines.try_send(text.to_string()).is_err() {
                self.counters.raw_line_dropped();
            }
        }

        if let Extraction::Sample { sample, .. } = extraction {
            self.samples.send(sample).map_err(|_| ())?;
            self.counters.published();
        }
        Ok(())
    }
}
