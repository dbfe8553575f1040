//! The active mode's consumer loop.

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::mode::ProcessingMode;
use crate::buffers::ChannelBufferStore;
use crate::cycle::{CycleDetector, CycleStore};
use crate::types::{Channel, TelemetrySample};

/// Totals reported when a consumer stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub samples: u64,
    pub cycles: u64,
}

pub(crate) struct ModeConsumer {
    pub mode: ProcessingMode,
    /// Held for the consumer's whole life; no other consumer can drain meanwhile.
    pub receiver: OwnedMutexGuard<UnboundedReceiver<TelemetrySample>>,
    pub store: Arc<ChannelBufferStore>,
    pub detector: Option<CycleDetector>,
    pub cycles: Arc<CycleStore>,
    pub cancel_token: CancellationToken,
}

impl ModeConsumer {
    pub async fn run(mut self) -> ConsumerStats {
        info!(mode = %self.mode, "Consumer started");
        let mut stats = ConsumerStats::default();
        let mut epoch = self.store.epoch();
        let mut last_timestamp: Option<u64> = None;

        loop {
            let sample = tokio::select! {
                _ = self.cancel_token.cancelled() => break,
                sample = self.receiver.recv() => match sample {
                    Some(sample) => sample,
                    None => {
                        info!(mode = %self.mode, "Handoff channel closed");
                        break;
                    }
                },
            };

            stats.samples += 1;
            let seen_epoch = self.store.append(&sample);

            let Some(detector) = self.detector.as_mut() else {
                continue;
            };
            let regressed = last_timestamp.is_some_and(|t| sample.timestamp_ms < t);
            if seen_epoch != epoch || regressed {
                if regressed {
                    debug!(mode = %self.mode, t = sample.timestamp_ms, "Device clock went backwards, detector reset");
                }
                detector.reset();
                epoch = seen_epoch;
            }
            last_timestamp = Some(sample.timestamp_ms);

            if let Some(record) =
                detector.push(sample.timestamp_ms, sample.hip_angle, sample.get(Channel::Ankle))
            {
                let (start_ms, duration_s, samples) =
                    (record.device_start_ms, record.duration_secs, record.sample_count());
                // Publish only if no clear slipped in since this sample was stored.
                if self.store.if_epoch(epoch, || self.cycles.publish(record)).is_some() {
                    info!(start_ms, duration_s, samples, "Gait cycle detected");
                    stats.cycles += 1;
                } else {
                    debug!(mode = %self.mode, start_ms, "Cycle from before a clear discarded");
                }
            }
        }

        info!(mode = %self.mode, samples = stats.samples, cycles = stats.cycles, "Consumer stopped");
        stats
    }
}
