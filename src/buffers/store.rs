//! Lock-step rolling history for a set of channels.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::channel_buffer::ChannelBuffer;
use crate::types::{Channel, TelemetrySample};

/// Consistent copy of every buffer in a store.
///
/// `timestamps` and every series have the same length; index `i` across them
/// refers to the same accepted sample.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistorySnapshot {
    pub timestamps: Vec<u64>,
    pub series: BTreeMap<Channel, Vec<Option<f64>>>,
}

impl HistorySnapshot {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn get(&self, channel: Channel) -> Option<&[Option<f64>]> {
        self.series.get(&channel).map(Vec::as_slice)
    }

    /// Device-clock span from first to last sample (s).
    pub fn duration_secs(&self) -> f64 {
        match (self.timestamps.first(), self.timestamps.last()) {
            (Some(first), Some(last)) => last.saturating_sub(*first) as f64 / 1000.0,
            _ => 0.0,
        }
    }
}

struct StoreInner {
    timestamps: ChannelBuffer<u64>,
    series: Vec<ChannelBuffer<Option<f64>>>,
    epoch: u64,
}

/// A named set of [`ChannelBuffer`]s appended in lock-step.
///
/// Every accepted sample adds exactly one slot to the timestamp buffer and to
/// every channel buffer; a channel the sample did not carry gets `None`. All
/// buffers sit behind one lock, so readers never see channels of different
/// lengths.
pub struct ChannelBufferStore {
    name: &'static str,
    channels: Vec<Channel>,
    capacity: usize,
    inner: RwLock<StoreInner>,
}

impl ChannelBufferStore {
    pub fn new(name: &'static str, channels: &[Channel], capacity: usize) -> Self {
        let mut declared: Vec<Channel> = Vec::with_capacity(channels.len());
        for &c in channels {
            if !declared.contains(&c) {
                declared.push(c);
            }
        }
        let inner = StoreInner {
            timestamps: ChannelBuffer::new(capacity),
            series: declared.iter().map(|_| ChannelBuffer::new(capacity)).collect(),
            epoch: 0,
        };
        Self {
            name,
            capacity: inner.timestamps.capacity(),
            channels: declared,
            inner: RwLock::new(inner),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn index_of(&self, channel: Channel) -> Option<usize> {
        self.channels.iter().position(|&c| c == channel)
    }

    /// Append one slot per buffer for `sample`.
    ///
    /// Returns the store epoch observed under the same lock, so a caller that
    /// keeps derived state can tell whether a [`clear`](Self::clear) happened
    /// since its previous append.
    pub fn append(&self, sample: &TelemetrySample) -> u64 {
        let mut inner = self.write();
        inner.timestamps.push(sample.timestamp_ms);
        for (buffer, &channel) in inner.series.iter_mut().zip(&self.channels) {
            buffer.push(sample.get(channel));
        }
        inner.epoch
    }

    /// Ordered copy of one channel, or `None` if the store does not declare it.
    pub fn snapshot(&self, channel: Channel) -> Option<Vec<Option<f64>>> {
        let idx = self.index_of(channel)?;
        Some(self.read().series[idx].to_vec())
    }

    pub fn timestamps(&self) -> Vec<u64> {
        self.read().timestamps.to_vec()
    }

    /// Value in the newest slot; `None` when empty, undeclared, or missing in that slot.
    pub fn latest(&self, channel: Channel) -> Option<f64> {
        let idx = self.index_of(channel)?;
        self.read().series[idx].latest().copied().flatten()
    }

    pub fn latest_timestamp(&self) -> Option<u64> {
        self.read().timestamps.latest().copied()
    }

    /// Copy of every buffer taken under a single lock.
    pub fn snapshot_all(&self) -> HistorySnapshot {
        let inner = self.read();
        HistorySnapshot {
            timestamps: inner.timestamps.to_vec(),
            series: self
                .channels
                .iter()
                .zip(&inner.series)
                .map(|(&c, buffer)| (c, buffer.to_vec()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.read().timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Empty every buffer and advance the epoch.
    pub fn clear(&self) {
        let mut inner = self.write();
        inner.timestamps.clear();
        for buffer in &mut inner.series {
            buffer.clear();
        }
        inner.epoch += 1;
        tracing::debug!(store = self.name, epoch = inner.epoch, "Channel buffers cleared");
    }

    pub fn epoch(&self) -> u64 {
        self.read().epoch
    }

    /// Run `f` under the read lock if no clear happened since `epoch` was
    /// observed. A concurrent [`clear`](Self::clear) waits for `f` to finish.
    pub fn if_epoch<R>(&self, epoch: u64, f: impl FnOnce() -> R) -> Option<R> {
        let inner = self.read();
        (inner.epoch == epoch).then(f)
    }

    /// Replace the contents with `snapshot`, keeping only the newest
    /// `capacity` slots. Channels the snapshot lacks are filled with `None`;
    /// series of the wrong length are padded or truncated to the timestamps.
    pub fn restore(&self, snapshot: &HistorySnapshot) {
        let skip = snapshot.len().saturating_sub(self.capacity);
        let mut inner = self.write();

        inner.timestamps.clear();
        inner.timestamps.extend(snapshot.timestamps.iter().skip(skip).copied());

        for (buffer, channel) in inner.series.iter_mut().zip(&self.channels) {
            buffer.clear();
            let values = snapshot.get(*channel).unwrap_or(&[]);
            buffer.extend(
                (0..snapshot.len())
                    .skip(skip)
                    .map(|i| values.get(i).copied().flatten()),
            );
        }
        inner.epoch += 1;
    }
}

impl std::fmt::Debug for ChannelBufferStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelBufferStore")
            .field("name", &self.name)
            .field("channels", &self.channels)
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}
