//! Ingest diagnostics shared between the dispatcher and its observers.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::Channel;

/// Lock-free counters updated by the dispatcher task.
#[derive(Debug, Default)]
pub struct IngestCounters {
    bytes: AtomicU64,
    lines: AtomicU64,
    ignored_lines: AtomicU64,
    objects_decoded: AtomicU64,
    decode_errors: AtomicU64,
    missing_fields: AtomicU64,
    samples_published: AtomicU64,
    raw_lines_dropped: AtomicU64,
    read_errors: AtomicU64,
    upload_acks: AtomicU64,
    channel_presence: [AtomicU64; Channel::ALL.len()],
}

impl IngestCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_bytes(&self, n: usize) {
        self.bytes.fetch_add(n as u64, Ordering::Relaxed);
    }
    pub(crate) fn line(&self) {
        self.lines.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn ignored_line(&self) {
        self.ignored_lines.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn decoded(&self) {
        self.objects_decoded.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn missing_field(&self) {
        self.missing_fields.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn published(&self) {
        self.samples_published.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn raw_line_dropped(&self) {
        self.raw_lines_dropped.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn read_error(&self) {
        self.read_errors.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn upload_ack(&self) {
        self.upload_acks.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn channel_seen(&self, channel: Channel) {
        self.channel_presence[channel as usize].fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> IngestStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        IngestStats {
            bytes: load(&self.bytes),
            lines: load(&self.lines),
            ignored_lines: load(&self.ignored_lines),
            objects_decoded: load(&self.objects_decoded),
            decode_errors: load(&self.decode_errors),
            missing_fields: load(&self.missing_fields),
            samples_published: load(&self.samples_published),
            raw_lines_dropped: load(&self.raw_lines_dropped),
            read_errors: load(&self.read_errors),
            upload_acks: load(&self.upload_acks),
            channel_presence: Channel::ALL
                .iter()
                .map(|&c| (c, load(&self.channel_presence[c as usize])))
                .collect(),
        }
    }
}

/// Snapshot of [`IngestCounters`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub bytes: u64,
    /// Complete lines framed, including ignored ones
    pub lines: u64,
    /// Empty lines and command echoes
    pub ignored_lines: u64,
    pub objects_decoded: u64,
    pub decode_errors: u64,
    /// Decoded objects rejected for lacking `t` or `h`
    pub missing_fields: u64,
    pub samples_published: u64,
    pub raw_lines_dropped: u64,
    pub read_errors: u64,
    /// Device lines confirming a gait table upload
    pub upload_acks: u64,
    /// How many published samples carried each channel
    pub channel_presence: Vec<(Channel, u64)>,
}

impl IngestStats {
    pub fn presence(&self, channel: Channel) -> u64 {
        self.channel_presence
            .iter()
            .find(|(c, _)| *c == channel)
            .map_or(0, |(_, n)| *n)
    }
}

impl std::fmt::Display for IngestStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "lines={} ignored={} decoded={} decode_errors={} missing={} samples={} read_errors={} upload_acks={}",
            self.lines,
            self.ignored_lines,
            self.objects_decoded,
            self.decode_errors,
            self.missing_fields,
            self.samples_published,
            self.read_errors,
            self.upload_acks
        )
    }
}
