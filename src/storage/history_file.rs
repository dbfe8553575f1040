//! Persisted rolling-history file.
//!
//! Layout: `timestamp`, `data_type = "realtime"`, `duration`, `data_points`,
//! `time` (s from first sample), then one array per channel keyed by its file
//! key (`hip_angle`, `ankle_angle`, `hip_filtered`, ...) with `null` where the
//! slot was missing. Device timestamps are not stored; loading re-anchors the
//! relative times to a caller-chosen base.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{
    check_len, format_timestamp, read_json, relative_seconds, write_json, StorageError,
    HISTORY_DATA_TYPE,
};
use crate::buffers::HistorySnapshot;
use crate::types::Channel;

#[derive(Debug, Serialize, Deserialize)]
struct HistoryFile {
    timestamp: String,
    data_type: String,
    duration: f64,
    data_points: usize,
    time: Vec<f64>,
    #[serde(flatten)]
    series: BTreeMap<String, Vec<Option<f64>>>,
}

pub fn save_history(path: &Path, snapshot: &HistorySnapshot) -> Result<(), StorageError> {
    let file = HistoryFile {
        timestamp: format_timestamp(Utc::now()),
        data_type: HISTORY_DATA_TYPE.to_string(),
        duration: snapshot.duration_secs(),
        data_points: snapshot.len(),
        time: relative_seconds(&snapshot.timestamps),
        series: snapshot
            .series
            .iter()
            .map(|(channel, values)| (channel.file_key().to_string(), values.clone()))
            .collect(),
    };
    write_json(path, &file)?;
    info!(
        path = %path.display(),
        samples = file.data_points,
        channels = file.series.len(),
        "Rolling history saved"
    );
    Ok(())
}

/// Read a history file, anchoring its first sample at `base_ms`.
///
/// With `base_ms = None` the current wall clock (ms since the Unix epoch) is
/// used. Unknown series keys are skipped with a warning.
pub fn load_history(path: &Path, base_ms: Option<u64>) -> Result<HistorySnapshot, StorageError> {
    let file: HistoryFile = read_json(path)?;

    if file.data_type != HISTORY_DATA_TYPE {
        return Err(StorageError::DataType {
            path: path.to_path_buf(),
            expected: HISTORY_DATA_TYPE,
            found: file.data_type,
        });
    }

    let n = file.time.len();
    let mut series = BTreeMap::new();
    for (key, values) in file.series {
        let Some(channel) = Channel::from_file_key(&key) else {
            warn!(path = %path.display(), key = %key, "Unknown series in history file, skipping");
            continue;
        };
        check_len(path, &key, values.len(), n)?;
        series.insert(channel, values);
    }

    let base = base_ms.unwrap_or_else(|| u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0));
    let start_offset = file.time.first().copied().map_or(0, seconds_to_ms);
    let timestamps = file
        .time
        .iter()
        .map(|&rel| (base + seconds_to_ms(rel)).saturating_sub(start_offset))
        .collect();

    info!(path = %path.display(), samples = n, base_ms = base, "Rolling history loaded");
    Ok(HistorySnapshot { timestamps, series })
}

fn seconds_to_ms(seconds: f64) -> u64 {
    if seconds.is_finite() && seconds > 0.0 {
        (seconds * 1000.0).round() as u64
    } else {
        0
    }
}
