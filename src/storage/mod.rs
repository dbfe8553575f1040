//! JSON persistence for detected cycles and rolling history
//!
//! Files are pretty-printed JSON written with `serde_json`. Relative time
//! series are stored in seconds from the first sample; missing channel slots
//! are written as `null`.
//!
//! - [`cycle_file`]: one [`CycleRecord`](crate::types::CycleRecord) plus the compact
//!   upload payload sent to the device
//! - [`history_file`]: a full [`HistorySnapshot`](crate::buffers::HistorySnapshot)
//! - [`export`]: timestamped session folders holding both

pub mod cycle_file;
pub mod export;
pub mod history_file;

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::Serialize;
use thiserror::Error;

pub use cycle_file::{load_cycle, save_cycle, upload_payload, MAX_UPLOAD_POINTS};
pub use export::{export_session, SessionExport};
pub use history_file::{load_history, save_history};

/// `data_type` tag of a cycle file.
pub const CYCLE_DATA_TYPE: &str = "gait_cycle";

/// `data_type` tag of a rolling-history file.
pub const HISTORY_DATA_TYPE: &str = "realtime";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error ({path}): {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error ({path}): {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unexpected data_type {found:?} in {path} (expected {expected:?})")]
    DataType {
        path: PathBuf,
        expected: &'static str,
        found: String,
    },

    #[error("Series length mismatch in {path}: {detail}")]
    LengthMismatch { path: PathBuf, detail: String },

    #[error("Cycle holds no samples")]
    EmptyCycle,

    #[error("Cycle has {points} points, the device accepts at most {max}")]
    TooManyPoints { points: usize, max: usize },

    #[error("Cycle has {missing} samples without an ankle angle")]
    MissingAnkle { missing: usize },

    #[error("Payload encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn json_err(path: &Path) -> impl FnOnce(serde_json::Error) -> StorageError + '_ {
    move |source| StorageError::Json {
        path: path.to_path_buf(),
        source,
    }
}

/// Pretty-print `value` to `path`, creating parent directories.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err(parent))?;
    }
    let json = serde_json::to_string_pretty(value).map_err(json_err(path))?;
    std::fs::write(path, json).map_err(io_err(path))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, StorageError> {
    let json = std::fs::read_to_string(path).map_err(io_err(path))?;
    serde_json::from_str(&json).map_err(json_err(path))
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// RFC 3339, or a naive ISO-8601 local stamp as older captures wrote it.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Relative seconds from the first timestamp.
fn relative_seconds(timestamps: &[u64]) -> Vec<f64> {
    let first = timestamps.first().copied().unwrap_or(0);
    timestamps
        .iter()
        .map(|&t| t.saturating_sub(first) as f64 / 1000.0)
        .collect()
}

fn check_len(path: &Path, name: &str, len: usize, expected: usize) -> Result<(), StorageError> {
    if len == expected {
        Ok(())
    } else {
        Err(StorageError::LengthMismatch {
            path: path.to_path_buf(),
            detail: format!("{name} has {len} entries, time has {expected}"),
        })
    }
}
