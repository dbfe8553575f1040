//! A completed gait cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable snapshot of one peak-to-peak gait cycle.
///
/// The three series always have the same length. `time` is relative to the
/// opening peak, in seconds, starting at 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleRecord {
    pub created_at: DateTime<Utc>,
    /// Device timestamp of the opening peak (ms)
    pub device_start_ms: u64,
    pub duration_secs: f64,
    pub time: Vec<f64>,
    pub hip_angle: Vec<f64>,
    /// Secondary joint angle; `None` where the device did not report it
    pub ankle_angle: Vec<Option<f64>>,
}

impl CycleRecord {
    /// Build a record from absolute `(t_ms, hip, ankle)` samples.
    ///
    /// Returns `None` for an empty slice.
    pub fn from_samples(samples: &[(u64, f64, Option<f64>)]) -> Option<Self> {
        let (first, _, _) = *samples.first()?;
        let (last, _, _) = *samples.last()?;

        let mut time = Vec::with_capacity(samples.len());
        let mut hip_angle = Vec::with_capacity(samples.len());
        let mut ankle_angle = Vec::with_capacity(samples.len());
        for &(t, hip, ankle) in samples {
            time.push(t.saturating_sub(first) as f64 / 1000.0);
            hip_angle.push(hip);
            ankle_angle.push(ankle);
        }

        Some(Self {
            created_at: Utc::now(),
            device_start_ms: first,
            duration_secs: last.saturating_sub(first) as f64 / 1000.0,
            time,
            hip_angle,
            ankle_angle,
        })
    }

    pub fn sample_count(&self) -> usize {
        self.time.len()
    }
}

impl std::fmt::Display for CycleRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cycle @{}ms: {:.3}s, {} samples",
            self.device_start_ms,
            self.duration_secs,
            self.sample_count()
        )
    }
}
