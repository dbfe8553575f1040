//! Decoded device records and the channels they carry.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Wire key of the mandatory timestamp (ms since device boot).
pub const TIMESTAMP_KEY: &str = "t";

/// Wire key of the mandatory hip angle (degrees).
pub const HIP_KEY: &str = "h";

// ============================================================================
// Channel
// ============================================================================

/// A named numeric series the device can report.
///
/// Each channel has a short wire key (what the firmware prints) and a
/// descriptive file key (what persisted history files use).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Raw hip angle (deg)
    Hip,
    /// Low-pass filtered hip angle (deg)
    HipFiltered,
    /// Filtered hip angular velocity (deg/s)
    HipVelocity,
    /// Gait phase flag, 0 = stance, 1 = swing
    Phase,
    /// Swing progress fraction, 0..1
    SwingProgress,
    /// Ankle angle (deg)
    Ankle,
    /// Unfiltered ankle encoder angle (deg)
    AnkleRaw,
    /// Assist actuator active flag, 0 or 1
    Assist,
}

impl Channel {
    pub const ALL: [Channel; 8] = [
        Channel::Hip,
        Channel::HipFiltered,
        Channel::HipVelocity,
        Channel::Phase,
        Channel::SwingProgress,
        Channel::Ankle,
        Channel::AnkleRaw,
        Channel::Assist,
    ];

    pub fn wire_key(self) -> &'static str {
        match self {
            Channel::Hip => HIP_KEY,
            Channel::HipFiltered => "hf",
            Channel::HipVelocity => "hvf",
            Channel::Phase => "phase",
            Channel::SwingProgress => "s",
            Channel::Ankle => "a",
            Channel::AnkleRaw => "ar",
            Channel::Assist => "act",
        }
    }

    pub fn file_key(self) -> &'static str {
        match self {
            Channel::Hip => "hip_angle",
            Channel::HipFiltered => "hip_filtered",
            Channel::HipVelocity => "hip_velocity",
            Channel::Phase => "phase",
            Channel::SwingProgress => "swing_progress",
            Channel::Ankle => "ankle_angle",
            Channel::AnkleRaw => "ankle_raw",
            Channel::Assist => "assist_active",
        }
    }

    pub fn from_file_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.file_key() == key)
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.file_key())
    }
}

// ============================================================================
// TelemetrySample
// ============================================================================

/// One decoded device record.
///
/// `timestamp_ms` and `hip_angle` are always present. Every other numeric key
/// the record carried is kept in `fields`, ordered by key; an absent key means
/// the device did not report that channel this tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub timestamp_ms: u64,
    pub hip_angle: f64,
    fields: BTreeMap<String, f64>,
}

impl TelemetrySample {
    pub fn new(timestamp_ms: u64, hip_angle: f64) -> Self {
        Self {
            timestamp_ms,
            hip_angle,
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style setter for optional channels, mostly for tests and simulation.
    pub fn with(mut self, channel: Channel, value: f64) -> Self {
        if channel == Channel::Hip {
            self.hip_angle = value;
        } else {
            self.fields.insert(channel.wire_key().to_string(), value);
        }
        self
    }

    pub(crate) fn from_parts(timestamp_ms: u64, hip_angle: f64, fields: BTreeMap<String, f64>) -> Self {
        Self {
            timestamp_ms,
            hip_angle,
            fields,
        }
    }

    /// Value of a declared channel, `None` when the record did not carry it.
    pub fn get(&self, channel: Channel) -> Option<f64> {
        match channel {
            Channel::Hip => Some(self.hip_angle),
            other => self.fields.get(other.wire_key()).copied(),
        }
    }

    /// Value of any wire key, including ones no [`Channel`] declares.
    pub fn field(&self, key: &str) -> Option<f64> {
        match key {
            TIMESTAMP_KEY => Some(self.timestamp_ms as f64),
            HIP_KEY => Some(self.hip_angle),
            other => self.fields.get(other).copied(),
        }
    }

    /// Optional keys carried by this record, in key order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, f64)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), *v))
    }
}
