//! Processing modes and what each one does with a sample.

use serde::{Deserialize, Serialize};

use crate::types::Channel;

/// Channels kept by the Raw (live capture) mode.
pub const RAW_CHANNELS: &[Channel] = &[Channel::Hip, Channel::Ankle];

/// Channels kept by the Filtered (inspect and save) mode.
pub const FILTERED_CHANNELS: &[Channel] = &Channel::ALL;

/// The consumer variant that drains the handoff channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    /// Live capture of raw hip/ankle angles with cycle detection.
    Raw,
    /// Firmware-filtered kinematics with phase and swing progress.
    Filtered,
}

/// Behaviour switches of a [`ProcessingMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeCapabilities {
    pub channels: &'static [Channel],
    pub detect_cycles: bool,
    /// Keep the rolling history when the mode is stopped.
    pub retain_on_stop: bool,
}

impl ProcessingMode {
    pub const ALL: [ProcessingMode; 2] = [ProcessingMode::Raw, ProcessingMode::Filtered];

    pub const fn capabilities(self) -> ModeCapabilities {
        match self {
            ProcessingMode::Raw => ModeCapabilities {
                channels: RAW_CHANNELS,
                detect_cycles: true,
                retain_on_stop: false,
            },
            ProcessingMode::Filtered => ModeCapabilities {
                channels: FILTERED_CHANNELS,
                detect_cycles: false,
                retain_on_stop: true,
            },
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            ProcessingMode::Raw => "raw",
            ProcessingMode::Filtered => "filtered",
        }
    }
}

impl std::fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for ProcessingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" => Ok(ProcessingMode::Raw),
            "filtered" | "kinematic" => Ok(ProcessingMode::Filtered),
            other => Err(format!("unknown mode {other:?} (expected raw or filtered)")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities() {
        let raw = ProcessingMode::Raw.capabilities();
        assert!(raw.detect_cycles);
        assert!(!raw.retain_on_stop);
        assert!(raw.channels.contains(&Channel::Ankle));

        let filtered = ProcessingMode::Filtered.capabilities();
        assert!(!filtered.detect_cycles);
        assert!(filtered.retain_on_stop);
        assert!(filtered.channels.contains(&Channel::SwingProgress));
    }

    #[test]
    fn test_parse() {
        assert_eq!("RAW".parse::<ProcessingMode>(), Ok(ProcessingMode::Raw));
        assert_eq!("kinematic".parse::<ProcessingMode>(), Ok(ProcessingMode::Filtered));
        assert!("fast".parse::<ProcessingMode>().is_err());
    }
}
