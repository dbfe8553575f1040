//! Capture Configuration - link, buffer and cycle-detection settings as TOML values
//!
//! Each section implements `Default` with the values in [`super::defaults`], so a
//! missing or empty config file behaves exactly like the built-in constants.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::defaults;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "GAIT_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "gait_config.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for a capture session.
///
/// Load with `CaptureConfig::load()` which searches:
/// 1. `$GAIT_CONFIG` env var
/// 2. `./gait_config.toml`
/// 3. Built-in defaults
///
/// The loaded value is handed to each component at construction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Serial link and framing
    #[serde(default)]
    pub link: LinkConfig,

    /// Rolling channel history
    #[serde(default)]
    pub buffers: BufferConfig,

    /// Gait cycle segmentation
    #[serde(default)]
    pub cycle: CycleConfig,

    /// Background task supervision
    #[serde(default)]
    pub tasks: TaskConfig,

    /// Persistence paths
    #[serde(default)]
    pub storage: StorageConfig,

    /// Gait table upload to the device
    #[serde(default)]
    pub upload: UploadConfig,
}

impl CaptureConfig {
    /// Load configuration using the standard search order:
    /// 1. `$GAIT_CONFIG` environment variable
    /// 2. `./gait_config.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded capture config from {CONFIG_ENV_VAR}");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {CONFIG_ENV_VAR}, falling back");
                    }
                }
            } else {
                warn!(path = %path, "{CONFIG_ENV_VAR} points to non-existent file, falling back");
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded capture config from ./{LOCAL_CONFIG_FILE}");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{LOCAL_CONFIG_FILE}, using defaults");
                }
            }
        }

        info!("No {LOCAL_CONFIG_FILE} found, using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path and validate it.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Save config to a file, e.g. to seed a `gait_config.toml` with the defaults.
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = self.to_toml()?;
        std::fs::write(path, contents)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        info!(path = %path.display(), "Capture config saved");
        Ok(())
    }

    /// Validate all settings for internal consistency.
    ///
    /// Rules:
    /// - Buffer capacity, baud rate and read chunk must be > 0
    /// - Cycle duration bounds must be ordered and non-zero
    /// - Detection windows must hold at least three samples
    /// - Prompt markers must be non-empty strings
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        if self.buffers.capacity == 0 {
            errors.push("buffers.capacity must be > 0".to_string());
        }
        if self.link.baud_rate == 0 {
            errors.push("link.baud_rate must be > 0".to_string());
        }
        if self.link.read_chunk_bytes == 0 {
            errors.push("link.read_chunk_bytes must be > 0".to_string());
        }
        if self.link.raw_line_backlog == 0 {
            errors.push("link.raw_line_backlog must be > 0".to_string());
        }
        if self.link.prompt_markers.iter().any(String::is_empty) {
            errors.push("link.prompt_markers must not contain empty strings".to_string());
        }

        let c = &self.cycle;
        if c.min_duration_ms == 0 {
            errors.push("cycle.min_duration_ms must be > 0".to_string());
        }
        if c.max_duration_ms < c.min_duration_ms {
            errors.push(format!(
                "cycle.max_duration_ms ({}) must be >= cycle.min_duration_ms ({})",
                c.max_duration_ms, c.min_duration_ms
            ));
        }
        if c.min_samples == 0 {
            errors.push("cycle.min_samples must be > 0".to_string());
        }
        if c.trend_window == 0 {
            errors.push("cycle.trend_window must be > 0".to_string());
        }
        if c.peak_window < 3 {
            errors.push(format!("cycle.peak_window must be >= 3 (got {})", c.peak_window));
        }

        if self.storage.cycle_file.is_empty() {
            errors.push("storage.cycle_file must not be empty".to_string());
        }
        if self.upload.command.is_empty() {
            errors.push("upload.command must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

/// Configuration loading errors.
#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Serialize(e) => write!(f, "Config serialization error: {}", e),
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Link
// ============================================================================

/// Serial link and line framing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Serial port path, e.g. `/dev/ttyUSB0` or `COM3`. Overridable with `--port`.
    #[serde(default)]
    pub port: Option<String>,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Bytes requested per read
    #[serde(default = "default_read_chunk_bytes")]
    pub read_chunk_bytes: usize,

    /// Back-off after a failed read (ms)
    #[serde(default = "default_read_error_backoff_ms")]
    pub read_error_backoff_ms: u64,

    /// Raw text lines queued for display before new ones are dropped
    #[serde(default = "default_raw_line_backlog")]
    pub raw_line_backlog: usize,

    /// Lines starting with any of these are command echoes, not telemetry
    #[serde(default = "default_prompt_markers")]
    pub prompt_markers: Vec<String>,

    /// Sent by the CLI after a mode is activated (empty to disable)
    #[serde(default = "default_start_command")]
    pub start_command: String,

    /// Sent by the CLI before a mode is deactivated (empty to disable)
    #[serde(default = "default_stop_command")]
    pub stop_command: String,
}

fn default_baud_rate() -> u32 {
    defaults::BAUD_RATE
}
fn default_read_chunk_bytes() -> usize {
    defaults::READ_CHUNK_BYTES
}
fn default_read_error_backoff_ms() -> u64 {
    defaults::READ_ERROR_BACKOFF_MS
}
fn default_raw_line_backlog() -> usize {
    defaults::RAW_LINE_BACKLOG
}
fn default_prompt_markers() -> Vec<String> {
    defaults::PROMPT_MARKERS.iter().map(|m| (*m).to_string()).collect()
}
fn default_start_command() -> String {
    defaults::START_COMMAND.to_string()
}
fn default_stop_command() -> String {
    defaults::STOP_COMMAND.to_string()
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: default_baud_rate(),
            read_chunk_bytes: default_read_chunk_bytes(),
            read_error_backoff_ms: default_read_error_backoff_ms(),
            raw_line_backlog: default_raw_line_backlog(),
            prompt_markers: default_prompt_markers(),
            start_command: default_start_command(),
            stop_command: default_stop_command(),
        }
    }
}

impl LinkConfig {
    pub fn read_error_backoff(&self) -> Duration {
        Duration::from_millis(self.read_error_backoff_ms)
    }
}

// ============================================================================
// Buffers
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Samples retained per channel before the oldest is overwritten
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_capacity() -> usize {
    defaults::BUFFER_CAPACITY
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

// ============================================================================
// Cycle Detection
// ============================================================================

/// Which pairs of extrema close a gait cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeakPairing {
    /// A maximum closes at the next maximum, a minimum at the next minimum.
    #[default]
    SameKind,
    /// Every qualifying extremum is a boundary, regardless of kind.
    AnyKind,
}

/// Peak-based segmentation thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleConfig {
    #[serde(default = "default_min_duration_ms")]
    pub min_duration_ms: u64,

    /// Upper peak-to-peak bound; a cycle open longer than this is abandoned
    #[serde(default = "default_max_duration_ms")]
    pub max_duration_ms: u64,

    #[serde(default = "default_min_samples")]
    pub min_samples: usize,

    #[serde(default = "default_trend_window")]
    pub trend_window: usize,

    #[serde(default = "default_peak_window")]
    pub peak_window: usize,

    #[serde(default)]
    pub pairing: PeakPairing,
}

fn default_min_duration_ms() -> u64 {
    defaults::MIN_CYCLE_DURATION_MS
}
fn default_max_duration_ms() -> u64 {
    defaults::MAX_CYCLE_DURATION_MS
}
fn default_min_samples() -> usize {
    defaults::MIN_CYCLE_SAMPLES
}
fn default_trend_window() -> usize {
    defaults::TREND_WINDOW
}
fn default_peak_window() -> usize {
    defaults::PEAK_WINDOW
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            min_duration_ms: default_min_duration_ms(),
            max_duration_ms: default_max_duration_ms(),
            min_samples: default_min_samples(),
            trend_window: default_trend_window(),
            peak_window: default_peak_window(),
            pairing: PeakPairing::default(),
        }
    }
}

// ============================================================================
// Tasks
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Bounded join when stopping a background task (ms)
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,
}

fn default_join_timeout_ms() -> u64 {
    defaults::JOIN_TIMEOUT_MS
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            join_timeout_ms: default_join_timeout_ms(),
        }
    }
}

impl TaskConfig {
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

// ============================================================================
// Storage
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Latest-cycle file name inside `data_dir`
    #[serde(default = "default_cycle_file")]
    pub cycle_file: String,

    /// Overwrite the latest-cycle file each time a new cycle is detected
    #[serde(default = "default_autosave_cycle")]
    pub autosave_cycle: bool,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(defaults::DATA_DIR)
}
fn default_cycle_file() -> String {
    defaults::CYCLE_FILE.to_string()
}
fn default_autosave_cycle() -> bool {
    true
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            cycle_file: default_cycle_file(),
            autosave_cycle: default_autosave_cycle(),
        }
    }
}

impl StorageConfig {
    /// Full path of the autosaved latest-cycle file.
    pub fn cycle_path(&self) -> PathBuf {
        self.data_dir.join(&self.cycle_file)
    }
}

// ============================================================================
// Upload
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_upload_command")]
    pub command: String,

    /// Pause between the command and the payload so the device can switch modes (ms)
    #[serde(default = "default_handshake_delay_ms")]
    pub handshake_delay_ms: u64,

    /// Substring of the device line that confirms the table was loaded
    #[serde(default = "default_ack_marker")]
    pub ack_marker: String,

    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
}

impl UploadConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

fn default_upload_command() -> String {
    defaults::UPLOAD_COMMAND.to_string()
}
fn default_handshake_delay_ms() -> u64 {
    defaults::UPLOAD_HANDSHAKE_DELAY_MS
}
fn default_ack_marker() -> String {
    defaults::UPLOAD_ACK_MARKER.to_string()
}
fn default_ack_timeout_ms() -> u64 {
    defaults::UPLOAD_ACK_TIMEOUT_MS
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            command: default_upload_command(),
            handshake_delay_ms: default_handshake_delay_ms(),
            ack_marker: default_ack_marker(),
            ack_timeout_ms: default_ack_timeout_ms(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = CaptureConfig::default();
        assert!(config.validate().is_ok(), "Default config must always validate");
    }

    #[test]
    fn test_empty_toml_produces_defaults() {
        let config: CaptureConfig = toml::from_str("").expect("empty TOML should parse");
        assert_eq!(config.link.baud_rate, 115_200);
        assert_eq!(config.buffers.capacity, 2_000);
        assert_eq!(config.cycle.min_duration_ms, 800);
        assert_eq!(config.cycle.max_duration_ms, 3_000);
        assert_eq!(config.cycle.min_samples, 20);
        assert_eq!(config.cycle.pairing, PeakPairing::SameKind);
        assert_eq!(config.link.prompt_markers, vec![">".to_string(), "Command:".to_string()]);
    }

    #[test]
    fn test_partial_toml_override() {
        let toml_str = r#"
[link]
port = "/dev/ttyACM0"
baud_rate = 230400

[cycle]
min_duration_ms = 600
pairing = "any_kind"
"#;
        let config: CaptureConfig = toml::from_str(toml_str).expect("partial TOML should parse");
        assert_eq!(config.link.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.link.baud_rate, 230_400);
        assert_eq!(config.cycle.min_duration_ms, 600);
        assert_eq!(config.cycle.pairing, PeakPairing::AnyKind);
        // Non-overridden values retain defaults
        assert_eq!(config.cycle.max_duration_ms, 3_000);
        assert_eq!(config.link.start_command, "gc");
    }

    #[test]
    fn test_validation_catches_inverted_durations() {
        let mut config = CaptureConfig::default();
        config.cycle.min_duration_ms = 4_000;
        config.buffers.capacity = 0;
        match config.validate() {
            Err(ConfigError::Validation(errors)) => {
                assert_eq!(errors.len(), 2);
                assert!(errors.iter().any(|e| e.contains("max_duration_ms")));
                assert!(errors.iter().any(|e| e.contains("buffers.capacity")));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("gait_config.toml");

        let mut config = CaptureConfig::default();
        config.buffers.capacity = 500;
        config.storage.autosave_cycle = false;
        config.save_to_file(&path).expect("save");

        let loaded = CaptureConfig::load_from_file(&path).expect("load");
        assert_eq!(loaded.buffers.capacity, 500);
        assert!(!loaded.storage.autosave_cycle);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[cycle]\npeak_window = 2\n").expect("write");

        let result = CaptureConfig::load_from_file(&path);
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }
}
