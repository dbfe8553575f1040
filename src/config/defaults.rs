//! System-wide default constants.
//!
//! Every value here is the built-in default for a field of
//! [`CaptureConfig`](super::CaptureConfig). Grouped by subsystem.

// ============================================================================
// Serial Link
// ============================================================================

/// Baud rate the device firmware is flashed with.
pub const BAUD_RATE: u32 = 115_200;

/// Size of a single read from the link (bytes).
pub const READ_CHUNK_BYTES: usize = 1024;

/// Pause after a failed read before the dispatcher retries (ms).
pub const READ_ERROR_BACKOFF_MS: u64 = 10;

/// Raw lines held for the display side before new ones are dropped.
pub const RAW_LINE_BACKLOG: usize = 1_000;

/// Line prefixes the firmware uses when echoing commands back.
pub const PROMPT_MARKERS: [&str; 2] = [">", "Command:"];

/// Command that starts streaming gait data on the device.
pub const START_COMMAND: &str = "gc";

/// Command that stops streaming gait data on the device.
pub const STOP_COMMAND: &str = "gcs";

// ============================================================================
// Buffers
// ============================================================================

/// Rolling history capacity per channel (samples).
///
/// 2 000 samples = 20 s at 100 Hz.
pub const BUFFER_CAPACITY: usize = 2_000;

// ============================================================================
// Cycle Detection
// ============================================================================

/// Shortest accepted peak-to-peak gait cycle (ms).
pub const MIN_CYCLE_DURATION_MS: u64 = 800;

/// Longest accepted peak-to-peak gait cycle (ms). Also the abandon timeout.
pub const MAX_CYCLE_DURATION_MS: u64 = 3_000;

/// Minimum samples a cycle must hold before it is emitted.
pub const MIN_CYCLE_SAMPLES: usize = 20;

/// Number of trailing angle deltas kept for trend-flip detection.
pub const TREND_WINDOW: usize = 5;

/// Number of timestamped samples kept for peak classification.
pub const PEAK_WINDOW: usize = 20;

// ============================================================================
// Tasks
// ============================================================================

/// Bounded wait when joining a stopped consumer or dispatcher task (ms).
pub const JOIN_TIMEOUT_MS: u64 = 2_000;

// ============================================================================
// Storage
// ============================================================================

/// Directory persisted cycles and session exports are written to.
pub const DATA_DIR: &str = "data";

/// File name of the autosaved latest cycle inside [`DATA_DIR`].
pub const CYCLE_FILE: &str = "gait_cycle_data.json";

// ============================================================================
// Gait Upload
// ============================================================================

/// Command that puts the device into gait-table receive mode.
pub const UPLOAD_COMMAND: &str = "loadgait";

/// Delay between the upload command and the JSON payload (ms).
pub const UPLOAD_HANDSHAKE_DELAY_MS: u64 = 100;

/// Text the firmware prints once a gait table has been accepted.
pub const UPLOAD_ACK_MARKER: &str = "Gait trajectory loaded";

/// How long to wait for that acknowledgement (ms).
pub const UPLOAD_ACK_TIMEOUT_MS: u64 = 1000;
