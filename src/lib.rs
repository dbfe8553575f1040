//! gaitscope: Gait Telemetry Capture
//!
//! Ingests JSON telemetry lines from a gait device over a serial link, keeps
//! bounded rolling history per channel and segments gait cycles online.
//!
//! ## Architecture
//!
//! - **Acquisition**: line framing, record extraction, serial link, dispatcher task
//! - **Buffers**: fixed-capacity lock-step channel history
//! - **Cycle**: peak-based cycle detector and latest-cycle store
//! - **Pipeline**: processing modes and the capture session that owns them
//! - **Storage**: JSON cycle/history files and session exports

pub mod acquisition;
pub mod buffers;
pub mod config;
pub mod cycle;
pub mod pipeline;
pub mod storage;
pub mod types;

// Re-export configuration
pub use config::CaptureConfig;

// Re-export commonly used types
pub use types::{Channel, CycleRecord, TelemetrySample};

pub use buffers::{ChannelBuffer, ChannelBufferStore, HistorySnapshot};
pub use cycle::{CycleDetector, CycleStore};
pub use pipeline::{CaptureSession, ProcessingMode, SessionError};
