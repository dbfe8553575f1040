//! Capture pipeline: link → dispatcher → active mode → stores
//!
//! ```text
//! device bytes ─▶ SampleDispatcher ─▶ handoff (unbounded mpsc) ─▶ ModeConsumer
//!                       │                                           ├─▶ ChannelBufferStore
//!                       └─▶ raw-line channel (bounded)              └─▶ CycleDetector ─▶ CycleStore
//! ```

mod consumer;
mod mode;
mod session;
mod task;

pub use consumer::ConsumerStats;
pub use mode::{ModeCapabilities, ProcessingMode, FILTERED_CHANNELS, RAW_CHANNELS};
pub use session::{CaptureSession, SessionError, SessionStats};
