//! Shared data structures for the gait capture pipeline
//!
//! - [`TelemetrySample`]: one decoded device record
//! - [`Channel`]: the numeric series a record may carry
//! - [`CycleRecord`]: one detected peak-to-peak gait cycle

mod cycle;
mod telemetry;

pub use cycle::CycleRecord;
pub use telemetry::{Channel, TelemetrySample, HIP_KEY, TIMESTAMP_KEY};
