//! Gait cycle segmentation
//!
//! - [`CycleDetector`]: stateful peak finder over the raw hip angle
//! - [`CycleStore`]: the most recent completed cycle

mod detector;
mod store;

pub use detector::{CycleDetector, DetectorPhase, Peak, PeakKind};
pub use store::CycleStore;
