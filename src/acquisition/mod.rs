//! Telemetry acquisition module
//!
//! Turns the device's serial byte stream into [`TelemetrySample`](crate::types::TelemetrySample)s.

pub mod dispatcher;
pub mod framer;
pub mod link;
pub mod record;
pub mod stats;

pub use dispatcher::{DispatcherExit, SampleDispatcher};
pub use framer::LineFramer;
pub use link::{list_ports, open_serial, CommandWriter, LinkError, PortInfo};
pub use record::{Extraction, RecordExtractor};
pub use stats::{IngestCounters, IngestStats};
