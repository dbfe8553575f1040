//! Extraction of telemetry records from framed text lines.
//!
//! The firmware prints one JSON object per line, but the stream also carries
//! command echoes, boot banners and the odd corrupted byte. A line is kept as
//! a sample only when the substring between its first `{` and last `}`
//! decodes to an object holding both `t` and `h`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::trace;

use super::stats::IngestCounters;
use crate::types::{Channel, TelemetrySample, HIP_KEY, TIMESTAMP_KEY};

/// What became of one framed line.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// Empty line or command echo; forwarded nowhere.
    Ignored,
    /// Forwarded to the raw-line log, no usable record in it.
    Text(String),
    /// Forwarded to the raw-line log and decoded into a sample.
    Sample { line: String, sample: TelemetrySample },
}

impl Extraction {
    /// The trimmed line to forward to the raw-line log, if any.
    pub fn line(&self) -> Option<&str> {
        match self {
            Extraction::Ignored => None,
            Extraction::Text(line) | Extraction::Sample { line, .. } => Some(line),
        }
    }
}

pub struct RecordExtractor {
    prompt_markers: Vec<String>,
    ack_marker: Option<String>,
    counters: Arc<IngestCounters>,
}

impl RecordExtractor {
    pub fn new(prompt_markers: Vec<String>, counters: Arc<IngestCounters>) -> Self {
        Self {
            prompt_markers,
            ack_marker: None,
            counters,
        }
    }

    /// Count lines containing `marker` as upload acknowledgements.
    ///
    /// The check runs before prompt filtering, since the firmware prefixes
    /// its status lines with `>>>`.
    pub fn with_ack_marker(mut self, marker: impl Into<String>) -> Self {
        let marker = marker.into();
        self.ack_marker = (!marker.is_empty()).then_some(marker);
        self
    }

    pub fn extract(&self, line: &str) -> Extraction {
        self.counters.line();

        let line = line.trim();
        if self.ack_marker.as_deref().is_some_and(|m| line.contains(m)) {
            self.counters.upload_ack();
        }
        if line.is_empty() || self.prompt_markers.iter().any(|m| line.starts_with(m.as_str())) {
            self.counters.ignored_line();
            return Extraction::Ignored;
        }

        let Some(fragment) = object_fragment(line) else {
            return Extraction::Text(line.to_string());
        };

        let object = match serde_json::from_str::<Map<String, Value>>(fragment) {
            Ok(object) => object,
            Err(e) => {
                trace!(error = %e, "Undecodable record fragment");
                self.counters.decode_error();
                return Extraction::Text(line.to_string());
            }
        };
        self.counters.decoded();

        match sample_from_object(&object) {
            Some(sample) => {
                for channel in Channel::ALL {
                    if sample.get(channel).is_some() {
                        self.counters.channel_seen(channel);
                    }
                }
                Extraction::Sample {
                    line: line.to_string(),
                    sample,
                }
            }
            None => {
                trace!(line, "Record missing t or h");
                self.counters.missing_field();
                Extraction::Text(line.to_string())
            }
        }
    }
}

/// Substring from the first `{` to the last `}`, when they are in that order.
fn object_fragment(line: &str) -> Option<&str> {
    let open = line.find('{')?;
    let close = line.rfind('}')?;
    (open < close).then(|| &line[open..=close])
}

fn sample_from_object(object: &Map<String, Value>) -> Option<TelemetrySample> {
    let timestamp_ms = object.get(TIMESTAMP_KEY).and_then(timestamp_value)?;
    let hip_angle = object.get(HIP_KEY).and_then(numeric_value)?;

    let fields: BTreeMap<String, f64> = object
        .iter()
        .filter(|(k, _)| k.as_str() != TIMESTAMP_KEY && k.as_str() != HIP_KEY)
        .filter_map(|(k, v)| numeric_value(v).map(|n| (k.clone(), n)))
        .collect();

    Some(TelemetrySample::from_parts(timestamp_ms, hip_angle, fields))
}

fn timestamp_value(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        // Some firmware builds print `t` as a float with no fraction.
        let f = value.as_f64()?;
        (f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64).then_some(f as u64)
    })
}

fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> (RecordExtractor, Arc<IngestCounters>) {
        let counters = Arc::new(IngestCounters::new());
        let markers = vec![">".to_string(), "Command:".to_string()];
        (RecordExtractor::new(markers, Arc::clone(&counters)), counters)
    }

    #[test]
    fn test_minimal_record_accepted() {
        let (ex, counters) = extractor();
        match ex.extract(r#"{"t":1234,"h":15.5}"#) {
            Extraction::Sample { sample, .. } => {
                assert_eq!(sample.timestamp_ms, 1234);
                assert_eq!(sample.hip_angle, 15.5);
                assert_eq!(sample.fields().count(), 0);
            }
            other => panic!("expected sample, got {other:?}"),
        }
        assert_eq!(counters.snapshot().presence(Channel::Hip), 1);
    }

    #[test]
    fn test_missing_hip_rejected() {
        let (ex, counters) = extractor();
        let out = ex.extract(r#"{"t":1234}"#);
        assert_eq!(out, Extraction::Text(r#"{"t":1234}"#.to_string()));
        let stats = counters.snapshot();
        assert_eq!(stats.objects_decoded, 1);
        assert_eq!(stats.missing_fields, 1);
    }

    #[test]
    fn test_unquoted_keys_discarded() {
        let (ex, counters) = extractor();
        let out = ex.extract("{t:1234,h:15.5}");
        assert!(matches!(out, Extraction::Text(_)));
        assert_eq!(counters.snapshot().decode_errors, 1);
    }

    #[test]
    fn test_embedded_record_with_optional_fields() {
        let (ex, counters) = extractor();
        let line = r#"  DBG {"t":50,"h":-2.25,"hf":-2.0,"hvf":11.5,"phase":1,"s":0.4,"tag":"x"} tail  "#;
        let Extraction::Sample { line: fwd, sample } = ex.extract(line) else {
            panic!("expected sample");
        };
        assert!(fwd.starts_with("DBG"));
        assert_eq!(sample.get(Channel::HipFiltered), Some(-2.0));
        assert_eq!(sample.get(Channel::HipVelocity), Some(11.5));
        assert_eq!(sample.get(Channel::Phase), Some(1.0));
        assert_eq!(sample.get(Channel::SwingProgress), Some(0.4));
        assert_eq!(sample.get(Channel::Ankle), None);
        assert_eq!(sample.field("tag"), None);

        let stats = counters.snapshot();
        assert_eq!(stats.presence(Channel::Phase), 1);
        assert_eq!(stats.presence(Channel::Ankle), 0);
    }

    #[test]
    fn test_prompt_and_empty_lines_ignored() {
        let (ex, counters) = extractor();
        assert_eq!(ex.extract("> gc"), Extraction::Ignored);
        assert_eq!(ex.extract("Command: {\"t\":1,\"h\":1}"), Extraction::Ignored);
        assert_eq!(ex.extract("   \r"), Extraction::Ignored);
        let stats = counters.snapshot();
        assert_eq!(stats.lines, 3);
        assert_eq!(stats.ignored_lines, 3);
    }

    #[test]
    fn test_upload_ack_counted_before_prompt_filter() {
        let (ex, counters) = extractor();
        let ex = ex.with_ack_marker("Gait trajectory loaded");
        assert_eq!(ex.extract(">>> Gait trajectory loaded: 121 points, duration=1.20 s"), Extraction::Ignored);
        assert_eq!(ex.extract("> gc"), Extraction::Ignored);
        assert_eq!(counters.snapshot().upload_acks, 1);

        let (plain, counters) = extractor();
        let plain = plain.with_ack_marker("");
        assert_eq!(plain.extract(">>> Gait trajectory loaded successfully!"), Extraction::Ignored);
        assert_eq!(counters.snapshot().upload_acks, 0);
    }

    #[test]
    fn test_plain_text_forwarded() {
        let (ex, _) = extractor();
        assert_eq!(ex.extract("IMU ready"), Extraction::Text("IMU ready".to_string()));
        assert_eq!(ex.extract("} backwards {"), Extraction::Text("} backwards {".to_string()));
    }

    #[test]
    fn test_timestamp_must_be_non_negative_integer() {
        let (ex, _) = extractor();
        assert!(matches!(ex.extract(r#"{"t":-5,"h":1.0}"#), Extraction::Text(_)));
        assert!(matches!(ex.extract(r#"{"t":12.5,"h":1.0}"#), Extraction::Text(_)));
        assert!(matches!(ex.extract(r#"{"t":12.0,"h":1.0}"#), Extraction::Sample { .. }));
    }
}
