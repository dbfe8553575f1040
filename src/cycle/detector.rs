//! Online peak-based gait cycle segmentation.
//!
//! The hip angle is quasi-periodic over a stride. The detector watches the sign
//! of successive angle deltas; when it flips, the middle of the last three
//! samples is classified as a local maximum (`>=` both neighbours) or minimum
//! (`<=` both). Two boundary peaks whose spacing lies within
//! `[min_duration_ms, max_duration_ms]` close a cycle, which is emitted as a
//! [`CycleRecord`] when it holds at least `min_samples` samples.
//!
//! With [`PeakPairing::SameKind`] only a peak of the same kind as the opening
//! one closes the cycle; the opposite extremum in between is the mid-stride
//! turning point. With [`PeakPairing::AnyKind`] every peak is a boundary.
//!
//! A cycle left open longer than `max_duration_ms` is abandoned and the
//! detector starts over from the next sample.

use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::config::{CycleConfig, PeakPairing};
use crate::types::CycleRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeakKind {
    Max,
    Min,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub time_ms: u64,
    pub angle: f64,
    pub kind: PeakKind,
}

/// Coarse detector state, mostly for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorPhase {
    /// No sample seen since creation or reset.
    Uninitialized,
    /// Tracking samples, no boundary peak yet.
    Armed,
    /// A boundary peak anchors the open cycle.
    Anchored,
}

#[derive(Debug, Clone)]
pub struct CycleDetector {
    config: CycleConfig,
    last_angle: Option<f64>,
    trend: VecDeque<f64>,
    window: VecDeque<(u64, f64)>,
    last_peak: Option<Peak>,
    cycle: Vec<(u64, f64, Option<f64>)>,
    emitted: u64,
    abandoned: u64,
}

impl CycleDetector {
    pub fn new(config: CycleConfig) -> Self {
        Self {
            trend: VecDeque::with_capacity(config.trend_window),
            window: VecDeque::with_capacity(config.peak_window),
            config,
            last_angle: None,
            last_peak: None,
            cycle: Vec::new(),
            emitted: 0,
            abandoned: 0,
        }
    }

    /// Back to `Uninitialized`. Counters are kept.
    pub fn reset(&mut self) {
        self.last_angle = None;
        self.trend.clear();
        self.window.clear();
        self.last_peak = None;
        self.cycle.clear();
    }

    pub fn phase(&self) -> DetectorPhase {
        match (self.last_angle, self.last_peak) {
            (None, _) => DetectorPhase::Uninitialized,
            (Some(_), None) => DetectorPhase::Armed,
            (Some(_), Some(_)) => DetectorPhase::Anchored,
        }
    }

    pub fn last_peak(&self) -> Option<Peak> {
        self.last_peak
    }

    /// Samples in the open cycle.
    pub fn pending_samples(&self) -> usize {
        self.cycle.len()
    }

    pub fn cycles_emitted(&self) -> u64 {
        self.emitted
    }

    pub fn cycles_abandoned(&self) -> u64 {
        self.abandoned
    }

    /// Feed one sample; returns a record when it confirms a completed cycle.
    pub fn push(&mut self, time_ms: u64, hip: f64, ankle: Option<f64>) -> Option<CycleRecord> {
        let Some(last_angle) = self.last_angle else {
            self.reset();
            self.last_angle = Some(hip);
            trace!(time_ms, hip, "Cycle detector armed");
            return None;
        };

        self.window.push_back((time_ms, hip));
        while self.window.len() > self.config.peak_window {
            self.window.pop_front();
        }

        let delta = hip - last_angle;
        let mut record = None;
        if let Some(&previous) = self.trend.back() {
            let flipped = (previous > 0.0 && delta < 0.0) || (previous < 0.0 && delta > 0.0);
            if flipped && self.window.len() >= 3 {
                if let Some(peak) = self.candidate_peak() {
                    record = self.on_peak(peak);
                }
            }
        }

        self.trend.push_back(delta);
        while self.trend.len() > self.config.trend_window {
            self.trend.pop_front();
        }
        self.last_angle = Some(hip);

        self.cycle.push((time_ms, hip, ankle));
        if let Some(&(start, _, _)) = self.cycle.first() {
            if time_ms.saturating_sub(start) > self.config.max_duration_ms {
                debug!(
                    start_ms = start,
                    time_ms,
                    samples = self.cycle.len(),
                    "Cycle open too long, abandoning"
                );
                self.cycle.clear();
                self.last_peak = None;
                self.abandoned += 1;
            }
        }

        record
    }

    /// Classify the middle of the last three window entries.
    fn candidate_peak(&self) -> Option<Peak> {
        let n = self.window.len();
        let (_, before) = self.window[n - 3];
        let (time_ms, angle) = self.window[n - 2];
        let (_, after) = self.window[n - 1];

        let kind = if angle >= before && angle >= after {
            PeakKind::Max
        } else if angle <= before && angle <= after {
            PeakKind::Min
        } else {
            return None;
        };
        Some(Peak {
            time_ms,
            angle,
            kind,
        })
    }

    fn on_peak(&mut self, peak: Peak) -> Option<CycleRecord> {
        let Some(anchor) = self.last_peak else {
            trace!(time_ms = peak.time_ms, kind = ?peak.kind, "First boundary peak");
            self.anchor_at(peak);
            return None;
        };

        if self.config.pairing == PeakPairing::SameKind && anchor.kind != peak.kind {
            return None;
        }

        let duration = peak.time_ms.saturating_sub(anchor.time_ms);
        let in_range = (self.config.min_duration_ms..=self.config.max_duration_ms).contains(&duration);
        let record = if !in_range {
            trace!(duration_ms = duration, "Peak spacing out of range");
            None
        } else if self.cycle.len() < self.config.min_samples {
            debug!(
                duration_ms = duration,
                samples = self.cycle.len(),
                "Cycle too sparse, not emitted"
            );
            None
        } else {
            CycleRecord::from_samples(&self.cycle)
        };

        if record.is_some() {
            self.emitted += 1;
        }
        self.anchor_at(peak);
        record
    }

    /// Make `peak` the cycle anchor and drop samples before it.
    fn anchor_at(&mut self, peak: Peak) {
        self.last_peak = Some(peak);
        self.cycle.retain(|&(t, _, _)| t >= peak.time_ms);
    }
}
