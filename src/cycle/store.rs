//! Latest detected cycle, readable without blocking the detector.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::types::CycleRecord;

/// Holds the most recently completed [`CycleRecord`].
///
/// Each [`publish`](Self::publish) replaces the previous record and bumps the
/// generation, so pollers can detect a new cycle by comparing generations.
#[derive(Debug, Default)]
pub struct CycleStore {
    latest: ArcSwapOption<CycleRecord>,
    generation: AtomicU64,
}

impl CycleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, record: CycleRecord) -> u64 {
        self.latest.store(Some(Arc::new(record)));
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn latest(&self) -> Option<Arc<CycleRecord>> {
        self.latest.load_full()
    }

    /// Number of records published since creation. Not reset by [`clear`](Self::clear).
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn clear(&self) {
        self.latest.store(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(start: u64) -> CycleRecord {
        CycleRecord::from_samples(&[(start, 1.0, None), (start + 1_000, 2.0, None)]).expect("record")
    }

    #[test]
    fn test_publish_replaces_previous() {
        let store = CycleStore::new();
        assert!(store.latest().is_none());
        assert_eq!(store.publish(record(0)), 1);
        assert_eq!(store.publish(record(5_000)), 2);

        let latest = store.latest().expect("latest");
        assert_eq!(latest.device_start_ms, 5_000);
        assert_eq!(store.generation(), 2);
    }

    #[test]
    fn test_clear_keeps_generation() {
        let store = CycleStore::new();
        store.publish(record(0));
        store.clear();
        assert!(store.latest().is_none());
        assert_eq!(store.generation(), 1);
    }
}
