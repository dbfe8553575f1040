//! Timestamped session export folders.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::info;

use super::{save_cycle, save_history, StorageError};
use crate::buffers::HistorySnapshot;
use crate::types::CycleRecord;

pub const CYCLE_EXPORT_FILE: &str = "gait_cycle.json";
pub const HISTORY_EXPORT_FILE: &str = "realtime_data.json";

/// Files written by one [`export_session`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionExport {
    pub folder: PathBuf,
    pub cycle_file: Option<PathBuf>,
    pub history_file: Option<PathBuf>,
}

impl SessionExport {
    pub fn is_empty(&self) -> bool {
        self.cycle_file.is_none() && self.history_file.is_none()
    }
}

/// Folder name for an export taken at `at`: `gait_data_YYYYmmdd_HHMMSS`.
pub fn export_folder_name(at: DateTime<Local>) -> String {
    format!("gait_data_{}", at.format("%Y%m%d_%H%M%S"))
}

/// Write whatever data is present into `<root>/gait_data_YYYYmmdd_HHMMSS/`.
///
/// The cycle goes to `gait_cycle.json`, the history to `realtime_data.json`.
/// An empty history and a missing cycle are skipped; when both are absent
/// nothing is created.
pub fn export_session(
    root: &Path,
    at: DateTime<Local>,
    cycle: Option<&CycleRecord>,
    history: &HistorySnapshot,
) -> Result<SessionExport, StorageError> {
    let folder = root.join(export_folder_name(at));
    let mut export = SessionExport {
        folder: folder.clone(),
        cycle_file: None,
        history_file: None,
    };

    if let Some(record) = cycle.filter(|r| r.sample_count() > 0) {
        let path = folder.join(CYCLE_EXPORT_FILE);
        save_cycle(&path, record)?;
        export.cycle_file = Some(path);
    }
    if !history.is_empty() {
        let path = folder.join(HISTORY_EXPORT_FILE);
        save_history(&path, history)?;
        export.history_file = Some(path);
    }

    if export.is_empty() {
        info!("Nothing to export");
    } else {
        info!(folder = %folder.display(), "Session exported");
    }
    Ok(export)
}
