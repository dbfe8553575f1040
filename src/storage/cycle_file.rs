//! Persisted gait cycle file and device upload payload.

use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{
    check_len, format_timestamp, parse_timestamp, read_json, write_json, StorageError,
    CYCLE_DATA_TYPE,
};
use crate::types::CycleRecord;

#[derive(Debug, Serialize, Deserialize)]
struct CycleFile {
    timestamp: String,
    #[serde(default = "default_data_type")]
    data_type: String,
    /// Seconds
    cycle_duration: f64,
    data_points: usize,
    time: Vec<f64>,
    hip_angle: Vec<f64>,
    ankle_angle: Vec<Option<f64>>,
    #[serde(default)]
    device_start_ms: u64,
}

fn default_data_type() -> String {
    CYCLE_DATA_TYPE.to_string()
}

/// Write `record` to `path` as pretty JSON.
pub fn save_cycle(path: &Path, record: &CycleRecord) -> Result<(), StorageError> {
    let file = CycleFile {
        timestamp: format_timestamp(record.created_at),
        data_type: default_data_type(),
        cycle_duration: record.duration_secs,
        data_points: record.sample_count(),
        time: record.time.clone(),
        hip_angle: record.hip_angle.clone(),
        ankle_angle: record.ankle_angle.clone(),
        device_start_ms: record.device_start_ms,
    };
    write_json(path, &file)?;
    info!(
        path = %path.display(),
        samples = file.data_points,
        duration_s = file.cycle_duration,
        "Gait cycle saved"
    );
    Ok(())
}

/// Read a cycle file, checking its tag and that all series have equal length.
pub fn load_cycle(path: &Path) -> Result<CycleRecord, StorageError> {
    let file: CycleFile = read_json(path)?;

    if file.data_type != CYCLE_DATA_TYPE {
        return Err(StorageError::DataType {
            path: path.to_path_buf(),
            expected: CYCLE_DATA_TYPE,
            found: file.data_type,
        });
    }
    let n = file.time.len();
    check_len(path, "hip_angle", file.hip_angle.len(), n)?;
    check_len(path, "ankle_angle", file.ankle_angle.len(), n)?;
    if file.data_points != n {
        warn!(path = %path.display(), data_points = file.data_points, actual = n, "data_points disagrees with series length");
    }

    let created_at = parse_timestamp(&file.timestamp).unwrap_or_else(|| {
        warn!(path = %path.display(), timestamp = %file.timestamp, "Unparseable cycle timestamp");
        Utc::now()
    });

    info!(path = %path.display(), samples = n, "Gait cycle loaded");
    Ok(CycleRecord {
        created_at,
        device_start_ms: file.device_start_ms,
        duration_secs: file.cycle_duration,
        time: file.time,
        hip_angle: file.hip_angle,
        ankle_angle: file.ankle_angle,
    })
}

/// Largest gait table the device firmware accepts.
pub const MAX_UPLOAD_POINTS: usize = 200;

#[derive(Serialize)]
struct UploadPayload<'a> {
    data_type: &'static str,
    cycle_duration: f64,
    data_points: usize,
    time: &'a [f64],
    hip_angle: &'a [f64],
    ankle_angle: Vec<f64>,
}

/// Single-line JSON gait table for the device's `loadgait` receiver.
///
/// `cycle_duration` is the last relative time value, which the firmware uses
/// as the table period. The firmware reads every ankle slot as a float and
/// holds at most [`MAX_UPLOAD_POINTS`] points, so records with gaps in the
/// ankle series or too many points are refused here.
pub fn upload_payload(record: &CycleRecord) -> Result<String, StorageError> {
    let points = record.sample_count();
    if points == 0 {
        return Err(StorageError::EmptyCycle);
    }
    if points > MAX_UPLOAD_POINTS {
        return Err(StorageError::TooManyPoints {
            points,
            max: MAX_UPLOAD_POINTS,
        });
    }
    let ankle_angle = record
        .ankle_angle
        .iter()
        .copied()
        .collect::<Option<Vec<f64>>>()
        .ok_or_else(|| StorageError::MissingAnkle {
            missing: record.ankle_angle.iter().filter(|a| a.is_none()).count(),
        })?;

    let payload = UploadPayload {
        data_type: CYCLE_DATA_TYPE,
        cycle_duration: record.time.last().copied().unwrap_or(0.0),
        data_points: points,
        time: &record.time,
        hip_angle: &record.hip_angle,
        ankle_angle,
    };
    Ok(serde_json::to_string(&payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> CycleRecord {
        let samples: Vec<(u64, f64, Option<f64>)> = (0..25u64)
            .map(|i| {
                let t = 10_000 + i * 60;
                let hip = (i as f64 * 0.261_799_387_799_149_4).sin() * 31.7;
                let ankle = (i % 7 != 3).then(|| hip / 3.0 + 0.1);
                (t, hip, ankle)
            })
            .collect();
        CycleRecord::from_samples(&samples).expect("record")
    }

    #[test]
    fn test_cycle_round_trip_is_exact() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested/gait_cycle_data.json");
        let record = sample_record();

        save_cycle(&path, &record).expect("save");
        let loaded = load_cycle(&path).expect("load");

        assert_eq!(loaded, record);
        assert_eq!(loaded.duration_secs.to_bits(), record.duration_secs.to_bits());
        assert_eq!(loaded.sample_count(), 25);
    }

    #[test]
    fn test_missing_ankle_written_as_null() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cycle.json");
        save_cycle(&path, &sample_record()).expect("save");

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(raw["data_type"], "gait_cycle");
        assert_eq!(raw["data_points"], 25);
        assert!(raw["ankle_angle"][3].is_null());
    }

    #[test]
    fn test_loads_legacy_file_without_device_start() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("legacy.json");
        std::fs::write(
            &path,
            r#"{"timestamp":"2024-11-02T15:04:05.123456","cycle_duration":1.1,"data_points":2,
                "time":[0.0,1.1],"hip_angle":[12,14.5],"ankle_angle":[1.0,2.0]}"#,
        )
        .expect("write");

        let record = load_cycle(&path).expect("load");
        assert_eq!(record.device_start_ms, 0);
        assert_eq!(record.hip_angle, vec![12.0, 14.5]);
        assert_eq!(record.ankle_angle, vec![Some(1.0), Some(2.0)]);
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.json");
        std::fs::write(
            &path,
            r#"{"timestamp":"x","data_type":"gait_cycle","cycle_duration":1.0,"data_points":2,
                "time":[0.0,1.0],"hip_angle":[1.0],"ankle_angle":[null,null]}"#,
        )
        .expect("write");
        assert!(matches!(load_cycle(&path), Err(StorageError::LengthMismatch { .. })));
    }

    #[test]
    fn test_wrong_data_type_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("realtime.json");
        std::fs::write(
            &path,
            r#"{"timestamp":"x","data_type":"realtime","cycle_duration":0.0,"data_points":0,
                "time":[],"hip_angle":[],"ankle_angle":[]}"#,
        )
        .expect("write");
        assert!(matches!(load_cycle(&path), Err(StorageError::DataType { .. })));
    }

    fn complete_record(points: u64) -> CycleRecord {
        let samples: Vec<(u64, f64, Option<f64>)> = (0..points)
            .map(|i| (2_000 + i * 10, i as f64 * 0.5, Some(-(i as f64) * 0.25)))
            .collect();
        CycleRecord::from_samples(&samples).expect("record")
    }

    #[test]
    fn test_upload_payload_is_single_line() {
        let record = complete_record(121);
        let payload = upload_payload(&record).expect("encode");
        assert!(!payload.contains('\n'));

        let value: serde_json::Value = serde_json::from_str(&payload).expect("json");
        assert_eq!(value["data_type"], "gait_cycle");
        assert_eq!(value["data_points"], 121);
        assert_eq!(value["cycle_duration"].as_f64(), Some(1.2));
        assert_eq!(value["ankle_angle"][4].as_f64(), Some(-1.0));
        assert!(value.get("timestamp").is_none());
    }

    #[test]
    fn test_upload_rejects_ankle_gaps() {
        // Indices 3, 10, 17 and 24 lack an ankle angle.
        let err = upload_payload(&sample_record()).expect_err("gaps");
        assert!(matches!(err, StorageError::MissingAnkle { missing: 4 }));
    }

    #[test]
    fn test_upload_point_limit() {
        assert!(upload_payload(&complete_record(MAX_UPLOAD_POINTS as u64)).is_ok());

        let err = upload_payload(&complete_record(251)).expect_err("too long");
        assert!(matches!(
            err,
            StorageError::TooManyPoints {
                points: 251,
                max: MAX_UPLOAD_POINTS
            }
        ));
    }
}
