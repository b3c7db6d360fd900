use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::info;
use serde::{Deserialize, Serialize};

use crate::drive::DriveTelemetry;
use crate::estimator::Direction;

/// One row of session telemetry.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TickRecord {
    pub cycle_id: u64,
    pub timestamp: u64,
    pub reference_left: f64,
    pub reference_right: f64,
    pub speed_left: f64,
    pub speed_right: f64,
    pub ticks_left: i64,
    pub ticks_right: i64,
    pub torque_left: f64,
    pub torque_right: f64,
    pub direction_left: Direction,
    pub direction_right: Direction,
    pub compute_ns: u64,
    pub deadline_met: bool,
}

impl TickRecord {
    pub fn from_telemetry(
        cycle_id: u64,
        telemetry: &DriveTelemetry,
        compute_ns: u64,
        deadline_met: bool,
    ) -> Self {
        Self {
            cycle_id,
            timestamp: telemetry.timestamp,
            reference_left: telemetry.reference_left,
            reference_right: telemetry.reference_right,
            speed_left: telemetry.speed_left,
            speed_right: telemetry.speed_right,
            ticks_left: telemetry.ticks_left,
            ticks_right: telemetry.ticks_right,
            torque_left: telemetry.torque_left,
            torque_right: telemetry.torque_right,
            direction_left: telemetry.direction_left,
            direction_right: telemetry.direction_right,
            compute_ns,
            deadline_met,
        }
    }
}

/// Thread-safe telemetry sink. Clones share the same buffer.
#[derive(Clone, Default)]
pub struct TelemetryRecorder {
    records: Arc<Mutex<Vec<TickRecord>>>,
    pub missed_deadlines: Arc<AtomicUsize>,
}

impl TelemetryRecorder {
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(Vec::with_capacity(10_000))),
            missed_deadlines: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn record(&self, record: TickRecord) {
        if !record.deadline_met {
            self.missed_deadlines.fetch_add(1, Ordering::Relaxed);
        }
        self.lock().push(record);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn missed(&self) -> usize {
        self.missed_deadlines.load(Ordering::Relaxed)
    }

    pub fn records(&self) -> Vec<TickRecord> {
        self.lock().clone()
    }

    pub fn save_to_csv(&self, path: impl AsRef<Path>) -> Result<(), csv::Error> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let data = self.lock();
        let mut wtr = csv::Writer::from_path(path)?;
        for record in data.iter() {
            wtr.serialize(record)?;
        }
        wtr.flush()?;
        info!("saved {} telemetry rows to {}", data.len(), path.display());
        Ok(())
    }

    pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<TickRecord>, csv::Error> {
        let mut rdr = csv::Reader::from_path(path)?;
        rdr.deserialize().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<TickRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(cycle_id: u64, deadline_met: bool) -> TickRecord {
        TickRecord {
            cycle_id,
            timestamp: cycle_id * 1_210,
            reference_left: 50.0,
            reference_right: -50.0,
            speed_left: 48.5,
            speed_right: -47.25,
            ticks_left: 10,
            ticks_right: -9,
            torque_left: 81.0,
            torque_right: -80.0,
            direction_left: Direction::Forward,
            direction_right: Direction::Reverse,
            compute_ns: 2_500,
            deadline_met,
        }
    }

    #[test]
    fn clones_share_records_and_count_misses() {
        let recorder = TelemetryRecorder::new();
        let other = recorder.clone();
        recorder.record(record(0, true));
        other.record(record(1, false));
        assert_eq!(recorder.len(), 2);
        assert_eq!(recorder.missed(), 1);
    }

    #[test]
    fn csv_file_reads_back() {
        let dir = std::env::temp_dir().join(format!("diff-drive-metrics-{}", std::process::id()));
        let path = dir.join("session.csv");
        let recorder = TelemetryRecorder::new();
        for k in 0..3 {
            recorder.record(record(k, k != 1));
        }
        recorder.save_to_csv(&path).unwrap();
        let rows = TelemetryRecorder::load_csv(&path).unwrap();
        assert_eq!(rows, recorder.records());
        let _ = std::fs::remove_dir_all(dir);
    }
}
