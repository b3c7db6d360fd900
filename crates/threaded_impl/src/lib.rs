//! Scripted drive session on plain threads.
//!
//! The simulated capture hardware runs on one thread, the control loop on
//! another, and the calling thread plays the command script into the
//! control loop through a channel.

pub mod control;
pub mod sensor;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::info;
use thiserror::Error;

use common::config::{ConfigError, RobotConfig};
use common::sim::SharedPlant;
use common::timing::TimingStats;
use common::{DriveController, SharedDiagnostics, TelemetryRecorder};

pub use control::DriveCommand;

const CAPTURE_PERIOD: Duration = Duration::from_millis(1);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{0} thread panicked")]
    ThreadPanicked(&'static str),
}

pub struct SessionReport {
    pub recorder: TelemetryRecorder,
    pub timing: TimingStats,
    pub diagnostics: Arc<SharedDiagnostics>,
}

/// Run the configured command script against the simulated robot for
/// `session.duration_secs` and hand back what was recorded.
pub fn run_session(config: &RobotConfig) -> Result<SessionReport, SessionError> {
    config.validate()?;

    let plant = SharedPlant::new(config.sim);
    let diagnostics = Arc::new(SharedDiagnostics::default());
    let recorder = TelemetryRecorder::new();
    let drive = DriveController::new(plant.capture_encoder(), plant.motor(), &config.control)?
        .with_diagnostics(diagnostics.clone());

    let period = Duration::from_millis(config.control.period_ms);
    let duration = Duration::from_secs(config.session.duration_secs);
    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let (tx, rx) = mpsc::channel();
    let start_time = Instant::now();

    info!(
        "session started: {:?} at {:?} per tick, {} script steps",
        duration,
        period,
        config.session.script.len()
    );

    let capture = {
        let plant = plant.clone();
        let shutdown_flag = shutdown_flag.clone();
        thread::spawn(move || {
            sensor::run_capture_thread(plant, CAPTURE_PERIOD, shutdown_flag, start_time)
        })
    };

    let control = {
        let recorder = recorder.clone();
        let diagnostics = diagnostics.clone();
        let shutdown_flag = shutdown_flag.clone();
        thread::spawn(move || {
            control::run_control_thread(
                drive,
                period,
                rx,
                recorder,
                diagnostics,
                shutdown_flag,
                start_time,
            )
        })
    };

    for step in &config.session.script {
        let at = start_time + Duration::from_millis(step.at_ms);
        if at > start_time + duration {
            break;
        }
        let now = Instant::now();
        if now < at {
            thread::sleep(at - now);
        }
        // a send error means the control thread is gone; join reports why
        if tx.send(DriveCommand::SetSpeed { left: step.left, right: step.right }).is_err() {
            break;
        }
    }

    let end = start_time + duration;
    let now = Instant::now();
    if now < end {
        thread::sleep(end - now);
    }
    let _ = tx.send(DriveCommand::Stop);
    shutdown_flag.store(true, Ordering::Relaxed);

    let timer = control
        .join()
        .map_err(|_| SessionError::ThreadPanicked("control"))?;
    capture
        .join()
        .map_err(|_| SessionError::ThreadPanicked("capture"))?;

    let timing = timer.stats();
    info!(
        "session finished: {} ticks, {} late, tick compute mean {:?} max {:?}",
        recorder.len(),
        recorder.missed(),
        timing.mean,
        timing.max
    );

    Ok(SessionReport { recorder, timing, diagnostics })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::config::ScriptStep;
    use common::Direction;

    #[test]
    fn short_session_records_every_tick() {
        let mut config = RobotConfig::default();
        config.session.duration_secs = 1;
        config.session.script = vec![
            ScriptStep { at_ms: 0, left: 50.0, right: 50.0 },
            ScriptStep { at_ms: 2_000, left: -50.0, right: -50.0 },
        ];

        let report = run_session(&config).unwrap();
        let records = report.recorder.records();
        // 100 ticks at 10 ms, with slack for a loaded machine
        assert!(records.len() > 50, "only {} ticks", records.len());
        assert!(records.windows(2).all(|w| w[1].cycle_id == w[0].cycle_id + 1));
        assert!(records.iter().all(|r| r.reference_left >= 0.0));

        let last = records.last().unwrap();
        assert_eq!(last.direction_left, Direction::Forward);
        assert!(last.ticks_left > 0);
        assert_eq!(report.timing.count, records.len() as u64);
        assert!(report.diagnostics.snapshot().latches >= 2);
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let mut config = RobotConfig::default();
        config.control.period_ms = 0;
        assert!(matches!(run_session(&config), Err(SessionError::Config(_))));
    }
}
