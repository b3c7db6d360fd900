use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};

use common::metrics::TickRecord;
use common::{DriveController, SharedDiagnostics, TelemetryRecorder, TickTimer};
use common::{Encoder, Motor};

/// Late ticks reported individually before going quiet.
const LATE_TICK_WARNINGS: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DriveCommand {
    SetSpeed { left: f64, right: f64 },
    Stop,
}

/// Control side: ticks the drive on absolute deadlines and applies queued
/// commands between ticks. The drive is owned by this thread alone.
pub fn run_control_thread<E: Encoder, M: Motor>(
    mut drive: DriveController<E, M>,
    period: Duration,
    commands: Receiver<DriveCommand>,
    recorder: TelemetryRecorder,
    diagnostics: Arc<SharedDiagnostics>,
    shutdown_flag: Arc<AtomicBool>,
    start_time: Instant,
) -> TickTimer {
    let mut timer = TickTimer::new();
    let mut cycle_id = 0u64;
    let mut next_tick = start_time;

    while !shutdown_flag.load(Ordering::Relaxed) {
        let expected = next_tick;
        next_tick += period;

        let now = Instant::now();
        if now < expected {
            thread::sleep(expected - now);
        }

        while let Ok(command) = commands.try_recv() {
            match command {
                DriveCommand::SetSpeed { left, right } => {
                    debug!("reference set to ({}, {})", left, right);
                    drive.run(left, right);
                }
                DriveCommand::Stop => drive.run(0.0, 0.0),
            }
        }

        timer.tic();
        drive.tick();
        let compute = timer.toc();

        let lateness = Instant::now().saturating_duration_since(expected);
        let deadline_met = lateness < period;
        if !deadline_met {
            let late = diagnostics.record_late_tick();
            if late <= LATE_TICK_WARNINGS {
                warn!("tick {} finished {:?} after its start deadline", cycle_id, lateness);
            }
        }

        recorder.record(TickRecord::from_telemetry(
            cycle_id,
            &drive.telemetry(),
            compute.as_nanos() as u64,
            deadline_met,
        ));
        cycle_id += 1;
    }

    drive.stop();
    timer
}
