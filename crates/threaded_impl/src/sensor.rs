use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::sim::SharedPlant;

/// Capture side of the simulated robot: advances the plant on its own
/// fixed schedule, independent of the control loop reading it.
pub fn run_capture_thread(
    plant: SharedPlant,
    period: Duration,
    shutdown_flag: Arc<AtomicBool>,
    start_time: Instant,
) {
    let mut next_tick = start_time;
    let mut last = start_time;

    while !shutdown_flag.load(Ordering::Relaxed) {
        let expected = next_tick;
        next_tick += period;

        let now = Instant::now();
        if now < expected {
            thread::sleep(expected - now);
        }

        // integrate over the real elapsed time so a late wakeup does not
        // slow the plant down
        let actual = Instant::now();
        plant.advance(actual.duration_since(last).as_secs_f64());
        last = actual;
    }
}
