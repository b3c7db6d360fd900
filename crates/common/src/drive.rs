use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, ControlConfig};
use crate::diagnostics::SharedDiagnostics;
use crate::estimator::{Direction, DirectionEstimator, Transition};
use crate::pid::PidController;
use crate::wheel::WheelLoop;
use crate::{Encoder, Motor};

/// Everything the controller knows after the latest tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriveTelemetry {
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
}

/// Two independent wheel loops driven by one tick.
///
/// The controller does no locking of its own. `run` and `tick` are meant to
/// be called from the same thread; anything else has to serialize access.
pub struct DriveController<E, M> {
    encoder: E,
    motor: M,
    left: WheelLoop,
    right: WheelLoop,
    timestamp: u64,
    diagnostics: Option<Arc<SharedDiagnostics>>,
}

impl<E: Encoder, M: Motor> DriveController<E, M> {
    pub fn new(encoder: E, motor: M, config: &ControlConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            encoder,
            motor,
            left: build_wheel(config)?,
            right: build_wheel(config)?,
            timestamp: 0,
            diagnostics: None,
        })
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<SharedDiagnostics>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    /// Set new reference speeds. They take effect on the next `tick`.
    pub fn run(&mut self, speed_left: f64, speed_right: f64) {
        self.left.set_reference(speed_left);
        self.right.set_reference(speed_right);
    }

    /// One control period: read both encoders, update both loops, command
    /// both motors in a single call.
    pub fn tick(&mut self) {
        let (sample_left, sample_right) = self.encoder.read();
        self.timestamp = sample_left.timestamp.max(sample_right.timestamp);

        let (torque_left, transition_left) = self.left.update(&sample_left);
        let (torque_right, transition_right) = self.right.update(&sample_right);
        self.note_transition("left", transition_left);
        self.note_transition("right", transition_right);

        self.motor.run(torque_left, torque_right);

        if let Some(diagnostics) = &self.diagnostics {
            diagnostics.record_tick();
        }
    }

    /// Command zero speed and apply it immediately.
    pub fn stop(&mut self) {
        self.run(0.0, 0.0);
        self.tick();
    }

    pub fn ticks(&self) -> (i64, i64) {
        (self.left.ticks(), self.right.ticks())
    }

    pub fn speed(&self) -> (f64, f64) {
        (self.left.speed(), self.right.speed())
    }

    pub fn reference(&self) -> (f64, f64) {
        (self.left.reference_speed(), self.right.reference_speed())
    }

    pub fn torque(&self) -> (f64, f64) {
        (self.left.torque(), self.right.torque())
    }

    pub fn direction(&self) -> (Direction, Direction) {
        (self.left.direction(), self.right.direction())
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn left(&self) -> &WheelLoop {
        &self.left
    }

    pub fn right(&self) -> &WheelLoop {
        &self.right
    }

    pub fn telemetry(&self) -> DriveTelemetry {
        DriveTelemetry {
            timestamp: self.timestamp,
            reference_left: self.left.reference_speed(),
            reference_right: self.right.reference_speed(),
            speed_left: self.left.speed(),
            speed_right: self.right.speed(),
            ticks_left: self.left.ticks(),
            ticks_right: self.right.ticks(),
            torque_left: self.left.torque(),
            torque_right: self.right.torque(),
            direction_left: self.left.direction(),
            direction_right: self.right.direction(),
        }
    }

    /// Give the collaborators back, e.g. to release the hardware after a
    /// final `stop`.
    pub fn into_parts(self) -> (E, M) {
        (self.encoder, self.motor)
    }

    fn note_transition(&self, wheel: &str, transition: Option<Transition>) {
        let Some(transition) = transition else {
            return;
        };
        match transition {
            Transition::Latched(direction) => {
                debug!("{} wheel latched {:?} at t={}", wheel, direction, self.timestamp);
                if let Some(diagnostics) = &self.diagnostics {
                    diagnostics.record_latch();
                }
            }
            Transition::Released => {
                debug!("{} wheel direction released at t={}", wheel, self.timestamp);
                if let Some(diagnostics) = &self.diagnostics {
                    diagnostics.record_release();
                }
            }
        }
    }
}

fn build_wheel(config: &ControlConfig) -> Result<WheelLoop, ConfigError> {
    let pid = PidController::from_gains(config.pid.gains(), config.pid.anti_windup)?;
    let estimator = DirectionEstimator::new(config.estimator)?;
    Ok(WheelLoop::new(pid, estimator, config.torque_limit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlantParams;
    use crate::sim::SharedPlant;
    use crate::RawSample;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::atomic::Ordering;

    /// Encoder replaying a fixed script; the last entry repeats.
    struct ScriptedEncoder {
        samples: Vec<(RawSample, RawSample)>,
        cursor: usize,
    }

    impl Encoder for ScriptedEncoder {
        fn read(&mut self) -> (RawSample, RawSample) {
            let idx = self.cursor.min(self.samples.len() - 1);
            self.cursor += 1;
            self.samples[idx]
        }
    }

    #[derive(Clone, Default)]
    struct RecordingMotor {
        calls: Rc<RefCell<Vec<(f64, f64)>>>,
    }

    impl Motor for RecordingMotor {
        fn run(&mut self, torque_left: f64, torque_right: f64) {
            self.calls.borrow_mut().push((torque_left, torque_right));
        }
    }

    fn scripted(n: u64) -> ScriptedEncoder {
        let samples = (0..n)
            .map(|k| {
                let s = RawSample { raw_ticks: k, raw_speed: 4_000, timestamp: 1_210 * k };
                (s, s)
            })
            .collect();
        ScriptedEncoder { samples, cursor: 0 }
    }

    #[test]
    fn run_has_no_immediate_side_effect() {
        let motor = RecordingMotor::default();
        let calls = motor.calls.clone();
        let mut drive = DriveController::new(scripted(10), motor, &ControlConfig::default()).unwrap();

        drive.run(40.0, -40.0);
        assert!(calls.borrow().is_empty());
        assert_eq!(drive.reference(), (40.0, -40.0));

        drive.tick();
        assert_eq!(calls.borrow().len(), 1);
        let (left, right) = calls.borrow()[0];
        assert!(left > 0.0 && right < 0.0);
    }

    #[test]
    fn both_wheels_use_the_same_read() {
        let motor = RecordingMotor::default();
        let mut drive = DriveController::new(scripted(30), motor, &ControlConfig::default()).unwrap();
        drive.run(20.0, 20.0);
        for _ in 0..30 {
            drive.tick();
        }
        assert_eq!(drive.ticks().0, drive.ticks().1);
        assert_eq!(drive.speed().0, drive.speed().1);
        assert_eq!(drive.timestamp(), 1_210 * 29);
    }

    #[test]
    fn torques_stay_inside_actuator_range() {
        let motor = RecordingMotor::default();
        let calls = motor.calls.clone();
        let mut drive = DriveController::new(scripted(5), motor, &ControlConfig::default()).unwrap();
        drive.run(1e6, -1e6);
        for _ in 0..50 {
            drive.tick();
        }
        for (left, right) in calls.borrow().iter() {
            assert!(left.abs() <= 100.0 && right.abs() <= 100.0);
        }
    }

    #[test]
    fn rejects_zero_torque_limit() {
        let config = ControlConfig { torque_limit: 0.0, ..ControlConfig::default() };
        assert!(DriveController::new(scripted(1), RecordingMotor::default(), &config).is_err());
    }

    #[test]
    fn reversal_passes_through_unknown_on_simulated_plant() {
        let config = ControlConfig::default();
        let plant = SharedPlant::new(PlantParams::default());
        let diagnostics = Arc::new(SharedDiagnostics::default());
        let mut drive = DriveController::new(plant.lockstep_encoder(0.01), plant.motor(), &config)
            .unwrap()
            .with_diagnostics(diagnostics.clone());

        drive.run(50.0, 50.0);
        for _ in 0..150 {
            drive.tick();
        }
        assert_eq!(drive.direction(), (Direction::Forward, Direction::Forward));
        assert!(drive.speed().0 > 30.0, "left speed {}", drive.speed().0);
        let forward_ticks = drive.ticks().0;
        assert!(forward_ticks > 0);

        drive.run(-50.0, -50.0);
        let mut seen_unknown = false;
        let mut reversed = false;
        for _ in 0..300 {
            drive.tick();
            match drive.left().direction() {
                Direction::Unknown => {
                    seen_unknown = true;
                    assert_eq!(drive.left().speed(), 0.0);
                }
                Direction::Reverse => {
                    assert!(seen_unknown, "flipped to reverse without passing through unknown");
                    reversed = true;
                }
                Direction::Forward => assert!(!reversed),
            }
        }
        assert!(reversed);
        assert!(drive.speed().0 < -30.0, "left speed {}", drive.speed().0);
        assert!(drive.ticks().0 < forward_ticks);
        assert!(diagnostics.latches.load(Ordering::Relaxed) >= 4);
        assert!(diagnostics.releases.load(Ordering::Relaxed) >= 2);
    }

    #[test]
    fn stop_coasts_both_motors() {
        let plant = SharedPlant::new(PlantParams::default());
        let mut drive =
            DriveController::new(plant.lockstep_encoder(0.01), plant.motor(), &ControlConfig::default())
                .unwrap();
        drive.run(40.0, 40.0);
        for _ in 0..100 {
            drive.tick();
        }
        drive.stop();
        assert_eq!(drive.torque(), (0.0, 0.0));
        assert_eq!(plant.torque(), (0.0, 0.0));
    }
}
