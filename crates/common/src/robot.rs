use crate::calibration::Calibration;
use crate::config::{ConfigError, RobotConfig};
use crate::drive::DriveController;
use crate::estimator::Direction;
use crate::{Encoder, Motor, RangeSensor, IR_SENSOR_COUNT};

/// Command-level view of the robot: speeds in, ticks, speeds and ranges out.
///
/// Tick counts are reported relative to an origin that `reset_ticks` moves;
/// the controller's own counters are never rewritten.
pub struct Robot<E, M, R> {
    drive: DriveController<E, M>,
    range: R,
    calibrations: [Calibration; IR_SENSOR_COUNT],
    ticks_origin: (i64, i64),
}

impl<E: Encoder, M: Motor, R: RangeSensor> Robot<E, M, R> {
    pub fn new(encoder: E, motor: M, range: R, config: &RobotConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            drive: DriveController::new(encoder, motor, &config.control)?,
            range,
            calibrations: config.ir.calibrations()?,
            ticks_origin: (0, 0),
        })
    }

    pub fn from_parts(
        drive: DriveController<E, M>,
        range: R,
        calibrations: [Calibration; IR_SENSOR_COUNT],
    ) -> Self {
        Self { drive, range, calibrations, ticks_origin: (0, 0) }
    }

    /// Advance the control loop by one period.
    pub fn on_timer(&mut self) {
        self.drive.tick();
    }

    pub fn set_speed(&mut self, left: f64, right: f64) {
        self.drive.run(left, right);
    }

    /// Estimated signed speeds.
    pub fn speed(&self) -> (f64, f64) {
        self.drive.speed()
    }

    pub fn reference(&self) -> (f64, f64) {
        self.drive.reference()
    }

    pub fn direction(&self) -> (Direction, Direction) {
        self.drive.direction()
    }

    pub fn ticks(&self) -> (i64, i64) {
        let (left, right) = self.drive.ticks();
        (left - self.ticks_origin.0, right - self.ticks_origin.1)
    }

    pub fn reset_ticks(&mut self) {
        self.ticks_origin = self.drive.ticks();
    }

    pub fn ir_values(&mut self) -> [f64; IR_SENSOR_COUNT] {
        self.range.values()
    }

    pub fn ir_distances(&mut self) -> [f64; IR_SENSOR_COUNT] {
        let values = self.range.values();
        let mut distances = [0.0; IR_SENSOR_COUNT];
        for ((d, cal), v) in distances.iter_mut().zip(&self.calibrations).zip(values) {
            *d = cal.distance(v);
        }
        distances
    }

    pub fn drive(&self) -> &DriveController<E, M> {
        &self.drive
    }

    /// Stop both wheels and push the zero torque out right away.
    pub fn shutdown(&mut self) {
        self.drive.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IrConfig;
    use crate::sim::{Plant, SharedPlant, SimEncoder, SimMotor, SimRangeSensor};

    fn robot() -> (SharedPlant, Robot<SimEncoder, SimMotor, SimRangeSensor>) {
        let config = RobotConfig::default();
        let cals = IrConfig::default().calibrations().unwrap();
        let plant = SharedPlant::from_plant(Plant::new(config.sim).with_calibrations(cals));
        let robot = Robot::new(
            plant.lockstep_encoder(0.01),
            plant.motor(),
            plant.range_sensor(),
            &config,
        )
        .unwrap();
        (plant, robot)
    }

    #[test]
    fn reset_moves_the_tick_origin() {
        let (_plant, mut robot) = robot();
        robot.set_speed(50.0, 50.0);
        for _ in 0..100 {
            robot.on_timer();
        }
        let before = robot.ticks();
        assert!(before.0 > 0 && before.1 > 0);

        robot.reset_ticks();
        assert_eq!(robot.ticks(), (0, 0));
        robot.on_timer();
        let raw = robot.drive().ticks();
        assert_eq!(robot.ticks(), (raw.0 - before.0, raw.1 - before.1));
    }

    #[test]
    fn distances_come_from_the_calibration() {
        let (plant, mut robot) = robot();
        plant.set_obstacles([6.0, 12.0, 24.0, 100.0, 100.0]);
        let distances = robot.ir_distances();
        assert!((distances[0] - 6.0).abs() < 1e-6);
        assert!((distances[1] - 12.0).abs() < 1e-6);
        assert!((distances[2] - 24.0).abs() < 1e-6);
    }

    #[test]
    fn shutdown_zeroes_the_motors() {
        let (plant, mut robot) = robot();
        robot.set_speed(30.0, -30.0);
        for _ in 0..50 {
            robot.on_timer();
        }
        robot.shutdown();
        assert_eq!(robot.reference(), (0.0, 0.0));
        assert_eq!(plant.torque(), (0.0, 0.0));
    }
}
