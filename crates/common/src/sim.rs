//! Simulated chassis for running the controller off-robot.
//!
//! Each wheel is a first-order lag from torque to speed with a deadband and
//! rolling friction. The encoder side reproduces what the capture hardware
//! reports: an unsigned edge counter and the capture-timer time between
//! edges, with a sentinel when the wheel is at rest.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::calibration::Calibration;
use crate::config::PlantParams;
use crate::{Encoder, Motor, RangeSensor, RawSample, IR_SENSOR_COUNT};

const SUBSTEP_SECS: f64 = 0.001;

#[derive(Debug, Clone, Copy, Default)]
struct WheelState {
    speed: f64,
    travel: f64,
    raw_ticks: u64,
    torque: f64,
}

#[derive(Debug, Clone)]
pub struct Plant {
    params: PlantParams,
    wheels: [WheelState; 2],
    heading: f64,
    elapsed: f64,
    calibrations: Option<[Calibration; IR_SENSOR_COUNT]>,
}

impl Plant {
    pub fn new(params: PlantParams) -> Self {
        Self {
            params,
            wheels: [WheelState::default(); 2],
            heading: 0.0,
            elapsed: 0.0,
            calibrations: None,
        }
    }

    /// Synthesize IR readings through these curves. Without them every
    /// channel reads zero.
    pub fn with_calibrations(mut self, calibrations: [Calibration; IR_SENSOR_COUNT]) -> Self {
        self.calibrations = Some(calibrations);
        self
    }

    pub fn set_torque(&mut self, torque_left: f64, torque_right: f64) {
        self.wheels[0].torque = sanitize(torque_left);
        self.wheels[1].torque = sanitize(torque_right);
    }

    pub fn torque(&self) -> (f64, f64) {
        (self.wheels[0].torque, self.wheels[1].torque)
    }

    /// True signed wheel speeds in ticks/s.
    pub fn speed(&self) -> (f64, f64) {
        (self.wheels[0].speed, self.wheels[1].speed)
    }

    /// Signed right-minus-left wheel travel in ticks; grows while turning left.
    pub fn heading_ticks(&self) -> f64 {
        self.heading
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed
    }

    pub fn set_obstacles(&mut self, distances: [f64; IR_SENSOR_COUNT]) {
        self.params.obstacles = distances;
    }

    pub fn advance(&mut self, dt: f64) {
        if !(dt.is_finite() && dt > 0.0) {
            return;
        }
        let steps = (dt / SUBSTEP_SECS).round().max(1.0) as u32;
        let h = dt / steps as f64;
        for _ in 0..steps {
            for wheel in self.wheels.iter_mut() {
                step_wheel(wheel, &self.params, h);
            }
            self.heading += (self.wheels[1].speed - self.wheels[0].speed) * h;
            self.elapsed += h;
        }
    }

    pub fn sample(&self) -> (RawSample, RawSample) {
        let timestamp = (self.elapsed * self.params.timer_ticks_per_sec) as u64;
        let read = |wheel: &WheelState| RawSample {
            raw_ticks: wheel.raw_ticks,
            raw_speed: self.raw_speed(wheel.speed),
            timestamp,
        };
        (read(&self.wheels[0]), read(&self.wheels[1]))
    }

    pub fn ir_values(&self) -> [f64; IR_SENSOR_COUNT] {
        let mut values = [0.0; IR_SENSOR_COUNT];
        if let Some(calibrations) = &self.calibrations {
            for ((value, cal), distance) in values
                .iter_mut()
                .zip(calibrations.iter())
                .zip(self.params.obstacles.iter())
            {
                *value = cal.voltage_at(*distance);
            }
        }
        values
    }

    fn raw_speed(&self, speed: f64) -> u32 {
        let sentinel = self.params.speed_sentinel;
        let magnitude = speed.abs();
        if magnitude * sentinel as f64 <= self.params.timer_ticks_per_sec {
            return sentinel;
        }
        let raw = (self.params.timer_ticks_per_sec / magnitude - 1.0).round();
        raw.clamp(0.0, sentinel as f64) as u32
    }
}

fn step_wheel(wheel: &mut WheelState, params: &PlantParams, h: f64) {
    let drive = (wheel.torque.abs() - params.deadband).max(0.0) * params.gain;
    let target = drive.copysign(wheel.torque);
    wheel.speed += (target - wheel.speed) * h / params.time_constant;

    let friction = (params.friction * h).min(wheel.speed.abs());
    wheel.speed -= friction.copysign(wheel.speed);

    wheel.travel += wheel.speed.abs() * h;
    let whole = wheel.travel.floor();
    wheel.raw_ticks += whole as u64;
    wheel.travel -= whole;
}

fn sanitize(torque: f64) -> f64 {
    if torque.is_finite() {
        torque.clamp(-100.0, 100.0)
    } else {
        0.0
    }
}

/// Plant shared between the simulated collaborators.
#[derive(Debug, Clone)]
pub struct SharedPlant {
    inner: Arc<Mutex<Plant>>,
}

impl SharedPlant {
    pub fn new(params: PlantParams) -> Self {
        Self::from_plant(Plant::new(params))
    }

    pub fn from_plant(plant: Plant) -> Self {
        Self { inner: Arc::new(Mutex::new(plant)) }
    }

    pub fn lock(&self) -> MutexGuard<'_, Plant> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn advance(&self, dt: f64) {
        self.lock().advance(dt);
    }

    pub fn torque(&self) -> (f64, f64) {
        self.lock().torque()
    }

    pub fn speed(&self) -> (f64, f64) {
        self.lock().speed()
    }

    pub fn set_obstacles(&self, distances: [f64; IR_SENSOR_COUNT]) {
        self.lock().set_obstacles(distances);
    }

    /// Encoder that advances the plant by `dt` seconds before every read,
    /// so the simulation runs exactly as fast as it is polled.
    pub fn lockstep_encoder(&self, dt: f64) -> SimEncoder {
        SimEncoder { plant: self.clone(), step: Some(dt) }
    }

    /// Encoder that only reads; something else has to call `advance`.
    pub fn capture_encoder(&self) -> SimEncoder {
        SimEncoder { plant: self.clone(), step: None }
    }

    pub fn motor(&self) -> SimMotor {
        SimMotor { plant: self.clone() }
    }

    pub fn range_sensor(&self) -> SimRangeSensor {
        SimRangeSensor { plant: self.clone() }
    }
}

#[derive(Debug, Clone)]
pub struct SimEncoder {
    plant: SharedPlant,
    step: Option<f64>,
}

impl Encoder for SimEncoder {
    fn read(&mut self) -> (RawSample, RawSample) {
        let mut plant = self.plant.lock();
        if let Some(dt) = self.step {
            plant.advance(dt);
        }
        plant.sample()
    }
}

#[derive(Debug, Clone)]
pub struct SimMotor {
    plant: SharedPlant,
}

impl Motor for SimMotor {
    fn run(&mut self, torque_left: f64, torque_right: f64) {
        self.plant.lock().set_torque(torque_left, torque_right);
    }
}

#[derive(Debug, Clone)]
pub struct SimRangeSensor {
    plant: SharedPlant,
}

impl RangeSensor for SimRangeSensor {
    fn values(&mut self) -> [f64; IR_SENSOR_COUNT] {
        self.plant.lock().ir_values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IrConfig;

    #[test]
    fn wheel_at_rest_reports_sentinel() {
        let plant = Plant::new(PlantParams::default());
        let (left, right) = plant.sample();
        assert_eq!(left.raw_speed, 200_000);
        assert_eq!(right.raw_ticks, 0);
    }

    #[test]
    fn torque_inside_deadband_does_not_move() {
        let mut plant = Plant::new(PlantParams::default());
        plant.set_torque(15.0, -19.0);
        plant.advance(2.0);
        assert_eq!(plant.speed(), (0.0, 0.0));
        assert_eq!(plant.sample().0.raw_ticks, 0);
    }

    #[test]
    fn settles_near_static_gain() {
        let mut plant = Plant::new(PlantParams::default());
        plant.set_torque(70.0, -70.0);
        plant.advance(3.0);
        let (left, right) = plant.speed();
        // 0.8 * (70 - 20) minus the friction offset
        assert!((left - 40.0).abs() < 4.0, "left {}", left);
        assert!((right + 40.0).abs() < 4.0, "right {}", right);

        let (l, r) = plant.sample();
        // counters never go down, whichever way the wheel turns
        assert!(l.raw_ticks > 80 && r.raw_ticks > 80);
        assert!((121_000.0 / (l.raw_speed as f64 + 1.0) - left.abs()).abs() < 1.0);
        assert!(l.timestamp.abs_diff(363_000) <= 1);
    }

    #[test]
    fn friction_brings_wheel_to_a_full_stop() {
        let mut plant = Plant::new(PlantParams::default());
        plant.set_torque(100.0, 100.0);
        plant.advance(1.0);
        plant.set_torque(0.0, 0.0);
        plant.advance(3.0);
        assert_eq!(plant.speed(), (0.0, 0.0));
        assert_eq!(plant.sample().0.raw_speed, 200_000);
    }

    #[test]
    fn ir_channels_follow_obstacle_distance() {
        let cals = IrConfig::default().calibrations().unwrap();
        let plant = SharedPlant::from_plant(Plant::new(PlantParams::default()).with_calibrations(cals));
        plant.set_obstacles([6.0, 12.0, 24.0, 50.0, 100.0]);
        let values = plant.range_sensor().values();
        assert!((values[0] - 898.0).abs() < 1e-6);
        assert!((values[1] - 523.0).abs() < 1e-6);
        assert!((values[2] - 106.0).abs() < 1e-6);
        for (i, expected) in [6.0, 12.0, 24.0, 50.0].iter().enumerate() {
            assert!((cals[i].distance(values[i]) - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn lockstep_encoder_advances_on_read() {
        let plant = SharedPlant::new(PlantParams::default());
        let mut encoder = plant.lockstep_encoder(0.01);
        let mut capture = plant.capture_encoder();
        encoder.read();
        encoder.read();
        assert!((plant.lock().elapsed_secs() - 0.02).abs() < 1e-12);
        capture.read();
        assert!((plant.lock().elapsed_secs() - 0.02).abs() < 1e-12);
    }

    #[test]
    fn spinning_in_place_changes_heading_only() {
        let mut plant = Plant::new(PlantParams::default());
        plant.set_torque(-70.0, 70.0);
        plant.advance(1.0);
        assert!(plant.heading_ticks() > 20.0);

        let mut plant = Plant::new(PlantParams::default());
        plant.set_torque(70.0, 70.0);
        plant.advance(1.0);
        assert_eq!(plant.heading_ticks(), 0.0);
    }
}
