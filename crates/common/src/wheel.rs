use crate::estimator::{Direction, DirectionEstimator, Transition};
use crate::pid::PidController;
use crate::RawSample;

/// Speed loop for a single wheel: estimator in, PID through, torque out.
#[derive(Debug, Clone)]
pub struct WheelLoop {
    pid: PidController,
    estimator: DirectionEstimator,
    reference_speed: f64,
    torque: f64,
    torque_limit: f64,
}

impl WheelLoop {
    pub fn new(pid: PidController, estimator: DirectionEstimator, torque_limit: f64) -> Self {
        Self {
            pid,
            estimator,
            reference_speed: 0.0,
            torque: 0.0,
            torque_limit,
        }
    }

    pub fn set_reference(&mut self, speed: f64) {
        self.reference_speed = if speed.is_finite() { speed } else { 0.0 };
    }

    /// Run one control step and return the clamped torque for this wheel.
    ///
    /// A zero reference idles the wheel: the PID history is dropped and the
    /// motor coasts, while the estimator keeps tracking the spin-down.
    pub fn update(&mut self, sample: &RawSample) -> (f64, Option<Transition>) {
        let transition = self.estimator.update(self.torque, sample);

        if self.reference_speed == 0.0 {
            self.pid.reset();
            self.torque = 0.0;
        } else {
            let error = self.reference_speed - self.estimator.logical_speed();
            self.torque = self
                .pid
                .feed(error)
                .clamp(-self.torque_limit, self.torque_limit);
        }

        (self.torque, transition)
    }

    pub fn reference_speed(&self) -> f64 {
        self.reference_speed
    }

    pub fn torque(&self) -> f64 {
        self.torque
    }

    pub fn ticks(&self) -> i64 {
        self.estimator.logical_ticks()
    }

    pub fn speed(&self) -> f64 {
        self.estimator.logical_speed()
    }

    pub fn direction(&self) -> Direction {
        self.estimator.direction()
    }

    pub fn timestamp(&self) -> u64 {
        self.estimator.timestamp()
    }

    pub fn estimator(&self) -> &DirectionEstimator {
        &self.estimator
    }

    pub fn pid(&self) -> &PidController {
        &self.pid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::EstimatorConfig;
    use crate::pid::AntiWindup;

    fn wheel() -> WheelLoop {
        let pid = PidController::new(0.5, 0.05, 0.0)
            .unwrap()
            .with_anti_windup(AntiWindup::ClampContribution { limit: 100.0 })
            .unwrap();
        let estimator = DirectionEstimator::new(EstimatorConfig::default()).unwrap();
        WheelLoop::new(pid, estimator, 100.0)
    }

    fn sample(raw_ticks: u64, raw_speed: u32) -> RawSample {
        RawSample { raw_ticks, raw_speed, timestamp: raw_ticks }
    }

    #[test]
    fn latches_forward_while_spinning_up() {
        let mut wheel = wheel();
        wheel.set_reference(40.0);

        let mut raw_speed = 200_000.0_f64;
        let mut latched_at = None;
        for k in 0..50u64 {
            wheel.update(&sample(k, raw_speed as u32));
            if latched_at.is_none() && wheel.direction() == Direction::Forward {
                latched_at = Some(k);
            }
            if let Some(at) = latched_at {
                // the edge seen on the latching tick already counts
                assert_eq!(wheel.direction(), Direction::Forward);
                assert_eq!(wheel.ticks(), (k - at + 1) as i64);
            } else {
                assert_eq!(wheel.ticks(), 0);
            }
            raw_speed = (raw_speed * 0.8).max(2_000.0);
        }
        let at = latched_at.expect("wheel never latched forward");
        assert!(at < 20, "latched too late, at tick {}", at);
    }

    #[test]
    fn torque_is_clamped_to_limit() {
        let mut wheel = wheel();
        wheel.set_reference(10_000.0);
        for k in 0..20u64 {
            let (torque, _) = wheel.update(&sample(k, 200_000));
            assert!(torque.abs() <= 100.0);
        }
        assert_eq!(wheel.torque(), 100.0);
    }

    #[test]
    fn zero_reference_coasts() {
        let mut wheel = wheel();
        wheel.set_reference(30.0);
        for k in 0..20u64 {
            wheel.update(&sample(k, 4_000));
        }
        assert!(wheel.torque() > 0.0);

        wheel.set_reference(0.0);
        let (torque, _) = wheel.update(&sample(20, 4_000));
        assert_eq!(torque, 0.0);
        assert_eq!(wheel.pid().accumulator(), 0.0);
    }

    #[test]
    fn non_finite_reference_is_ignored() {
        let mut wheel = wheel();
        wheel.set_reference(f64::NAN);
        assert_eq!(wheel.reference_speed(), 0.0);
    }
}
