//! Sign recovery for magnitude-only wheel encoders.
//!
//! The encoder reports an unsigned tick counter and the time since the last
//! edge, never the direction of rotation. The estimator keeps a working
//! hypothesis of the direction, checks it against a filtered blend of the
//! commanded torque and the measured speed, and drops to
//! [`Direction::Unknown`] whenever that blend dips toward zero or changes
//! sign. A new direction is only latched once the filtered value clears
//! `latch_threshold` again, which keeps the estimate from chattering near
//! standstill.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::RawSample;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EstimatorError {
    #[error("estimator parameter {name} must be finite and positive, got {value}")]
    NotPositive { name: &'static str, value: f64 },
    #[error("estimator alpha must be finite and non-negative, got {0}")]
    InvalidAlpha(f64),
}

/// Inferred rotation direction of one wheel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Direction {
    Reverse,
    #[default]
    Unknown,
    Forward,
}

impl Direction {
    pub fn sign(self) -> i64 {
        match self {
            Direction::Reverse => -1,
            Direction::Unknown => 0,
            Direction::Forward => 1,
        }
    }

    pub fn signum(self) -> f64 {
        self.sign() as f64
    }

    pub fn from_torque(torque: f64) -> Self {
        if torque >= 0.0 {
            Direction::Forward
        } else {
            Direction::Reverse
        }
    }
}

/// A change of the direction estimate during one update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Latched(Direction),
    Released,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Filter step. Tuned together with `alpha` for a 100 Hz control rate.
    pub dt: f64,
    pub alpha: f64,
    pub latch_threshold: f64,
    /// Capture timer rate used to turn inverse-time readings into ticks/s.
    pub timer_ticks_per_sec: f64,
    /// Raw speed readings at or above this value mean "not turning".
    pub speed_sentinel: u32,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            dt: 0.05,
            alpha: 2.0,
            latch_threshold: 1.0,
            timer_ticks_per_sec: 121_000.0,
            speed_sentinel: 200_000,
        }
    }
}

impl EstimatorConfig {
    pub fn validate(&self) -> Result<(), EstimatorError> {
        for (name, value) in [
            ("dt", self.dt),
            ("latch_threshold", self.latch_threshold),
            ("timer_ticks_per_sec", self.timer_ticks_per_sec),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(EstimatorError::NotPositive { name, value });
            }
        }
        if !(self.alpha.is_finite() && self.alpha >= 0.0) {
            return Err(EstimatorError::InvalidAlpha(self.alpha));
        }
        Ok(())
    }

    /// Unsigned rotation rate in ticks per second for a raw inverse-time reading.
    pub fn rate(&self, raw_speed: u32) -> f64 {
        if raw_speed >= self.speed_sentinel {
            0.0
        } else {
            self.timer_ticks_per_sec / (raw_speed as f64 + 1.0)
        }
    }
}

#[derive(Debug, Clone)]
pub struct DirectionEstimator {
    config: EstimatorConfig,
    direction: Direction,
    predicted_speed: f64,
    last_raw_ticks: Option<u64>,
    logical_ticks: i64,
    logical_speed: f64,
    timestamp: u64,
}

impl DirectionEstimator {
    pub fn new(config: EstimatorConfig) -> Result<Self, EstimatorError> {
        config.validate()?;
        Ok(Self {
            config,
            direction: Direction::Unknown,
            predicted_speed: 0.0,
            last_raw_ticks: None,
            logical_ticks: 0,
            logical_speed: 0.0,
            timestamp: 0,
        })
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn predicted_speed(&self) -> f64 {
        self.predicted_speed
    }

    pub fn logical_ticks(&self) -> i64 {
        self.logical_ticks
    }

    pub fn logical_speed(&self) -> f64 {
        self.logical_speed
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    /// Consume one raw sample. `torque` is the output most recently sent to
    /// this wheel's motor.
    pub fn update(&mut self, torque: f64, sample: &RawSample) -> Option<Transition> {
        self.timestamp = sample.timestamp;

        let Some(last_raw_ticks) = self.last_raw_ticks else {
            self.last_raw_ticks = Some(sample.raw_ticks);
            self.logical_speed = 0.0;
            return None;
        };

        let speed = self.config.rate(sample.raw_speed);
        let previous = self.predicted_speed;
        let drive = if torque.is_finite() {
            torque * self.direction.signum()
        } else {
            0.0
        };
        self.predicted_speed = previous
            + self.config.dt
                * (drive - previous + self.config.alpha * (speed - previous));

        let predicted = self.predicted_speed;
        let crossed = (previous > 0.0 && predicted <= 0.0) || (previous < 0.0 && predicted >= 0.0);
        let in_band = 0.0 < predicted && predicted < self.config.latch_threshold;

        let transition = match self.direction {
            Direction::Forward | Direction::Reverse if crossed || in_band => {
                self.direction = Direction::Unknown;
                self.predicted_speed = 0.0;
                Some(Transition::Released)
            }
            Direction::Unknown if predicted >= self.config.latch_threshold => {
                self.direction = Direction::from_torque(torque);
                Some(Transition::Latched(self.direction))
            }
            _ => None,
        };

        // a decreasing counter breaks the collaborator contract; count it as no motion
        let delta = sample.raw_ticks.saturating_sub(last_raw_ticks) as i64;
        self.logical_ticks += self.direction.sign() * delta;
        self.logical_speed = self.direction.signum() * speed;
        self.last_raw_ticks = Some(sample.raw_ticks);

        transition
    }
}
