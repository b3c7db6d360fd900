use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PidError {
    #[error("PID gain {name} must be finite, got {value}")]
    NonFiniteGain { name: &'static str, value: f64 },
    #[error("anti-windup limit must be finite and positive, got {0}")]
    InvalidLimit(f64),
}

/// How the integral term is kept from winding up while the actuator saturates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum AntiWindup {
    None,
    /// Bound the accumulator itself by `limit`; once it leaves
    /// `[-limit, limit]` it is dropped to zero.
    ClampAccumulator { limit: f64 },
    /// Clamp the I+D contribution to `[-limit, limit]` and drop the
    /// accumulator whenever the clamp engages.
    ClampContribution { limit: f64 },
    /// Same as `ClampContribution` with the bound scaled by `|error|`.
    GainProportional { gain_limit: f64 },
}

impl Default for AntiWindup {
    fn default() -> Self {
        AntiWindup::ClampContribution { limit: 100.0 }
    }
}

impl AntiWindup {
    fn validate(&self) -> Result<(), PidError> {
        let limit = match *self {
            AntiWindup::None => return Ok(()),
            AntiWindup::ClampAccumulator { limit } => limit,
            AntiWindup::ClampContribution { limit } => limit,
            AntiWindup::GainProportional { gain_limit } => gain_limit,
        };
        if limit.is_finite() && limit > 0.0 {
            Ok(())
        } else {
            Err(PidError::InvalidLimit(limit))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    pub kp: f64,
    #[serde(default)]
    pub ki: f64,
    #[serde(default)]
    pub kd: f64,
}

impl Default for PidGains {
    fn default() -> Self {
        Self { kp: 0.5, ki: 0.05, kd: 0.0 }
    }
}

/// Discrete PID on a per-tick error sequence. The integral is a plain sum
/// and the derivative a plain difference; the control period is folded
/// into the gains.
#[derive(Debug, Clone)]
pub struct PidController {
    kp: f64,
    ki: f64,
    kd: f64,
    accumulator: f64,
    prev_error: f64,
    anti_windup: AntiWindup,
}

impl PidController {
    pub fn new(kp: f64, ki: f64, kd: f64) -> Result<Self, PidError> {
        for (name, value) in [("kp", kp), ("ki", ki), ("kd", kd)] {
            if !value.is_finite() {
                return Err(PidError::NonFiniteGain { name, value });
            }
        }

        Ok(Self {
            kp,
            ki,
            kd,
            accumulator: 0.0,
            prev_error: 0.0,
            anti_windup: AntiWindup::None,
        })
    }

    pub fn from_gains(gains: PidGains, anti_windup: AntiWindup) -> Result<Self, PidError> {
        Self::new(gains.kp, gains.ki, gains.kd)?.with_anti_windup(anti_windup)
    }

    pub fn with_anti_windup(mut self, anti_windup: AntiWindup) -> Result<Self, PidError> {
        anti_windup.validate()?;
        self.anti_windup = anti_windup;
        Ok(self)
    }

    pub fn reset(&mut self) {
        self.accumulator = 0.0;
        self.prev_error = 0.0;
    }

    pub fn accumulator(&self) -> f64 {
        self.accumulator
    }

    pub fn prev_error(&self) -> f64 {
        self.prev_error
    }

    pub fn anti_windup(&self) -> AntiWindup {
        self.anti_windup
    }

    /// Feed one error sample and get the control output. Never returns NaN
    /// or an infinity.
    pub fn feed(&mut self, error: f64) -> f64 {
        let error = if error.is_finite() { error } else { 0.0 };

        self.accumulator += error;
        let delta = error - self.prev_error;
        self.prev_error = error;

        let extra = match self.anti_windup {
            AntiWindup::None => self.ki * self.accumulator + self.kd * delta,
            AntiWindup::ClampAccumulator { limit } => {
                if self.accumulator.abs() > limit {
                    self.accumulator = 0.0;
                }
                self.ki * self.accumulator + self.kd * delta
            }
            AntiWindup::ClampContribution { limit } => self.saturate(delta, limit),
            AntiWindup::GainProportional { gain_limit } => {
                self.saturate(delta, gain_limit * error.abs())
            }
        };

        let output = self.kp * error + extra;
        if output.is_finite() {
            output
        } else {
            self.accumulator = 0.0;
            if output.is_nan() {
                0.0
            } else {
                output.signum() * f64::MAX
            }
        }
    }

    fn saturate(&mut self, delta: f64, bound: f64) -> f64 {
        let extra = self.ki * self.accumulator + self.kd * delta;
        if extra > bound {
            self.accumulator = 0.0;
            bound
        } else if extra < -bound {
            self.accumulator = 0.0;
            -bound
        } else {
            extra
        }
    }
}
