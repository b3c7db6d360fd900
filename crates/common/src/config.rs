use serde::Deserialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::calibration::{Calibration, CalibrationError};
use crate::estimator::{EstimatorConfig, EstimatorError};
use crate::pid::{AntiWindup, PidController, PidError, PidGains};
use crate::IR_SENSOR_COUNT;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error(transparent)]
    Pid(#[from] PidError),
    #[error(transparent)]
    Estimator(#[from] EstimatorError),
    #[error("IR sensor {sensor}: {source}")]
    Calibration {
        sensor: usize,
        #[source]
        source: CalibrationError,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct RobotConfig {
    pub control: ControlConfig,
    pub network: NetworkConfig,
    pub logging: LoggingConfig,
    pub session: SessionConfig,
    pub ir: IrConfig,
    pub behavior: BehaviorConfig,
    pub sim: PlantParams,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ControlConfig {
    pub period_ms: u64,
    pub torque_limit: f64,
    pub pid: PidConfig,
    pub estimator: EstimatorConfig,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            period_ms: 10,
            torque_limit: 100.0,
            pid: PidConfig::default(),
            estimator: EstimatorConfig::default(),
        }
    }
}

impl ControlConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.period_ms == 0 {
            return Err(ConfigError::Invalid("control.period_ms must be positive".into()));
        }
        if !(self.torque_limit > 0.0 && self.torque_limit <= 100.0) {
            return Err(ConfigError::Invalid(format!(
                "control.torque_limit must be in (0, 100], got {}",
                self.torque_limit
            )));
        }
        self.estimator.validate()?;
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct PidConfig {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub anti_windup: AntiWindup,
}

impl Default for PidConfig {
    fn default() -> Self {
        let gains = PidGains::default();
        Self {
            kp: gains.kp,
            ki: gains.ki,
            kd: gains.kd,
            anti_windup: AntiWindup::default(),
        }
    }
}

impl PidConfig {
    pub fn gains(&self) -> PidGains {
        PidGains { kp: self.kp, ki: self.ki, kd: self.kd }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NetworkConfig {
    pub robot_addr: String,
    pub base_addr: String,
    pub reply_timeout_ms: u64,
    pub retries: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            robot_addr: "127.0.0.1:5005".into(),
            base_addr: "127.0.0.1:5006".into(),
            reply_timeout_ms: 100,
            retries: 3,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".into() }
    }
}

impl LoggingConfig {
    pub fn level_filter(&self) -> Result<log::LevelFilter, ConfigError> {
        self.level
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("unknown log level {:?}", self.level)))
    }
}

/// One entry of a scripted run: from `at_ms` on, drive at `(left, right)`.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct ScriptStep {
    pub at_ms: u64,
    pub left: f64,
    pub right: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    pub duration_secs: u64,
    pub telemetry_csv: String,
    pub script: Vec<ScriptStep>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            duration_secs: 4,
            telemetry_csv: "results/session.csv".into(),
            script: vec![
                ScriptStep { at_ms: 0, left: 50.0, right: 50.0 },
                ScriptStep { at_ms: 1_500, left: -50.0, right: 50.0 },
                ScriptStep { at_ms: 2_500, left: -40.0, right: -40.0 },
                ScriptStep { at_ms: 3_500, left: 0.0, right: 0.0 },
            ],
        }
    }
}

/// Bench measurements at three distances for every IR channel.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IrConfig {
    pub distances: [f64; 3],
    pub voltages: [[f64; 3]; IR_SENSOR_COUNT],
}

impl Default for IrConfig {
    fn default() -> Self {
        Self {
            distances: [6.0, 12.0, 24.0],
            voltages: [
                [898.0, 469.0, 270.0],
                [862.0, 523.0, 346.0],
                [769.0, 382.0, 106.0],
                [989.0, 454.0, 188.0],
                [719.0, 302.0, 113.0],
            ],
        }
    }
}

impl IrConfig {
    pub fn calibrations(&self) -> Result<[Calibration; IR_SENSOR_COUNT], ConfigError> {
        let mut out = [Calibration { alpha: 0.0, beta: 0.0, gamma: 0.0 }; IR_SENSOR_COUNT];
        for (sensor, (slot, v)) in out.iter_mut().zip(self.voltages.iter()).enumerate() {
            let d = self.distances;
            *slot = Calibration::fit([(d[0], v[0]), (d[1], v[1]), (d[2], v[2])])
                .map_err(|source| ConfigError::Calibration { sensor, source })?;
        }
        Ok(out)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct BehaviorConfig {
    pub go_straight_speed: f64,
    pub go_straight_threshold: f64,
    pub avoid_speed: f64,
    pub avoid_duration: u32,
    pub find_speed: f64,
    pub find_pause: u32,
    pub find_move: u32,
    pub find_threshold: f64,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            go_straight_speed: 50.0,
            go_straight_threshold: 7.0,
            avoid_speed: 50.0,
            avoid_duration: 10,
            find_speed: 50.0,
            find_pause: 10,
            find_move: 10,
            find_threshold: 15.0,
        }
    }
}

/// Physical parameters of the simulated chassis.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct PlantParams {
    /// Steady-state ticks/s per unit of torque above the deadband.
    pub gain: f64,
    pub deadband: f64,
    pub time_constant: f64,
    /// Constant deceleration from rolling friction, ticks/s per second.
    pub friction: f64,
    pub timer_ticks_per_sec: f64,
    pub speed_sentinel: u32,
    /// Distance from each IR sensor to the nearest obstacle.
    pub obstacles: [f64; IR_SENSOR_COUNT],
}

impl Default for PlantParams {
    fn default() -> Self {
        Self {
            gain: 0.8,
            deadband: 20.0,
            time_constant: 0.15,
            friction: 20.0,
            timer_ticks_per_sec: 121_000.0,
            speed_sentinel: 200_000,
            obstacles: [100.0; IR_SENSOR_COUNT],
        }
    }
}

impl RobotConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: RobotConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.control.validate()?;
        PidController::from_gains(self.control.pid.gains(), self.control.pid.anti_windup)?;
        self.logging.level_filter()?;
        self.ir.calibrations()?;
        let sim = &self.sim;
        if !(sim.gain > 0.0 && sim.time_constant > 0.0 && sim.timer_ticks_per_sec > 0.0) {
            return Err(ConfigError::Invalid(
                "sim.gain, sim.time_constant and sim.timer_ticks_per_sec must be positive".into(),
            ));
        }
        if self.session.script.windows(2).any(|w| w[0].at_ms > w[1].at_ms) {
            return Err(ConfigError::Invalid("session.script must be sorted by at_ms".into()));
        }
        Ok(())
    }
}

pub fn load_config(path: impl AsRef<Path>) -> Result<RobotConfig, ConfigError> {
    RobotConfig::from_file(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config: RobotConfig = toml::from_str("").unwrap();
        config.validate().unwrap();
        assert_eq!(config.control.period_ms, 10);
        assert_eq!(config.control.pid.anti_windup, AntiWindup::ClampContribution { limit: 100.0 });
        assert_eq!(config.behavior, BehaviorConfig::default());
        assert_eq!(config.network.robot_addr, "127.0.0.1:5005");
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let text = r#"
            [control]
            period_ms = 20

            [control.pid]
            kp = 0.8

            [control.pid.anti_windup]
            policy = "clamp_accumulator"
            limit = 500.0

            [control.estimator]
            latch_threshold = 2.0

            [[session.script]]
            at_ms = 0
            left = 10.0
            right = -10.0
        "#;
        let config: RobotConfig = toml::from_str(text).unwrap();
        config.validate().unwrap();
        assert_eq!(config.control.period_ms, 20);
        assert_eq!(config.control.torque_limit, 100.0);
        assert_eq!(config.control.pid.gains(), PidGains { kp: 0.8, ki: 0.05, kd: 0.0 });
        assert_eq!(config.control.pid.anti_windup, AntiWindup::ClampAccumulator { limit: 500.0 });
        assert_eq!(config.control.estimator.latch_threshold, 2.0);
        assert_eq!(config.control.estimator.dt, 0.05);
        assert_eq!(config.session.script, vec![ScriptStep { at_ms: 0, left: 10.0, right: -10.0 }]);
    }

    #[test]
    fn validation_catches_bad_values() {
        let mut config = RobotConfig::default();
        config.control.torque_limit = 150.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = RobotConfig::default();
        config.control.pid.anti_windup = AntiWindup::ClampContribution { limit: -1.0 };
        assert!(matches!(config.validate(), Err(ConfigError::Pid(_))));

        let mut config = RobotConfig::default();
        config.ir.voltages[3] = [500.0, 500.0, 500.0];
        config.ir.distances = [6.0, 6.0, 24.0];
        assert!(matches!(config.validate(), Err(ConfigError::Calibration { .. })));

        let mut config = RobotConfig::default();
        config.logging.level = "loud".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn shipped_config_is_valid() {
        let config: RobotConfig = toml::from_str(include_str!("../../../configs/robot.toml")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.control.pid.anti_windup, AntiWindup::default());
        assert_eq!(config.session.script.len(), 4);
        assert_eq!(config.ir.voltages, IrConfig::default().voltages);
    }

    #[test]
    fn missing_file_is_io_error() {
        assert!(matches!(load_config("does/not/exist.toml"), Err(ConfigError::Io(_))));
    }
}
