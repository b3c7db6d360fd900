use serde::{Deserialize, Serialize};

pub mod behavior;
pub mod calibration;
pub mod config;
pub mod diagnostics;
pub mod drive;
pub mod estimator;
pub mod logger;
pub mod metrics;
pub mod pid;
pub mod protocol;
pub mod robot;
pub mod sim;
pub mod timing;
pub mod wheel;

pub use calibration::Calibration;
pub use config::{load_config, RobotConfig};
pub use diagnostics::SharedDiagnostics;
pub use drive::{DriveController, DriveTelemetry};
pub use estimator::{Direction, DirectionEstimator, EstimatorConfig};
pub use metrics::{TelemetryRecorder, TickRecord};
pub use pid::{AntiWindup, PidController, PidGains};
pub use robot::Robot;
pub use timing::TickTimer;
pub use wheel::WheelLoop;

/// Number of infrared range channels on the chassis.
pub const IR_SENSOR_COUNT: usize = 5;

/// One encoder reading for one wheel, exactly as the capture hardware
/// reports it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSample {
    /// Edges seen since capture start. Never decreases, whatever the
    /// direction of rotation.
    pub raw_ticks: u64,
    /// Capture-timer ticks since the last edge; large means slow.
    pub raw_speed: u32,
    pub timestamp: u64,
}

/// Wheel encoder collaborator. One call returns both wheels from the same
/// snapshot.
pub trait Encoder {
    fn read(&mut self) -> (RawSample, RawSample);
}

/// Motor driver collaborator. Each torque is in `[-100, 100]`; the sign
/// picks the rotation direction and zero coasts.
pub trait Motor {
    fn run(&mut self, torque_left: f64, torque_right: f64);
}

/// Infrared range sensors, raw digitized readings.
pub trait RangeSensor {
    fn values(&mut self) -> [f64; IR_SENSOR_COUNT];
}

impl<T: Encoder + ?Sized> Encoder for Box<T> {
    fn read(&mut self) -> (RawSample, RawSample) {
        (**self).read()
    }
}

impl<T: Motor + ?Sized> Motor for Box<T> {
    fn run(&mut self, torque_left: f64, torque_right: f64) {
        (**self).run(torque_left, torque_right)
    }
}

impl<T: RangeSensor + ?Sized> RangeSensor for Box<T> {
    fn values(&mut self) -> [f64; IR_SENSOR_COUNT] {
        (**self).values()
    }
}
