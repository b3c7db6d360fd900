//! Infrared range calibration.
//!
//! Each IR channel follows `v = (alpha * d + beta) / (d + gamma)` closely
//! enough over its useful range. Three measured `(distance, voltage)` points
//! pin down the three coefficients.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Distance reported for anything past the sensor's usable range.
pub const MAX_DISTANCE: f64 = 100.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalibrationError {
    #[error("calibration points must be finite, got d={distance} v={voltage}")]
    NonFinitePoint { distance: f64, voltage: f64 },
    #[error("calibration points do not determine a unique curve")]
    Singular,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

impl Calibration {
    /// Solve `alpha*d + beta - gamma*v = d*v` for the three points.
    pub fn fit(points: [(f64, f64); 3]) -> Result<Self, CalibrationError> {
        for &(distance, voltage) in &points {
            if !(distance.is_finite() && voltage.is_finite()) {
                return Err(CalibrationError::NonFinitePoint { distance, voltage });
            }
        }

        let [(d0, v0), (d1, v1), (d2, v2)] = points;
        let m = Matrix3::new(
            d0, 1.0, -v0, //
            d1, 1.0, -v1, //
            d2, 1.0, -v2,
        );
        let rhs = Vector3::new(d0 * v0, d1 * v1, d2 * v2);

        // near-singular systems invert to garbage rather than failing
        if m.determinant().abs() <= f64::EPSILON * m.norm().powi(3) {
            return Err(CalibrationError::Singular);
        }
        let inverse = m.try_inverse().ok_or(CalibrationError::Singular)?;
        let solution = inverse * rhs;
        if solution.iter().any(|c| !c.is_finite()) {
            return Err(CalibrationError::Singular);
        }

        Ok(Self {
            alpha: solution[0],
            beta: solution[1],
            gamma: solution[2],
        })
    }

    pub fn voltage_at(&self, distance: f64) -> f64 {
        (self.alpha * distance + self.beta) / (distance + self.gamma)
    }

    /// Invert a reading. Readings weaker than the one expected at
    /// `MAX_DISTANCE` report `MAX_DISTANCE`, as does any reading the curve
    /// cannot map to a sane distance.
    pub fn distance(&self, voltage: f64) -> f64 {
        if !voltage.is_finite() || voltage < self.voltage_at(MAX_DISTANCE) {
            return MAX_DISTANCE;
        }
        let distance = (self.beta - self.gamma * voltage) / (voltage - self.alpha);
        if distance.is_finite() && distance >= 0.0 {
            distance.min(MAX_DISTANCE)
        } else {
            MAX_DISTANCE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() <= tol * (1.0 + b.abs())
    }

    #[test]
    fn fit_recovers_known_coefficients() {
        let truth = Calibration { alpha: 20.0, beta: 9_000.0, gamma: 4.0 };
        let points = [6.0, 12.0, 24.0].map(|d| (d, truth.voltage_at(d)));
        let fitted = Calibration::fit(points).unwrap();
        assert!(close(fitted.alpha, truth.alpha, 1e-9));
        assert!(close(fitted.beta, truth.beta, 1e-9));
        assert!(close(fitted.gamma, truth.gamma, 1e-9));
    }

    #[test]
    fn measured_points_map_back_to_their_distances() {
        // sensor 0 bench measurements
        let points = [(6.0, 898.0), (12.0, 469.0), (24.0, 270.0)];
        let cal = Calibration::fit(points).unwrap();
        for (d, v) in points {
            assert!(close(cal.distance(v), d, 1e-9), "d={} got {}", d, cal.distance(v));
            assert!(close(cal.voltage_at(d), v, 1e-9));
        }
    }

    #[test]
    fn weak_readings_report_max_distance() {
        let cal = Calibration::fit([(6.0, 898.0), (12.0, 469.0), (24.0, 270.0)]).unwrap();
        let far = cal.voltage_at(MAX_DISTANCE);
        assert_eq!(cal.distance(far * 0.5), MAX_DISTANCE);
        assert_eq!(cal.distance(0.0), MAX_DISTANCE);
        assert_eq!(cal.distance(f64::NAN), MAX_DISTANCE);
        assert!(cal.distance(far * 1.01) < MAX_DISTANCE);
    }

    #[test]
    fn collinear_points_are_rejected() {
        // same distance twice gives two identical rows
        let err = Calibration::fit([(6.0, 900.0), (6.0, 900.0), (24.0, 270.0)]).unwrap_err();
        assert_eq!(err, CalibrationError::Singular);
        assert!(matches!(
            Calibration::fit([(6.0, f64::INFINITY), (12.0, 469.0), (24.0, 270.0)]),
            Err(CalibrationError::NonFinitePoint { .. })
        ));
    }
}
