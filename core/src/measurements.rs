//! Measurement models for absolute-position aiding.
//!
//! Both aiding sensors observe the navigation-frame position directly, so they share the
//! [`PositionMeasurement`] model and differ only in their [`Sensor`] tag and noise. A fix
//! without its own noise covariance is weighted with the variance configured for its sensor
//! ([`crate::config::FilterConfig::variance_for`]). The [`MeasurementModel`] trait is the seam
//! the filter update is written against.

use std::fmt::{self, Display};

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::NavigationState;
use crate::linalg::Matrix3x9;
use crate::linearize::position_measurement_jacobian;

/// Source of an absolute-position measurement.
///
/// The derived ordering is the order in which same-step updates are applied: GNSS first, then
/// LiDAR.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sensor {
    Gnss,
    Lidar,
}
impl Display for Sensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sensor::Gnss => write!(f, "GNSS"),
            Sensor::Lidar => write!(f, "LiDAR"),
        }
    }
}

/// Generic measurement model trait for three-element measurements
pub trait MeasurementModel {
    /// Sensor that produced the measurement
    fn sensor(&self) -> Sensor;
    /// Observed measurement vector `z`
    fn get_vector(&self) -> Vector3<f64>;
    /// Measurement noise covariance `R`, or `None` to use the filter's configured variance
    /// for [`MeasurementModel::sensor`]
    fn get_noise(&self) -> Option<Matrix3<f64>>;
    /// Error-state measurement Jacobian `H`
    fn get_jacobian(&self) -> Matrix3x9 {
        position_measurement_jacobian()
    }
    /// Expected measurement `h(x)` for the nominal state
    fn get_expected_measurement(&self, state: &NavigationState) -> Vector3<f64>;
}

/// Absolute navigation-frame position fix from GNSS or LiDAR
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionMeasurement {
    pub sensor: Sensor,
    /// Measurement time in seconds
    pub timestamp: f64,
    /// Observed position in meters
    pub position: Vector3<f64>,
    /// Measurement noise covariance in m²; `None` defers to the configured sensor variance
    pub noise: Option<Matrix3<f64>>,
}
impl Display for PositionMeasurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PositionMeasurement({}, t: {:.4}, p: [{:.4}, {:.4}, {:.4}])",
            self.sensor, self.timestamp, self.position[0], self.position[1], self.position[2]
        )
    }
}
impl PositionMeasurement {
    /// Create a measurement weighted with the filter's configured variance for `sensor`
    pub fn new(sensor: Sensor, timestamp: f64, position: Vector3<f64>) -> Self {
        PositionMeasurement {
            sensor,
            timestamp,
            position,
            noise: None,
        }
    }
    /// Create a measurement with its own isotropic noise `variance * I`
    pub fn with_variance(
        sensor: Sensor,
        timestamp: f64,
        position: Vector3<f64>,
        variance: f64,
    ) -> Self {
        Self::with_noise_covariance(sensor, timestamp, position, Matrix3::identity() * variance)
    }
    /// Create a measurement with a full noise covariance
    pub fn with_noise_covariance(
        sensor: Sensor,
        timestamp: f64,
        position: Vector3<f64>,
        noise: Matrix3<f64>,
    ) -> Self {
        PositionMeasurement {
            sensor,
            timestamp,
            position,
            noise: Some(noise),
        }
    }
    pub fn gnss(timestamp: f64, position: Vector3<f64>, variance: f64) -> Self {
        Self::with_variance(Sensor::Gnss, timestamp, position, variance)
    }
    pub fn lidar(timestamp: f64, position: Vector3<f64>, variance: f64) -> Self {
        Self::with_variance(Sensor::Lidar, timestamp, position, variance)
    }
}
impl MeasurementModel for PositionMeasurement {
    fn sensor(&self) -> Sensor {
        self.sensor
    }
    fn get_vector(&self) -> Vector3<f64> {
        self.position
    }
    fn get_noise(&self) -> Option<Matrix3<f64>> {
        self.noise
    }
    fn get_expected_measurement(&self, state: &NavigationState) -> Vector3<f64> {
        state.position
    }
}
