//! Filter configuration.
//!
//! Every tunable of the filter lives in [`FilterConfig`], which can be built in code or loaded
//! from TOML. Missing fields fall back to their defaults, so a configuration file only needs to
//! name what it changes:
//!
//! ```
//! use eskf::config::{AttitudeCoupling, FilterConfig};
//!
//! let cfg = FilterConfig::from_toml_str(r#"
//!     gnss_variance = 0.5
//!     attitude_coupling = "omitted"
//!
//!     [imu]
//!     accel_variance = 0.2
//! "#).unwrap();
//! assert_eq!(cfg.gnss_variance, 0.5);
//! assert_eq!(cfg.imu.gyro_variance, 1.25);
//! assert_eq!(cfg.attitude_coupling, AttitudeCoupling::Omitted);
//! ```

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::GRAVITY;
use crate::error::{FilterError, Result};
use crate::health::HealthLimits;
use crate::measurements::Sensor;

/// Velocity-wrt-attitude block of the error-state transition Jacobian.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttitudeCoupling {
    /// `-[C f]× dt`: attitude error leaks into velocity error through the rotated specific force
    #[default]
    Full,
    /// Zero block. Attitude and velocity errors propagate independently; a simplification that
    /// understates velocity uncertainty whenever the platform is accelerating or tilted.
    Omitted,
}

/// Form of the covariance measurement update.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CovarianceUpdate {
    /// `P = (I - K H) P`
    #[default]
    Standard,
    /// `P = (I - K H) P (I - K H)ᵀ + K R Kᵀ`
    Joseph,
}

/// Inertial sensor noise variances
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImuNoise {
    /// Accelerometer noise variance
    pub accel_variance: f64,
    /// Gyroscope noise variance
    pub gyro_variance: f64,
}
impl Default for ImuNoise {
    fn default() -> Self {
        ImuNoise {
            accel_variance: 1.0,
            gyro_variance: 1.25,
        }
    }
}

/// Complete filter configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Isotropic GNSS position variance (m²) for fixes that carry no noise of their own
    pub gnss_variance: f64,
    /// Isotropic LiDAR position variance (m²) for fixes that carry no noise of their own
    pub lidar_variance: f64,
    /// Gravity in the navigation frame (m/s²)
    pub gravity: [f64; 3],
    pub attitude_coupling: AttitudeCoupling,
    pub covariance_update: CovarianceUpdate,
    /// Renormalize a composed quaternion once its norm drifts further than this from one
    pub normalization_tolerance: f64,
    /// Slack in seconds for the start-time check and for fixes just outside the inertial record
    pub association_tolerance: f64,
    pub imu: ImuNoise,
    pub health: HealthLimits,
}
impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            gnss_variance: 0.1,
            lidar_variance: 50.0,
            gravity: GRAVITY,
            attitude_coupling: AttitudeCoupling::default(),
            covariance_update: CovarianceUpdate::default(),
            normalization_tolerance: 1e-12,
            association_tolerance: 1e-6,
            imu: ImuNoise::default(),
            health: HealthLimits::default(),
        }
    }
}
impl FilterConfig {
    /// Gravity as a navigation-frame vector
    pub fn gravity(&self) -> Vector3<f64> {
        Vector3::from(self.gravity)
    }
    /// Configured isotropic variance for a sensor
    pub fn variance_for(&self, sensor: Sensor) -> f64 {
        match sensor {
            Sensor::Gnss => self.gnss_variance,
            Sensor::Lidar => self.lidar_variance,
        }
    }
    /// Parse and validate a configuration from a TOML string
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: FilterConfig = toml::from_str(s).map_err(|e| FilterError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }
    /// Read and validate a configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut s = String::new();
        let mut file = File::open(path)?;
        file.read_to_string(&mut s)?;
        Self::from_toml_str(&s)
    }
    /// Serialize the configuration as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| FilterError::Config(e.to_string()))
    }
    /// Write the configuration as a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(self.to_toml_string()?.as_bytes())?;
        Ok(())
    }
    /// Check that variances are finite and non-negative and tolerances are positive
    pub fn validate(&self) -> Result<()> {
        let variances = [
            ("imu.accel_variance", self.imu.accel_variance),
            ("imu.gyro_variance", self.imu.gyro_variance),
            ("gnss_variance", self.gnss_variance),
            ("lidar_variance", self.lidar_variance),
        ];
        for (name, value) in variances {
            if !value.is_finite() || value < 0.0 {
                return Err(FilterError::Config(format!(
                    "{name} must be finite and non-negative, got {value}"
                )));
            }
        }
        let tolerances = [
            ("normalization_tolerance", self.normalization_tolerance),
            ("association_tolerance", self.association_tolerance),
            ("health.max_asymmetry", self.health.max_asymmetry),
            ("health.psd_tolerance", self.health.psd_tolerance),
            ("health.max_norm_error", self.health.max_norm_error),
        ];
        for (name, value) in tolerances {
            if !(value > 0.0) || !value.is_finite() {
                return Err(FilterError::Config(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }
        if self.gravity.iter().any(|g| !g.is_finite()) {
            return Err(FilterError::Config(format!(
                "gravity must be finite, got {:?}",
                self.gravity
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = FilterConfig::default();
        assert_eq!(cfg.imu.accel_variance, 1.0);
        assert_eq!(cfg.imu.gyro_variance, 1.25);
        assert_eq!(cfg.gravity(), Vector3::new(0.0, 0.0, -9.81));
        assert_eq!(cfg.variance_for(Sensor::Gnss), 0.1);
        assert_eq!(cfg.variance_for(Sensor::Lidar), 50.0);
        assert_eq!(cfg.attitude_coupling, AttitudeCoupling::Full);
        assert_eq!(cfg.covariance_update, CovarianceUpdate::Standard);
        assert!(cfg.validate().is_ok());
    }
    #[test]
    fn empty_toml_is_default() {
        let cfg = FilterConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, FilterConfig::default());
    }
    #[test]
    fn toml_round_trip() {
        let cfg = FilterConfig {
            lidar_variance: 2.0,
            covariance_update: CovarianceUpdate::Joseph,
            ..Default::default()
        };
        let s = cfg.to_toml_string().unwrap();
        assert!(s.contains("covariance_update = \"joseph\""));
        assert_eq!(FilterConfig::from_toml_str(&s).unwrap(), cfg);
    }
    #[test]
    fn file_round_trip() {
        let path = std::env::temp_dir().join(format!("eskf_config_{}.toml", std::process::id()));
        let cfg = FilterConfig {
            gravity: [0.0, 0.0, -9.80665],
            ..Default::default()
        };
        cfg.to_file(&path).unwrap();
        let loaded = FilterConfig::from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, cfg);
    }
    #[test]
    fn missing_file_is_io_error() {
        let err = FilterConfig::from_file("/nonexistent/eskf.toml").unwrap_err();
        assert!(matches!(err, FilterError::Io(_)));
    }
    #[test]
    fn rejects_negative_variance() {
        let err = FilterConfig::from_toml_str("gnss_variance = -1.0").unwrap_err();
        assert!(matches!(err, FilterError::Config(ref m) if m.contains("gnss_variance")));
    }
    #[test]
    fn rejects_zero_tolerance() {
        let cfg = FilterConfig {
            association_tolerance: 0.0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(FilterError::Config(_))));
    }
    #[test]
    fn rejects_unknown_coupling() {
        let err = FilterConfig::from_toml_str("attitude_coupling = \"partial\"").unwrap_err();
        assert!(matches!(err, FilterError::Config(_)));
    }
}
