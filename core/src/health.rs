//! Divergence checks run after every filter step.
//!
//! A covariance that loses symmetry or positive semi-definiteness, a state with non-finite
//! entries, or an attitude quaternion that has drifted away from unit norm all indicate the
//! filter has diverged numerically. [`HealthMonitor::check`] turns any of these into a
//! [`FilterError::Divergence`] naming the step and the failed condition.

use serde::{Deserialize, Serialize};

use crate::NavigationState;
use crate::error::{FilterError, Result};
use crate::linalg::{self, Matrix9};

/// Thresholds for the health monitor
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthLimits {
    /// Largest `|P - Pᵀ|` relative to `max(1, |P|max)`
    pub max_asymmetry: f64,
    /// Most negative eigenvalue tolerated, relative to `max(1, |P|max)`
    pub psd_tolerance: f64,
    /// Largest `| |q| - 1 |`
    pub max_norm_error: f64,
}
impl Default for HealthLimits {
    fn default() -> Self {
        HealthLimits {
            max_asymmetry: 1e-9,
            psd_tolerance: 1e-9,
            max_norm_error: 1e-6,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct HealthMonitor {
    limits: HealthLimits,
}
impl HealthMonitor {
    pub fn new(limits: HealthLimits) -> Self {
        HealthMonitor { limits }
    }
    pub fn limits(&self) -> &HealthLimits {
        &self.limits
    }
    /// Check the state and covariance at `step`.
    pub fn check(&self, step: usize, state: &NavigationState, covariance: &Matrix9) -> Result<()> {
        let diverged = |reason: String| FilterError::Divergence { step, reason };
        if !state.to_vector().iter().all(|v| v.is_finite()) {
            return Err(diverged("non-finite navigation state".into()));
        }
        if !linalg::is_finite(covariance) {
            return Err(diverged("non-finite covariance".into()));
        }
        let norm_error = (state.orientation.norm() - 1.0).abs();
        if norm_error > self.limits.max_norm_error {
            return Err(diverged(format!(
                "quaternion norm off by {norm_error:.3e}"
            )));
        }
        let scale = covariance.amax().max(1.0);
        let asymmetry = linalg::max_asymmetry(covariance);
        if asymmetry > self.limits.max_asymmetry * scale {
            return Err(diverged(format!(
                "covariance asymmetry {asymmetry:.3e}"
            )));
        }
        if !linalg::is_positive_semidefinite(covariance, self.limits.psd_tolerance) {
            return Err(diverged(format!(
                "covariance not positive semi-definite (min eigenvalue {:.3e})",
                linalg::min_eigenvalue(covariance)
            )));
        }
        Ok(())
    }
}
