//! Error taxonomy for the filter and its drivers.
//!
//! Faults fall into two groups. Structural faults (bad time ordering, malformed streams,
//! divergence) halt a run. Per-update numerical faults (a singular innovation covariance or a
//! correction that would inject non-finite values) are contained: the engine leaves its state
//! untouched and the driver reports the skipped update and carries on.

use crate::measurements::Sensor;

/// Errors raised by the error-state filter, its configuration, and the run drivers
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    /// Consecutive inertial timestamps did not strictly increase
    #[error("non-positive time step {dt} s while predicting step {step}")]
    NonPositiveTimeStep { step: usize, dt: f64 },
    /// Innovation covariance `S = H P Hᵀ + R` is not positive definite
    #[error("innovation covariance for {sensor} update is singular")]
    SingularInnovation { sensor: Sensor },
    /// The correction would write NaN or infinity into the state or covariance
    #[error("{sensor} update produced a non-finite correction")]
    NonFiniteCorrection { sensor: Sensor },
    /// A health check failed after a step
    #[error("filter diverged at step {step}: {reason}")]
    Divergence { step: usize, reason: String },
    /// Trajectory index outside `0..len`
    #[error("step {step} is out of range for a trajectory of length {len}")]
    StepOutOfRange { step: usize, len: usize },
    /// Input streams with mismatched lengths or misordered timestamps
    #[error("malformed stream: {0}")]
    MalformedStream(String),
    /// Deserialized trajectory columns of different lengths
    #[error("malformed trajectory: {0}")]
    MalformedTrajectory(String),
    /// Configuration failed to parse or validate
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FilterError {
    /// True for faults that only invalidate a single measurement update.
    ///
    /// Drivers skip the update and continue when this returns `true`; anything else halts the
    /// run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FilterError::SingularInnovation { .. } | FilterError::NonFiniteCorrection { .. }
        )
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, FilterError>;
