//! Per-step history of the filter.
//!
//! The engine owns one [`Trajectory`] and appends a state/covariance pair for every prediction
//! step. Step `0` is the initial condition. Measurement updates rewrite the latest entry in
//! place. Accessors are bounds-checked and return [`FilterError::StepOutOfRange`] rather than
//! panicking. Deserialization rejects columns of different lengths.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::NavigationState;
use crate::error::{FilterError, Result};
use crate::linalg::Matrix9;
use crate::rotations::Quaternion;

/// Ordered sequence of timestamped state/covariance pairs
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TrajectoryColumns")]
pub struct Trajectory {
    timestamps: Vec<f64>,
    states: Vec<NavigationState>,
    covariances: Vec<Matrix9>,
}

/// Serialized form of a [`Trajectory`], checked for equal column lengths on the way in
#[derive(Deserialize)]
struct TrajectoryColumns {
    timestamps: Vec<f64>,
    states: Vec<NavigationState>,
    covariances: Vec<Matrix9>,
}
impl TryFrom<TrajectoryColumns> for Trajectory {
    type Error = FilterError;

    fn try_from(columns: TrajectoryColumns) -> Result<Self> {
        let TrajectoryColumns {
            timestamps,
            states,
            covariances,
        } = columns;
        if timestamps.len() != states.len() || covariances.len() != states.len() {
            return Err(FilterError::MalformedTrajectory(format!(
                "{} timestamps, {} states, {} covariances",
                timestamps.len(),
                states.len(),
                covariances.len()
            )));
        }
        Ok(Trajectory {
            timestamps,
            states,
            covariances,
        })
    }
}

impl Trajectory {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_capacity(capacity: usize) -> Self {
        Trajectory {
            timestamps: Vec::with_capacity(capacity),
            states: Vec::with_capacity(capacity),
            covariances: Vec::with_capacity(capacity),
        }
    }
    /// Append a step
    pub fn push(&mut self, timestamp: f64, state: NavigationState, covariance: Matrix9) {
        self.timestamps.push(timestamp);
        self.states.push(state);
        self.covariances.push(covariance);
    }
    pub fn len(&self) -> usize {
        self.states.len()
    }
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
    fn check(&self, step: usize) -> Result<()> {
        if step < self.len() {
            Ok(())
        } else {
            Err(FilterError::StepOutOfRange {
                step,
                len: self.len(),
            })
        }
    }
    /// State at `step`
    pub fn state(&self, step: usize) -> Result<&NavigationState> {
        self.check(step)?;
        Ok(&self.states[step])
    }
    /// Covariance at `step`
    pub fn covariance(&self, step: usize) -> Result<&Matrix9> {
        self.check(step)?;
        Ok(&self.covariances[step])
    }
    /// Timestamp of `step` in seconds
    pub fn timestamp(&self, step: usize) -> Result<f64> {
        self.check(step)?;
        Ok(self.timestamps[step])
    }
    /// Latest (timestamp, state, covariance), if any
    pub fn last(&self) -> Option<(f64, &NavigationState, &Matrix9)> {
        let k = self.len().checked_sub(1)?;
        Some((self.timestamps[k], &self.states[k], &self.covariances[k]))
    }
    /// Mutable access to the latest state and covariance for in-place correction
    pub(crate) fn last_mut(&mut self) -> Option<(&mut NavigationState, &mut Matrix9)> {
        let state = self.states.last_mut()?;
        let covariance = self.covariances.last_mut()?;
        Some((state, covariance))
    }
    pub fn timestamps(&self) -> &[f64] {
        &self.timestamps
    }
    pub fn states(&self) -> &[NavigationState] {
        &self.states
    }
    pub fn covariances(&self) -> &[Matrix9] {
        &self.covariances
    }
    /// Position history, one entry per step
    pub fn positions(&self) -> Vec<Vector3<f64>> {
        self.states.iter().map(|s| s.position).collect()
    }
    /// Velocity history, one entry per step
    pub fn velocities(&self) -> Vec<Vector3<f64>> {
        self.states.iter().map(|s| s.velocity).collect()
    }
    /// Orientation history, one entry per step
    pub fn orientations(&self) -> Vec<Quaternion> {
        self.states.iter().map(|s| s.orientation).collect()
    }
    /// Iterate over `(timestamp, state, covariance)` in step order
    pub fn iter(&self) -> impl Iterator<Item = (f64, &NavigationState, &Matrix9)> + '_ {
        self.timestamps
            .iter()
            .zip(self.states.iter())
            .zip(self.covariances.iter())
            .map(|((t, s), p)| (*t, s, p))
    }
}
