//! Error-state extended Kalman filter.
//!
//! The filter carries a nominal [`NavigationState`] propagated with the strapdown mechanization
//! ([`crate::forward`]) and a 9×9 covariance over the error state `[δp, δv, δθ]`. Predictions
//! append a step to the owned [`Trajectory`]; measurement updates correct the latest step in
//! place. A correction that cannot be computed (singular innovation covariance or non-finite
//! result) leaves the filter untouched and is reported through [`FilterError`].

use std::fmt::{self, Debug, Display};

use log::{debug, trace};
use nalgebra::{Matrix3, Vector3};

use crate::config::{CovarianceUpdate, FilterConfig};
use crate::error::{FilterError, Result};
use crate::linalg::{ErrorState, Matrix9, Matrix9x3, chol_solve_spd, is_finite, symmetrize};
use crate::linearize::{process_noise_covariance, process_noise_jacobian, state_transition_jacobian};
use crate::measurements::{MeasurementModel, Sensor};
use crate::rotations::Quaternion;
use crate::trajectory::Trajectory;
use crate::{ImuData, NavigationState, forward};

/// Outcome of an applied measurement update
#[derive(Clone, Debug, PartialEq)]
pub struct Correction {
    pub sensor: Sensor,
    /// Measurement residual `z - h(x)`
    pub innovation: Vector3<f64>,
    /// Error-state estimate `K (z - h(x))` that was injected into the nominal state
    pub error_state: ErrorState,
    /// Kalman gain used for the update
    pub gain: Matrix9x3,
}

/// Error-state EKF over position, velocity, and attitude.
///
/// # Example
///
/// ```rust
/// use eskf::config::FilterConfig;
/// use eskf::kalman::ErrorStateKalmanFilter;
/// use eskf::measurements::PositionMeasurement;
/// use eskf::ImuData;
/// use nalgebra::Vector3;
///
/// let mut filter = ErrorStateKalmanFilter::from_ground_truth(
///     FilterConfig::default(),
///     Vector3::zeros(),
///     Vector3::new(1.0, 0.0, 0.0),
///     Vector3::zeros(),
///     0.0,
/// ).unwrap();
/// let imu = ImuData::new(Vector3::new(0.0, 0.0, 9.81), Vector3::zeros());
/// filter.predict(&imu, 0.1).unwrap();
/// let fix = PositionMeasurement::gnss(0.1, Vector3::new(0.1, 0.0, 0.0), 0.1);
/// let correction = filter.update(&fix).unwrap();
/// assert!(correction.innovation.norm() < 1e-12);
/// assert_eq!(filter.step(), 1);
/// ```
#[derive(Clone)]
pub struct ErrorStateKalmanFilter {
    config: FilterConfig,
    gravity: Vector3<f64>,
    state: NavigationState,
    covariance: Matrix9,
    time: f64,
    trajectory: Trajectory,
}
impl Debug for ErrorStateKalmanFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ESKF")
            .field("time", &self.time)
            .field("step", &self.step())
            .field("state", &self.state)
            .field("covariance_diagonal", &self.covariance.diagonal().as_slice())
            .field("attitude_coupling", &self.config.attitude_coupling)
            .field("covariance_update", &self.config.covariance_update)
            .finish()
    }
}
impl Display for ErrorStateKalmanFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ErrorStateKalmanFilter {{ t: {:.4} s, step: {}, {} }}",
            self.time,
            self.step(),
            self.state
        )
    }
}
impl ErrorStateKalmanFilter {
    /// Create a filter from an initial state and covariance
    ///
    /// # Arguments
    ///
    /// * `config` - Filter configuration; validated before use
    /// * `initial_state` - Nominal state at `t0`
    /// * `initial_covariance` - Error-state covariance at `t0`; symmetrized on entry
    /// * `t0` - Time of the initial state in seconds
    pub fn new(
        config: FilterConfig,
        initial_state: NavigationState,
        initial_covariance: Matrix9,
        t0: f64,
    ) -> Result<ErrorStateKalmanFilter> {
        config.validate()?;
        if !is_finite(&initial_covariance) {
            return Err(FilterError::Config(
                "initial covariance must be finite".into(),
            ));
        }
        let covariance = symmetrize(&initial_covariance);
        let mut trajectory = Trajectory::new();
        trajectory.push(t0, initial_state, covariance);
        Ok(ErrorStateKalmanFilter {
            gravity: config.gravity(),
            config,
            state: initial_state,
            covariance,
            time: t0,
            trajectory,
        })
    }
    /// Seed the filter from ground truth with zero initial covariance
    ///
    /// # Arguments
    ///
    /// * `position`, `velocity` - Navigation-frame position (m) and velocity (m/s)
    /// * `euler` - Roll, pitch, yaw in radians
    pub fn from_ground_truth(
        config: FilterConfig,
        position: Vector3<f64>,
        velocity: Vector3<f64>,
        euler: Vector3<f64>,
        t0: f64,
    ) -> Result<ErrorStateKalmanFilter> {
        let state = NavigationState::from_euler(position, velocity, euler[0], euler[1], euler[2]);
        Self::new(config, state, Matrix9::zeros(), t0)
    }
    pub fn config(&self) -> &FilterConfig {
        &self.config
    }
    /// Current nominal state
    pub fn state(&self) -> &NavigationState {
        &self.state
    }
    /// Current error-state covariance
    pub fn covariance(&self) -> &Matrix9 {
        &self.covariance
    }
    /// Time of the current step in seconds
    pub fn time(&self) -> f64 {
        self.time
    }
    /// Index of the current step; the initial condition is step 0
    pub fn step(&self) -> usize {
        self.trajectory.len().saturating_sub(1)
    }
    pub fn trajectory(&self) -> &Trajectory {
        &self.trajectory
    }
    pub fn into_trajectory(self) -> Trajectory {
        self.trajectory
    }
    /// Predict step: propagate the nominal state and error covariance over `dt`
    ///
    /// $$
    /// P_k = F P_{k-1} F^T + L Q L^T
    /// $$
    ///
    /// followed by symmetrization. Appends step `k` to the trajectory.
    ///
    /// # Arguments
    ///
    /// * `imu_data` - Inertial sample taken at the previous step
    /// * `dt` - Time step in seconds; must be finite and strictly positive
    pub fn predict(&mut self, imu_data: &ImuData, dt: f64) -> Result<()> {
        let timestamp = self.time + dt;
        self.propagate(imu_data, dt, timestamp)
    }
    /// Predict up to an absolute timestamp.
    ///
    /// Same as [`ErrorStateKalmanFilter::predict`] with `dt = timestamp - time()`, but the new
    /// step is stamped with `timestamp` exactly so that it lines up with the inertial stream.
    pub fn predict_to(&mut self, imu_data: &ImuData, timestamp: f64) -> Result<()> {
        let dt = timestamp - self.time;
        self.propagate(imu_data, dt, timestamp)
    }
    fn propagate(&mut self, imu_data: &ImuData, dt: f64, timestamp: f64) -> Result<()> {
        let step = self.step() + 1;
        if !(dt > 0.0) || !dt.is_finite() {
            return Err(FilterError::NonPositiveTimeStep { step, dt });
        }
        // Jacobian is linearized about the state before propagation
        let f = state_transition_jacobian(
            &self.state,
            &imu_data.accel,
            dt,
            self.config.attitude_coupling,
        );
        let l = process_noise_jacobian();
        let q = process_noise_covariance(
            dt,
            self.config.imu.accel_variance,
            self.config.imu.gyro_variance,
        );
        let mut state = forward(&self.state, imu_data, &self.gravity, dt);
        state.orientation = self.renormalize(step, state.orientation);
        let covariance = symmetrize(&(f * self.covariance * f.transpose() + l * q * l.transpose()));

        self.state = state;
        self.covariance = covariance;
        self.time = timestamp;
        self.trajectory.push(timestamp, state, covariance);
        trace!("step {step}: predicted {state}");
        Ok(())
    }
    /// Update step: correct the current step with an absolute-position measurement
    ///
    /// $$
    /// \begin{aligned}
    /// S &= H P H^T + R \\\\
    /// K &= P H^T S^{-1} \\\\
    /// \delta x &= K (z - h(x)) \\\\
    /// P &= (I - K H) P
    /// \end{aligned}
    /// $$
    ///
    /// Position and velocity corrections are added directly; the attitude correction is
    /// applied as `q ← q(δθ) ⊗ q`. The gain is obtained by a Cholesky solve of `S X = H P`
    /// rather than an explicit inverse. With [`CovarianceUpdate::Joseph`] the covariance is
    /// updated as `(I - K H) P (I - K H)ᵀ + K R Kᵀ` instead.
    ///
    /// # Errors
    ///
    /// * [`FilterError::SingularInnovation`] if `S` is not positive definite
    /// * [`FilterError::NonFiniteCorrection`] if the corrected state or covariance would not
    ///   be finite
    ///
    /// In both cases the state, covariance, and trajectory are left unchanged.
    pub fn update<M: MeasurementModel + ?Sized>(&mut self, measurement: &M) -> Result<Correction> {
        let sensor = measurement.sensor();
        let h = measurement.get_jacobian();
        let r = measurement
            .get_noise()
            .unwrap_or_else(|| Matrix3::identity() * self.config.variance_for(sensor));
        let p = self.covariance;

        let s = h * p * h.transpose() + r;
        // S X = H P  =>  K = Xᵀ = P Hᵀ S⁻¹ for symmetric P and S
        let x = chol_solve_spd(&s, &(h * p)).ok_or(FilterError::SingularInnovation { sensor })?;
        let gain: Matrix9x3 = x.transpose();

        let innovation = measurement.get_vector() - measurement.get_expected_measurement(&self.state);
        let error_state: ErrorState = gain * innovation;

        let i_kh = Matrix9::identity() - gain * h;
        let covariance = symmetrize(&match self.config.covariance_update {
            CovarianceUpdate::Standard => i_kh * p,
            CovarianceUpdate::Joseph => i_kh * p * i_kh.transpose() + gain * r * gain.transpose(),
        });

        let delta_p = error_state.fixed_rows::<3>(0).into_owned();
        let delta_v = error_state.fixed_rows::<3>(3).into_owned();
        let delta_theta = error_state.fixed_rows::<3>(6).into_owned();
        let orientation = self.renormalize(
            self.step(),
            Quaternion::from_axis_angle(&delta_theta).quat_mult_right(&self.state.orientation),
        );
        let state = NavigationState {
            position: self.state.position + delta_p,
            velocity: self.state.velocity + delta_v,
            orientation,
        };
        if !is_finite(&state.to_vector()) || !is_finite(&covariance) {
            return Err(FilterError::NonFiniteCorrection { sensor });
        }

        self.state = state;
        self.covariance = covariance;
        if let Some((last_state, last_covariance)) = self.trajectory.last_mut() {
            *last_state = state;
            *last_covariance = covariance;
        }
        trace!(
            "step {}: {} innovation {:?}, gain diagonal {:?}",
            self.step(),
            sensor,
            innovation.as_slice(),
            gain.fixed_view::<3, 3>(0, 0).diagonal().as_slice()
        );
        Ok(Correction {
            sensor,
            innovation,
            error_state,
            gain,
        })
    }
    /// Renormalize a composed quaternion once its norm has drifted past the tolerance
    fn renormalize(&self, step: usize, q: Quaternion) -> Quaternion {
        let drift = (q.norm() - 1.0).abs();
        if drift > self.config.normalization_tolerance {
            debug!("step {step}: renormalizing attitude quaternion (norm drift {drift:.3e})");
            q.normalize()
        } else {
            q
        }
    }
}
