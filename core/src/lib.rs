//! Error-state extended Kalman filter for inertial navigation with absolute-position aiding
//!
//! This crate fuses inertial measurements (specific force and angular rate) with intermittent
//! absolute-position fixes from GNSS and LiDAR to estimate position, velocity, and orientation
//! of a moving platform. The nominal state is propagated with a simple flat-frame strapdown
//! mechanization while a 9-element error state `[δp, δv, δθ]` and its covariance are propagated
//! and corrected by the filter. The inertial data is assumed to be pre-synchronized and
//! bias-compensated; the crate does not calibrate sensors or reject outliers.
//!
//! This crate is primarily built off of a small set of dependencies:
//! - [`nalgebra`](https://crates.io/crates/nalgebra): fixed-size linear algebra for every matrix
//!   in the filter (all dimensions are 3, 6, or 9).
//! - [`serde`](https://crates.io/crates/serde) and [`toml`](https://crates.io/crates/toml):
//!   configuration files and serializable trajectories.
//! - [`log`](https://crates.io/crates/log) and [`thiserror`](https://crates.io/crates/thiserror):
//!   diagnostics and the error taxonomy.
//! - [`rand`](https://crates.io/crates/rand) and [`rand_distr`](https://crates.io/crates/rand_distr):
//!   seeded noise for synthetic scenarios.
//!
//! The primary reference is Sola, _Quaternion kinematics for the error-state Kalman filter_
//! (2017). Variables are named for the quantity they represent rather than the symbol used in
//! the text, a rule that is relaxed inside the bodies of the filter equations.
//!
//! ## Crate overview
//!
//! - [rotations]: quaternion attitude representation and rotation algebra.
//! - [linalg]: fixed-size covariance helpers (symmetrization, PSD checks, Cholesky solves).
//! - [linearize]: the `F`, `L`, `Q`, and `H` matrices of the error model.
//! - [measurements]: GNSS and LiDAR position measurement models.
//! - [kalman]: the [`kalman::ErrorStateKalmanFilter`] engine.
//! - [trajectory]: the per-step state and covariance history owned by the engine.
//! - [health]: divergence checks run after every step.
//! - [messages]: inertial and measurement streams with per-stream association cursors.
//! - [sim]: closed-loop and dead-reckoning drivers and a synthetic scenario generator.
//! - [config]: filter configuration with TOML loading.
//!
//! ## State definitions
//!
//! The nominal navigation state is
//!
//! $$
//! x = [p, v, q]
//! $$
//!
//! where $p$ and $v$ are navigation-frame position (m) and velocity (m/s) and $q$ is the
//! body-to-navigation unit quaternion. The navigation frame is a fixed, locally level frame.
//! Gravity is a constant vector in that frame, `[0, 0, -9.81]` by default, so the vertical
//! axis points up.
//!
//! ## Nominal mechanization
//!
//! Given the previous state and an inertial sample taken at the previous step, over a time step
//! $\Delta t$:
//!
//! $$
//! a = C_b^n(q_{k-1}) f^b + g
//! $$
//! $$
//! p_k = p_{k-1} + \Delta t \\, v_{k-1} + \tfrac{1}{2} \Delta t^2 a
//! $$
//! $$
//! v_k = v_{k-1} + \Delta t \\, a
//! $$
//! $$
//! q_k = q(\omega^b \Delta t) \otimes q_{k-1}
//! $$
//!
//! This is implemented by [`forward`] and reused by the filter's prediction step.

pub mod config;
pub mod error;
pub mod health;
pub mod kalman;
pub mod linalg;
pub mod linearize;
pub mod measurements;
pub mod messages;
pub mod rotations;
pub mod sim;
pub mod trajectory;

use std::fmt::{self, Debug, Display};

use nalgebra::{Matrix3, SVector, Vector3};
use serde::{Deserialize, Serialize};

pub use error::{FilterError, Result};
pub use rotations::Quaternion;

/// Default gravity vector in the navigation frame (m/s²), vertical axis up
pub const GRAVITY: [f64; 3] = [0.0, 0.0, -9.81];

/// Basic structure for holding a single inertial sample in the form of sensed specific force
/// and angular rate vectors.
///
/// Both vectors are in the body frame and are what the IMU perceives, i.e. the specific force
/// does not include gravity. The data is assumed to be bias-compensated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ImuData {
    /// Specific force in m/s², body frame x, y, z axis
    pub accel: Vector3<f64>,
    /// Angular rate in rad/s, body frame x, y, z axis
    pub gyro: Vector3<f64>,
}
impl Display for ImuData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ImuData {{ accel: [{:.4}, {:.4}, {:.4}], gyro: [{:.4}, {:.4}, {:.4}] }}",
            self.accel[0], self.accel[1], self.accel[2], self.gyro[0], self.gyro[1], self.gyro[2]
        )
    }
}
impl ImuData {
    pub fn new(accel: Vector3<f64>, gyro: Vector3<f64>) -> Self {
        ImuData { accel, gyro }
    }
}

/// Nominal navigation state: position, velocity, and attitude.
///
/// Position and velocity are navigation-frame vectors; attitude is the body-to-navigation unit
/// quaternion.
#[derive(Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NavigationState {
    /// Position in meters
    pub position: Vector3<f64>,
    /// Velocity in m/s
    pub velocity: Vector3<f64>,
    /// Body-to-navigation attitude
    pub orientation: Quaternion,
}
impl Debug for NavigationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (roll, pitch, yaw) = self.euler_angles();
        f.debug_struct("NavigationState")
            .field("position (m)", &self.position.as_slice())
            .field("velocity (m/s)", &self.velocity.as_slice())
            .field(
                "attitude (roll, pitch, yaw in deg)",
                &format_args!(
                    "[{:.2}, {:.2}, {:.2}]",
                    roll.to_degrees(),
                    pitch.to_degrees(),
                    yaw.to_degrees()
                ),
            )
            .finish()
    }
}
impl Display for NavigationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (roll, pitch, yaw) = self.euler_angles();
        write!(
            f,
            "NavigationState {{ p: [{:.3}, {:.3}, {:.3}] m, v: [{:.3}, {:.3}, {:.3}] m/s, attitude: [{:.2} deg, {:.2} deg, {:.2} deg] }}",
            self.position[0],
            self.position[1],
            self.position[2],
            self.velocity[0],
            self.velocity[1],
            self.velocity[2],
            roll.to_degrees(),
            pitch.to_degrees(),
            yaw.to_degrees()
        )
    }
}
impl NavigationState {
    pub fn new(position: Vector3<f64>, velocity: Vector3<f64>, orientation: Quaternion) -> Self {
        NavigationState {
            position,
            velocity,
            orientation,
        }
    }
    /// Create a state with attitude given as roll, pitch, and yaw in radians
    pub fn from_euler(
        position: Vector3<f64>,
        velocity: Vector3<f64>,
        roll: f64,
        pitch: f64,
        yaw: f64,
    ) -> Self {
        NavigationState::new(position, velocity, Quaternion::from_euler(roll, pitch, yaw))
    }
    /// Attitude as (roll, pitch, yaw) in radians
    pub fn euler_angles(&self) -> (f64, f64, f64) {
        self.orientation.to_euler()
    }
    /// Body-to-navigation direction cosine matrix
    pub fn attitude_matrix(&self) -> Matrix3<f64> {
        self.orientation.to_mat()
    }
    /// Flatten to `[p, v, q]` with the quaternion stored scalar-first
    pub fn to_vector(&self) -> SVector<f64, 10> {
        let mut x = SVector::<f64, 10>::zeros();
        x.fixed_rows_mut::<3>(0).copy_from(&self.position);
        x.fixed_rows_mut::<3>(3).copy_from(&self.velocity);
        x.fixed_rows_mut::<4>(6)
            .copy_from(&self.orientation.to_vector());
        x
    }
}

/// Navigation-frame acceleration: the rotated specific force plus gravity
pub fn navigation_acceleration(
    state: &NavigationState,
    accel: &Vector3<f64>,
    gravity: &Vector3<f64>,
) -> Vector3<f64> {
    state.attitude_matrix() * accel + gravity
}

/// Flat-frame nominal mechanization over one time step.
///
/// Propagates the nominal state with the inertial sample taken at the start of the interval.
/// The returned orientation is the Hamilton composition of the increment onto the previous
/// attitude; it is not renormalized here.
///
/// # Arguments
/// * `state` - Navigation state at the previous step.
/// * `imu_data` - Inertial sample taken at the previous step.
/// * `gravity` - Gravity vector in the navigation frame.
/// * `dt` - Time step in seconds.
///
/// # Example
/// ```rust
/// use eskf::{forward, ImuData, NavigationState};
/// use nalgebra::Vector3;
/// let state = NavigationState::default();
/// // at rest: the accelerometer senses the reaction to gravity
/// let imu = ImuData::new(Vector3::new(0.0, 0.0, 9.81), Vector3::zeros());
/// let next = forward(&state, &imu, &Vector3::new(0.0, 0.0, -9.81), 0.1);
/// assert_eq!(next.position, Vector3::zeros());
/// assert_eq!(next.velocity, Vector3::zeros());
/// ```
pub fn forward(
    state: &NavigationState,
    imu_data: &ImuData,
    gravity: &Vector3<f64>,
    dt: f64,
) -> NavigationState {
    let acceleration = navigation_acceleration(state, &imu_data.accel, gravity);
    let position = state.position + dt * state.velocity + 0.5 * dt * dt * acceleration;
    let velocity = state.velocity + dt * acceleration;
    let increment = Quaternion::from_axis_angle(&(imu_data.gyro * dt));
    let orientation = increment.quat_mult_right(&state.orientation);
    NavigationState {
        position,
        velocity,
        orientation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn gravity() -> Vector3<f64> {
        Vector3::from(GRAVITY)
    }

    #[test]
    fn stationary_platform_stays_put() {
        let mut state = NavigationState::new(
            Vector3::new(10.0, -4.0, 2.0),
            Vector3::zeros(),
            Quaternion::identity(),
        );
        let imu = ImuData::new(Vector3::new(0.0, 0.0, 9.81), Vector3::zeros());
        for _ in 0..100 {
            state = forward(&state, &imu, &gravity(), 0.01);
        }
        assert_eq!(state.position, Vector3::new(10.0, -4.0, 2.0));
        assert_eq!(state.velocity, Vector3::zeros());
        assert_eq!(state.orientation, Quaternion::identity());
    }
    #[test]
    fn free_fall() {
        let state = NavigationState::default();
        let imu = ImuData::default();
        let next = forward(&state, &imu, &gravity(), 1.0);
        assert_approx_eq!(next.velocity[2], -9.81, 1e-12);
        assert_approx_eq!(next.position[2], -4.905, 1e-12);
    }
    #[test]
    fn constant_velocity_integrates_position() {
        let state = NavigationState::new(
            Vector3::zeros(),
            Vector3::new(1.0, 2.0, 0.0),
            Quaternion::identity(),
        );
        let imu = ImuData::new(Vector3::new(0.0, 0.0, 9.81), Vector3::zeros());
        let next = forward(&state, &imu, &gravity(), 0.5);
        assert_eq!(next.position, Vector3::new(0.5, 1.0, 0.0));
        assert_eq!(next.velocity, state.velocity);
    }
    #[test]
    fn specific_force_is_rotated_into_navigation_frame() {
        // Yawed 90 degrees: body x points along navigation y
        let state = NavigationState::from_euler(
            Vector3::zeros(),
            Vector3::zeros(),
            0.0,
            0.0,
            std::f64::consts::FRAC_PI_2,
        );
        let imu = ImuData::new(Vector3::new(1.0, 0.0, 9.81), Vector3::zeros());
        let next = forward(&state, &imu, &gravity(), 1.0);
        assert_approx_eq!(next.velocity[0], 0.0, 1e-12);
        assert_approx_eq!(next.velocity[1], 1.0, 1e-12);
        assert_approx_eq!(next.velocity[2], 0.0, 1e-12);
    }
    #[test]
    fn yaw_rate_integrates_heading() {
        let mut state = NavigationState::default();
        let imu = ImuData::new(Vector3::new(0.0, 0.0, 9.81), Vector3::new(0.0, 0.0, 0.1));
        for _ in 0..10 {
            state = forward(&state, &imu, &gravity(), 0.1);
        }
        let (roll, pitch, yaw) = state.euler_angles();
        assert_approx_eq!(roll, 0.0, 1e-12);
        assert_approx_eq!(pitch, 0.0, 1e-12);
        assert_approx_eq!(yaw, 0.1, 1e-12);
        assert!(state.orientation.is_normalized(1e-12));
    }
    #[test]
    fn state_vector_layout() {
        let state = NavigationState::new(
            Vector3::new(1.0, 2.0, 3.0),
            Vector3::new(4.0, 5.0, 6.0),
            Quaternion::new(1.0, 0.0, 0.0, 0.0),
        );
        let x = state.to_vector();
        assert_eq!(
            x.as_slice(),
            &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 1.0, 0.0, 0.0, 0.0]
        );
    }
}
