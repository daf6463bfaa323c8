//! Jacobian and linearization utilities for the error-state filter
//!
//! This module builds the linearized matrices of the 9-state error model used by
//! [`crate::kalman::ErrorStateKalmanFilter`].
//!
//! # State Ordering
//!
//! ```text
//! δx = [δp_x, δp_y, δp_z, δv_x, δv_y, δv_z, δθ_x, δθ_y, δθ_z]
//! ```
//! where `δp` and `δv` are navigation-frame position and velocity errors and `δθ` is the
//! navigation-frame attitude error rotation vector.
//!
//! # Usage Example
//!
//! ```rust
//! use eskf::NavigationState;
//! use eskf::config::AttitudeCoupling;
//! use eskf::linearize::{
//!     position_measurement_jacobian, process_noise_covariance, process_noise_jacobian,
//!     state_transition_jacobian,
//! };
//! use nalgebra::Vector3;
//!
//! let state = NavigationState::default();
//! let accel = Vector3::new(0.0, 0.0, 9.81);
//! let dt = 0.01;
//!
//! let f = state_transition_jacobian(&state, &accel, dt, AttitudeCoupling::Full);
//! let l = process_noise_jacobian();
//! let q = process_noise_covariance(dt, 1.0, 1.25);
//! let h = position_measurement_jacobian();
//!
//! // P(+) = F P(-) Fᵀ + L Q Lᵀ
//! // K = P Hᵀ (H P Hᵀ + R)⁻¹
//! assert_eq!((l * q * l.transpose()).nrows(), 9);
//! assert_eq!(h.ncols(), f.nrows());
//! ```
//!
//! # References
//!
//! - Sola, J. "Quaternion kinematics for the error-state Kalman filter" (2017), Section 7
//!   (global attitude error)

use nalgebra::{Matrix3, Vector3};

use crate::NavigationState;
use crate::config::AttitudeCoupling;
use crate::linalg::{Matrix3x9, Matrix6, Matrix9, Matrix9x6};
use crate::rotations::vector_to_skew_symmetric;

/// Compute the error-state transition Jacobian (F)
///
/// $$
/// F = \begin{bmatrix} I & I \Delta t & 0 \\\\ 0 & I & -\[C_b^n f^b\]_\times \Delta t \\\\ 0 & 0 & I \end{bmatrix}
/// $$
///
/// The velocity-wrt-attitude block couples attitude error into velocity error through the
/// rotated specific force. [`AttitudeCoupling::Omitted`] leaves that block at zero, which
/// reproduces the simplified recursion and is kept only for comparison.
///
/// # Arguments
///
/// * `state` - Navigation state *before* propagation
/// * `imu_accel` - Specific force measurement (body frame, m/s²)
/// * `dt` - Time step in seconds
/// * `coupling` - Whether to populate the velocity-attitude block
///
/// # Returns
///
/// 9×9 state transition Jacobian matrix F
pub fn state_transition_jacobian(
    state: &NavigationState,
    imu_accel: &Vector3<f64>,
    dt: f64,
    coupling: AttitudeCoupling,
) -> Matrix9 {
    let mut f = Matrix9::identity();

    // ∂(δp)/∂(δv)
    f.fixed_view_mut::<3, 3>(0, 3)
        .copy_from(&(Matrix3::identity() * dt));

    // ∂(δv)/∂(δθ) = -[C_b^n f^b]× dt
    if coupling == AttitudeCoupling::Full {
        let f_n = state.orientation.to_mat() * imu_accel;
        f.fixed_view_mut::<3, 3>(3, 6)
            .copy_from(&(-vector_to_skew_symmetric(&f_n) * dt));
    }

    f
}

/// Compute the process noise Jacobian (L)
///
/// Fixed 9×6 selection matrix that maps `[accel_noise; gyro_noise]` onto the velocity and
/// attitude error rows (identity block at rows 3..9).
pub fn process_noise_jacobian() -> Matrix9x6 {
    let mut l = Matrix9x6::zeros();
    l.fixed_view_mut::<6, 6>(3, 0).copy_from(&Matrix6::identity());
    l
}

/// Compute the discrete inertial noise covariance (Q)
///
/// $$
/// Q = \begin{bmatrix} \sigma_f^2 \Delta t^2 I & 0 \\\\ 0 & \sigma_\omega^2 \Delta t^2 I \end{bmatrix}
/// $$
///
/// # Arguments
///
/// * `dt` - Time step in seconds
/// * `accel_variance` - Accelerometer noise variance
/// * `gyro_variance` - Gyroscope noise variance
pub fn process_noise_covariance(dt: f64, accel_variance: f64, gyro_variance: f64) -> Matrix6 {
    let dt2 = dt * dt;
    let mut q = Matrix6::zeros();
    for i in 0..3 {
        q[(i, i)] = dt2 * accel_variance;
        q[(3 + i, 3 + i)] = dt2 * gyro_variance;
    }
    q
}

/// Compute the measurement Jacobian (H) for an absolute position fix
///
/// Identity over the position-error block, zero elsewhere.
pub fn position_measurement_jacobian() -> Matrix3x9 {
    let mut h = Matrix3x9::zeros();
    h.fixed_view_mut::<3, 3>(0, 0)
        .copy_from(&Matrix3::identity());
    h
}
