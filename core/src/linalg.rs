//! Fixed-size linear algebra helpers for covariance bookkeeping.
//!
//! Public API:
//!     pub fn symmetrize(m) -> m
//!     pub fn max_asymmetry(m) -> f64
//!     pub fn min_eigenvalue(p) -> f64
//!     pub fn is_positive_semidefinite(p, tolerance) -> bool
//!     pub fn chol_solve_spd(s, b) -> Option<x>
//!
//! Every dimension in the error-state filter is fixed by the state model (3, 6, 9), so the
//! helpers work on `nalgebra` statically sized matrices. The type aliases below name the
//! shapes that appear in the filter equations.
//!
//! Strategy for the innovation solve:
//! 1) Symmetrize S ← 0.5 (S + Sᵀ)
//! 2) Cholesky S = L Lᵀ
//! 3) Reject the factor if any pivot collapses relative to the largest diagonal entry
//! 4) Solve S X = B and reject non-finite solutions

use nalgebra::linalg::{Cholesky, SymmetricEigen};
use nalgebra::{Matrix3, SMatrix, SVector};

/// 9-element error state `[δp, δv, δθ]`
pub type ErrorState = SVector<f64, 9>;
/// 9×9 error-state covariance or transition matrix
pub type Matrix9 = SMatrix<f64, 9, 9>;
/// 6×6 inertial noise covariance
pub type Matrix6 = SMatrix<f64, 6, 6>;
/// 9×6 noise selection matrix
pub type Matrix9x6 = SMatrix<f64, 9, 6>;
/// 3×9 position measurement Jacobian
pub type Matrix3x9 = SMatrix<f64, 3, 9>;
/// 9×3 Kalman gain for a three-element measurement
pub type Matrix9x3 = SMatrix<f64, 9, 3>;

/// Relative pivot floor below which an innovation covariance is treated as singular
pub const SINGULARITY_TOLERANCE: f64 = 1e-12;

/// Symmetrize a matrix: P ← 0.5 (P + Pᵀ)
///
/// Removes round-off asymmetry accumulated by `F P Fᵀ` and `(I - K H) P`. The result is exactly
/// symmetric in floating point since `a + b == b + a`.
///
/// # Example
/// ```rust
/// use eskf::linalg::symmetrize;
/// use nalgebra::Matrix2;
/// let m = Matrix2::new(1.0, 2.0, 0.0, 3.0);
/// assert_eq!(symmetrize(&m), Matrix2::new(1.0, 1.0, 1.0, 3.0));
/// ```
#[inline]
pub fn symmetrize<const D: usize>(m: &SMatrix<f64, D, D>) -> SMatrix<f64, D, D> {
    (m + m.transpose()) * 0.5
}
/// Largest absolute difference between a matrix and its transpose
pub fn max_asymmetry<const D: usize>(m: &SMatrix<f64, D, D>) -> f64 {
    (m - m.transpose()).amax()
}
/// True if every entry is finite
pub fn is_finite<const R: usize, const C: usize>(m: &SMatrix<f64, R, C>) -> bool {
    m.iter().all(|v| v.is_finite())
}
/// Smallest eigenvalue of the symmetric part of a 9×9 covariance
pub fn min_eigenvalue(p: &Matrix9) -> f64 {
    SymmetricEigen::new(symmetrize(p)).eigenvalues.min()
}
/// Positive semi-definiteness check with a tolerance scaled by the largest entry.
///
/// A covariance passes when its smallest eigenvalue is no more negative than
/// `tolerance * max(1, |P|max)`.
pub fn is_positive_semidefinite(p: &Matrix9, tolerance: f64) -> bool {
    if !is_finite(p) {
        return false;
    }
    let scale = p.amax().max(1.0);
    min_eigenvalue(p) >= -tolerance * scale
}
/// Solve S X = B for a symmetric positive definite 3×3 S via Cholesky.
///
/// Returns `None` when S is not positive definite, when a pivot collapses below
/// [`SINGULARITY_TOLERANCE`] relative to the largest diagonal entry, or when the solution is not
/// finite. No jitter is added: a singular innovation covariance is reported, not repaired.
///
/// # Arguments
/// * `s` - innovation covariance
/// * `b` - right-hand side, typically `H P`
///
/// # Example
/// ```rust
/// use eskf::linalg::{chol_solve_spd, Matrix3x9};
/// use nalgebra::Matrix3;
/// let s = Matrix3::from_diagonal_element(2.0);
/// let b = Matrix3x9::from_element(1.0);
/// let x = chol_solve_spd(&s, &b).unwrap();
/// assert!((x - Matrix3x9::from_element(0.5)).amax() < 1e-15);
///
/// let singular = Matrix3::from_diagonal(&nalgebra::Vector3::new(1.0, 1.0, 0.0));
/// assert!(chol_solve_spd(&singular, &b).is_none());
/// ```
pub fn chol_solve_spd<const C: usize>(
    s: &Matrix3<f64>,
    b: &SMatrix<f64, 3, C>,
) -> Option<SMatrix<f64, 3, C>> {
    let s_sym = symmetrize(s);
    if !is_finite(&s_sym) {
        return None;
    }
    let scale = s_sym.diagonal().amax();
    if scale <= 0.0 {
        return None;
    }
    let chol = Cholesky::new(s_sym)?;
    let pivot_floor = scale * SINGULARITY_TOLERANCE;
    // NaN pivots fail the comparison as well
    if chol.l().diagonal().iter().any(|d| !(d * d > pivot_floor)) {
        return None;
    }
    let x = chol.solve(b);
    is_finite(&x).then_some(x)
}
