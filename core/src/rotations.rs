//! Quaternion attitude representation and rotation algebra
//!
//! Orientation is carried through the filter as a Hamilton unit quaternion $q = [w, x, y, z]$
//! that rotates vectors from the body frame ($b$) into the navigation frame ($n$). The error
//! state, on the other hand, uses a minimal three-element rotation vector $\delta\theta$. This
//! module bridges the two: rotation vectors (angular rate times time step, or an attitude
//! error correction) become incremental quaternions, which are then composed onto the
//! previous orientation estimate.
//!
//! ## Conventions
//!
//! - Euler angles are roll ($\phi$), pitch ($\theta$), yaw ($\psi$) applied as the intrinsic
//!   Z-Y-X sequence, i.e. $q = q_z(\psi) \otimes q_y(\theta) \otimes q_x(\phi)$. This matches
//!   [`nalgebra::Rotation3::from_euler_angles`].
//! - The direction cosine matrix returned by [`Quaternion::to_mat`] is $C_b^n$:
//!
//! $$
//! C_b^n = (w^2 - v^T v) I + 2 v v^T + 2 w \[v\]_\times
//! $$
//!
//! - Composition follows the Hamilton product. `dq.quat_mult_right(&q)` evaluates
//!   $dq \otimes q$, applying the increment in the navigation frame.

use std::fmt::{self, Display};
use std::ops::Mul;

use nalgebra::{Matrix3, Matrix4, UnitQuaternion, Vector3, Vector4};
use serde::{Deserialize, Serialize};

/// Convert a three-element vector to a skew-symmetric matrix
///
/// Converts a vector into the matrix form of the cross product so that
/// $\[a\]_\times b = a \times b$.
///
/// $$
/// x = \begin{bmatrix} a \\\\ b \\\\ c \end{bmatrix} \rightarrow X = \begin{bmatrix} 0 & -c & b \\\\ c & 0 & -a \\\\ -b & a & 0 \end{bmatrix}
/// $$
///
/// # Example
/// ```rust
/// use nalgebra::{Vector3, Matrix3};
/// use eskf::rotations;
/// let v: Vector3<f64> = Vector3::new(1.0, 2.0, 3.0);
/// let skew: Matrix3<f64> = rotations::vector_to_skew_symmetric(&v);
/// assert_eq!(skew * v, Vector3::zeros());
/// ```
pub fn vector_to_skew_symmetric(v: &Vector3<f64>) -> Matrix3<f64> {
    let mut skew: Matrix3<f64> = Matrix3::zeros();
    skew[(0, 1)] = -v[2];
    skew[(0, 2)] = v[1];
    skew[(1, 0)] = v[2];
    skew[(1, 2)] = -v[0];
    skew[(2, 0)] = -v[1];
    skew[(2, 1)] = v[0];
    skew
}
/// Convert a skew-symmetric matrix back to its three-element vector
///
/// Inverse of [`vector_to_skew_symmetric`]. Only the lower triangle is read.
pub fn skew_symmetric_to_vector(skew: &Matrix3<f64>) -> Vector3<f64> {
    Vector3::new(skew[(2, 1)], skew[(0, 2)], skew[(1, 0)])
}

/// Hamilton quaternion stored scalar-first as `(w, x, y, z)`.
///
/// Every constructor used by the filter produces a unit quaternion. Composition keeps the norm
/// at one up to round-off; callers that compose repeatedly should check [`Quaternion::norm`]
/// and [`Quaternion::normalize`] before reuse.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}
impl Default for Quaternion {
    fn default() -> Self {
        Self::identity()
    }
}
impl Display for Quaternion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Quaternion {{ w: {:.6}, x: {:.6}, y: {:.6}, z: {:.6} }}",
            self.w, self.x, self.y, self.z
        )
    }
}
impl Quaternion {
    /// Construct a quaternion from four explicit scalars. No normalization is applied.
    pub const fn new(w: f64, x: f64, y: f64, z: f64) -> Quaternion {
        Quaternion { w, x, y, z }
    }
    /// The identity rotation `(1, 0, 0, 0)`
    pub const fn identity() -> Quaternion {
        Quaternion::new(1.0, 0.0, 0.0, 0.0)
    }
    /// Construct a unit quaternion from roll, pitch, and yaw (radians).
    ///
    /// The rotation is the intrinsic Z-Y-X sequence: yaw about z, then pitch about the new y,
    /// then roll about the new x.
    ///
    /// # Example
    /// ```rust
    /// use eskf::rotations::Quaternion;
    /// let q = Quaternion::from_euler(0.0, 0.0, std::f64::consts::FRAC_PI_2);
    /// assert!((q.norm() - 1.0).abs() < 1e-12);
    /// assert!((q.z - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-12);
    /// ```
    pub fn from_euler(roll: f64, pitch: f64, yaw: f64) -> Quaternion {
        let (sr, cr) = (roll * 0.5).sin_cos();
        let (sp, cp) = (pitch * 0.5).sin_cos();
        let (sy, cy) = (yaw * 0.5).sin_cos();
        Quaternion {
            w: cr * cp * cy + sr * sp * sy,
            x: sr * cp * cy - cr * sp * sy,
            y: cr * sp * cy + sr * cp * sy,
            z: cr * cp * sy - sr * sp * cy,
        }
    }
    /// Construct the incremental rotation for a rotation vector (axis scaled by angle).
    ///
    /// Used once per prediction step with `angular_rate * dt` and once per correction with the
    /// attitude part of the error state. The exact trigonometric form is used for every
    /// non-zero angle; a zero-length vector yields exactly the identity.
    ///
    /// # Example
    /// ```rust
    /// use eskf::rotations::Quaternion;
    /// use nalgebra::Vector3;
    /// assert_eq!(Quaternion::from_axis_angle(&Vector3::zeros()), Quaternion::identity());
    /// ```
    pub fn from_axis_angle(rotation_vector: &Vector3<f64>) -> Quaternion {
        let angle = rotation_vector.norm();
        if angle < f64::MIN_POSITIVE {
            return Quaternion::identity();
        }
        let (s, c) = (angle * 0.5).sin_cos();
        let axis = rotation_vector / angle;
        Quaternion {
            w: c,
            x: axis[0] * s,
            y: axis[1] * s,
            z: axis[2] * s,
        }
    }
    /// Reconstruct a quaternion from a stored `[w, x, y, z]` slice.
    ///
    /// # Panics
    /// Panics if the slice does not hold exactly four elements.
    pub fn from_slice(components: &[f64]) -> Quaternion {
        assert_eq!(
            components.len(),
            4,
            "Quaternion::from_slice: expected 4 components (w, x, y, z), got {}",
            components.len()
        );
        Quaternion::new(components[0], components[1], components[2], components[3])
    }
    /// Vector (imaginary) part `[x, y, z]`
    pub fn vector_part(&self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.z)
    }
    /// Euclidean norm over all four components
    pub fn norm(&self) -> f64 {
        (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
    /// Return a unit-norm copy of this quaternion
    pub fn normalize(&self) -> Quaternion {
        let norm = self.norm();
        Quaternion::new(self.w / norm, self.x / norm, self.y / norm, self.z / norm)
    }
    /// True if the norm is within `tolerance` of one
    pub fn is_normalized(&self, tolerance: f64) -> bool {
        (self.norm() - 1.0).abs() <= tolerance
    }
    /// Quaternion conjugate (the inverse rotation for a unit quaternion)
    pub fn conjugate(&self) -> Quaternion {
        Quaternion::new(self.w, -self.x, -self.y, -self.z)
    }
    /// Convert to the body-to-navigation direction cosine matrix $C_b^n$
    pub fn to_mat(&self) -> Matrix3<f64> {
        let v = self.vector_part();
        (self.w * self.w - v.dot(&v)) * Matrix3::identity()
            + 2.0 * v * v.transpose()
            + 2.0 * self.w * vector_to_skew_symmetric(&v)
    }
    /// Convert to roll, pitch, yaw (radians). Inverse of [`Quaternion::from_euler`].
    pub fn to_euler(&self) -> (f64, f64, f64) {
        let (w, x, y, z) = (self.w, self.x, self.y, self.z);
        let roll = (2.0 * (w * x + y * z)).atan2(1.0 - 2.0 * (x * x + y * y));
        let pitch = (2.0 * (w * y - z * x)).clamp(-1.0, 1.0).asin();
        let yaw = (2.0 * (w * z + x * y)).atan2(1.0 - 2.0 * (y * y + z * z));
        (roll, pitch, yaw)
    }
    /// Serialize as a plain `[w, x, y, z]` vector
    pub fn to_vector(&self) -> Vector4<f64> {
        Vector4::new(self.w, self.x, self.y, self.z)
    }
    /// Serialize as a plain `[w, x, y, z]` array
    pub fn to_array(&self) -> [f64; 4] {
        [self.w, self.x, self.y, self.z]
    }
    /// Left-multiplication matrix: `self ⊗ q == L(self) * q`
    fn left_product_matrix(&self) -> Matrix4<f64> {
        self.product_matrix(1.0)
    }
    /// Right-multiplication matrix: `q ⊗ self == R(self) * q`
    fn right_product_matrix(&self) -> Matrix4<f64> {
        self.product_matrix(-1.0)
    }
    /// `w I + [[0, -vᵀ], [v, sign * [v]x]]`
    fn product_matrix(&self, skew_sign: f64) -> Matrix4<f64> {
        let v = self.vector_part();
        let skew = vector_to_skew_symmetric(&v);
        let mut sigma = Matrix4::identity() * self.w;
        for i in 0..3 {
            sigma[(0, i + 1)] = -v[i];
            sigma[(i + 1, 0)] = v[i];
            for j in 0..3 {
                sigma[(i + 1, j + 1)] += skew_sign * skew[(i, j)];
            }
        }
        sigma
    }
    /// Compose `self ⊗ q`.
    ///
    /// With `self` an increment and `q` the previous orientation this applies the increment
    /// in the navigation frame, which is how both the prediction and correction steps update
    /// attitude.
    ///
    /// # Example
    /// ```rust
    /// use eskf::rotations::Quaternion;
    /// use nalgebra::Vector3;
    /// let previous = Quaternion::from_euler(0.1, -0.2, 0.3);
    /// let increment = Quaternion::from_axis_angle(&Vector3::new(0.0, 0.0, 0.01));
    /// let next = increment.quat_mult_right(&previous);
    /// assert!(next.is_normalized(1e-12));
    /// ```
    pub fn quat_mult_right(&self, q: &Quaternion) -> Quaternion {
        Quaternion::from(self.left_product_matrix() * q.to_vector())
    }
    /// Compose `q ⊗ self`, applying `self` in the body frame of `q`.
    pub fn quat_mult_left(&self, q: &Quaternion) -> Quaternion {
        Quaternion::from(self.right_product_matrix() * q.to_vector())
    }
}
impl Mul for Quaternion {
    type Output = Quaternion;
    /// Hamilton product `self ⊗ rhs`
    fn mul(self, rhs: Quaternion) -> Quaternion {
        self.quat_mult_right(&rhs)
    }
}
impl From<Vector4<f64>> for Quaternion {
    /// Components are read in `[w, x, y, z]` order.
    fn from(v: Vector4<f64>) -> Self {
        Quaternion::new(v[0], v[1], v[2], v[3])
    }
}
impl From<[f64; 4]> for Quaternion {
    fn from(components: [f64; 4]) -> Self {
        Quaternion::new(components[0], components[1], components[2], components[3])
    }
}
impl From<Quaternion> for [f64; 4] {
    fn from(q: Quaternion) -> Self {
        q.to_array()
    }
}
impl From<UnitQuaternion<f64>> for Quaternion {
    fn from(q: UnitQuaternion<f64>) -> Self {
        Quaternion::new(q.w, q.i, q.j, q.k)
    }
}
impl From<Quaternion> for UnitQuaternion<f64> {
    fn from(q: Quaternion) -> Self {
        UnitQuaternion::from_quaternion(nalgebra::Quaternion::new(q.w, q.x, q.y, q.z))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use nalgebra::Rotation3;
    use std::f64::consts::{FRAC_PI_2, PI};

    const TOL: f64 = 1e-9;

    fn canonical_angles() -> Vec<(f64, f64, f64)> {
        vec![
            (0.0, 0.0, 0.0),
            (FRAC_PI_2, 0.0, 0.0),
            (0.0, FRAC_PI_2 * 0.999, 0.0),
            (0.0, 0.0, FRAC_PI_2),
            (0.3, -0.7, 2.1),
            (-1.2, 0.4, -2.9),
        ]
    }
    fn assert_matrix_close(a: &Matrix3<f64>, b: &Matrix3<f64>, tol: f64) {
        for i in 0..3 {
            for j in 0..3 {
                assert_approx_eq!(a[(i, j)], b[(i, j)], tol);
            }
        }
    }

    #[test]
    fn skew_symmetric_round_trip() {
        let v = Vector3::new(1.0, -2.0, 3.5);
        let skew = vector_to_skew_symmetric(&v);
        assert_eq!(skew, -skew.transpose());
        assert_eq!(skew_symmetric_to_vector(&skew), v);
        let w = Vector3::new(0.3, 0.2, -0.1);
        let cross = v.cross(&w);
        let product = skew * w;
        for i in 0..3 {
            assert_approx_eq!(product[i], cross[i], 1e-15);
        }
    }
    #[test]
    fn euler_quaternions_are_unit_norm() {
        for (r, p, y) in canonical_angles() {
            let q = Quaternion::from_euler(r, p, y);
            assert_approx_eq!(q.norm(), 1.0, TOL);
        }
    }
    #[test]
    fn euler_to_matrix_matches_rotation3() {
        for (r, p, y) in canonical_angles() {
            let expected = Rotation3::from_euler_angles(r, p, y);
            let q = Quaternion::from_euler(r, p, y);
            assert_matrix_close(&q.to_mat(), expected.matrix(), TOL);
        }
    }
    #[test]
    fn rotation_matrix_is_orthonormal() {
        let c = Quaternion::from_euler(0.3, -0.7, 2.1).to_mat();
        assert_matrix_close(&(c * c.transpose()), &Matrix3::identity(), TOL);
        assert_approx_eq!(c.determinant(), 1.0, TOL);
    }
    #[test]
    fn euler_round_trip() {
        for (r, p, y) in canonical_angles() {
            let (r2, p2, y2) = Quaternion::from_euler(r, p, y).to_euler();
            assert_approx_eq!(r2, r, 1e-6);
            assert_approx_eq!(p2, p, 1e-6);
            assert_approx_eq!(y2, y, 1e-6);
        }
    }
    #[test]
    fn zero_axis_angle_is_exact_identity() {
        let q = Quaternion::from_axis_angle(&Vector3::zeros());
        assert_eq!(q, Quaternion::identity());
        assert_eq!(q.to_mat(), Matrix3::identity());
    }
    #[test]
    fn tiny_axis_angle_is_finite_and_unit() {
        let q = Quaternion::from_axis_angle(&Vector3::new(1e-300, 0.0, -1e-300));
        assert!(q.to_array().iter().all(|c| c.is_finite()));
        assert_approx_eq!(q.norm(), 1.0, TOL);
        let q = Quaternion::from_axis_angle(&Vector3::new(1e-9, 2e-9, 0.0));
        assert_approx_eq!(q.x, 0.5e-9, 1e-20);
        assert_approx_eq!(q.y, 1e-9, 1e-20);
    }
    #[test]
    fn axis_angle_matches_nalgebra_scaled_axis() {
        let rv = Vector3::new(0.2, -0.4, 0.9);
        let ours = Quaternion::from_axis_angle(&rv);
        let theirs = UnitQuaternion::from_scaled_axis(rv);
        assert_approx_eq!(ours.w, theirs.w, TOL);
        assert_approx_eq!(ours.x, theirs.i, TOL);
        assert_approx_eq!(ours.y, theirs.j, TOL);
        assert_approx_eq!(ours.z, theirs.k, TOL);
    }
    #[test]
    fn half_turn_about_z() {
        let q = Quaternion::from_axis_angle(&Vector3::new(0.0, 0.0, PI));
        let rotated = q.to_mat() * Vector3::new(1.0, 0.0, 0.0);
        assert_approx_eq!(rotated[0], -1.0, TOL);
        assert_approx_eq!(rotated[1], 0.0, TOL);
    }
    #[test]
    fn right_composition_matches_hamilton_product() {
        let a = Quaternion::from_euler(0.3, -0.1, 1.2);
        let b = Quaternion::from_euler(-0.5, 0.8, -2.0);
        let ours = a.quat_mult_right(&b);
        let theirs = UnitQuaternion::from(a) * UnitQuaternion::from(b);
        assert_approx_eq!(ours.w, theirs.w, TOL);
        assert_approx_eq!(ours.x, theirs.i, TOL);
        assert_approx_eq!(ours.y, theirs.j, TOL);
        assert_approx_eq!(ours.z, theirs.k, TOL);
        assert_approx_eq!(ours.norm(), 1.0, TOL);
        // Composition of rotations is a product of direction cosine matrices
        assert_matrix_close(&ours.to_mat(), &(a.to_mat() * b.to_mat()), TOL);
    }
    #[test]
    fn left_composition_swaps_operands() {
        let a = Quaternion::from_euler(0.3, -0.1, 1.2);
        let b = Quaternion::from_euler(-0.5, 0.8, -2.0);
        let left = a.quat_mult_left(&b);
        let right = b.quat_mult_right(&a);
        assert_approx_eq!(left.w, right.w, 1e-15);
        assert_approx_eq!(left.x, right.x, 1e-15);
        assert_approx_eq!(left.y, right.y, 1e-15);
        assert_approx_eq!(left.z, right.z, 1e-15);
        assert_eq!(a * b, a.quat_mult_right(&b));
    }
    #[test]
    fn repeated_composition_stays_near_unit() {
        let increment = Quaternion::from_axis_angle(&Vector3::new(0.001, -0.002, 0.003));
        let mut q = Quaternion::from_euler(0.1, 0.2, 0.3);
        for _ in 0..10_000 {
            q = increment.quat_mult_right(&q);
        }
        assert!(q.is_normalized(1e-9));
        assert_approx_eq!(q.normalize().norm(), 1.0, 1e-15);
    }
    #[test]
    fn conjugate_inverts_rotation() {
        let q = Quaternion::from_euler(0.4, 0.5, -0.6);
        let product = q.quat_mult_right(&q.conjugate());
        assert_approx_eq!(product.w, 1.0, TOL);
        assert_approx_eq!(product.vector_part().norm(), 0.0, TOL);
    }
    #[test]
    fn slice_and_array_conversions() {
        let q = Quaternion::from_slice(&[0.5, 0.5, -0.5, 0.5]);
        assert_eq!(q.to_array(), [0.5, 0.5, -0.5, 0.5]);
        assert_eq!(Quaternion::from(q.to_vector()), q);
        assert_eq!(Quaternion::from(q.to_array()), q);
    }
    #[test]
    #[should_panic(expected = "expected 4 components")]
    fn from_slice_rejects_wrong_length() {
        let _ = Quaternion::from_slice(&[1.0, 0.0, 0.0]);
    }
}
