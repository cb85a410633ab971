//! Affine transforms for 2D and 3D bones.
//!
//! Both transforms store a linear `basis` (rotation times scale, columns are
//! the local axes) and an `origin`. 2D bones point along their local +X
//! axis; 3D bones point along their local -Z axis.

use std::f32::consts::PI;
use std::fmt;

use nalgebra::{Matrix2, Matrix3, Quaternion, Rotation2, Unit, UnitQuaternion, Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// Squared lengths below this are treated as zero when normalizing.
pub const DEGENERATE_EPSILON: f32 = 1e-10;

// ---------------------------------------------------------------------------
// Affine trait
// ---------------------------------------------------------------------------

/// Operations the skeleton and the pose-space converter need from a
/// transform, independent of dimension.
pub trait Affine: Copy + fmt::Debug + PartialEq + Send + Sync + 'static {
    /// Point/direction type of this space.
    type Vector: Copy + fmt::Debug + PartialEq + Send + Sync + 'static;

    fn identity() -> Self;

    /// `self ∘ other`: apply `other` first, then `self`.
    #[must_use]
    fn compose(&self, other: &Self) -> Self;

    /// Inverse of the transform, or `None` when the basis is singular.
    fn try_affine_inverse(&self) -> Option<Self>;

    fn origin(&self) -> Self::Vector;

    fn set_origin(&mut self, origin: Self::Vector);

    /// Transform a point.
    fn xform(&self, point: Self::Vector) -> Self::Vector;

    /// Euclidean distance between the origins of two transforms.
    fn origin_distance(&self, other: &Self) -> f32;

    /// Length of the basis axis the bone points along.
    fn forward_axis_scale(&self) -> f32;

    /// `true` when no component is NaN or infinite.
    fn is_finite(&self) -> bool;

    /// Component-wise comparison within `epsilon`.
    fn approx_eq(&self, other: &Self, epsilon: f32) -> bool;
}

// ---------------------------------------------------------------------------
// Transform2
// ---------------------------------------------------------------------------

/// 2D affine transform. Bones point along local +X.
#[derive(Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform2 {
    pub basis: Matrix2<f32>,
    pub origin: Vector2<f32>,
}

impl fmt::Debug for Transform2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transform2")
            .field("rotation", &self.rotation())
            .field("scale", &(self.scale().x, self.scale().y))
            .field("origin", &(self.origin.x, self.origin.y))
            .finish()
    }
}

impl Default for Transform2 {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform2 {
    pub const fn new(basis: Matrix2<f32>, origin: Vector2<f32>) -> Self {
        Self { basis, origin }
    }

    pub fn from_translation(origin: Vector2<f32>) -> Self {
        Self::new(Matrix2::identity(), origin)
    }

    pub fn from_rotation(angle: f32, origin: Vector2<f32>) -> Self {
        Self::new(*Rotation2::new(angle).matrix(), origin)
    }

    /// Build from rotation, per-axis scale and origin. Scale is applied first.
    pub fn from_parts(angle: f32, scale: Vector2<f32>, origin: Vector2<f32>) -> Self {
        Self::new(
            Rotation2::new(angle).matrix() * Matrix2::from_diagonal(&scale),
            origin,
        )
    }

    pub fn x_axis(&self) -> Vector2<f32> {
        self.basis.column(0).into_owned()
    }

    pub fn y_axis(&self) -> Vector2<f32> {
        self.basis.column(1).into_owned()
    }

    /// Angle of the local X axis.
    pub fn rotation(&self) -> f32 {
        let x = self.x_axis();
        x.y.atan2(x.x)
    }

    /// Axis lengths. A mirrored basis reports a negative Y scale.
    pub fn scale(&self) -> Vector2<f32> {
        let sign = if self.basis.determinant() < 0.0 { -1.0 } else { 1.0 };
        Vector2::new(self.x_axis().norm(), sign * self.y_axis().norm())
    }

    /// Same scale and origin, rotation replaced.
    #[must_use]
    pub fn with_rotation(&self, angle: f32) -> Self {
        Self::from_parts(angle, self.scale(), self.origin)
    }

    /// Rotate the basis inside its own frame. The origin does not move.
    #[must_use]
    pub fn rotated_local(&self, angle: f32) -> Self {
        Self::new(self.basis * Rotation2::new(angle).matrix(), self.origin)
    }

    /// Add `angle` to the rotation, keeping scale and origin.
    #[must_use]
    pub fn rotated(&self, angle: f32) -> Self {
        self.with_rotation(self.rotation() + angle)
    }

    /// Turn the +X axis towards `target`. `None` when the target sits on the origin.
    pub fn looking_at(&self, target: Vector2<f32>) -> Option<Self> {
        let dir = target - self.origin;
        if dir.norm_squared() <= DEGENERATE_EPSILON {
            return None;
        }
        Some(self.with_rotation(dir.y.atan2(dir.x)))
    }

    /// Unit vector the bone points along once its rest angle is added back.
    pub fn heading(&self, rest_angle: f32) -> Vector2<f32> {
        let angle = self.rotation() + rest_angle;
        Vector2::new(angle.cos(), angle.sin())
    }

    /// Interpolate origin, rotation and scale independently.
    #[must_use]
    pub fn interpolate_with(&self, other: &Self, weight: f32) -> Self {
        let delta = wrap_angle(other.rotation() - self.rotation());
        Self::from_parts(
            self.rotation() + delta * weight,
            self.scale().lerp(&other.scale(), weight),
            self.origin.lerp(&other.origin, weight),
        )
    }
}

impl Affine for Transform2 {
    type Vector = Vector2<f32>;

    fn identity() -> Self {
        Self::new(Matrix2::identity(), Vector2::zeros())
    }

    fn compose(&self, other: &Self) -> Self {
        Self::new(self.basis * other.basis, self.basis * other.origin + self.origin)
    }

    fn try_affine_inverse(&self) -> Option<Self> {
        let inv = self.basis.try_inverse()?;
        Some(Self::new(inv, -(inv * self.origin)))
    }

    fn origin(&self) -> Vector2<f32> {
        self.origin
    }

    fn set_origin(&mut self, origin: Vector2<f32>) {
        self.origin = origin;
    }

    fn xform(&self, point: Vector2<f32>) -> Vector2<f32> {
        self.basis * point + self.origin
    }

    fn origin_distance(&self, other: &Self) -> f32 {
        (self.origin - other.origin).norm()
    }

    fn forward_axis_scale(&self) -> f32 {
        self.x_axis().norm()
    }

    fn is_finite(&self) -> bool {
        self.basis.iter().chain(self.origin.iter()).all(|v| v.is_finite())
    }

    fn approx_eq(&self, other: &Self, epsilon: f32) -> bool {
        (self.basis - other.basis).amax() <= epsilon
            && (self.origin - other.origin).amax() <= epsilon
    }
}

// ---------------------------------------------------------------------------
// Transform3
// ---------------------------------------------------------------------------

/// Which local basis axis of the reset pose to use as the look-at up hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BasisAxis {
    X,
    #[default]
    Y,
    Z,
}

impl BasisAxis {
    pub const fn index(self) -> usize {
        match self {
            Self::X => 0,
            Self::Y => 1,
            Self::Z => 2,
        }
    }
}

/// 3D affine transform. Bones point along local -Z.
#[derive(Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform3 {
    pub basis: Matrix3<f32>,
    pub origin: Vector3<f32>,
}

impl fmt::Debug for Transform3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (roll, pitch, yaw) = self.rotation_quat().euler_angles();
        f.debug_struct("Transform3")
            .field("euler", &(roll, pitch, yaw))
            .field("scale", &(self.scale().x, self.scale().y, self.scale().z))
            .field("origin", &(self.origin.x, self.origin.y, self.origin.z))
            .finish()
    }
}

impl Default for Transform3 {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform3 {
    pub const fn new(basis: Matrix3<f32>, origin: Vector3<f32>) -> Self {
        Self { basis, origin }
    }

    pub fn from_translation(origin: Vector3<f32>) -> Self {
        Self::new(Matrix3::identity(), origin)
    }

    pub fn from_rotation(rotation: UnitQuaternion<f32>, origin: Vector3<f32>) -> Self {
        Self::new(rotation.to_rotation_matrix().into_inner(), origin)
    }

    /// Build from rotation, per-axis scale and origin. Scale is applied first.
    pub fn from_parts(
        rotation: UnitQuaternion<f32>,
        scale: Vector3<f32>,
        origin: Vector3<f32>,
    ) -> Self {
        Self::new(
            rotation.to_rotation_matrix().into_inner() * Matrix3::from_diagonal(&scale),
            origin,
        )
    }

    pub fn axis(&self, axis: BasisAxis) -> Vector3<f32> {
        self.basis.column(axis.index()).into_owned()
    }

    /// Unit vector along local -Z, or world -Z if the basis collapsed.
    pub fn forward(&self) -> Vector3<f32> {
        (-self.axis(BasisAxis::Z))
            .try_normalize(DEGENERATE_EPSILON)
            .unwrap_or_else(|| -Vector3::z())
    }

    /// Axis lengths. A mirrored basis reports all-negative scale.
    pub fn scale(&self) -> Vector3<f32> {
        let sign = if self.basis.determinant() < 0.0 { -1.0 } else { 1.0 };
        Vector3::new(
            self.basis.column(0).norm(),
            self.basis.column(1).norm(),
            self.basis.column(2).norm(),
        ) * sign
    }

    /// Pure rotation part of the basis.
    ///
    /// The basis is orthonormalized first and flipped when mirrored, so
    /// scaled and skewed bases still yield a valid quaternion.
    pub fn rotation_quat(&self) -> UnitQuaternion<f32> {
        let m = if self.basis.determinant() < 0.0 {
            -self.basis
        } else {
            self.basis
        };
        let Some(x) = m.column(0).into_owned().try_normalize(DEGENERATE_EPSILON) else {
            return UnitQuaternion::identity();
        };
        let y_raw = m.column(1).into_owned();
        let Some(y) = (y_raw - x * x.dot(&y_raw)).try_normalize(DEGENERATE_EPSILON) else {
            return UnitQuaternion::identity();
        };
        let z = x.cross(&y);
        UnitQuaternion::from_rotation_matrix(&nalgebra::Rotation3::from_matrix_unchecked(
            Matrix3::from_columns(&[x, y, z]),
        ))
    }

    /// Same origin and scale magnitude, rotation replaced.
    #[must_use]
    pub fn with_rotation(&self, rotation: UnitQuaternion<f32>) -> Self {
        Self::from_parts(rotation, self.scale().abs(), self.origin)
    }

    /// Same origin and rotation, scale replaced.
    #[must_use]
    pub fn with_scale(&self, scale: Vector3<f32>) -> Self {
        Self::from_parts(self.rotation_quat(), scale, self.origin)
    }

    /// Point -Z at `target` using `up` to fix the roll. Scale is kept.
    ///
    /// Returns `None` when the target sits on the origin or is parallel
    /// to `up`.
    pub fn looking_at(&self, target: Vector3<f32>, up: Vector3<f32>) -> Option<Self> {
        let rotation = basis_looking_at(target - self.origin, up)?;
        Some(Self::new(
            rotation * Matrix3::from_diagonal(&self.scale().abs()),
            self.origin,
        ))
    }

    /// Point -Z at `target` with the smallest swing. Never adds twist.
    pub fn swing_looking_at(&self, target: Vector3<f32>) -> Option<Self> {
        let swing = quat_from_two_vectors(self.forward(), target - self.origin)?;
        Some(self.with_rotation(swing * self.rotation_quat()))
    }

    /// Rotate about an axis expressed in the transform's own frame.
    #[must_use]
    pub fn rotated_local(&self, axis: &Unit<Vector3<f32>>, angle: f32) -> Self {
        let rot = UnitQuaternion::from_axis_angle(axis, angle).to_rotation_matrix();
        Self::new(self.basis * rot.matrix(), self.origin)
    }

    /// Rotate about the origin by a rotation expressed in the parent frame.
    #[must_use]
    pub fn pre_rotated(&self, rotation: &UnitQuaternion<f32>) -> Self {
        Self::new(rotation.to_rotation_matrix().matrix() * self.basis, self.origin)
    }

    /// Apply an extra local rotation about X, then Y, then Z.
    #[must_use]
    pub fn with_additional_rotation(&self, euler: Vector3<f32>) -> Self {
        if euler == Vector3::zeros() {
            return *self;
        }
        self.rotated_local(&Vector3::x_axis(), euler.x)
            .rotated_local(&Vector3::y_axis(), euler.y)
            .rotated_local(&Vector3::z_axis(), euler.z)
    }

    /// Slerp rotation, lerp scale and origin.
    #[must_use]
    pub fn interpolate_with(&self, other: &Self, weight: f32) -> Self {
        let rotation = self
            .rotation_quat()
            .try_slerp(&other.rotation_quat(), weight, 1e-6)
            .unwrap_or_else(|| other.rotation_quat());
        Self::from_parts(
            rotation,
            self.scale().lerp(&other.scale(), weight),
            self.origin.lerp(&other.origin, weight),
        )
    }
}

impl Affine for Transform3 {
    type Vector = Vector3<f32>;

    fn identity() -> Self {
        Self::new(Matrix3::identity(), Vector3::zeros())
    }

    fn compose(&self, other: &Self) -> Self {
        Self::new(self.basis * other.basis, self.basis * other.origin + self.origin)
    }

    fn try_affine_inverse(&self) -> Option<Self> {
        let inv = self.basis.try_inverse()?;
        Some(Self::new(inv, -(inv * self.origin)))
    }

    fn origin(&self) -> Vector3<f32> {
        self.origin
    }

    fn set_origin(&mut self, origin: Vector3<f32>) {
        self.origin = origin;
    }

    fn xform(&self, point: Vector3<f32>) -> Vector3<f32> {
        self.basis * point + self.origin
    }

    fn origin_distance(&self, other: &Self) -> f32 {
        (self.origin - other.origin).norm()
    }

    fn forward_axis_scale(&self) -> f32 {
        self.basis.column(2).norm()
    }

    fn is_finite(&self) -> bool {
        self.basis.iter().chain(self.origin.iter()).all(|v| v.is_finite())
    }

    fn approx_eq(&self, other: &Self, epsilon: f32) -> bool {
        (self.basis - other.basis).amax() <= epsilon
            && (self.origin - other.origin).amax() <= epsilon
    }
}

// ---------------------------------------------------------------------------
// Free functions
// ---------------------------------------------------------------------------

/// Wrap an angle into `(-PI, PI]`.
pub fn wrap_angle(angle: f32) -> f32 {
    let wrapped = (angle + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped <= -PI { wrapped + 2.0 * PI } else { wrapped }
}

/// Orthonormal basis whose -Z axis points along `direction`.
pub fn basis_looking_at(direction: Vector3<f32>, up: Vector3<f32>) -> Option<Matrix3<f32>> {
    let z = -direction.try_normalize(DEGENERATE_EPSILON)?;
    let x = up.cross(&z).try_normalize(DEGENERATE_EPSILON)?;
    let y = z.cross(&x);
    Some(Matrix3::from_columns(&[x, y, z]))
}

/// Shortest-arc rotation taking `from` onto `to`.
///
/// Opposite vectors rotate half a turn about an axis orthogonal to `from`.
/// Returns `None` when either vector has no length.
pub fn quat_from_two_vectors(
    from: Vector3<f32>,
    to: Vector3<f32>,
) -> Option<UnitQuaternion<f32>> {
    let v0 = from.try_normalize(DEGENERATE_EPSILON)?;
    let v1 = to.try_normalize(DEGENERATE_EPSILON)?;
    let d = v0.dot(&v1);

    if d >= 1.0 - 1e-6 {
        return Some(UnitQuaternion::identity());
    }
    if d <= -1.0 + 1e-6 {
        let axis = Vector3::x()
            .cross(&v0)
            .try_normalize(DEGENERATE_EPSILON)
            .or_else(|| Vector3::y().cross(&v0).try_normalize(DEGENERATE_EPSILON))?;
        return Some(UnitQuaternion::from_axis_angle(&Unit::new_unchecked(axis), PI));
    }
    UnitQuaternion::rotation_between(&v0, &v1)
}

/// Split `rotation` into a swing and a signed twist angle about `axis`.
///
/// `rotation == swing * twist(axis, angle)` up to floating error.
pub fn swing_twist(
    rotation: &UnitQuaternion<f32>,
    axis: &Unit<Vector3<f32>>,
) -> (UnitQuaternion<f32>, f32) {
    let q = rotation.quaternion();
    let projected = axis.into_inner() * axis.dot(&q.imag());
    let twist = Quaternion::new(q.w, projected.x, projected.y, projected.z);
    if twist.norm_squared() <= DEGENERATE_EPSILON {
        // Half-turn swing: no meaningful twist component.
        return (*rotation, 0.0);
    }
    let twist = UnitQuaternion::from_quaternion(twist);
    let angle = wrap_angle(2.0 * axis.dot(&twist.imag()).atan2(twist.w));
    (rotation * twist.inverse(), angle)
}

#[cfg(test)]
mod tests {
    use std::f32::consts::{FRAC_PI_2, FRAC_PI_4};

    use approx::assert_relative_eq;

    use super::*;

    // ---- Transform2 ----

    #[test]
    fn transform2_rotation_and_scale() {
        let t = Transform2::from_parts(0.7, Vector2::new(2.0, 3.0), Vector2::new(1.0, -1.0));
        assert_relative_eq!(t.rotation(), 0.7, epsilon = 1e-6);
        assert_relative_eq!(t.scale(), Vector2::new(2.0, 3.0), epsilon = 1e-5);
    }

    #[test]
    fn transform2_mirrored_scale_reports_negative_y() {
        let t = Transform2::from_parts(0.3, Vector2::new(1.0, -2.0), Vector2::zeros());
        assert_relative_eq!(t.scale(), Vector2::new(1.0, -2.0), epsilon = 1e-5);
        assert_relative_eq!(t.rotation(), 0.3, epsilon = 1e-6);
    }

    #[test]
    fn transform2_looking_at_points_x_axis() {
        let t = Transform2::from_translation(Vector2::new(1.0, 1.0));
        let looked = t.looking_at(Vector2::new(1.0, 5.0)).unwrap();
        assert_relative_eq!(looked.rotation(), FRAC_PI_2, epsilon = 1e-6);
        assert_relative_eq!(looked.origin, t.origin);
    }

    #[test]
    fn transform2_looking_at_self_is_none() {
        let t = Transform2::from_translation(Vector2::new(2.0, 0.0));
        assert!(t.looking_at(Vector2::new(2.0, 0.0)).is_none());
    }

    #[test]
    fn transform2_compose_then_inverse_is_identity() {
        let a = Transform2::from_parts(1.2, Vector2::new(2.0, 0.5), Vector2::new(3.0, 4.0));
        let inv = a.try_affine_inverse().unwrap();
        assert!(a.compose(&inv).approx_eq(&Transform2::identity(), 1e-5));
    }

    #[test]
    fn transform2_rotated_local_keeps_origin() {
        let t = Transform2::from_rotation(0.5, Vector2::new(3.0, 1.0));
        let r = t.rotated_local(0.25);
        assert_relative_eq!(r.rotation(), 0.75, epsilon = 1e-6);
        assert_relative_eq!(r.origin, t.origin);
    }

    #[test]
    fn transform2_singular_has_no_inverse() {
        let t = Transform2::from_parts(0.0, Vector2::new(0.0, 1.0), Vector2::zeros());
        assert!(t.try_affine_inverse().is_none());
    }

    // ---- Transform3 ----

    #[test]
    fn transform3_forward_is_negative_z() {
        let t = Transform3::identity();
        assert_relative_eq!(t.forward(), -Vector3::z());
    }

    #[test]
    fn transform3_looking_at_keeps_scale() {
        let t = Transform3::from_parts(
            UnitQuaternion::identity(),
            Vector3::new(2.0, 2.0, 2.0),
            Vector3::zeros(),
        );
        let looked = t.looking_at(Vector3::new(5.0, 0.0, 0.0), Vector3::y()).unwrap();
        assert_relative_eq!(looked.forward(), Vector3::x(), epsilon = 1e-5);
        assert_relative_eq!(looked.scale(), Vector3::new(2.0, 2.0, 2.0), epsilon = 1e-5);
    }

    #[test]
    fn transform3_looking_at_parallel_up_is_none() {
        let t = Transform3::identity();
        assert!(t.looking_at(Vector3::new(0.0, 3.0, 0.0), Vector3::y()).is_none());
        assert!(t.looking_at(Vector3::zeros(), Vector3::y()).is_none());
    }

    #[test]
    fn transform3_swing_looking_at() {
        let t = Transform3::from_translation(Vector3::new(1.0, 0.0, 0.0));
        let looked = t.swing_looking_at(Vector3::new(1.0, 4.0, 0.0)).unwrap();
        assert_relative_eq!(looked.forward(), Vector3::y(), epsilon = 1e-5);
    }

    #[test]
    fn transform3_rotation_quat_ignores_scale() {
        let q = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 0.8);
        let t = Transform3::from_parts(q, Vector3::new(1.0, 3.0, 0.5), Vector3::zeros());
        assert_relative_eq!(t.rotation_quat().angle_to(&q), 0.0, epsilon = 1e-4);
    }

    #[test]
    fn transform3_additional_rotation_about_local_x() {
        let t = Transform3::identity().with_additional_rotation(Vector3::new(FRAC_PI_2, 0.0, 0.0));
        // -Z rotated a quarter turn about +X ends on +Y.
        assert_relative_eq!(t.forward(), Vector3::y(), epsilon = 1e-5);
    }

    #[test]
    fn transform3_compose_then_inverse_is_identity() {
        let a = Transform3::from_parts(
            UnitQuaternion::from_euler_angles(0.1, 0.2, 0.3),
            Vector3::new(1.0, 2.0, 3.0),
            Vector3::new(4.0, 5.0, 6.0),
        );
        let inv = a.try_affine_inverse().unwrap();
        assert!(inv.compose(&a).approx_eq(&Transform3::identity(), 1e-5));
    }

    // ---- Free functions ----

    #[test]
    fn quat_from_two_vectors_maps_from_onto_to() {
        let from = Vector3::new(1.0, 2.0, 0.5);
        let to = Vector3::new(-0.3, 0.1, 2.0);
        let q = quat_from_two_vectors(from, to).unwrap();
        assert_relative_eq!(q * from.normalize(), to.normalize(), epsilon = 1e-5);
    }

    #[test]
    fn quat_from_two_vectors_opposite() {
        let q = quat_from_two_vectors(Vector3::x(), -Vector3::x()).unwrap();
        assert_relative_eq!(q * Vector3::x(), -Vector3::x(), epsilon = 1e-5);
    }

    #[test]
    fn quat_from_two_vectors_zero_is_none() {
        assert!(quat_from_two_vectors(Vector3::zeros(), Vector3::x()).is_none());
    }

    #[test]
    fn swing_twist_recovers_pure_twist() {
        let q = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), FRAC_PI_4);
        let (swing, angle) = swing_twist(&q, &Vector3::z_axis());
        assert_relative_eq!(angle, FRAC_PI_4, epsilon = 1e-5);
        assert_relative_eq!(swing.angle(), 0.0, epsilon = 1e-5);
    }

    #[test]
    fn swing_twist_recomposes() {
        let q = UnitQuaternion::from_euler_angles(0.3, -0.4, 0.9);
        let axis = Vector3::z_axis();
        let (swing, angle) = swing_twist(&q, &axis);
        let back = swing * UnitQuaternion::from_axis_angle(&axis, angle);
        assert_relative_eq!(back.angle_to(&q), 0.0, epsilon = 1e-4);
    }

    #[test]
    fn wrap_angle_range() {
        assert_relative_eq!(wrap_angle(3.0 * PI), PI, epsilon = 1e-5);
        assert_relative_eq!(wrap_angle(-FRAC_PI_2), -FRAC_PI_2, epsilon = 1e-6);
        assert_relative_eq!(wrap_angle(2.0 * PI + 0.5), 0.5, epsilon = 1e-5);
    }
}
