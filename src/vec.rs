//! Vector types and traits for rope calculations.

use crate::float::Float;
use core::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use serde::{Deserialize, Serialize};

/// Trait for vector types used in rope calculations.
///
/// Carries the length/normalize/lerp vocabulary so solver code reads the
/// same regardless of the scalar type.
pub trait Vec:
    Copy
    + Clone
    + Add<Output = Self>
    + Sub<Output = Self>
    + Neg<Output = Self>
    + PartialEq
    + Default
    + core::fmt::Debug
{
    /// The scalar (float) type for this vector.
    type Scalar: Float;

    /// Zero vector.
    fn zero() -> Self;

    /// Vector with all components set to the same value.
    fn splat(value: Self::Scalar) -> Self;

    /// Dot product.
    fn dot(self, other: Self) -> Self::Scalar;

    /// Squared length (avoids sqrt).
    fn length_sq(self) -> Self::Scalar {
        self.dot(self)
    }

    /// Length (magnitude).
    fn length(self) -> Self::Scalar {
        self.length_sq().sqrt()
    }

    /// Normalize to unit length. Returns zero vector if length is near zero.
    fn normalize(self) -> Self {
        let len = self.length();
        if len.is_near_zero(Self::Scalar::from_f32(1e-10)) {
            Self::zero()
        } else {
            self.scale(Self::Scalar::one() / len)
        }
    }

    /// Normalize, or return `fallback` when the vector is degenerate.
    fn normalize_or(self, fallback: Self) -> Self {
        let len = self.length();
        if len.is_near_zero(Self::Scalar::from_f32(1e-10)) || !len.is_finite() {
            fallback
        } else {
            self.scale(Self::Scalar::one() / len)
        }
    }

    /// Scale all components by a scalar.
    fn scale(self, s: Self::Scalar) -> Self;

    /// Distance between two points.
    fn distance(self, other: Self) -> Self::Scalar {
        (self - other).length()
    }

    /// Squared distance between two points.
    fn distance_sq(self, other: Self) -> Self::Scalar {
        (self - other).length_sq()
    }

    /// Linear interpolation between self and other.
    fn lerp(self, other: Self, t: Self::Scalar) -> Self {
        self + (other - self).scale(t)
    }
}

/// 3D vector. The rope lives in world space, so this is the only vector
/// type the solver uses.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3<F: Float> {
    pub x: F,
    pub y: F,
    pub z: F,
}

impl<F: Float> Vec3<F> {
    /// Create a new 3D vector.
    pub fn new(x: F, y: F, z: F) -> Self { Vec3 { x, y, z } }

    /// Unit X.
    pub fn x_axis() -> Self { Vec3::new(F::one(), F::zero(), F::zero()) }
    /// Unit Y.
    pub fn y_axis() -> Self { Vec3::new(F::zero(), F::one(), F::zero()) }
    /// Unit Z.
    pub fn z_axis() -> Self { Vec3::new(F::zero(), F::zero(), F::one()) }

    /// 3D cross product.
    pub fn cross(self, other: Self) -> Self {
        Vec3 {
            x: self.y * other.z - self.z * other.y,
            y: self.z * other.x - self.x * other.z,
            z: self.x * other.y - self.y * other.x,
        }
    }

    /// Component-wise minimum.
    pub fn min(self, other: Self) -> Self {
        Vec3::new(self.x.min(other.x), self.y.min(other.y), self.z.min(other.z))
    }

    /// Component-wise maximum.
    pub fn max(self, other: Self) -> Self {
        Vec3::new(self.x.max(other.x), self.y.max(other.y), self.z.max(other.z))
    }

    /// Component-wise absolute value.
    pub fn abs(self) -> Self {
        Vec3::new(self.x.abs(), self.y.abs(), self.z.abs())
    }

    /// Some unit vector perpendicular to `self` (which need not be unit).
    pub fn orthogonal(self) -> Self {
        let a = self.abs();
        let other = if a.x <= a.y && a.x <= a.z {
            Vec3::x_axis()
        } else if a.y <= a.z {
            Vec3::y_axis()
        } else {
            Vec3::z_axis()
        };
        self.cross(other).normalize()
    }

    /// True when every component is finite.
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Rotate around a unit `axis` by `angle` radians (Rodrigues).
    pub fn rotated(self, axis: Self, angle: F) -> Self {
        let (s, c) = (angle.sin(), angle.cos());
        self.scale(c) + axis.cross(self).scale(s) + axis.scale(axis.dot(self) * (F::one() - c))
    }

    /// Array form, used by snapshots and tests.
    pub fn to_array(self) -> [F; 3] {
        [self.x, self.y, self.z]
    }
}

impl<F: Float> From<[F; 3]> for Vec3<F> {
    fn from(a: [F; 3]) -> Self {
        Vec3::new(a[0], a[1], a[2])
    }
}

impl<F: Float> Add for Vec3<F> {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Vec3 { x: self.x + rhs.x, y: self.y + rhs.y, z: self.z + rhs.z }
    }
}

impl<F: Float> Sub for Vec3<F> {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Vec3 { x: self.x - rhs.x, y: self.y - rhs.y, z: self.z - rhs.z }
    }
}

impl<F: Float> AddAssign for Vec3<F> {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl<F: Float> SubAssign for Vec3<F> {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl<F: Float> Neg for Vec3<F> {
    type Output = Self;
    fn neg(self) -> Self { Vec3 { x: -self.x, y: -self.y, z: -self.z } }
}

impl<F: Float> Vec for Vec3<F> {
    type Scalar = F;
    fn zero() -> Self { Vec3 { x: F::zero(), y: F::zero(), z: F::zero() } }
    fn splat(value: F) -> Self { Vec3 { x: value, y: value, z: value } }
    fn dot(self, other: Self) -> F {
        self.x * other.x + self.y * other.y + self.z * other.z
    }
    fn scale(self, s: F) -> Self {
        Vec3 { x: self.x * s, y: self.y * s, z: self.z * s }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec3_length() {
        let v = Vec3::new(2.0f32, 3.0, 6.0);
        assert!((v.length() - 7.0).abs() < 1e-6);
    }

    #[test]
    fn vec3_cross() {
        let i = Vec3::new(1.0f32, 0.0, 0.0);
        let j = Vec3::new(0.0f32, 1.0, 0.0);
        let k = i.cross(j);
        assert!((k.x - 0.0).abs() < 1e-6);
        assert!((k.y - 0.0).abs() < 1e-6);
        assert!((k.z - 1.0).abs() < 1e-6);
    }

    #[test]
    fn normalize_zero_vector() {
        let v = Vec3::<f32>::zero();
        assert_eq!(v.normalize(), Vec3::zero());
        assert_eq!(v.normalize_or(Vec3::z_axis()), Vec3::z_axis());
    }

    #[test]
    fn orthogonal_is_perpendicular() {
        for v in [Vec3::new(1.0f32, 0.0, 0.0), Vec3::new(0.3, -2.0, 0.1), Vec3::new(0.0, 0.0, -5.0)] {
            let o = v.orthogonal();
            assert!(o.dot(v).abs() < 1e-5);
            assert!((o.length() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn rotate_quarter_turn() {
        let v = Vec3::new(1.0f32, 0.0, 0.0);
        let r = v.rotated(Vec3::z_axis(), core::f32::consts::FRAC_PI_2);
        assert!(r.distance(Vec3::new(0.0, 1.0, 0.0)) < 1e-6);
    }

    #[test]
    fn lerp_midpoint() {
        let a = Vec3::new(0.0f32, 0.0, 0.0);
        let b = Vec3::new(10.0f32, 10.0, -4.0);
        let mid = a.lerp(b, 0.5);
        assert!(mid.distance(Vec3::new(5.0, 5.0, -2.0)) < 1e-6);
    }
}
