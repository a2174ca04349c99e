//! Rotations and rigid transforms used for anchors and colliders.

use crate::float::Float;
use crate::vec::{Vec as _, Vec3};
use core::ops::Mul;
use serde::{Deserialize, Serialize};

/// Unit quaternion. `w` is the scalar part.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quat<F: Float> {
    pub w: F,
    pub x: F,
    pub y: F,
    pub z: F,
}

impl<F: Float> Default for Quat<F> {
    fn default() -> Self {
        Self::identity()
    }
}

impl<F: Float> Quat<F> {
    pub fn identity() -> Self {
        Quat { w: F::one(), x: F::zero(), y: F::zero(), z: F::zero() }
    }

    /// Rotation of `angle` radians around `axis`. A degenerate axis gives identity.
    pub fn from_axis_angle(axis: Vec3<F>, angle: F) -> Self {
        let axis = axis.normalize();
        let half = angle * F::half();
        let s = half.sin();
        Quat { w: half.cos(), x: axis.x * s, y: axis.y * s, z: axis.z * s }
    }

    /// Vector part.
    pub fn v(self) -> Vec3<F> {
        Vec3::new(self.x, self.y, self.z)
    }

    pub fn conjugate(self) -> Self {
        Quat { w: self.w, x: -self.x, y: -self.y, z: -self.z }
    }

    pub fn normalize(self) -> Self {
        let len = (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt();
        if len.is_near_zero(F::from_f32(1e-12)) {
            return Self::identity();
        }
        let k = F::one() / len;
        Quat { w: self.w * k, x: self.x * k, y: self.y * k, z: self.z * k }
    }

    /// Rotate a vector.
    pub fn rotate(self, v: Vec3<F>) -> Vec3<F> {
        let q = self.v();
        let t = q.cross(v).scale(F::two());
        v + t.scale(self.w) + q.cross(t)
    }

    /// Angular velocity that turns `self` into `next` over `dt`.
    ///
    /// Small-angle form `2 * w * v / dt` of the delta rotation `next * self^-1`.
    pub fn angular_velocity_to(self, next: Self, dt: F) -> Vec3<F> {
        if dt <= F::zero() {
            return Vec3::zero();
        }
        let mut dq = next * self.conjugate();
        if dq.w < F::zero() {
            dq = Quat { w: -dq.w, x: -dq.x, y: -dq.y, z: -dq.z };
        }
        dq.v().scale(dq.w * F::two() / dt)
    }
}

impl<F: Float> Mul for Quat<F> {
    type Output = Self;
    fn mul(self, r: Self) -> Self {
        Quat {
            w: self.w * r.w - self.x * r.x - self.y * r.y - self.z * r.z,
            x: self.w * r.x + self.x * r.w + self.y * r.z - self.z * r.y,
            y: self.w * r.y - self.x * r.z + self.y * r.w + self.z * r.x,
            z: self.w * r.z + self.x * r.y - self.y * r.x + self.z * r.w,
        }
    }
}

/// Rigid transform with uniform scale: `world = position + rotation * (scale * local)`.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pose<F: Float> {
    pub position: Vec3<F>,
    pub rotation: Quat<F>,
    pub scale: F,
}

impl<F: Float> Default for Pose<F> {
    fn default() -> Self {
        Self::identity()
    }
}

impl<F: Float> Pose<F> {
    pub fn identity() -> Self {
        Pose { position: Vec3::zero(), rotation: Quat::identity(), scale: F::one() }
    }

    pub fn new(position: Vec3<F>, rotation: Quat<F>) -> Self {
        Pose { position, rotation, scale: F::one() }
    }

    pub fn from_position(position: Vec3<F>) -> Self {
        Pose { position, ..Self::identity() }
    }

    pub fn with_scale(mut self, scale: F) -> Self {
        self.scale = scale;
        self
    }

    pub fn transform_point(&self, local: Vec3<F>) -> Vec3<F> {
        self.position + self.rotation.rotate(local.scale(self.scale))
    }

    pub fn transform_vector(&self, local: Vec3<F>) -> Vec3<F> {
        self.rotation.rotate(local)
    }

    pub fn inverse_transform_point(&self, world: Vec3<F>) -> Vec3<F> {
        let inv_scale = if self.scale.is_near_zero(F::from_f32(1e-12)) {
            F::one()
        } else {
            F::one() / self.scale
        };
        self.rotation.conjugate().rotate(world - self.position).scale(inv_scale)
    }

    pub fn inverse_transform_vector(&self, world: Vec3<F>) -> Vec3<F> {
        self.rotation.conjugate().rotate(world)
    }

    /// Pose of a child given in this pose's frame.
    pub fn compose(&self, local: &Pose<F>) -> Self {
        Pose {
            position: self.transform_point(local.position),
            rotation: (self.rotation * local.rotation).normalize(),
            scale: self.scale * local.scale,
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotate_matches_axis_angle() {
        let q = Quat::from_axis_angle(Vec3::new(0.0f32, 0.0, 1.0), core::f32::consts::FRAC_PI_2);
        let r = q.rotate(Vec3::new(1.0, 0.0, 0.0));
        assert!(r.distance(Vec3::new(0.0, 1.0, 0.0)) < 1e-6);
    }

    #[test]
    fn pose_inverse_round_trips() {
        let pose = Pose::new(
            Vec3::new(1.0f64, -2.0, 3.0),
            Quat::from_axis_angle(Vec3::new(1.0, 1.0, 0.0), 0.7),
        )
        .with_scale(2.0);
        let p = Vec3::new(0.25, 4.0, -1.5);
        let back = pose.inverse_transform_point(pose.transform_point(p));
        assert!(back.distance(p) < 1e-12);
    }

    #[test]
    fn angular_velocity_recovers_spin() {
        let dt = 0.01f64;
        let spin = Vec3::new(0.0, 0.0, 2.0);
        let q0 = Quat::identity();
        let q1 = Quat::from_axis_angle(spin, spin.length() * dt);
        let w = q0.angular_velocity_to(q1, dt);
        assert!(w.distance(spin) < 1e-3);
    }
}
