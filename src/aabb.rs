//! Axis-aligned bounding boxes for broad-phase queries.

use crate::float::Float;
use crate::quat::Pose;
use crate::vec::{Vec as _, Vec3};
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Aabb<F: Float> {
    pub min: Vec3<F>,
    pub max: Vec3<F>,
}

impl<F: Float> Aabb<F> {
    pub fn new(min: Vec3<F>, max: Vec3<F>) -> Self {
        Aabb { min, max }
    }

    pub fn from_center_half_extents(center: Vec3<F>, half: Vec3<F>) -> Self {
        Aabb { min: center - half, max: center + half }
    }

    /// Smallest box containing every point. `None` for an empty iterator.
    pub fn from_points<I: IntoIterator<Item = Vec3<F>>>(points: I) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut b = Aabb { min: first, max: first };
        for p in iter {
            b.min = b.min.min(p);
            b.max = b.max.max(p);
        }
        Some(b)
    }

    pub fn overlaps(&self, other: &Aabb<F>) -> bool {
        !(self.max.x < other.min.x || self.min.x > other.max.x
            || self.max.y < other.min.y || self.min.y > other.max.y
            || self.max.z < other.min.z || self.min.z > other.max.z)
    }

    pub fn contains(&self, p: Vec3<F>) -> bool {
        p.x >= self.min.x && p.x <= self.max.x
            && p.y >= self.min.y && p.y <= self.max.y
            && p.z >= self.min.z && p.z <= self.max.z
    }

    pub fn expanded(self, r: F) -> Self {
        let e = Vec3::splat(r);
        Aabb { min: self.min - e, max: self.max + e }
    }

    pub fn center(&self) -> Vec3<F> {
        (self.min + self.max).scale(F::half())
    }

    pub fn half_extents(&self) -> Vec3<F> {
        (self.max - self.min).scale(F::half())
    }

    /// World box enclosing this local box under `pose`.
    pub fn transformed(&self, pose: &Pose<F>) -> Self {
        let c = pose.transform_point(self.center());
        let h = self.half_extents().scale(pose.scale);
        let ax = pose.rotation.rotate(Vec3::x_axis()).abs();
        let ay = pose.rotation.rotate(Vec3::y_axis()).abs();
        let az = pose.rotation.rotate(Vec3::z_axis()).abs();
        let world_half = ax.scale(h.x) + ay.scale(h.y) + az.scale(h.z);
        Aabb::from_center_half_extents(c, world_half)
    }
}
