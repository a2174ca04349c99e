//! Collider geometry contract.
//!
//! Geometry is queried in its own local frame at unit scale; callers map
//! world-space queries in and results out (see [`crate::check_part::CheckPart`]).

use crate::aabb::Aabb;
use crate::float::Float;
use crate::vec::{Vec as _, Vec3};
use serde::{Deserialize, Serialize};

/// Which part of a collider a contact sits on.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeatureId {
    #[default]
    Unknown,
    Face(u32),
    Edge(u32),
    Vertex(u32),
}

/// Primitive index plus feature, carried between ticks to speed up
/// closest-point queries on the same collider.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContactFeature {
    pub primitive: u32,
    pub feature: FeatureId,
}

impl ContactFeature {
    pub fn face(primitive: u32, face: u32) -> Self {
        ContactFeature { primitive, feature: FeatureId::Face(face) }
    }
}

/// First surface crossing along a segment, entering the solid.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RayHit<F: Float> {
    pub point: Vec3<F>,
    /// Outward surface normal at `point`.
    pub normal: Vec3<F>,
    /// Fraction along the segment, in [0, 1].
    pub t: F,
    pub feature: ContactFeature,
}

/// Closest pair between a geometry and a segment.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ClosestPoints<F: Float> {
    pub on_geometry: Vec3<F>,
    pub on_segment: Vec3<F>,
    /// Fraction along the segment of `on_segment`.
    pub t: F,
    /// Outward normal at `on_geometry`.
    pub normal: Vec3<F>,
    /// Signed separation along `normal`; negative when the segment penetrates.
    pub distance: F,
}

/// Result of [`Geometry::unproject_sphere`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SphereContact<F: Float> {
    /// Surface point closest to the query center.
    pub point: Vec3<F>,
    pub normal: Vec3<F>,
    /// Signed distance of the query center from the surface.
    pub distance: F,
    pub feature: ContactFeature,
}

/// How [`Geometry::intersect`] resolves a hit.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub enum Unprojection<F: Float> {
    /// Plain linear contact.
    #[default]
    Linear,
    /// Rotate the segment around `center` (optionally only around `hinge`)
    /// until it clears the hit.
    Rotational { center: Vec3<F>, hinge: Option<Vec3<F>> },
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GeomContact<F: Float> {
    pub point: Vec3<F>,
    pub normal: Vec3<F>,
    /// Fraction along the queried segment.
    pub t: F,
    pub feature: ContactFeature,
    /// Rotation axis and angle for rotational unprojection.
    pub rotation: Option<(Vec3<F>, F)>,
}

/// Queryable collider shape.
pub trait Geometry<F: Float>: Send + Sync {
    /// Primitives answer sphere unprojection cheaply and exactly.
    fn is_primitive(&self) -> bool;

    /// Local-frame bounds.
    fn local_bounds(&self) -> Aabb<F>;

    /// Entry hit of the segment `from -> to`. `None` when the segment starts
    /// inside or misses.
    fn raycast(&self, from: Vec3<F>, to: Vec3<F>) -> Option<RayHit<F>>;

    /// Closest points between the geometry and segment `a -> b`. `feature`
    /// is a hint from the previous query and is updated in place.
    fn find_closest_point(
        &self,
        feature: &mut ContactFeature,
        a: Vec3<F>,
        b: Vec3<F>,
    ) -> Option<ClosestPoints<F>>;

    /// Nearest surface point for a query sphere. Returns a contact when the
    /// center lies closer than `radius + separation` to the surface.
    fn unproject_sphere(&self, center: Vec3<F>, radius: F, separation: F) -> Option<SphereContact<F>>;

    /// Segment intersection with optional rotational unprojection.
    fn intersect(&self, from: Vec3<F>, to: Vec3<F>, mode: Unprojection<F>) -> Option<GeomContact<F>> {
        let hit = self.raycast(from, to)?;
        let rotation = match mode {
            Unprojection::Linear => None,
            Unprojection::Rotational { center, hinge } => {
                rotational_unprojection(center, to, hit.point, hit.normal, hinge)
            }
        };
        Some(GeomContact { point: hit.point, normal: hit.normal, t: hit.t, feature: hit.feature, rotation })
    }
}

/// Smallest rotation of segment `center -> end` about `center` that lifts
/// `end` onto the plane through `hit` with normal `n`.
///
/// Returns `(axis, angle)` with `angle > 0`, or `None` when no rotation is
/// needed or none can reach the plane.
pub fn rotational_unprojection<F: Float>(
    center: Vec3<F>,
    end: Vec3<F>,
    hit: Vec3<F>,
    n: Vec3<F>,
    hinge: Option<Vec3<F>>,
) -> Option<(Vec3<F>, F)> {
    let seg = end - center;
    let len = seg.length();
    if len.is_near_zero(F::from_f32(1e-10)) {
        return None;
    }
    let dir = seg.scale(F::one() / len);
    let mut axis = match hinge {
        Some(h) => h.normalize(),
        None => dir.cross(n).normalize(),
    };
    if axis.length_sq().is_near_zero(F::from_f32(1e-12)) {
        axis = dir.orthogonal();
    }
    // Rotating by +angle about `axis` moves `dir` along `axis x dir`.
    let mut s = axis.cross(dir).dot(n);
    if s < F::zero() {
        axis = -axis;
        s = -s;
    }
    let d = dir.dot(n);
    let h = (center - hit).dot(n);
    let r = (d * d + s * s).sqrt();
    if r.is_near_zero(F::from_f32(1e-10)) {
        return None;
    }
    let target = -h / (len * r);
    if target > F::one() || target < -F::one() {
        return None;
    }
    let phi = F::atan2(s, d);
    let angle = phi - target.acos();
    if angle > F::zero() {
        Some((axis, angle))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unprojection_lifts_end_onto_plane() {
        let center = Vec3::new(0.0f64, 0.0, 0.5);
        let end = Vec3::new(1.0, 0.0, -0.5);
        let (axis, angle) =
            rotational_unprojection(center, end, Vec3::new(0.5, 0.0, 0.0), Vec3::z_axis(), None).unwrap();
        let lifted = center + (end - center).rotated(axis, angle);
        assert!(lifted.z.abs() < 1e-9, "end should land on the plane, got {:?}", lifted);
        assert!(angle > 0.0);
    }

    #[test]
    fn no_unprojection_when_clear() {
        let r = rotational_unprojection(
            Vec3::new(0.0f32, 0.0, 1.0),
            Vec3::new(1.0, 0.0, 0.5),
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::z_axis(),
            None,
        );
        assert!(r.is_none());
    }
}
