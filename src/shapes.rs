//! Primitive collider shapes.
//!
//! Each shape lives in its own local frame; place it in the world through a
//! part pose (see [`crate::scene::Scene`]).

use crate::aabb::Aabb;
use crate::float::Float;
use crate::geometry::{ClosestPoints, ContactFeature, Geometry, RayHit, SphereContact};
use crate::vec::{Vec as _, Vec3};

fn eps<F: Float>() -> F {
    F::from_f32(1e-9)
}

/// Solid below the local `z = 0` plane.
#[derive(Copy, Clone, Debug, Default)]
pub struct HalfSpace;

impl HalfSpace {
    const EXTENT: f32 = 1.0e9;
}

impl<F: Float> Geometry<F> for HalfSpace {
    fn is_primitive(&self) -> bool {
        true
    }

    fn local_bounds(&self) -> Aabb<F> {
        let e = F::from_f32(Self::EXTENT);
        Aabb::new(Vec3::new(-e, -e, -e), Vec3::new(e, e, F::zero()))
    }

    fn raycast(&self, from: Vec3<F>, to: Vec3<F>) -> Option<RayHit<F>> {
        if from.z <= F::zero() || to.z >= F::zero() {
            return None;
        }
        let t = from.z / (from.z - to.z);
        let mut point = from.lerp(to, t);
        point.z = F::zero();
        Some(RayHit { point, normal: Vec3::z_axis(), t, feature: ContactFeature::face(0, 0) })
    }

    fn find_closest_point(
        &self,
        feature: &mut ContactFeature,
        a: Vec3<F>,
        b: Vec3<F>,
    ) -> Option<ClosestPoints<F>> {
        let t = if (a.z - b.z).abs() < eps() {
            F::half()
        } else if a.z < b.z {
            F::zero()
        } else {
            F::one()
        };
        let p = a.lerp(b, t);
        *feature = ContactFeature::face(0, 0);
        Some(ClosestPoints {
            on_geometry: Vec3::new(p.x, p.y, F::zero()),
            on_segment: p,
            t,
            normal: Vec3::z_axis(),
            distance: p.z,
        })
    }

    fn unproject_sphere(&self, center: Vec3<F>, radius: F, separation: F) -> Option<SphereContact<F>> {
        if center.z >= radius + separation {
            return None;
        }
        Some(SphereContact {
            point: Vec3::new(center.x, center.y, F::zero()),
            normal: Vec3::z_axis(),
            distance: center.z,
            feature: ContactFeature::face(0, 0),
        })
    }
}

/// Ball centered on the local origin.
#[derive(Copy, Clone, Debug)]
pub struct Sphere<F: Float> {
    pub radius: F,
}

impl<F: Float> Sphere<F> {
    pub fn new(radius: F) -> Self {
        Sphere { radius }
    }

    fn surface(&self, p: Vec3<F>) -> (Vec3<F>, Vec3<F>, F) {
        let len = p.length();
        let n = if len > eps() { p.scale(F::one() / len) } else { Vec3::z_axis() };
        (n.scale(self.radius), n, len - self.radius)
    }
}

impl<F: Float> Geometry<F> for Sphere<F> {
    fn is_primitive(&self) -> bool {
        true
    }

    fn local_bounds(&self) -> Aabb<F> {
        Aabb::from_center_half_extents(Vec3::zero(), Vec3::splat(self.radius))
    }

    fn raycast(&self, from: Vec3<F>, to: Vec3<F>) -> Option<RayHit<F>> {
        let r2 = self.radius * self.radius;
        if from.length_sq() <= r2 {
            return None;
        }
        let d = to - from;
        let a = d.length_sq();
        if a < eps() {
            return None;
        }
        let b = from.dot(d);
        let c = from.length_sq() - r2;
        let disc = b * b - a * c;
        if disc < F::zero() {
            return None;
        }
        let t = (-b - disc.sqrt()) / a;
        if t < F::zero() || t > F::one() {
            return None;
        }
        let point = from + d.scale(t);
        let normal = point.normalize_or(Vec3::z_axis());
        Some(RayHit { point, normal, t, feature: ContactFeature::face(0, 0) })
    }

    fn find_closest_point(
        &self,
        feature: &mut ContactFeature,
        a: Vec3<F>,
        b: Vec3<F>,
    ) -> Option<ClosestPoints<F>> {
        let d = b - a;
        let dd = d.length_sq();
        let t = if dd < eps() { F::zero() } else { (-a.dot(d) / dd).clamp(F::zero(), F::one()) };
        let p = a + d.scale(t);
        let (on_geometry, normal, distance) = self.surface(p);
        *feature = ContactFeature::face(0, 0);
        Some(ClosestPoints { on_geometry, on_segment: p, t, normal, distance })
    }

    fn unproject_sphere(&self, center: Vec3<F>, radius: F, separation: F) -> Option<SphereContact<F>> {
        let (point, normal, distance) = self.surface(center);
        if distance >= radius + separation {
            return None;
        }
        Some(SphereContact { point, normal, distance, feature: ContactFeature::face(0, 0) })
    }
}

/// Box centered on the local origin.
#[derive(Copy, Clone, Debug)]
pub struct Cuboid<F: Float> {
    pub half_extents: Vec3<F>,
}

impl<F: Float> Cuboid<F> {
    pub fn new(half_extents: Vec3<F>) -> Self {
        Cuboid { half_extents }
    }

    /// Signed distance from the surface.
    fn signed_distance(&self, p: Vec3<F>) -> F {
        let q = p.abs() - self.half_extents;
        let outside = q.max(Vec3::zero()).length();
        let inside = q.x.max(q.y).max(q.z).min(F::zero());
        outside + inside
    }

    /// Closest surface point, outward normal, signed distance and face.
    fn surface(&self, p: Vec3<F>) -> (Vec3<F>, Vec3<F>, F, u32) {
        let h = self.half_extents;
        let clamped = p.max(-h).min(h);
        let delta = p - clamped;
        let outside = delta.length();
        if outside > eps() {
            let n = delta.scale(F::one() / outside);
            return (clamped, n, outside, Self::face_of(n));
        }
        let q = p.abs() - h;
        let mut point = p;
        let (axis, depth) = if q.x >= q.y && q.x >= q.z {
            (0, q.x)
        } else if q.y >= q.z {
            (1, q.y)
        } else {
            (2, q.z)
        };
        let n = match axis {
            0 => {
                point.x = h.x * p.x.signum();
                Vec3::new(p.x.signum(), F::zero(), F::zero())
            }
            1 => {
                point.y = h.y * p.y.signum();
                Vec3::new(F::zero(), p.y.signum(), F::zero())
            }
            _ => {
                point.z = h.z * p.z.signum();
                Vec3::new(F::zero(), F::zero(), p.z.signum())
            }
        };
        (point, n, depth, Self::face_of(n))
    }

    fn face_of(n: Vec3<F>) -> u32 {
        let a = n.abs();
        let (axis, s) = if a.x >= a.y && a.x >= a.z {
            (0, n.x)
        } else if a.y >= a.z {
            (1, n.y)
        } else {
            (2, n.z)
        };
        axis * 2 + u32::from(s < F::zero())
    }
}

impl<F: Float> Geometry<F> for Cuboid<F> {
    fn is_primitive(&self) -> bool {
        true
    }

    fn local_bounds(&self) -> Aabb<F> {
        Aabb::from_center_half_extents(Vec3::zero(), self.half_extents)
    }

    fn raycast(&self, from: Vec3<F>, to: Vec3<F>) -> Option<RayHit<F>> {
        if self.signed_distance(from) <= F::zero() {
            return None;
        }
        let d = to - from;
        let h = self.half_extents.to_array();
        let o = from.to_array();
        let dir = d.to_array();
        let mut t_enter = F::zero();
        let mut t_exit = F::one();
        let mut enter_axis = 3;
        for axis in 0..3 {
            if dir[axis].abs() < eps() {
                if o[axis] < -h[axis] || o[axis] > h[axis] {
                    return None;
                }
                continue;
            }
            let inv = F::one() / dir[axis];
            let mut t0 = (-h[axis] - o[axis]) * inv;
            let mut t1 = (h[axis] - o[axis]) * inv;
            if t0 > t1 {
                core::mem::swap(&mut t0, &mut t1);
            }
            if t0 > t_enter {
                t_enter = t0;
                enter_axis = axis;
            }
            t_exit = t_exit.min(t1);
            if t_enter > t_exit {
                return None;
            }
        }
        if enter_axis == 3 {
            return None;
        }
        let mut n = [F::zero(); 3];
        n[enter_axis] = -dir[enter_axis].signum();
        let normal = Vec3::from(n);
        Some(RayHit {
            point: from + d.scale(t_enter),
            normal,
            t: t_enter,
            feature: ContactFeature::face(0, Self::face_of(normal)),
        })
    }

    fn find_closest_point(
        &self,
        feature: &mut ContactFeature,
        a: Vec3<F>,
        b: Vec3<F>,
    ) -> Option<ClosestPoints<F>> {
        // Signed distance is convex along a line; golden-section search on t.
        let ratio = F::from_f32(0.618_034);
        let (mut lo, mut hi) = (F::zero(), F::one());
        let at = |t: F| self.signed_distance(a.lerp(b, t));
        let mut x1 = hi - (hi - lo) * ratio;
        let mut x2 = lo + (hi - lo) * ratio;
        let (mut f1, mut f2) = (at(x1), at(x2));
        for _ in 0..48 {
            if f1 < f2 {
                hi = x2;
                x2 = x1;
                f2 = f1;
                x1 = hi - (hi - lo) * ratio;
                f1 = at(x1);
            } else {
                lo = x1;
                x1 = x2;
                f1 = f2;
                x2 = lo + (hi - lo) * ratio;
                f2 = at(x2);
            }
        }
        let mut t = (lo + hi) * F::half();
        for end in [F::zero(), F::one()] {
            if at(end) < at(t) {
                t = end;
            }
        }
        let p = a.lerp(b, t);
        let (on_geometry, normal, distance, face) = self.surface(p);
        *feature = ContactFeature::face(0, face);
        Some(ClosestPoints { on_geometry, on_segment: p, t, normal, distance })
    }

    fn unproject_sphere(&self, center: Vec3<F>, radius: F, separation: F) -> Option<SphereContact<F>> {
        let (point, normal, distance, face) = self.surface(center);
        if distance >= radius + separation {
            return None;
        }
        Some(SphereContact { point, normal, distance, feature: ContactFeature::face(0, face) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_space_ray_enters_from_above() {
        let hit = Geometry::<f64>::raycast(&HalfSpace, Vec3::new(0.0, 0.0, 1.0), Vec3::new(0.0, 0.0, -1.0)).unwrap();
        assert!((hit.t - 0.5).abs() < 1e-12);
        assert_eq!(hit.normal, Vec3::z_axis());
        assert!(Geometry::<f64>::raycast(&HalfSpace, Vec3::new(0.0, 0.0, -1.0), Vec3::new(0.0, 0.0, 1.0)).is_none());
    }

    #[test]
    fn sphere_closest_point_on_passing_segment() {
        let s = Sphere::new(1.0f64);
        let mut f = ContactFeature::default();
        let c = s.find_closest_point(&mut f, Vec3::new(-2.0, 0.0, 2.0), Vec3::new(2.0, 0.0, 2.0)).unwrap();
        assert!((c.t - 0.5).abs() < 1e-9);
        assert!((c.distance - 1.0).abs() < 1e-9);
        assert!(c.normal.distance(Vec3::z_axis()) < 1e-9);
    }

    #[test]
    fn cuboid_ray_hits_facing_side() {
        let b = Cuboid::new(Vec3::new(1.0f64, 1.0, 1.0));
        let hit = b.raycast(Vec3::new(-3.0, 0.2, 0.0), Vec3::new(3.0, 0.2, 0.0)).unwrap();
        assert!((hit.point.x + 1.0).abs() < 1e-9);
        assert!(hit.normal.distance(Vec3::new(-1.0, 0.0, 0.0)) < 1e-9);
    }

    #[test]
    fn cuboid_unprojects_inside_point_to_nearest_face() {
        let b = Cuboid::new(Vec3::new(1.0f64, 1.0, 1.0));
        let c = b.unproject_sphere(Vec3::new(0.0, 0.0, 0.9), 0.05, 0.0).unwrap();
        assert!(c.distance < 0.0);
        assert!(c.normal.distance(Vec3::z_axis()) < 1e-9);
        assert!((c.point.z - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cuboid_closest_point_on_edge_segment() {
        let b = Cuboid::new(Vec3::new(1.0f64, 1.0, 1.0));
        let mut f = ContactFeature::default();
        let c = b.find_closest_point(&mut f, Vec3::new(-3.0, 0.0, 1.5), Vec3::new(3.0, 0.0, 1.5)).unwrap();
        assert!((c.distance - 0.5).abs() < 1e-6);
        assert_eq!(f.feature, crate::geometry::FeatureId::Face(4));
    }
}
