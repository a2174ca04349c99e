//! Per-tick collider snapshots.
//!
//! A [`CheckPart`] freezes one candidate collider's pose and motion for the
//! duration of a tick and answers world-space queries against its local
//! geometry.

use crate::aabb::Aabb;
use crate::config::{CollisionMask, RopeFlags, RopeParams};
use crate::float::Float;
use crate::geometry::{ClosestPoints, ContactFeature, GeomContact, Geometry, RayHit, SphereContact, Unprojection};
use crate::point::{Anchor, ChainPoint, Contact, SubVertex};
use crate::quat::Pose;
use crate::vec::{Vec as _, Vec3};
use crate::world::{BodyState, EntityId, PhysicalWorld};
use log::trace;

/// Candidate colliders kept per tick, nearest first.
pub const MAX_CHECK_PARTS: usize = 6;

/// One collider part as seen at the start of a tick.
#[derive(Clone, Copy)]
pub struct CheckPart<'w, F: Float> {
    pub entity: EntityId,
    pub part: usize,
    pub pose: Pose<F>,
    pub body: BodyState<F>,
    pub geometry: &'w dyn Geometry<F>,
    /// World bounds.
    pub bounds: Aabb<F>,
}

impl<'w, F: Float> CheckPart<'w, F> {
    pub fn new<W: PhysicalWorld<F> + ?Sized>(world: &'w W, entity: EntityId, part: usize) -> Option<Self> {
        let pose = world.part_pose(entity, part)?;
        let body = world.body_state(entity, part)?;
        let geometry = world.part_geometry(entity, part)?;
        let bounds = geometry.local_bounds().transformed(&pose);
        Some(CheckPart { entity, part, pose, body, geometry, bounds })
    }

    pub fn is_primitive(&self) -> bool {
        self.geometry.is_primitive()
    }

    pub fn point_velocity(&self, point: Vec3<F>) -> Vec3<F> {
        self.body.point_velocity(point)
    }

    /// Whether the segment's box, inflated by `margin`, touches the part.
    pub fn near_segment(&self, a: Vec3<F>, b: Vec3<F>, margin: F) -> bool {
        Aabb::new(a.min(b), a.max(b)).expanded(margin).overlaps(&self.bounds)
    }

    fn to_local(&self, p: Vec3<F>) -> Vec3<F> {
        self.pose.inverse_transform_point(p)
    }

    fn local_distance(&self, d: F) -> F {
        if self.pose.scale > F::zero() {
            d / self.pose.scale
        } else {
            d
        }
    }

    pub fn raycast(&self, from: Vec3<F>, to: Vec3<F>) -> Option<RayHit<F>> {
        let hit = self.geometry.raycast(self.to_local(from), self.to_local(to))?;
        Some(RayHit {
            point: self.pose.transform_point(hit.point),
            normal: self.pose.transform_vector(hit.normal),
            ..hit
        })
    }

    pub fn intersect(&self, from: Vec3<F>, to: Vec3<F>, mode: Unprojection<F>) -> Option<GeomContact<F>> {
        let local_mode = match mode {
            Unprojection::Linear => Unprojection::Linear,
            Unprojection::Rotational { center, hinge } => Unprojection::Rotational {
                center: self.to_local(center),
                hinge: hinge.map(|h| self.pose.inverse_transform_vector(h)),
            },
        };
        let c = self.geometry.intersect(self.to_local(from), self.to_local(to), local_mode)?;
        Some(GeomContact {
            point: self.pose.transform_point(c.point),
            normal: self.pose.transform_vector(c.normal),
            rotation: c.rotation.map(|(axis, angle)| (self.pose.transform_vector(axis), angle)),
            ..c
        })
    }

    pub fn closest_point(&self, feature: &mut ContactFeature, a: Vec3<F>, b: Vec3<F>) -> Option<ClosestPoints<F>> {
        let c = self.geometry.find_closest_point(feature, self.to_local(a), self.to_local(b))?;
        Some(ClosestPoints {
            on_geometry: self.pose.transform_point(c.on_geometry),
            on_segment: self.pose.transform_point(c.on_segment),
            normal: self.pose.transform_vector(c.normal),
            distance: c.distance * self.pose.scale,
            t: c.t,
        })
    }

    pub fn unproject_sphere(&self, center: Vec3<F>, radius: F, separation: F) -> Option<SphereContact<F>> {
        let c = self.geometry.unproject_sphere(
            self.to_local(center),
            self.local_distance(radius),
            self.local_distance(separation),
        )?;
        Some(SphereContact {
            point: self.pose.transform_point(c.point),
            normal: self.pose.transform_vector(c.normal),
            distance: c.distance * self.pose.scale,
            feature: c.feature,
        })
    }

    /// Build a contact record against this part.
    pub(crate) fn contact(&self, index: usize, point: Vec3<F>, normal: Vec3<F>, t: F, feature: ContactFeature) -> Contact<F> {
        Contact {
            entity: self.entity,
            part: self.part,
            normal,
            point,
            t,
            velocity: self.point_velocity(point),
            feature,
            recheck: false,
            check_part: index,
        }
    }
}

/// Classes the rope may collide with under its flags.
pub fn effective_mask<F: Float>(params: &RopeParams<F>) -> CollisionMask {
    let mut mask = params.collision_mask;
    if !params.flags.contains(RopeFlags::COLLIDES) {
        mask &= CollisionMask::TERRAIN;
    }
    if !params.flags.contains(RopeFlags::COLLIDES_WITH_TERRAIN) {
        mask.remove(CollisionMask::TERRAIN);
    }
    mask
}

/// Gather the parts near the rope's bounds, nearest first, capped at
/// [`MAX_CHECK_PARTS`].
pub fn gather<'w, F: Float, W: PhysicalWorld<F> + ?Sized>(
    world: &'w W,
    rope_bounds: &Aabb<F>,
    params: &RopeParams<F>,
    anchors: &[Option<Anchor<F>>; 2],
    scratch: &mut Vec<EntityId>,
) -> Vec<CheckPart<'w, F>> {
    let mask = effective_mask(params);
    let ignore = params.flags.contains(RopeFlags::IGNORE_ATTACHMENTS);
    let with_attached = params.flags.contains(RopeFlags::COLLIDES_WITH_ATTACHMENT) && !ignore;
    if mask.is_empty() && !with_attached {
        return Vec::new();
    }
    let extent = rope_bounds.half_extents();
    let max_extent = extent.x.max(extent.y).max(extent.z) * F::two();
    let thickness = max_thickness(params);
    let region = rope_bounds.expanded(max_extent * F::from_f32(0.01) + thickness * F::two() + params.sensor_size);

    scratch.clear();
    if !mask.is_empty() {
        world.query_region(&region, mask, scratch);
    }
    if with_attached {
        // Attached bodies collide even when the mask leaves their class out.
        for a in anchors.iter().flatten() {
            if !scratch.contains(&a.entity) {
                scratch.push(a.entity);
            }
        }
    }

    let skip_attached = !with_attached;
    let center = rope_bounds.center();
    let mut parts: Vec<(F, CheckPart<'w, F>)> = Vec::new();
    for &entity in scratch.iter() {
        if skip_attached && anchors.iter().flatten().any(|a| a.entity == entity) {
            continue;
        }
        let count = world.part_count(entity).unwrap_or(0);
        for part in 0..count {
            let Some(cp) = CheckPart::new(world, entity, part) else {
                continue;
            };
            if !cp.bounds.overlaps(&region) {
                continue;
            }
            let nearest = center.max(cp.bounds.min).min(cp.bounds.max);
            parts.push((nearest.distance_sq(center), cp));
        }
    }
    parts.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(core::cmp::Ordering::Equal));
    if parts.len() > MAX_CHECK_PARTS {
        trace!("{} candidate parts, keeping the nearest {}", parts.len(), MAX_CHECK_PARTS);
        parts.truncate(MAX_CHECK_PARTS);
    }
    parts.into_iter().map(|(_, cp)| cp).collect()
}

pub(crate) fn max_thickness<F: Float>(params: &RopeParams<F>) -> F {
    match &params.thickness.table {
        Some(table) => table.iter().fold(params.thickness.value, |m, &t| m.max(t)),
        None => params.thickness.value,
    }
}

fn find_part<F: Float>(parts: &[CheckPart<'_, F>], entity: EntityId, part: usize) -> Option<usize> {
    parts.iter().position(|cp| cp.entity == entity && cp.part == part)
}

/// Point stored contacts at this tick's parts, dropping the ones whose
/// collider is gone or out of range. Returns the number dropped.
pub(crate) fn remap_contacts<F: Float>(
    parts: &[CheckPart<'_, F>],
    points: &mut [ChainPoint<F>],
    vertices: &mut [SubVertex<F>],
) -> usize {
    let mut dropped = 0;
    let contacts = points.iter_mut().map(|p| &mut p.contact).chain(vertices.iter_mut().map(|v| &mut v.contact));
    for slot in contacts {
        let Some(c) = slot.as_ref() else {
            continue;
        };
        match find_part(parts, c.entity, c.part) {
            Some(index) => {
                if let Some(c) = slot.as_mut() {
                    c.check_part = index;
                }
            }
            None => {
                *slot = None;
                dropped += 1;
            }
        }
    }
    dropped
}

/// Push a free end that ended up inside a primitive back out.
pub(crate) fn push_out_free_end<F: Float>(parts: &[CheckPart<'_, F>], point: &mut ChainPoint<F>, thickness: F) {
    for cp in parts.iter().filter(|cp| cp.is_primitive()) {
        if let Some(sc) = cp.unproject_sphere(point.position, F::zero(), F::zero()) {
            if sc.distance < F::zero() {
                point.position = sc.point + sc.normal.scale(thickness * F::from_f32(1.2));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Scene;
    use crate::shapes::{HalfSpace, Sphere};

    #[test]
    fn world_queries_respect_part_pose() {
        let mut scene = Scene::<f64>::new();
        let id = scene.add_static(Pose::from_position(Vec3::new(0.0, 0.0, 2.0)).with_scale(2.0), Sphere::new(1.0));
        let cp = CheckPart::new(&scene, id, 0).unwrap();

        let hit = cp.raycast(Vec3::new(-5.0, 0.0, 2.0), Vec3::new(5.0, 0.0, 2.0)).unwrap();
        assert!(hit.point.distance(Vec3::new(-2.0, 0.0, 2.0)) < 1e-9);

        let sc = cp.unproject_sphere(Vec3::new(0.0, 0.0, 4.5), 0.25, 0.5).unwrap();
        assert!((sc.distance - 0.5).abs() < 1e-9);
    }

    #[test]
    fn gather_skips_anchor_bodies_and_caps_count() {
        let mut scene = Scene::<f64>::new();
        let ground = scene.add_static(Pose::identity(), HalfSpace);
        for i in 0..10 {
            scene.add_body(Pose::from_position(Vec3::new(i as f64 * 0.1, 0.0, 0.5)), 1.0, Sphere::new(0.2));
        }
        let params = RopeParams::<f64>::new();
        let bounds = Aabb::new(Vec3::new(0.0, 0.0, 0.1), Vec3::new(1.0, 0.0, 1.0));
        let anchor = Anchor::new(
            crate::point::AnchorSpec { entity: ground, part: 0, point: Vec3::zero() },
            Pose::identity(),
        );
        let mut scratch = Vec::new();
        let parts = gather(&scene, &bounds, &params, &[Some(anchor), None], &mut scratch);
        assert_eq!(parts.len(), MAX_CHECK_PARTS);
        assert!(parts.iter().all(|p| p.entity != ground), "anchor body must be skipped");
    }

    #[test]
    fn attachment_flags_select_anchor_bodies() {
        let mut scene = Scene::<f64>::new();
        let ground = scene.add_static(Pose::identity(), HalfSpace);
        let bounds = Aabb::new(Vec3::new(0.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 1.0));
        let anchors = [
            Some(Anchor::new(crate::point::AnchorSpec { entity: ground, part: 0, point: Vec3::zero() }, Pose::identity())),
            None,
        ];
        let mut scratch = Vec::new();

        let mut params = RopeParams::<f64>::new()
            .with_collision_mask(CollisionMask::empty())
            .with_flags(RopeFlags::COLLIDES | RopeFlags::COLLIDES_WITH_ATTACHMENT);
        let parts = gather(&scene, &bounds, &params, &anchors, &mut scratch);
        assert_eq!(parts.len(), 1, "attached body collides even outside the mask");
        assert_eq!(parts[0].entity, ground);

        params.flags |= RopeFlags::IGNORE_ATTACHMENTS;
        assert!(gather(&scene, &bounds, &params, &anchors, &mut scratch).is_empty());
    }
}
