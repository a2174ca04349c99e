//! A small in-memory world.
//!
//! Enough of [`PhysicalWorld`] for tests, tools and benchmarks: static and
//! kinematic entities made of posed geometry parts, plus water volumes.
//! Bodies move only when [`Scene::advance`] integrates their velocities.

use crate::aabb::Aabb;
use crate::config::CollisionMask;
use crate::float::Float;
use crate::geometry::Geometry;
use crate::quat::{Pose, Quat};
use crate::vec::{Vec as _, Vec3};
use crate::world::{BodyState, EntityId, PhysicalWorld, SpatialIndex, WaterVolume};
use thunderdome::Arena;

struct ScenePart<F: Float> {
    /// Relative to the entity pose.
    offset: Pose<F>,
    geometry: Box<dyn Geometry<F>>,
}

struct SceneEntity<F: Float> {
    class: CollisionMask,
    pose: Pose<F>,
    velocity: Vec3<F>,
    angular_velocity: Vec3<F>,
    mass: F,
    parts: Vec<ScenePart<F>>,
}

impl<F: Float> SceneEntity<F> {
    fn part_pose(&self, part: usize) -> Option<Pose<F>> {
        self.parts.get(part).map(|p| self.pose.compose(&p.offset))
    }

    fn bounds(&self) -> Option<Aabb<F>> {
        let mut out: Option<Aabb<F>> = None;
        for p in &self.parts {
            let b = p.geometry.local_bounds().transformed(&self.pose.compose(&p.offset));
            out = Some(match out {
                Some(acc) => Aabb::new(acc.min.min(b.min), acc.max.max(b.max)),
                None => b,
            });
        }
        out
    }
}

/// Entities in a generational arena; see the module docs.
pub struct Scene<F: Float> {
    entities: Arena<SceneEntity<F>>,
    water: Vec<WaterVolume<F>>,
}

impl<F: Float> Default for Scene<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Float> Scene<F> {
    pub fn new() -> Self {
        Scene { entities: Arena::new(), water: Vec::new() }
    }

    /// Immovable single-part entity.
    pub fn add_static<G: Geometry<F> + 'static>(&mut self, pose: Pose<F>, geometry: G) -> EntityId {
        self.insert(CollisionMask::STATIC, pose, F::zero(), geometry)
    }

    /// Single-part rigid body. Its motion is driven through
    /// [`Scene::set_velocity`] and [`Scene::advance`].
    pub fn add_body<G: Geometry<F> + 'static>(&mut self, pose: Pose<F>, mass: F, geometry: G) -> EntityId {
        self.insert(CollisionMask::RIGID, pose, mass, geometry)
    }

    fn insert<G: Geometry<F> + 'static>(
        &mut self,
        class: CollisionMask,
        pose: Pose<F>,
        mass: F,
        geometry: G,
    ) -> EntityId {
        let entity = SceneEntity {
            class,
            pose,
            velocity: Vec3::zero(),
            angular_velocity: Vec3::zero(),
            mass,
            parts: vec![ScenePart { offset: Pose::identity(), geometry: Box::new(geometry) }],
        };
        EntityId(self.entities.insert(entity))
    }

    /// Add another part to an entity. Returns the part index.
    pub fn add_part<G: Geometry<F> + 'static>(&mut self, id: EntityId, offset: Pose<F>, geometry: G) -> Option<usize> {
        let e = self.entities.get_mut(id.0)?;
        e.parts.push(ScenePart { offset, geometry: Box::new(geometry) });
        Some(e.parts.len() - 1)
    }

    pub fn remove(&mut self, id: EntityId) -> bool {
        self.entities.remove(id.0).is_some()
    }

    pub fn pose(&self, id: EntityId) -> Option<Pose<F>> {
        self.entities.get(id.0).map(|e| e.pose)
    }

    pub fn set_pose(&mut self, id: EntityId, pose: Pose<F>) -> bool {
        match self.entities.get_mut(id.0) {
            Some(e) => {
                e.pose = pose;
                true
            }
            None => false,
        }
    }

    pub fn set_velocity(&mut self, id: EntityId, velocity: Vec3<F>, angular_velocity: Vec3<F>) -> bool {
        match self.entities.get_mut(id.0) {
            Some(e) => {
                e.velocity = velocity;
                e.angular_velocity = angular_velocity;
                true
            }
            None => false,
        }
    }

    pub fn set_class(&mut self, id: EntityId, class: CollisionMask) -> bool {
        match self.entities.get_mut(id.0) {
            Some(e) => {
                e.class = class;
                true
            }
            None => false,
        }
    }

    pub fn add_water(&mut self, volume: WaterVolume<F>) {
        self.water.push(volume);
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Move every entity by its velocities over `dt`.
    pub fn advance(&mut self, dt: F) {
        for (_, e) in self.entities.iter_mut() {
            e.pose.position += e.velocity.scale(dt);
            let w = e.angular_velocity.length();
            if w > F::zero() {
                let dq = Quat::from_axis_angle(e.angular_velocity, w * dt);
                e.pose.rotation = (dq * e.pose.rotation).normalize();
            }
        }
    }
}

impl<F: Float> SpatialIndex<F> for Scene<F> {
    fn query_region(&self, region: &Aabb<F>, mask: CollisionMask, out: &mut Vec<EntityId>) {
        for (index, e) in self.entities.iter() {
            if !mask.intersects(e.class) {
                continue;
            }
            if e.bounds().map_or(false, |b| b.overlaps(region)) {
                out.push(EntityId(index));
            }
        }
    }
}

impl<F: Float> PhysicalWorld<F> for Scene<F> {
    fn part_count(&self, entity: EntityId) -> Option<usize> {
        self.entities.get(entity.0).map(|e| e.parts.len())
    }

    fn part_pose(&self, entity: EntityId, part: usize) -> Option<Pose<F>> {
        self.entities.get(entity.0)?.part_pose(part)
    }

    fn body_state(&self, entity: EntityId, part: usize) -> Option<BodyState<F>> {
        let e = self.entities.get(entity.0)?;
        e.parts.get(part)?;
        // Unit-radius sphere inertia is close enough for a kinematic scene.
        let i = e.mass * F::from_f32(0.4);
        Some(BodyState {
            center_of_mass: e.pose.position,
            velocity: e.velocity,
            angular_velocity: e.angular_velocity,
            mass: e.mass,
            inertia: Vec3::splat(i),
            orientation: e.pose.rotation,
        })
    }

    fn part_geometry(&self, entity: EntityId, part: usize) -> Option<&dyn Geometry<F>> {
        self.entities.get(entity.0)?.parts.get(part).map(|p| p.geometry.as_ref())
    }

    fn water_volumes(&self, region: &Aabb<F>) -> Vec<WaterVolume<F>> {
        self.water
            .iter()
            .filter(|w| w.depth(region.min) > F::zero() || w.depth(region.max) > F::zero())
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shapes::{HalfSpace, Sphere};

    #[test]
    fn removed_entity_no_longer_resolves() {
        let mut scene = Scene::<f32>::new();
        let a = scene.add_static(Pose::identity(), HalfSpace);
        assert!(scene.contains(a));
        assert!(scene.remove(a));
        assert!(scene.part_count(a).is_none());

        // Slot reuse must not revive the old handle.
        let b = scene.add_static(Pose::identity(), HalfSpace);
        assert_ne!(a, b);
        assert!(scene.part_pose(a, 0).is_none());
    }

    #[test]
    fn query_respects_mask_and_bounds() {
        let mut scene = Scene::<f64>::new();
        let ball = scene.add_body(Pose::from_position(Vec3::new(5.0, 0.0, 0.0)), 1.0, Sphere::new(1.0));
        let ground = scene.add_static(Pose::identity(), HalfSpace);

        let mut hits = Vec::new();
        let near_ball = Aabb::from_center_half_extents(Vec3::new(5.0, 0.0, 2.0), Vec3::splat(0.5));
        scene.query_region(&near_ball, CollisionMask::RIGID, &mut hits);
        assert!(hits.is_empty(), "region is above the ball");

        let touching = Aabb::from_center_half_extents(Vec3::new(5.0, 0.0, 0.4), Vec3::splat(0.5));
        scene.query_region(&touching, CollisionMask::RIGID | CollisionMask::STATIC, &mut hits);
        assert_eq!(hits, vec![ball, ground]);
    }

    #[test]
    fn advance_moves_bodies() {
        let mut scene = Scene::<f64>::new();
        let id = scene.add_body(Pose::identity(), 2.0, Sphere::new(0.5));
        scene.set_velocity(id, Vec3::new(1.0, 0.0, 0.0), Vec3::zero());
        scene.advance(0.5);
        assert!(scene.pose(id).unwrap().position.distance(Vec3::new(0.5, 0.0, 0.0)) < 1e-12);
    }
}
