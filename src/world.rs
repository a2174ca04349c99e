//! What a rope needs to know about the world around it.
//!
//! The host engine implements [`PhysicalWorld`]; [`crate::scene::Scene`] is a
//! small in-crate implementation for tests and tools.

use crate::aabb::Aabb;
use crate::config::CollisionMask;
use crate::float::Float;
use crate::geometry::Geometry;
use crate::quat::{Pose, Quat};
use crate::vec::{Vec as _, Vec3};
use core::fmt;
use thunderdome as td;

/// Generational handle to a world entity.
///
/// A handle whose slot has been reused no longer resolves, so stale anchors
/// and contacts are detected instead of silently following a new entity.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct EntityId(pub(crate) td::Index);

impl EntityId {
    pub fn to_bits(self) -> u64 {
        self.0.to_bits()
    }

    pub fn from_bits(bits: u64) -> Option<Self> {
        td::Index::from_bits(bits).map(EntityId)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity#{}", self.0.slot())
    }
}

/// Kinematic state of one entity part.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BodyState<F: Float> {
    /// Center of mass in world space.
    pub center_of_mass: Vec3<F>,
    pub velocity: Vec3<F>,
    pub angular_velocity: Vec3<F>,
    /// Zero for static or kinematic entities.
    pub mass: F,
    /// Principal moments in the body frame.
    pub inertia: Vec3<F>,
    pub orientation: Quat<F>,
}

impl<F: Float> BodyState<F> {
    pub fn at_rest(center_of_mass: Vec3<F>) -> Self {
        BodyState {
            center_of_mass,
            velocity: Vec3::zero(),
            angular_velocity: Vec3::zero(),
            mass: F::zero(),
            inertia: Vec3::zero(),
            orientation: Quat::identity(),
        }
    }

    /// Velocity of a world point rigidly attached to the body.
    pub fn point_velocity(&self, point: Vec3<F>) -> Vec3<F> {
        self.velocity + self.angular_velocity.cross(point - self.center_of_mass)
    }

    pub fn inv_mass(&self) -> F {
        if self.mass > F::zero() {
            F::one() / self.mass
        } else {
            F::zero()
        }
    }

    /// World inverse inertia applied to `torque`.
    pub fn apply_inv_inertia(&self, torque: Vec3<F>) -> Vec3<F> {
        if self.mass <= F::zero() {
            return Vec3::zero();
        }
        let inv = |i: F| if i > F::zero() { F::one() / i } else { F::zero() };
        let local = self.orientation.conjugate().rotate(torque);
        let scaled = Vec3::new(local.x * inv(self.inertia.x), local.y * inv(self.inertia.y), local.z * inv(self.inertia.z));
        self.orientation.rotate(scaled)
    }
}

/// A water region: the half-space below a plane, with flow.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct WaterVolume<F: Float> {
    /// A point on the surface plane.
    pub origin: Vec3<F>,
    /// Surface normal, pointing out of the water.
    pub normal: Vec3<F>,
    pub flow: Vec3<F>,
    pub density: F,
}

impl<F: Float> WaterVolume<F> {
    /// Depth of `p` below the surface; non-positive when above it.
    pub fn depth(&self, p: Vec3<F>) -> F {
        (self.origin - p).dot(self.normal)
    }
}

/// Broad-phase region query.
pub trait SpatialIndex<F: Float> {
    /// Append every entity whose class is in `mask` and whose world bounds
    /// overlap `region`.
    fn query_region(&self, region: &Aabb<F>, mask: CollisionMask, out: &mut Vec<EntityId>);
}

/// Read access to entities, their parts and their motion.
pub trait PhysicalWorld<F: Float>: SpatialIndex<F> {
    /// Part count, or `None` if the entity no longer exists.
    fn part_count(&self, entity: EntityId) -> Option<usize>;

    /// World pose of a part.
    fn part_pose(&self, entity: EntityId, part: usize) -> Option<Pose<F>>;

    fn body_state(&self, entity: EntityId, part: usize) -> Option<BodyState<F>>;

    fn part_geometry(&self, entity: EntityId, part: usize) -> Option<&dyn Geometry<F>>;

    /// Water volumes overlapping `region`.
    fn water_volumes(&self, _region: &Aabb<F>) -> Vec<WaterVolume<F>> {
        Vec::new()
    }

    fn contains(&self, entity: EntityId) -> bool {
        self.part_count(entity).is_some()
    }
}
