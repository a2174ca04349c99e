//! Rope parameters, simulation flags and per-segment overrides.

use crate::error::{RopeError, RopeResult};
use crate::float::Float;
use crate::vec::{Vec as _, Vec3};
use serde::{Deserialize, Serialize};

/// Hard cap on segment count accepted by [`crate::Rope::configure`].
pub const MAX_SEGMENTS: usize = 1000;

bitflags::bitflags! {
    /// Simulation switches.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct RopeFlags: u32 {
        /// Track obstacles with sub-vertices and allow the strained (wrapped) regime.
        const SUBDIVIDE = 1 << 0;
        /// Collide with entities selected by the collision mask.
        const COLLIDES = 1 << 1;
        /// Include terrain in collision queries.
        const COLLIDES_WITH_TERRAIN = 1 << 2;
        /// Skip the velocity solver; only positional constraints run.
        const NO_SOLVER = 1 << 3;
        /// Never detach anchors on overload. Ropes become stretchy instead.
        const NO_TEARS = 1 << 4;
        /// Derive anchor velocity by finite differences of the anchor pose.
        const FINDIFF_ATTACHED_VEL = 1 << 5;
        /// Allow contacts with the bodies the rope is attached to.
        const COLLIDES_WITH_ATTACHMENT = 1 << 6;
        /// Switch the target pose off while the rope touches anything but its first anchor body.
        const NO_STIFFNESS_WHEN_COLLIDING = 1 << 7;
        /// Never collide with the anchor bodies, overriding `COLLIDES_WITH_ATTACHMENT`.
        const IGNORE_ATTACHMENTS = 1 << 8;
        /// Target pose is relative to anchor 0's frame.
        const TARGET_VTX_REL0 = 1 << 9;
        /// Target pose is relative to anchor 1's frame.
        const TARGET_VTX_REL1 = 1 << 10;
    }
}

bitflags::bitflags! {
    /// Entity classes gathered by collision queries.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct CollisionMask: u32 {
        const STATIC = 1 << 0;
        const SLEEPING_RIGID = 1 << 1;
        const RIGID = 1 << 2;
        const LIVING = 1 << 3;
        const TERRAIN = 1 << 4;
        const ROPE = 1 << 5;
    }
}

impl Default for RopeFlags {
    fn default() -> Self {
        RopeFlags::COLLIDES
    }
}

impl Default for CollisionMask {
    fn default() -> Self {
        CollisionMask::STATIC | CollisionMask::SLEEPING_RIGID | CollisionMask::RIGID | CollisionMask::TERRAIN
    }
}

/// How an externally supplied target pose drives the rope.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoseMode {
    /// Target pose is ignored.
    #[default]
    Inactive,
    /// Velocities blend toward the target points; points snap when close.
    Follow,
    /// Bend angles are pulled toward the target pose and joint limits apply.
    Bend,
}

/// A scalar with an optional per-segment override table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerSegment<F: Float> {
    pub value: F,
    pub table: Option<Vec<F>>,
}

impl<F: Float> PerSegment<F> {
    pub fn uniform(value: F) -> Self {
        PerSegment { value, table: None }
    }

    pub fn per_segment(value: F, table: Vec<F>) -> Self {
        PerSegment { value, table: Some(table) }
    }

    /// Value for segment `i`, falling back to the default past the table end.
    pub fn get(&self, i: usize) -> F {
        match &self.table {
            Some(t) => t.get(i).copied().unwrap_or(self.value),
            None => self.value,
        }
    }

    fn check(&self, name: &'static str, segments: usize) -> RopeResult<()> {
        if !self.value.is_finite() || self.value < F::zero() {
            return Err(RopeError::InvalidParameter { name, reason: "must be finite and non-negative" });
        }
        if let Some(t) = &self.table {
            if t.len() != segments {
                return Err(RopeError::PerSegmentLength { name, expected: segments, found: t.len() });
            }
            if t.iter().any(|v| !v.is_finite() || *v < F::zero()) {
                return Err(RopeError::InvalidParameter { name, reason: "table entries must be finite and non-negative" });
            }
        }
        Ok(())
    }
}

/// Physical and numerical parameters of a rope.
///
/// # Builder Pattern
/// ```
/// use hawser::config::{RopeParams, RopeFlags};
/// use hawser::vec::Vec3;
///
/// let params: RopeParams<f32> = RopeParams::new()
///     .with_length(5.0)
///     .with_mass(2.0)
///     .with_gravity(Vec3::new(0.0, 0.0, -9.81))
///     .with_flags(RopeFlags::COLLIDES | RopeFlags::SUBDIVIDE);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RopeParams<F: Float> {
    /// Rest length of the whole rope. Zero means "take it from the initial points".
    pub length: F,
    /// Total mass.
    pub mass: F,
    /// Collision distance (rope radius).
    pub thickness: PerSegment<F>,
    /// Coulomb friction against colliders in slack mode.
    pub friction: F,
    /// Friction used for wrapped spans in strained mode.
    pub friction_pull: F,
    /// Velocity damping per second.
    pub damping: PerSegment<F>,
    /// Elastic stretch stiffness for subdivided ropes. Zero is inextensible.
    pub stiffness: PerSegment<F>,
    pub gravity: Vec3<F>,
    pub wind: Vec3<F>,
    /// Amplitude of random wind gusts, as a fraction of `wind`.
    pub wind_variance: F,
    pub air_resistance: F,
    pub water_resistance: F,
    /// Rope material density, for buoyancy.
    pub density: F,
    /// Largest sub-step the integrator accepts.
    pub max_allowed_step: F,
    /// Relaxation solver iteration cap.
    pub max_iterations: usize,
    /// Per-point kinetic energy below which the rope may sleep.
    pub min_energy: F,
    /// Tension that tears an anchor off. Zero disables tearing.
    pub max_force: F,
    /// Gain turning slack-path overshoot into a corrective velocity for the rigid solver.
    pub penalty_scale: F,
    /// Upper bound on rotational unprojection per tick (radians).
    pub unprojection_limit: F,
    /// Fraction of the end segments ignored by ray queries.
    pub no_collision_distance: F,
    /// Sub-vertices allowed per coarse segment.
    pub max_sub_vertices: usize,
    /// Sub-segments shorter than this are merged away.
    pub min_segment_length: F,
    /// Extra margin on the collision query box.
    pub sensor_size: F,
    /// Max deviation from the target bend angle (radians). Zero disables.
    pub joint_limit: F,
    /// Fraction of the joint limit lost from the anchored end to the far end.
    pub joint_limit_decay: F,
    /// Constrain every segment to the plane with this normal.
    pub hinge_axis: Option<Vec3<F>>,
    /// Target-pose velocity stiffness at the anchored end.
    pub stiffness_anim: F,
    /// Fraction of `stiffness_anim` lost along the chain.
    pub stiffness_decay_anim: F,
    pub pose_mode: PoseMode,
    /// Impulse-driven velocity cap.
    pub max_velocity: F,
    pub flags: RopeFlags,
    pub collision_mask: CollisionMask,
}

impl<F: Float> RopeParams<F> {
    /// Create parameters with default values.
    pub fn new() -> Self {
        RopeParams {
            length: F::zero(),
            mass: F::one(),
            thickness: PerSegment::uniform(F::from_f32(0.01)),
            friction: F::from_f32(0.2),
            friction_pull: F::from_f32(0.2),
            damping: PerSegment::uniform(F::from_f32(0.2)),
            stiffness: PerSegment::uniform(F::from_f32(10.0)),
            gravity: Vec3::new(F::zero(), F::zero(), F::from_f32(-9.81)),
            wind: Vec3::zero(),
            wind_variance: F::zero(),
            air_resistance: F::zero(),
            water_resistance: F::from_f32(5.0),
            density: F::from_f32(500.0),
            max_allowed_step: F::from_f32(0.05),
            max_iterations: 650,
            min_energy: F::from_f32(0.04 * 0.04),
            max_force: F::zero(),
            penalty_scale: F::from_f32(5.0),
            unprojection_limit: F::from_f32(0.5),
            no_collision_distance: F::from_f32(0.5),
            max_sub_vertices: 3,
            min_segment_length: F::zero(),
            sensor_size: F::from_f32(0.05),
            joint_limit: F::zero(),
            joint_limit_decay: F::zero(),
            hinge_axis: None,
            stiffness_anim: F::from_f32(70.0),
            stiffness_decay_anim: F::from_f32(0.75),
            pose_mode: PoseMode::Inactive,
            max_velocity: F::from_f32(100.0),
            flags: RopeFlags::default(),
            collision_mask: CollisionMask::default(),
        }
    }

    pub fn with_length(mut self, length: F) -> Self {
        self.length = length;
        self
    }

    pub fn with_mass(mut self, mass: F) -> Self {
        self.mass = mass;
        self
    }

    pub fn with_thickness(mut self, thickness: F) -> Self {
        self.thickness = PerSegment::uniform(thickness);
        self
    }

    pub fn with_friction(mut self, friction: F) -> Self {
        self.friction = friction;
        self
    }

    pub fn with_friction_pull(mut self, friction: F) -> Self {
        self.friction_pull = friction;
        self
    }

    pub fn with_damping(mut self, damping: F) -> Self {
        self.damping = PerSegment::uniform(damping);
        self
    }

    pub fn with_stiffness(mut self, stiffness: F) -> Self {
        self.stiffness = PerSegment::uniform(stiffness);
        self
    }

    pub fn with_gravity(mut self, gravity: Vec3<F>) -> Self {
        self.gravity = gravity;
        self
    }

    pub fn with_wind(mut self, wind: Vec3<F>, variance: F) -> Self {
        self.wind = wind;
        self.wind_variance = variance;
        self
    }

    pub fn with_air_resistance(mut self, resistance: F) -> Self {
        self.air_resistance = resistance;
        self
    }

    pub fn with_water_resistance(mut self, resistance: F) -> Self {
        self.water_resistance = resistance;
        self
    }

    pub fn with_max_force(mut self, max_force: F) -> Self {
        self.max_force = max_force;
        self
    }

    pub fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations.max(1);
        self
    }

    pub fn with_max_allowed_step(mut self, step: F) -> Self {
        self.max_allowed_step = step;
        self
    }

    pub fn with_joint_limit(mut self, limit: F, decay: F) -> Self {
        self.joint_limit = limit;
        self.joint_limit_decay = decay;
        self
    }

    pub fn with_hinge_axis(mut self, axis: Vec3<F>) -> Self {
        self.hinge_axis = Some(axis.normalize());
        self
    }

    pub fn with_pose_mode(mut self, mode: PoseMode) -> Self {
        self.pose_mode = mode;
        self
    }

    pub fn with_sub_vertices(mut self, max_per_segment: usize) -> Self {
        self.max_sub_vertices = max_per_segment;
        self
    }

    pub fn with_flags(mut self, flags: RopeFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_collision_mask(mut self, mask: CollisionMask) -> Self {
        self.collision_mask = mask;
        self
    }

    /// Check ranges. `segments` sizes the per-segment tables; pass 0 to skip that check.
    pub fn validate(&self, segments: usize) -> RopeResult<()> {
        let positive = [
            ("mass", self.mass),
            ("max_allowed_step", self.max_allowed_step),
            ("density", self.density),
        ];
        for (name, v) in positive {
            if !v.is_finite() || v <= F::zero() {
                return Err(RopeError::InvalidParameter { name, reason: "must be finite and positive" });
            }
        }
        let non_negative = [
            ("length", self.length),
            ("friction", self.friction),
            ("friction_pull", self.friction_pull),
            ("air_resistance", self.air_resistance),
            ("water_resistance", self.water_resistance),
            ("max_force", self.max_force),
            ("penalty_scale", self.penalty_scale),
            ("min_energy", self.min_energy),
            ("joint_limit", self.joint_limit),
            ("unprojection_limit", self.unprojection_limit),
            ("min_segment_length", self.min_segment_length),
            ("max_velocity", self.max_velocity),
        ];
        for (name, v) in non_negative {
            if !v.is_finite() || v < F::zero() {
                return Err(RopeError::InvalidParameter { name, reason: "must be finite and non-negative" });
            }
        }
        if !self.gravity.is_finite() || !self.wind.is_finite() {
            return Err(RopeError::InvalidParameter { name: "gravity/wind", reason: "must be finite" });
        }
        if segments > 0 {
            self.thickness.check("thickness", segments)?;
            self.damping.check("damping", segments)?;
            self.stiffness.check("stiffness", segments)?;
        }
        Ok(())
    }
}

impl<F: Float> Default for RopeParams<F> {
    fn default() -> Self {
        Self::new()
    }
}
