//! The rope itself: configuration, anchors, the step pipeline and the
//! status surface.

use crate::aabb::Aabb;
use crate::check_part::{effective_mask, gather, max_thickness, push_out_free_end, remap_contacts};
use crate::config::{PoseMode, RopeFlags, RopeParams, MAX_SEGMENTS};
use crate::coupling::{JointBroken, RigidSolver, RopeContact, TensionSolver};
use crate::error::{RopeError, RopeResult};
use crate::float::Float;
use crate::integrate::Gust;
use crate::observer::{RopeObserver, StepReport};
use crate::point::{Anchor, AnchorSpec, ChainPoint, RopeEnd, SubVertex, SubVertexBuffer};
use crate::quat::Pose;
use crate::snapshot::RopeSnapshot;
use crate::solver::{kinetic_energy, SolveStats};
use crate::strain::{refresh_vertex_dirs, vertex_from, STRAIN_ENTER, STRAIN_EXIT};
use crate::constraint::refresh_dirs;
use crate::vec::{Vec as _, Vec3};
use crate::world::{BodyState, EntityId, PhysicalWorld};
use log::{debug, warn};
use parking_lot::{Mutex, RwLock};

/// Consecutive low-energy sub-steps before a rope falls asleep.
const SLEEP_FRAMES: u32 = 4;
/// Seed for the wind gust generator.
const GUST_SEED: u64 = 0x9e37_79b9_7f4a_7c15;

/// Initial placement of the chain points.
#[derive(Clone, Debug, PartialEq)]
pub enum Placement<F: Float> {
    /// Exactly `segments + 1` world positions.
    Points(Vec<Vec3<F>>),
    /// A straight line between the anchors, or hanging along gravity from
    /// the only anchor.
    BetweenAnchors,
}

/// An external impulse on the chain.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum RopeImpulse<F: Float> {
    /// On one chain point.
    Point { index: usize, impulse: Vec3<F> },
    /// On a segment, split between its points at fraction `t`.
    Segment { segment: usize, t: F, impulse: Vec3<F> },
    /// At a world position on or near the rope.
    Position { position: Vec3<F>, impulse: Vec3<F> },
}

/// Read-only summary of the rope.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RopeStatus<F: Float> {
    pub segments: usize,
    pub length: F,
    pub strained: bool,
    pub awake: bool,
    pub anchored: [bool; 2],
    /// Segments (or sub-vertices, when subdivided) in contact.
    pub contacts: usize,
    pub sub_vertices: usize,
    pub energy: F,
    pub bounds: Aabb<F>,
    pub host_pose: Pose<F>,
}

/// Coarse chain state, guarded by the rope's main lock.
#[derive(Clone, Debug)]
pub(crate) struct RopeState<F: Float> {
    pub(crate) params: RopeParams<F>,
    pub(crate) points: Vec<ChainPoint<F>>,
    pub(crate) anchors: [Option<Anchor<F>>; 2],
    /// Anchor body state seen this tick.
    pub(crate) anchor_bodies: [Option<BodyState<F>>; 2],
    /// Target pose, in the frame selected by the `TARGET_VTX_REL*` flags.
    pub(crate) targets: Vec<Vec3<F>>,
    pub(crate) gust: Gust<F>,
    pub(crate) strained: bool,
    pub(crate) has_contacts: bool,
    /// Straight spans of the strained path last tick.
    pub(crate) islands: usize,
    pub(crate) awake: bool,
    pub(crate) slow_frames: u32,
    tick_full: F,
    tick_done: F,
    host_pose: Pose<F>,
    bounds: Aabb<F>,
    energy: F,
    contact_count: usize,
    spans: Vec<RopeContact<F>>,
    scratch: Vec<EntityId>,
}

impl<F: Float> RopeState<F> {
    pub(crate) fn new(params: RopeParams<F>) -> Self {
        RopeState {
            params,
            points: Vec::new(),
            anchors: [None, None],
            anchor_bodies: [None, None],
            targets: Vec::new(),
            gust: Gust::new(GUST_SEED),
            strained: false,
            has_contacts: false,
            islands: 0,
            awake: true,
            slow_frames: 0,
            tick_full: F::zero(),
            tick_done: F::zero(),
            host_pose: Pose::identity(),
            bounds: Aabb::default(),
            energy: F::zero(),
            contact_count: 0,
            spans: Vec::new(),
            scratch: Vec::new(),
        }
    }

    pub(crate) fn segment_count(&self) -> usize {
        self.points.len().saturating_sub(1)
    }

    pub(crate) fn segment_length(&self) -> F {
        match self.segment_count() {
            0 => F::zero(),
            n => self.params.length / F::from_f32(n as f32),
        }
    }

    pub(crate) fn wake(&mut self) {
        self.awake = true;
        self.slow_frames = 0;
    }

    fn anchor_index(&self, end: RopeEnd) -> usize {
        end.index() * self.segment_count()
    }

    /// Whether an anchor's part moved since the last step, for waking a
    /// sleeping rope.
    fn anchors_moved<W: PhysicalWorld<F> + ?Sized>(&self, world: &W) -> bool {
        self.anchors.iter().flatten().any(|a| match world.part_pose(a.entity, a.part) {
            Some(pose) => pose != a.last_pose,
            None => true,
        })
    }

    fn refresh_bounds(&mut self) {
        let Some(b) = Aabb::from_points(self.points.iter().map(|p| p.position)) else {
            return;
        };
        let e = b.half_extents();
        let margin = e.x.max(e.y).max(e.z) * F::from_f32(0.02) + max_thickness(&self.params) * F::two();
        self.bounds = b.expanded(margin);
    }

    /// Move fine vertices with their velocities. A strained rope's coarse
    /// points ride on their fine vertices.
    fn integrate_sub_vertices(&mut self, vertices: &mut SubVertexBuffer<F>, dt: F) {
        let n = self.segment_count();
        let fine = vertices.current_mut();
        let m = fine.len();
        if !self.params.flags.contains(RopeFlags::SUBDIVIDE) || m < 2 {
            return;
        }
        let held = [self.anchors[0].is_some(), self.anchors[1].is_some()];
        for (i, v) in fine.iter_mut().enumerate() {
            if (i == 0 && held[0]) || (i == m - 1 && held[1]) {
                continue;
            }
            v.position += v.velocity.scale(dt);
        }
        if held[0] {
            fine[0].position = self.points[0].position;
        }
        if held[1] {
            fine[m - 1].position = self.points[n].position;
        }
        if self.strained && self.params.length > F::zero() {
            for p in self.points.iter_mut() {
                if let Some(v) = fine.get(p.first_vertex) {
                    p.position = v.position;
                }
            }
        }
    }

    /// A plain two-anchor rope pulled (nearly) straight is laid on the
    /// anchor line. Returns whether it was.
    fn straighten(&mut self) -> bool {
        let n = self.segment_count();
        let length = self.params.length;
        if self.params.flags.contains(RopeFlags::SUBDIVIDE) {
            return false;
        }
        if self.anchors[0].is_none() || self.anchors[1].is_none() || length <= F::zero() {
            self.strained = false;
            return false;
        }
        let a = self.points[0].position;
        let b = self.points[n].position;
        let d = a.distance(b);
        let threshold = if self.strained { STRAIN_EXIT } else { STRAIN_ENTER };
        if d < length * F::from_f32(threshold) {
            self.strained = false;
            return false;
        }
        self.strained = true;
        let dir = (b - a).normalize_or(self.points[0].dir);
        let step = d / F::from_f32(n as f32);
        let inv = F::one() / F::from_f32((n + 1) as f32);
        let (v0, v1) = (self.points[0].velocity, self.points[n].velocity);
        for (i, p) in self.points.iter_mut().enumerate() {
            if i > 0 && i < n {
                p.position = a + dir.scale(step * F::from_f32(i as f32));
                p.velocity = v0.scale(F::from_f32((n + 1 - i) as f32) * inv) + v1.scale(F::from_f32(i as f32) * inv);
            }
            p.dir = dir;
            p.contact = None;
        }
        self.has_contacts = false;
        true
    }

    /// Drop contacts whose collider or part no longer exists.
    fn drop_stale_contacts<W: PhysicalWorld<F> + ?Sized>(&mut self, world: &W, vertices: &mut [SubVertex<F>]) {
        let slots = self.points.iter_mut().map(|p| &mut p.contact).chain(vertices.iter_mut().map(|v| &mut v.contact));
        for slot in slots {
            let stale = slot
                .as_ref()
                .map_or(false, |c| world.part_count(c.entity).map_or(true, |count| c.part >= count));
            if stale {
                if let Some(c) = slot.take() {
                    warn!("dropping contact with {} part {}: collider is gone", c.entity, c.part);
                }
            }
        }
    }

    fn start_step(&mut self, dt: F) {
        // A non-finite tick is empty, so `advance` returns at once.
        let dt = if dt.is_finite() {
            dt
        } else {
            warn!("ignoring non-finite rope tick {}", dt);
            F::zero()
        };
        self.tick_full = dt;
        self.tick_done = F::zero();
    }

    fn max_time_step(&self, dt: F) -> F {
        if self.tick_done > self.tick_full - F::from_f32(0.001) {
            return dt;
        }
        (self.tick_full - self.tick_done).min(self.params.max_allowed_step).min(dt)
    }

    fn tick_complete(&self) -> bool {
        self.tick_done >= self.tick_full - F::from_f32(0.001)
    }

    /// One sub-step. Returns whether the armed tick is complete.
    fn step<W, O>(
        &mut self,
        vertices: &mut SubVertexBuffer<F>,
        rigid: &mut dyn RigidSolver<F>,
        dt: F,
        world: &W,
        observer: &mut O,
    ) -> bool
    where
        W: PhysicalWorld<F> + ?Sized,
        O: RopeObserver<F>,
    {
        let n = self.segment_count();
        if n == 0 || !dt.is_finite() || dt <= F::zero() || self.tick_complete() {
            return true;
        }
        if !self.awake {
            if !self.anchors_moved(world) {
                return true;
            }
            debug!("anchor moved, waking rope");
            self.wake();
        }
        let dt = dt.min(self.tick_full - self.tick_done);
        self.tick_done = self.tick_done + dt;
        let subdivide = self.params.flags.contains(RopeFlags::SUBDIVIDE);
        let was_strained = self.strained;

        self.drop_stale_contacts(world, vertices.current_mut());
        let anchors_moved = self.update_anchors(world, dt);
        self.update_targets(world);
        let water = world.water_volumes(&self.bounds);
        self.integrate_free_points(dt, &water);
        self.integrate_sub_vertices(vertices, dt);
        observer.on_integrate();

        let straight = self.straighten();
        let mut contacts = 0;
        let mut solved = None;
        self.spans.clear();

        if straight {
            self.refresh_bounds();
            let mut ends = [vertex_from(&self.points[0]), vertex_from(&self.points[n])];
            ends[1].dir = ends[0].dir;
            self.spans = self.register_contacts(&ends, &[], dt);
        } else {
            self.enforce_constraints(vertices, dt);
            if self.params.pose_mode != PoseMode::Inactive {
                self.apply_pose_stiffness(dt);
            }
            observer.on_constraints_enforced();
            self.apply_damping(dt);
            self.refresh_bounds();

            let attached = self.params.flags.contains(RopeFlags::COLLIDES_WITH_ATTACHMENT);
            if !effective_mask(&self.params).is_empty() || attached {
                let mut scratch = core::mem::take(&mut self.scratch);
                let parts = gather(world, &self.bounds, &self.params, &self.anchors, &mut scratch);
                self.scratch = scratch;
                remap_contacts(&parts, &mut self.points, vertices.current_mut());

                let free_end = match self.anchors {
                    [_, None] => Some(n),
                    [None, Some(_)] => Some(0),
                    _ => None,
                };
                if let Some(i) = free_end {
                    let thickness = self.params.thickness.get(i.min(n - 1));
                    push_out_free_end(&parts, &mut self.points[i], thickness);
                }

                // Walk collisions from the heavier (or only) anchor.
                let forward = match self.anchor_bodies {
                    [Some(a), Some(b)] if self.anchors[0].is_some() && self.anchors[1].is_some() => {
                        b.inv_mass() >= a.inv_mass()
                    }
                    _ => !(self.anchors[1].is_some() && self.anchors[0].is_none()),
                };
                if !subdivide {
                    contacts = self.check_collisions(&parts, forward);
                } else {
                    self.step_subdivided(vertices, &parts);
                    contacts = vertices.current().iter().filter(|v| v.contact.is_some()).count();
                    if self.strained {
                        self.spans = self.register_contacts(vertices.current(), &parts, dt);
                    }
                }
            } else {
                for p in self.points.iter_mut() {
                    p.contact = None;
                }
                self.has_contacts = false;
            }
            observer.on_contacts_updated(contacts);
        }

        if !self.spans.is_empty() {
            rigid.resolve(&mut self.spans, dt);
        }
        if subdivide && self.strained {
            self.propagate_strained_velocities(vertices.current_mut());
        }
        if !straight && !self.params.flags.contains(RopeFlags::NO_SOLVER) {
            solved = Some(self.solve_velocities(vertices, dt));
        }
        let spans = core::mem::take(&mut self.spans);
        if let Some(event) = self.check_tearing(&spans, dt) {
            observer.on_joint_broken(&event);
        }
        self.spans = spans;
        if was_strained != self.strained {
            observer.on_strain_changed(self.strained);
        }

        let stats = solved.unwrap_or_else(|| SolveStats { energy: kinetic_energy(&self.points), ..SolveStats::default() });
        observer.on_solver_finished(stats.iterations, stats.clamped);
        self.energy = stats.energy;
        self.contact_count = contacts;
        self.update_sleep(anchors_moved);

        for p in self.points.iter_mut() {
            p.previous = p.position;
        }
        self.host_pose = match &self.anchors[0] {
            Some(a) => a.last_pose,
            None => Pose::from_position(self.points[0].position),
        };

        let report = StepReport {
            dt,
            iterations: stats.iterations,
            clamped: stats.clamped,
            energy: stats.energy,
            contacts,
            strained: self.strained,
            awake: self.awake,
            bounds: self.bounds,
        };
        observer.on_step_complete(&report);
        self.tick_complete()
    }

    /// Count slow sub-steps and fall asleep after enough of them.
    fn update_sleep(&mut self, anchors_moved: bool) {
        let n = self.segment_count();
        let slow = self.energy < self.params.min_energy * F::from_f32((n + 1) as f32);
        self.slow_frames = if slow { self.slow_frames + 1 } else { 0 };
        let animated = self.params.pose_mode == PoseMode::Follow && !self.targets.is_empty();
        let awake = self.slow_frames < SLEEP_FRAMES || animated || anchors_moved;
        if !awake && self.awake {
            debug!("rope fell asleep, energy {:.6}", self.energy);
            let held = [self.anchors[0].is_some(), self.anchors[1].is_some()];
            for (i, p) in self.points.iter_mut().enumerate() {
                if !((i == 0 && held[0]) || (i == n && held[1])) {
                    p.velocity = Vec3::zero();
                }
            }
        }
        self.awake = awake;
    }

    /// Queue an impulse. Returns `false` when a world position is too far
    /// from the rope to hit it.
    fn apply_impulse(&mut self, impulse: RopeImpulse<F>) -> RopeResult<bool> {
        let n = self.segment_count();
        if n == 0 {
            return Err(RopeError::NotConfigured);
        }
        let (i, t, j) = match impulse {
            RopeImpulse::Point { index, impulse } => (index, F::zero(), impulse),
            RopeImpulse::Segment { segment, .. } if segment >= n => {
                return Err(RopeError::IndexOutOfBounds { index: segment, count: n });
            }
            RopeImpulse::Segment { segment, t, impulse } => (segment, t, impulse),
            RopeImpulse::Position { position, impulse } => {
                let (i, _) = self.points.iter().enumerate().fold((0, F::zero()), |(best, d), (k, p)| {
                    let dk = p.position.distance_sq(position);
                    if k == 0 || dk < d {
                        (k, dk)
                    } else {
                        (best, d)
                    }
                });
                let thickness = self.params.thickness.get(i.min(n - 1));
                let p = self.points[i].position;
                let near = p.distance_sq(position) <= (thickness * F::from_f32(3.0)).sq();
                let on_segment = i > 0 && {
                    let seg = p - self.points[i - 1].position;
                    seg.cross(position - self.points[i - 1].position).length_sq() <= thickness.sq() * seg.length_sq()
                };
                if !near && !on_segment {
                    return Ok(false);
                }
                let t = if i < n {
                    (position - p).dot((self.points[i + 1].position - p).normalize())
                } else {
                    F::zero()
                };
                (i, t, impulse)
            }
        };
        if i > n {
            return Err(RopeError::IndexOutOfBounds { index: i, count: n + 1 });
        }
        let t = t.clamp(F::zero(), F::one());
        let mut dv = j.scale(F::from_f32((n + 1) as f32) / self.params.mass);
        let max_v = self.params.max_velocity;
        if dv.length_sq() > max_v.sq() {
            dv = dv.normalize().scale(max_v);
        }
        self.points[i].pending_velocity += dv.scale(F::one() - t);
        if i < n {
            self.points[i + 1].pending_velocity += dv.scale(t);
        }
        self.wake();
        Ok(true)
    }
}

/// A rope or cable: a chain of point masses joined by inextensible (or
/// stretchy) segments, colliding with the world and optionally attached to
/// bodies at either end.
///
/// All methods take `&self`; the coarse chain and the fine sub-vertices sit
/// behind separate read/write locks so status queries never block each
/// other.
///
/// # Example
///
/// ```
/// use hawser::{Rope, RopeParams, Placement, Scene, NoOpRopeObserver, Vec3};
///
/// let scene = Scene::<f32>::new();
/// let rope = Rope::new(RopeParams::new().with_length(2.0)).unwrap();
/// let points = (0..=4).map(|i| Vec3::new(i as f32 * 0.5, 0.0, 1.0)).collect();
/// rope.configure(4, Placement::Points(points)).unwrap();
/// for _ in 0..3 {
///     rope.advance(0.02, &scene, &mut NoOpRopeObserver);
/// }
/// assert!(rope.points()[4].z < 1.0);
/// ```
pub struct Rope<F: Float> {
    state: RwLock<RopeState<F>>,
    vertices: RwLock<SubVertexBuffer<F>>,
    rigid: Mutex<Box<dyn RigidSolver<F>>>,
}

impl<F: Float> Rope<F> {
    /// Create an unconfigured rope.
    pub fn new(params: RopeParams<F>) -> RopeResult<Self> {
        params.validate(0)?;
        Ok(Rope {
            state: RwLock::new(RopeState::new(params)),
            vertices: RwLock::new(SubVertexBuffer::default()),
            rigid: Mutex::new(Box::new(TensionSolver)),
        })
    }

    /// Lay out `segments` segments. A zero `length` parameter is replaced
    /// by the length of the initial polyline.
    pub fn configure(&self, segments: usize, placement: Placement<F>) -> RopeResult<()> {
        if segments == 0 || segments > MAX_SEGMENTS {
            return Err(RopeError::InvalidSegmentCount { count: segments, max: MAX_SEGMENTS });
        }
        let mut state = self.state.write();
        state.params.validate(segments)?;
        let positions = match placement {
            Placement::Points(points) => {
                if points.len() != segments + 1 {
                    return Err(RopeError::PointCountMismatch { expected: segments + 1, found: points.len() });
                }
                points
            }
            Placement::BetweenAnchors => {
                let ends = state.anchors.map(|a| a.map(|a| a.world_point(&a.last_pose)));
                let (start, end) = match ends {
                    [Some(a), Some(b)] => (a, b),
                    [Some(a), None] | [None, Some(a)] => {
                        let down = state.params.gravity.normalize_or(-Vec3::z_axis());
                        let hang = a + down.scale(state.params.length);
                        if ends[0].is_some() {
                            (a, hang)
                        } else {
                            (hang, a)
                        }
                    }
                    [None, None] => {
                        return Err(RopeError::InvalidParameter {
                            name: "placement",
                            reason: "interpolating between anchors needs at least one anchor",
                        })
                    }
                };
                let inv = F::one() / F::from_f32(segments as f32);
                (0..=segments).map(|i| start.lerp(end, F::from_f32(i as f32) * inv)).collect()
            }
        };
        if positions.iter().any(|p| !p.is_finite()) {
            return Err(RopeError::InvalidParameter { name: "placement", reason: "points must be finite" });
        }

        let mut points: Vec<ChainPoint<F>> = positions.into_iter().map(ChainPoint::new).collect();
        for end in 0..2 {
            if let Some(a) = state.anchors[end] {
                points[end * segments].position = a.world_point(&a.last_pose);
                points[end * segments].previous = points[end * segments].position;
            }
        }
        refresh_dirs(&mut points);
        if state.params.length <= F::zero() {
            state.params.length = points.windows(2).fold(F::zero(), |acc, w| acc + w[1].position.distance(w[0].position));
        }
        for (i, p) in points.iter_mut().enumerate() {
            p.first_vertex = i;
        }

        let mut vertices = self.vertices.write();
        let capacity = (state.params.max_sub_vertices + 1) * segments + 1;
        *vertices = SubVertexBuffer::with_capacity(capacity);
        if state.params.flags.contains(RopeFlags::SUBDIVIDE) {
            let fine = vertices.current_mut();
            fine.extend(points.iter().map(vertex_from));
            refresh_vertex_dirs(fine);
        }

        state.points = points;
        state.targets.clear();
        state.strained = false;
        state.has_contacts = false;
        state.islands = 0;
        state.spans.clear();
        state.wake();
        state.refresh_bounds();
        debug!("configured rope: {} segments, length {:.3}", segments, state.params.length);
        Ok(())
    }

    /// Attach or detach an end. Returns whether the end is attached
    /// afterwards; an `AnchorSpec` naming a missing entity or part detaches.
    pub fn set_anchor<W: PhysicalWorld<F> + ?Sized>(&self, world: &W, end: RopeEnd, spec: Option<AnchorSpec<F>>) -> bool {
        let mut state = self.state.write();
        let e = end.index();
        state.wake();
        state.strained = false;
        let Some(spec) = spec else {
            if state.anchors[e].take().is_some() {
                debug!("detached rope {:?}", end);
            }
            state.anchor_bodies[e] = None;
            return false;
        };
        let found = world.part_pose(spec.entity, spec.part).zip(world.body_state(spec.entity, spec.part));
        let Some((pose, body)) = found else {
            warn!("cannot anchor rope {:?} to {} part {}: no such part", end, spec.entity, spec.part);
            state.anchors[e] = None;
            state.anchor_bodies[e] = None;
            return false;
        };
        let anchor = Anchor::new(spec, pose);
        state.anchors[e] = Some(anchor);
        state.anchor_bodies[e] = Some(body);
        if state.segment_count() > 0 {
            let i = state.anchor_index(end);
            let p = &mut state.points[i];
            p.position = spec.point;
            p.previous = spec.point;
            p.contact = None;
        }
        debug!("anchored rope {:?} to {} part {}", end, spec.entity, spec.part);
        true
    }

    /// Replace the parameters. Tables are checked against the current
    /// segment count.
    pub fn set_params(&self, mut params: RopeParams<F>) -> RopeResult<()> {
        let mut state = self.state.write();
        params.validate(state.segment_count())?;
        params.hinge_axis = params.hinge_axis.map(|h| h.normalize());
        if !params.flags.contains(RopeFlags::SUBDIVIDE) {
            self.vertices.write().clear();
            for (i, p) in state.points.iter_mut().enumerate() {
                p.first_vertex = i;
            }
        }
        state.params = params;
        state.wake();
        Ok(())
    }

    pub fn params(&self) -> RopeParams<F> {
        self.state.read().params.clone()
    }

    /// Arm a full tick of length `dt` for [`Rope::step`].
    pub fn start_step(&self, dt: F) {
        self.state.write().start_step(dt);
    }

    /// Largest sub-step to take next, within the armed tick and
    /// `max_allowed_step`.
    pub fn max_time_step(&self, dt: F) -> F {
        self.state.read().max_time_step(dt)
    }

    /// Run one sub-step. Returns whether the armed tick is complete; an
    /// unfinished tick resumes from where it stopped on the next call.
    pub fn step<W, O>(&self, dt: F, world: &W, observer: &mut O) -> bool
    where
        W: PhysicalWorld<F> + ?Sized,
        O: RopeObserver<F>,
    {
        let mut state = self.state.write();
        let mut vertices = self.vertices.write();
        let mut rigid = self.rigid.lock();
        state.step(&mut vertices, rigid.as_mut(), dt, world, observer)
    }

    /// Simulate a whole tick of `dt` in sub-steps.
    pub fn advance<W, O>(&self, dt: F, world: &W, observer: &mut O)
    where
        W: PhysicalWorld<F> + ?Sized,
        O: RopeObserver<F>,
    {
        self.start_step(dt);
        loop {
            let h = self.max_time_step(dt);
            if self.step(h, world, observer) {
                break;
            }
        }
    }

    /// Queue an impulse for the next sub-step and wake the rope.
    pub fn apply_impulse(&self, impulse: RopeImpulse<F>) -> RopeResult<bool> {
        self.state.write().apply_impulse(impulse)
    }

    /// Apply an explosion at `center` for the next sub-step and wake the
    /// rope. Returns the anchor the blast tore off, if any.
    pub fn apply_explosion(&self, center: Vec3<F>, strength: F, min_radius: F) -> RopeResult<Option<JointBroken<F>>> {
        let mut state = self.state.write();
        if state.segment_count() == 0 {
            return Err(RopeError::NotConfigured);
        }
        if !center.is_finite() || !strength.is_finite() || strength < F::zero() || !(min_radius > F::zero()) {
            return Err(RopeError::InvalidParameter { name: "explosion", reason: "needs a finite center and strength and a positive radius" });
        }
        Ok(state.apply_explosion(center, strength, min_radius))
    }

    /// Set the animated target pose, one point per chain point. With
    /// `TARGET_VTX_REL0`/`REL1` the points are in that anchor's frame.
    pub fn set_target_pose(&self, targets: &[Vec3<F>]) -> RopeResult<()> {
        let mut state = self.state.write();
        let n = state.segment_count();
        if n == 0 {
            return Err(RopeError::NotConfigured);
        }
        if targets.len() != n + 1 {
            return Err(RopeError::PointCountMismatch { expected: n + 1, found: targets.len() });
        }
        state.targets = targets.to_vec();
        for (p, &t) in state.points.iter_mut().zip(targets) {
            p.target = t;
        }
        state.wake();
        Ok(())
    }

    pub fn clear_target_pose(&self) {
        self.state.write().targets.clear();
    }

    pub fn wake(&self) {
        self.state.write().wake();
    }

    /// Replace the rigid-body solver strained spans are handed to.
    pub fn set_rigid_solver(&self, solver: Box<dyn RigidSolver<F>>) {
        *self.rigid.lock() = solver;
    }

    pub fn segment_count(&self) -> usize {
        self.state.read().segment_count()
    }

    pub fn points(&self) -> Vec<Vec3<F>> {
        self.state.read().points.iter().map(|p| p.position).collect()
    }

    pub fn velocities(&self) -> Vec<Vec3<F>> {
        self.state.read().points.iter().map(|p| p.velocity).collect()
    }

    /// Fine vertex positions; empty unless the rope subdivides.
    pub fn sub_vertices(&self) -> Vec<Vec3<F>> {
        self.vertices.read().current().iter().map(|v| v.position).collect()
    }

    /// Contact entity and normal of every segment.
    pub fn contacts(&self) -> Vec<Option<(EntityId, Vec3<F>)>> {
        let state = self.state.read();
        let n = state.segment_count();
        state.points.iter().take(n).map(|p| p.contact.map(|c| (c.entity, c.normal))).collect()
    }

    /// Strained spans handed to the rigid solver on the last sub-step,
    /// with their resolved impulses.
    pub fn spans(&self) -> Vec<RopeContact<F>> {
        self.state.read().spans.clone()
    }

    pub fn anchor(&self, end: RopeEnd) -> Option<Anchor<F>> {
        self.state.read().anchors[end.index()]
    }

    pub fn is_strained(&self) -> bool {
        self.state.read().strained
    }

    pub fn is_awake(&self) -> bool {
        self.state.read().awake
    }

    /// Pose of the anchor-0 part after the last step, or the chain start.
    pub fn host_pose(&self) -> Pose<F> {
        self.state.read().host_pose
    }

    pub fn bounds(&self) -> Aabb<F> {
        self.state.read().bounds
    }

    pub fn status(&self) -> RopeStatus<F> {
        let state = self.state.read();
        let sub_vertices = self.vertices.read().current().len();
        RopeStatus {
            segments: state.segment_count(),
            length: state.params.length,
            strained: state.strained,
            awake: state.awake,
            anchored: [state.anchors[0].is_some(), state.anchors[1].is_some()],
            contacts: state.contact_count,
            sub_vertices,
            energy: state.energy,
            bounds: state.bounds,
            host_pose: state.host_pose,
        }
    }

    pub fn snapshot(&self) -> RopeResult<RopeSnapshot<F>> {
        let state = self.state.read();
        if state.segment_count() == 0 {
            return Err(RopeError::NotConfigured);
        }
        Ok(state.snapshot())
    }

    /// Load a snapshot taken from a rope with the same segment count. On
    /// error nothing changes.
    pub fn restore(&self, snapshot: &RopeSnapshot<F>) -> RopeResult<()> {
        let mut state = self.state.write();
        if state.segment_count() == 0 {
            return Err(RopeError::NotConfigured);
        }
        state.restore(snapshot)?;
        let mut vertices = self.vertices.write();
        vertices.clear();
        if state.params.flags.contains(RopeFlags::SUBDIVIDE) {
            let fine = vertices.current_mut();
            fine.extend(state.points.iter().map(vertex_from));
            refresh_vertex_dirs(fine);
        }
        for (i, p) in state.points.iter_mut().enumerate() {
            p.first_vertex = i;
        }
        state.refresh_bounds();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::NoOpRopeObserver;
    use crate::scene::Scene;

    fn line(n: usize) -> Vec<Vec3<f64>> {
        (0..=n).map(|i| Vec3::new(i as f64, 0.0, 0.0)).collect()
    }

    #[test]
    fn configure_rejects_bad_counts() {
        let rope = Rope::new(RopeParams::<f64>::new()).unwrap();
        assert_eq!(
            rope.configure(0, Placement::Points(Vec::new())),
            Err(RopeError::InvalidSegmentCount { count: 0, max: MAX_SEGMENTS })
        );
        assert_eq!(
            rope.configure(3, Placement::Points(line(2))),
            Err(RopeError::PointCountMismatch { expected: 4, found: 3 })
        );
        assert!(matches!(rope.configure(2, Placement::BetweenAnchors), Err(RopeError::InvalidParameter { .. })));
        assert_eq!(rope.segment_count(), 0);
    }

    #[test]
    fn length_defaults_to_polyline() {
        let rope = Rope::new(RopeParams::<f64>::new()).unwrap();
        rope.configure(4, Placement::Points(line(4))).unwrap();
        assert_eq!(rope.params().length, 4.0);
        assert_eq!(rope.status().segments, 4);
    }

    #[test]
    fn impulse_splits_between_segment_points() {
        let rope = Rope::new(RopeParams::<f64>::new().with_mass(5.0).with_length(4.0)).unwrap();
        rope.configure(4, Placement::Points(line(4))).unwrap();
        let hit = rope.apply_impulse(RopeImpulse::Segment { segment: 1, t: 0.25, impulse: Vec3::new(0.0, 1.0, 0.0) });
        assert_eq!(hit, Ok(true));
        let state = rope.state.read();
        assert!((state.points[1].pending_velocity.y - 0.75).abs() < 1e-12);
        assert!((state.points[2].pending_velocity.y - 0.25).abs() < 1e-12);
    }

    #[test]
    fn impulse_misses_far_positions() {
        let rope = Rope::new(RopeParams::<f64>::new()).unwrap();
        rope.configure(2, Placement::Points(line(2))).unwrap();
        let miss = rope.apply_impulse(RopeImpulse::Position { position: Vec3::new(1.0, 5.0, 0.0), impulse: Vec3::z_axis() });
        assert_eq!(miss, Ok(false));
        assert_eq!(
            rope.apply_impulse(RopeImpulse::Point { index: 9, impulse: Vec3::z_axis() }),
            Err(RopeError::IndexOutOfBounds { index: 9, count: 3 })
        );
    }

    #[test]
    fn segment_impulse_past_the_last_segment_is_rejected() {
        let rope = Rope::new(RopeParams::<f64>::new().with_length(4.0)).unwrap();
        rope.configure(4, Placement::Points(line(4))).unwrap();
        let push = Vec3::new(0.0, 1.0, 0.0);
        assert_eq!(
            rope.apply_impulse(RopeImpulse::Segment { segment: 4, t: 0.0, impulse: push }),
            Err(RopeError::IndexOutOfBounds { index: 4, count: 4 })
        );
        assert!(rope.state.read().points.iter().all(|p| p.pending_velocity == Vec3::zero()));
        assert_eq!(rope.apply_impulse(RopeImpulse::Segment { segment: 3, t: 1.0, impulse: push }), Ok(true));
    }

    #[test]
    fn non_finite_tick_is_empty() {
        let rope = Rope::new(RopeParams::<f64>::new().with_length(4.0)).unwrap();
        rope.configure(4, Placement::Points(line(4))).unwrap();
        rope.start_step(f64::NAN);
        assert!(rope.state.read().tick_complete());
        assert!(rope.step(f64::NAN, &Scene::new(), &mut NoOpRopeObserver));
        assert_eq!(rope.points(), line(4));
    }

    #[test]
    fn foreign_contact_switches_the_target_pose_off() {
        let params = RopeParams::<f64>::new()
            .with_length(4.0)
            .with_pose_mode(PoseMode::Follow)
            .with_flags(RopeFlags::COLLIDES | RopeFlags::NO_STIFFNESS_WHEN_COLLIDING);
        let rope = Rope::new(params).unwrap();
        rope.configure(4, Placement::Points(line(4))).unwrap();
        let lifted: Vec<_> = line(4).iter().map(|&p| p + Vec3::z_axis()).collect();
        rope.set_target_pose(&lifted).unwrap();

        let mut arena = thunderdome::Arena::new();
        let mut state = rope.state.write();
        state.points[3].contact = Some(crate::point::Contact {
            entity: EntityId(arena.insert(())),
            part: 0,
            normal: Vec3::z_axis(),
            point: state.points[3].position,
            t: 0.0,
            velocity: Vec3::zero(),
            feature: Default::default(),
            recheck: false,
            check_part: 0,
        });
        state.apply_pose_stiffness(0.02);
        assert!(state.points.iter().all(|p| p.velocity == Vec3::zero()), "no point follows while touching");

        state.points[3].contact = None;
        state.apply_pose_stiffness(0.02);
        assert!(state.points[1].velocity.z > 0.0);
    }

    #[test]
    fn max_time_step_respects_tick_and_limit() {
        let rope = Rope::new(RopeParams::<f64>::new().with_max_allowed_step(0.01)).unwrap();
        rope.start_step(0.025);
        assert_eq!(rope.max_time_step(0.1), 0.01);
        rope.state.write().tick_done = 0.02;
        assert!((rope.max_time_step(0.1) - 0.005).abs() < 1e-12);
    }
}
