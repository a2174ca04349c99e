//! Per-tick integration: anchors, free points, wind, water and the
//! animated target pose.

use crate::config::{PoseMode, RopeFlags};
use crate::float::Float;
use crate::point::ChainPoint;
use crate::rope::RopeState;
use crate::vec::{Vec as _, Vec3};
use crate::world::{PhysicalWorld, WaterVolume};
use log::warn;

/// Xorshift generator for wind gusts. Seeded, so runs are reproducible.
#[derive(Clone, Debug)]
pub(crate) struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    pub fn new(seed: u64) -> Self {
        XorShift64 { state: seed | 1 }
    }

    pub fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        (x.wrapping_mul(2_685_821_657_736_338_717) >> 32) as u32
    }

    /// Uniform in `[0, 1)`.
    pub fn next_unit<F: Float>(&mut self) -> F {
        F::from_f32(self.next_u32() as f32 / 4_294_967_296.0)
    }
}

/// Gusting wind: a random offset around the mean wind, resampled four
/// times a second and blended between samples.
#[derive(Clone, Debug)]
pub(crate) struct Gust<F: Float> {
    from: Vec3<F>,
    to: Vec3<F>,
    timer: F,
    rng: XorShift64,
}

impl<F: Float> Gust<F> {
    pub fn new(seed: u64) -> Self {
        Gust { from: Vec3::zero(), to: Vec3::zero(), timer: F::zero(), rng: XorShift64::new(seed) }
    }

    /// Wind velocity for this sub-step.
    pub fn sample(&mut self, wind: Vec3<F>, variance: F, dt: F) -> Vec3<F> {
        if variance <= F::zero() {
            return wind;
        }
        self.timer = self.timer + dt * F::from_f32(4.0);
        if self.timer > F::one() {
            self.timer = F::zero();
            self.from = self.to;
            let a = variance * (wind.x.abs() + wind.y.abs() + wind.z.abs());
            let r = Vec3::new(self.rng.next_unit::<F>(), self.rng.next_unit::<F>(), self.rng.next_unit::<F>());
            self.to = r.scale(a) - Vec3::splat(a * F::half());
        }
        wind + self.from.lerp(self.to, self.timer)
    }
}

impl<F: Float> RopeState<F> {
    /// Drive anchored end points from their bodies. Anchors whose entity or
    /// part vanished are dropped. Returns whether any anchor moved.
    pub(crate) fn update_anchors<W: PhysicalWorld<F> + ?Sized>(&mut self, world: &W, dt: F) -> bool {
        let n = self.segment_count();
        let findiff = self.params.flags.contains(RopeFlags::FINDIFF_ATTACHED_VEL);
        let teleport = self.params.max_velocity * F::from_f32(0.3);
        let mut moved = false;
        for end in 0..2 {
            let Some(mut anchor) = self.anchors[end] else {
                continue;
            };
            let state = world
                .part_pose(anchor.entity, anchor.part)
                .zip(world.body_state(anchor.entity, anchor.part));
            let Some((pose, mut body)) = state else {
                warn!("anchor {} on {} part {} is gone, detaching", end, anchor.entity, anchor.part);
                self.anchors[end] = None;
                self.anchor_bodies[end] = None;
                continue;
            };
            let point = anchor.world_point(&pose);
            let previous = anchor.world_point(&anchor.last_pose);
            let velocity = if findiff && dt > F::zero() {
                let v = (point - previous).scale(F::one() / dt);
                let v = if v.length() > teleport { Vec3::zero() } else { v };
                // The coupling sees the differenced motion too.
                body.angular_velocity = anchor.last_pose.rotation.angular_velocity_to(pose.rotation, dt);
                body.velocity = v - body.angular_velocity.cross(point - body.center_of_mass);
                v
            } else {
                body.point_velocity(point)
            };
            if point.distance_sq(previous) > F::from_f32(1e-12) || pose.rotation != anchor.last_pose.rotation {
                moved = true;
            }
            anchor.last_pose = pose;
            self.anchors[end] = Some(anchor);
            self.anchor_bodies[end] = Some(body);

            let p = &mut self.points[if end == 0 { 0 } else { n }];
            p.previous = p.position;
            p.position = point;
            p.velocity = velocity;
        }
        moved
    }

    /// Refresh world-space targets for the animated pose modes.
    pub(crate) fn update_targets<W: PhysicalWorld<F> + ?Sized>(&mut self, world: &W) {
        if self.params.pose_mode == PoseMode::Inactive || self.targets.len() != self.points.len() {
            return;
        }
        let frame = if self.params.flags.contains(RopeFlags::TARGET_VTX_REL0) {
            self.anchors[0]
        } else if self.params.flags.contains(RopeFlags::TARGET_VTX_REL1) {
            self.anchors[1]
        } else {
            None
        };
        let pose = frame.and_then(|a| world.part_pose(a.entity, a.part));
        for (p, &t) in self.points.iter_mut().zip(&self.targets) {
            p.target = match &pose {
                Some(pose) => pose.transform_point(t),
                None => t,
            };
        }
    }

    /// Explicit step of every free point.
    pub(crate) fn integrate_free_points(&mut self, dt: F, water: &[WaterVolume<F>]) {
        let n = self.segment_count();
        let seg_len = self.segment_length();
        let wind = self.gust.sample(self.params.wind, self.params.wind_variance, dt);
        let params = &self.params;
        let gravity = params.gravity;
        let air = (params.air_resistance * dt).min(F::one());
        let water_k = (params.water_resistance * dt).min(F::one());
        let snap = params.pose_mode == PoseMode::Follow && self.target_pose_active();
        let snap_dist = (seg_len * F::from_f32(0.08)).sq();
        let hard_snap = params.stiffness_anim <= F::zero();
        let anchored = [self.anchors[0].is_some(), self.anchors[1].is_some()];

        for (i, p) in self.points.iter_mut().enumerate() {
            if (i == 0 && anchored[0]) || (i == n && anchored[1]) {
                continue;
            }
            p.previous = p.position;
            let mut next = p.position + p.velocity.scale(dt);
            if snap {
                let crossed = (p.target - p.position).dot(p.target - next) <= F::zero();
                if hard_snap || (crossed && next.distance_sq(p.target) < snap_dist) {
                    next = p.target;
                }
            }
            p.position = next;
            p.velocity += gravity.scale(dt);
            if air > F::zero() {
                p.velocity += (wind - p.velocity).scale(air);
            }
            apply_water(p, water, gravity, water_k, params.density, params.thickness.get(i.min(n.saturating_sub(1))), dt);
        }
    }

    /// With `NO_STIFFNESS_WHEN_COLLIDING`, any contact with a body other
    /// than the first anchor's switches the target pose off for the rope.
    pub(crate) fn target_pose_active(&self) -> bool {
        if !self.params.flags.contains(RopeFlags::NO_STIFFNESS_WHEN_COLLIDING) {
            return true;
        }
        let host = self.anchors.iter().flatten().next().map(|a| a.entity);
        !self.points.iter().filter_map(|p| p.contact).any(|c| Some(c.entity) != host)
    }

    /// Velocity blending toward the target pose.
    pub(crate) fn apply_pose_stiffness(&mut self, dt: F) {
        let n = self.segment_count();
        if n == 0 || self.targets.len() != self.points.len() || !self.target_pose_active() {
            return;
        }
        let params = &self.params;
        let decay = params.stiffness_decay_anim / F::from_f32(n as f32);
        let anchored_end = self.anchors[1].is_some();
        match params.pose_mode {
            PoseMode::Inactive => {}
            PoseMode::Follow => {
                for i in 0..n {
                    if i + 1 == n && anchored_end {
                        break;
                    }
                    let p = &self.points[i + 1];
                    let k = params.stiffness_anim * (F::one() - decay * F::from_f32((i + 1) as f32)).max(F::zero());
                    let dv = (p.target - p.position).scale(k);
                    let a = (F::one() - params.damping.get(i) * dt).max(F::zero());
                    let p = &mut self.points[i + 1];
                    p.velocity = p.velocity.scale(a) + dv.scale(F::one() - a);
                }
            }
            PoseMode::Bend => {
                for i in 0..n {
                    if i + 1 == n && anchored_end {
                        break;
                    }
                    let (head, tail) = self.points.split_at_mut(i + 1);
                    let (a, b) = (&head[i], &mut tail[0]);
                    let seg = b.position - a.position;
                    let rot = bend_rotation(seg, b.target - a.target);
                    let k = params.stiffness_anim * (F::one() - decay * F::from_f32((i + 1) as f32)).max(F::zero());
                    let dv = rot.scale(k * dt).cross(seg);
                    let relative = b.velocity - a.velocity;
                    let damp = (F::one() - params.damping.get(i) * dt).max(F::zero());
                    b.velocity = a.velocity + relative.scale(damp) + dv;
                }
            }
        }
    }

    /// Fold in queued impulses and apply per-segment damping.
    pub(crate) fn apply_damping(&mut self, dt: F) {
        let n = self.segment_count();
        for (i, p) in self.points.iter_mut().enumerate() {
            let damping = self.params.damping.get(i.min(n.saturating_sub(1)));
            let k = (F::one() - damping * dt).max(F::zero());
            p.velocity = (p.velocity + p.pending_velocity).scale(k);
            p.pending_velocity = Vec3::zero();
        }
    }
}

/// Rotation vector (axis times angle) taking `from` onto `to`.
pub(crate) fn bend_rotation<F: Float>(from: Vec3<F>, to: Vec3<F>) -> Vec3<F> {
    let a = from.normalize();
    let b = to.normalize();
    let axis = a.cross(b);
    let s = axis.length();
    if s.is_near_zero(F::from_f32(1e-9)) {
        return Vec3::zero();
    }
    axis.scale(F::atan2(s, a.dot(b)) / s)
}

fn apply_water<F: Float>(
    p: &mut ChainPoint<F>,
    water: &[WaterVolume<F>],
    gravity: Vec3<F>,
    resistance: F,
    density: F,
    thickness: F,
    dt: F,
) {
    let Some(w) = water.iter().find(|w| w.depth(p.position) > F::zero()) else {
        return;
    };
    let depth = w.depth(p.position);
    let submerged = if thickness > F::zero() { (depth / thickness).min(F::one()) } else { F::one() };
    p.velocity += (w.flow - p.velocity).scale(resistance);
    p.velocity -= gravity.scale(w.density / density * submerged * dt);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xorshift_is_reproducible() {
        let mut a = XorShift64::new(7);
        let mut b = XorShift64::new(7);
        for _ in 0..16 {
            assert_eq!(a.next_u32(), b.next_u32());
        }
        let u: f64 = a.next_unit();
        assert!((0.0..1.0).contains(&u));
    }

    #[test]
    fn gust_stays_within_variance() {
        let mut gust = Gust::<f64>::new(3);
        let wind = Vec3::new(2.0, 0.0, 0.0);
        for _ in 0..200 {
            let w = gust.sample(wind, 0.5, 0.05);
            // a = 0.5 * 2 = 1, so each component deviates by at most 0.5.
            assert!((w - wind).abs().x <= 0.5 + 1e-9);
            assert!((w - wind).abs().z <= 0.5 + 1e-9);
        }
        assert_eq!(Gust::<f64>::new(3).sample(wind, 0.0, 0.05), wind);
    }

    #[test]
    fn bend_rotation_recovers_angle() {
        let r = bend_rotation(Vec3::new(1.0f64, 0.0, 0.0), Vec3::new(0.0, 1.0, 0.0));
        assert!(r.distance(Vec3::new(0.0, 0.0, core::f64::consts::FRAC_PI_2)) < 1e-9);
    }

    #[test]
    fn water_pushes_light_rope_up() {
        let mut p = ChainPoint::new(Vec3::new(0.0f64, 0.0, -1.0));
        let water = [WaterVolume { origin: Vec3::zero(), normal: Vec3::z_axis(), flow: Vec3::zero(), density: 1000.0 }];
        let g = Vec3::new(0.0, 0.0, -9.81);
        apply_water(&mut p, &water, g, 0.0, 500.0, 0.01, 0.1);
        assert!(p.velocity.z > 0.0, "buoyancy should lift a rope lighter than water, got {:?}", p.velocity);
    }
}
