//! Coupling a strained rope to the rigid-body solver.
//!
//! A taut rope is reported as one [`RopeContact`] per span between
//! friction-locked wraps. Each span carries its end bodies, the bodies it
//! wraps around with capstan-style impulse shares, and an effective mass.
//! The host's [`RigidSolver`] resolves the spans and writes back the
//! tension impulse, which drives tearing.

use crate::check_part::CheckPart;
use crate::config::RopeFlags;
use crate::float::Float;
use crate::point::{RopeEnd, SubVertex};
use crate::rope::RopeState;
use crate::strain::{span_dir, supports_bend};
use crate::vec::{Vec as _, Vec3};
use crate::world::{BodyState, EntityId};
use log::warn;

/// Cap on the slack-closing velocity requested from the rigid solver.
const MAX_SAG_VELOCITY: f32 = 10.0;

/// One end of a taut span.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SpanEnd<F: Float> {
    pub entity: EntityId,
    pub part: usize,
    pub point: Vec3<F>,
    pub body: BodyState<F>,
}

/// A body the span wraps around.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct WrapPoint<F: Float> {
    pub entity: EntityId,
    pub part: usize,
    pub point: Vec3<F>,
    pub body: BodyState<F>,
    /// Impulse on the wrapped body per unit of span tension at the start.
    pub impulse: Vec3<F>,
    /// Leaving minus arriving direction.
    pub jacobian: Vec3<F>,
}

/// A taut span submitted to the rigid solver.
#[derive(Clone, Debug, PartialEq)]
pub struct RopeContact<F: Float> {
    pub ends: [SpanEnd<F>; 2],
    /// Direction the rope leaves the start body.
    pub start_dir: Vec3<F>,
    /// Direction the rope arrives at the end body.
    pub end_dir: Vec3<F>,
    pub wraps: Vec<WrapPoint<F>>,
    /// End tension over start tension after friction at the wraps.
    pub tension_ratio: F,
    /// Inverse of the span's effective inverse mass.
    pub effective_mass: F,
    /// Impulse the rope holds before tearing (or stretching, if `stretchy`).
    pub max_impulse: F,
    /// Clamp the impulse at `max_impulse` instead of tearing.
    pub stretchy: bool,
    /// Closing velocity requested to take up overshoot of the path length.
    pub sag_velocity: F,
    /// Tension impulse, written by the rigid solver.
    pub impulse: F,
}

impl<F: Float> RopeContact<F> {
    /// Rate at which the bodies shorten the span. Negative when they pull
    /// it apart.
    pub fn closing_speed(&self) -> F {
        let [a, b] = &self.ends;
        let wraps = self
            .wraps
            .iter()
            .fold(F::zero(), |acc, w| acc + w.jacobian.dot(w.body.point_velocity(w.point)));
        self.start_dir.dot(a.body.point_velocity(a.point)) - self.end_dir.dot(b.body.point_velocity(b.point)) + wraps
    }
}

/// The host's rigid-body contact solver, as seen by a strained rope.
pub trait RigidSolver<F: Float>: Send {
    /// Resolve the spans for this tick and store each span's tension
    /// impulse in [`RopeContact::impulse`].
    fn resolve(&mut self, contacts: &mut [RopeContact<F>], dt: F);
}

/// Ignores rope spans. Strained ropes never tear.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoRigidSolver;

impl<F: Float> RigidSolver<F> for NoRigidSolver {
    fn resolve(&mut self, _contacts: &mut [RopeContact<F>], _dt: F) {}
}

/// Estimates span tension from the bodies' current motion: the impulse
/// that would stop them pulling the span apart. Does not move bodies.
#[derive(Copy, Clone, Debug, Default)]
pub struct TensionSolver;

impl<F: Float> RigidSolver<F> for TensionSolver {
    fn resolve(&mut self, contacts: &mut [RopeContact<F>], _dt: F) {
        for c in contacts.iter_mut() {
            let demand = (c.sag_velocity - c.closing_speed()).max(F::zero());
            let mut impulse = demand * c.effective_mass;
            if c.stretchy {
                impulse = impulse.min(c.max_impulse);
            }
            c.impulse = impulse;
        }
    }
}

/// Emitted when tension tears an anchor off.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct JointBroken<F: Float> {
    pub end: RopeEnd,
    pub entity: EntityId,
    pub part: usize,
    pub point: Vec3<F>,
    /// Rope direction at the torn end.
    pub normal: Vec3<F>,
    pub impulse: F,
}

/// Per-body force and torque from a unit span tension.
struct Load<F: Float> {
    key: (EntityId, usize),
    body: BodyState<F>,
    force: Vec3<F>,
    torque: Vec3<F>,
}

fn add_load<F: Float>(loads: &mut Vec<Load<F>>, key: (EntityId, usize), body: BodyState<F>, point: Vec3<F>, force: Vec3<F>) {
    let torque = (point - body.center_of_mass).cross(force);
    match loads.iter_mut().find(|l| l.key == key) {
        Some(l) => {
            l.force += force;
            l.torque += torque;
        }
        None => loads.push(Load { key, body, force, torque }),
    }
}

fn load_response<F: Float>(loads: &[Load<F>], key: (EntityId, usize), point: Vec3<F>) -> Vec3<F> {
    loads.iter().find(|l| l.key == key).map_or(Vec3::zero(), |l| {
        l.force.scale(l.body.inv_mass()) + l.body.apply_inv_inertia(l.torque).cross(point - l.body.center_of_mass)
    })
}

impl<F: Float> RopeState<F> {
    /// Split the strained fine path into spans and build their contacts.
    pub(crate) fn register_contacts(&self, fine: &[SubVertex<F>], parts: &[CheckPart<'_, F>], dt: F) -> Vec<RopeContact<F>> {
        let mut out = Vec::new();
        let m = fine.len();
        let (Some(a0), Some(a1)) = (self.anchors[0], self.anchors[1]) else {
            return out;
        };
        let (Some(b0), Some(b1)) = (self.anchor_bodies[0], self.anchor_bodies[1]) else {
            return out;
        };
        if !self.strained || m < 2 || self.params.penalty_scale <= F::zero() {
            return out;
        }
        let fp = self.params.friction_pull;
        let cosb = F::one() / (F::one() + fp * fp).sqrt();
        let total = fine.windows(2).fold(F::zero(), |acc, w| acc + (w[1].position - w[0].position).dot(w[0].dir));
        let inv_total = if total > F::zero() { F::one() / total } else { F::zero() };
        let sag = if self.params.length > F::zero() { self.params.length * F::from_f32(1.005) - total } else { -F::one() };
        let body_at = |v: &SubVertex<F>| {
            v.contact.and_then(|c| parts.get(c.check_part).map(|cp| (c.entity, c.part, cp.body)))
        };

        let mut wrap = vec![false; m];
        let mut next_wrap = vec![0usize; m];
        let mut start = 0;
        while start + 1 < m {
            let mut i = start + 1;
            let mut len = F::zero();
            let mut slide = 0i32;
            let mut first_wrap = None;
            let mut last_wrap = start;
            while i + 1 < m {
                len = len + fine[i - 1].dir.dot(fine[i].position - fine[i - 1].position);
                if fine[i].contact.is_some() {
                    let cos2a = -fine[i].dir.dot(fine[i - 1].dir);
                    if cos2a > F::from_f32(-0.9998) && supports_bend(fine, i) {
                        wrap[i] = true;
                        if F::one() - cos2a < fp * fp * (F::one() + cos2a) {
                            break;
                        }
                        let c = fine[i].contact.map_or(Vec3::zero(), |c| c.velocity);
                        let s = (fine[i - 1].dir + fine[i].dir).dot(fine[i].velocity - c);
                        slide -= if s > F::zero() { 1 } else if s < F::zero() { -1 } else { 0 };
                        next_wrap[last_wrap] = i;
                        first_wrap.get_or_insert(i);
                        last_wrap = i;
                    } else {
                        wrap[i] = false;
                    }
                }
                i += 1;
            }
            next_wrap[last_wrap] = i;
            let end = i;
            let friction = fp * F::from_f32(slide.signum() as f32);
            let (dir0, dir1) = match first_wrap {
                Some(fw) => (
                    span_dir(fine[start].position, fine[fw].position, fine[start].dir),
                    span_dir(fine[last_wrap].position, fine[end].position, fine[end - 1].dir),
                ),
                None => {
                    let d = span_dir(fine[start].position, fine[end].position, fine[start].dir);
                    (d, d)
                }
            };
            len = len + dir1.dot(fine[end].position - fine[end - 1].position);

            let end0 = if start == 0 {
                Some(SpanEnd { entity: a0.entity, part: a0.part, point: fine[0].position, body: b0 })
            } else {
                body_at(&fine[start]).map(|(entity, part, body)| SpanEnd { entity, part, point: fine[start].position, body })
            };
            let end1 = if end == m - 1 {
                Some(SpanEnd { entity: a1.entity, part: a1.part, point: fine[end].position, body: b1 })
            } else {
                body_at(&fine[end]).map(|(entity, part, body)| SpanEnd { entity, part, point: fine[end].position, body })
            };
            let (Some(end0), Some(end1)) = (end0, end1) else {
                start = end;
                continue;
            };

            let sinb = friction * cosb;
            let mut loads = Vec::new();
            add_load(&mut loads, (end0.entity, end0.part), end0.body, end0.point, dir0);
            let mut max_mass = end0.body.mass.max(end1.body.mass);
            let mut k_p = F::one();
            let mut wraps = Vec::new();
            let mut prev = start;
            for i in start + 1..end {
                if !wrap[i] {
                    continue;
                }
                let vdir0 = span_dir(fine[prev].position, fine[i].position, fine[i - 1].dir);
                let vdir1 = span_dir(fine[i].position, fine[next_wrap[i]].position, fine[i].dir);
                prev = i;
                let cos2a = -vdir1.dot(vdir0);
                if cos2a > F::from_f32(0.9995) {
                    continue;
                }
                let Some((entity, part, body)) = body_at(&fine[i]) else {
                    continue;
                };
                let cosa = ((F::one() + cos2a) * F::half()).max(F::zero()).sqrt();
                let sina = ((F::one() - cos2a) * F::half()).max(F::zero()).sqrt();
                let jacobian = vdir1 - vdir0;
                let mut n = if cosa > F::from_f32(1e-4) {
                    jacobian.scale(-F::one() / (F::two() * cosa))
                } else {
                    vdir1.orthogonal()
                };
                n += (vdir0 + vdir1).scale(friction / (F::two() * sina));
                k_p = k_p / (sina * cosb + cosa * sinb);
                let impulse = n.scale(k_p * -F::two() * sina * cosa * cosb);
                k_p = k_p * (sina * cosb - cosa * sinb);
                max_mass = max_mass.max(body.mass);
                add_load(&mut loads, (entity, part), body, fine[i].position, impulse);
                wraps.push(WrapPoint { entity, part, point: fine[i].position, body, impulse, jacobian });
            }
            if loads.len() + usize::from(!loads.iter().any(|l| l.key == (end1.entity, end1.part))) <= 1
                || max_mass <= F::zero()
            {
                start = end;
                continue;
            }
            add_load(&mut loads, (end1.entity, end1.part), end1.body, end1.point, -dir1.scale(k_p));

            let mut k = dir0.dot(load_response(&loads, (end0.entity, end0.part), end0.point))
                - dir1.dot(load_response(&loads, (end1.entity, end1.part), end1.point));
            for w in &wraps {
                k = k + w.jacobian.dot(load_response(&loads, (w.entity, w.part), w.point));
            }
            if k.abs() > F::from_f32(1e-12) {
                let sag_velocity = len * inv_total
                    * (-sag * self.params.penalty_scale).clamp(F::zero(), F::from_f32(MAX_SAG_VELOCITY));
                out.push(RopeContact {
                    ends: [end0, end1],
                    start_dir: dir0,
                    end_dir: dir1,
                    wraps,
                    tension_ratio: k_p,
                    effective_mass: F::one() / k.abs(),
                    max_impulse: self.params.max_force * dt.max(F::from_f32(0.01)) * F::from_f32(1.1),
                    stretchy: self.params.flags.contains(RopeFlags::NO_TEARS) && self.params.max_force > F::zero(),
                    sag_velocity,
                    impulse: F::zero(),
                });
            }
            start = end;
        }
        out
    }

    /// Strained fine velocities follow the bodies: ends move with their
    /// anchors, wraps with their colliders, span interiors interpolate.
    pub(crate) fn propagate_strained_velocities(&mut self, fine: &mut [SubVertex<F>]) {
        let m = fine.len();
        let (Some(b0), Some(b1)) = (self.anchor_bodies[0], self.anchor_bodies[1]) else {
            return;
        };
        if !self.strained || m < 2 {
            return;
        }
        fine[0].velocity = b0.point_velocity(fine[0].position);
        fine[m - 1].velocity = b1.point_velocity(fine[m - 1].position);
        let along = [fine[0].dir.dot(fine[0].velocity), fine[m - 2].dir.dot(fine[m - 1].velocity)];
        let first = fine[0].position;
        let last = fine[m - 1].position;
        let mut i = 0;
        while i + 1 < m {
            let mut j = i + 1;
            while j + 1 < m && fine[j].contact.is_none() {
                j += 1;
            }
            let to_first = fine[j].position.distance_sq(first);
            let to_last = fine[j].position.distance_sq(last);
            let t = if to_first + to_last > F::zero() { to_last / (to_first + to_last) } else { F::half() };
            let span = fine[j].position - fine[i].position;
            let len2 = span.length_sq();
            let dir = if len2 > F::from_f32(1e-8) { span.scale(F::one() / len2) } else { Vec3::zero() };
            if j + 1 < m {
                let surface = fine[j].contact.map_or(Vec3::zero(), |c| c.velocity);
                let norm = (fine[j - 1].dir - fine[j].dir).normalize();
                let tang = (fine[j - 1].dir + fine[j].dir).normalize();
                fine[j].velocity = norm.scale(surface.dot(norm)) + tang.scale(along[0] * (F::one() - t) + along[1] * t);
            }
            let (v_i, v_j) = (fine[i].velocity, fine[j].velocity);
            for k in i + 1..j {
                let s = dir.dot(fine[k].position - fine[i].position);
                fine[k].velocity = v_i.scale(F::one() - s) + v_j.scale(s);
            }
            i = j;
        }
        for p in self.points.iter_mut() {
            if let Some(v) = fine.get(p.first_vertex) {
                p.velocity = v.velocity;
            }
        }
    }

    /// Tear the end anchor off when a span's tension exceeded the limit.
    pub(crate) fn check_tearing(&mut self, contacts: &[RopeContact<F>], dt: F) -> Option<JointBroken<F>> {
        let max_force = self.params.max_force;
        if max_force <= F::zero() || self.params.flags.contains(RopeFlags::NO_TEARS) {
            return None;
        }
        let impulse = contacts.iter().fold(F::zero(), |m, c| m.max(c.impulse));
        if impulse <= max_force * dt.max(F::from_f32(0.01)) {
            return None;
        }
        self.detach(RopeEnd::End, impulse)
    }

    /// Blast from `center`. Free points are pushed away with a pressure
    /// falling off with the squared distance, floored at `min_radius`. A
    /// rope tied at both ends whose total pressure load exceeds the tearing
    /// limit loses the anchor nearer the blast.
    pub(crate) fn apply_explosion(&mut self, center: Vec3<F>, strength: F, min_radius: F) -> Option<JointBroken<F>> {
        let n = self.segment_count();
        let seglen = self.segment_length();
        let floor = min_radius.sq();
        let scale = F::from_f32((n + 1) as f32) / self.params.mass;
        let max_v = self.params.max_velocity;
        let held = [self.anchors[0].is_some(), self.anchors[1].is_some()];
        let mut pressure = F::zero();
        let mut thickness = F::zero();
        for i in 0..n {
            let r = (self.points[i].position + self.points[i + 1].position).scale(F::half()) - center;
            let dist = r.length();
            let width = self.params.thickness.get(i);
            thickness = thickness + width;
            if dist.is_near_zero(F::from_f32(1e-6)) {
                continue;
            }
            let dir = self.points[i].dir;
            let p = dir.cross(r).length() / (dist * r.length_sq().max(floor));
            pressure = pressure + p;

            // Push the segment along the part of `r` across it.
            let across = (r - dir.scale(r.dot(dir))).normalize();
            let mut dv = across.scale(strength * p * seglen * width * scale);
            if dv.length_sq() > max_v.sq() {
                dv = dv.normalize().scale(max_v);
            }
            for k in [i, i + 1] {
                if !((k == 0 && held[0]) || (k == n && held[1])) {
                    self.points[k].pending_velocity += dv;
                }
            }
        }
        self.wake();

        let max_force = self.params.max_force;
        if !(held[0] && held[1]) || max_force <= F::zero() || self.params.flags.contains(RopeFlags::NO_TEARS) {
            return None;
        }
        let load = pressure * strength * self.params.length * thickness / F::from_f32(n as f32) * F::two();
        if load <= max_force * F::from_f32(0.01) {
            return None;
        }
        let nearer = if self.points[n].position.distance_sq(center) < self.points[0].position.distance_sq(center) {
            RopeEnd::End
        } else {
            RopeEnd::Start
        };
        self.detach(nearer, load)
    }

    fn detach(&mut self, end: RopeEnd, impulse: F) -> Option<JointBroken<F>> {
        let k = end.index();
        let anchor = self.anchors[k]?;
        let n = self.segment_count();
        let (point, normal) = match end {
            RopeEnd::Start => (self.points[0].position, self.points[0].dir),
            RopeEnd::End => (self.points[n].position, self.points[n - 1].dir),
        };
        let event = JointBroken { end, entity: anchor.entity, part: anchor.part, point, normal, impulse };
        warn!("rope torn at {} part {}: impulse {:.3} over limit", anchor.entity, anchor.part, impulse);
        self.anchors[k] = None;
        self.anchor_bodies[k] = None;
        self.strained = false;
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aabb::Aabb;
    use crate::check_part::gather;
    use crate::config::RopeParams;
    use crate::point::{Anchor, AnchorSpec, ChainPoint};
    use crate::quat::Pose;
    use crate::scene::Scene;
    use crate::shapes::Sphere;
    use crate::strain::refresh_vertex_dirs;

    fn end(arena: &mut thunderdome::Arena<()>, point: Vec3<f64>, mass: f64, velocity: Vec3<f64>) -> SpanEnd<f64> {
        let mut body = BodyState::at_rest(point);
        body.mass = mass;
        body.inertia = Vec3::splat(mass * 0.4);
        body.velocity = velocity;
        SpanEnd { entity: EntityId(arena.insert(())), part: 0, point, body }
    }

    fn straight_span(velocity: Vec3<f64>) -> RopeContact<f64> {
        let mut arena = thunderdome::Arena::new();
        let a = end(&mut arena, Vec3::zero(), 0.0, Vec3::zero());
        let b = end(&mut arena, Vec3::new(2.0, 0.0, 0.0), 2.0, velocity);
        RopeContact {
            ends: [a, b],
            start_dir: Vec3::x_axis(),
            end_dir: Vec3::x_axis(),
            wraps: Vec::new(),
            tension_ratio: 1.0,
            effective_mass: 2.0,
            max_impulse: 0.5,
            stretchy: false,
            sag_velocity: 0.0,
            impulse: 0.0,
        }
    }

    #[test]
    fn closing_speed_sign() {
        assert!(straight_span(Vec3::new(1.0, 0.0, 0.0)).closing_speed() < 0.0);
        assert!(straight_span(Vec3::new(-1.0, 0.0, 0.0)).closing_speed() > 0.0);
    }

    #[test]
    fn tension_solver_only_pulls() {
        let mut spans = vec![straight_span(Vec3::new(1.5, 0.0, 0.0)), straight_span(Vec3::new(-1.0, 0.0, 0.0))];
        RigidSolver::resolve(&mut TensionSolver, &mut spans, 0.02);
        assert!((spans[0].impulse - 3.0).abs() < 1e-12);
        assert_eq!(spans[1].impulse, 0.0);
    }

    #[test]
    fn stretchy_spans_clamp_instead_of_tearing() {
        let mut spans = vec![straight_span(Vec3::new(1.5, 0.0, 0.0))];
        spans[0].stretchy = true;
        RigidSolver::resolve(&mut TensionSolver, &mut spans, 0.02);
        assert_eq!(spans[0].impulse, 0.5);
    }

    /// A taut rope between static hooks over a loose pulley wheel of mass 2.
    fn pulley_spans(wrap_velocity: Vec3<f64>) -> Vec<RopeContact<f64>> {
        let mut scene = Scene::new();
        let wheel = Vec3::new(0.0, 0.0, -0.5);
        scene.add_body(Pose::from_position(wheel), 2.0, Sphere::new(0.8));
        let ends = [Vec3::new(-2.0, 0.0, 0.0), Vec3::new(2.0, 0.0, 0.0)];
        let mut state = RopeState::new(RopeParams::new().with_length(4.0).with_friction_pull(0.5));
        state.points = ends.iter().map(|&p| ChainPoint::new(p)).collect();
        for (k, &at) in ends.iter().enumerate() {
            let entity = scene.add_static(Pose::from_position(at), Sphere::new(0.05));
            state.anchors[k] = Some(Anchor::new(AnchorSpec { entity, part: 0, point: at }, Pose::from_position(at)));
            state.anchor_bodies[k] = Some(BodyState::at_rest(at));
        }
        state.strained = true;

        let mut scratch = Vec::new();
        let bounds = Aabb::new(Vec3::new(-2.0, -0.1, -0.1), Vec3::new(2.0, 0.1, 0.4));
        let parts = gather(&scene, &bounds, &state.params, &state.anchors, &mut scratch);
        assert_eq!(parts.len(), 1);

        let top = Vec3::new(0.0, 0.0, 0.31);
        let mut fine = vec![SubVertex::new(ends[0]), SubVertex::new(top), SubVertex::new(ends[1])];
        fine[1].contact = Some(parts[0].contact(0, Vec3::new(0.0, 0.0, 0.3), Vec3::z_axis(), 0.5, Default::default()));
        fine[1].velocity = wrap_velocity;
        refresh_vertex_dirs(&mut fine);
        state.register_contacts(&fine, &parts, 0.02)
    }

    #[test]
    fn wrapped_span_loads_the_pulley() {
        let spans = pulley_spans(Vec3::zero());
        assert_eq!(spans.len(), 1);
        let span = &spans[0];
        assert_eq!(span.wraps.len(), 1);
        // Nothing slides, so no friction drop across the wrap.
        assert!((span.tension_ratio - 1.0).abs() < 1e-9);
        let wrap = &span.wraps[0];
        assert!(wrap.jacobian.z < 0.0);
        assert!(wrap.impulse.z < 0.0, "the rope presses the wheel down, got {:?}", wrap.impulse);
        assert!(span.effective_mass > 0.0);
    }

    #[test]
    fn sliding_over_a_wrap_drops_tension() {
        let spans = pulley_spans(Vec3::new(-1.0, 0.0, 0.0));
        assert_eq!(spans.len(), 1);
        let ratio = spans[0].tension_ratio;
        assert!(ratio > 0.8 && ratio < 0.9, "capstan ratio {}", ratio);
    }
}
