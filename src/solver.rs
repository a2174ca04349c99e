//! Velocity solver: inextensibility plus contact non-penetration.
//!
//! A contact-free slack chain is solved exactly with one tridiagonal
//! elimination. Contacts or sub-vertices switch to Gauss-Seidel relaxation
//! with Coulomb friction. Either way the result is clamped so the solve
//! never adds kinetic energy.

use crate::config::RopeFlags;
use crate::float::Float;
use crate::point::{ChainPoint, SubVertex, SubVertexBuffer};
use crate::rope::RopeState;
use crate::vec::{Vec as _, Vec3};
use log::trace;

/// Convergence threshold of the fine relaxation, in velocity units.
const FINE_ACCURACY: f32 = 0.005;

/// Outcome of one velocity solve.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct SolveStats<F: Float> {
    /// Constraint updates spent.
    pub iterations: usize,
    /// Whether the energy clamp had to rescale velocities.
    pub clamped: bool,
    /// Sum of squared point speeds after the solve.
    pub energy: F,
}

/// Sum of squared speeds.
pub fn kinetic_energy<F: Float>(points: &[ChainPoint<F>]) -> F {
    points.iter().fold(F::zero(), |e, p| e + p.velocity.length_sq())
}

/// Rescale velocities down to `before` when the solve added energy.
/// Returns the post-clamp energy and whether a rescale happened.
pub fn clamp_energy<F: Float>(points: &mut [ChainPoint<F>], before: F, min_energy: F) -> (F, bool) {
    let after = kinetic_energy(points);
    if after > before && after > min_energy {
        let k = (before / after).sqrt();
        for p in points.iter_mut() {
            p.velocity = p.velocity.scale(k);
        }
        trace!("energy clamp {:.4} -> {:.4} (k = {:.4})", after, before, k);
        (before, true)
    } else {
        (after, false)
    }
}

/// Exact solve of the segment-direction velocity constraints of a free
/// chain. `held` pins the end velocities.
pub fn solve_tridiagonal<F: Float>(points: &mut [ChainPoint<F>], held: [bool; 2]) {
    let n = points.len().saturating_sub(1);
    if n == 0 {
        return;
    }
    let tiny = F::from_f32(1e-10);
    // a * lambda[i-1] + b * lambda[i] + c * lambda[i+1] = d
    let mut c = vec![F::zero(); n];
    let mut d = vec![F::zero(); n];
    let mut prev_c = F::zero();
    let mut prev_d = F::zero();
    for i in 0..n {
        let dir = points[i].dir;
        let a = if i > 0 { points[i - 1].dir.dot(dir) } else { F::zero() };
        let ci = if i + 1 < n { points[i + 1].dir.dot(dir) } else { F::zero() };
        let mut b = -F::two();
        if i == 0 && held[0] {
            b = b + F::one();
        }
        if i + 1 == n && held[1] {
            b = b + F::one();
        }
        let di = (points[i].velocity - points[i + 1].velocity).dot(dir);
        let denom = b - a * prev_c;
        let k = if denom.abs() > tiny { F::one() / denom } else { F::zero() };
        c[i] = ci * k;
        d[i] = (di - a * prev_d) * k;
        prev_c = c[i];
        prev_d = d[i];
    }
    // Back substitution; `d` now holds the segment impulses.
    for i in (0..n - 1).rev() {
        d[i] = d[i] - c[i] * d[i + 1];
    }
    for i in 0..n {
        let dv = points[i].dir.scale(d[i]);
        if !(i == 0 && held[0]) {
            points[i].velocity += dv;
        }
        if !(i + 1 == n && held[1]) {
            points[i + 1].velocity -= dv;
        }
    }
}

/// Resolve one contact's relative velocity `dp` against `vreq` with
/// Coulomb friction. `accumulated` carries the friction budget across
/// iterations. Returns the velocity change to remove.
fn friction_response<F: Float>(dp: Vec3<F>, n: Vec3<F>, vrel: F, vreq: F, friction: F, accumulated: &mut F) -> Vec3<F> {
    if friction <= F::from_f32(0.01) {
        return n.scale(vrel - vreq);
    }
    let mut dp = dp;
    *accumulated = *accumulated + (vreq - vrel) * friction;
    let tangential = (dp.length_sq() - vrel * vrel).max(F::from_f32(1e-4)).sqrt();
    *accumulated = *accumulated - tangential;
    if (*accumulated).max(F::from_f32(1e-10) - vrel.abs()) < F::zero() {
        // Friction cannot stop the slide; keep the part it cannot arrest.
        dp += (dp - n.scale(vrel)).scale(*accumulated / tangential);
        *accumulated = F::zero();
    }
    dp - n.scale(vreq)
}

/// Gauss-Seidel relaxation over coarse segments with contacts. Returns the
/// number of constraint updates spent.
pub(crate) fn relax_coarse<F: Float>(points: &mut [ChainPoint<F>], held: [bool; 2], seglen: F, friction: F, budget: usize) -> usize {
    let n = points.len().saturating_sub(1);
    if n == 0 {
        return 0;
    }
    let tol = seglen * F::from_f32(0.005);
    let weight = |i: usize| if (i == 0 && held[0]) || (i == n && held[1]) { F::zero() } else { F::one() };
    for p in points.iter_mut() {
        p.impulse = F::zero();
    }
    let mut remaining = budget as isize;
    let mut last_residual: Option<F> = None;
    let mut stalls = 0;
    loop {
        let mut bounced = 0isize;
        let mut residual = F::zero();
        for i in 0..n {
            remaining -= 1;
            let dir = points[i].dir;
            let vrel = (points[i + 1].velocity - points[i].velocity).dot(dir);
            if vrel.abs() > tol {
                let half = vrel * F::half();
                points[i].velocity += dir.scale(half * weight(i));
                points[i + 1].velocity -= dir.scale(half * weight(i + 1));
                bounced += 1;
                residual = residual + vrel.abs();
            }
            let Some(c) = points[i].contact else {
                continue;
            };
            let t = c.t;
            let dp = points[i].velocity.scale(F::one() - t) + points[i + 1].velocity.scale(t) - c.velocity;
            let vrel = dp.dot(c.normal);
            let vreq = points[i].separation_velocity;
            if vrel < vreq - tol {
                let mut acc = points[i].impulse;
                let dv = friction_response(dp, c.normal, vrel, vreq, friction, &mut acc);
                points[i].impulse = acc;
                points[i].velocity -= dv.scale((F::one() - t) * weight(i));
                points[i + 1].velocity -= dv.scale(t * weight(i + 1));
                bounced += 4;
                residual = residual + (vreq - vrel);
            }
        }
        remaining -= bounced;
        if bounced == 0 || remaining <= 0 {
            break;
        }
        match last_residual {
            Some(last) if residual >= last => {
                stalls += 1;
                if stalls >= 2 {
                    break;
                }
            }
            _ => stalls = 0,
        }
        last_residual = Some(residual);
    }
    (budget as isize - remaining).max(0) as usize
}

/// Gauss-Seidel relaxation over the fine vertex list. `stretch[i]` is the
/// required relative velocity of pair `i` along its direction.
pub(crate) fn relax_fine<F: Float>(
    vertices: &mut [SubVertex<F>],
    stretch: &[F],
    held: [bool; 2],
    friction: F,
    budget: usize,
) -> usize {
    let m = vertices.len();
    // A single pair held at both ends has nothing free to move.
    if m < 2 || (m == 2 && held[0] && held[1]) {
        return 0;
    }
    let e = F::from_f32(FINE_ACCURACY);
    let first = if held[0] { F::zero() } else { F::half() };
    let last = if held[1] { F::one() } else { F::half() };
    let share = |i: usize| {
        if i == 0 {
            first
        } else if i + 2 == m {
            last
        } else {
            F::half()
        }
    };
    for v in vertices.iter_mut() {
        v.impulse = F::zero();
    }
    let mut remaining = budget as isize;
    loop {
        let mut bounced = 0isize;
        for i in 0..m {
            remaining -= 1;
            if i + 1 < m {
                let dir = vertices[i].dir;
                let vrel = (vertices[i + 1].velocity - vertices[i].velocity).dot(dir) - stretch[i];
                if vrel.abs() > e {
                    let k = share(i);
                    vertices[i].velocity += dir.scale(vrel * k);
                    vertices[i + 1].velocity -= dir.scale(vrel * (F::one() - k));
                    bounced += 1;
                }
            }
            let anchored = (i == 0 && held[0]) || (i + 1 == m && held[1]);
            let Some(c) = vertices[i].contact else {
                continue;
            };
            if anchored {
                continue;
            }
            let dp = vertices[i].velocity - c.velocity;
            let vrel = dp.dot(c.normal);
            if vrel < -e {
                let mut acc = vertices[i].impulse;
                let dv = friction_response(dp, c.normal, vrel, F::zero(), friction, &mut acc);
                vertices[i].impulse = acc;
                vertices[i].velocity -= dv;
                bounced += 4;
            }
        }
        remaining -= bounced;
        if bounced == 0 || remaining <= 0 {
            break;
        }
    }
    (budget as isize - remaining).max(0) as usize
}

impl<F: Float> RopeState<F> {
    /// Resolve velocities after contacts are known.
    pub(crate) fn solve_velocities(&mut self, vertices: &mut SubVertexBuffer<F>, dt: F) -> SolveStats<F> {
        let n = self.segment_count();
        let subdivide = self.params.flags.contains(RopeFlags::SUBDIVIDE);
        let length = self.params.length;
        if length <= F::zero() && !subdivide {
            for p in self.points.iter_mut() {
                p.velocity = Vec3::zero();
            }
            return SolveStats::default();
        }
        let held = [self.anchors[0].is_some(), self.anchors[1].is_some()];
        let seglen = self.segment_length();
        let budget = self.params.max_iterations;
        let mut before = kinetic_energy(&self.points);
        let mut iterations = 0;

        if !subdivide && self.has_contacts {
            iterations = relax_coarse(&mut self.points, held, seglen, self.params.friction, budget);
        } else if !subdivide {
            solve_tridiagonal(&mut self.points, held);
            iterations = n;
        } else if !self.strained {
            let fine = vertices.current_mut();
            if fine.len() >= 2 {
                let path = fine.windows(2).fold(F::zero(), |acc, w| acc + w[1].position.distance(w[0].position));
                let total = if length > F::zero() { length } else { path };
                let mut stretch = vec![F::zero(); fine.len()];
                if total > F::zero() {
                    for i in 0..n {
                        let (v0, v1) = (self.points[i].first_vertex, self.points[i + 1].first_vertex.min(fine.len() - 1));
                        let k: F = (v0..v1).fold(F::zero(), |acc, j| acc + (fine[j + 1].position - fine[j].position).dot(fine[j].dir));
                        let ks = self.params.stiffness.get(i) / total;
                        let rate = ks * (length - (total * F::from_f32(1.5)).min(k * F::from_f32(n as f32)));
                        let chord = (self.points[i + 1].position - self.points[i].position).dot(self.points[i].dir);
                        before = before + (rate * chord).sq() + self.points[i].velocity.length() * rate.abs() * F::two();
                        for j in v0..v1 {
                            stretch[j] = (fine[j + 1].position - fine[j].position).dot(fine[j].dir) * rate;
                        }
                    }
                }
                iterations = relax_fine(fine, &stretch, held, self.params.friction, budget);
                for p in self.points.iter_mut() {
                    if let Some(v) = fine.get(p.first_vertex) {
                        p.velocity = v.velocity;
                    }
                }
            }
        }

        let (energy, clamped) = if length > F::zero() || vertices.current().is_empty() {
            clamp_energy(&mut self.points, before, self.params.min_energy)
        } else {
            let moved = self.points.iter().fold(F::zero(), |e, p| e + (p.position - p.previous).length_sq());
            let e = if dt > F::zero() { moved / (dt * dt) } else { F::zero() };
            (e, false)
        };
        trace!("solver: {} updates, energy {:.5}, clamped {}", iterations, energy, clamped);
        SolveStats { iterations, clamped, energy }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::Contact;

    fn straight_chain(n: usize) -> Vec<ChainPoint<f64>> {
        (0..=n)
            .map(|i| {
                let mut p = ChainPoint::new(Vec3::new(i as f64, 0.0, 0.0));
                p.dir = Vec3::x_axis();
                p
            })
            .collect()
    }

    fn along_rates(points: &[ChainPoint<f64>]) -> Vec<f64> {
        points.windows(2).map(|w| (w[1].velocity - w[0].velocity).dot(w[0].dir)).collect()
    }

    #[test]
    fn tridiagonal_removes_stretch_velocity() {
        let mut pts = straight_chain(4);
        pts[0].velocity = Vec3::new(-1.0, 0.0, 0.0);
        pts[4].velocity = Vec3::new(2.0, 0.5, 0.0);
        pts[2].dir = Vec3::new(1.0, 0.1, 0.0).normalize();
        solve_tridiagonal(&mut pts, [false, false]);
        for rate in along_rates(&pts) {
            assert!(rate.abs() < 1e-9, "segment still stretching at {}", rate);
        }
    }

    #[test]
    fn tridiagonal_keeps_held_ends() {
        let mut pts = straight_chain(3);
        pts[1].velocity = Vec3::new(1.0, 1.0, 0.0);
        pts[2].velocity = Vec3::new(-1.0, 0.0, 0.0);
        solve_tridiagonal(&mut pts, [true, true]);
        assert_eq!(pts[0].velocity, Vec3::zero());
        assert_eq!(pts[3].velocity, Vec3::zero());
        for rate in along_rates(&pts) {
            assert!(rate.abs() < 1e-9);
        }
    }

    #[test]
    fn coarse_relaxation_respects_contact_normal() {
        let mut pts = straight_chain(2);
        let mut arena = thunderdome::Arena::new();
        let entity = crate::world::EntityId(arena.insert(()));
        pts[0].contact = Some(Contact {
            entity,
            part: 0,
            normal: Vec3::z_axis(),
            point: Vec3::new(0.5, 0.0, 0.0),
            t: 0.5,
            velocity: Vec3::zero(),
            feature: Default::default(),
            recheck: false,
            check_part: 0,
        });
        for p in pts.iter_mut() {
            p.velocity = Vec3::new(0.0, 0.0, -1.0);
        }
        relax_coarse(&mut pts, [false, false], 1.0, 0.0, 650);
        let mid = pts[0].velocity.scale(0.5) + pts[1].velocity.scale(0.5);
        assert!(mid.z > -0.01, "contact point still sinking: {:?}", mid);
    }

    #[test]
    fn divergent_relaxation_is_energy_clamped() {
        // A contact demanding a large separation speed would inject energy.
        let mut pts = straight_chain(2);
        let mut arena = thunderdome::Arena::new();
        let entity = crate::world::EntityId(arena.insert(()));
        pts[0].contact = Some(Contact {
            entity,
            part: 0,
            normal: Vec3::z_axis(),
            point: Vec3::new(0.5, 0.0, 0.0),
            t: 0.5,
            velocity: Vec3::zero(),
            feature: Default::default(),
            recheck: false,
            check_part: 0,
        });
        pts[0].separation_velocity = 50.0;
        pts[1].velocity = Vec3::new(0.0, 0.1, 0.0);
        let before = kinetic_energy(&pts);
        relax_coarse(&mut pts, [false, false], 1.0, 0.5, 650);
        assert!(kinetic_energy(&pts) > before);
        let (after, clamped) = clamp_energy(&mut pts, before, 1e-6);
        assert!(clamped);
        assert!(after <= before + 1e-12);
        assert!(kinetic_energy(&pts) <= before * (1.0 + 1e-9));
    }

    #[test]
    fn fine_relaxation_applies_stretch_rate() {
        let mut verts: Vec<SubVertex<f64>> = (0..3)
            .map(|i| {
                let mut v = SubVertex::new(Vec3::new(i as f64, 0.0, 0.0));
                v.dir = Vec3::x_axis();
                v
            })
            .collect();
        let stretch = [-0.2, -0.2, 0.0];
        relax_fine(&mut verts, &stretch, [true, false], 0.0, 650);
        assert_eq!(verts[0].velocity, Vec3::zero());
        let rate = (verts[1].velocity - verts[0].velocity).x;
        assert!((rate + 0.2).abs() < 0.01, "pair 0 rate {}", rate);
    }

    #[test]
    fn fine_relaxation_keeps_a_held_pair_fixed() {
        let mut verts: Vec<SubVertex<f64>> = (0..2)
            .map(|i| {
                let mut v = SubVertex::new(Vec3::new(i as f64, 0.0, 0.0));
                v.dir = Vec3::x_axis();
                v
            })
            .collect();
        verts[1].velocity = Vec3::new(0.5, 0.0, 0.0);
        assert_eq!(relax_fine(&mut verts, &[-0.2, 0.0], [true, true], 0.0, 650), 0);
        assert_eq!(verts[0].velocity, Vec3::zero());
        assert_eq!(verts[1].velocity, Vec3::new(0.5, 0.0, 0.0));
    }
}
