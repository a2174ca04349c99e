//! Segment-length enforcement after integration.
//!
//! Chains held at most at one end are re-projected outward from the held
//! end, which is exact. Chains held at both ends are relaxed with
//! alternating sweeps that never move the anchors.

use crate::config::{PoseMode, RopeFlags};
use crate::float::Float;
use crate::point::{ChainPoint, SubVertex, SubVertexBuffer};
use crate::rope::RopeState;
use crate::vec::{Vec as _, Vec3};

/// Walk order of a sweep. `forward` goes from point 0 to point n.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Sweep {
    pub forward: bool,
    pub n: usize,
}

impl Sweep {
    pub fn new(forward: bool, n: usize) -> Self {
        Sweep { forward, n }
    }

    /// `(from, to)` point pair of the `step`-th segment visited.
    pub fn pair(&self, step: usize) -> (usize, usize) {
        if self.forward {
            (step, step + 1)
        } else {
            (self.n - step, self.n - step - 1)
        }
    }

    /// Direction sign mapping sweep order onto chain order.
    pub fn sign<F: Float>(&self) -> F {
        if self.forward {
            F::one()
        } else {
            -F::one()
        }
    }
}

fn set_segment_dir<F: Float>(points: &mut [ChainPoint<F>], from: usize, to: usize, dir: Vec3<F>) {
    if from < to {
        points[from].dir = dir;
    } else {
        points[to].dir = -dir;
    }
}

/// Unit direction `from -> to`, falling back to the cached segment direction.
fn sweep_dir<F: Float>(points: &[ChainPoint<F>], from: usize, to: usize) -> Vec3<F> {
    let cached = if from < to { points[from].dir } else { -points[to].dir };
    (points[to].position - points[from].position).normalize_or(cached)
}

/// Re-project each point at `length(segment)` from its predecessor.
pub(crate) fn project_sweep<F: Float>(points: &mut [ChainPoint<F>], sweep: Sweep, length: impl Fn(usize) -> F) {
    for step in 0..sweep.n {
        let (from, to) = sweep.pair(step);
        let dir = sweep_dir(points, from, to);
        set_segment_dir(points, from, to, dir);
        points[to].position = points[from].position + dir.scale(length(from.min(to)));
    }
}

/// Joint-limited re-projection: bend angles may deviate from the target
/// pose by at most the (decaying) joint limit.
pub(crate) fn joint_limited_sweep<F: Float>(
    points: &mut [ChainPoint<F>],
    sweep: Sweep,
    joint_limit: F,
    joint_limit_decay: F,
    hinge: Option<Vec3<F>>,
) {
    let tiny = F::from_f32(1e-20);
    let plane = hinge.map(|h| h.normalize()).filter(|h| h.length_sq() > F::zero());
    let project = |d: Vec3<F>| match plane {
        Some(n) => (d - n.scale(n.dot(d))).normalize_or(d),
        None => d,
    };

    let (first, second) = sweep.pair(0);
    let target0 = points[second].target - points[first].target;
    let len0 = target0.length();
    let mut dir = sweep_dir(points, first, second);
    let axis = dir.cross(target0);
    let a = axis.length();
    let angle = F::atan2(a, dir.dot(target0));
    if angle > joint_limit && a > tiny {
        dir = dir.rotated(axis.scale(F::one() / a), angle - joint_limit);
    }
    dir = project(dir);
    set_segment_dir(points, first, second, dir);
    points[second].position = points[first].position + dir.scale(len0);

    let decay = joint_limit_decay / F::from_f32(sweep.n.max(1) as f32);
    for step in 1..sweep.n {
        let (from, to) = sweep.pair(step);
        let (prev, _) = sweep.pair(step - 1);
        let len = (points[to].target - points[from].target).length();
        let mut dir = sweep_dir(points, from, to);
        let src0 = points[from].position - points[prev].position;
        let dst0 = points[from].target - points[prev].target;
        let src1 = points[to].position - points[from].position;
        let dst1 = points[to].target - points[from].target;
        let axis = src0.cross(src1);
        let a = axis.length();
        let angle_src = F::atan2(a, src0.dot(src1));
        let angle_dst = F::atan2(dst0.cross(dst1).length(), dst0.dot(dst1));
        let limit = joint_limit * (F::one() - decay * F::from_f32(step as f32));
        let in_contact = points[from.min(to)].contact.is_some();
        let excess = angle_dst - angle_src;
        if excess.abs() > limit && a > tiny && (!in_contact || plane.is_some()) {
            dir = dir.rotated(axis.scale(F::one() / a), excess - limit * excess.signum());
        }
        dir = project(dir);
        set_segment_dir(points, from, to, dir);
        points[to].position = points[from].position + dir.scale(len);
    }
}

/// One-over-sqrt correction factor taking `len2` to `seglen2`.
fn length_correction<F: Float>(len2: F, seglen: F, seglen2: F) -> F {
    let diff = (len2 - seglen2).abs();
    if diff < seglen2 * F::from_f32(0.1) {
        // Three terms of the 1/sqrt(1 + x) series.
        let k = (len2 - seglen2) / seglen2;
        F::one() + (F::from_f32(-0.5) + (F::from_f32(0.375) - F::from_f32(0.3125) * k) * k) * k
    } else {
        seglen / len2.sqrt()
    }
}

/// Alternating sweeps between two fixed ends. `movable[i]` gates which
/// points may be corrected. Returns the number of corrections made.
pub(crate) fn relax_between_anchors<F: Float>(
    points: &mut [ChainPoint<F>],
    movable: &[bool],
    seglen: F,
    mut budget: usize,
    start_forward: bool,
) -> usize {
    let n = points.len() - 1;
    if n < 2 {
        return 0;
    }
    let seglen2 = seglen * seglen;
    let tolerance = seglen2 * F::from_f32(0.01);
    let mut forward = start_forward;
    let mut total = 0;
    loop {
        let sweep = Sweep::new(forward, n);
        let mut corrected = false;
        // The last pair of a sweep would move the far anchor; skip it.
        for step in 0..n - 1 {
            let (from, to) = sweep.pair(step);
            let d = points[to].position - points[from].position;
            let len2 = d.length_sq();
            if movable[to] && (len2 - seglen2).abs() > tolerance {
                let k = length_correction(len2, seglen, seglen2);
                points[to].position = points[from].position + d.scale(k);
                budget = budget.saturating_sub(1);
                total += 1;
                corrected = true;
            }
        }
        forward = !forward;
        if !corrected || budget == 0 {
            break;
        }
    }
    refresh_dirs(points);
    total
}

/// Recompute every segment direction from positions.
pub(crate) fn refresh_dirs<F: Float>(points: &mut [ChainPoint<F>]) {
    let n = points.len().saturating_sub(1);
    for i in 0..n {
        let cached = points[i].dir;
        points[i].dir = (points[i + 1].position - points[i].position).normalize_or(cached);
    }
    if n > 0 {
        points[n].dir = points[n - 1].dir;
    }
}

/// Place coarse points along the fine polyline, `seglen` apart, walking
/// from the held end. Returns false when the fine path is too short.
fn follow_fine_path<F: Float>(points: &mut [ChainPoint<F>], vertices: &[SubVertex<F>], seglen: F, forward: bool) -> bool {
    let n = points.len() - 1;
    let m = vertices.len();
    if m < 2 {
        return false;
    }
    let path: F = vertices.windows(2).fold(F::zero(), |acc, w| acc + w[1].position.distance(w[0].position));
    if path <= seglen * F::from_f32(n as f32) {
        return false;
    }
    let sweep = Sweep::new(forward, n);
    let mut j = if forward { 0 } else { m - 1 };
    let j_end = if forward { m - 1 } else { 0 };
    for step in 0..n {
        let (from, to) = sweep.pair(step);
        let mut remaining = seglen;
        let mut origin = points[from].position;
        while j != j_end {
            let next = if forward { j + 1 } else { j - 1 };
            let a = (vertices[next].position - origin).length();
            if remaining <= a {
                break;
            }
            remaining = remaining - a;
            origin = vertices[next].position;
            j = next;
        }
        if j == j_end {
            break;
        }
        let next = if forward { j + 1 } else { j - 1 };
        let target = origin + (vertices[next].position - origin).normalize().scale(remaining);
        let half = seglen * F::half();
        let p = &mut points[to];
        p.position = target;
        if p.previous.distance_sq(target) > half * half {
            p.previous = target + (p.previous - target).normalize().scale(half);
        }
        let dir = sweep_dir(points, from, to);
        set_segment_dir(points, from, to, dir);
    }
    true
}

impl<F: Float> RopeState<F> {
    /// Restore segment lengths after integration.
    pub(crate) fn enforce_constraints(&mut self, vertices: &mut SubVertexBuffer<F>, dt: F) {
        let n = self.segment_count();
        if n == 0 {
            return;
        }
        let seglen = self.segment_length();
        let subdivide = self.params.flags.contains(RopeFlags::SUBDIVIDE);
        let posed = self.params.pose_mode != PoseMode::Inactive && self.targets.len() == self.points.len();
        let held = [self.anchors[0].is_some(), self.anchors[1].is_some()];

        if !(held[0] && held[1]) {
            let forward = !(held[1] && !held[0]);
            if subdivide && self.has_contacts {
                if follow_fine_path(&mut self.points, vertices.current(), seglen * F::from_f32(1.05), forward) {
                    vertices.clear();
                }
                return;
            }
            let sweep = Sweep::new(forward, n);
            if !posed {
                project_sweep(&mut self.points, sweep, |_| seglen);
            } else if self.params.joint_limit <= F::zero() {
                let lengths: Vec<F> = (0..n).map(|i| self.points[i + 1].target.distance(self.points[i].target)).collect();
                project_sweep(&mut self.points, sweep, |i| lengths[i]);
            } else {
                joint_limited_sweep(
                    &mut self.points,
                    sweep,
                    self.params.joint_limit,
                    self.params.joint_limit_decay,
                    self.params.hinge_axis,
                );
            }
            let last = self.points[n - 1].dir;
            self.points[n].dir = last;
            return;
        }

        let relax = !subdivide
            || (self.params.max_iterations < n * n * 10 && !self.strained && self.params.length > F::zero());
        if !relax {
            return;
        }

        if posed && self.params.pose_mode == PoseMode::Bend && self.params.joint_limit > F::zero() {
            joint_limited_sweep(
                &mut self.points,
                Sweep::new(true, n - 1),
                self.params.joint_limit,
                self.params.joint_limit_decay,
                self.params.hinge_axis,
            );
        }

        let mut movable = vec![true; n + 1];
        movable[0] = false;
        movable[n] = false;
        let mut length = seglen;
        let fine = vertices.current();
        if subdivide && !fine.is_empty() {
            for i in 1..n {
                let v0 = self.points[i].first_vertex;
                movable[i] = v0 + 1 == self.points[i + 1].first_vertex && fine.get(v0).map_or(false, |v| v.contact.is_none());
            }
            let full: F = fine.windows(2).fold(F::zero(), |acc, w| acc + w[1].position.distance(w[0].position));
            let mut free = F::zero();
            let mut count = 0usize;
            for i in 0..n {
                if movable[i] || movable[i + 1] {
                    free = free + self.points[i + 1].position.distance(self.points[i].position);
                    count += 1;
                }
            }
            if count < 2 || full <= self.params.length {
                return;
            }
            length = (free + self.params.length - full) / F::from_f32(count as f32);
        }

        let scale = if dt > F::zero() { (dt / self.params.max_allowed_step).max(F::from_f32(0.2)) } else { F::one() };
        let budget = (scale * F::from_f32((n * n).min(self.params.max_iterations >> 2) as f32)).to_f32() as usize;
        relax_between_anchors(&mut self.points, &movable, length, budget.max(100), true);

        if subdivide {
            let fine = vertices.current_mut();
            for i in 0..n {
                let v0 = self.points[i].first_vertex;
                if let Some(v) = fine.get_mut(v0) {
                    v.position = self.points[i].position;
                }
            }
        }
    }
}
