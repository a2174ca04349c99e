//! Persistent per-segment contacts for the coarse chain.
//!
//! Each segment keeps the contact it had last tick while the gap stays small
//! and the surface normal stays put. Otherwise the segment is searched
//! against every check-part: primitives push the segment end out as a
//! sphere, everything else rotates the segment about its start until the
//! end clears the surface.

use crate::check_part::CheckPart;
use crate::constraint::{refresh_dirs, Sweep};
use crate::float::Float;
use crate::geometry::Unprojection;
use crate::rope::RopeState;
use crate::vec::{Vec as _, Vec3};
use log::trace;

/// Contacts with a smaller fraction along the segment are searched again
/// on short chains.
const FULL_CHECK_T: f32 = 0.1;
/// Short chains re-search contacts near the segment start.
const FULL_CHECK_MAX_SEGMENTS: usize = 8;
/// `cos^2` of the largest normal change a kept contact tolerates.
const NORMAL_DRIFT_COS2: f32 = 0.75 * 0.75;
/// Gain turning a gap error into a separation velocity.
const GAP_GAIN: f32 = 10.0;

impl<F: Float> RopeState<F> {
    /// Validate or search contacts for every coarse segment, walking from
    /// `forward ? start : end`. Segment ends may be rotated out of
    /// penetration. Returns the number of segments in contact.
    pub(crate) fn check_collisions(&mut self, parts: &[CheckPart<'_, F>], forward: bool) -> usize {
        let n = self.segment_count();
        if n == 0 {
            return 0;
        }
        let seglen = self.segment_length();
        let inv_seglen = if seglen > F::zero() { F::one() / seglen } else { F::zero() };
        let hinge = self.params.hinge_axis;
        let joint_limited = self.params.joint_limit > F::from_f32(1e-4);
        let unproject_limit = self.params.unprojection_limit + if joint_limited { F::from_f32(100.0) } else { F::zero() };
        let full_check = F::from_f32(FULL_CHECK_T) + if hinge.is_some() { F::from_f32(100.0) } else { F::zero() };
        let no_coll = self.params.no_collision_distance;
        let held = [self.anchors[0].is_some(), self.anchors[1].is_some()];
        let movable = |i: usize| !((i == 0 && held[0]) || (i == n && held[1]));
        let sweep = Sweep::new(forward, n);
        let gain = F::from_f32(GAP_GAIN);

        for step in 0..n {
            let (from, to) = sweep.pair(step);
            let seg = from.min(to);
            let thickness = self.params.thickness.get(seg);
            let line_dist = thickness * F::from_f32(0.1);
            self.points[seg].separation_velocity = F::zero();

            // Validate the contact carried over from last tick.
            if let Some(mut c) = self.points[seg].contact {
                let a = self.points[from].position;
                let b = self.points[to].position;
                let start = a + (b - a).scale(if step == 0 { no_coll } else { F::zero() });
                let closest = if c.recheck {
                    None
                } else {
                    parts.get(c.check_part).and_then(|cp| cp.closest_point(&mut c.feature, b, start))
                };
                let kept = closest.and_then(|cl| {
                    let gap = cl.on_segment - cl.on_geometry;
                    let dist2 = gap.length_sq();
                    let along = gap.dot(c.normal);
                    let keep = dist2 < (line_dist * F::two()).sq()
                        && along > F::zero()
                        && along * along > dist2 * F::from_f32(NORMAL_DRIFT_COS2);
                    keep.then_some((cl, gap, dist2, along))
                });
                match kept {
                    Some((cl, gap, dist2, along)) => {
                        let normal = gap.normalize_or(c.normal);
                        let p0 = self.points[seg].position;
                        c.t = ((cl.on_segment - p0).length() * inv_seglen).clamp(F::zero(), F::one());
                        let mut vreq = (line_dist - along) * gain;
                        if dist2 < line_dist.sq() {
                            // Too close: rotate the segment to restore the gap.
                            let from_t = if forward { c.t } else { F::one() - c.t };
                            let (pivot, moved, t) = if from_t < F::from_f32(0.1) && step > 0 {
                                (sweep.pair(step - 1).0, from, from_t + F::one())
                            } else {
                                (from, to, from_t)
                            };
                            if movable(moved) && seglen > F::zero() {
                                let pivot_pos = self.points[pivot].position;
                                let arm = self.points[moved].position - pivot_pos;
                                let axis = arm.cross(normal).normalize();
                                let angle = (line_dist - dist2.sqrt()) / (t.max(F::from_f32(0.25)) * seglen);
                                if axis.length_sq() > F::zero() {
                                    self.points[moved].position = pivot_pos + arm.rotated(axis, angle);
                                }
                            }
                            vreq = F::zero();
                        }
                        self.points[seg].separation_velocity = vreq;
                        c.normal = normal;
                        c.point = cl.on_geometry;
                        if let Some(cp) = parts.get(c.check_part) {
                            c.velocity = cp.point_velocity(cl.on_geometry);
                        }
                        self.points[seg].contact = Some(c);
                    }
                    None => {
                        if !c.recheck {
                            trace!("segment {} lost contact with {}", seg, c.entity);
                        }
                        self.points[seg].contact = None;
                    }
                }
            }

            let search = match &self.points[seg].contact {
                None => true,
                Some(c) => c.t < full_check && n <= FULL_CHECK_MAX_SEGMENTS,
            };
            if search {
                self.search_segment(parts, step, sweep, thickness, line_dist, unproject_limit, movable(to));
            }

            if let Some(c) = self.points[seg].contact.as_mut() {
                if (c.normal.length_sq() - F::one()).abs() > F::from_f32(0.01) {
                    c.normal = c.normal.normalize_or(Vec3::z_axis());
                }
            }
        }

        refresh_dirs(&mut self.points);
        let count = self.points.iter().filter(|p| p.contact.is_some()).count();
        self.has_contacts = count > 0;
        count
    }

    /// Fresh query of one segment against all parts.
    #[allow(clippy::too_many_arguments)]
    fn search_segment(
        &mut self,
        parts: &[CheckPart<'_, F>],
        step: usize,
        sweep: Sweep,
        thickness: F,
        line_dist: F,
        unproject_limit: F,
        end_movable: bool,
    ) {
        let (from, to) = sweep.pair(step);
        let seg = from.min(to);
        let seglen = self.segment_length();
        let hinge = self.params.hinge_axis;
        let gain = F::from_f32(GAP_GAIN);
        let margin = if step == 0 { self.params.no_collision_distance } else { F::zero() };
        let mut accumulated = false;

        for (index, cp) in parts.iter().enumerate() {
            let a = self.points[from].position;
            if !cp.near_segment(a, self.points[to].position, thickness) {
                continue;
            }

            // Primitives: treat the segment end as a sphere.
            if hinge.is_none() && cp.is_primitive() {
                let b = self.points[to].position;
                if let Some(sc) = cp.unproject_sphere(b, thickness, thickness) {
                    let normal = match (&self.points[seg].contact, accumulated) {
                        (Some(prev), true) => prev.normal + sc.normal,
                        _ => sc.normal,
                    };
                    accumulated = true;
                    let d = (b - sc.point).dot(sc.normal);
                    if d < thickness {
                        if d < F::zero() && end_movable {
                            self.points[to].position = sc.point;
                        }
                        let p = &mut self.points[seg];
                        p.separation_velocity = p.separation_velocity.max((thickness - d.max(F::zero())) * gain);
                    }
                    let end = self.points[to].position;
                    let t = if sweep.forward { F::one() } else { F::zero() };
                    let mut c = cp.contact(index, sc.point, normal, t, sc.feature);
                    c.velocity = cp.point_velocity(end);
                    c.recheck = true;
                    self.points[seg].contact = Some(c);
                }
            }

            // Everything: rotate the segment about its start out of the hit.
            let a = self.points[from].position;
            let b = self.points[to].position;
            let origin = a + (b - a).scale(margin);
            let mode = Unprojection::Rotational { center: a, hinge };
            let Some(gc) = cp.intersect(origin, b, mode) else {
                continue;
            };
            let Some((axis, angle)) = gc.rotation else {
                continue;
            };
            let recheck = angle > unproject_limit;
            let angle = angle.min(unproject_limit);
            let normal = gc.normal.rotated(axis, angle);
            let along = (gc.point - a).length();
            let t = if sweep.forward { along } else { seglen - along };
            let t = if seglen > F::zero() { (t / seglen).clamp(F::zero(), F::one()) } else { F::zero() };
            if end_movable {
                self.points[to].position = a + (b - a).rotated(axis, angle) + normal.scale(line_dist);
            }
            let end = self.points[to].position;
            let mut c = cp.contact(index, gc.point, normal, t, gc.feature);
            c.velocity = cp.point_velocity(end);
            c.recheck = recheck;
            self.points[seg].contact = Some(c);
            accumulated = true;
        }
    }
}
