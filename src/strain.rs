//! Sub-vertex tracking and the slack/strained state machine.
//!
//! Every tick a subdivided rope rebuilds its fine vertex list: each coarse
//! point is copied, and wrap points are inserted where a coarse segment cuts
//! through a collider. With both ends anchored the fine path then decides
//! whether the rope is strained: taut around locked wraps and long enough.
//! A strained rope redistributes its coarse points evenly along the wrapped
//! path and is handed to the rigid solver (see [`crate::coupling`]).

use crate::check_part::CheckPart;
use crate::config::PerSegment;
use crate::constraint::refresh_dirs;
use crate::float::Float;
use crate::point::{ChainPoint, SubVertex, SubVertexBuffer};
use crate::rope::RopeState;
use crate::vec::{Vec as _, Vec3};
use log::debug;

/// Path length, as a fraction of the rest length, at which a slack rope
/// becomes strained.
pub const STRAIN_ENTER: f32 = 0.99;
/// A strained rope goes slack again only below this fraction.
pub const STRAIN_EXIT: f32 = 0.988;
/// Wrap insertion passes allowed without a new vertex.
const MAX_IDLE_PASSES: usize = 3;

pub(crate) fn vertex_from<F: Float>(p: &ChainPoint<F>) -> SubVertex<F> {
    SubVertex {
        position: p.position,
        velocity: p.velocity,
        dir: p.dir,
        contact: p.contact,
        separation_velocity: F::zero(),
        impulse: F::zero(),
    }
}

/// Recompute fine directions; the last vertex keeps the previous one.
pub(crate) fn refresh_vertex_dirs<F: Float>(vertices: &mut [SubVertex<F>]) {
    let m = vertices.len();
    for i in 0..m.saturating_sub(1) {
        let cached = vertices[i].dir;
        vertices[i].dir = (vertices[i + 1].position - vertices[i].position).normalize_or(cached);
    }
    if m > 1 {
        vertices[m - 1].dir = vertices[m - 2].dir;
    }
}

/// Whether the contact at interior vertex `i` actually presses against the
/// bend there.
pub(crate) fn supports_bend<F: Float>(vertices: &[SubVertex<F>], i: usize) -> bool {
    if i == 0 || i + 1 >= vertices.len() {
        return false;
    }
    let Some(c) = &vertices[i].contact else {
        return false;
    };
    let bend = vertices[i - 1].dir - vertices[i].dir;
    let s = c.normal.dot(bend);
    s * s.abs() >= bend.length_sq() * F::from_f32(0.01)
}

/// Length of the path through supporting wraps, and whether every wrap
/// holds under `friction`.
pub(crate) fn wrapped_path<F: Float>(vertices: &[SubVertex<F>], friction: F) -> (F, bool) {
    let m = vertices.len();
    let mut path = F::zero();
    let mut locked = true;
    let mut i = 0;
    while i + 1 < m {
        let j = i;
        i += 1;
        while i + 1 < m && !supports_bend(vertices, i) {
            i += 1;
        }
        path = path + vertices[i].position.distance(vertices[j].position);
        if i + 1 >= m {
            break;
        }
        let bend = vertices[i - 1].dir - vertices[i].dir;
        if bend.length_sq() <= F::from_f32(0.09) {
            continue;
        }
        let Some(c) = &vertices[i].contact else {
            continue;
        };
        let axis = vertices[i - 1].dir.cross(vertices[i].dir);
        let mut n = c.normal;
        let mut a = axis.length_sq();
        if a > F::from_f32(0.04) {
            n -= axis.scale(n.dot(axis));
        } else {
            a = F::one();
        }
        let s = n.dot(bend);
        if s * s.abs() * (F::one() + friction * friction) < bend.length_sq() * n.length_sq() * a * a {
            locked = false;
        }
    }
    (path, locked)
}

impl<F: Float> RopeState<F> {
    /// One subdivided tick: surface snapping, wrap tracking, strain
    /// detection and redistribution. Returns whether the strained flag
    /// changed.
    pub(crate) fn step_subdivided(&mut self, vertices: &mut SubVertexBuffer<F>, parts: &[CheckPart<'_, F>]) -> bool {
        let was = self.strained;
        if let Some(islands) = self.subdivided_pass(vertices, parts) {
            let collapsed = islands < self.islands;
            self.islands = islands;
            if collapsed {
                // A wrap collapsed; rerun once from the redistributed points.
                for p in self.points.iter_mut() {
                    p.previous = p.position;
                }
                if let Some(islands) = self.subdivided_pass(vertices, parts) {
                    self.islands = islands;
                }
            }
        }
        self.merge_short_sub_segments(vertices);
        refresh_dirs(&mut self.points);
        refresh_vertex_dirs(vertices.current_mut());
        self.has_contacts = vertices.current().iter().any(|v| v.contact.is_some());
        if was != self.strained {
            debug!("rope {} strained", if self.strained { "became" } else { "is no longer" });
        }
        was != self.strained
    }

    /// Snap, rebuild and test for strain. A strained rope is redistributed
    /// and the island count returned.
    fn subdivided_pass(&mut self, vertices: &mut SubVertexBuffer<F>, parts: &[CheckPart<'_, F>]) -> Option<usize> {
        self.snap_points_to_surfaces(parts);
        self.rebuild_sub_vertices(vertices, parts);
        let entering = !self.strained;
        self.strained = self.detect_strain(vertices.current());
        if self.strained && entering {
            let mut path = vertices.current().to_vec();
            drop_crowded_contacts(&mut path);
            // Only a wrapped path may turn strained; no straight span may
            // cut through a collider.
            self.strained = spans_clear(&path, parts, &self.params.thickness);
        }
        if !self.strained || self.params.length <= F::zero() {
            return None;
        }
        Some(self.redistribute_strained(vertices))
    }

    /// Push interior coarse points out of colliders and record point
    /// contacts. Anchored ends never carry contacts.
    fn snap_points_to_surfaces(&mut self, parts: &[CheckPart<'_, F>]) {
        let n = self.segment_count();
        let held = [self.anchors[0].is_some(), self.anchors[1].is_some()];
        if held[0] {
            self.points[0].contact = None;
        }
        if held[1] {
            self.points[n].contact = None;
        }
        let first = usize::from(held[0]);
        let last = if held[1] { n - 1 } else { n };
        let separation = if self.params.length > F::zero() { F::from_f32(1.3) } else { F::from_f32(1.01) };
        for i in first..=last {
            let thickness = self.params.thickness.get(i.min(n - 1));
            let mut pos = self.points[i].position;
            let mut contact = None;
            for (index, cp) in parts.iter().enumerate() {
                if cp.is_primitive() {
                    if let Some(sc) = cp.unproject_sphere(pos, thickness, thickness * separation) {
                        pos = sc.point + sc.normal.scale(thickness);
                        let mut c = cp.contact(index, sc.point, sc.normal, F::zero(), sc.feature);
                        c.velocity = cp.point_velocity(pos);
                        contact = Some(c);
                    }
                    continue;
                }
                let from = self.points[i].previous;
                let ray = pos - from;
                if ray.length_sq() <= F::zero() {
                    continue;
                }
                let dirn = ray.normalize();
                let to = pos + dirn.scale(thickness);
                if let Some(hit) = cp.raycast(from, to) {
                    let facing = -hit.normal.dot(dirn);
                    if facing > F::zero() {
                        let gap = (thickness / facing.max(F::from_f32(0.3))).min((to - from).dot(dirn));
                        pos = hit.point - dirn.scale(gap);
                        let mut c = cp.contact(index, hit.point, hit.normal, F::zero(), hit.feature);
                        c.velocity = cp.point_velocity(pos);
                        contact = Some(c);
                    }
                }
            }
            self.points[i].position = pos;
            self.points[i].contact = contact;
        }
    }

    /// Rebuild the fine vertex list from the coarse points, inserting wrap
    /// vertices where a segment cuts through a collider.
    fn rebuild_sub_vertices(&mut self, vertices: &mut SubVertexBuffer<F>, parts: &[CheckPart<'_, F>]) {
        let n = self.segment_count();
        let held = [self.anchors[0].is_some(), self.anchors[1].is_some()];
        let max_sub = self.params.max_sub_vertices;
        let seglen = if self.params.length > F::zero() {
            self.segment_length()
        } else {
            let total = self.points.windows(2).fold(F::zero(), |acc, w| acc + w[1].position.distance(w[0].position));
            total / F::from_f32(n as f32)
        };
        let snap = (seglen * F::from_f32(0.05)).sq();
        let (_, spare) = vertices.split();
        spare.clear();

        for i in 0..n {
            self.points[i].first_vertex = spare.len();
            spare.push(vertex_from(&self.points[i]));
            if max_sub == 0 {
                continue;
            }
            let a = self.points[i].position;
            let b = self.points[i + 1].position;
            let dir = (b - a).normalize_or(self.points[i].dir);
            self.points[i].dir = dir;
            let thickness = self.params.thickness.get(i);
            let near: Vec<usize> =
                (0..parts.len()).filter(|&j| parts[j].near_segment(a, b, thickness + seglen * F::from_f32(0.05))).collect();
            if near.is_empty() {
                continue;
            }
            // Wraps too close to an anchor are ignored.
            let lo = if i == 0 && held[0] { seglen * F::half() } else { -seglen };
            let hi = if i + 1 == n && held[1] { seglen * F::half() } else { seglen * F::two() };

            let mut inner: Vec<SubVertex<F>> = Vec::new();
            let mut idle = 0;
            while inner.len() < max_sub && idle < MAX_IDLE_PASSES {
                idle += 1;
                let corner = |k: usize| if k == 0 { a } else if k > inner.len() { b } else { inner[k - 1].position };
                let mut order: Vec<usize> = (0..=inner.len()).collect();
                order.sort_by(|&x, &y| {
                    let lx = corner(x + 1).distance_sq(corner(x));
                    let ly = corner(y + 1).distance_sq(corner(y));
                    ly.partial_cmp(&lx).unwrap_or(core::cmp::Ordering::Equal)
                });
                let mut placed = false;
                for k in order {
                    let (s, e) = (corner(k), corner(k + 1));
                    let mut best: Option<(F, SubVertex<F>)> = None;
                    for &j in &near {
                        let cp = &parts[j];
                        let mut feature = Default::default();
                        let Some(cl) = cp.closest_point(&mut feature, s, e) else {
                            continue;
                        };
                        if cl.distance >= thickness * F::from_f32(0.999) {
                            continue;
                        }
                        let pos = cl.on_geometry + cl.normal.scale(thickness);
                        let along = dir.dot(pos - a);
                        if along < lo || along > hi {
                            continue;
                        }
                        if best.as_ref().map_or(true, |(d, _)| cl.distance < *d) {
                            let t = if seglen > F::zero() { (along / seglen).clamp(F::zero(), F::one()) } else { F::zero() };
                            let mut v = SubVertex::new(pos);
                            v.velocity = self.points[i].velocity.lerp(self.points[i + 1].velocity, t);
                            let mut c = cp.contact(j, cl.on_geometry, cl.normal, F::zero(), feature);
                            c.velocity = cp.point_velocity(pos);
                            v.contact = Some(c);
                            best = Some((cl.distance, v));
                        }
                    }
                    let Some((_, v)) = best else {
                        continue;
                    };
                    if s.distance_sq(v.position) < snap {
                        if k == 0 {
                            continue;
                        }
                        inner[k - 1] = v;
                    } else if e.distance_sq(v.position) < snap {
                        if k == inner.len() {
                            continue;
                        }
                        inner[k] = v;
                    } else {
                        inner.insert(k, v);
                        idle = 0;
                    }
                    placed = true;
                    break;
                }
                if !placed {
                    break;
                }
            }
            spare.extend(inner);
        }
        self.points[n].first_vertex = spare.len();
        spare.push(vertex_from(&self.points[n]));
        refresh_vertex_dirs(spare);
        vertices.swap();
    }

    /// Strained iff both ends are anchored, every supporting wrap holds
    /// under friction and the wrapped path is long enough.
    pub(crate) fn detect_strain(&self, vertices: &[SubVertex<F>]) -> bool {
        if self.anchors[0].is_none() || self.anchors[1].is_none() || vertices.len() < 2 {
            return false;
        }
        let (path, locked) = wrapped_path(vertices, self.params.friction);
        let threshold = if self.strained { STRAIN_EXIT } else { STRAIN_ENTER };
        locked && path >= self.params.length * F::from_f32(threshold)
    }

    /// Spread coarse points evenly along the wrapped path, keeping the wrap
    /// vertices. Returns the number of straight spans (islands).
    fn redistribute_strained(&mut self, vertices: &mut SubVertexBuffer<F>) -> usize {
        let n = self.segment_count();
        let (cur, spare) = vertices.split();
        let m = cur.len();
        drop_crowded_contacts(cur);

        let mut path = F::zero();
        let mut i = 0;
        while i + 1 < m {
            let start = i;
            i += 1;
            while !is_stop(cur, i) {
                i += 1;
            }
            path = path + cur[i].position.distance(cur[start].position);
        }
        let seglen = path / F::from_f32(n as f32);

        spare.clear();
        let mut a = F::zero();
        let mut j = 0;
        let mut islands = 0;
        let mut i = 0;
        while i + 1 < m {
            let start = i;
            i += 1;
            while !is_stop(cur, i) {
                i += 1;
            }
            let span = cur[i].position - cur[start].position;
            let b = span.length();
            let dir = if b > F::from_f32(1e-4) {
                span.scale(F::one() / b)
            } else {
                (cur[(i + 1).min(m - 1)].position - cur[start.saturating_sub(1)].position).normalize_or(cur[start].dir)
            };
            if let Some(last) = spare.last_mut() {
                last.dir = dir;
            }
            let mut placed = 0;
            while a < b + seglen * F::from_f32(0.01) && j <= n {
                let mut v = SubVertex::new(cur[start].position + dir.scale(a));
                v.dir = dir;
                spare.push(v);
                self.points[j].first_vertex = spare.len() - 1;
                j += 1;
                a = a + seglen;
                placed += 1;
            }
            a = a - b;
            if placed > 0 && a > seglen * F::from_f32(0.98) {
                // The last placement sits on the span end; the wrap replaces it.
                spare.pop();
            }
            spare.push(cur[i]);
            islands += 1;
        }
        for p in self.points.iter_mut().skip(j) {
            p.first_vertex = spare.len() - 1;
        }
        self.points[n].first_vertex = spare.len() - 1;
        vertices.swap();

        let fine = vertices.current();
        for (i, p) in self.points.iter_mut().enumerate() {
            let Some(v) = fine.get(p.first_vertex) else {
                continue;
            };
            p.position = v.position;
            if i > 0 && i < n {
                p.contact = v.contact;
            }
        }
        islands
    }

    /// Remove wrap vertices closer than `min_segment_length` to their
    /// predecessor. Coarse vertices are never removed.
    fn merge_short_sub_segments(&mut self, vertices: &mut SubVertexBuffer<F>) {
        let min_len = self.params.min_segment_length;
        if min_len <= F::zero() {
            return;
        }
        let fine = vertices.current_mut();
        let mut coarse = vec![false; fine.len()];
        for p in &self.points {
            if let Some(c) = coarse.get_mut(p.first_vertex) {
                *c = true;
            }
        }
        let mut remap = Vec::with_capacity(fine.len());
        let mut kept: Vec<SubVertex<F>> = Vec::with_capacity(fine.len());
        for (k, v) in fine.iter().enumerate() {
            let short = kept.last().map_or(false, |prev| prev.position.distance_sq(v.position) < min_len * min_len);
            if short && !coarse[k] {
                remap.push(kept.len() - 1);
                continue;
            }
            remap.push(kept.len());
            kept.push(*v);
        }
        if kept.len() == fine.len() {
            return;
        }
        for p in self.points.iter_mut() {
            p.first_vertex = remap[p.first_vertex];
        }
        *fine = kept;
    }
}

/// Span boundary: the last vertex or a vertex in contact.
fn is_stop<F: Float>(vertices: &[SubVertex<F>], i: usize) -> bool {
    i + 1 >= vertices.len() || vertices[i].contact.is_some()
}

/// Contacts that do not press on their bend are dropped when another
/// contact is next to them.
fn drop_crowded_contacts<F: Float>(vertices: &mut [SubVertex<F>]) {
    let m = vertices.len();
    for i in 1..m.saturating_sub(2) {
        let Some(c) = &vertices[i].contact else {
            continue;
        };
        let crowded = vertices[i + 1].contact.is_some() || vertices[i - 1].contact.is_some();
        if crowded && c.normal.dot(vertices[i - 1].dir - vertices[i].dir) < F::from_f32(0.01) {
            vertices[i].contact = None;
        }
    }
}

/// Whether every straight span between contact vertices stays out of the
/// colliders, within one thickness.
fn spans_clear<F: Float>(vertices: &[SubVertex<F>], parts: &[CheckPart<'_, F>], thickness: &PerSegment<F>) -> bool {
    let m = vertices.len();
    let width = thickness.get(0);
    let mut i = 0;
    while i + 1 < m {
        let start = i;
        i += 1;
        while !is_stop(vertices, i) {
            i += 1;
        }
        let (a, b) = (vertices[start].position, vertices[i].position);
        for cp in parts.iter().filter(|cp| cp.near_segment(a, b, width)) {
            let mut feature = Default::default();
            if cp.closest_point(&mut feature, a, b).map_or(false, |cl| cl.distance < -width) {
                return false;
            }
        }
    }
    true
}

/// Unit vector along `from -> to`, or `fallback` for a degenerate pair.
pub(crate) fn span_dir<F: Float>(from: Vec3<F>, to: Vec3<F>, fallback: Vec3<F>) -> Vec3<F> {
    (to - from).normalize_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aabb::Aabb;
    use crate::check_part::gather;
    use crate::config::RopeParams;
    use crate::point::{Anchor, AnchorSpec, Contact};
    use crate::quat::Pose;
    use crate::scene::Scene;
    use crate::shapes::Sphere;

    /// Pulley of radius 0.8 whose top pokes 0.3 above the x axis.
    fn pulley_center() -> Vec3<f64> {
        Vec3::new(0.0, 0.0, -0.5)
    }

    fn pulley_scene() -> Scene<f64> {
        let mut scene = Scene::new();
        scene.add_static(Pose::from_position(pulley_center()), Sphere::new(0.8));
        scene
    }

    /// A rope through the pulley, tied at both ends when `hooked`.
    fn rope_state(scene: &mut Scene<f64>, points: &[[f64; 3]], params: RopeParams<f64>, hooked: bool) -> RopeState<f64> {
        let mut state = RopeState::new(params);
        state.points = points.iter().map(|&p| ChainPoint::new(Vec3::from(p))).collect();
        refresh_dirs(&mut state.points);
        if hooked {
            let n = points.len() - 1;
            for (k, i) in [0, n].into_iter().enumerate() {
                let at = state.points[i].position;
                let entity = scene.add_static(Pose::from_position(at), Sphere::new(0.05));
                state.anchors[k] = Some(Anchor::new(AnchorSpec { entity, part: 0, point: at }, Pose::from_position(at)));
            }
        }
        state
    }

    fn around_pulley() -> Aabb<f64> {
        Aabb::new(Vec3::new(-1.0, -0.1, -0.1), Vec3::new(1.0, 0.1, 0.4))
    }

    fn polyline(points: &[[f64; 3]]) -> Vec<SubVertex<f64>> {
        let mut v: Vec<_> = points.iter().map(|&p| SubVertex::new(Vec3::from(p))).collect();
        refresh_vertex_dirs(&mut v);
        v
    }

    fn touching(normal: Vec3<f64>) -> Contact<f64> {
        let mut arena = thunderdome::Arena::new();
        Contact {
            entity: crate::world::EntityId(arena.insert(())),
            part: 0,
            normal,
            point: Vec3::zero(),
            t: 0.0,
            velocity: Vec3::zero(),
            feature: Default::default(),
            recheck: false,
            check_part: 0,
        }
    }

    #[test]
    fn straight_path_measures_chord() {
        let v = polyline(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [3.0, 0.0, 0.0]]);
        let (path, locked) = wrapped_path(&v, 0.2);
        assert!((path - 3.0).abs() < 1e-12);
        assert!(locked);
    }

    #[test]
    fn wrap_over_edge_counts_both_legs() {
        // Rope draped over an edge at (1, 0, 1).
        let mut v = polyline(&[[0.0, 0.0, 0.0], [1.0, 0.0, 1.0], [2.0, 0.0, 0.0]]);
        v[1].contact = Some(touching(Vec3::z_axis()));
        assert!(supports_bend(&v, 1));
        let (path, locked) = wrapped_path(&v, 0.2);
        assert!((path - 2.0 * 2f64.sqrt()).abs() < 1e-9);
        assert!(locked, "a contact normal along the bisector holds without friction");
    }

    #[test]
    fn sideways_contact_slips_without_friction() {
        let mut v = polyline(&[[0.0, 0.0, 0.0], [1.0, 0.0, 1.0], [2.0, 0.0, 0.0]]);
        // Tilted 60 degrees from the bend bisector.
        let n = Vec3::new(3f64.sqrt() / 2.0, 0.0, 0.5);
        v[1].contact = Some(touching(n));
        let (_, locked) = wrapped_path(&v, 0.0);
        assert!(!locked);
        let (_, locked) = wrapped_path(&v, 2.0);
        assert!(locked, "high friction locks the wrap");
    }

    #[test]
    fn span_dir_falls_back_when_degenerate() {
        let d = span_dir(Vec3::splat(1.0f32), Vec3::splat(1.0), Vec3::y_axis());
        assert_eq!(d, Vec3::y_axis());
    }

    #[test]
    fn rebuild_wraps_the_pulley_up_to_the_cap() {
        for (cap, most) in [(1, 3), (3, 5)] {
            let mut scene = pulley_scene();
            let mut state = rope_state(&mut scene, &[[-1.0, 0.0, 0.0], [1.0, 0.0, 0.0]], RopeParams::new().with_length(2.0).with_sub_vertices(cap), false);
            let mut scratch = Vec::new();
            let parts = gather(&scene, &around_pulley(), &state.params, &state.anchors, &mut scratch);
            assert_eq!(parts.len(), 1);
            let mut buffer = SubVertexBuffer::default();
            state.rebuild_sub_vertices(&mut buffer, &parts);

            let fine = buffer.current();
            assert!(fine.len() > 2 && fine.len() <= most, "cap {} gave {} vertices", cap, fine.len());
            assert_eq!(state.points[1].first_vertex, fine.len() - 1);
            for v in &fine[1..fine.len() - 1] {
                assert!(v.contact.is_some());
                let r = v.position.distance(pulley_center());
                assert!((r - 0.81).abs() < 1e-9, "wrap sits one thickness off the surface, got radius {}", r);
            }
        }
    }

    #[test]
    fn short_wrap_segments_merge_into_their_predecessor() {
        let mut scene = Scene::new();
        let params = RopeParams::new().with_length(2.0);
        let mut state = rope_state(&mut scene, &[[-1.0, 0.0, 0.0], [1.0, 0.0, 0.0]], params, false);
        state.params.min_segment_length = 0.1;
        state.points[1].first_vertex = 3;
        let mut buffer = SubVertexBuffer::default();
        *buffer.current_mut() = polyline(&[[-1.0, 0.0, 0.0], [0.0, 0.0, 0.3], [0.05, 0.0, 0.3], [1.0, 0.0, 0.0]]);
        state.merge_short_sub_segments(&mut buffer);
        let fine = buffer.current();
        assert_eq!(fine.len(), 3);
        assert_eq!(fine[1].position, Vec3::new(0.0, 0.0, 0.3));
        assert_eq!(state.points[1].first_vertex, 2);

        // Coarse vertices stay however close they are.
        let mut state = rope_state(&mut scene, &[[0.0, 0.0, 0.0], [0.05, 0.0, 0.0], [1.0, 0.0, 0.0]], RopeParams::new().with_length(1.0), false);
        state.params.min_segment_length = 0.1;
        for (i, p) in state.points.iter_mut().enumerate() {
            p.first_vertex = i;
        }
        *buffer.current_mut() = polyline(&[[0.0, 0.0, 0.0], [0.05, 0.0, 0.0], [1.0, 0.0, 0.0]]);
        state.merge_short_sub_segments(&mut buffer);
        assert_eq!(buffer.current().len(), 3);
    }

    #[test]
    fn strain_waits_for_a_wrapped_path() {
        for (cap, strained) in [(0, false), (3, true)] {
            let mut scene = pulley_scene();
            let params = RopeParams::new().with_length(2.0).with_sub_vertices(cap);
            let mut state = rope_state(&mut scene, &[[-1.0, 0.0, 0.0], [1.0, 0.0, 0.0]], params, true);
            let mut scratch = Vec::new();
            let parts = gather(&scene, &around_pulley(), &state.params, &state.anchors, &mut scratch);
            let mut buffer = SubVertexBuffer::default();
            state.step_subdivided(&mut buffer, &parts);
            assert_eq!(state.strained, strained, "cap {}", cap);
            if strained {
                for v in buffer.current() {
                    assert!(v.position.distance(pulley_center()) >= 0.8, "{:?} is inside the pulley", v.position);
                }
            }
        }
    }

    #[test]
    fn collapsed_island_reruns_the_pass_once() {
        for collapse in [false, true] {
            let mut scene = pulley_scene();
            let params = RopeParams::new().with_length(2.0);
            let mut state = rope_state(&mut scene, &[[-1.0, 0.0, 0.0], [0.0, 0.0, 0.0], [1.0, 0.0, 0.0]], params, true);
            let stale = Vec3::splat(9.0);
            for p in state.points.iter_mut() {
                p.previous = stale;
            }
            state.islands = if collapse { 10 } else { 0 };
            let mut scratch = Vec::new();
            let parts = gather(&scene, &around_pulley(), &state.params, &state.anchors, &mut scratch);
            let mut buffer = SubVertexBuffer::default();
            state.step_subdivided(&mut buffer, &parts);

            assert!(state.strained);
            assert!(state.islands >= 1 && state.islands < 10);
            // The rerun starts from the redistributed points.
            assert_eq!(state.points.iter().all(|p| p.previous != stale), collapse);
        }
    }
}
