//! Chain data: coarse points, fine sub-vertices, contacts and anchors.

use crate::float::Float;
use crate::geometry::ContactFeature;
use crate::quat::Pose;
use crate::vec::{Vec as _, Vec3};
use crate::world::EntityId;
use serde::{Deserialize, Serialize};

/// Which end of the chain.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RopeEnd {
    Start,
    End,
}

impl RopeEnd {
    pub fn index(self) -> usize {
        match self {
            RopeEnd::Start => 0,
            RopeEnd::End => 1,
        }
    }
}

/// A contact between a segment and a collider part.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Contact<F: Float> {
    pub entity: EntityId,
    pub part: usize,
    /// Outward surface normal.
    pub normal: Vec3<F>,
    /// Surface point.
    pub point: Vec3<F>,
    /// Fraction along the owning segment.
    pub t: F,
    /// Surface velocity at `point`.
    pub velocity: Vec3<F>,
    pub feature: ContactFeature,
    /// Set when the contact was only found approximately and must be
    /// searched again next tick.
    pub recheck: bool,
    /// Index into this tick's check-part list.
    pub(crate) check_part: usize,
}

/// Coarse chain point. `dir` is the unit direction of the segment starting
/// here; the last point keeps the previous segment's direction.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ChainPoint<F: Float> {
    pub position: Vec3<F>,
    /// Position at the start of the tick.
    pub(crate) previous: Vec3<F>,
    pub velocity: Vec3<F>,
    /// Velocity queued by impulses, folded in after the constraint pass.
    pub(crate) pending_velocity: Vec3<F>,
    pub dir: Vec3<F>,
    /// Contact on the segment starting here.
    pub contact: Option<Contact<F>>,
    /// Required normal separation velocity for the contact.
    pub(crate) separation_velocity: F,
    /// Solver scratch: friction accumulator.
    pub(crate) impulse: F,
    /// Index of this point in the fine sub-vertex list.
    pub(crate) first_vertex: usize,
    /// Target position for the animated pose modes.
    pub(crate) target: Vec3<F>,
}

impl<F: Float> ChainPoint<F> {
    pub fn new(position: Vec3<F>) -> Self {
        ChainPoint {
            position,
            previous: position,
            velocity: Vec3::zero(),
            pending_velocity: Vec3::zero(),
            dir: Vec3::new(F::zero(), F::zero(), -F::one()),
            contact: None,
            separation_velocity: F::zero(),
            impulse: F::zero(),
            first_vertex: 0,
            target: position,
        }
    }
}

/// Fine vertex of the subdivided representation.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SubVertex<F: Float> {
    pub position: Vec3<F>,
    pub velocity: Vec3<F>,
    pub dir: Vec3<F>,
    pub contact: Option<Contact<F>>,
    pub(crate) separation_velocity: F,
    pub(crate) impulse: F,
}

impl<F: Float> SubVertex<F> {
    pub fn new(position: Vec3<F>) -> Self {
        SubVertex {
            position,
            velocity: Vec3::zero(),
            dir: Vec3::zero(),
            contact: None,
            separation_velocity: F::zero(),
            impulse: F::zero(),
        }
    }
}

/// Requested attachment of a chain end.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AnchorSpec<F: Float> {
    pub entity: EntityId,
    pub part: usize,
    /// World-space attachment point.
    pub point: Vec3<F>,
}

/// A chain end attached to a part. The attachment is stored in the part's
/// frame so it follows the part.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Anchor<F: Float> {
    pub entity: EntityId,
    pub part: usize,
    pub(crate) local_point: Vec3<F>,
    /// Part pose seen on the previous tick, for finite-difference velocity.
    pub(crate) last_pose: Pose<F>,
}

impl<F: Float> Anchor<F> {
    pub(crate) fn new(spec: AnchorSpec<F>, pose: Pose<F>) -> Self {
        Anchor { entity: spec.entity, part: spec.part, local_point: pose.inverse_transform_point(spec.point), last_pose: pose }
    }

    pub fn world_point(&self, pose: &Pose<F>) -> Vec3<F> {
        pose.transform_point(self.local_point)
    }
}

/// Double-buffered fine vertex list. Rebuilding writes into the spare buffer
/// and flips `current`.
#[derive(Clone, Debug, Default)]
pub(crate) struct SubVertexBuffer<F: Float> {
    buffers: [Vec<SubVertex<F>>; 2],
    current: usize,
}

impl<F: Float> SubVertexBuffer<F> {
    pub fn with_capacity(capacity: usize) -> Self {
        SubVertexBuffer { buffers: [Vec::with_capacity(capacity), Vec::with_capacity(capacity)], current: 0 }
    }

    pub fn current(&self) -> &[SubVertex<F>] {
        &self.buffers[self.current]
    }

    pub fn current_mut(&mut self) -> &mut Vec<SubVertex<F>> {
        &mut self.buffers[self.current]
    }

    /// Both buffers, current first.
    pub fn split(&mut self) -> (&mut Vec<SubVertex<F>>, &mut Vec<SubVertex<F>>) {
        let [a, b] = &mut self.buffers;
        if self.current == 0 {
            (a, b)
        } else {
            (b, a)
        }
    }

    pub fn swap(&mut self) {
        self.current ^= 1;
    }

    pub fn clear(&mut self) {
        self.buffers[0].clear();
        self.buffers[1].clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quat::Quat;

    #[test]
    fn anchor_follows_part_pose() {
        let pose = Pose::new(Vec3::new(1.0f64, 0.0, 0.0), Quat::identity());
        let mut arena = thunderdome::Arena::new();
        let spec = AnchorSpec {
            entity: EntityId(arena.insert(())),
            part: 0,
            point: Vec3::new(1.0, 0.0, 1.0),
        };
        let anchor = Anchor::new(spec, pose);
        let moved = Pose::new(Vec3::new(3.0, 0.0, 0.0), Quat::from_axis_angle(Vec3::y_axis(), core::f64::consts::PI));
        assert!(anchor.world_point(&moved).distance(Vec3::new(3.0, 0.0, -1.0)) < 1e-9);
    }

    #[test]
    fn buffer_swap_flips_current() {
        let mut buf = SubVertexBuffer::<f32>::with_capacity(4);
        buf.current_mut().push(SubVertex::new(Vec3::zero()));
        {
            let (_, spare) = buf.split();
            spare.clear();
            spare.push(SubVertex::new(Vec3::splat(1.0)));
            spare.push(SubVertex::new(Vec3::splat(2.0)));
        }
        buf.swap();
        assert_eq!(buf.current().len(), 2);
    }
}
