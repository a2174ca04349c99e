//! Saved rope state.
//!
//! A snapshot holds the coarse positions, the non-zero velocities and the
//! awake flag. Contacts, sub-vertices and the strained flag are rebuilt by
//! the next step.

use crate::constraint::refresh_dirs;
use crate::error::{RopeError, RopeResult};
use crate::float::Float;
use crate::rope::RopeState;
use crate::vec::{Vec as _, Vec3};
use log::debug;
use serde::{Deserialize, Serialize};

/// Format version written by [`RopeState::snapshot`].
pub const SNAPSHOT_VERSION: u8 = 1;

/// One coarse point. Resting points store no velocity.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotPoint<F: Float> {
    pub position: Vec3<F>,
    pub velocity: Option<Vec3<F>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RopeSnapshot<F: Float> {
    pub version: u8,
    pub segments: usize,
    pub points: Vec<SnapshotPoint<F>>,
    pub awake: bool,
}

impl<F: Float> RopeState<F> {
    pub(crate) fn snapshot(&self) -> RopeSnapshot<F> {
        let points = self
            .points
            .iter()
            .map(|p| SnapshotPoint {
                position: p.position,
                velocity: (p.velocity.length_sq() > F::zero()).then_some(p.velocity),
            })
            .collect();
        RopeSnapshot { version: SNAPSHOT_VERSION, segments: self.segment_count(), points, awake: self.awake }
    }

    /// Load a snapshot. Any mismatch is rejected before the state is touched.
    pub(crate) fn restore(&mut self, snapshot: &RopeSnapshot<F>) -> RopeResult<()> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(RopeError::UnsupportedSnapshotVersion { found: snapshot.version });
        }
        let n = self.segment_count();
        if snapshot.segments != n {
            return Err(RopeError::SegmentCountMismatch { expected: n, found: snapshot.segments });
        }
        if snapshot.points.len() != n + 1 {
            return Err(RopeError::PointCountMismatch { expected: n + 1, found: snapshot.points.len() });
        }
        for (p, s) in self.points.iter_mut().zip(&snapshot.points) {
            p.position = s.position;
            p.previous = s.position;
            p.velocity = s.velocity.unwrap_or_else(Vec3::zero);
            p.pending_velocity = Vec3::zero();
            p.contact = None;
        }
        refresh_dirs(&mut self.points);
        self.awake = snapshot.awake;
        self.slow_frames = 0;
        self.strained = false;
        self.has_contacts = false;
        self.islands = 0;
        debug!("restored rope snapshot: {} segments, awake {}", n, snapshot.awake);
        Ok(())
    }
}
