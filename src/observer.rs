//! Step observer trait for monitoring rope simulation progress.

use crate::aabb::Aabb;
use crate::coupling::JointBroken;
use crate::float::Float;

/// Summary of one completed sub-step.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct StepReport<F: Float> {
    /// Sub-step length actually simulated.
    pub dt: F,
    /// Relaxation updates spent by the velocity solver.
    pub iterations: usize,
    /// Whether the energy clamp rescaled velocities.
    pub clamped: bool,
    /// Kinetic energy after the solver.
    pub energy: F,
    /// Segments (or sub-vertices) in contact.
    pub contacts: usize,
    pub strained: bool,
    pub awake: bool,
    /// Chain bounds inflated by the collision distance, for the host's
    /// spatial index.
    pub bounds: Aabb<F>,
}

/// Trait for observing rope steps.
///
/// Implement this trait to monitor solver progress (e.g., for debugging,
/// visualization, or reacting to tearing). All methods have default
/// no-op implementations.
pub trait RopeObserver<F: Float> {
    /// Called after free points have been integrated and anchors moved.
    fn on_integrate(&mut self) {}

    /// Called after segment lengths have been restored.
    fn on_constraints_enforced(&mut self) {}

    /// Called after contacts were validated or searched.
    fn on_contacts_updated(&mut self, _count: usize) {}

    /// Called after the velocity solver ran.
    fn on_solver_finished(&mut self, _iterations: usize, _clamped: bool) {}

    /// Called when the rope enters or leaves the strained regime.
    fn on_strain_changed(&mut self, _strained: bool) {}

    /// Called when tension tears an anchor off.
    fn on_joint_broken(&mut self, _event: &JointBroken<F>) {}

    /// Called when a sub-step is fully complete.
    fn on_step_complete(&mut self, _report: &StepReport<F>) {}
}

/// A no-op observer that does nothing. Use as default when no observation needed.
pub struct NoOpRopeObserver;

impl<F: Float> RopeObserver<F> for NoOpRopeObserver {}
