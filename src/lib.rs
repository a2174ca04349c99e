//! Rope and cable simulation for games.
//!
//! `hawser` simulates a rope as a chain of point masses joined by
//! inextensible (or stretchy) segments. The chain collides with the world,
//! hangs from up to two bodies, wraps around obstacles and, once pulled taut
//! around them, hands its tension to the host's rigid-body solver.
//!
//! # Features
//!
//! - **Exact inextensibility**: re-projection sweeps for free ends,
//!   relaxation between two anchors, tridiagonal velocity solve
//! - **Persistent contacts**: per-segment contacts survive between ticks
//!   and are only re-searched when they drift
//! - **Wrapping**: subdivided ropes insert fine vertices where they bend
//!   around colliders and switch between slack and strained regimes
//! - **Rigid coupling**: strained spans with capstan friction, tension
//!   read-back and tearing
//! - **World-agnostic**: the host implements [`PhysicalWorld`]; [`Scene`]
//!   is a small built-in world for tests and tools
//! - **Observable**: monitor steps through the [`RopeObserver`] trait
//!
//! # Example
//!
//! ```
//! use hawser::{Vec as _, AnchorSpec, NoOpRopeObserver, Placement, Pose, Rope, RopeEnd, RopeParams, Scene, Sphere, Vec3};
//!
//! let mut scene = Scene::<f64>::new();
//! let hook = scene.add_static(Pose::from_position(Vec3::new(0.0, 0.0, 3.0)), Sphere::new(0.1));
//!
//! let rope = Rope::new(RopeParams::new().with_length(2.0)).unwrap();
//! rope.set_anchor(&scene, RopeEnd::Start, Some(AnchorSpec { entity: hook, part: 0, point: Vec3::new(0.0, 0.0, 3.0) }));
//! rope.configure(8, Placement::BetweenAnchors).unwrap();
//!
//! for _ in 0..10 {
//!     rope.advance(0.02, &scene, &mut NoOpRopeObserver);
//! }
//! assert!(rope.points()[0].distance(Vec3::new(0.0, 0.0, 3.0)) < 1e-9);
//! ```

pub mod aabb;
pub mod check_part;
pub mod config;
pub mod error;
pub mod float;
pub mod geometry;
pub mod observer;
pub mod point;
pub mod quat;
pub mod scene;
pub mod shapes;
pub mod snapshot;
pub mod solver;
pub mod strain;
pub mod vec;
pub mod world;

mod constraint;
mod contact;
pub mod coupling;
mod integrate;
mod rope;

// Re-export primary API
pub use aabb::Aabb;
pub use config::{CollisionMask, PerSegment, PoseMode, RopeFlags, RopeParams, MAX_SEGMENTS};
pub use coupling::{JointBroken, NoRigidSolver, RigidSolver, RopeContact, SpanEnd, TensionSolver, WrapPoint};
pub use error::{RopeError, RopeResult};
pub use float::Float;
pub use geometry::{ClosestPoints, ContactFeature, FeatureId, GeomContact, Geometry, RayHit, SphereContact, Unprojection};
pub use observer::{NoOpRopeObserver, RopeObserver, StepReport};
pub use point::{Anchor, AnchorSpec, Contact, RopeEnd};
pub use quat::{Pose, Quat};
pub use rope::{Placement, Rope, RopeImpulse, RopeStatus};
pub use scene::Scene;
pub use shapes::{Cuboid, HalfSpace, Sphere};
pub use snapshot::{RopeSnapshot, SnapshotPoint, SNAPSHOT_VERSION};
pub use vec::{Vec, Vec3};
pub use world::{BodyState, EntityId, PhysicalWorld, SpatialIndex, WaterVolume};
