//! Error types for rope operations.
//!
//! Only caller mistakes surface here. Degenerate geometry, stale handles,
//! solver non-convergence and buffer overflow are handled inside the step.

use thiserror::Error;

/// Errors returned by rope configuration and state restore.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RopeError {
    /// Segment count must be in `1..=MAX_SEGMENTS`.
    #[error("segment count {count} is out of range (1..={max})")]
    InvalidSegmentCount { count: usize, max: usize },
    /// Explicit initial points must number `segment_count + 1`.
    #[error("expected {expected} initial points, got {found}")]
    PointCountMismatch { expected: usize, found: usize },
    /// A snapshot was taken from a chain with a different segment count.
    #[error("snapshot has {found} segments but the rope has {expected}")]
    SegmentCountMismatch { expected: usize, found: usize },
    /// Snapshot format version is not understood.
    #[error("unsupported snapshot version {found}")]
    UnsupportedSnapshotVersion { found: u8 },
    /// The operation needs a configured chain.
    #[error("rope has not been configured with a segment count yet")]
    NotConfigured,
    /// A point or segment index is out of range.
    #[error("index {index} out of bounds (count: {count})")]
    IndexOutOfBounds { index: usize, count: usize },
    /// A scalar parameter is non-finite or out of range.
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: &'static str },
    /// A per-segment override table does not match the segment count.
    #[error("per-segment table `{name}` has {found} entries, expected {expected}")]
    PerSegmentLength { name: &'static str, expected: usize, found: usize },
}

/// Result alias used throughout the crate.
pub type RopeResult<T> = Result<T, RopeError>;
