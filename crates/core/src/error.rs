//! Error types for the smallworld engine.

use thiserror::Error;

/// Errors surfaced by index operations.
///
/// Internal invariants (heap non-emptiness, visited-set bounds) are treated
/// as programmer errors and enforced with assertions instead.
#[derive(Debug, Error)]
pub enum HnswError {
    /// A provided vector's length differs from the index dimension.
    #[error("dimension mismatch: index expects {expected}, vector has {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Snapshot read/write failed at the filesystem level.
    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// A snapshot file exists but its contents cannot be trusted.
    #[error("snapshot corrupt: {0}")]
    Snapshot(String),
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, HnswError>;
