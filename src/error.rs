//! The one seam where we need to tell "abort the whole request" apart from
//! "recover and keep going" (see spec §7). Everywhere else we use
//! `anyhow::Result` directly, the way the rest of the crate does.

use std::fmt;

/// A fatal analysis error: an internal invariant was violated, or a
/// structural bound (edge capacity) was exceeded. Both abort the request;
/// they are distinguished from the recoverable lifter/input/config errors
/// purely so a caller can `downcast_ref` and decide whether to print a
/// "this is a bug" message versus an ordinary failure message.
#[derive(Debug)]
pub enum AnalysisError {
    /// A block's successor or predecessor list would exceed `MAX_EDGES`.
    EdgeCapacityExceeded { block_address: u64, capacity: usize },
    /// An internal invariant (edge symmetry, marker misuse, ...) was
    /// violated. Always a bug in this crate, never a malformed input.
    Invariant(String),
}

impl fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EdgeCapacityExceeded {
                block_address,
                capacity,
            } => write!(
                f,
                "block {block_address:#x} exceeded the {capacity}-edge capacity"
            ),
            Self::Invariant(msg) => write!(f, "internal invariant violated: {msg}"),
        }
    }
}

impl std::error::Error for AnalysisError {}

/// Bound on a block's successor/predecessor edge lists (spec §4.3).
pub const MAX_EDGES: usize = 256;

/// Bound on alternative definition sites kept per source-tree child
/// (spec §4.5). Excess branches are dropped silently and logged.
pub const MAX_BRANCHES_PER_CHILD: usize = 8;
