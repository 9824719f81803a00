use thiserror::Error;

use crate::zorder::Pointer;

/// Errors surfaced by mesh construction, mutation, and operator assembly.
///
/// All mutating operations check their preconditions before touching any
/// state, so an `Err` return never leaves the mesh partially modified and
/// never invalidates cached derived data.
#[derive(Debug, Error)]
pub enum MeshError {
    /// The mesh description itself is unusable: wrong dimension count,
    /// spacing vectors whose length is not `2^levels`, non-positive
    /// spacings, or a refinement depth beyond what the cell id encoding
    /// can address.
    #[error("invalid mesh description: {0}")]
    InvalidSpec(String),

    /// A cell operation referenced a cell that is not an active leaf, or
    /// would step outside the admissible level range.
    #[error("cell {pointer:?} out of bounds: {reason}")]
    OutOfBounds {
        pointer: Pointer,
        reason: &'static str,
    },

    /// The active leaf set stopped being a partition of the domain, or a
    /// consumer required a balanced tree that this mesh does not satisfy.
    #[error("mesh invariant violated: {0}")]
    InvariantViolation(String),

    /// The requested quantity is not defined for this mesh dimension.
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}
