//! Error types for the conversation crate.

use std::fmt;

/// Errors from memory buffer operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// A session id is required to address a buffer.
    MissingSession,
    /// A buffer cannot hold zero messages.
    ZeroCapacity { session_id: String },
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingSession => write!(f, "memory session id is required"),
            Self::ZeroCapacity { session_id } => {
                write!(f, "memory buffer for session '{session_id}' has zero capacity")
            }
        }
    }
}

impl std::error::Error for MemoryError {}
