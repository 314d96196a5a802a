//! Crate-wide error taxonomy.
//!
//! Mirrors the domain-error / infrastructure-error split used throughout the
//! access graph: logical errors from the AccessManager propagate immediately,
//! while persistence and redistribution errors carry enough context for the
//! caller to retry or surface a trip-switch.

use thiserror::Error;

use crate::graph::{LeafId, NonLeafId};

/// Full error taxonomy for the crate.
#[derive(Debug, Error)]
pub enum AccessError {
    /// Target element does not exist at the current time.
    #[error("element not found: {0}")]
    ElementNotFound(String),

    /// Attempted to add an element that already exists.
    #[error("element already exists: {0}")]
    ElementAlreadyExists(String),

    /// A non-leaf to non-leaf edge would introduce a cycle.
    #[error("adding edge {from} -> {to} would create a circular reference")]
    CircularReference {
        /// Source non-leaf of the rejected edge.
        from: NonLeafId,
        /// Destination non-leaf of the rejected edge.
        to: NonLeafId,
    },

    /// Malformed input: non-UTC time, future time, over-length identifier, etc.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A load was requested but no events exist in the store yet.
    #[error("persistent storage is empty")]
    PersistentStorageEmpty,

    /// The bulk persister failed after exhausting its retry policy.
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),

    /// A split/merge step failed; the configuration flip never committed.
    #[error("redistribution failure at step '{step}': {reason}")]
    RedistributionFailure {
        /// The step that failed (e.g. "drain", "copy", "cutover").
        step: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// The trip switch has tripped; writes are refused until operator reset.
    #[error("service unavailable: trip switch is engaged")]
    ServiceUnavailable,
}

impl AccessError {
    /// Element-not-found error for a leaf (user).
    pub fn leaf_not_found(id: &LeafId) -> Self {
        Self::ElementNotFound(format!("user '{id}'"))
    }

    /// Element-not-found error for a non-leaf (group).
    pub fn non_leaf_not_found(id: &NonLeafId) -> Self {
        Self::ElementNotFound(format!("group '{id}'"))
    }

    /// The stable HTTP status this error maps to at the service boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::ElementNotFound(_)
            | Self::ElementAlreadyExists(_)
            | Self::CircularReference { .. }
            | Self::InvalidParameter(_) => 400,
            Self::PersistentStorageEmpty => 400,
            Self::PersistenceFailure(_) => 503,
            Self::RedistributionFailure { .. } => 500,
            Self::ServiceUnavailable => 503,
        }
    }
}
