//! Target group error types.

use super::config::TargetType;
use super::target::TargetId;
use thiserror::Error;

/// Errors raised by target groups.
#[derive(Debug, Clone, Error)]
pub enum TargetGroupError {
    /// No target in the group is currently healthy.
    #[error("no healthy targets in target group '{0}'")]
    NoHealthyTargets(String),

    /// Identifier already registered with different parameters.
    #[error("target '{target}' is already registered in target group '{group}' with different parameters")]
    DuplicateTarget {
        /// Group name.
        group: String,
        /// Target identifier.
        target: String,
    },

    /// Identifier does not match the group's target type.
    #[error("target '{target}' is not a valid {expected} target for target group '{group}'")]
    TargetTypeMismatch {
        /// Group name.
        group: String,
        /// Target identifier.
        target: String,
        /// The group's target type.
        expected: TargetType,
    },

    /// Target id not present in the group.
    #[error("target {target} not found in target group '{group}'")]
    TargetNotFound {
        /// Group name.
        group: String,
        /// Target id.
        target: TargetId,
    },

    /// Target has no network address (unknown instance, missing port).
    #[error("cannot resolve address of target '{0}'")]
    UnresolvedTarget(String),

    /// Invalid target group configuration.
    #[error("invalid target group configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for target group operations.
pub type TargetGroupResult<T> = Result<T, TargetGroupError>;
