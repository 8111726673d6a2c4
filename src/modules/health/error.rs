//! Health registry error types.

use crate::modules::target_group::{TargetGroupError, TargetId};
use thiserror::Error;

/// Errors raised by the health registry.
#[derive(Debug, Error)]
pub enum HealthError {
    /// Health check parameters out of range.
    #[error("invalid health check configuration: {0}")]
    InvalidConfig(String),

    /// Matcher string could not be parsed.
    #[error("invalid matcher '{0}': {1}")]
    InvalidMatcher(String, String),

    /// Unknown target group.
    #[error("target group '{0}' not found")]
    GroupNotFound(String),

    /// Target group already present.
    #[error("target group '{0}' already exists")]
    GroupAlreadyExists(String),

    /// Target not registered in the group.
    #[error("target {target} not registered in target group '{group}'")]
    TargetNotFound {
        /// Group name.
        group: String,
        /// Target id.
        target: TargetId,
    },

    /// Group does not run active checks.
    #[error("health checks are disabled for target group '{0}'")]
    ChecksDisabled(String),

    /// Error from the target group.
    #[error(transparent)]
    TargetGroup(#[from] TargetGroupError),
}

/// Result type for health registry operations.
pub type HealthResult<T> = Result<T, HealthError>;
