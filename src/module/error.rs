//! Lifecycle error types.

use thiserror::Error;

/// Result type alias for lifecycle operations.
pub type ModuleResult<T> = Result<T, ModuleError>;

/// Errors raised by lifecycle transitions.
#[derive(Debug, Clone, Error)]
pub enum ModuleError {
    /// The supplied configuration was rejected.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// The component failed to start.
    #[error("start failed: {0}")]
    StartFailed(String),

    /// The component failed to stop gracefully.
    #[error("stop failed: {0}")]
    StopFailed(String),

    /// The requested transition is not valid from the current state.
    #[error("invalid state: current={current}, expected={expected}")]
    InvalidState {
        /// Current state of the component.
        current: String,
        /// State required for the operation.
        expected: String,
    },

    /// Catch-all for unexpected failures.
    #[error("internal error: {0}")]
    Internal(String),
}
