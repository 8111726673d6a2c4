//! Load balancer error types.

use crate::config::ConfigError;
use crate::modules::health::HealthError;
use crate::modules::listener::ListenerError;
use crate::modules::target_group::TargetGroupError;
use thiserror::Error;

/// Errors that can occur in the load balancer module.
#[derive(Debug, Error)]
pub enum LoadBalancerError {
    /// Configuration failed to load or validate.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Listener not found.
    #[error("listener '{0}' not found")]
    ListenerNotFound(String),

    /// No registered target matches the identifier and port.
    #[error("target '{target}' is not registered in target group '{group}'")]
    TargetNotRegistered {
        /// Target group name.
        group: String,
        /// Target identifier.
        target: String,
    },

    /// Target group or health error.
    #[error(transparent)]
    Health(#[from] HealthError),

    /// Target group error.
    #[error(transparent)]
    TargetGroup(#[from] TargetGroupError),

    /// Listener error.
    #[error(transparent)]
    Listener(#[from] ListenerError),
}

/// Result type for load balancer operations.
pub type LoadBalancerResult<T> = Result<T, LoadBalancerError>;
