//! Listener error types.

use crate::modules::actions::ActionError;
use crate::modules::rules::RuleError;
use crate::modules::tls::TlsError;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors raised while building or running a listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Invalid listener configuration.
    #[error("invalid listener configuration: {0}")]
    InvalidConfig(String),

    /// Socket bind failed.
    #[error("failed to bind {address}: {source}")]
    Bind {
        /// Requested address.
        address: SocketAddr,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Listener started outside a tokio runtime.
    #[error("no tokio runtime available")]
    NoRuntime,

    /// TLS setup error.
    #[error(transparent)]
    Tls(#[from] TlsError),

    /// Rule error.
    #[error(transparent)]
    Rule(#[from] RuleError),

    /// Action error.
    #[error(transparent)]
    Action(#[from] ActionError),
}

/// Result type for listener operations.
pub type ListenerResult<T> = Result<T, ListenerError>;
