//! Action error types.

use crate::modules::target_group::TargetGroupError;
use crate::modules::tls::TlsError;
use thiserror::Error;

/// Errors raised while building action chains or talking to an identity
/// provider.
#[derive(Debug, Error)]
pub enum ActionError {
    /// Malformed action configuration.
    #[error("invalid action configuration: {0}")]
    InvalidConfig(String),

    /// The chain has no forward, redirect or fixed-response action.
    #[error("action chain has no terminal action")]
    NoTerminalAction,

    /// The chain has more than one terminal action.
    #[error("action chain has more than one terminal action")]
    MultipleTerminalActions,

    /// An action follows the terminal action.
    #[error("'{0}' action follows the terminal action")]
    ActionAfterTerminal(&'static str),

    /// More than one authenticate action.
    #[error("action chain has more than one authenticate action")]
    MultipleAuthenticate,

    /// The redirect would send clients back to the same URL.
    #[error("redirect keeps protocol, host, port and path unchanged and would loop")]
    RedirectLoop,

    /// Malformed redirect.
    #[error("invalid redirect: {0}")]
    InvalidRedirect(String),

    /// Malformed fixed response.
    #[error("invalid fixed response: {0}")]
    InvalidFixedResponse(String),

    /// Forward names a target group that does not exist.
    #[error("unknown target group '{0}'")]
    UnknownTargetGroup(String),

    /// Identity provider call failed.
    #[error("identity provider error: {0}")]
    Idp(String),

    /// Target group error.
    #[error(transparent)]
    TargetGroup(#[from] TargetGroupError),

    /// TLS setup error.
    #[error(transparent)]
    Tls(#[from] TlsError),
}

/// Result type for action operations.
pub type ActionResult<T> = Result<T, ActionError>;
