//! Action evaluation.
//!
//! A matched rule's actions run as a small state machine: an optional
//! authenticate stage (OIDC or Cognito), then exactly one terminal action
//! (forward, redirect or fixed response).

mod action;
mod auth;
mod config;
mod error;
mod evaluator;
mod fixed_response;
mod forward;
mod idp;
mod redirect;
mod session;

pub use action::{check_chain, ActionBuilder, ActionChain, ActionResponse, TerminalAction};
pub use auth::{
    AuthDecision, AuthKind, AuthResponse, Authenticator, ACCESS_TOKEN_HEADER, CALLBACK_PATH,
    CLAIMS_HEADER, IDENTITY_HEADER,
};
pub use config::{
    ActionConfig, CognitoConfig, FixedResponseConfig, ForwardConfig, OidcConfig, RedirectConfig,
    RedirectStatus, SessionConfig, UnauthenticatedAction, WeightedTargetGroup,
    DEFAULT_SESSION_COOKIE, DEFAULT_SESSION_TIMEOUT,
};
pub use error::{ActionError, ActionResult};
pub use evaluator::{ActionEvaluator, ActionStats, ForwardPlan, Outcome};
pub use fixed_response::{FixedResponseAction, CONTENT_TYPES, MAX_BODY_LEN};
pub use forward::{ForwardAction, Forwarded};
pub use idp::{
    ClientCredentials, HttpIdentityProvider, Identity, IdentityProvider, IdpEndpoints, IdpFuture,
};
pub use redirect::RedirectAction;
pub use session::{
    PendingAuthorizations, Session, SessionStore, MAX_PENDING_AUTHORIZATIONS, MAX_SESSIONS,
    STATE_TTL,
};
