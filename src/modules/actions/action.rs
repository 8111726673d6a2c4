//! Action chains.

use super::auth::{http_provider, Authenticator};
use super::config::{ActionConfig, SessionConfig};
use super::error::{ActionError, ActionResult};
use super::fixed_response::FixedResponseAction;
use super::forward::ForwardAction;
use super::idp::IdentityProvider;
use super::redirect::RedirectAction;
use crate::modules::target_group::TargetGroup;
use bytes::Bytes;
use http::header::{CONTENT_TYPE, LOCATION};
use http::{HeaderMap, HeaderValue, StatusCode};
use std::collections::HashMap;
use std::sync::Arc;

/// A response generated by the load balancer itself.
#[derive(Debug, Clone)]
pub struct ActionResponse {
    /// Status code.
    pub status: StatusCode,
    /// Headers.
    pub headers: HeaderMap,
    /// Body.
    pub body: Bytes,
}

impl ActionResponse {
    /// Create an empty response.
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Set the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// An error page for a status.
    #[must_use]
    pub fn error(status: StatusCode) -> Self {
        let mut response = Self::new(status).with_body(format!(
            "{} {}\n",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Error")
        ));
        response
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        response
    }

    /// A redirect. An unrepresentable location yields a 500.
    #[must_use]
    pub fn redirect(status: StatusCode, location: &str) -> Self {
        match HeaderValue::from_str(location) {
            Ok(value) => {
                let mut response = Self::new(status);
                response.headers.insert(LOCATION, value);
                response
            },
            Err(_) => Self::error(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }
}

/// The action that ends a chain.
#[derive(Debug, Clone)]
pub enum TerminalAction {
    /// Route to target groups.
    Forward(ForwardAction),
    /// Redirect the client.
    Redirect(RedirectAction),
    /// Answer directly.
    FixedResponse(FixedResponseAction),
}

impl TerminalAction {
    /// Get the action type name.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Forward(_) => "forward",
            Self::Redirect(_) => "redirect",
            Self::FixedResponse(_) => "fixed-response",
        }
    }
}

/// An optional authenticate stage followed by exactly one terminal action.
#[derive(Debug, Clone)]
pub struct ActionChain {
    authenticate: Option<Arc<Authenticator>>,
    terminal: TerminalAction,
}

impl ActionChain {
    /// Chain consisting of a terminal action only.
    #[must_use]
    pub fn terminal(terminal: TerminalAction) -> Self {
        Self {
            authenticate: None,
            terminal,
        }
    }

    /// Chain with an authenticate stage.
    #[must_use]
    pub fn authenticated(authenticate: Arc<Authenticator>, terminal: TerminalAction) -> Self {
        Self {
            authenticate: Some(authenticate),
            terminal,
        }
    }

    /// Get the authenticate stage.
    #[must_use]
    pub fn authenticator(&self) -> Option<&Arc<Authenticator>> {
        self.authenticate.as_ref()
    }

    /// Get the terminal action.
    #[must_use]
    pub fn terminal_action(&self) -> &TerminalAction {
        &self.terminal
    }

    /// Get the forward action, if the chain ends in one.
    #[must_use]
    pub fn forward(&self) -> Option<&ForwardAction> {
        match &self.terminal {
            TerminalAction::Forward(forward) => Some(forward),
            _ => None,
        }
    }
}

/// Check the shape of a configured chain: at most one authenticate action,
/// then exactly one terminal action at the end.
///
/// # Errors
///
/// Returns the first structural problem found.
pub fn check_chain(actions: &[ActionConfig]) -> ActionResult<()> {
    let mut seen_auth = false;
    let mut seen_terminal = false;

    for action in actions {
        if seen_terminal {
            return Err(if action.is_authenticate() {
                ActionError::ActionAfterTerminal(action.kind())
            } else {
                ActionError::MultipleTerminalActions
            });
        }
        if action.is_authenticate() {
            if seen_auth {
                return Err(ActionError::MultipleAuthenticate);
            }
            seen_auth = true;
        } else {
            seen_terminal = true;
        }
    }

    if seen_terminal {
        Ok(())
    } else {
        Err(ActionError::NoTerminalAction)
    }
}

/// Builds action chains against a set of target groups.
pub struct ActionBuilder<'a> {
    groups: &'a HashMap<String, Arc<TargetGroup>>,
    provider: Option<Arc<dyn IdentityProvider>>,
}

impl std::fmt::Debug for ActionBuilder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionBuilder")
            .field("groups", &self.groups.len())
            .field("provider", &self.provider)
            .finish()
    }
}

impl<'a> ActionBuilder<'a> {
    /// Create a builder resolving forwards against `groups`.
    #[must_use]
    pub fn new(groups: &'a HashMap<String, Arc<TargetGroup>>) -> Self {
        Self {
            groups,
            provider: None,
        }
    }

    /// Use this identity provider client for every authenticate action
    /// instead of one built from the action's settings.
    #[must_use]
    pub fn with_identity_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Build a chain from its configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the chain is malformed or an action is invalid.
    pub fn build(&self, actions: &[ActionConfig]) -> ActionResult<ActionChain> {
        check_chain(actions)?;

        let mut authenticate = None;
        let mut terminal = None;
        for action in actions {
            match action {
                ActionConfig::AuthenticateOidc(config) => {
                    let provider = self.provider_for(&config.session)?;
                    authenticate = Some(Arc::new(Authenticator::oidc(config, provider)?));
                },
                ActionConfig::AuthenticateCognito(config) => {
                    let provider = self.provider_for(&config.session)?;
                    authenticate = Some(Arc::new(Authenticator::cognito(config, provider)?));
                },
                ActionConfig::Forward(config) => {
                    terminal = Some(TerminalAction::Forward(ForwardAction::from_config(
                        config,
                        self.groups,
                    )?));
                },
                ActionConfig::Redirect(config) => {
                    terminal = Some(TerminalAction::Redirect(RedirectAction::new(config)?));
                },
                ActionConfig::FixedResponse(config) => {
                    terminal = Some(TerminalAction::FixedResponse(FixedResponseAction::new(
                        config,
                    )?));
                },
            }
        }

        let terminal = terminal.ok_or(ActionError::NoTerminalAction)?;
        Ok(ActionChain {
            authenticate,
            terminal,
        })
    }

    fn provider_for(&self, session: &SessionConfig) -> ActionResult<Arc<dyn IdentityProvider>> {
        match &self.provider {
            Some(provider) => Ok(Arc::clone(provider)),
            None => http_provider(session),
        }
    }
}
