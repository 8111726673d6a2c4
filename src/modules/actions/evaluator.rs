//! Runs a matched rule's action chain.

use super::action::{ActionChain, ActionResponse, TerminalAction};
use super::auth::{AuthDecision, AuthResponse};
use super::forward::Forwarded;
use crate::module::MetricsPayload;
use crate::modules::rules::RequestAttributes;
use crate::modules::target_group::SelectionContext;
use http::{HeaderName, HeaderValue, StatusCode};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Counters kept by the evaluator.
#[derive(Debug, Default)]
pub struct ActionStats {
    /// Requests handed to a target.
    pub forwarded: AtomicU64,
    /// Redirect responses.
    pub redirects: AtomicU64,
    /// Fixed responses.
    pub fixed_responses: AtomicU64,
    /// Redirects to an identity provider or back from the callback.
    pub auth_redirects: AtomicU64,
    /// Requests refused by an authenticate stage.
    pub auth_denied: AtomicU64,
    /// Identity provider failures.
    pub auth_errors: AtomicU64,
    /// Forwards that found no healthy target.
    pub no_healthy_targets: AtomicU64,
}

impl ActionStats {
    /// Export as metrics.
    #[must_use]
    pub fn metrics(&self) -> MetricsPayload {
        let mut payload = MetricsPayload::new();
        for (name, counter) in [
            ("forwarded", &self.forwarded),
            ("redirects", &self.redirects),
            ("fixed_responses", &self.fixed_responses),
            ("auth_redirects", &self.auth_redirects),
            ("auth_denied", &self.auth_denied),
            ("auth_errors", &self.auth_errors),
            ("no_healthy_targets", &self.no_healthy_targets),
        ] {
            payload.counter(name, counter.load(Ordering::Relaxed));
        }
        payload
    }
}

/// A request to pass on to a target.
#[derive(Debug)]
pub struct ForwardPlan {
    /// Chosen group and target.
    pub forwarded: Forwarded,
    /// Headers the authenticate stage adds.
    pub headers: Vec<(HeaderName, HeaderValue)>,
}

/// What to do with a request.
#[derive(Debug)]
pub enum Outcome {
    /// Answer directly.
    Respond(ActionResponse),
    /// Pass to a target.
    Forward(ForwardPlan),
}

/// Executes action chains: `[authenticate] -> forward | redirect | fixed-response`.
#[derive(Debug, Default)]
pub struct ActionEvaluator {
    stats: ActionStats,
}

impl ActionEvaluator {
    /// Create an evaluator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the counters.
    #[must_use]
    pub fn stats(&self) -> &ActionStats {
        &self.stats
    }

    /// Evaluate a chain for a request.
    pub async fn evaluate(&self, chain: &ActionChain, request: &RequestAttributes) -> Outcome {
        let mut headers = Vec::new();

        if let Some(authenticator) = chain.authenticator() {
            match authenticator.authenticate(request).await {
                AuthDecision::Authenticated(identity) => headers = identity,
                AuthDecision::Anonymous => {},
                AuthDecision::Respond(response) => {
                    let counter = match &response {
                        AuthResponse::Redirect(_) => &self.stats.auth_redirects,
                        AuthResponse::Denied(_) => &self.stats.auth_denied,
                        AuthResponse::Error(_) => &self.stats.auth_errors,
                    };
                    counter.fetch_add(1, Ordering::Relaxed);
                    return Outcome::Respond(response.into_response());
                },
            }
        }

        match chain.terminal_action() {
            TerminalAction::FixedResponse(action) => {
                self.stats.fixed_responses.fetch_add(1, Ordering::Relaxed);
                Outcome::Respond(action.response())
            },
            TerminalAction::Redirect(action) => match action.location(request) {
                Some(location) => {
                    self.stats.redirects.fetch_add(1, Ordering::Relaxed);
                    debug!(location = %location, "Redirecting");
                    Outcome::Respond(ActionResponse::redirect(action.status(), &location))
                },
                None => Outcome::Respond(ActionResponse::error(StatusCode::BAD_REQUEST)),
            },
            TerminalAction::Forward(action) => {
                let context = SelectionContext {
                    client_addr: Some(request.source),
                    cookies: request.cookies(),
                };
                match action.select(&context) {
                    Ok(forwarded) => {
                        self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
                        Outcome::Forward(ForwardPlan { forwarded, headers })
                    },
                    Err(e) => {
                        self.stats.no_healthy_targets.fetch_add(1, Ordering::Relaxed);
                        warn!(error = %e, path = %request.path, "Forward failed");
                        Outcome::Respond(ActionResponse::error(StatusCode::SERVICE_UNAVAILABLE))
                    },
                }
            },
        }
    }
}
