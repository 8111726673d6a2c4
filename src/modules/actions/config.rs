//! Action configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Default session cookie name.
pub const DEFAULT_SESSION_COOKIE: &str = "AWSELBAuthSessionCookie";

/// Default session lifetime.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Trust bundle used for identity provider TLS when none is configured.
pub const DEFAULT_CA_BUNDLE: &str = "/etc/ssl/certs/ca-certificates.crt";

/// One action of a rule's chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ActionConfig {
    /// Route to one or more target groups.
    Forward(ForwardConfig),
    /// Redirect the client.
    Redirect(RedirectConfig),
    /// Answer directly.
    FixedResponse(FixedResponseConfig),
    /// Authenticate against an OpenID Connect provider.
    AuthenticateOidc(OidcConfig),
    /// Authenticate against a Cognito user pool.
    AuthenticateCognito(CognitoConfig),
}

impl ActionConfig {
    /// Get the action type name.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Forward(_) => "forward",
            Self::Redirect(_) => "redirect",
            Self::FixedResponse(_) => "fixed-response",
            Self::AuthenticateOidc(_) => "authenticate-oidc",
            Self::AuthenticateCognito(_) => "authenticate-cognito",
        }
    }

    /// Check if this is an authenticate action.
    #[must_use]
    pub fn is_authenticate(&self) -> bool {
        matches!(self, Self::AuthenticateOidc(_) | Self::AuthenticateCognito(_))
    }

    /// Target groups referenced by a forward action.
    #[must_use]
    pub fn target_group_names(&self) -> Vec<&str> {
        match self {
            Self::Forward(forward) => forward.groups().map(|(name, _)| name).collect(),
            _ => Vec::new(),
        }
    }
}

/// A weighted target group reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightedTargetGroup {
    /// Target group name.
    pub name: String,
    /// Relative weight, 0..=999.
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

/// Forward action configuration.
///
/// Either `target_group` or `target_groups` names the destination.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwardConfig {
    /// Single target group.
    pub target_group: Option<String>,
    /// Weighted target groups.
    pub target_groups: Vec<WeightedTargetGroup>,
    /// Group-level stickiness duration.
    #[serde(with = "humantime_serde")]
    pub stickiness_duration: Option<Duration>,
}

impl ForwardConfig {
    /// Forward to one group.
    #[must_use]
    pub fn to_group(name: impl Into<String>) -> Self {
        Self {
            target_group: Some(name.into()),
            ..Self::default()
        }
    }

    /// All referenced groups with their weights.
    pub fn groups(&self) -> impl Iterator<Item = (&str, u32)> {
        self.target_group
            .iter()
            .map(|name| (name.as_str(), 1))
            .chain(self.target_groups.iter().map(|g| (g.name.as_str(), g.weight)))
    }
}

/// Redirect status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RedirectStatus {
    /// Permanent.
    #[serde(rename = "HTTP_301")]
    Permanent,
    /// Temporary.
    #[serde(rename = "HTTP_302")]
    #[default]
    Found,
}

/// Redirect action configuration. Every component may use `#{protocol}`,
/// `#{host}`, `#{port}`, `#{path}` and `#{query}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedirectConfig {
    /// `HTTP`, `HTTPS` or `#{protocol}`.
    pub protocol: String,
    /// Host name.
    pub host: String,
    /// Port, 1..=65535 or `#{port}`.
    pub port: String,
    /// Absolute path.
    pub path: String,
    /// Query without the leading `?`.
    pub query: String,
    /// 301 or 302.
    pub status_code: RedirectStatus,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            protocol: "#{protocol}".to_string(),
            host: "#{host}".to_string(),
            port: "#{port}".to_string(),
            path: "/#{path}".to_string(),
            query: "#{query}".to_string(),
            status_code: RedirectStatus::Found,
        }
    }
}

/// Fixed response configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixedResponseConfig {
    /// Status code, 2XX, 4XX or 5XX.
    pub status_code: u16,
    /// Content type.
    #[serde(default)]
    pub content_type: Option<String>,
    /// Body, at most 1024 bytes.
    #[serde(default)]
    pub message_body: Option<String>,
}

/// Behavior when a request carries no valid session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnauthenticatedAction {
    /// Answer 401.
    Deny,
    /// Pass the request on without identity headers.
    Allow,
    /// Redirect to the identity provider.
    #[default]
    Authenticate,
}

/// Settings shared by OIDC and Cognito authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Requested scopes.
    pub scope: String,
    /// Session cookie name.
    pub session_cookie_name: String,
    /// Session lifetime.
    #[serde(with = "humantime_serde")]
    pub session_timeout: Duration,
    /// Unauthenticated request behavior.
    pub on_unauthenticated_request: UnauthenticatedAction,
    /// Extra authorization request parameters.
    pub authentication_request_extra_params: BTreeMap<String, String>,
    /// PEM trust bundle for identity provider TLS.
    pub ca_file: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scope: "openid".to_string(),
            session_cookie_name: DEFAULT_SESSION_COOKIE.to_string(),
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            on_unauthenticated_request: UnauthenticatedAction::Authenticate,
            authentication_request_extra_params: BTreeMap::new(),
            ca_file: None,
        }
    }
}

/// OpenID Connect authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcConfig {
    /// Issuer identifier.
    pub issuer: String,
    /// Authorization endpoint.
    pub authorization_endpoint: String,
    /// Token endpoint.
    pub token_endpoint: String,
    /// User info endpoint.
    #[serde(default)]
    pub user_info_endpoint: Option<String>,
    /// Client id.
    pub client_id: String,
    /// Client secret.
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Session settings.
    #[serde(flatten)]
    pub session: SessionConfig,
}

/// Cognito user pool authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CognitoConfig {
    /// User pool ARN. The region is taken from it.
    pub user_pool_arn: String,
    /// App client id.
    pub user_pool_client_id: String,
    /// Hosted UI domain prefix.
    pub user_pool_domain: String,
    /// App client secret.
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Session settings.
    #[serde(flatten)]
    pub session: SessionConfig,
}
