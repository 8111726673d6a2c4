//! OIDC and Cognito authentication.

use super::action::ActionResponse;
use super::config::{
    CognitoConfig, OidcConfig, SessionConfig, UnauthenticatedAction, DEFAULT_CA_BUNDLE,
};
use super::error::{ActionError, ActionResult};
use super::idp::{
    ClientCredentials, HttpIdentityProvider, Identity, IdentityProvider, IdpEndpoints,
};
use super::session::{PendingAuthorizations, SessionStore};
use crate::modules::rules::RequestAttributes;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use http::header::SET_COOKIE;
use http::{HeaderName, HeaderValue, StatusCode};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};
use url::Url;

/// Path the identity provider redirects back to.
pub const CALLBACK_PATH: &str = "/oauth2/idpresponse";

/// Subject of the authenticated user.
pub const IDENTITY_HEADER: HeaderName = HeaderName::from_static("x-amzn-oidc-identity");

/// Access token of the authenticated user.
pub const ACCESS_TOKEN_HEADER: HeaderName = HeaderName::from_static("x-amzn-oidc-accesstoken");

/// User claims, base64url-encoded JSON.
pub const CLAIMS_HEADER: HeaderName = HeaderName::from_static("x-amzn-oidc-data");

/// Result of running the authenticate stage.
#[derive(Debug)]
pub enum AuthDecision {
    /// Valid session. Headers to add to the forwarded request.
    Authenticated(Vec<(HeaderName, HeaderValue)>),
    /// No session, but unauthenticated requests are allowed.
    Anonymous,
    /// Answer the client directly.
    Respond(AuthResponse),
}

/// Why the authenticate stage answered the client itself.
#[derive(Debug)]
pub enum AuthResponse {
    /// Redirect to the identity provider, or back after login.
    Redirect(ActionResponse),
    /// Request refused.
    Denied(ActionResponse),
    /// Identity provider failure.
    Error(ActionResponse),
}

impl AuthResponse {
    /// Get the response.
    #[must_use]
    pub fn into_response(self) -> ActionResponse {
        match self {
            Self::Redirect(r) | Self::Denied(r) | Self::Error(r) => r,
        }
    }
}

/// Which kind of provider an authenticator talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthKind {
    /// Generic OpenID Connect.
    Oidc,
    /// Cognito user pool.
    Cognito,
}

/// The authenticate stage of an action chain.
#[derive(Debug)]
pub struct Authenticator {
    kind: AuthKind,
    endpoints: IdpEndpoints,
    client: ClientCredentials,
    scope: String,
    cookie_name: String,
    on_unauthenticated: UnauthenticatedAction,
    extra_params: Vec<(String, String)>,
    sessions: SessionStore,
    pending: PendingAuthorizations,
    provider: Arc<dyn IdentityProvider>,
}

impl Authenticator {
    /// Build an OIDC authenticator.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for malformed endpoints or session settings.
    pub fn oidc(config: &OidcConfig, provider: Arc<dyn IdentityProvider>) -> ActionResult<Self> {
        if config.issuer.is_empty() || config.client_id.is_empty() {
            return Err(ActionError::InvalidConfig(
                "OIDC issuer and client_id are required".to_string(),
            ));
        }
        let endpoints = IdpEndpoints {
            authorization: parse_endpoint("authorization_endpoint", &config.authorization_endpoint)?,
            token: parse_endpoint("token_endpoint", &config.token_endpoint)?,
            user_info: config
                .user_info_endpoint
                .as_deref()
                .map(|u| parse_endpoint("user_info_endpoint", u))
                .transpose()?,
        };
        let client = ClientCredentials {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        };
        Self::build(AuthKind::Oidc, endpoints, client, &config.session, provider)
    }

    /// Build a Cognito authenticator. Endpoints come from the hosted UI
    /// domain and the region in the user pool ARN.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a malformed ARN or domain.
    pub fn cognito(config: &CognitoConfig, provider: Arc<dyn IdentityProvider>) -> ActionResult<Self> {
        let region = cognito_region(&config.user_pool_arn).ok_or_else(|| {
            ActionError::InvalidConfig(format!(
                "'{}' is not a Cognito user pool ARN",
                config.user_pool_arn
            ))
        })?;
        if config.user_pool_client_id.is_empty() {
            return Err(ActionError::InvalidConfig(
                "user_pool_client_id is required".to_string(),
            ));
        }

        let base = format!(
            "https://{}.auth.{region}.amazoncognito.com",
            config.user_pool_domain
        );
        let endpoints = IdpEndpoints {
            authorization: parse_endpoint("user_pool_domain", &format!("{base}/oauth2/authorize"))?,
            token: parse_endpoint("user_pool_domain", &format!("{base}/oauth2/token"))?,
            user_info: Some(parse_endpoint("user_pool_domain", &format!("{base}/oauth2/userInfo"))?),
        };
        let client = ClientCredentials {
            client_id: config.user_pool_client_id.clone(),
            client_secret: config.client_secret.clone(),
        };
        Self::build(AuthKind::Cognito, endpoints, client, &config.session, provider)
    }

    fn build(
        kind: AuthKind,
        endpoints: IdpEndpoints,
        client: ClientCredentials,
        session: &SessionConfig,
        provider: Arc<dyn IdentityProvider>,
    ) -> ActionResult<Self> {
        if session.session_timeout.is_zero() {
            return Err(ActionError::InvalidConfig(
                "session_timeout must be positive".to_string(),
            ));
        }
        if HeaderValue::from_str(&session.session_cookie_name).is_err()
            || session.session_cookie_name.is_empty()
            || session.session_cookie_name.contains(['=', ';', ' '])
        {
            return Err(ActionError::InvalidConfig(format!(
                "'{}' is not a valid cookie name",
                session.session_cookie_name
            )));
        }

        Ok(Self {
            kind,
            endpoints,
            client,
            scope: session.scope.clone(),
            cookie_name: session.session_cookie_name.clone(),
            on_unauthenticated: session.on_unauthenticated_request,
            extra_params: session
                .authentication_request_extra_params
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            sessions: SessionStore::new(session.session_timeout),
            pending: PendingAuthorizations::new(),
            provider,
        })
    }

    /// Get the provider kind.
    #[must_use]
    pub fn kind(&self) -> AuthKind {
        self.kind
    }

    /// Get the provider endpoints.
    #[must_use]
    pub fn endpoints(&self) -> &IdpEndpoints {
        &self.endpoints
    }

    /// Get the session store.
    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Run the authenticate stage for a request.
    pub async fn authenticate(&self, request: &RequestAttributes) -> AuthDecision {
        let now = Instant::now();

        if request.path == CALLBACK_PATH {
            return AuthDecision::Respond(self.callback(request, now).await);
        }

        if let Some(session) = request
            .cookies()
            .get(&self.cookie_name)
            .and_then(|token| self.sessions.get(token, now))
        {
            return AuthDecision::Authenticated(identity_headers(&session.identity));
        }

        match self.on_unauthenticated {
            UnauthenticatedAction::Allow => AuthDecision::Anonymous,
            UnauthenticatedAction::Deny => {
                debug!(path = %request.path, "Unauthenticated request denied");
                AuthDecision::Respond(AuthResponse::Denied(ActionResponse::error(
                    StatusCode::UNAUTHORIZED,
                )))
            },
            UnauthenticatedAction::Authenticate => {
                let Some(redirect_uri) = callback_uri(request) else {
                    return AuthDecision::Respond(AuthResponse::Denied(ActionResponse::error(
                        StatusCode::BAD_REQUEST,
                    )));
                };
                let state = self.pending.issue(request.path_and_query(), now);
                let location = self.authorization_url(&redirect_uri, &state);
                AuthDecision::Respond(AuthResponse::Redirect(ActionResponse::redirect(
                    StatusCode::FOUND,
                    location.as_str(),
                )))
            },
        }
    }

    async fn callback(&self, request: &RequestAttributes, now: Instant) -> AuthResponse {
        let mut code = None;
        let mut state = None;
        let mut error = None;
        for (key, value) in request.query_pairs() {
            match key.as_ref() {
                "code" => code = Some(value.into_owned()),
                "state" => state = Some(value.into_owned()),
                "error" => error = Some(value.into_owned()),
                _ => {},
            }
        }

        if let Some(error) = error {
            debug!(error = %error, "Identity provider refused authentication");
            return AuthResponse::Denied(ActionResponse::error(StatusCode::UNAUTHORIZED));
        }

        let return_to = state.as_deref().and_then(|s| self.pending.redeem(s, now));
        let (Some(code), Some(return_to)) = (code, return_to) else {
            debug!("Callback with missing code or unknown state");
            return AuthResponse::Denied(ActionResponse::error(StatusCode::UNAUTHORIZED));
        };
        let Some(redirect_uri) = callback_uri(request) else {
            return AuthResponse::Denied(ActionResponse::error(StatusCode::BAD_REQUEST));
        };

        match self
            .provider
            .redeem_code(&self.endpoints, &self.client, &code, &redirect_uri)
            .await
        {
            Ok(identity) => {
                let token = self.sessions.create(identity, now);
                let cookie = format!(
                    "{}={token}; Max-Age={}; Path=/; Secure; HttpOnly",
                    self.cookie_name,
                    self.sessions.timeout().as_secs()
                );
                let mut response = ActionResponse::redirect(StatusCode::FOUND, &return_to);
                if let Ok(value) = HeaderValue::from_str(&cookie) {
                    response.headers.append(SET_COOKIE, value);
                }
                AuthResponse::Redirect(response)
            },
            Err(e) => {
                warn!(kind = ?self.kind, error = %e, "Authorization code exchange failed");
                AuthResponse::Error(ActionResponse::error(StatusCode::INTERNAL_SERVER_ERROR))
            },
        }
    }

    fn authorization_url(&self, redirect_uri: &str, state: &str) -> Url {
        let mut url = self.endpoints.authorization.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.client.client_id)
                .append_pair("redirect_uri", redirect_uri)
                .append_pair("scope", &self.scope)
                .append_pair("state", state);
            for (key, value) in &self.extra_params {
                query.append_pair(key, value);
            }
        }
        url
    }
}

/// Build an identity provider client for a session configuration.
///
/// # Errors
///
/// Returns an error if the trust bundle cannot be loaded.
pub fn http_provider(session: &SessionConfig) -> ActionResult<Arc<dyn IdentityProvider>> {
    let ca = session
        .ca_file
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_CA_BUNDLE));
    Ok(Arc::new(HttpIdentityProvider::new(ca)?))
}

fn parse_endpoint(field: &str, value: &str) -> ActionResult<Url> {
    let url = Url::parse(value)
        .map_err(|e| ActionError::InvalidConfig(format!("{field} '{value}': {e}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(ActionError::InvalidConfig(format!(
            "{field} '{value}' must be an http(s) URL"
        )));
    }
    Ok(url)
}

/// `arn:aws:cognito-idp:<region>:<account>:userpool/<id>`
fn cognito_region(arn: &str) -> Option<&str> {
    let mut parts = arn.split(':');
    let (Some("arn"), Some(_), Some("cognito-idp"), Some(region), Some(_), Some(resource)) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return None;
    };
    (!region.is_empty() && resource.starts_with("userpool/")).then_some(region)
}

fn callback_uri(request: &RequestAttributes) -> Option<String> {
    let host = request.host.as_deref()?;
    let default_port = if request.scheme == "https" { 443 } else { 80 };
    Some(if request.port == default_port {
        format!("{}://{host}{CALLBACK_PATH}", request.scheme)
    } else {
        format!("{}://{host}:{}{CALLBACK_PATH}", request.scheme, request.port)
    })
}

fn identity_headers(identity: &Identity) -> Vec<(HeaderName, HeaderValue)> {
    let claims = URL_SAFE_NO_PAD.encode(identity.claims.to_string());
    [
        (IDENTITY_HEADER, identity.subject.as_str()),
        (ACCESS_TOKEN_HEADER, identity.access_token.as_str()),
        (CLAIMS_HEADER, claims.as_str()),
    ]
    .into_iter()
    .filter_map(|(name, value)| HeaderValue::from_str(value).ok().map(|v| (name, v)))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::actions::idp::IdpFuture;
    use http::header::LOCATION;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct MockProvider {
        fail: bool,
        calls: AtomicUsize,
    }

    impl IdentityProvider for MockProvider {
        fn redeem_code<'a>(
            &'a self,
            _endpoints: &'a IdpEndpoints,
            client: &'a ClientCredentials,
            code: &'a str,
            redirect_uri: &'a str,
        ) -> IdpFuture<'a> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                assert_eq!(client.client_id, "elb");
                assert_eq!(redirect_uri, "https://app.example.com/oauth2/idpresponse");
                if self.fail {
                    return Err(ActionError::Idp("unreachable".to_string()));
                }
                Ok(Identity {
                    subject: format!("user-{code}"),
                    access_token: "access".to_string(),
                    claims: serde_json::json!({ "sub": format!("user-{code}") }),
                })
            })
        }
    }

    fn oidc_config(policy: UnauthenticatedAction) -> OidcConfig {
        OidcConfig {
            issuer: "https://idp.example.com".to_string(),
            authorization_endpoint: "https://idp.example.com/authorize".to_string(),
            token_endpoint: "https://idp.example.com/token".to_string(),
            user_info_endpoint: None,
            client_id: "elb".to_string(),
            client_secret: None,
            session: SessionConfig {
                on_unauthenticated_request: policy,
                ..SessionConfig::default()
            },
        }
    }

    fn authenticator(policy: UnauthenticatedAction, provider: Arc<MockProvider>) -> Authenticator {
        Authenticator::oidc(&oidc_config(policy), provider).unwrap()
    }

    fn request(path: &str) -> RequestAttributes {
        RequestAttributes::get(path)
            .with_host("app.example.com")
            .with_listener("https", 443)
    }

    fn location(decision: AuthDecision) -> String {
        let AuthDecision::Respond(AuthResponse::Redirect(response)) = decision else {
            panic!("expected redirect");
        };
        response.headers[LOCATION].to_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_deny_and_allow() {
        let provider = Arc::new(MockProvider::default());

        let deny = authenticator(UnauthenticatedAction::Deny, Arc::clone(&provider));
        let AuthDecision::Respond(AuthResponse::Denied(response)) =
            deny.authenticate(&request("/app")).await
        else {
            panic!("expected denial");
        };
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);

        let allow = authenticator(UnauthenticatedAction::Allow, provider);
        assert!(matches!(
            allow.authenticate(&request("/app")).await,
            AuthDecision::Anonymous
        ));
    }

    #[tokio::test]
    async fn test_full_login_flow() {
        let provider = Arc::new(MockProvider::default());
        let auth = authenticator(UnauthenticatedAction::Authenticate, Arc::clone(&provider));

        let login = Url::parse(&location(auth.authenticate(&request("/app?x=1")).await)).unwrap();
        assert_eq!(login.host_str(), Some("idp.example.com"));
        let params: std::collections::HashMap<_, _> = login.query_pairs().into_owned().collect();
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["client_id"], "elb");
        assert_eq!(params["scope"], "openid");
        assert_eq!(
            params["redirect_uri"],
            "https://app.example.com/oauth2/idpresponse"
        );

        let callback = request(&format!(
            "/oauth2/idpresponse?code=42&state={}",
            params["state"]
        ));
        let decision = auth.authenticate(&callback).await;
        let AuthDecision::Respond(AuthResponse::Redirect(response)) = decision else {
            panic!("expected redirect back");
        };
        assert_eq!(response.headers[LOCATION], "/app?x=1");
        let cookie = response.headers[SET_COOKIE].to_str().unwrap().to_string();
        assert!(cookie.starts_with("AWSELBAuthSessionCookie="));
        assert!(cookie.contains("Max-Age=604800"));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        let token = cookie.split(';').next().unwrap();
        let AuthDecision::Authenticated(headers) = auth
            .authenticate(&request("/app").with_header("cookie", token))
            .await
        else {
            panic!("expected session");
        };
        assert!(headers
            .iter()
            .any(|(n, v)| *n == IDENTITY_HEADER && v == "user-42"));

        // The state is single use.
        assert!(matches!(
            auth.authenticate(&callback).await,
            AuthDecision::Respond(AuthResponse::Denied(_))
        ));
    }

    #[tokio::test]
    async fn test_idp_failure_is_server_error() {
        let provider = Arc::new(MockProvider {
            fail: true,
            ..MockProvider::default()
        });
        let auth = authenticator(UnauthenticatedAction::Authenticate, provider);

        let login = Url::parse(&location(auth.authenticate(&request("/")).await)).unwrap();
        let state = login
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap();

        let decision = auth
            .authenticate(&request(&format!("/oauth2/idpresponse?code=1&state={state}")))
            .await;
        let AuthDecision::Respond(AuthResponse::Error(response)) = decision else {
            panic!("expected error");
        };
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_idp_error_parameter() {
        let auth = authenticator(
            UnauthenticatedAction::Authenticate,
            Arc::new(MockProvider::default()),
        );
        assert!(matches!(
            auth.authenticate(&request("/oauth2/idpresponse?error=access_denied"))
                .await,
            AuthDecision::Respond(AuthResponse::Denied(_))
        ));
    }

    #[test]
    fn test_cognito_endpoints() {
        let config = CognitoConfig {
            user_pool_arn: "arn:aws:cognito-idp:eu-west-1:123456789012:userpool/eu-west-1_abc"
                .to_string(),
            user_pool_client_id: "client".to_string(),
            user_pool_domain: "my-app".to_string(),
            client_secret: None,
            session: SessionConfig::default(),
        };
        let auth = Authenticator::cognito(&config, Arc::new(MockProvider::default())).unwrap();
        assert_eq!(auth.kind(), AuthKind::Cognito);
        assert_eq!(
            auth.endpoints().token.as_str(),
            "https://my-app.auth.eu-west-1.amazoncognito.com/oauth2/token"
        );

        let bad = CognitoConfig {
            user_pool_arn: "arn:aws:s3:::bucket".to_string(),
            ..config
        };
        assert!(Authenticator::cognito(&bad, Arc::new(MockProvider::default())).is_err());
    }

    #[test]
    fn test_invalid_endpoint() {
        let mut config = oidc_config(UnauthenticatedAction::Deny);
        config.token_endpoint = "not a url".to_string();
        assert!(Authenticator::oidc(&config, Arc::new(MockProvider::default())).is_err());
    }
}
