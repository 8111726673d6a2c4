//! Identity provider token exchange.

use super::error::{ActionError, ActionResult};
use crate::modules::tls::verified_client_config;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HOST};
use hyper::{Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};
use url::Url;

/// Default bound on one token exchange, including the user info call.
pub const DEFAULT_IDP_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest identity provider response body accepted.
const MAX_RESPONSE_BODY: usize = 64 * 1024;

/// Identity provider endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdpEndpoints {
    /// Authorization endpoint the browser is sent to.
    pub authorization: Url,
    /// Token endpoint.
    pub token: Url,
    /// User info endpoint.
    pub user_info: Option<Url>,
}

/// Client registration at the identity provider.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    /// Client id.
    pub client_id: String,
    /// Client secret.
    pub client_secret: Option<String>,
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "***"))
            .finish()
    }
}

/// An authenticated user.
#[derive(Debug, Clone)]
pub struct Identity {
    /// Subject claim.
    pub subject: String,
    /// Access token issued by the provider.
    pub access_token: String,
    /// User claims.
    pub claims: Value,
}

/// Future returned by identity providers.
pub type IdpFuture<'a> = Pin<Box<dyn Future<Output = ActionResult<Identity>> + Send + 'a>>;

/// Redeems authorization codes for identities.
pub trait IdentityProvider: Send + Sync + fmt::Debug {
    /// Exchange an authorization code.
    fn redeem_code<'a>(
        &'a self,
        endpoints: &'a IdpEndpoints,
        client: &'a ClientCredentials,
        code: &'a str,
        redirect_uri: &'a str,
    ) -> IdpFuture<'a>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    id_token: Option<String>,
}

/// Talks to a real provider over HTTP/1.1, with TLS for `https` endpoints.
#[derive(Clone)]
pub struct HttpIdentityProvider {
    tls: TlsConnector,
    timeout: Duration,
}

impl fmt::Debug for HttpIdentityProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpIdentityProvider")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl HttpIdentityProvider {
    /// Create a provider client trusting the CA bundle at `ca_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the bundle cannot be loaded.
    pub fn new(ca_path: &Path) -> ActionResult<Self> {
        Ok(Self {
            tls: TlsConnector::from(verified_client_config(ca_path)?),
            timeout: DEFAULT_IDP_TIMEOUT,
        })
    }

    /// Set the exchange timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn exchange(
        &self,
        endpoints: &IdpEndpoints,
        client: &ClientCredentials,
        code: &str,
        redirect_uri: &str,
    ) -> ActionResult<Identity> {
        let form = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "authorization_code")
            .append_pair("code", code)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("client_id", &client.client_id)
            .finish();

        let mut request = Request::builder()
            .method(Method::POST)
            .uri(request_target(&endpoints.token))
            .header(HOST, authority(&endpoints.token)?)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(ACCEPT, "application/json");
        if let Some(secret) = &client.client_secret {
            let basic = STANDARD.encode(format!("{}:{secret}", client.client_id));
            request = request.header(AUTHORIZATION, format!("Basic {basic}"));
        }
        let request = request
            .body(Full::new(Bytes::from(form)))
            .map_err(|e| ActionError::Idp(e.to_string()))?;

        let body = self.send(&endpoints.token, request).await?;
        let tokens: TokenResponse = serde_json::from_slice(&body)
            .map_err(|e| ActionError::Idp(format!("invalid token response: {e}")))?;

        let claims = match &endpoints.user_info {
            Some(url) => {
                let request = Request::builder()
                    .method(Method::GET)
                    .uri(request_target(url))
                    .header(HOST, authority(url)?)
                    .header(ACCEPT, "application/json")
                    .header(AUTHORIZATION, format!("Bearer {}", tokens.access_token))
                    .body(Full::new(Bytes::new()))
                    .map_err(|e| ActionError::Idp(e.to_string()))?;
                let body = self.send(url, request).await?;
                serde_json::from_slice(&body)
                    .map_err(|e| ActionError::Idp(format!("invalid user info response: {e}")))?
            },
            None => tokens
                .id_token
                .as_deref()
                .and_then(id_token_claims)
                .ok_or_else(|| {
                    ActionError::Idp("token response has no usable id_token".to_string())
                })?,
        };

        let subject = claims
            .get("sub")
            .and_then(Value::as_str)
            .ok_or_else(|| ActionError::Idp("identity has no 'sub' claim".to_string()))?
            .to_string();

        debug!(subject = %subject, "Redeemed authorization code");

        Ok(Identity {
            subject,
            access_token: tokens.access_token,
            claims,
        })
    }

    async fn send(&self, url: &Url, request: Request<Full<Bytes>>) -> ActionResult<Bytes> {
        let host = url
            .host_str()
            .ok_or_else(|| ActionError::Idp(format!("'{url}' has no host")))?;
        let port = url.port_or_known_default().unwrap_or(443);

        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| ActionError::Idp(format!("connect to {host}:{port} failed: {e}")))?;

        let (status, body) = if url.scheme() == "https" {
            let name = ServerName::try_from(host.to_string())
                .map_err(|e| ActionError::Idp(format!("invalid server name '{host}': {e}")))?;
            let stream = self
                .tls
                .connect(name, stream)
                .await
                .map_err(|e| ActionError::Idp(format!("TLS handshake with {host} failed: {e}")))?;
            round_trip(stream, request).await?
        } else {
            round_trip(stream, request).await?
        };

        if !status.is_success() {
            warn!(url = %url, status = %status, "Identity provider returned an error");
            return Err(ActionError::Idp(format!("{url} returned {status}")));
        }
        Ok(body)
    }
}

impl IdentityProvider for HttpIdentityProvider {
    fn redeem_code<'a>(
        &'a self,
        endpoints: &'a IdpEndpoints,
        client: &'a ClientCredentials,
        code: &'a str,
        redirect_uri: &'a str,
    ) -> IdpFuture<'a> {
        Box::pin(async move {
            tokio::time::timeout(
                self.timeout,
                self.exchange(endpoints, client, code, redirect_uri),
            )
            .await
            .map_err(|_| ActionError::Idp("token exchange timed out".to_string()))?
        })
    }
}

async fn round_trip<S>(io: S, request: Request<Full<Bytes>>) -> ActionResult<(StatusCode, Bytes)>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(io))
        .await
        .map_err(|e| ActionError::Idp(format!("HTTP handshake failed: {e}")))?;
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(error = %e, "Identity provider connection closed");
        }
    });

    let response = sender
        .send_request(request)
        .await
        .map_err(|e| ActionError::Idp(format!("request failed: {e}")))?;
    let status = response.status();
    let body = http_body_util::Limited::new(response.into_body(), MAX_RESPONSE_BODY)
        .collect()
        .await
        .map_err(|e| ActionError::Idp(format!("reading response failed: {e}")))?
        .to_bytes();
    Ok((status, body))
}

fn request_target(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{query}", url.path()),
        None => url.path().to_string(),
    }
}

fn authority(url: &Url) -> ActionResult<String> {
    let host = url
        .host_str()
        .ok_or_else(|| ActionError::Idp(format!("'{url}' has no host")))?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

/// Decode the claims of an ID token. The token comes straight from the
/// token endpoint over TLS, so its signature is not checked.
pub(crate) fn id_token_claims(token: &str) -> Option<Value> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice(&bytes).ok()
}
