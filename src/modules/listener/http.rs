//! HTTP and HTTPS request handling.
//!
//! Each accepted connection is served by hyper. Requests are matched against
//! the listener's rules, the matched chain is evaluated, and forwarded
//! requests are sent to the chosen target over a fresh HTTP/1.1 connection.

use super::body::{full, GuardedBody, ResponseBody};
use super::stats::ListenerStats;
use crate::modules::actions::{ActionEvaluator, ActionResponse, ForwardPlan, Forwarded, Outcome};
use crate::modules::rules::{RequestAttributes, RuleEngine};
use crate::modules::target_group::TargetProtocol;
use http::header::{CONNECTION, HOST, SET_COOKIE};
use http::request::Parts;
use http::{HeaderMap, HeaderName, HeaderValue, Request, Response, StatusCode, Uri, Version};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::client::conn::http1::SendRequest;
use hyper::server::conn::{http1, http2};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::{debug, warn};

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
const X_FORWARDED_PORT: HeaderName = HeaderName::from_static("x-forwarded-port");

/// Headers scoped to a single connection. Never forwarded.
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Prefix of identity headers set by an authenticate stage.
const IDENTITY_PREFIX: &str = "x-amzn-oidc-";

/// Shared state of one HTTP(S) listener.
pub(super) struct HttpContext {
    pub(super) name: String,
    pub(super) engine: Arc<RuleEngine>,
    pub(super) evaluator: Arc<ActionEvaluator>,
    pub(super) stats: Arc<ListenerStats>,
    pub(super) scheme: &'static str,
    pub(super) port: u16,
    pub(super) connect_timeout: Duration,
    pub(super) target_tls: TlsConnector,
}

/// Why a forwarded request got no answer from its target.
#[derive(Debug, Error)]
enum ProxyError {
    #[error("target {0} has no network address")]
    NotAddressable(String),

    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),

    #[error("connect timed out")]
    ConnectTimeout,

    #[error("TLS handshake failed: {0}")]
    Tls(#[source] std::io::Error),

    #[error("HTTP handshake failed: {0}")]
    Handshake(#[source] hyper::Error),

    #[error("target request failed: {0}")]
    Upstream(#[source] hyper::Error),

    #[error("target deregistered")]
    TargetRemoved,

    #[error("invalid request target: {0}")]
    InvalidUri(#[from] http::uri::InvalidUri),
}

impl ProxyError {
    fn status(&self) -> StatusCode {
        match self {
            Self::ConnectTimeout => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        }
    }

    fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connect(_) | Self::ConnectTimeout | Self::Tls(_) | Self::Handshake(_)
        )
    }
}

/// Accept loop for an HTTP or HTTPS listener.
pub(super) async fn serve(
    listener: TcpListener,
    context: Arc<HttpContext>,
    tls: Option<TlsAcceptor>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, client)) => {
                        let context = Arc::clone(&context);
                        let tls = tls.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(handle_connection(stream, client, context, tls, shutdown));
                    }
                    Err(e) => {
                        warn!(listener = %context.name, error = %e, "Accept failed");
                    }
                }
            }
            _ = shutdown.changed() => {
                debug!(listener = %context.name, "HTTP accept loop stopping");
                break;
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    client: SocketAddr,
    context: Arc<HttpContext>,
    tls: Option<TlsAcceptor>,
    shutdown: watch::Receiver<bool>,
) {
    context.stats.connection_opened();
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%client, error = %e, "Failed to set TCP_NODELAY");
    }

    match tls {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(stream) => {
                let h2 = stream.get_ref().1.alpn_protocol() == Some(b"h2".as_slice());
                serve_connection(stream, h2, client, Arc::clone(&context), shutdown).await;
            },
            Err(e) => {
                context
                    .stats
                    .tls_handshake_errors
                    .fetch_add(1, Ordering::Relaxed);
                debug!(listener = %context.name, %client, error = %e, "TLS handshake failed");
            },
        },
        None => serve_connection(stream, false, client, Arc::clone(&context), shutdown).await,
    }

    context.stats.connection_closed();
}

/// Serve one connection. On listener shutdown, in-progress requests finish
/// and the connection closes.
async fn serve_connection<S>(
    stream: S,
    h2: bool,
    client: SocketAddr,
    context: Arc<HttpContext>,
    mut shutdown: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);
    let service = service_fn(move |request| {
        let context = Arc::clone(&context);
        async move { Ok::<_, Infallible>(handle_request(request, client, &context).await) }
    });

    let result = if h2 {
        let connection = http2::Builder::new(TokioExecutor::new()).serve_connection(io, service);
        tokio::pin!(connection);
        tokio::select! {
            result = connection.as_mut() => result,
            _ = shutdown.changed() => {
                connection.as_mut().graceful_shutdown();
                connection.await
            }
        }
    } else {
        let connection = http1::Builder::new().serve_connection(io, service);
        tokio::pin!(connection);
        tokio::select! {
            result = connection.as_mut() => result,
            _ = shutdown.changed() => {
                connection.as_mut().graceful_shutdown();
                connection.await
            }
        }
    };

    if let Err(e) = result {
        debug!(%client, error = %e, "Connection closed with error");
    }
}

/// Route one request and produce its response.
pub(super) async fn handle_request(
    request: Request<Incoming>,
    client: SocketAddr,
    context: &HttpContext,
) -> Response<ResponseBody> {
    context.stats.requests.fetch_add(1, Ordering::Relaxed);

    let (parts, body) = request.into_parts();
    let attributes = RequestAttributes::from_parts(
        &parts.method,
        &parts.uri,
        &parts.headers,
        client,
        context.scheme,
        context.port,
    );

    let rule = context.engine.match_request(&attributes);
    debug!(
        listener = %context.name,
        method = %attributes.method,
        path = %attributes.path,
        rule = ?rule.priority(),
        "Matched rule"
    );

    match context.evaluator.evaluate(rule.actions(), &attributes).await {
        Outcome::Respond(response) => {
            context.stats.record_response(response.status, true);
            generated(response)
        },
        Outcome::Forward(plan) => match proxy(parts, body, &attributes, plan, context).await {
            Ok(response) => {
                context.stats.record_response(response.status(), false);
                response
            },
            Err(e) => {
                let status = e.status();
                warn!(
                    listener = %context.name,
                    path = %attributes.path,
                    error = %e,
                    status = status.as_u16(),
                    "Forward to target failed"
                );
                context.stats.record_response(status, true);
                generated(ActionResponse::error(status))
            },
        },
    }
}

/// Convert a load balancer generated response.
fn generated(response: ActionResponse) -> Response<ResponseBody> {
    let mut out = Response::new(full(response.body));
    *out.status_mut() = response.status;
    *out.headers_mut() = response.headers;
    out
}

async fn proxy(
    mut parts: Parts,
    body: Incoming,
    attributes: &RequestAttributes,
    plan: ForwardPlan,
    context: &HttpContext,
) -> Result<Response<ResponseBody>, ProxyError> {
    let ForwardPlan {
        forwarded: Forwarded {
            group,
            guard,
            cookies,
        },
        headers: identity,
    } = plan;
    let target = Arc::clone(guard.target());

    let address = target
        .address()
        .ok_or_else(|| ProxyError::NotAddressable(target.spec().id.clone()))?;

    let mut sender = match connect(address, group.protocol(), context).await {
        Ok(sender) => sender,
        Err(e) => {
            if e.is_connection_error() {
                target.stats().record_failure();
                context
                    .stats
                    .target_connection_errors
                    .fetch_add(1, Ordering::Relaxed);
            }
            return Err(e);
        },
    };

    let authority = parts.uri.authority().map(ToString::to_string);
    parts.uri = attributes.path_and_query().parse::<Uri>()?;
    parts.version = Version::HTTP_11;
    prepare_request_headers(&mut parts.headers, authority, attributes, identity);

    let started = Instant::now();
    let request = Request::from_parts(parts, body);
    let response = tokio::select! {
        response = sender.send_request(request) => response.map_err(|e| {
            target.stats().record_failure();
            ProxyError::Upstream(e)
        })?,
        () = target.removed() => return Err(ProxyError::TargetRemoved),
    };

    let elapsed = started.elapsed();
    target.stats().record_response(elapsed);
    context
        .stats
        .record_target_response(u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX));

    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);

    for cookie in cookies {
        if let Some(app_cookie) = &cookie.requires_app_cookie {
            if !sets_cookie(&parts.headers, app_cookie) {
                continue;
            }
        }
        if let Ok(value) = HeaderValue::from_str(&cookie.header_value()) {
            parts.headers.append(SET_COOKIE, value);
        }
    }

    Ok(Response::from_parts(
        parts,
        GuardedBody::new(body, guard).boxed_unsync(),
    ))
}

/// Open an HTTP/1.1 connection to a target.
async fn connect(
    address: SocketAddr,
    protocol: TargetProtocol,
    context: &HttpContext,
) -> Result<SendRequest<Incoming>, ProxyError> {
    let stream = timeout(context.connect_timeout, TcpStream::connect(address))
        .await
        .map_err(|_| ProxyError::ConnectTimeout)?
        .map_err(ProxyError::Connect)?;
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%address, error = %e, "Failed to set TCP_NODELAY on target connection");
    }

    if protocol == TargetProtocol::Https {
        let stream = context
            .target_tls
            .connect(ServerName::IpAddress(address.ip().into()), stream)
            .await
            .map_err(ProxyError::Tls)?;
        handshake(stream).await
    } else {
        handshake(stream).await
    }
}

async fn handshake<S>(stream: S) -> Result<SendRequest<Incoming>, ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(ProxyError::Handshake)?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            debug!(error = %e, "Target connection closed with error");
        }
    });

    Ok(sender)
}

/// Rewrite client headers for the target.
fn prepare_request_headers(
    headers: &mut HeaderMap,
    authority: Option<String>,
    attributes: &RequestAttributes,
    identity: Vec<(HeaderName, HeaderValue)>,
) {
    strip_hop_by_hop(headers);

    let spoofed: Vec<HeaderName> = headers
        .keys()
        .filter(|name| name.as_str().starts_with(IDENTITY_PREFIX))
        .cloned()
        .collect();
    for name in spoofed {
        headers.remove(name);
    }
    for (name, value) in identity {
        headers.insert(name, value);
    }

    if !headers.contains_key(HOST) {
        if let Some(value) = authority.and_then(|a| HeaderValue::from_str(&a).ok()) {
            headers.insert(HOST, value);
        }
    }

    let client_ip = attributes.source_ip().to_string();
    let forwarded_for = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(existing) => format!("{existing}, {client_ip}"),
        None => client_ip,
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
        headers.insert(X_FORWARDED_FOR, value);
    }
    headers.insert(
        X_FORWARDED_PROTO,
        HeaderValue::from_static(attributes.scheme),
    );
    headers.insert(X_FORWARDED_PORT, HeaderValue::from(attributes.port));
}

/// Remove hop-by-hop headers, including any named by `Connection`.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Check whether a response sets a cookie with the given name.
fn sets_cookie(headers: &HeaderMap, name: &str) -> bool {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split_once('='))
        .any(|(cookie, _)| cookie.trim() == name)
}
