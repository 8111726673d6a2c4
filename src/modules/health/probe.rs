//! Active health probes.

use super::config::{HealthCheckConfig, HealthCheckProtocol};
use super::matcher::Matcher;
use super::state::{ProbeFailure, ProbeOutcome};
use crate::modules::tls::target_client_config;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{CONTENT_TYPE, TE};
use hyper::{Method, Request};
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::TlsConnector;
use tracing::debug;

/// Largest status-line-plus-headers block read from an HTTP probe.
const MAX_RESPONSE_HEAD: usize = 16 * 1024;

/// Runs one health check against one address.
///
/// The whole probe (connect, request, response) is bounded by the
/// configured timeout; exceeding it cancels the probe and counts as a
/// failure.
#[derive(Clone)]
pub struct HealthProbe {
    tls: TlsConnector,
}

impl std::fmt::Debug for HealthProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthProbe").finish_non_exhaustive()
    }
}

impl Default for HealthProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthProbe {
    /// Create a probe.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tls: TlsConnector::from(target_client_config()),
        }
    }

    /// Probe a target. `target` is the traffic address; the configured
    /// health check port overrides its port.
    pub async fn probe(&self, config: &HealthCheckConfig, target: SocketAddr) -> ProbeOutcome {
        let address = SocketAddr::new(target.ip(), config.port.unwrap_or(target.port()));

        let matcher = match config.build_matcher() {
            Ok(matcher) => matcher,
            Err(e) => return ProbeOutcome::Failure(ProbeFailure::Failed(e.to_string())),
        };
        let path = config.effective_path();

        let check = async {
            match config.protocol {
                HealthCheckProtocol::Tcp => connect(address).await.map(|_| ()),
                HealthCheckProtocol::Http => {
                    let stream = connect(address).await?;
                    check_http(stream, address, path, &matcher).await
                },
                HealthCheckProtocol::Https => {
                    let stream = connect(address).await?;
                    let stream = self
                        .tls
                        .connect(ServerName::IpAddress(address.ip().into()), stream)
                        .await
                        .map_err(|e| ProbeFailure::Failed(format!("TLS handshake failed: {e}")))?;
                    check_http(stream, address, path, &matcher).await
                },
                HealthCheckProtocol::Grpc => check_grpc(address, path, &matcher).await,
            }
        };

        let outcome = match timeout(config.timeout, check).await {
            Ok(Ok(())) => ProbeOutcome::Success,
            Ok(Err(failure)) => ProbeOutcome::Failure(failure),
            Err(_) => ProbeOutcome::Failure(ProbeFailure::Timeout),
        };

        debug!(
            target = %address,
            protocol = ?config.protocol,
            outcome = ?outcome,
            "Health probe finished"
        );

        outcome
    }
}

async fn connect(address: SocketAddr) -> Result<TcpStream, ProbeFailure> {
    TcpStream::connect(address)
        .await
        .map_err(|e| ProbeFailure::Failed(format!("connection failed: {e}")))
}

/// Send a GET and match the response status.
async fn check_http<S>(
    mut stream: S,
    address: SocketAddr,
    path: &str,
    matcher: &Matcher,
) -> Result<(), ProbeFailure>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = format!(
        "GET {path} HTTP/1.1\r\nHost: {}\r\nUser-Agent: ELB-HealthChecker/2.0\r\nAccept: */*\r\nConnection: close\r\n\r\n",
        address.ip()
    );
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| ProbeFailure::Failed(format!("failed to send request: {e}")))?;

    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    let code = loop {
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| ProbeFailure::Failed(format!("failed to read response: {e}")))?;
        if n == 0 {
            return Err(ProbeFailure::Failed(
                "connection closed before status line".to_string(),
            ));
        }
        buf.extend_from_slice(&chunk[..n]);

        let mut headers = [httparse::EMPTY_HEADER; 32];
        let mut response = httparse::Response::new(&mut headers);
        let parsed = response.parse(&buf);
        if let Some(code) = response.code {
            break code;
        }
        if let Err(e) = parsed {
            return Err(ProbeFailure::Failed(format!("invalid HTTP response: {e}")));
        }
        if buf.len() > MAX_RESPONSE_HEAD {
            return Err(ProbeFailure::Failed("response head too large".to_string()));
        }
    };

    if matcher.matches(u32::from(code)) {
        Ok(())
    } else {
        Err(ProbeFailure::ResponseCodeMismatch(u32::from(code)))
    }
}

/// Call `grpc.health.v1.Health/Check` and match `grpc-status`.
async fn check_grpc(address: SocketAddr, path: &str, matcher: &Matcher) -> Result<(), ProbeFailure> {
    let failed = |what: &str, e: &dyn std::fmt::Display| ProbeFailure::Failed(format!("{what}: {e}"));

    let stream = connect(address).await?;
    let (mut sender, connection) =
        hyper::client::conn::http2::handshake(TokioExecutor::new(), TokioIo::new(stream))
            .await
            .map_err(|e| failed("HTTP/2 handshake failed", &e))?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            debug!(error = %e, "gRPC health check connection closed");
        }
    });

    // Empty HealthCheckRequest: uncompressed flag plus zero length.
    let request = Request::builder()
        .method(Method::POST)
        .uri(format!("http://{address}{path}"))
        .header(CONTENT_TYPE, "application/grpc")
        .header(TE, "trailers")
        .body(Full::new(Bytes::from_static(&[0, 0, 0, 0, 0])))
        .map_err(|e| failed("invalid request", &e))?;

    let response = sender
        .send_request(request)
        .await
        .map_err(|e| failed("request failed", &e))?;

    let header_status = response.headers().get("grpc-status").cloned();
    let body = response
        .into_body()
        .collect()
        .await
        .map_err(|e| failed("failed to read response", &e))?;

    let status = header_status
        .or_else(|| body.trailers().and_then(|t| t.get("grpc-status").cloned()))
        .ok_or_else(|| ProbeFailure::Failed("response carried no grpc-status".to_string()))?;

    let code: u32 = status
        .to_str()
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| ProbeFailure::Failed("malformed grpc-status".to_string()))?;

    if matcher.matches(code) {
        Ok(())
    } else {
        Err(ProbeFailure::ResponseCodeMismatch(code))
    }
}
