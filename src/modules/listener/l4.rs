//! TCP and TLS stream forwarding.

use super::stats::ListenerStats;
use crate::modules::rules::RuleEngine;
use crate::modules::target_group::{SelectionContext, Target, TargetProtocol};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{copy_bidirectional, AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::{debug, warn};

/// A bidirectional byte stream.
trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ByteStream for T {}

type BoxedStream = Box<dyn ByteStream>;

/// Shared state of one TCP or TLS listener.
pub(super) struct StreamContext {
    pub(super) name: String,
    pub(super) engine: Arc<RuleEngine>,
    pub(super) stats: Arc<ListenerStats>,
    pub(super) connect_timeout: Duration,
    pub(super) target_tls: TlsConnector,
}

#[derive(Debug, Error)]
enum StreamError {
    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] std::io::Error),

    #[error("default action is not a forward")]
    NoForward,

    #[error(transparent)]
    NoTarget(#[from] crate::modules::target_group::TargetGroupError),

    #[error("target {0} has no network address")]
    NotAddressable(String),

    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),

    #[error("connect timed out")]
    ConnectTimeout,

    #[error("target TLS handshake failed: {0}")]
    TargetTls(#[source] std::io::Error),
}

/// How a relayed flow ended.
enum FlowEnd {
    Closed { bytes: u64 },
    Reset(std::io::Error),
    TargetRemoved,
    Shutdown,
}

/// Accept loop for a TCP or TLS listener.
pub(super) async fn serve(
    listener: TcpListener,
    context: Arc<StreamContext>,
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
                        tokio::spawn(async move {
                            context.stats.connection_opened();
                            if let Err(e) = handle_connection(stream, client, &context, tls, shutdown).await {
                                if matches!(e, StreamError::Handshake(_)) {
                                    context.stats.tls_handshake_errors.fetch_add(1, Ordering::Relaxed);
                                } else {
                                    context.stats.rejected_connections.fetch_add(1, Ordering::Relaxed);
                                }
                                debug!(listener = %context.name, %client, error = %e, "Connection closed");
                            }
                            context.stats.connection_closed();
                        });
                    }
                    Err(e) => {
                        warn!(listener = %context.name, error = %e, "Accept failed");
                    }
                }
            }
            _ = shutdown.changed() => {
                debug!(listener = %context.name, "Stream accept loop stopping");
                break;
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    client: SocketAddr,
    context: &StreamContext,
    tls: Option<TlsAcceptor>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), StreamError> {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%client, error = %e, "Failed to set TCP_NODELAY");
    }
    let client_stream: BoxedStream = match tls {
        Some(acceptor) => Box::new(acceptor.accept(stream).await.map_err(StreamError::Handshake)?),
        None => Box::new(stream),
    };

    let chain = Arc::clone(context.engine.snapshot().default_rule().actions());
    let forward = chain.forward().ok_or(StreamError::NoForward)?;
    let forwarded = forward.select(&SelectionContext::new().with_client_addr(client))?;
    let target = Arc::clone(forwarded.guard.target());

    let upstream = match connect(&target, forwarded.group.protocol(), context).await {
        Ok(upstream) => upstream,
        Err(e) => {
            target.stats().record_failure();
            context
                .stats
                .target_connection_errors
                .fetch_add(1, Ordering::Relaxed);
            return Err(e);
        },
    };

    debug!(
        listener = %context.name,
        %client,
        target = %target.spec().id,
        group = %forwarded.group.name(),
        "Relaying stream"
    );

    match relay(client_stream, upstream, &target, &mut shutdown).await {
        FlowEnd::Closed { bytes } => {
            context
                .stats
                .processed_bytes
                .fetch_add(bytes, Ordering::Relaxed);
            debug!(%client, bytes, elapsed = ?forwarded.guard.elapsed(), "Stream closed");
        },
        FlowEnd::Reset(e) => {
            debug!(%client, error = %e, "Stream reset");
        },
        FlowEnd::TargetRemoved => {
            debug!(%client, target = %target.spec().id, "Target deregistered, closing stream");
        },
        FlowEnd::Shutdown => {},
    }

    Ok(())
}

async fn connect(
    target: &Target,
    protocol: TargetProtocol,
    context: &StreamContext,
) -> Result<BoxedStream, StreamError> {
    let address = target
        .address()
        .ok_or_else(|| StreamError::NotAddressable(target.spec().id.clone()))?;

    let stream = timeout(context.connect_timeout, TcpStream::connect(address))
        .await
        .map_err(|_| StreamError::ConnectTimeout)?
        .map_err(StreamError::Connect)?;
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%address, error = %e, "Failed to set TCP_NODELAY on target connection");
    }

    if protocol == TargetProtocol::Tls {
        let stream = context
            .target_tls
            .connect(ServerName::IpAddress(address.ip().into()), stream)
            .await
            .map_err(StreamError::TargetTls)?;
        Ok(Box::new(stream))
    } else {
        Ok(Box::new(stream))
    }
}

async fn relay(
    mut client: BoxedStream,
    mut upstream: BoxedStream,
    target: &Target,
    shutdown: &mut watch::Receiver<bool>,
) -> FlowEnd {
    tokio::select! {
        result = copy_bidirectional(&mut client, &mut upstream) => match result {
            Ok((sent, received)) => FlowEnd::Closed { bytes: sent + received },
            Err(e) => FlowEnd::Reset(e),
        },
        () = target.removed() => FlowEnd::TargetRemoved,
        _ = shutdown.changed() => FlowEnd::Shutdown,
    }
}
