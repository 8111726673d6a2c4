//! UDP flow forwarding.
//!
//! A flow is keyed by client address. The first datagram from a client
//! selects a target and opens a connected upstream socket; later datagrams
//! reuse it until the flow has been idle for the listener's UDP timeout.

use super::stats::ListenerStats;
use crate::modules::rules::RuleEngine;
use crate::modules::target_group::{InFlightGuard, SelectionContext, TargetGroupError};
use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Instant};
use tracing::{debug, warn};

/// Largest datagram relayed.
const MAX_DATAGRAM: usize = 65_535;

/// Shared state of one UDP listener.
pub(super) struct DatagramContext {
    pub(super) name: String,
    pub(super) engine: Arc<RuleEngine>,
    pub(super) stats: Arc<ListenerStats>,
    pub(super) idle_timeout: Duration,
}

#[derive(Debug, Error)]
enum FlowError {
    #[error("default action is not a forward")]
    NoForward,

    #[error(transparent)]
    NoTarget(#[from] TargetGroupError),

    #[error("target {0} has no network address")]
    NotAddressable(String),

    #[error("upstream socket: {0}")]
    Socket(#[from] std::io::Error),
}

/// Last time either side of a flow sent a datagram.
#[derive(Debug)]
struct Activity {
    epoch: Instant,
    last_ms: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let now = u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_ms.store(now, Ordering::Relaxed);
    }

    fn idle(&self) -> Duration {
        self.epoch
            .elapsed()
            .saturating_sub(Duration::from_millis(self.last_ms.load(Ordering::Relaxed)))
    }
}

struct Flow {
    upstream: Arc<UdpSocket>,
    activity: Arc<Activity>,
    task: JoinHandle<()>,
}

impl Flow {
    fn is_closed(&self) -> bool {
        self.task.is_finished()
    }
}

/// Receive loop for a UDP listener.
pub(super) async fn serve(
    socket: UdpSocket,
    context: Arc<DatagramContext>,
    mut shutdown: watch::Receiver<bool>,
) {
    let socket = Arc::new(socket);
    let mut flows: HashMap<SocketAddr, Flow> = HashMap::new();
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut sweep = interval(context.idle_timeout);

    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                match received {
                    Ok((len, client)) => {
                        forward_datagram(&buf[..len], client, &socket, &mut flows, &context, &shutdown).await;
                    }
                    Err(e) => {
                        debug!(listener = %context.name, error = %e, "UDP receive failed");
                    }
                }
            }
            _ = sweep.tick() => {
                flows.retain(|_, flow| !flow.is_closed());
            }
            _ = shutdown.changed() => {
                debug!(listener = %context.name, flows = flows.len(), "UDP receive loop stopping");
                break;
            }
        }
    }
}

async fn forward_datagram(
    datagram: &[u8],
    client: SocketAddr,
    socket: &Arc<UdpSocket>,
    flows: &mut HashMap<SocketAddr, Flow>,
    context: &Arc<DatagramContext>,
    shutdown: &watch::Receiver<bool>,
) {
    if flows.get(&client).map_or(true, Flow::is_closed) {
        match open_flow(client, socket, context, shutdown.clone()).await {
            Ok(flow) => {
                flows.insert(client, flow);
            },
            Err(e) => {
                context
                    .stats
                    .rejected_connections
                    .fetch_add(1, Ordering::Relaxed);
                debug!(listener = %context.name, %client, error = %e, "Dropping datagram");
                return;
            },
        }
    }

    let Some(flow) = flows.get(&client) else {
        return;
    };
    flow.activity.touch();
    match flow.upstream.send(datagram).await {
        Ok(sent) => {
            context
                .stats
                .processed_bytes
                .fetch_add(sent as u64, Ordering::Relaxed);
        },
        Err(e) => {
            debug!(listener = %context.name, %client, error = %e, "Send to target failed");
        },
    }
}

async fn open_flow(
    client: SocketAddr,
    socket: &Arc<UdpSocket>,
    context: &Arc<DatagramContext>,
    shutdown: watch::Receiver<bool>,
) -> Result<Flow, FlowError> {
    let chain = Arc::clone(context.engine.snapshot().default_rule().actions());
    let forward = chain.forward().ok_or(FlowError::NoForward)?;
    let forwarded = forward.select(&SelectionContext::new().with_client_addr(client))?;

    let target = forwarded.guard.target();
    let address = target
        .address()
        .ok_or_else(|| FlowError::NotAddressable(target.spec().id.clone()))?;

    let local: SocketAddr = if address.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let upstream = UdpSocket::bind(local).await?;
    upstream.connect(address).await?;
    let upstream = Arc::new(upstream);

    debug!(listener = %context.name, %client, target = %target.spec().id, "Opened UDP flow");

    let activity = Arc::new(Activity::new());
    let task = tokio::spawn(relay_replies(
        Arc::clone(socket),
        Arc::clone(&upstream),
        client,
        Arc::clone(&activity),
        forwarded.guard,
        Arc::clone(context),
        shutdown,
    ));

    Ok(Flow {
        upstream,
        activity,
        task,
    })
}

/// Relay target replies to the client until the flow idles out, the target
/// is removed, or the listener stops. The guard keeps the flow counted as
/// in flight on its target.
async fn relay_replies(
    socket: Arc<UdpSocket>,
    upstream: Arc<UdpSocket>,
    client: SocketAddr,
    activity: Arc<Activity>,
    guard: InFlightGuard,
    context: Arc<DatagramContext>,
    mut shutdown: watch::Receiver<bool>,
) {
    context.stats.udp_flows.fetch_add(1, Ordering::Relaxed);
    let target = Arc::clone(guard.target());
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        let idle = activity.idle();
        if idle >= context.idle_timeout {
            debug!(listener = %context.name, %client, "UDP flow idle, closing");
            break;
        }

        tokio::select! {
            received = timeout(context.idle_timeout - idle, upstream.recv(&mut buf)) => {
                match received {
                    Ok(Ok(len)) => {
                        activity.touch();
                        context.stats.processed_bytes.fetch_add(len as u64, Ordering::Relaxed);
                        if let Err(e) = socket.send_to(&buf[..len], client).await {
                            warn!(listener = %context.name, %client, error = %e, "Reply to client failed");
                            break;
                        }
                    }
                    Ok(Err(e)) => {
                        target.stats().record_failure();
                        debug!(listener = %context.name, %client, error = %e, "Target unreachable");
                        break;
                    }
                    Err(_) => {}
                }
            }
            () = target.removed() => {
                debug!(listener = %context.name, %client, "Target deregistered, closing UDP flow");
                break;
            }
            _ = shutdown.changed() => break,
        }
    }

    context.stats.udp_flows.fetch_sub(1, Ordering::Relaxed);
    drop(guard);
}
