//! End-to-end scenarios: HTTPS routing, round robin forwarding, stream and
//! datagram relaying, health thresholds, and connection draining.

use bytes::Bytes;
use http::header::HOST;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Empty, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use r0n_elb::config::ConfigLoader;
use r0n_elb::module::{ModuleContract, ModuleStatus};
use r0n_elb::modules::health::{
    HealthCheckProtocol, HealthRegistry, ProbeFailure, ProbeOutcome, TargetHealth,
};
use r0n_elb::modules::load_balancer::LoadBalancer;
use r0n_elb::modules::target_group::{
    Deregistration, SelectionContext, TargetGroup, TargetGroupConfig, TargetProtocol, TargetSpec,
};
use r0n_elb::modules::tls::verified_client_config;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::time::timeout;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::TlsConnector;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Send one GET over an established stream and return status and body.
async fn get<S>(stream: S, path: &str) -> (StatusCode, String)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .unwrap();
    tokio::spawn(connection);

    let request = Request::get(path)
        .header(HOST, "localhost")
        .body(Empty::<Bytes>::new())
        .unwrap();
    let response = sender.send_request(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

/// Start a backend that answers every request with its own name.
#[cfg(target_os = "linux")]
async fn backend(bind: &str, name: &'static str) -> SocketAddr {
    let listener = TcpListener::bind(bind).await.unwrap();
    let address = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let service = service_fn(move |_request| async move {
                    Ok::<_, Infallible>(Response::new(Full::new(Bytes::from(name))))
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    address
}

fn ip_group(name: &str, delay: Duration, thresholds: Option<u32>) -> TargetGroupConfig {
    let mut config = TargetGroupConfig::new(name, TargetProtocol::Http, 8080);
    config.deregistration_delay = delay;
    match thresholds {
        Some(threshold) => config.health_check.healthy_threshold = threshold,
        None => config.health_check.enabled = false,
    }
    config
}

fn mark_healthy(group: &TargetGroup, spec: &str) {
    let id = group.register(TargetSpec::new(spec)).unwrap();
    for _ in 0..group.health_check().healthy_threshold {
        group
            .record_health(id, ProbeOutcome::Success, Instant::now())
            .unwrap();
    }
    assert_eq!(group.target(id).unwrap().health(), TargetHealth::Healthy);
}

#[tokio::test]
async fn test_https_rule_routing() {
    let config = format!(
        r#"
        [load_balancer]
        name = "tls-elb"

        [[listeners]]
        name = "https"
        protocol = "HTTPS"
        port = 0
        bind_address = "127.0.0.1"
        certificates = [{{ cert_path = '{cert}', key_path = '{key}', default = true }}]
        default_actions = [{{ type = "fixed-response", status_code = 404, content_type = "text/plain" }}]

        [[listeners.rules]]
        priority = 10
        conditions = [{{ field = "path-pattern", values = ["/ok"] }}]
        actions = [{{ type = "fixed-response", status_code = 200, content_type = "text/plain", message_body = "OK" }}]
        "#,
        cert = fixture("localhost.crt").display(),
        key = fixture("localhost.key").display(),
    );
    let config = ConfigLoader::standard().load_str(&config).unwrap();

    let mut balancer = LoadBalancer::from_config(config).unwrap();
    balancer.start().unwrap();
    let address = balancer.listener("https").unwrap().local_addr().unwrap();

    let connector = TlsConnector::from(verified_client_config(&fixture("localhost.crt")).unwrap());
    let server_name = ServerName::try_from("localhost").unwrap();

    let stream = TcpStream::connect(address).await.unwrap();
    let stream = connector
        .connect(server_name.clone(), stream)
        .await
        .unwrap();
    let (status, body) = get(stream, "/ok").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "OK");

    let stream = TcpStream::connect(address).await.unwrap();
    let stream = connector.connect(server_name, stream).await.unwrap();
    let (status, _) = get(stream, "/other").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let stats = balancer.listener("https").unwrap().stats();
    assert_eq!(stats.requests.load(Ordering::Relaxed), 2);

    balancer.stop().unwrap();
}

#[test]
fn test_round_robin_skips_unhealthy() {
    let config = ip_group("web", Duration::from_secs(300), Some(2));
    let group = TargetGroup::new(&config, Arc::default()).unwrap();
    mark_healthy(&group, "10.0.0.1");
    mark_healthy(&group, "10.0.0.2");
    let unhealthy = group.register(TargetSpec::new("10.0.0.3")).unwrap();
    for _ in 0..2 {
        group
            .record_health(
                unhealthy,
                ProbeOutcome::Failure(ProbeFailure::Timeout),
                Instant::now(),
            )
            .unwrap();
    }
    assert_eq!(group.healthy_count(), 2);
    assert_eq!(group.unhealthy_count(), 1);

    let mut picks: HashMap<String, usize> = HashMap::new();
    for _ in 0..100 {
        let selection = group.select(&SelectionContext::new()).unwrap();
        *picks.entry(selection.target().spec().id.clone()).or_default() += 1;
    }

    assert_eq!(picks.get("10.0.0.1"), Some(&50));
    assert_eq!(picks.get("10.0.0.2"), Some(&50));
    assert_eq!(picks.get("10.0.0.3"), None);
}

// Both backends share a port on different loopback addresses, which needs
// the whole 127.0.0.0/8 block routed to `lo`.
#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_forward_alternates_between_targets() {
    let blue = backend("127.0.0.1:0", "blue").await;
    let green = backend(&format!("127.0.0.2:{}", blue.port()), "green").await;

    let config = format!(
        r#"
        [load_balancer]
        name = "rr-elb"

        [[target_groups]]
        name = "web"
        port = {port}
        deregistration_delay = "0s"
        health_check = {{ enabled = false }}
        targets = [{{ id = "127.0.0.1" }}, {{ id = "127.0.0.2" }}]

        [[listeners]]
        name = "http"
        protocol = "HTTP"
        port = 0
        bind_address = "127.0.0.1"
        default_actions = [{{ type = "forward", target_group = "web" }}]
        "#,
        port = green.port(),
    );
    let config = ConfigLoader::standard().load_str(&config).unwrap();

    let mut balancer = LoadBalancer::from_config(config).unwrap();
    balancer.start().unwrap();
    assert_eq!(balancer.status(), ModuleStatus::Running);
    let address = balancer.listener("http").unwrap().local_addr().unwrap();

    let mut bodies = Vec::new();
    for _ in 0..4 {
        let (status, body) = get(TcpStream::connect(address).await.unwrap(), "/").await;
        assert_eq!(status, StatusCode::OK);
        bodies.push(body);
    }
    assert_eq!(bodies, ["blue", "green", "blue", "green"]);

    balancer.stop().unwrap();
}

#[tokio::test]
async fn test_healthy_threshold_reached_on_third_success() {
    let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = backend.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((stream, _)) = backend.accept().await {
            drop(stream);
        }
    });

    let mut config = TargetGroupConfig::new("tcp", TargetProtocol::Tcp, port);
    config.health_check.protocol = HealthCheckProtocol::Tcp;
    config.health_check.interval = Duration::from_secs(10);
    config.health_check.timeout = Duration::from_secs(2);
    config.health_check.healthy_threshold = 3;
    config.health_check.unhealthy_threshold = 2;

    let registry = HealthRegistry::new();
    registry
        .add_group(Arc::new(TargetGroup::new(&config, Arc::default()).unwrap()))
        .unwrap();
    let id = registry
        .register_target("tcp", TargetSpec::new("127.0.0.1"))
        .unwrap();
    assert_eq!(registry.describe("tcp").unwrap()[0].state, TargetHealth::Initial);

    for expected in 1..=2 {
        let result = registry.run_health_check("tcp", id).await.unwrap();
        assert_eq!(result.outcome, ProbeOutcome::Success);
        assert_eq!(result.consecutive_successes, expected);
        assert_eq!(result.state, TargetHealth::Initial);
        assert!(!result.transitioned());
    }

    let result = registry.run_health_check("tcp", id).await.unwrap();
    assert_eq!(result.state, TargetHealth::Healthy);
    assert!(result.transitioned());
    assert_eq!(registry.group("tcp").unwrap().healthy_count(), 1);
}

#[test]
fn test_draining_target_leaves_rotation() {
    let config = ip_group("web", Duration::from_secs(300), None);
    let group = TargetGroup::new(&config, Arc::default()).unwrap();
    let draining = group.register(TargetSpec::new("10.0.0.1")).unwrap();
    group.register(TargetSpec::new("10.0.0.2")).unwrap();

    let (guard, _) = group
        .select(&SelectionContext::new())
        .unwrap()
        .into_parts();
    assert_eq!(guard.target().id(), draining);
    let target = Arc::clone(guard.target());
    assert_eq!(target.in_flight(), 1);

    let now = Instant::now();
    let Deregistration::Draining { deadline } = group.deregister(draining, now).unwrap() else {
        panic!("expected draining");
    };
    assert_eq!(deadline, now + Duration::from_secs(300));
    assert_eq!(target.health(), TargetHealth::Draining);
    assert_eq!(
        group.deregister(draining, now).unwrap(),
        Deregistration::AlreadyDraining
    );

    for _ in 0..10 {
        let selection = group.select(&SelectionContext::new()).unwrap();
        assert_ne!(selection.target().id(), draining);
    }

    assert!(group.sweep_drained(now + Duration::from_secs(299)).is_empty());
    assert!(!target.is_removed());
    assert_eq!(target.in_flight(), 1);

    assert_eq!(group.sweep_drained(deadline), vec![draining]);
    assert!(target.is_removed());
    assert!(group.target(draining).is_none());

    drop(guard);
    assert_eq!(target.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_drain_completes_after_delay() {
    let config = ip_group("web", Duration::from_secs(300), None);
    let registry = HealthRegistry::new();
    registry
        .add_group(Arc::new(TargetGroup::new(&config, Arc::default()).unwrap()))
        .unwrap();
    let id = registry
        .register_target("web", TargetSpec::new("10.0.0.1"))
        .unwrap();
    let target = registry.group("web").unwrap().target(id).unwrap();

    assert!(matches!(
        registry.deregister("web", id).unwrap(),
        Deregistration::Draining { .. }
    ));

    tokio::time::sleep(Duration::from_secs(299)).await;
    assert!(!target.is_removed());
    assert_eq!(registry.describe("web").unwrap()[0].state, TargetHealth::Draining);

    timeout(Duration::from_secs(2), target.removed())
        .await
        .unwrap();
    assert!(registry.describe("web").unwrap().is_empty());
}

async fn tcp_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    address
}

async fn udp_echo() -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let address = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = [0u8; 1500];
        while let Ok((len, peer)) = socket.recv_from(&mut buf).await {
            if socket.send_to(&buf[..len], peer).await.is_err() {
                break;
            }
        }
    });
    address
}

/// A started network load balancer whose `front` listener forwards to the
/// `echo` group. Health checks are off, so registered targets take traffic
/// immediately.
fn network_balancer(listener: &str, group: &str, backend: Option<SocketAddr>) -> LoadBalancer {
    let (port, targets) = match backend {
        Some(address) => (
            address.port(),
            format!(r#"{{ id = "{}" }}"#, address.ip()),
        ),
        None => (7, String::new()),
    };
    let certificates = if listener == "TLS" {
        format!(
            "certificates = [{{ cert_path = '{}', key_path = '{}', default = true }}]",
            fixture("localhost.crt").display(),
            fixture("localhost.key").display(),
        )
    } else {
        String::new()
    };

    let config = format!(
        r#"
        [load_balancer]
        name = "edge-nlb"
        type = "network"

        [[target_groups]]
        name = "echo"
        protocol = "{group}"
        port = {port}
        targets = [{targets}]

        [target_groups.health_check]
        enabled = false

        [[listeners]]
        name = "front"
        protocol = "{listener}"
        port = 0
        bind_address = "127.0.0.1"
        {certificates}
        default_actions = [{{ type = "forward", target_group = "echo" }}]
        "#
    );
    let config = ConfigLoader::standard().load_str(&config).unwrap();
    let mut balancer = LoadBalancer::from_config(config).unwrap();
    balancer.start().unwrap();
    balancer
}

fn front_addr(balancer: &LoadBalancer) -> SocketAddr {
    balancer.listener("front").unwrap().local_addr().unwrap()
}

async fn echo_round_trip<S>(mut stream: S, payload: &[u8]) -> Vec<u8>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(payload).await.unwrap();
    let mut reply = vec![0u8; payload.len()];
    timeout(Duration::from_secs(5), stream.read_exact(&mut reply))
        .await
        .unwrap()
        .unwrap();
    reply
}

#[tokio::test]
async fn test_tcp_listener_relays_to_target() {
    let backend = tcp_echo().await;
    let mut balancer = network_balancer("TCP", "tcp", Some(backend));
    let address = front_addr(&balancer);

    let stream = TcpStream::connect(address).await.unwrap();
    assert_eq!(echo_round_trip(stream, b"ping over tcp").await, b"ping over tcp");

    let stream = TcpStream::connect(address).await.unwrap();
    assert_eq!(echo_round_trip(stream, b"again").await, b"again");

    let stats = balancer.listener("front").unwrap().stats();
    assert_eq!(stats.rejected_connections.load(Ordering::Relaxed), 0);
    assert_eq!(stats.new_connections.load(Ordering::Relaxed), 2);

    balancer.stop().unwrap();
}

#[tokio::test]
async fn test_tls_listener_terminates_and_relays() {
    let backend = tcp_echo().await;
    let mut balancer = network_balancer("TLS", "tcp", Some(backend));
    let address = front_addr(&balancer);

    let connector = TlsConnector::from(verified_client_config(&fixture("localhost.crt")).unwrap());
    let stream = TcpStream::connect(address).await.unwrap();
    let stream = connector
        .connect(ServerName::try_from("localhost").unwrap(), stream)
        .await
        .unwrap();
    assert_eq!(echo_round_trip(stream, b"sealed").await, b"sealed");

    balancer.stop().unwrap();
}

#[tokio::test]
async fn test_udp_listener_relays_reply() {
    let backend = udp_echo().await;
    let mut balancer = network_balancer("UDP", "udp", Some(backend));
    let address = front_addr(&balancer);

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.send_to(b"query", address).await.unwrap();

    let mut buf = [0u8; 64];
    let (len, from) = timeout(Duration::from_secs(5), client.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..len], b"query");
    assert_eq!(from, address);

    let stats = balancer.listener("front").unwrap().stats();
    assert_eq!(stats.udp_flows.load(Ordering::Relaxed), 1);

    balancer.stop().unwrap();
}

#[tokio::test]
async fn test_tcp_connection_closed_without_healthy_target() {
    let mut balancer = network_balancer("TCP", "tcp", None);
    let address = front_addr(&balancer);

    let mut stream = TcpStream::connect(address).await.unwrap();
    let mut buf = [0u8; 16];
    let read = timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));

    let stats = Arc::clone(balancer.listener("front").unwrap().stats());
    timeout(Duration::from_secs(5), async move {
        while stats.rejected_connections.load(Ordering::Relaxed) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    balancer.stop().unwrap();
}
