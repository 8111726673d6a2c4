//! Listener statistics.

use crate::module::MetricsPayload;
use http::StatusCode;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one listener.
#[derive(Debug, Default)]
pub struct ListenerStats {
    /// Connections accepted.
    pub new_connections: AtomicU64,
    /// Connections closed without a target.
    pub rejected_connections: AtomicU64,
    /// Open connections.
    pub active_connections: AtomicU64,
    /// TLS handshakes that failed.
    pub tls_handshake_errors: AtomicU64,
    /// HTTP requests received.
    pub requests: AtomicU64,
    /// Responses by class, from targets or the load balancer.
    pub responses_2xx: AtomicU64,
    /// 3xx responses.
    pub responses_3xx: AtomicU64,
    /// 4xx responses.
    pub responses_4xx: AtomicU64,
    /// 5xx responses.
    pub responses_5xx: AtomicU64,
    /// 4xx responses generated by the load balancer.
    pub elb_4xx: AtomicU64,
    /// 5xx responses generated by the load balancer.
    pub elb_5xx: AtomicU64,
    /// Failed target connections.
    pub target_connection_errors: AtomicU64,
    /// Sum of target response times in microseconds.
    pub target_response_time_us: AtomicU64,
    /// Responses received from targets.
    pub target_responses: AtomicU64,
    /// Bytes relayed by L4 flows.
    pub processed_bytes: AtomicU64,
    /// Active UDP flows.
    pub udp_flows: AtomicU64,
}

impl ListenerStats {
    /// Create zeroed stats.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted connection.
    pub fn connection_opened(&self) {
        self.new_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a closed connection.
    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a response sent to a client.
    pub fn record_response(&self, status: StatusCode, generated: bool) {
        let class = match status.as_u16() {
            200..=299 => &self.responses_2xx,
            300..=399 => &self.responses_3xx,
            400..=499 => &self.responses_4xx,
            500..=599 => &self.responses_5xx,
            _ => return,
        };
        class.fetch_add(1, Ordering::Relaxed);

        if generated {
            if status.is_client_error() {
                self.elb_4xx.fetch_add(1, Ordering::Relaxed);
            } else if status.is_server_error() {
                self.elb_5xx.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Record the time a target took to answer.
    pub fn record_target_response(&self, micros: u64) {
        self.target_responses.fetch_add(1, Ordering::Relaxed);
        self.target_response_time_us
            .fetch_add(micros, Ordering::Relaxed);
    }

    /// Export as metrics.
    #[must_use]
    pub fn metrics(&self) -> MetricsPayload {
        let mut payload = MetricsPayload::new();
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);

        payload.counter("new_connections", load(&self.new_connections));
        payload.counter("rejected_connections", load(&self.rejected_connections));
        payload.counter("tls_handshake_errors", load(&self.tls_handshake_errors));
        payload.counter("requests", load(&self.requests));
        payload.counter("responses_2xx", load(&self.responses_2xx));
        payload.counter("responses_3xx", load(&self.responses_3xx));
        payload.counter("responses_4xx", load(&self.responses_4xx));
        payload.counter("responses_5xx", load(&self.responses_5xx));
        payload.counter("elb_4xx", load(&self.elb_4xx));
        payload.counter("elb_5xx", load(&self.elb_5xx));
        payload.counter("target_connection_errors", load(&self.target_connection_errors));
        payload.counter("processed_bytes", load(&self.processed_bytes));
        payload.gauge("active_connections", load(&self.active_connections) as f64);
        payload.gauge("udp_flows", load(&self.udp_flows) as f64);

        let responses = load(&self.target_responses);
        if responses > 0 {
            payload.gauge(
                "target_response_time_seconds",
                load(&self.target_response_time_us) as f64 / responses as f64 / 1_000_000.0,
            );
        }

        payload
    }
}
