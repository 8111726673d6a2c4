//! Registered targets and in-flight accounting.

use super::config::{TargetSpec, TargetType};
use crate::modules::health::{HealthTracker, TargetHealth};
use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Stable identifier of a registration within a target group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TargetId(pub u64);

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Per-target request statistics.
#[derive(Debug, Default)]
pub struct TargetStats {
    /// Requests or connections dispatched.
    pub requests: AtomicU64,
    /// Dispatches that failed at the target (connect error, reset).
    pub failures: AtomicU64,
    /// Sum of response times in microseconds.
    pub response_time_us: AtomicU64,
    /// Number of timed responses.
    pub responses: AtomicU64,
}

impl TargetStats {
    /// Record a response and its latency.
    pub fn record_response(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.response_time_us.fetch_add(micros, Ordering::Relaxed);
        self.responses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed dispatch.
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Mean response time, if any responses were recorded.
    #[must_use]
    pub fn mean_response_time(&self) -> Option<Duration> {
        let count = self.responses.load(Ordering::Relaxed);
        (count > 0).then(|| {
            Duration::from_micros(self.response_time_us.load(Ordering::Relaxed) / count)
        })
    }
}

/// A target registered in a group.
///
/// Records live in the group's arena and are shared with the active
/// snapshot and with in-flight requests via `Arc`.
#[derive(Debug)]
pub struct Target {
    id: TargetId,
    spec: TargetSpec,
    kind: TargetType,
    address: Option<SocketAddr>,
    pub(super) health: Mutex<HealthTracker>,
    pub(super) drain_deadline: Mutex<Option<Instant>>,
    in_flight: AtomicU32,
    stats: TargetStats,
    removed: watch::Sender<bool>,
}

impl Target {
    pub(super) fn new(
        id: TargetId,
        spec: TargetSpec,
        kind: TargetType,
        address: Option<SocketAddr>,
        checks_enabled: bool,
    ) -> Self {
        Self {
            id,
            spec,
            kind,
            address,
            health: Mutex::new(HealthTracker::new(checks_enabled)),
            drain_deadline: Mutex::new(None),
            in_flight: AtomicU32::new(0),
            stats: TargetStats::default(),
            removed: watch::Sender::new(false),
        }
    }

    /// Get the registration id.
    #[must_use]
    pub fn id(&self) -> TargetId {
        self.id
    }

    /// Get the registered descriptor.
    #[must_use]
    pub fn spec(&self) -> &TargetSpec {
        &self.spec
    }

    /// Get the target kind.
    #[must_use]
    pub fn kind(&self) -> TargetType {
        self.kind
    }

    /// Get the network address, if the target kind has one.
    #[must_use]
    pub fn address(&self) -> Option<SocketAddr> {
        self.address
    }

    /// Get the current health classification.
    #[must_use]
    pub fn health(&self) -> TargetHealth {
        self.health.lock().expect("health lock poisoned").state()
    }

    /// Get a copy of the health tracker.
    #[must_use]
    pub fn tracker(&self) -> HealthTracker {
        self.health.lock().expect("health lock poisoned").clone()
    }

    /// Get the drain deadline, if draining.
    #[must_use]
    pub fn drain_deadline(&self) -> Option<Instant> {
        *self.drain_deadline.lock().expect("drain lock poisoned")
    }

    /// Get the number of in-flight requests.
    #[must_use]
    pub fn in_flight(&self) -> u32 {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Get request statistics.
    #[must_use]
    pub fn stats(&self) -> &TargetStats {
        &self.stats
    }

    /// Check if the target has been removed from its group.
    #[must_use]
    pub fn is_removed(&self) -> bool {
        *self.removed.borrow()
    }

    /// Wait until the target is removed from its group.
    ///
    /// Connections still open to a draining target use this to close once
    /// the deregistration delay has elapsed.
    pub async fn removed(&self) {
        let mut rx = self.removed.subscribe();
        let _ = rx.wait_for(|removed| *removed).await;
    }

    pub(super) fn mark_removed(&self) {
        self.health.lock().expect("health lock poisoned").retire();
        self.removed.send_replace(true);
    }

    /// Check whether a registration request matches this target exactly.
    pub(super) fn same_registration(&self, spec: &TargetSpec, default_port: Option<u16>) -> bool {
        self.spec.port.or(default_port) == spec.port.or(default_port)
            && self.spec.availability_zone == spec.availability_zone
    }
}

/// Holds one in-flight slot on a target. Released on drop, so a request
/// cancelled by client disconnect gives its slot back.
#[derive(Debug)]
pub struct InFlightGuard {
    target: Arc<Target>,
    started: Instant,
}

impl InFlightGuard {
    /// Take a slot on the target.
    #[must_use]
    pub fn new(target: Arc<Target>) -> Self {
        target.in_flight.fetch_add(1, Ordering::AcqRel);
        target.stats.requests.fetch_add(1, Ordering::Relaxed);
        Self {
            target,
            started: Instant::now(),
        }
    }

    /// Get the target.
    #[must_use]
    pub fn target(&self) -> &Arc<Target> {
        &self.target
    }

    /// Time since dispatch.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.target.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> Arc<Target> {
        Arc::new(Target::new(
            TargetId(1),
            TargetSpec::new("10.0.0.1"),
            TargetType::Ip,
            Some("10.0.0.1:80".parse().unwrap()),
            true,
        ))
    }

    #[test]
    fn test_guard_counts() {
        let target = target();
        let first = InFlightGuard::new(Arc::clone(&target));
        let second = InFlightGuard::new(Arc::clone(&target));
        assert_eq!(target.in_flight(), 2);

        drop(first);
        assert_eq!(target.in_flight(), 1);
        drop(second);
        assert_eq!(target.in_flight(), 0);
        assert_eq!(target.stats().requests.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_same_registration() {
        let target = target();
        assert!(target.same_registration(&TargetSpec::new("10.0.0.1"), Some(80)));
        assert!(target.same_registration(&TargetSpec::new("10.0.0.1").with_port(80), Some(80)));
        assert!(!target.same_registration(&TargetSpec::new("10.0.0.1").with_port(81), Some(80)));
        assert!(!target.same_registration(
            &TargetSpec::new("10.0.0.1").in_zone("us-east-1a"),
            Some(80)
        ));
    }

    #[tokio::test]
    async fn test_removed_signal() {
        let target = target();
        assert!(!target.is_removed());

        let waiter = {
            let target = Arc::clone(&target);
            tokio::spawn(async move { target.removed().await })
        };

        target.mark_removed();
        waiter.await.unwrap();
        assert!(target.is_removed());
        assert_eq!(target.health(), TargetHealth::Unused);
    }

    #[test]
    fn test_mean_response_time() {
        let stats = TargetStats::default();
        assert!(stats.mean_response_time().is_none());
        stats.record_response(Duration::from_millis(10));
        stats.record_response(Duration::from_millis(30));
        assert_eq!(stats.mean_response_time(), Some(Duration::from_millis(20)));
    }
}
