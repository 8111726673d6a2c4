//! Target group: registration arena plus a versioned snapshot of healthy
//! targets used for selection.

use super::config::{TargetGroupConfig, TargetProtocol, TargetResolver, TargetSpec, TargetType};
use super::error::{TargetGroupError, TargetGroupResult};
use super::stickiness::{Stickiness, StickyCookie};
use super::strategy::{create_strategy, Strategy};
use super::target::{InFlightGuard, Target, TargetId};
use crate::modules::health::{
    HealthCheckConfig, HealthCheckResult, HealthReason, ProbeOutcome, TargetHealth,
};
use arc_swap::ArcSwap;
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info};

/// Immutable set of healthy targets, in registration order.
#[derive(Debug, Default)]
pub struct ActiveSet {
    version: u64,
    targets: Vec<Arc<Target>>,
}

impl ActiveSet {
    /// Get the snapshot version. Bumped on every membership or health change.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Get the healthy targets.
    #[must_use]
    pub fn targets(&self) -> &[Arc<Target>] {
        &self.targets
    }
}

/// Request data a target group uses for selection.
#[derive(Debug, Clone, Default)]
pub struct SelectionContext {
    /// Client address.
    pub client_addr: Option<SocketAddr>,
    /// Request cookies.
    pub cookies: HashMap<String, String>,
}

impl SelectionContext {
    /// Create an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the client address.
    #[must_use]
    pub fn with_client_addr(mut self, addr: SocketAddr) -> Self {
        self.client_addr = Some(addr);
        self
    }

    /// Add a cookie.
    #[must_use]
    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }
}

/// A selected target. Holds an in-flight slot until dropped.
#[derive(Debug)]
pub struct Selection {
    guard: InFlightGuard,
    cookie: Option<StickyCookie>,
}

impl Selection {
    /// Get the selected target.
    #[must_use]
    pub fn target(&self) -> &Arc<Target> {
        self.guard.target()
    }

    /// Get the stickiness cookie to return to the client, if any.
    #[must_use]
    pub fn cookie(&self) -> Option<&StickyCookie> {
        self.cookie.as_ref()
    }

    /// Split into the in-flight guard and the cookie.
    #[must_use]
    pub fn into_parts(self) -> (InFlightGuard, Option<StickyCookie>) {
        (self.guard, self.cookie)
    }
}

/// Outcome of a deregistration request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deregistration {
    /// Target now draining until the deadline.
    Draining {
        /// When the target will be removed.
        deadline: Instant,
    },
    /// Target was already draining. Nothing changed.
    AlreadyDraining,
    /// Delay is zero. Target removed immediately.
    Removed,
}

/// Health of one target as reported to status consumers.
#[derive(Debug, Clone, Serialize)]
pub struct TargetHealthDescription {
    /// Registration id.
    pub target: TargetId,
    /// Target identifier.
    pub id: String,
    /// Traffic port.
    pub port: Option<u16>,
    /// Availability zone.
    pub availability_zone: Option<String>,
    /// Classification.
    pub state: TargetHealth,
    /// Reason code.
    pub reason: Option<HealthReason>,
    /// Reason description.
    pub description: Option<&'static str>,
}

/// A named pool of targets with a selection algorithm.
#[derive(Debug)]
pub struct TargetGroup {
    name: String,
    protocol: TargetProtocol,
    port: Option<u16>,
    target_type: TargetType,
    deregistration_delay: Duration,
    health_check: ArcSwap<HealthCheckConfig>,
    stickiness: Option<Stickiness>,
    strategy: Box<dyn Strategy>,
    resolver: Arc<TargetResolver>,
    arena: RwLock<Vec<Arc<Target>>>,
    active: ArcSwap<ActiveSet>,
    next_id: AtomicU64,
}

impl TargetGroup {
    /// Create a group and register its configured targets.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a configured
    /// target cannot be registered.
    pub fn new(config: &TargetGroupConfig, resolver: Arc<TargetResolver>) -> TargetGroupResult<Self> {
        config.validate()?;

        let group = Self {
            name: config.name.clone(),
            protocol: config.protocol,
            port: config.port,
            target_type: config.target_type,
            deregistration_delay: config.deregistration_delay,
            health_check: ArcSwap::from_pointee(config.health_check.clone()),
            stickiness: Stickiness::from_config(&config.stickiness),
            strategy: create_strategy(config.algorithm),
            resolver,
            arena: RwLock::new(Vec::new()),
            active: ArcSwap::from_pointee(ActiveSet::default()),
            next_id: AtomicU64::new(1),
        };

        for spec in &config.targets {
            group.register(spec.clone())?;
        }

        Ok(group)
    }

    /// Get the group name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the protocol spoken to targets.
    #[must_use]
    pub fn protocol(&self) -> TargetProtocol {
        self.protocol
    }

    /// Get the default traffic port.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Get the target type.
    #[must_use]
    pub fn target_type(&self) -> TargetType {
        self.target_type
    }

    /// Get the deregistration delay.
    #[must_use]
    pub fn deregistration_delay(&self) -> Duration {
        self.deregistration_delay
    }

    /// Get the selection algorithm name.
    #[must_use]
    pub fn algorithm(&self) -> &'static str {
        self.strategy.name()
    }

    /// Get the current health check configuration.
    #[must_use]
    pub fn health_check(&self) -> Arc<HealthCheckConfig> {
        self.health_check.load_full()
    }

    /// Check whether active health checks run for this group.
    #[must_use]
    pub fn checks_enabled(&self) -> bool {
        self.health_check.load().enabled && self.target_type.is_addressable()
    }

    /// Get the current active snapshot.
    #[must_use]
    pub fn active(&self) -> Arc<ActiveSet> {
        self.active.load_full()
    }

    /// Get all registered targets, including draining ones.
    #[must_use]
    pub fn targets(&self) -> Vec<Arc<Target>> {
        self.arena.read().expect("target lock poisoned").clone()
    }

    /// Look up a registered target.
    #[must_use]
    pub fn target(&self, id: TargetId) -> Option<Arc<Target>> {
        self.arena
            .read()
            .expect("target lock poisoned")
            .iter()
            .find(|t| t.id() == id)
            .cloned()
    }

    /// Get the number of healthy targets.
    #[must_use]
    pub fn healthy_count(&self) -> usize {
        self.active.load().targets.len()
    }

    /// Get the number of unhealthy targets.
    #[must_use]
    pub fn unhealthy_count(&self) -> usize {
        self.arena
            .read()
            .expect("target lock poisoned")
            .iter()
            .filter(|t| t.health() == TargetHealth::Unhealthy)
            .count()
    }

    /// Register a target.
    ///
    /// Registering an identifier that is already present with the same
    /// port and zone returns the existing id. A draining target registered
    /// again starts over in `initial`.
    ///
    /// # Errors
    ///
    /// Returns `TargetTypeMismatch` if the identifier is not of the group's
    /// target type, `DuplicateTarget` if it is registered with a different
    /// port or zone, or `UnresolvedTarget` if it has no address.
    pub fn register(&self, spec: TargetSpec) -> TargetGroupResult<TargetId> {
        let kind = TargetType::classify(&spec.id);
        if kind != Some(self.target_type) {
            return Err(TargetGroupError::TargetTypeMismatch {
                group: self.name.clone(),
                target: spec.id,
                expected: self.target_type,
            });
        }

        let checks_enabled = self.checks_enabled();
        let mut arena = self.arena.write().expect("target lock poisoned");

        if let Some(existing) = arena.iter().find(|t| t.spec().id == spec.id) {
            if !existing.same_registration(&spec, self.port) {
                return Err(TargetGroupError::DuplicateTarget {
                    group: self.name.clone(),
                    target: spec.id,
                });
            }

            let mut tracker = existing.health.lock().expect("health lock poisoned");
            if tracker.state() == TargetHealth::Draining {
                tracker.reset(checks_enabled);
                drop(tracker);
                *existing.drain_deadline.lock().expect("drain lock poisoned") = None;
                info!(group = %self.name, target = %existing.spec().id, "Draining target registered again");
                self.publish(&arena);
            }
            return Ok(existing.id());
        }

        let address = self.resolver.resolve(self.target_type, &spec, self.port)?;
        let id = TargetId(self.next_id.fetch_add(1, Ordering::Relaxed));

        info!(
            group = %self.name,
            target = %spec.id,
            id = %id,
            address = ?address,
            "Registered target"
        );

        arena.push(Arc::new(Target::new(
            id,
            spec,
            self.target_type,
            address,
            checks_enabled,
        )));
        self.publish(&arena);

        Ok(id)
    }

    /// Start draining a target. It leaves rotation immediately; it is
    /// removed once the deregistration delay has elapsed (see
    /// [`TargetGroup::sweep_drained`]).
    ///
    /// # Errors
    ///
    /// Returns `TargetNotFound` if the id is not registered.
    pub fn deregister(&self, id: TargetId, now: Instant) -> TargetGroupResult<Deregistration> {
        let mut arena = self.arena.write().expect("target lock poisoned");
        let position = arena
            .iter()
            .position(|t| t.id() == id)
            .ok_or_else(|| TargetGroupError::TargetNotFound {
                group: self.name.clone(),
                target: id,
            })?;
        let target = Arc::clone(&arena[position]);

        if !target
            .health
            .lock()
            .expect("health lock poisoned")
            .start_draining()
        {
            return Ok(Deregistration::AlreadyDraining);
        }

        if self.deregistration_delay.is_zero() {
            arena.remove(position);
            target.mark_removed();
            self.publish(&arena);
            info!(group = %self.name, target = %target.spec().id, "Deregistered target");
            return Ok(Deregistration::Removed);
        }

        let deadline = now + self.deregistration_delay;
        *target.drain_deadline.lock().expect("drain lock poisoned") = Some(deadline);
        self.publish(&arena);

        info!(
            group = %self.name,
            target = %target.spec().id,
            delay_secs = self.deregistration_delay.as_secs(),
            "Target draining"
        );

        Ok(Deregistration::Draining { deadline })
    }

    /// Remove draining targets whose deadline has passed. Returns their ids.
    pub fn sweep_drained(&self, now: Instant) -> Vec<TargetId> {
        let mut arena = self.arena.write().expect("target lock poisoned");
        let mut removed = Vec::new();

        arena.retain(|target| {
            let expired = target.health() == TargetHealth::Draining
                && target.drain_deadline().is_some_and(|deadline| deadline <= now);
            if expired {
                target.mark_removed();
                removed.push(target.id());
                info!(group = %self.name, target = %target.spec().id, "Drained target removed");
            }
            !expired
        });

        if !removed.is_empty() {
            self.publish(&arena);
        }
        removed
    }

    /// Record a probe outcome for a target.
    ///
    /// # Errors
    ///
    /// Returns `TargetNotFound` if the id is not registered.
    pub fn record_health(
        &self,
        id: TargetId,
        outcome: ProbeOutcome,
        now: Instant,
    ) -> TargetGroupResult<HealthCheckResult> {
        let config = self.health_check.load();
        let arena = self.arena.write().expect("target lock poisoned");
        let target = arena
            .iter()
            .find(|t| t.id() == id)
            .ok_or_else(|| TargetGroupError::TargetNotFound {
                group: self.name.clone(),
                target: id,
            })?;

        let (previous, tracker) = {
            let mut tracker = target.health.lock().expect("health lock poisoned");
            let previous = tracker.record(
                &outcome,
                config.healthy_threshold,
                config.unhealthy_threshold,
                now,
            );
            (previous, tracker.clone())
        };

        let result = HealthCheckResult {
            target: id,
            outcome,
            previous,
            state: tracker.state(),
            consecutive_successes: tracker.consecutive_successes(),
            consecutive_failures: tracker.consecutive_failures(),
            checked_at: now,
        };

        if result.transitioned() {
            info!(
                group = %self.name,
                target = %target.spec().id,
                from = %previous,
                to = %result.state,
                reason = ?tracker.reason(),
                "Target health changed"
            );
            self.publish(&arena);
        }

        Ok(result)
    }

    /// Replace the health check configuration.
    ///
    /// Turning checks off marks every registered target healthy; turning
    /// them on keeps current states until probes say otherwise.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the new parameters are out of range.
    pub fn set_health_check(&self, config: HealthCheckConfig) -> TargetGroupResult<()> {
        if config.enabled {
            config
                .validate()
                .map_err(|e| TargetGroupError::InvalidConfig(e.to_string()))?;
        }

        let was_enabled = self.checks_enabled();
        self.health_check.store(Arc::new(config));
        let enabled = self.checks_enabled();

        if was_enabled != enabled {
            let arena = self.arena.write().expect("target lock poisoned");
            for target in arena.iter() {
                target
                    .health
                    .lock()
                    .expect("health lock poisoned")
                    .checks_toggled(enabled);
            }
            self.publish(&arena);
        }

        info!(group = %self.name, enabled, "Health check configuration updated");
        Ok(())
    }

    /// Select a target for a request.
    ///
    /// A valid stickiness cookie naming a healthy target wins; otherwise the
    /// group's algorithm picks from the active snapshot.
    ///
    /// # Errors
    ///
    /// Returns `NoHealthyTargets` if no target is healthy.
    pub fn select(&self, context: &SelectionContext) -> TargetGroupResult<Selection> {
        let active = self.active.load();
        let now = SystemTime::now();

        if let Some(sticky) = &self.stickiness {
            if let Some(pinned) = sticky.pinned_target(&self.name, &context.cookies, now) {
                if let Some(target) = active.targets.iter().find(|t| t.id() == pinned) {
                    debug!(group = %self.name, target = %target.spec().id, "Sticky selection");
                    return Ok(Selection {
                        guard: InFlightGuard::new(Arc::clone(target)),
                        cookie: Some(sticky.issue(&self.name, pinned, now)),
                    });
                }
            }
        }

        let idx = self
            .strategy
            .select(&active.targets)
            .ok_or_else(|| TargetGroupError::NoHealthyTargets(self.name.clone()))?;
        let target = Arc::clone(&active.targets[idx]);

        debug!(
            group = %self.name,
            target = %target.spec().id,
            version = active.version,
            "Selected target"
        );

        let cookie = self
            .stickiness
            .as_ref()
            .map(|s| s.issue(&self.name, target.id(), now));

        Ok(Selection {
            guard: InFlightGuard::new(target),
            cookie,
        })
    }

    /// Describe every registered target's health.
    #[must_use]
    pub fn describe(&self) -> Vec<TargetHealthDescription> {
        self.targets()
            .iter()
            .map(|target| {
                let tracker = target.tracker();
                TargetHealthDescription {
                    target: target.id(),
                    id: target.spec().id.clone(),
                    port: target.spec().port.or(self.port),
                    availability_zone: target.spec().availability_zone.clone(),
                    state: tracker.state(),
                    reason: tracker.reason(),
                    description: tracker.reason().map(|r| r.description()),
                }
            })
            .collect()
    }

    /// Rebuild the active snapshot. Callers hold the arena write lock, which
    /// serializes publication.
    fn publish(&self, arena: &[Arc<Target>]) {
        let targets: Vec<_> = arena
            .iter()
            .filter(|t| t.health().is_routable())
            .cloned()
            .collect();
        let version = self.active.load().version + 1;

        debug!(
            group = %self.name,
            version,
            healthy = targets.len(),
            registered = arena.len(),
            "Published active set"
        );

        self.active.store(Arc::new(ActiveSet { version, targets }));
    }
}
