//! Health registry: every target group and the health of its targets.

use super::error::{HealthError, HealthResult};
use super::probe::HealthProbe;
use super::state::{HealthCheckResult, ProbeFailure, ProbeOutcome};
use crate::modules::target_group::{
    Deregistration, TargetGroup, TargetHealthDescription, TargetId, TargetSpec,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{debug, info};

/// Owns the target groups and drives their health state.
#[derive(Debug, Default)]
pub struct HealthRegistry {
    groups: RwLock<HashMap<String, Arc<TargetGroup>>>,
    probe: HealthProbe,
}

impl HealthRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a target group.
    ///
    /// # Errors
    ///
    /// Returns `GroupAlreadyExists` if the name is taken.
    pub fn add_group(&self, group: Arc<TargetGroup>) -> HealthResult<()> {
        let mut groups = self.groups.write().expect("groups lock poisoned");
        if groups.contains_key(group.name()) {
            return Err(HealthError::GroupAlreadyExists(group.name().to_string()));
        }
        info!(group = %group.name(), algorithm = group.algorithm(), "Added target group");
        groups.insert(group.name().to_string(), group);
        Ok(())
    }

    /// Look up a target group.
    ///
    /// # Errors
    ///
    /// Returns `GroupNotFound` for an unknown name.
    pub fn group(&self, name: &str) -> HealthResult<Arc<TargetGroup>> {
        self.groups
            .read()
            .expect("groups lock poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| HealthError::GroupNotFound(name.to_string()))
    }

    /// Get every target group, sorted by name.
    #[must_use]
    pub fn groups(&self) -> Vec<Arc<TargetGroup>> {
        let mut groups: Vec<_> = self
            .groups
            .read()
            .expect("groups lock poisoned")
            .values()
            .cloned()
            .collect();
        groups.sort_by(|a, b| a.name().cmp(b.name()));
        groups
    }

    /// Register a target in a group.
    ///
    /// # Errors
    ///
    /// Returns `GroupNotFound`, or the group's registration error
    /// (`DuplicateTarget`, `TargetTypeMismatch`, `UnresolvedTarget`).
    pub fn register_target(&self, group: &str, spec: TargetSpec) -> HealthResult<TargetId> {
        Ok(self.group(group)?.register(spec)?)
    }

    /// Deregister a target. The target drains for the group's
    /// deregistration delay; when called inside a tokio runtime a timer
    /// removes it at the deadline, otherwise [`HealthRegistry::sweep_drained`]
    /// does.
    ///
    /// # Errors
    ///
    /// Returns `GroupNotFound` or `TargetNotFound`.
    pub fn deregister(&self, group: &str, target: TargetId) -> HealthResult<Deregistration> {
        let group = self.group(group)?;
        let outcome = group.deregister(target, Instant::now())?;

        if let Deregistration::Draining { deadline } = outcome {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    tokio::time::sleep_until(deadline.into()).await;
                    group.sweep_drained(deadline);
                });
            }
        }

        Ok(outcome)
    }

    /// Probe one target now and record the outcome.
    ///
    /// # Errors
    ///
    /// Returns `GroupNotFound`, `TargetNotFound`, or `ChecksDisabled` when
    /// the group does not run active checks.
    pub async fn run_health_check(
        &self,
        group: &str,
        target: TargetId,
    ) -> HealthResult<HealthCheckResult> {
        let group = self.group(group)?;
        let record = group
            .target(target)
            .ok_or_else(|| HealthError::TargetNotFound {
                group: group.name().to_string(),
                target,
            })?;

        if !group.checks_enabled() {
            return Err(HealthError::ChecksDisabled(group.name().to_string()));
        }

        let config = group.health_check();
        let outcome = match record.address() {
            Some(address) => self.probe.probe(&config, address).await,
            None => ProbeOutcome::Failure(ProbeFailure::Failed(
                "target has no network address".to_string(),
            )),
        };

        let result = group.record_health(target, outcome, Instant::now())?;
        debug!(
            group = %group.name(),
            target = %record.spec().id,
            state = %result.state,
            successes = result.consecutive_successes,
            failures = result.consecutive_failures,
            "Health check recorded"
        );
        Ok(result)
    }

    /// Describe the health of every target in a group.
    ///
    /// # Errors
    ///
    /// Returns `GroupNotFound` for an unknown name.
    pub fn describe(&self, group: &str) -> HealthResult<Vec<TargetHealthDescription>> {
        Ok(self.group(group)?.describe())
    }

    /// Remove drained targets from every group. Returns how many were removed.
    pub fn sweep_drained(&self, now: Instant) -> usize {
        self.groups()
            .iter()
            .map(|group| group.sweep_drained(now).len())
            .sum()
    }
}
