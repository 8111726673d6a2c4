//! Per-target health classification.

use crate::modules::target_group::TargetId;
use serde::Serialize;
use std::fmt;
use std::time::Instant;

/// Health classification of a registered target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetHealth {
    /// Registered, thresholds not yet reached. Excluded from rotation.
    Initial,
    /// Passing checks. Eligible for new requests.
    Healthy,
    /// Failing checks. Excluded from rotation.
    Unhealthy,
    /// Deregistered, waiting for the deregistration delay to elapse.
    Draining,
    /// Removed from the group.
    Unused,
}

impl TargetHealth {
    /// Check if the target may receive new requests.
    #[must_use]
    pub fn is_routable(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// Lowercase name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
            Self::Draining => "draining",
            Self::Unused => "unused",
        }
    }
}

impl fmt::Display for TargetHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason code attached to a non-healthy classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HealthReason {
    /// Registered, no check has run yet.
    #[serde(rename = "Elb.RegistrationInProgress")]
    RegistrationInProgress,
    /// Checks running, threshold not reached yet.
    #[serde(rename = "Elb.InitialHealthChecking")]
    InitialHealthChecking,
    /// Target answered with a code outside the matcher.
    #[serde(rename = "Target.ResponseCodeMismatch")]
    ResponseCodeMismatch,
    /// Check exceeded its timeout.
    #[serde(rename = "Target.Timeout")]
    Timeout,
    /// Check could not complete (connection refused, protocol error).
    #[serde(rename = "Target.FailedHealthChecks")]
    FailedHealthChecks,
    /// Target is draining.
    #[serde(rename = "Target.DeregistrationInProgress")]
    DeregistrationInProgress,
    /// Target is not registered.
    #[serde(rename = "Target.NotRegistered")]
    NotRegistered,
    /// Group has health checks turned off.
    #[serde(rename = "Target.HealthCheckDisabled")]
    HealthCheckDisabled,
}

impl HealthReason {
    /// Reason code as reported to status consumers.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::RegistrationInProgress => "Elb.RegistrationInProgress",
            Self::InitialHealthChecking => "Elb.InitialHealthChecking",
            Self::ResponseCodeMismatch => "Target.ResponseCodeMismatch",
            Self::Timeout => "Target.Timeout",
            Self::FailedHealthChecks => "Target.FailedHealthChecks",
            Self::DeregistrationInProgress => "Target.DeregistrationInProgress",
            Self::NotRegistered => "Target.NotRegistered",
            Self::HealthCheckDisabled => "Target.HealthCheckDisabled",
        }
    }

    /// Human-readable description.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::RegistrationInProgress => "Target registration is in progress",
            Self::InitialHealthChecking => "Initial health checks in progress",
            Self::ResponseCodeMismatch => "Health checks failed with these codes",
            Self::Timeout => "Request timed out",
            Self::FailedHealthChecks => "Health checks failed",
            Self::DeregistrationInProgress => "Target deregistration is in progress",
            Self::NotRegistered => "Target is not registered to the target group",
            Self::HealthCheckDisabled => "Health checks disabled",
        }
    }
}

impl fmt::Display for HealthReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Why a single probe failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    /// Probe exceeded the configured timeout.
    Timeout,
    /// Target answered with a code outside the matcher.
    ResponseCodeMismatch(u32),
    /// Connection refused, reset, or unparseable response.
    Failed(String),
}

impl ProbeFailure {
    /// Reason code this failure is reported under.
    #[must_use]
    pub fn reason(&self) -> HealthReason {
        match self {
            Self::Timeout => HealthReason::Timeout,
            Self::ResponseCodeMismatch(_) => HealthReason::ResponseCodeMismatch,
            Self::Failed(_) => HealthReason::FailedHealthChecks,
        }
    }
}

impl fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timed out"),
            Self::ResponseCodeMismatch(code) => write!(f, "unexpected code {code}"),
            Self::Failed(message) => f.write_str(message),
        }
    }
}

/// Outcome of one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Check passed.
    Success,
    /// Check failed.
    Failure(ProbeFailure),
}

impl ProbeOutcome {
    /// Check if the probe passed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Result of recording one probe against a target.
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    /// Target probed.
    pub target: TargetId,
    /// Probe outcome.
    pub outcome: ProbeOutcome,
    /// Classification before the probe was recorded.
    pub previous: TargetHealth,
    /// Classification after the probe was recorded.
    pub state: TargetHealth,
    /// Consecutive passing checks.
    pub consecutive_successes: u32,
    /// Consecutive failing checks.
    pub consecutive_failures: u32,
    /// When the probe was recorded.
    pub checked_at: Instant,
}

impl HealthCheckResult {
    /// Check if this probe changed the classification.
    #[must_use]
    pub fn transitioned(&self) -> bool {
        self.previous != self.state
    }
}

/// Health state machine for one target.
///
/// Counters are consecutive: a success resets the failure count and vice
/// versa. The classification flips exactly when a counter reaches its
/// threshold. Draining and unused targets ignore further probes.
#[derive(Debug, Clone)]
pub struct HealthTracker {
    state: TargetHealth,
    reason: Option<HealthReason>,
    consecutive_successes: u32,
    consecutive_failures: u32,
    last_checked: Option<Instant>,
}

impl HealthTracker {
    /// Tracker for a freshly registered target.
    #[must_use]
    pub fn new(checks_enabled: bool) -> Self {
        if checks_enabled {
            Self {
                state: TargetHealth::Initial,
                reason: Some(HealthReason::RegistrationInProgress),
                consecutive_successes: 0,
                consecutive_failures: 0,
                last_checked: None,
            }
        } else {
            Self::unchecked()
        }
    }

    fn unchecked() -> Self {
        Self {
            state: TargetHealth::Healthy,
            reason: Some(HealthReason::HealthCheckDisabled),
            consecutive_successes: 0,
            consecutive_failures: 0,
            last_checked: None,
        }
    }

    /// Get the current classification.
    #[must_use]
    pub fn state(&self) -> TargetHealth {
        self.state
    }

    /// Get the reason code.
    #[must_use]
    pub fn reason(&self) -> Option<HealthReason> {
        self.reason
    }

    /// Get consecutive successes.
    #[must_use]
    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes
    }

    /// Get consecutive failures.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Get the time of the last recorded probe.
    #[must_use]
    pub fn last_checked(&self) -> Option<Instant> {
        self.last_checked
    }

    /// Record a probe outcome. Returns the classification before the probe.
    pub fn record(
        &mut self,
        outcome: &ProbeOutcome,
        healthy_threshold: u32,
        unhealthy_threshold: u32,
        now: Instant,
    ) -> TargetHealth {
        let previous = self.state;
        if matches!(previous, TargetHealth::Draining | TargetHealth::Unused) {
            return previous;
        }

        self.last_checked = Some(now);

        match outcome {
            ProbeOutcome::Success => {
                self.consecutive_successes = self.consecutive_successes.saturating_add(1);
                self.consecutive_failures = 0;

                if self.state != TargetHealth::Healthy {
                    if self.consecutive_successes >= healthy_threshold {
                        self.state = TargetHealth::Healthy;
                        self.reason = None;
                    } else if self.state == TargetHealth::Initial {
                        self.reason = Some(HealthReason::InitialHealthChecking);
                    }
                }
            },
            ProbeOutcome::Failure(failure) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.consecutive_successes = 0;

                match self.state {
                    TargetHealth::Unhealthy => self.reason = Some(failure.reason()),
                    _ if self.consecutive_failures >= unhealthy_threshold => {
                        self.state = TargetHealth::Unhealthy;
                        self.reason = Some(failure.reason());
                    },
                    TargetHealth::Initial => {
                        self.reason = Some(HealthReason::InitialHealthChecking);
                    },
                    _ => {},
                }
            },
        }

        previous
    }

    /// Enter the draining state. Returns `false` if already draining or gone.
    pub fn start_draining(&mut self) -> bool {
        if matches!(self.state, TargetHealth::Draining | TargetHealth::Unused) {
            return false;
        }
        self.state = TargetHealth::Draining;
        self.reason = Some(HealthReason::DeregistrationInProgress);
        true
    }

    /// Mark as removed.
    pub fn retire(&mut self) {
        self.state = TargetHealth::Unused;
        self.reason = Some(HealthReason::NotRegistered);
    }

    /// Restart classification, e.g. when a draining target is registered again
    /// or checks are toggled.
    pub fn reset(&mut self, checks_enabled: bool) {
        *self = Self::new(checks_enabled);
    }

    /// Apply a change of the group's enabled flag.
    pub fn checks_toggled(&mut self, checks_enabled: bool) {
        if matches!(self.state, TargetHealth::Draining | TargetHealth::Unused) {
            return;
        }
        if checks_enabled {
            if self.reason == Some(HealthReason::HealthCheckDisabled) {
                self.reason = None;
            }
        } else {
            *self = Self::unchecked();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fail() -> ProbeOutcome {
        ProbeOutcome::Failure(ProbeFailure::Failed("connection refused".to_string()))
    }

    #[test]
    fn test_initial_until_threshold() {
        let mut tracker = HealthTracker::new(true);
        let now = Instant::now();

        tracker.record(&ProbeOutcome::Success, 3, 2, now);
        tracker.record(&ProbeOutcome::Success, 3, 2, now);
        assert_eq!(tracker.state(), TargetHealth::Initial);
        assert_eq!(tracker.reason(), Some(HealthReason::InitialHealthChecking));

        let previous = tracker.record(&ProbeOutcome::Success, 3, 2, now);
        assert_eq!(previous, TargetHealth::Initial);
        assert_eq!(tracker.state(), TargetHealth::Healthy);
        assert_eq!(tracker.reason(), None);
    }

    #[test]
    fn test_failure_resets_success_streak() {
        let mut tracker = HealthTracker::new(true);
        let now = Instant::now();

        tracker.record(&ProbeOutcome::Success, 3, 3, now);
        tracker.record(&ProbeOutcome::Success, 3, 3, now);
        tracker.record(&fail(), 3, 3, now);
        assert_eq!(tracker.consecutive_successes(), 0);
        assert_eq!(tracker.consecutive_failures(), 1);

        tracker.record(&ProbeOutcome::Success, 3, 3, now);
        assert_eq!(tracker.state(), TargetHealth::Initial);
    }

    #[test]
    fn test_healthy_to_unhealthy() {
        let mut tracker = HealthTracker::new(true);
        let now = Instant::now();
        for _ in 0..2 {
            tracker.record(&ProbeOutcome::Success, 2, 2, now);
        }
        assert_eq!(tracker.state(), TargetHealth::Healthy);

        tracker.record(&ProbeOutcome::Failure(ProbeFailure::Timeout), 2, 2, now);
        assert_eq!(tracker.state(), TargetHealth::Healthy);

        tracker.record(&ProbeOutcome::Failure(ProbeFailure::Timeout), 2, 2, now);
        assert_eq!(tracker.state(), TargetHealth::Unhealthy);
        assert_eq!(tracker.reason(), Some(HealthReason::Timeout));

        tracker.record(
            &ProbeOutcome::Failure(ProbeFailure::ResponseCodeMismatch(503)),
            2,
            2,
            now,
        );
        assert_eq!(tracker.reason(), Some(HealthReason::ResponseCodeMismatch));
    }

    #[test]
    fn test_draining_ignores_probes() {
        let mut tracker = HealthTracker::new(true);
        assert!(tracker.start_draining());
        assert!(!tracker.start_draining());

        for _ in 0..5 {
            tracker.record(&ProbeOutcome::Success, 2, 2, Instant::now());
        }
        assert_eq!(tracker.state(), TargetHealth::Draining);
        assert!(tracker.last_checked().is_none());
    }

    #[test]
    fn test_disabled_checks_start_healthy() {
        let tracker = HealthTracker::new(false);
        assert_eq!(tracker.state(), TargetHealth::Healthy);
        assert_eq!(tracker.reason(), Some(HealthReason::HealthCheckDisabled));
    }

    #[test]
    fn test_reason_codes() {
        assert_eq!(HealthReason::Timeout.code(), "Target.Timeout");
        assert_eq!(
            serde_json::to_string(&HealthReason::RegistrationInProgress).unwrap(),
            "\"Elb.RegistrationInProgress\""
        );
        assert_eq!(TargetHealth::Draining.to_string(), "draining");
    }
}
