//! Health check configuration.

use super::error::{HealthError, HealthResult};
use super::matcher::Matcher;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Path called by gRPC health checks when none is configured.
pub const GRPC_HEALTH_PATH: &str = "/grpc.health.v1.Health/Check";

/// Protocol used to probe targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthCheckProtocol {
    /// TCP connect.
    Tcp,
    /// HTTP GET, status matched against the matcher.
    Http,
    /// HTTP GET over TLS.
    Https,
    /// `grpc.health.v1` call over HTTP/2, `grpc-status` matched.
    Grpc,
}

/// Health check configuration for a target group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Whether active checks run. Disabled groups treat targets as healthy.
    pub enabled: bool,

    /// Probe protocol.
    pub protocol: HealthCheckProtocol,

    /// Probe port. `None` uses the target's traffic port.
    pub port: Option<u16>,

    /// Request path for HTTP(S) and gRPC checks.
    pub path: String,

    /// Time between checks of one target.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Time after which a check counts as failed.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Consecutive successes before a target is healthy.
    pub healthy_threshold: u32,

    /// Consecutive failures before a target is unhealthy.
    pub unhealthy_threshold: u32,

    /// Success codes, e.g. `"200"`, `"200,302"`, `"200-299"`.
    /// Defaults to `200` for HTTP(S) and `0` for gRPC.
    pub matcher: Option<String>,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            protocol: HealthCheckProtocol::Http,
            port: None,
            path: "/".to_string(),
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            healthy_threshold: 5,
            unhealthy_threshold: 2,
            matcher: None,
        }
    }
}

impl HealthCheckConfig {
    /// Get the path to probe, taking the gRPC default into account.
    #[must_use]
    pub fn effective_path(&self) -> &str {
        if self.protocol == HealthCheckProtocol::Grpc && self.path == "/" {
            GRPC_HEALTH_PATH
        } else {
            &self.path
        }
    }

    /// Build the success matcher for this protocol.
    ///
    /// # Errors
    ///
    /// Returns an error if the matcher string is malformed or out of range.
    pub fn build_matcher(&self) -> HealthResult<Matcher> {
        match self.protocol {
            HealthCheckProtocol::Grpc => Matcher::grpc(self.matcher.as_deref().unwrap_or("0")),
            _ => Matcher::http(self.matcher.as_deref().unwrap_or("200")),
        }
    }

    /// Check the configuration against the allowed ranges.
    ///
    /// # Errors
    ///
    /// Returns `HealthError::InvalidConfig` describing the first violation.
    pub fn validate(&self) -> HealthResult<()> {
        let interval = self.interval.as_secs();
        if !(5..=300).contains(&interval) || self.interval.subsec_nanos() != 0 {
            return Err(HealthError::InvalidConfig(format!(
                "interval must be a whole number of seconds in 5..=300, got {:?}",
                self.interval
            )));
        }

        let timeout = self.timeout.as_secs();
        if !(2..=120).contains(&timeout) || self.timeout.subsec_nanos() != 0 {
            return Err(HealthError::InvalidConfig(format!(
                "timeout must be a whole number of seconds in 2..=120, got {:?}",
                self.timeout
            )));
        }

        if self.timeout >= self.interval {
            return Err(HealthError::InvalidConfig(
                "timeout must be less than interval".to_string(),
            ));
        }

        for (name, value) in [
            ("healthy_threshold", self.healthy_threshold),
            ("unhealthy_threshold", self.unhealthy_threshold),
        ] {
            if !(2..=10).contains(&value) {
                return Err(HealthError::InvalidConfig(format!(
                    "{name} must be in 2..=10, got {value}"
                )));
            }
        }

        if self.port == Some(0) {
            return Err(HealthError::InvalidConfig("port must be 1..=65535".to_string()));
        }

        if self.protocol != HealthCheckProtocol::Tcp && !self.path.starts_with('/') {
            return Err(HealthError::InvalidConfig(format!(
                "path must start with '/', got '{}'",
                self.path
            )));
        }

        if self.protocol == HealthCheckProtocol::Tcp && self.matcher.is_some() {
            return Err(HealthError::InvalidConfig(
                "matcher is not supported for TCP health checks".to_string(),
            ));
        }

        self.build_matcher().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = HealthCheckConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.effective_path(), "/");
    }

    #[test]
    fn test_timeout_must_be_below_interval() {
        let config = HealthCheckConfig {
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(10),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_threshold_bounds() {
        let config = HealthCheckConfig {
            healthy_threshold: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = HealthCheckConfig {
            unhealthy_threshold: 11,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_grpc_defaults() {
        let config = HealthCheckConfig {
            protocol: HealthCheckProtocol::Grpc,
            ..Default::default()
        };
        assert_eq!(config.effective_path(), GRPC_HEALTH_PATH);
        let matcher = config.build_matcher().unwrap();
        assert!(matcher.matches(0));
        assert!(!matcher.matches(12));
    }

    #[test]
    fn test_deserialize() {
        let config: HealthCheckConfig = toml::from_str(
            r#"
            protocol = "http"
            path = "/health"
            interval = "10s"
            timeout = "3s"
            healthy_threshold = 3
            matcher = "200-299"
            "#,
        )
        .unwrap();

        assert_eq!(config.interval, Duration::from_secs(10));
        assert_eq!(config.healthy_threshold, 3);
        assert_eq!(config.unhealthy_threshold, 2);
        assert!(config.validate().is_ok());
    }
}
