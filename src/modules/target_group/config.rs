//! Target group configuration.

use super::error::{TargetGroupError, TargetGroupResult};
use crate::modules::health::HealthCheckConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Longest allowed stickiness duration.
pub const MAX_STICKINESS: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Longest allowed deregistration delay.
pub const MAX_DEREGISTRATION_DELAY: Duration = Duration::from_secs(3600);

/// Kind of targets a group holds. All targets in a group share one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    /// EC2-style instance id (`i-0123abcd`).
    Instance,
    /// IPv4 or IPv6 address.
    Ip,
    /// Lambda function ARN.
    Lambda,
    /// Application load balancer ARN.
    Alb,
}

impl TargetType {
    /// Classify a target identifier.
    #[must_use]
    pub fn classify(id: &str) -> Option<Self> {
        if let Some(hex) = id.strip_prefix("i-") {
            let valid = matches!(hex.len(), 8 | 17) && hex.chars().all(|c| c.is_ascii_hexdigit());
            return valid.then_some(Self::Instance);
        }
        if id.parse::<IpAddr>().is_ok() {
            return Some(Self::Ip);
        }
        if id.starts_with("arn:") {
            if id.contains(":lambda:") && id.contains(":function:") {
                return Some(Self::Lambda);
            }
            if id.contains(":elasticloadbalancing:") && id.contains(":loadbalancer/app/") {
                return Some(Self::Alb);
            }
        }
        None
    }

    /// Check if targets of this kind have a network address the load
    /// balancer can connect to.
    #[must_use]
    pub fn is_addressable(&self) -> bool {
        matches!(self, Self::Instance | Self::Ip)
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Instance => "instance",
            Self::Ip => "ip",
            Self::Lambda => "lambda",
            Self::Alb => "alb",
        })
    }
}

/// Protocol spoken to targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetProtocol {
    /// Plain HTTP/1.1.
    Http,
    /// HTTP/1.1 over TLS.
    Https,
    /// Raw TCP.
    Tcp,
    /// TCP over TLS.
    Tls,
    /// UDP datagrams.
    Udp,
    /// TCP and UDP on the same port.
    TcpUdp,
}

/// Target selection algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Cycle through healthy targets in registration order.
    #[default]
    RoundRobin,
    /// Fewest in-flight requests, ties broken in round-robin order.
    LeastOutstandingRequests,
}

/// Stickiness cookie kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StickinessKind {
    /// Load-balancer generated cookie (`AWSALB`).
    #[default]
    LbCookie,
    /// Follows a named application cookie (`AWSALBAPP`).
    AppCookie,
}

/// Stickiness configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StickinessConfig {
    /// Whether stickiness is on.
    pub enabled: bool,

    /// Cookie kind.
    #[serde(rename = "type")]
    pub kind: StickinessKind,

    /// How long a stickiness cookie stays valid.
    #[serde(with = "humantime_serde")]
    pub duration: Duration,

    /// Application cookie name (`app_cookie` only).
    pub app_cookie_name: Option<String>,
}

impl Default for StickinessConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            kind: StickinessKind::LbCookie,
            duration: Duration::from_secs(24 * 60 * 60),
            app_cookie_name: None,
        }
    }
}

impl StickinessConfig {
    /// Check ranges and required fields.
    ///
    /// # Errors
    ///
    /// Returns `TargetGroupError::InvalidConfig` on a violation.
    pub fn validate(&self) -> TargetGroupResult<()> {
        if !self.enabled {
            return Ok(());
        }
        validate_stickiness_duration(self.duration)?;

        match (self.kind, &self.app_cookie_name) {
            (StickinessKind::AppCookie, None) => Err(TargetGroupError::InvalidConfig(
                "app_cookie stickiness requires app_cookie_name".to_string(),
            )),
            (StickinessKind::AppCookie, Some(name))
                if name.is_empty() || name.starts_with("AWSALB") || name.starts_with("AWSELB") =>
            {
                Err(TargetGroupError::InvalidConfig(format!(
                    "invalid application cookie name '{name}'"
                )))
            },
            _ => Ok(()),
        }
    }
}

/// Check a stickiness duration against 1 second ..= 7 days.
///
/// # Errors
///
/// Returns `TargetGroupError::InvalidConfig` if out of range.
pub fn validate_stickiness_duration(duration: Duration) -> TargetGroupResult<()> {
    if duration < Duration::from_secs(1) || duration > MAX_STICKINESS {
        return Err(TargetGroupError::InvalidConfig(format!(
            "stickiness duration must be between 1s and 7d, got {duration:?}"
        )));
    }
    Ok(())
}

/// A target as registered: identifier plus optional overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    /// Instance id, IP address, Lambda ARN or ALB ARN.
    pub id: String,

    /// Port override. Defaults to the group's port.
    #[serde(default)]
    pub port: Option<u16>,

    /// Availability zone, or `"all"` for IPs outside the VPC.
    #[serde(default)]
    pub availability_zone: Option<String>,
}

impl TargetSpec {
    /// Target with no overrides.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            port: None,
            availability_zone: None,
        }
    }

    /// Set the port override.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the availability zone.
    #[must_use]
    pub fn in_zone(mut self, zone: impl Into<String>) -> Self {
        self.availability_zone = Some(zone.into());
        self
    }
}

/// Target group configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetGroupConfig {
    /// Unique group name.
    pub name: String,

    /// Protocol spoken to targets.
    #[serde(default = "default_protocol")]
    pub protocol: TargetProtocol,

    /// Default traffic port. Not used by Lambda groups.
    #[serde(default)]
    pub port: Option<u16>,

    /// Target kind.
    #[serde(default = "default_target_type")]
    pub target_type: TargetType,

    /// Selection algorithm.
    #[serde(default)]
    pub algorithm: Algorithm,

    /// Time a deregistered target keeps draining.
    #[serde(default = "default_deregistration_delay", with = "humantime_serde")]
    pub deregistration_delay: Duration,

    /// Health check parameters.
    #[serde(default)]
    pub health_check: HealthCheckConfig,

    /// Stickiness parameters.
    #[serde(default)]
    pub stickiness: StickinessConfig,

    /// Targets registered at startup.
    #[serde(default)]
    pub targets: Vec<TargetSpec>,
}

impl TargetGroupConfig {
    /// Minimal configuration for a group of IP targets.
    #[must_use]
    pub fn new(name: impl Into<String>, protocol: TargetProtocol, port: u16) -> Self {
        Self {
            name: name.into(),
            protocol,
            port: Some(port),
            target_type: TargetType::Ip,
            algorithm: Algorithm::RoundRobin,
            deregistration_delay: default_deregistration_delay(),
            health_check: HealthCheckConfig::default(),
            stickiness: StickinessConfig::default(),
            targets: Vec::new(),
        }
    }

    /// Check the group's own parameters. Targets are checked on registration.
    ///
    /// # Errors
    ///
    /// Returns `TargetGroupError::InvalidConfig` on a violation.
    pub fn validate(&self) -> TargetGroupResult<()> {
        let invalid = |msg: String| Err(TargetGroupError::InvalidConfig(msg));

        if self.name.is_empty() || self.name.len() > 32 {
            return invalid(format!("name must be 1-32 characters, got '{}'", self.name));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
            || self.name.starts_with('-')
            || self.name.ends_with('-')
        {
            return invalid(format!(
                "name '{}' may only contain alphanumerics and inner hyphens",
                self.name
            ));
        }

        if self.deregistration_delay > MAX_DEREGISTRATION_DELAY {
            return invalid(format!(
                "deregistration_delay must be at most 3600s, got {:?}",
                self.deregistration_delay
            ));
        }

        match self.target_type {
            TargetType::Lambda => {
                if self.targets.len() > 1 {
                    return invalid("a lambda target group holds at most one target".to_string());
                }
                if self.stickiness.enabled {
                    return invalid("stickiness is not supported for lambda targets".to_string());
                }
            },
            _ => {
                if matches!(self.port, None | Some(0)) {
                    return invalid(format!("target group '{}' requires a port", self.name));
                }
            },
        }

        if self.algorithm == Algorithm::LeastOutstandingRequests
            && !matches!(self.protocol, TargetProtocol::Http | TargetProtocol::Https)
        {
            return invalid(
                "least_outstanding_requests requires an HTTP or HTTPS target group".to_string(),
            );
        }

        if self.stickiness.enabled
            && !matches!(self.protocol, TargetProtocol::Http | TargetProtocol::Https)
        {
            return invalid("cookie stickiness requires an HTTP or HTTPS target group".to_string());
        }

        self.stickiness.validate()?;

        if self.checks_enabled() {
            self.health_check
                .validate()
                .map_err(|e| TargetGroupError::InvalidConfig(e.to_string()))?;
        }

        Ok(())
    }

    /// Check whether active health checks apply to this group.
    ///
    /// Lambda and ALB targets have no address to probe.
    #[must_use]
    pub fn checks_enabled(&self) -> bool {
        self.health_check.enabled && self.target_type.is_addressable()
    }
}

fn default_protocol() -> TargetProtocol {
    TargetProtocol::Http
}

fn default_target_type() -> TargetType {
    TargetType::Ip
}

fn default_deregistration_delay() -> Duration {
    Duration::from_secs(300)
}

/// Resolves target identifiers to network addresses.
///
/// IP targets resolve to themselves; instance targets are looked up in the
/// instance table supplied by configuration.
#[derive(Debug, Clone, Default)]
pub struct TargetResolver {
    instances: HashMap<String, IpAddr>,
}

impl TargetResolver {
    /// Create a resolver over an instance-id to address table.
    #[must_use]
    pub fn new(instances: HashMap<String, IpAddr>) -> Self {
        Self { instances }
    }

    /// Resolve a target's address. `Ok(None)` for non-addressable kinds.
    ///
    /// # Errors
    ///
    /// Returns `TargetGroupError::UnresolvedTarget` for unknown instances or
    /// when neither the target nor the group supplies a port.
    pub fn resolve(
        &self,
        kind: TargetType,
        spec: &TargetSpec,
        default_port: Option<u16>,
    ) -> TargetGroupResult<Option<SocketAddr>> {
        let ip = match kind {
            TargetType::Ip => spec
                .id
                .parse::<IpAddr>()
                .map_err(|_| TargetGroupError::UnresolvedTarget(spec.id.clone()))?,
            TargetType::Instance => *self
                .instances
                .get(&spec.id)
                .ok_or_else(|| TargetGroupError::UnresolvedTarget(spec.id.clone()))?,
            TargetType::Lambda | TargetType::Alb => return Ok(None),
        };

        let port = spec
            .port
            .or(default_port)
            .filter(|p| *p != 0)
            .ok_or_else(|| TargetGroupError::UnresolvedTarget(spec.id.clone()))?;

        Ok(Some(SocketAddr::new(ip, port)))
    }
}
