//! Configuration type definitions.

use crate::modules::listener::ListenerConfig;
use crate::modules::target_group::TargetGroupConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

/// Root configuration of a load balancer.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ElbConfig {
    /// Load balancer identity.
    pub load_balancer: LoadBalancerSection,

    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Instance id to private address map used by instance target groups.
    pub instances: BTreeMap<String, IpAddr>,

    /// Target groups.
    pub target_groups: Vec<TargetGroupConfig>,

    /// Listeners.
    pub listeners: Vec<ListenerConfig>,
}

impl ElbConfig {
    /// Find a target group by name.
    #[must_use]
    pub fn target_group(&self, name: &str) -> Option<&TargetGroupConfig> {
        self.target_groups.iter().find(|g| g.name == name)
    }

    /// Find a listener by name.
    #[must_use]
    pub fn listener(&self, name: &str) -> Option<&ListenerConfig> {
        self.listeners.iter().find(|l| l.name == name)
    }
}

/// Load balancer identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadBalancerSection {
    /// Load balancer name.
    pub name: String,

    /// Load balancer type. Limits the listener protocols allowed.
    #[serde(rename = "type")]
    pub lb_type: LoadBalancerType,
}

impl Default for LoadBalancerSection {
    fn default() -> Self {
        Self {
            name: "r0n-elb".to_string(),
            lb_type: LoadBalancerType::Application,
        }
    }
}

/// Load balancer type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LoadBalancerType {
    /// HTTP and HTTPS listeners.
    #[default]
    Application,
    /// TCP, TLS, UDP and `TCP_UDP` listeners.
    Network,
}

impl fmt::Display for LoadBalancerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Application => write!(f, "application"),
            Self::Network => write!(f, "network"),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: LogLevel,

    /// Log format (json, pretty, compact).
    pub format: LogFormat,

    /// Output destination.
    pub output: LogOutput,
}

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level (most verbose).
    Trace,
    /// Debug level.
    Debug,
    /// Info level (default).
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level (least verbose).
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format (machine-readable).
    Json,
    /// Pretty format with colors (default).
    #[default]
    Pretty,
    /// Compact single-line format.
    Compact,
}

/// Log output destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    /// Standard output (default).
    #[default]
    Stdout,
    /// Standard error.
    Stderr,
}
