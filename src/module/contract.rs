//! The lifecycle contract.

use super::{ModuleConfig, ModuleError, ModuleManifest, ModuleResult, ModuleStatus};
use std::collections::HashMap;

/// Metrics reported by a component.
///
/// Exporting these (Prometheus, CloudWatch, ...) is the collector's job.
#[derive(Debug, Clone, Default)]
pub struct MetricsPayload {
    /// Monotonic counters.
    pub counters: HashMap<String, u64>,

    /// Point-in-time values.
    pub gauges: HashMap<String, f64>,
}

impl MetricsPayload {
    /// Creates an empty payload.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a counter.
    pub fn counter(&mut self, name: impl Into<String>, value: u64) {
        self.counters.insert(name.into(), value);
    }

    /// Sets a gauge.
    pub fn gauge(&mut self, name: impl Into<String>, value: f64) {
        self.gauges.insert(name.into(), value);
    }

    /// Merges another payload, prefixing its names.
    pub fn merge_prefixed(&mut self, prefix: &str, other: MetricsPayload) {
        for (name, value) in other.counters {
            self.counters.insert(format!("{prefix}_{name}"), value);
        }
        for (name, value) in other.gauges {
            self.gauges.insert(format!("{prefix}_{name}"), value);
        }
    }
}

/// Lifecycle implemented by the load balancer and its listeners.
///
/// 1. `init()` applies configuration
/// 2. `start()` begins serving
/// 3. `reload()` applies new configuration while serving
/// 4. `stop()` stops serving
///
/// `status()` and `metrics()` may be called at any time.
pub trait ModuleContract: Send + Sync {
    /// Returns the component's identity.
    fn manifest(&self) -> ModuleManifest;

    /// Applies configuration.
    ///
    /// # Errors
    ///
    /// Returns `ModuleError::ConfigError` if the configuration is invalid.
    fn init(&mut self, config: ModuleConfig) -> ModuleResult<()>;

    /// Begins serving. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `ModuleError::InvalidState` if already running.
    fn start(&mut self) -> ModuleResult<()>;

    /// Stops serving.
    ///
    /// # Errors
    ///
    /// Returns `ModuleError::InvalidState` if not running.
    fn stop(&mut self) -> ModuleResult<()>;

    /// Applies new configuration without a restart.
    ///
    /// # Errors
    ///
    /// Returns `ModuleError::ConfigError` if unsupported or invalid.
    fn reload(&mut self, _config: ModuleConfig) -> ModuleResult<()> {
        Err(ModuleError::ConfigError(
            "hot reload not supported".to_string(),
        ))
    }

    /// Current status.
    fn status(&self) -> ModuleStatus;

    /// Current metrics.
    fn metrics(&self) -> MetricsPayload;
}
