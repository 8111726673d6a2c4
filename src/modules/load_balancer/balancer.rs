//! Load balancer module implementing `ModuleContract`.

use super::error::{LoadBalancerError, LoadBalancerResult};
use crate::config::{ConfigLoader, ElbConfig};
use crate::module::{
    Capability, MetricsPayload, ModuleConfig, ModuleContract, ModuleError, ModuleManifest,
    ModuleResult, ModuleStatus,
};
use crate::modules::actions::{ActionConfig, IdentityProvider};
use crate::modules::health::{HealthCheckConfig, HealthRegistry, HealthScheduler};
use crate::modules::listener::{Listener, ListenerResult};
use crate::modules::rules::RuleConfig;
use crate::modules::target_group::{
    Deregistration, TargetGroup, TargetHealthDescription, TargetId, TargetResolver, TargetSpec,
};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

/// A load balancer: target groups, their health checks and the listeners
/// that route to them.
///
/// Configuration is applied with [`ModuleContract::init`] (or
/// [`LoadBalancer::from_config`]); [`ModuleContract::start`] starts health
/// checking and binds every listener.
pub struct LoadBalancer {
    config: ElbConfig,
    registry: Arc<HealthRegistry>,
    listeners: Vec<Listener>,
    provider: Option<Arc<dyn IdentityProvider>>,
    scheduler: Option<HealthScheduler>,
    runtime: Option<Handle>,
    status: ModuleStatus,
}

impl std::fmt::Debug for LoadBalancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadBalancer")
            .field("name", &self.config.load_balancer.name)
            .field("status", &self.status)
            .field("target_groups", &self.config.target_groups.len())
            .field("listeners", &self.listeners)
            .finish_non_exhaustive()
    }
}

impl LoadBalancer {
    /// Create an unconfigured load balancer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: ElbConfig::default(),
            registry: Arc::new(HealthRegistry::new()),
            listeners: Vec::new(),
            provider: None,
            scheduler: None,
            runtime: None,
            status: ModuleStatus::Initializing,
        }
    }

    /// Create a load balancer from a configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails or a target group or listener
    /// cannot be built.
    pub fn from_config(config: ElbConfig) -> LoadBalancerResult<Self> {
        let mut balancer = Self::new();
        balancer.configure(config)?;
        Ok(balancer)
    }

    /// Use this identity provider client for every authenticate action.
    /// Applies to configuration applied afterwards.
    #[must_use]
    pub fn with_identity_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Validate and apply a configuration to a stopped load balancer.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails or a target group or listener
    /// cannot be built. The previous configuration stays in place.
    pub fn configure(&mut self, config: ElbConfig) -> LoadBalancerResult<()> {
        ConfigLoader::standard().validate(&config)?;
        let (registry, listeners) = build(&config, self.provider.as_ref())?;

        info!(
            name = %config.load_balancer.name,
            lb_type = %config.load_balancer.lb_type,
            target_groups = config.target_groups.len(),
            listeners = listeners.len(),
            "Load balancer configured"
        );

        self.registry = registry;
        self.listeners = listeners;
        self.config = config;
        Ok(())
    }

    /// Get the load balancer name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.load_balancer.name
    }

    /// Get the applied configuration.
    #[must_use]
    pub fn config(&self) -> &ElbConfig {
        &self.config
    }

    /// Get the health registry holding every target group.
    #[must_use]
    pub fn registry(&self) -> &Arc<HealthRegistry> {
        &self.registry
    }

    /// Get the listeners.
    #[must_use]
    pub fn listeners(&self) -> &[Listener] {
        &self.listeners
    }

    /// Look up a listener by name.
    ///
    /// # Errors
    ///
    /// Returns `ListenerNotFound` for an unknown name.
    pub fn listener(&self, name: &str) -> LoadBalancerResult<&Listener> {
        self.listeners
            .iter()
            .find(|l| l.name() == name)
            .ok_or_else(|| LoadBalancerError::ListenerNotFound(name.to_string()))
    }

    /// Look up a target group by name.
    ///
    /// # Errors
    ///
    /// Returns `GroupNotFound` for an unknown name.
    pub fn target_group(&self, name: &str) -> LoadBalancerResult<Arc<TargetGroup>> {
        Ok(self.registry.group(name)?)
    }

    /// Check if the load balancer is serving.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.scheduler.is_some()
    }

    /// Register a target. While running, its health checks start at once.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown group or a target the group rejects.
    pub fn register_target(&self, group: &str, spec: TargetSpec) -> LoadBalancerResult<TargetId> {
        let id = self.registry.register_target(group, spec)?;
        self.sync_health_checks();
        Ok(id)
    }

    /// Deregister the target registered with this identifier and port. A
    /// `TargetSpec` without a port matches the group's port.
    ///
    /// # Errors
    ///
    /// Returns `GroupNotFound` or `TargetNotRegistered`.
    pub fn deregister_target(
        &self,
        group: &str,
        spec: &TargetSpec,
    ) -> LoadBalancerResult<Deregistration> {
        let target_group = self.registry.group(group)?;
        let port = spec.port.or(target_group.port());
        let target = target_group
            .targets()
            .into_iter()
            .find(|t| t.spec().id == spec.id && t.spec().port.or(target_group.port()) == port)
            .ok_or_else(|| LoadBalancerError::TargetNotRegistered {
                group: group.to_string(),
                target: spec.id.clone(),
            })?;

        let _runtime = self.runtime.as_ref().map(Handle::enter);
        Ok(self.registry.deregister(group, target.id())?)
    }

    /// Replace a target group's health check settings. Running check tasks
    /// pick up the new interval after their current sleep.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown group or invalid settings.
    pub fn update_health_check(
        &self,
        group: &str,
        config: HealthCheckConfig,
    ) -> LoadBalancerResult<()> {
        self.registry.group(group)?.set_health_check(config)?;
        info!(group, "Health check settings updated");
        self.sync_health_checks();
        Ok(())
    }

    /// Describe the health of every target in a group.
    ///
    /// # Errors
    ///
    /// Returns `GroupNotFound` for an unknown group.
    pub fn describe_target_health(
        &self,
        group: &str,
    ) -> LoadBalancerResult<Vec<TargetHealthDescription>> {
        Ok(self.registry.describe(group)?)
    }

    /// Add a rule to a listener.
    ///
    /// # Errors
    ///
    /// Returns `ListenerNotFound` or the listener's rejection.
    pub fn add_rule(&self, listener: &str, rule: &RuleConfig) -> LoadBalancerResult<()> {
        Ok(self.listener(listener)?.add_rule(rule)?)
    }

    /// Remove a listener's rule by priority.
    ///
    /// # Errors
    ///
    /// Returns `ListenerNotFound` or `RuleNotFound`.
    pub fn remove_rule(&self, listener: &str, priority: u32) -> LoadBalancerResult<()> {
        Ok(self.listener(listener)?.remove_rule(priority)?)
    }

    /// Replace a listener's default actions.
    ///
    /// # Errors
    ///
    /// Returns `ListenerNotFound` or the listener's rejection.
    pub fn set_default_actions(
        &self,
        listener: &str,
        actions: &[ActionConfig],
    ) -> LoadBalancerResult<()> {
        Ok(self.listener(listener)?.set_default_actions(actions)?)
    }

    fn sync_health_checks(&self) {
        if let (Some(scheduler), Some(runtime)) = (&self.scheduler, &self.runtime) {
            let _runtime = runtime.enter();
            scheduler.sync();
        }
    }

    fn stop_listeners(&mut self) {
        for listener in self.listeners.iter_mut().filter(|l| l.is_running()) {
            if let Err(e) = listener.stop() {
                warn!(listener = %listener.name(), error = %e, "Listener stop failed");
            }
        }
    }

    fn group_metrics(group: &TargetGroup) -> MetricsPayload {
        let mut metrics = MetricsPayload::new();
        let targets = group.targets();

        let (mut requests, mut failures, mut in_flight) = (0, 0, 0);
        for target in &targets {
            requests += target.stats().requests.load(Ordering::Relaxed);
            failures += target.stats().failures.load(Ordering::Relaxed);
            in_flight += u64::from(target.in_flight());
        }

        metrics.counter("requests", requests);
        metrics.counter("target_failures", failures);
        metrics.gauge("in_flight", in_flight as f64);
        metrics.gauge("registered_targets", targets.len() as f64);
        metrics.gauge("healthy_hosts", group.healthy_count() as f64);
        metrics.gauge("unhealthy_hosts", group.unhealthy_count() as f64);
        metrics
    }
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self::new()
    }
}

/// Build target groups and listeners for a configuration.
fn build(
    config: &ElbConfig,
    provider: Option<&Arc<dyn IdentityProvider>>,
) -> LoadBalancerResult<(Arc<HealthRegistry>, Vec<Listener>)> {
    let resolver = Arc::new(TargetResolver::new(
        config
            .instances
            .iter()
            .map(|(id, ip)| (id.clone(), *ip))
            .collect(),
    ));

    let registry = Arc::new(HealthRegistry::new());
    let mut groups = HashMap::new();
    for group_config in &config.target_groups {
        let group = Arc::new(TargetGroup::new(group_config, Arc::clone(&resolver))?);
        registry.add_group(Arc::clone(&group))?;
        groups.insert(group_config.name.clone(), group);
    }

    let listeners = config
        .listeners
        .iter()
        .map(|listener| Listener::build(listener.clone(), &groups, provider.cloned()))
        .collect::<ListenerResult<Vec<_>>>()?;

    Ok((registry, listeners))
}

impl ModuleContract for LoadBalancer {
    fn manifest(&self) -> ModuleManifest {
        let mut manifest = ModuleManifest::builder(self.config.load_balancer.name.clone())
            .description(format!("{} load balancer", self.config.load_balancer.lb_type))
            .version(0, 1, 0)
            .capability(Capability::LoadBalancing)
            .capability(Capability::HealthChecks)
            .capability(Capability::DynamicConfiguration)
            .build();

        for listener in &self.listeners {
            manifest.capabilities.extend(listener.manifest().capabilities);
        }
        manifest
    }

    fn init(&mut self, config: ModuleConfig) -> ModuleResult<()> {
        if self.is_running() {
            return Err(ModuleError::InvalidState {
                current: self.status.to_string(),
                expected: "stopped".to_string(),
            });
        }

        let parsed: ElbConfig = config.parse()?;
        self.configure(parsed)
            .map_err(|e| ModuleError::ConfigError(e.to_string()))?;
        self.status = ModuleStatus::Initializing;
        Ok(())
    }

    fn start(&mut self) -> ModuleResult<()> {
        if self.is_running() {
            return Err(ModuleError::InvalidState {
                current: self.status.to_string(),
                expected: "stopped or initializing".to_string(),
            });
        }

        let handle = Handle::try_current()
            .map_err(|_| ModuleError::StartFailed("no tokio runtime available".to_string()))?;

        let scheduler = HealthScheduler::new(Arc::clone(&self.registry));
        {
            let _runtime = handle.enter();
            let started = scheduler.sync();
            debug!(tasks = started, "Health checks scheduled");
        }

        let mut failure = None;
        for listener in &mut self.listeners {
            if let Err(e) = listener.start() {
                error!(listener = %listener.name(), error = %e, "Listener failed to start");
                failure = Some(e);
                break;
            }
        }
        if let Some(e) = failure {
            self.stop_listeners();
            scheduler.stop();
            self.status = ModuleStatus::Error {
                message: e.to_string(),
            };
            return Err(e);
        }

        self.scheduler = Some(scheduler);
        self.runtime = Some(handle);
        self.status = ModuleStatus::Running;

        info!(
            name = %self.config.load_balancer.name,
            listeners = self.listeners.len(),
            target_groups = self.config.target_groups.len(),
            "Load balancer started"
        );
        Ok(())
    }

    fn stop(&mut self) -> ModuleResult<()> {
        let Some(scheduler) = self.scheduler.take() else {
            return Err(ModuleError::InvalidState {
                current: self.status.to_string(),
                expected: "running".to_string(),
            });
        };

        self.stop_listeners();
        scheduler.stop();
        self.runtime = None;
        self.status = ModuleStatus::Stopped;

        info!(name = %self.config.load_balancer.name, "Load balancer stopped");
        Ok(())
    }

    /// Rebuild target groups and listeners from a new configuration. An
    /// invalid configuration is rejected and the running one keeps serving;
    /// otherwise a running load balancer restarts on the new one. Target
    /// health starts over.
    fn reload(&mut self, config: ModuleConfig) -> ModuleResult<()> {
        let parsed: ElbConfig = config.parse()?;
        if let Err(e) = ConfigLoader::standard().validate(&parsed) {
            warn!(error = %e, "Reload rejected");
            return Err(ModuleError::ConfigError(e.to_string()));
        }
        let (registry, listeners) = build(&parsed, self.provider.as_ref()).map_err(|e| {
            warn!(error = %e, "Reload rejected");
            ModuleError::ConfigError(e.to_string())
        })?;

        let was_running = self.is_running();
        if was_running {
            self.stop()?;
        }

        self.registry = registry;
        self.listeners = listeners;
        self.config = parsed;
        info!(name = %self.config.load_balancer.name, "Load balancer reloaded");

        if was_running {
            self.start()?;
        }
        Ok(())
    }

    fn status(&self) -> ModuleStatus {
        if self.status != ModuleStatus::Running {
            return self.status.clone();
        }

        for listener in &self.listeners {
            match listener.status() {
                ModuleStatus::Running => {},
                ModuleStatus::Degraded { reason } => {
                    return ModuleStatus::Degraded {
                        reason: format!("listener '{}': {reason}", listener.name()),
                    };
                },
                other => {
                    return ModuleStatus::Degraded {
                        reason: format!("listener '{}' is {other}", listener.name()),
                    };
                },
            }
        }
        ModuleStatus::Running
    }

    fn metrics(&self) -> MetricsPayload {
        let mut metrics = MetricsPayload::new();
        let groups = self.registry.groups();

        metrics.gauge("listeners", self.listeners.len() as f64);
        metrics.gauge("target_groups", groups.len() as f64);
        if let Some(scheduler) = &self.scheduler {
            metrics.gauge("health_check_tasks", scheduler.task_count() as f64);
        }

        for listener in &self.listeners {
            metrics.merge_prefixed(&format!("listener_{}", listener.name()), listener.metrics());
        }
        for group in &groups {
            metrics.merge_prefixed(&format!("tg_{}", group.name()), Self::group_metrics(group));
        }

        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::listener::ListenerProtocol;
    use std::time::Duration;

    const CONFIG: &str = r#"
        [load_balancer]
        name = "test-elb"

        [[target_groups]]
        name = "web"
        port = 8080
        deregistration_delay = "0s"
        targets = [{ id = "10.0.0.1" }]

        [target_groups.health_check]
        enabled = false

        [[listeners]]
        name = "http"
        protocol = "HTTP"
        port = 0
        bind_address = "127.0.0.1"
        default_actions = [{ type = "forward", target_group = "web" }]
    "#;

    fn balancer() -> LoadBalancer {
        let config = ConfigLoader::new().load_str(CONFIG).unwrap();
        LoadBalancer::from_config(config).unwrap()
    }

    fn rule(priority: u32) -> RuleConfig {
        toml::from_str(&format!(
            r#"
            priority = {priority}
            conditions = [{{ field = "path-pattern", values = ["/health"] }}]
            actions = [{{ type = "fixed-response", status_code = 200 }}]
            "#
        ))
        .unwrap()
    }

    #[test]
    fn test_new_load_balancer() {
        let balancer = LoadBalancer::new();
        assert_eq!(balancer.status(), ModuleStatus::Initializing);
        assert!(balancer.listeners().is_empty());
        assert!(!balancer.is_running());
    }

    #[test]
    fn test_from_config() {
        let balancer = balancer();
        assert_eq!(balancer.name(), "test-elb");
        assert_eq!(balancer.listeners().len(), 1);
        assert_eq!(balancer.listener("http").unwrap().protocol(), ListenerProtocol::Http);
        assert_eq!(balancer.target_group("web").unwrap().targets().len(), 1);
        assert!(matches!(
            balancer.listener("nope"),
            Err(LoadBalancerError::ListenerNotFound(_))
        ));
    }

    #[test]
    fn test_manifest() {
        let manifest = balancer().manifest();
        assert_eq!(manifest.name, "test-elb");
        assert!(manifest.has_capability(&Capability::LoadBalancing));
        assert!(manifest.has_capability(&Capability::HealthChecks));
        assert!(manifest.has_capability(&Capability::HttpListener));
        assert!(!manifest.has_capability(&Capability::TlsTermination));
    }

    #[test]
    fn test_init_rejects_invalid_config() {
        let mut balancer = LoadBalancer::new();
        let config = ModuleConfig::from_raw(
            r#"
            [[listeners]]
            name = "http"
            protocol = "HTTP"
            port = 80
            default_actions = [{ type = "forward", target_group = "missing" }]
            "#,
        );

        let result = balancer.init(config);
        assert!(matches!(result, Err(ModuleError::ConfigError(_))));
        assert!(balancer.listeners().is_empty());
    }

    #[test]
    fn test_start_outside_runtime() {
        let mut balancer = balancer();
        assert!(matches!(balancer.start(), Err(ModuleError::StartFailed(_))));
        assert!(!balancer.is_running());
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let mut balancer = balancer();
        balancer.start().unwrap();
        assert!(balancer.is_running());
        assert_eq!(balancer.status(), ModuleStatus::Running);
        assert!(balancer.listener("http").unwrap().local_addr().is_some());
        assert!(matches!(balancer.start(), Err(ModuleError::InvalidState { .. })));

        balancer.stop().unwrap();
        assert_eq!(balancer.status(), ModuleStatus::Stopped);
        assert!(!balancer.listener("http").unwrap().is_running());
        assert!(balancer.stop().is_err());

        balancer.start().unwrap();
        balancer.stop().unwrap();
    }

    #[tokio::test]
    async fn test_degraded_without_healthy_targets() {
        let mut balancer = balancer();
        balancer.start().unwrap();

        let removed = balancer
            .deregister_target("web", &TargetSpec::new("10.0.0.1"))
            .unwrap();
        assert_eq!(removed, Deregistration::Removed);

        let ModuleStatus::Degraded { reason } = balancer.status() else {
            panic!("expected degraded status");
        };
        assert!(reason.contains("listener 'http'"));
        assert!(reason.contains("'web'"));

        balancer.stop().unwrap();
    }

    #[test]
    fn test_register_and_deregister() {
        let balancer = balancer();
        let id = balancer
            .register_target("web", TargetSpec::new("10.0.0.2").with_port(9090))
            .unwrap();
        assert_eq!(balancer.describe_target_health("web").unwrap().len(), 2);

        let missing = balancer.deregister_target("web", &TargetSpec::new("10.0.0.2"));
        assert!(matches!(
            missing,
            Err(LoadBalancerError::TargetNotRegistered { .. })
        ));

        let outcome = balancer
            .deregister_target("web", &TargetSpec::new("10.0.0.2").with_port(9090))
            .unwrap();
        assert_eq!(outcome, Deregistration::Removed);
        assert!(balancer.target_group("web").unwrap().target(id).is_none());

        assert!(balancer
            .register_target("nope", TargetSpec::new("10.0.0.3"))
            .is_err());
    }

    #[test]
    fn test_rule_management() {
        let balancer = balancer();
        balancer.add_rule("http", &rule(5)).unwrap();
        assert!(balancer.add_rule("http", &rule(5)).is_err());
        assert!(matches!(
            balancer.add_rule("nope", &rule(6)),
            Err(LoadBalancerError::ListenerNotFound(_))
        ));

        balancer.remove_rule("http", 5).unwrap();
        assert!(balancer.remove_rule("http", 5).is_err());
    }

    #[test]
    fn test_update_health_check() {
        let balancer = balancer();
        let config = HealthCheckConfig {
            interval: Duration::from_secs(10),
            ..HealthCheckConfig::default()
        };
        balancer.update_health_check("web", config).unwrap();

        let group = balancer.target_group("web").unwrap();
        assert_eq!(group.health_check().interval, Duration::from_secs(10));
        assert!(group.checks_enabled());
    }

    #[test]
    fn test_metrics() {
        let metrics = balancer().metrics();
        assert_eq!(metrics.gauges["listeners"], 1.0);
        assert_eq!(metrics.gauges["target_groups"], 1.0);
        assert_eq!(metrics.gauges["tg_web_registered_targets"], 1.0);
        assert_eq!(metrics.gauges["tg_web_healthy_hosts"], 1.0);
        assert_eq!(metrics.counters["tg_web_requests"], 0);
        assert!(metrics.counters.contains_key("listener_http_rules"));
    }

    #[tokio::test]
    async fn test_reload_while_running() {
        let mut balancer = balancer();
        balancer.start().unwrap();

        let invalid = ModuleConfig::from_raw(
            r#"
            [[listeners]]
            name = "x"
            protocol = "HTTP"
            port = 1
            default_actions = []
            "#,
        );
        assert!(balancer.reload(invalid).is_err());
        assert!(balancer.is_running());
        assert_eq!(balancer.listeners().len(), 1);

        let updated = CONFIG.replace("name = \"test-elb\"", "name = \"renamed\"");
        balancer.reload(ModuleConfig::from_raw(updated)).unwrap();
        assert!(balancer.is_running());
        assert_eq!(balancer.name(), "renamed");
        assert!(balancer.listener("http").unwrap().is_running());

        balancer.stop().unwrap();
    }
}
