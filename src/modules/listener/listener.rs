//! The listener component.

use super::config::{ListenerConfig, ListenerProtocol};
use super::error::{ListenerError, ListenerResult};
use super::http::{self, HttpContext};
use super::l4::{self, StreamContext};
use super::stats::ListenerStats;
use super::udp::{self, DatagramContext};
use crate::module::{
    Capability, MetricsPayload, ModuleConfig, ModuleContract, ModuleError, ModuleManifest,
    ModuleResult, ModuleStatus,
};
use crate::modules::actions::{ActionBuilder, ActionConfig, ActionEvaluator, IdentityProvider};
use crate::modules::rules::{Rule, RuleConfig, RuleEngine, RuleResult, RuleSet};
use crate::modules::target_group::{TargetGroup, TargetProtocol};
use crate::modules::tls::{
    build_acceptor, target_client_config, CertificateBundle, CertificateResolver, TlsResult,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, UdpSocket};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::{info, warn};

/// A bound port with a protocol, TLS settings and a rule set.
///
/// The rule set lives behind a [`RuleEngine`], so rules can be added,
/// removed or replaced while the listener serves traffic. Protocol and
/// address are fixed once the listener is running.
pub struct Listener {
    config: ListenerConfig,
    groups: HashMap<String, Arc<TargetGroup>>,
    provider: Option<Arc<dyn IdentityProvider>>,
    engine: Arc<RuleEngine>,
    evaluator: Arc<ActionEvaluator>,
    stats: Arc<ListenerStats>,
    acceptor: Option<TlsAcceptor>,
    target_tls: TlsConnector,
    status: ModuleStatus,
    local_addr: Option<SocketAddr>,
    shutdown: Option<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("name", &self.config.name)
            .field("protocol", &self.config.protocol)
            .field("status", &self.status)
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

impl Listener {
    /// Build a listener against a set of target groups.
    ///
    /// `provider` overrides the identity provider client of every
    /// authenticate action; without it each action gets an HTTPS client
    /// built from its own session settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, references unknown
    /// or incompatible target groups, or certificates fail to load.
    pub fn build(
        config: ListenerConfig,
        groups: &HashMap<String, Arc<TargetGroup>>,
        provider: Option<Arc<dyn IdentityProvider>>,
    ) -> ListenerResult<Self> {
        config.validate()?;
        check_group_protocols(&config, groups)?;

        let mut builder = ActionBuilder::new(groups);
        if let Some(provider) = &provider {
            builder = builder.with_identity_provider(Arc::clone(provider));
        }
        let rules = build_rule_set(&config, &builder)?;
        let acceptor = load_acceptor(&config)?;

        Ok(Self {
            groups: groups.clone(),
            provider,
            engine: Arc::new(RuleEngine::new(rules)),
            evaluator: Arc::new(ActionEvaluator::new()),
            stats: Arc::new(ListenerStats::new()),
            acceptor,
            target_tls: TlsConnector::from(target_client_config()),
            status: ModuleStatus::Initializing,
            local_addr: None,
            shutdown: None,
            tasks: Vec::new(),
            config,
        })
    }

    /// Get the listener name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    /// Get the protocol.
    #[must_use]
    pub fn protocol(&self) -> ListenerProtocol {
        self.config.protocol
    }

    /// Get the bound address. `None` until started.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Check if the listener is serving.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shutdown.is_some()
    }

    /// Get the rule engine.
    #[must_use]
    pub fn engine(&self) -> &Arc<RuleEngine> {
        &self.engine
    }

    /// Get the action evaluator.
    #[must_use]
    pub fn evaluator(&self) -> &Arc<ActionEvaluator> {
        &self.evaluator
    }

    /// Get the counters.
    #[must_use]
    pub fn stats(&self) -> &Arc<ListenerStats> {
        &self.stats
    }

    fn action_builder(&self) -> ActionBuilder<'_> {
        let builder = ActionBuilder::new(&self.groups);
        match &self.provider {
            Some(provider) => builder.with_identity_provider(Arc::clone(provider)),
            None => builder,
        }
    }

    /// Add a rule.
    ///
    /// # Errors
    ///
    /// Returns an error on a non-HTTP listener, an invalid rule, or a
    /// priority already in use.
    pub fn add_rule(&self, config: &RuleConfig) -> ListenerResult<()> {
        let mut candidate = self.config.clone();
        candidate.rules = vec![config.clone()];
        candidate.validate()?;
        check_actions(self.config.protocol, &config.actions, &self.groups)?;

        let rule = Rule::from_config(config, &self.action_builder())?;
        self.engine.add_rule(rule)?;
        info!(listener = %self.config.name, priority = config.priority, "Rule added");
        Ok(())
    }

    /// Remove the rule with this priority.
    ///
    /// # Errors
    ///
    /// Returns `RuleNotFound` if no rule has the priority.
    pub fn remove_rule(&self, priority: u32) -> ListenerResult<()> {
        self.engine.remove_rule(priority)?;
        info!(listener = %self.config.name, priority, "Rule removed");
        Ok(())
    }

    /// Replace the default rule's actions.
    ///
    /// # Errors
    ///
    /// Returns an error if the chain is invalid for this listener.
    pub fn set_default_actions(&self, actions: &[ActionConfig]) -> ListenerResult<()> {
        let mut candidate = self.config.clone();
        candidate.default_actions = actions.to_vec();
        candidate.rules.clear();
        candidate.validate()?;
        check_actions(self.config.protocol, actions, &self.groups)?;

        let chain = self.action_builder().build(actions)?;
        self.engine.set_default(Arc::new(chain));
        info!(listener = %self.config.name, "Default actions replaced");
        Ok(())
    }

    /// Apply a new configuration. A running listener keeps its protocol and
    /// address; certificate changes take effect on the next start.
    fn apply(&mut self, config: ListenerConfig) -> ListenerResult<()> {
        if self.is_running()
            && (config.protocol != self.config.protocol
                || config.socket_addr() != self.config.socket_addr())
        {
            return Err(ListenerError::InvalidConfig(format!(
                "protocol and address of running listener '{}' cannot change",
                self.config.name
            )));
        }

        config.validate()?;
        check_group_protocols(&config, &self.groups)?;
        let rules = build_rule_set(&config, &self.action_builder())?;
        let acceptor = load_acceptor(&config)?;

        if self.is_running() && acceptor.is_some() {
            info!(listener = %config.name, "Certificate changes apply on next start");
        }

        self.engine.replace(rules);
        self.acceptor = acceptor;
        self.config = config;
        Ok(())
    }

    fn bind(
        &self,
        handle: &Handle,
        shutdown: &watch::Receiver<bool>,
    ) -> ListenerResult<(SocketAddr, Vec<JoinHandle<()>>)> {
        let _runtime = handle.enter();
        let protocol = self.config.protocol;
        let mut address = self.config.socket_addr();
        let mut tasks = Vec::new();

        if protocol.accepts_tcp() {
            let bind_error = move |source| ListenerError::Bind { address, source };
            let socket = std::net::TcpListener::bind(address).map_err(bind_error)?;
            socket.set_nonblocking(true).map_err(bind_error)?;
            address = socket.local_addr().map_err(bind_error)?;
            let listener = TcpListener::from_std(socket).map_err(bind_error)?;

            if protocol.is_http() {
                let context = Arc::new(HttpContext {
                    name: self.config.name.clone(),
                    engine: Arc::clone(&self.engine),
                    evaluator: Arc::clone(&self.evaluator),
                    stats: Arc::clone(&self.stats),
                    scheme: protocol.scheme(),
                    port: address.port(),
                    connect_timeout: self.config.connect_timeout,
                    target_tls: self.target_tls.clone(),
                });
                tasks.push(handle.spawn(http::serve(
                    listener,
                    context,
                    self.acceptor.clone(),
                    shutdown.clone(),
                )));
            } else {
                let context = Arc::new(StreamContext {
                    name: self.config.name.clone(),
                    engine: Arc::clone(&self.engine),
                    stats: Arc::clone(&self.stats),
                    connect_timeout: self.config.connect_timeout,
                    target_tls: self.target_tls.clone(),
                });
                tasks.push(handle.spawn(l4::serve(
                    listener,
                    context,
                    self.acceptor.clone(),
                    shutdown.clone(),
                )));
            }
        }

        if protocol.accepts_udp() {
            let bind_error = move |source| ListenerError::Bind { address, source };
            let socket = std::net::UdpSocket::bind(address).map_err(bind_error)?;
            socket.set_nonblocking(true).map_err(bind_error)?;
            address = socket.local_addr().map_err(bind_error)?;
            let socket = UdpSocket::from_std(socket).map_err(bind_error)?;

            let context = Arc::new(DatagramContext {
                name: self.config.name.clone(),
                engine: Arc::clone(&self.engine),
                stats: Arc::clone(&self.stats),
                idle_timeout: self.config.udp_idle_timeout,
            });
            tasks.push(handle.spawn(udp::serve(socket, context, shutdown.clone())));
        }

        Ok((address, tasks))
    }

    /// Target groups this listener forwards to.
    fn forwarded_groups(&self) -> impl Iterator<Item = &Arc<TargetGroup>> {
        let snapshot = self.engine.snapshot();
        let mut names: Vec<String> = Vec::new();
        for rule in snapshot.rules().iter().chain(std::iter::once(snapshot.default_rule())) {
            if let Some(forward) = rule.actions().forward() {
                for (group, _) in forward.groups().entries() {
                    names.push(group.name().to_string());
                }
            }
        }
        names.sort();
        names.dedup();
        self.groups
            .iter()
            .filter(move |(name, _)| names.binary_search(*name).is_ok())
            .map(|(_, group)| group)
    }
}

fn build_rule_set(config: &ListenerConfig, builder: &ActionBuilder<'_>) -> ListenerResult<RuleSet> {
    let default = Rule::default_rule(Arc::new(builder.build(&config.default_actions)?));
    let rules = config
        .rules
        .iter()
        .map(|rule| Rule::from_config(rule, builder))
        .collect::<RuleResult<Vec<_>>>()?;
    Ok(RuleSet::new(rules, default)?)
}

fn load_acceptor(config: &ListenerConfig) -> ListenerResult<Option<TlsAcceptor>> {
    if !config.protocol.terminates_tls() {
        return Ok(None);
    }
    let bundles = config
        .certificates
        .iter()
        .map(CertificateBundle::load)
        .collect::<TlsResult<Vec<_>>>()?;
    let resolver = Arc::new(CertificateResolver::new(&bundles)?);
    Ok(Some(build_acceptor(resolver, config.alpn_protocols())))
}

fn check_group_protocols(
    config: &ListenerConfig,
    groups: &HashMap<String, Arc<TargetGroup>>,
) -> ListenerResult<()> {
    check_actions(config.protocol, &config.default_actions, groups)?;
    for rule in &config.rules {
        check_actions(config.protocol, &rule.actions, groups)?;
    }
    Ok(())
}

/// Check that forwarded groups speak a protocol the listener can carry.
/// Unknown groups are reported when the actions are built.
fn check_actions(
    protocol: ListenerProtocol,
    actions: &[ActionConfig],
    groups: &HashMap<String, Arc<TargetGroup>>,
) -> ListenerResult<()> {
    for name in actions.iter().flat_map(ActionConfig::target_group_names) {
        let Some(group) = groups.get(name) else {
            continue;
        };
        let target = group.protocol();
        let compatible = match protocol {
            ListenerProtocol::Http | ListenerProtocol::Https => {
                matches!(target, TargetProtocol::Http | TargetProtocol::Https)
            },
            ListenerProtocol::Tcp => matches!(target, TargetProtocol::Tcp | TargetProtocol::TcpUdp),
            ListenerProtocol::Tls => matches!(target, TargetProtocol::Tcp | TargetProtocol::Tls),
            ListenerProtocol::Udp => matches!(target, TargetProtocol::Udp | TargetProtocol::TcpUdp),
            ListenerProtocol::TcpUdp => target == TargetProtocol::TcpUdp,
        };
        if !compatible {
            return Err(ListenerError::InvalidConfig(format!(
                "{protocol} listener cannot forward to {target:?} target group '{name}'"
            )));
        }
    }
    Ok(())
}

impl ModuleContract for Listener {
    fn manifest(&self) -> ModuleManifest {
        let protocol = self.config.protocol;
        let mut builder = ModuleManifest::builder(format!("listener-{}", self.config.name))
            .description(format!("{protocol} listener"))
            .version(0, 1, 0)
            .capability(Capability::LoadBalancing)
            .capability(Capability::DynamicConfiguration);

        if protocol.is_http() {
            builder = builder.capability(Capability::HttpListener);
        } else if protocol.accepts_tcp() {
            builder = builder.capability(Capability::TcpListener);
        }
        if protocol.accepts_udp() {
            builder = builder.capability(Capability::UdpListener);
        }
        if protocol.terminates_tls() {
            builder = builder.capability(Capability::TlsTermination);
        }

        let snapshot = self.engine.snapshot();
        let authenticates = snapshot
            .rules()
            .iter()
            .chain(std::iter::once(snapshot.default_rule()))
            .any(|rule| rule.actions().authenticator().is_some());
        if authenticates {
            builder = builder.capability(Capability::Authentication);
        }

        builder.build()
    }

    fn init(&mut self, config: ModuleConfig) -> ModuleResult<()> {
        let parsed: ListenerConfig = config.parse()?;
        self.apply(parsed)
            .map_err(|e| ModuleError::ConfigError(e.to_string()))
    }

    fn start(&mut self) -> ModuleResult<()> {
        if self.is_running() {
            return Err(ModuleError::InvalidState {
                current: self.status.to_string(),
                expected: "stopped".to_string(),
            });
        }

        let handle = Handle::try_current()
            .map_err(|_| ModuleError::StartFailed(ListenerError::NoRuntime.to_string()))?;
        let (shutdown, receiver) = watch::channel(false);

        match self.bind(&handle, &receiver) {
            Ok((address, tasks)) => {
                info!(
                    listener = %self.config.name,
                    protocol = %self.config.protocol,
                    %address,
                    "Listener started"
                );
                self.local_addr = Some(address);
                self.tasks = tasks;
                self.shutdown = Some(shutdown);
                self.status = ModuleStatus::Running;
                Ok(())
            },
            Err(e) => {
                self.status = ModuleStatus::Error {
                    message: e.to_string(),
                };
                Err(ModuleError::StartFailed(e.to_string()))
            },
        }
    }

    fn stop(&mut self) -> ModuleResult<()> {
        let Some(shutdown) = self.shutdown.take() else {
            return Err(ModuleError::InvalidState {
                current: self.status.to_string(),
                expected: "running".to_string(),
            });
        };

        let _ = shutdown.send(true);
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.local_addr = None;
        self.status = ModuleStatus::Stopped;
        info!(listener = %self.config.name, "Listener stopped");
        Ok(())
    }

    fn reload(&mut self, config: ModuleConfig) -> ModuleResult<()> {
        let parsed: ListenerConfig = config.parse()?;
        self.apply(parsed).map_err(|e| {
            warn!(listener = %self.config.name, error = %e, "Reload rejected");
            ModuleError::ConfigError(e.to_string())
        })?;
        info!(listener = %self.config.name, "Listener reloaded");
        Ok(())
    }

    fn status(&self) -> ModuleStatus {
        if self.status != ModuleStatus::Running {
            return self.status.clone();
        }
        match self.forwarded_groups().find(|g| g.healthy_count() == 0) {
            Some(group) => ModuleStatus::Degraded {
                reason: format!("target group '{}' has no healthy targets", group.name()),
            },
            None => ModuleStatus::Running,
        }
    }

    fn metrics(&self) -> MetricsPayload {
        let mut payload = self.stats.metrics();
        payload.merge_prefixed("actions", self.evaluator.stats().metrics());
        payload.counter("rules", self.engine.snapshot().rules().len() as u64);
        payload
    }
}
