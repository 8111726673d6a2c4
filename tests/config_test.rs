//! Loading a complete configuration document from disk and applying it.

use r0n_elb::config::{ConfigError, ConfigLoader, LoadBalancerType, LogFormat};
use r0n_elb::module::{ModuleConfig, ModuleContract, ModuleStatus};
use r0n_elb::modules::health::{HealthReason, TargetHealth};
use r0n_elb::modules::listener::ListenerProtocol;
use r0n_elb::modules::load_balancer::LoadBalancer;
use r0n_elb::modules::rules::RuleConfig;
use r0n_elb::modules::target_group::{TargetSpec, TargetType};
use std::time::Duration;
use tempfile::tempdir;

const DOCUMENT: &str = r#"
[load_balancer]
name = "shop-elb"
type = "application"

[logging]
level = "debug"
format = "json"

[instances]
i-0a1b2c3d = "10.0.1.10"
i-0e1f2a3b = "10.0.1.11"

[[target_groups]]
name = "web"
protocol = "http"
port = 8080
target_type = "instance"
deregistration_delay = "30s"
targets = [{ id = "i-0a1b2c3d" }, { id = "i-0e1f2a3b", port = 9090 }]

[target_groups.health_check]
protocol = "http"
path = "/healthz"
interval = "10s"
timeout = "3s"
healthy_threshold = 3
unhealthy_threshold = 2
matcher = "200-299"

[[target_groups]]
name = "api"
protocol = "http"
port = 8081
algorithm = "least_outstanding_requests"
targets = [{ id = "10.0.2.20" }]

[target_groups.stickiness]
enabled = true
type = "lb_cookie"
duration = "1h"

[[listeners]]
name = "http"
protocol = "HTTP"
port = 80
default_actions = [{ type = "redirect", protocol = "HTTPS", port = "443", status_code = "HTTP_301" }]

[[listeners]]
name = "public"
protocol = "HTTP"
port = 8000
default_actions = [{ type = "forward", target_group = "web" }]

[[listeners.rules]]
priority = 10
conditions = [
    { field = "path-pattern", values = ["/api/*"] },
    { field = "http-request-method", values = ["GET", "POST"] },
]
actions = [{ type = "forward", target_groups = [{ name = "api", weight = 3 }, { name = "web", weight = 1 }] }]

[[listeners.rules]]
priority = 20
conditions = [{ field = "query-string", values = [{ key = "maintenance", value = "true" }] }]
actions = [{ type = "fixed-response", status_code = 503, content_type = "text/plain", message_body = "Down for maintenance" }]
"#;

#[test]
fn test_load_document_from_disk() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("r0n-elb.toml");
    std::fs::write(&path, DOCUMENT).unwrap();

    let config = ConfigLoader::standard().load(&path).unwrap();
    assert_eq!(config.load_balancer.name, "shop-elb");
    assert_eq!(config.load_balancer.lb_type, LoadBalancerType::Application);
    assert_eq!(config.logging.format, LogFormat::Json);
    assert_eq!(config.instances.len(), 2);

    let web = config.target_group("web").unwrap();
    assert_eq!(web.target_type, TargetType::Instance);
    assert_eq!(web.deregistration_delay, Duration::from_secs(30));
    assert_eq!(web.health_check.healthy_threshold, 3);

    let public = config.listener("public").unwrap();
    assert_eq!(public.protocol, ListenerProtocol::Http);
    assert_eq!(public.rules.len(), 2);
}

#[test]
fn test_apply_document() {
    let config = ConfigLoader::standard().load_str(DOCUMENT).unwrap();
    let balancer = LoadBalancer::from_config(config).unwrap();

    assert_eq!(balancer.name(), "shop-elb");
    assert_eq!(balancer.listeners().len(), 2);

    let web = balancer.describe_target_health("web").unwrap();
    assert_eq!(web.len(), 2);
    assert!(web.iter().all(|t| t.state == TargetHealth::Initial));
    assert_eq!(web[1].port, Some(9090));

    let web_group = balancer.target_group("web").unwrap();
    let resolved: Vec<_> = web_group
        .targets()
        .iter()
        .map(|t| t.address().unwrap().to_string())
        .collect();
    assert_eq!(resolved, ["10.0.1.10:8080", "10.0.1.11:9090"]);

    let engine = balancer.listener("public").unwrap().engine();
    assert_eq!(engine.snapshot().rules().len(), 2);
}

#[test]
fn test_mutations_through_balancer() {
    let config = ConfigLoader::standard().load_str(DOCUMENT).unwrap();
    let balancer = LoadBalancer::from_config(config).unwrap();

    balancer
        .register_target("api", TargetSpec::new("10.0.2.21"))
        .unwrap();
    assert_eq!(balancer.describe_target_health("api").unwrap().len(), 2);

    balancer
        .deregister_target("api", &TargetSpec::new("10.0.2.21"))
        .unwrap();
    let described = balancer.describe_target_health("api").unwrap();
    assert_eq!(described[1].state, TargetHealth::Draining);
    assert_eq!(
        described[1].reason,
        Some(HealthReason::DeregistrationInProgress)
    );

    let rule: RuleConfig = toml::from_str(
        r#"
        priority = 5
        conditions = [{ field = "host-header", values = ["admin.*"] }]
        actions = [{ type = "fixed-response", status_code = 403 }]
        "#,
    )
    .unwrap();
    balancer.add_rule("public", &rule).unwrap();
    assert!(balancer.add_rule("public", &rule).is_err());
    assert!(balancer.add_rule("missing", &rule).is_err());
    balancer.remove_rule("public", 5).unwrap();
}

#[test]
fn test_init_from_path() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("r0n-elb.toml");
    std::fs::write(&path, DOCUMENT).unwrap();

    let mut balancer = LoadBalancer::new();
    balancer.init(ModuleConfig::from_path(&path)).unwrap();
    assert_eq!(balancer.name(), "shop-elb");
    assert!(matches!(balancer.status(), ModuleStatus::Initializing));
}

#[test]
fn test_rejects_protocol_for_network_type() {
    let document = DOCUMENT.replace(r#"type = "application""#, r#"type = "network""#);
    let result = ConfigLoader::standard().load_str(&document);

    let Err(ConfigError::Invalid { problems, .. }) = result else {
        panic!("expected a validation error");
    };
    assert!(problems.contains("HTTP listener is not allowed"));
}
