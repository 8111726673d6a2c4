//! Configuration validation system.
//!
//! Validators run over the whole document before anything is built and
//! report every problem found.

use super::types::{ElbConfig, LoadBalancerType};
use crate::modules::actions::{check_chain, ActionConfig, FixedResponseAction, RedirectAction};
use crate::modules::listener::ListenerConfig;
use crate::modules::rules::{Condition, MAX_CONDITION_VALUES, MAX_PRIORITY, MIN_PRIORITY};
use crate::modules::target_group::TargetType;
use std::collections::{HashMap, HashSet};

/// A single validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// Error message.
    pub message: String,
    /// Severity level.
    pub severity: ValidationSeverity,
}

impl ValidationError {
    /// Create a new error.
    pub fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            severity: ValidationSeverity::Error,
        }
    }

    /// Create a new warning.
    pub fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            severity: ValidationSeverity::Warning,
        }
    }
}

/// Severity of validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationSeverity {
    /// Error - configuration is invalid.
    Error,
    /// Warning - configuration may have issues.
    Warning,
}

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    errors: Vec<ValidationError>,
}

impl ValidationResult {
    /// Create a new empty (valid) result.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an error to the result.
    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    /// Check if the validation passed (no errors).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self
            .errors
            .iter()
            .any(|e| e.severity == ValidationSeverity::Error)
    }

    /// Get all validation errors.
    #[must_use]
    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    /// Get only errors (not warnings).
    #[must_use]
    pub fn errors_only(&self) -> Vec<&ValidationError> {
        self.errors
            .iter()
            .filter(|e| e.severity == ValidationSeverity::Error)
            .collect()
    }

    /// Get only warnings.
    #[must_use]
    pub fn warnings(&self) -> Vec<&ValidationError> {
        self.errors
            .iter()
            .filter(|e| e.severity == ValidationSeverity::Warning)
            .collect()
    }

    /// Merge another validation result into this one.
    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
    }
}

/// Trait for configuration validators.
pub trait Validator: std::fmt::Debug + Send + Sync {
    /// Validate a configuration and return any errors.
    fn validate(&self, config: &ElbConfig) -> ValidationResult;
}

/// Load balancer identity, name uniqueness and listener types.
#[derive(Debug, Default)]
pub struct BasicValidator;

impl BasicValidator {
    /// Create a new basic validator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Validator for BasicValidator {
    fn validate(&self, config: &ElbConfig) -> ValidationResult {
        let mut result = ValidationResult::new();

        let name = &config.load_balancer.name;
        if name.is_empty()
            || name.len() > 32
            || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            result.add_error(ValidationError::error(
                "load_balancer.name",
                format!("Load balancer name '{name}' must be 1-32 alphanumerics or hyphens"),
            ));
        }

        for id in config.instances.keys() {
            if TargetType::classify(id) != Some(TargetType::Instance) {
                result.add_error(ValidationError::error(
                    format!("instances.{id}"),
                    format!("'{id}' is not an instance id"),
                ));
            }
        }

        let mut seen = HashSet::new();
        for group in &config.target_groups {
            if !seen.insert(group.name.as_str()) {
                result.add_error(ValidationError::error(
                    format!("target_groups.{}", group.name),
                    format!("Duplicate target group name: {}", group.name),
                ));
            }
        }

        let mut seen = HashSet::new();
        let lb_type = config.load_balancer.lb_type;
        for listener in &config.listeners {
            if !seen.insert(listener.name.as_str()) {
                result.add_error(ValidationError::error(
                    format!("listeners.{}", listener.name),
                    format!("Duplicate listener name: {}", listener.name),
                ));
            }

            let allowed = match lb_type {
                LoadBalancerType::Application => listener.protocol.is_http(),
                LoadBalancerType::Network => !listener.protocol.is_http(),
            };
            if !allowed {
                result.add_error(ValidationError::error(
                    format!("listeners.{}.protocol", listener.name),
                    format!(
                        "{} listener is not allowed on load balancer type {lb_type}",
                        listener.protocol
                    ),
                ));
            }
        }

        result
    }
}

/// Validator that checks for port conflicts between listeners.
///
/// TCP and UDP ports are separate namespaces; a `TCP_UDP` listener occupies
/// both. Port 0 binds an ephemeral port and never conflicts.
#[derive(Debug, Default)]
pub struct PortConflictValidator;

impl PortConflictValidator {
    /// Create a new port conflict validator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Validator for PortConflictValidator {
    fn validate(&self, config: &ElbConfig) -> ValidationResult {
        let mut result = ValidationResult::new();
        let mut tcp: HashMap<u16, &str> = HashMap::new();
        let mut udp: HashMap<u16, &str> = HashMap::new();

        for listener in config.listeners.iter().filter(|l| l.port != 0) {
            for (accepts, ports, transport) in [
                (listener.protocol.accepts_tcp(), &mut tcp, "TCP"),
                (listener.protocol.accepts_udp(), &mut udp, "UDP"),
            ] {
                if !accepts {
                    continue;
                }
                if let Some(existing) = ports.get(&listener.port) {
                    result.add_error(ValidationError::error(
                        format!("listeners.{}.port", listener.name),
                        format!(
                            "{transport} port {} already used by listener '{existing}'",
                            listener.port
                        ),
                    ));
                } else {
                    ports.insert(listener.port, listener.name.as_str());
                }
            }
        }

        result
    }
}

/// Target group parameters, plus a warning for groups no listener uses.
#[derive(Debug, Default)]
pub struct TargetGroupValidator;

impl TargetGroupValidator {
    /// Create a new target group validator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Validator for TargetGroupValidator {
    fn validate(&self, config: &ElbConfig) -> ValidationResult {
        let mut result = ValidationResult::new();

        let referenced: HashSet<&str> = config
            .listeners
            .iter()
            .flat_map(|l| {
                l.default_actions
                    .iter()
                    .chain(l.rules.iter().flat_map(|r| r.actions.iter()))
            })
            .flat_map(ActionConfig::target_group_names)
            .collect();

        for group in &config.target_groups {
            let field = format!("target_groups.{}", group.name);

            if let Err(e) = group.validate() {
                result.add_error(ValidationError::error(&field, e.to_string()));
            }

            if !referenced.contains(group.name.as_str()) {
                result.add_error(ValidationError::warning(
                    &field,
                    format!("Target group '{}' is not used by any listener", group.name),
                ));
            }

            if group.target_type == TargetType::Instance {
                for target in &group.targets {
                    if !config.instances.contains_key(&target.id) {
                        result.add_error(ValidationError::error(
                            format!("{field}.targets"),
                            format!("Instance '{}' has no entry in [instances]", target.id),
                        ));
                    }
                }
            }
        }

        result
    }
}

/// Listener parameters, rules and action chains.
#[derive(Debug, Default)]
pub struct ListenerValidator;

impl ListenerValidator {
    /// Create a new listener validator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn validate_listener(
        listener: &ListenerConfig,
        groups: &HashSet<&str>,
        result: &mut ValidationResult,
    ) {
        let field = format!("listeners.{}", listener.name);

        if let Err(e) = listener.validate() {
            result.add_error(ValidationError::error(&field, e.to_string()));
        }

        Self::validate_actions(
            &format!("{field}.default_actions"),
            &listener.default_actions,
            groups,
            result,
        );

        let mut priorities = HashSet::new();
        for rule in &listener.rules {
            let field = format!("{field}.rules.{}", rule.priority);

            if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&rule.priority) {
                result.add_error(ValidationError::error(
                    &field,
                    format!("Priority must be {MIN_PRIORITY}-{MAX_PRIORITY}"),
                ));
            }
            if !priorities.insert(rule.priority) {
                result.add_error(ValidationError::error(
                    &field,
                    format!("Duplicate rule priority {}", rule.priority),
                ));
            }

            if rule.conditions.is_empty() {
                result.add_error(ValidationError::error(&field, "Rule has no conditions"));
            }
            let mut values = 0;
            for condition in &rule.conditions {
                match Condition::from_config(condition) {
                    Ok(condition) => values += condition.value_count(),
                    Err(e) => {
                        result.add_error(ValidationError::error(&field, e.to_string()));
                    },
                }
            }
            if values > MAX_CONDITION_VALUES {
                result.add_error(ValidationError::error(
                    &field,
                    format!("{values} condition values exceed the limit of {MAX_CONDITION_VALUES}"),
                ));
            }

            Self::validate_actions(&format!("{field}.actions"), &rule.actions, groups, result);
        }
    }

    fn validate_actions(
        field: &str,
        actions: &[ActionConfig],
        groups: &HashSet<&str>,
        result: &mut ValidationResult,
    ) {
        if let Err(e) = check_chain(actions) {
            result.add_error(ValidationError::error(field, e.to_string()));
        }

        for action in actions {
            let checked = match action {
                ActionConfig::Redirect(redirect) => RedirectAction::new(redirect).map(drop),
                ActionConfig::FixedResponse(fixed) => FixedResponseAction::new(fixed).map(drop),
                _ => Ok(()),
            };
            if let Err(e) = checked {
                result.add_error(ValidationError::error(field, e.to_string()));
            }

            for name in action.target_group_names() {
                if !groups.contains(name) {
                    result.add_error(ValidationError::error(
                        field,
                        format!("Unknown target group '{name}'"),
                    ));
                }
            }
        }
    }
}

impl Validator for ListenerValidator {
    fn validate(&self, config: &ElbConfig) -> ValidationResult {
        let mut result = ValidationResult::new();
        let groups: HashSet<&str> = config.target_groups.iter().map(|g| g.name.as_str()).collect();

        for listener in &config.listeners {
            Self::validate_listener(listener, &groups, &mut result);
        }

        result
    }
}
