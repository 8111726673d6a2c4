//! # Configuration System
//!
//! TOML configuration for a load balancer: its target groups, listeners,
//! rules and the instance address table used by instance targets.
//!
//! ## Example Configuration
//!
//! ```toml
//! [load_balancer]
//! name = "web"
//! type = "application"
//!
//! [logging]
//! level = "info"
//! format = "json"
//!
//! [instances]
//! "i-0123abcd" = "10.0.1.10"
//!
//! [[target_groups]]
//! name = "web-tg"
//! protocol = "http"
//! port = 8080
//! target_type = "instance"
//! targets = [{ id = "i-0123abcd" }]
//!
//! [[listeners]]
//! name = "http"
//! protocol = "HTTP"
//! port = 80
//! default_actions = [{ type = "forward", target_group = "web-tg" }]
//! ```

mod error;
mod loader;
mod types;
mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use types::{
    ElbConfig, LoadBalancerSection, LoadBalancerType, LogFormat, LogLevel, LogOutput,
    LoggingConfig,
};
pub use validation::{
    BasicValidator, ListenerValidator, PortConflictValidator, TargetGroupValidator,
    ValidationError, ValidationResult, ValidationSeverity, Validator,
};
