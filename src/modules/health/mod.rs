//! # Target Health Registry
//!
//! Tracks the health of every registered target through periodic active
//! checks (TCP connect, HTTP(S) status match, gRPC status match).
//!
//! A target starts `initial`, becomes `healthy` after `healthy_threshold`
//! consecutive passing checks and `unhealthy` after `unhealthy_threshold`
//! consecutive failures. Deregistered targets drain for the group's
//! deregistration delay before removal. Only healthy targets receive new
//! requests.

mod config;
mod error;
mod matcher;
mod probe;
mod registry;
mod scheduler;
mod state;

pub use config::{HealthCheckConfig, HealthCheckProtocol, GRPC_HEALTH_PATH};
pub use error::{HealthError, HealthResult};
pub use matcher::Matcher;
pub use probe::HealthProbe;
pub use registry::HealthRegistry;
pub use scheduler::HealthScheduler;
pub use state::{
    HealthCheckResult, HealthReason, HealthTracker, ProbeFailure, ProbeOutcome, TargetHealth,
};
