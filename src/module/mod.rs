//! # Component Lifecycle
//!
//! Every long-lived piece of the load balancer (the load balancer itself and
//! each bound listener) implements [`ModuleContract`] so it can be
//! initialised, started, reloaded and stopped uniformly, and so it can report
//! status and metrics to an external collector.

mod config;
mod contract;
mod error;
mod manifest;
mod status;

pub use config::ModuleConfig;
pub use contract::{MetricsPayload, ModuleContract};
pub use error::{ModuleError, ModuleResult};
pub use manifest::{Capability, ModuleManifest, ModuleManifestBuilder};
pub use status::ModuleStatus;
