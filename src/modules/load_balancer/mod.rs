//! # Load Balancer Module
//!
//! Ties the pieces together: builds target groups from configuration,
//! registers them with the health registry, runs scheduled health checks
//! and owns the listeners that route to the groups.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 LoadBalancer                 │
//! │                                              │
//! │  ┌──────────┐   ┌─────────────┐              │
//! │  │ Listener │──▶│ Rule Engine │              │      ┌─────────┐
//! │  └──────────┘   └─────────────┘              │  ┌──▶│ Target  │
//! │                        │                     │  │   └─────────┘
//! │                 ┌─────────────┐  ┌────────┐  │  │   ┌─────────┐
//! │                 │   Actions   │─▶│ Target │──┼──┼──▶│ Target  │
//! │                 └─────────────┘  │ Group  │  │  │   └─────────┘
//! │                                  └────────┘  │  │
//! │  ┌─────────────────┐                 ▲       │  │
//! │  │ Health Registry │─────────────────┘       │  │
//! │  │  + Scheduler    │─────────── probes ──────┼──┘
//! │  └─────────────────┘                         │
//! └──────────────────────────────────────────────┘
//! ```

mod balancer;
mod error;

pub use balancer::LoadBalancer;
pub use error::{LoadBalancerError, LoadBalancerResult};
