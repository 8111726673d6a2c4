//! # Load Balancer Components
//!
//! - [`health`] - Target health registry and scheduled health checks
//! - [`target_group`] - Target groups, registration, draining and selection
//! - [`rules`] - Listener rules, conditions and the rule engine
//! - [`actions`] - Rule actions and their evaluation
//! - [`tls`] - Certificate loading, SNI selection and client configuration
//! - [`listener`] - HTTP(S), TCP, TLS and UDP listeners
//! - [`load_balancer`] - The load balancer tying the components together

pub mod actions;
pub mod health;
pub mod listener;
pub mod load_balancer;
pub mod rules;
pub mod target_group;
pub mod tls;
