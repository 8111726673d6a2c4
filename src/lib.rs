//! # R0N ELB
//!
//! The core of an L4/L7 load balancer in the style of Elastic Load Balancing
//! v2: listeners, prioritized routing rules, rule actions, target groups and
//! target health.
//!
//! ## Features
//!
//! - HTTP and HTTPS listeners with host, path, header, method, query-string
//!   and source-IP rule conditions
//! - Forward (weighted, sticky), redirect, fixed-response and OpenID Connect
//!   / Cognito authenticate actions
//! - TCP, TLS, UDP and `TCP_UDP` listeners relaying to a default target group
//! - Round-robin and least-outstanding-requests target selection
//! - Active TCP, HTTP(S) and gRPC health checks with connection draining
//!
//! ## Architecture
//!
//! The [`modules::load_balancer::LoadBalancer`] owns everything and, like
//! each [`modules::listener::Listener`], implements the
//! [`module::ModuleContract`] lifecycle. Configuration is loaded and
//! validated by [`config::ConfigLoader`].

pub mod config;
pub mod logging;
pub mod module;
pub mod modules;
