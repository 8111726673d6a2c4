//! # Listeners
//!
//! A listener binds a port with one of six protocols:
//!
//! - `HTTP` / `HTTPS`: requests are parsed by hyper, matched against the
//!   listener's prioritized rules and handled by the matched action chain.
//!   HTTPS terminates TLS with SNI certificate selection and negotiates
//!   HTTP/2 or HTTP/1.1 through ALPN.
//! - `TCP` / `TLS`: each connection is relayed byte for byte to a target of
//!   the default forward action. TLS terminates first.
//! - `UDP` / `TCP_UDP`: datagrams are relayed per client flow.
//!
//! Targets selected for a request or connection keep an in-flight slot until
//! the response body ends or the connection closes.

mod body;
mod config;
mod error;
mod http;
mod l4;
#[allow(clippy::module_inception)]
mod listener;
mod stats;
mod udp;

pub use body::{full, GuardedBody, ResponseBody};
pub use config::{AlpnPolicy, ListenerConfig, ListenerProtocol};
pub use error::{ListenerError, ListenerResult};
pub use listener::Listener;
pub use stats::ListenerStats;
