//! # TLS
//!
//! Certificate loading, SNI-based certificate selection with a mandatory
//! default, ALPN-aware acceptors for HTTPS/TLS listeners, and client configs
//! for connections to targets and identity providers.

mod certificate;
mod client;
mod error;
mod resolver;

pub use certificate::{load_certificates, load_root_store, CertificateBundle, CertificateConfig};
pub use client::{target_client_config, verified_client_config};
pub use error::{TlsError, TlsResult};
pub use resolver::{build_acceptor, CertificateResolver};
