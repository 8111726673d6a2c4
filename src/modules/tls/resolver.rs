//! SNI certificate selection and acceptor construction.

use super::certificate::CertificateBundle;
use super::error::{TlsError, TlsResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_rustls::rustls::crypto::aws_lc_rs::sign::any_supported_type;
use tokio_rustls::rustls::server::{ClientHello, ResolvesServerCert};
use tokio_rustls::rustls::sign::CertifiedKey;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;
use tracing::debug;

/// Picks a listener certificate by SNI, falling back to the default.
pub struct CertificateResolver {
    exact: HashMap<String, Arc<CertifiedKey>>,
    wildcard: Vec<(String, Arc<CertifiedKey>)>,
    default: Arc<CertifiedKey>,
}

impl std::fmt::Debug for CertificateResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateResolver")
            .field("exact", &self.exact.keys().collect::<Vec<_>>())
            .field(
                "wildcard",
                &self.wildcard.iter().map(|(s, _)| s).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl CertificateResolver {
    /// Build a resolver from a listener's certificates.
    ///
    /// # Errors
    ///
    /// Returns an error unless exactly one bundle is flagged default, or if
    /// a key is not usable for signing.
    pub fn new(bundles: &[CertificateBundle]) -> TlsResult<Self> {
        let defaults = bundles.iter().filter(|b| b.is_default()).count();
        match defaults {
            0 => return Err(TlsError::NoDefaultCertificate),
            1 => {},
            n => return Err(TlsError::MultipleDefaultCertificates(n)),
        }

        let mut exact = HashMap::new();
        let mut wildcard = Vec::new();
        let mut default = None;

        for bundle in bundles {
            let signing_key = any_supported_type(bundle.private_key()).map_err(|e| {
                TlsError::InvalidCertificate(format!(
                    "{}: unusable private key: {e}",
                    bundle.source().display()
                ))
            })?;
            let key = Arc::new(CertifiedKey::new(bundle.certificates().to_vec(), signing_key));

            for name in bundle.sni_names() {
                let name = name.to_ascii_lowercase();
                match name.strip_prefix("*.") {
                    Some(suffix) => wildcard.push((suffix.to_string(), Arc::clone(&key))),
                    None => {
                        exact.insert(name, Arc::clone(&key));
                    },
                }
            }

            if bundle.is_default() {
                default = Some(key);
            }
        }

        let default = default.ok_or(TlsError::NoDefaultCertificate)?;
        Ok(Self {
            exact,
            wildcard,
            default,
        })
    }

    /// Pick the certificate for a server name.
    #[must_use]
    pub fn select(&self, server_name: Option<&str>) -> Arc<CertifiedKey> {
        let Some(name) = server_name.map(str::to_ascii_lowercase) else {
            return Arc::clone(&self.default);
        };

        if let Some(key) = self.exact.get(&name) {
            return Arc::clone(key);
        }

        if let Some((label, parent)) = name.split_once('.') {
            if !label.is_empty() {
                if let Some((_, key)) = self.wildcard.iter().find(|(suffix, _)| suffix == parent) {
                    return Arc::clone(key);
                }
            }
        }

        debug!(sni = %name, "No certificate for SNI, serving default");
        Arc::clone(&self.default)
    }
}

impl ResolvesServerCert for CertificateResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        Some(self.select(client_hello.server_name()))
    }
}

/// Build a TLS acceptor offering `alpn` in preference order.
#[must_use]
pub fn build_acceptor(resolver: Arc<CertificateResolver>, alpn: Vec<Vec<u8>>) -> TlsAcceptor {
    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_cert_resolver(resolver);
    config.alpn_protocols = alpn;
    TlsAcceptor::from(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::tls::CertificateConfig;
    use std::path::PathBuf;

    fn fixture(default: bool, sni_names: &[&str]) -> CertificateBundle {
        let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
        CertificateBundle::load(&CertificateConfig {
            cert_path: dir.join("localhost.crt"),
            key_path: dir.join("localhost.key"),
            chain_path: None,
            sni_names: sni_names.iter().map(|s| s.to_string()).collect(),
            default,
        })
        .unwrap()
    }

    #[test]
    fn test_requires_single_default() {
        assert!(matches!(
            CertificateResolver::new(&[fixture(false, &[])]),
            Err(TlsError::NoDefaultCertificate)
        ));
        assert!(matches!(
            CertificateResolver::new(&[fixture(true, &[]), fixture(true, &[])]),
            Err(TlsError::MultipleDefaultCertificates(2))
        ));
        assert!(CertificateResolver::new(&[fixture(true, &[])]).is_ok());
    }

    #[test]
    fn test_select_by_sni() {
        let resolver = CertificateResolver::new(&[
            fixture(true, &[]),
            fixture(false, &["api.example.com", "*.example.org"]),
        ])
        .unwrap();

        let default = resolver.select(None);
        let api = resolver.select(Some("API.example.com"));
        assert!(!Arc::ptr_eq(&default, &api));

        let wild = resolver.select(Some("www.example.org"));
        assert!(Arc::ptr_eq(&wild, &api));

        // Wildcards match exactly one label.
        let deep = resolver.select(Some("a.b.example.org"));
        assert!(Arc::ptr_eq(&deep, &default));
        assert!(Arc::ptr_eq(&resolver.select(Some("example.org")), &default));
    }
}
