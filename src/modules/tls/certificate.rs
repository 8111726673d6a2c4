//! Certificate loading.

use super::error::{TlsError, TlsResult};
use rustls_pemfile::{certs, private_key};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::RootCertStore;
use tracing::{debug, info};

/// A certificate attached to an HTTPS or TLS listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateConfig {
    /// PEM certificate (leaf first).
    pub cert_path: PathBuf,

    /// PEM private key.
    pub key_path: PathBuf,

    /// Optional PEM intermediate chain.
    #[serde(default)]
    pub chain_path: Option<PathBuf>,

    /// Server names served with this certificate. `*.example.com` matches
    /// one label.
    #[serde(default)]
    pub sni_names: Vec<String>,

    /// Served when no SNI name matches. Exactly one per listener.
    #[serde(default)]
    pub default: bool,
}

/// A loaded certificate chain and key.
pub struct CertificateBundle {
    certificates: Vec<CertificateDer<'static>>,
    private_key: PrivateKeyDer<'static>,
    sni_names: Vec<String>,
    default: bool,
    source: PathBuf,
}

impl std::fmt::Debug for CertificateBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateBundle")
            .field("source", &self.source)
            .field("certificates_count", &self.certificates.len())
            .field("sni_names", &self.sni_names)
            .field("default", &self.default)
            .finish()
    }
}

impl CertificateBundle {
    /// Load the files named by a certificate configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a file is missing or contains no usable PEM data.
    pub fn load(config: &CertificateConfig) -> TlsResult<Self> {
        info!(cert_path = %config.cert_path.display(), "Loading certificate");

        let mut certificates = load_certificates(&config.cert_path)?;
        if let Some(chain_path) = &config.chain_path {
            certificates.extend(load_certificates(chain_path)?);
        }

        if certificates.is_empty() {
            return Err(TlsError::CertificateLoad {
                path: config.cert_path.display().to_string(),
                message: "no certificates found in file".to_string(),
            });
        }

        let private_key = load_private_key(&config.key_path)?;

        debug!(
            cert_count = certificates.len(),
            sni_names = ?config.sni_names,
            default = config.default,
            "Certificate loaded"
        );

        Ok(Self {
            certificates,
            private_key,
            sni_names: config.sni_names.clone(),
            default: config.default,
            source: config.cert_path.clone(),
        })
    }

    /// Get the certificate chain.
    #[must_use]
    pub fn certificates(&self) -> &[CertificateDer<'static>] {
        &self.certificates
    }

    /// Get the private key.
    #[must_use]
    pub fn private_key(&self) -> &PrivateKeyDer<'static> {
        &self.private_key
    }

    /// Get the server names.
    #[must_use]
    pub fn sni_names(&self) -> &[String] {
        &self.sni_names
    }

    /// Check if this is the listener's default certificate.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.default
    }

    /// Get the file the certificate was loaded from.
    #[must_use]
    pub fn source(&self) -> &Path {
        &self.source
    }
}

/// Load certificates from a PEM file.
///
/// # Errors
///
/// Returns `TlsError::CertificateLoad` if the file cannot be read or parsed.
pub fn load_certificates(path: &Path) -> TlsResult<Vec<CertificateDer<'static>>> {
    let load_error = |message: String| TlsError::CertificateLoad {
        path: path.display().to_string(),
        message,
    };

    let file = File::open(path).map_err(|e| load_error(e.to_string()))?;
    let mut reader = BufReader::new(file);

    certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| load_error(e.to_string()))
}

/// Load a private key from a PEM file.
fn load_private_key(path: &Path) -> TlsResult<PrivateKeyDer<'static>> {
    let load_error = |message: String| TlsError::PrivateKeyLoad {
        path: path.display().to_string(),
        message,
    };

    let file = File::open(path).map_err(|e| load_error(e.to_string()))?;
    let mut reader = BufReader::new(file);

    private_key(&mut reader)
        .map_err(|e| load_error(e.to_string()))?
        .ok_or_else(|| load_error("no private key found in file".to_string()))
}

/// Load a PEM bundle of trusted CA certificates.
///
/// # Errors
///
/// Returns an error if the file cannot be read or holds no valid CA.
pub fn load_root_store(path: &Path) -> TlsResult<RootCertStore> {
    let mut roots = RootCertStore::empty();
    for cert in load_certificates(path)? {
        roots
            .add(cert)
            .map_err(|e| TlsError::InvalidCertificate(e.to_string()))?;
    }

    if roots.is_empty() {
        return Err(TlsError::CertificateLoad {
            path: path.display().to_string(),
            message: "no CA certificates found".to_string(),
        });
    }
    Ok(roots)
}
