//! TLS error types.

use thiserror::Error;

/// Errors raised while loading certificates or building TLS configs.
#[derive(Debug, Error)]
pub enum TlsError {
    /// Certificate file could not be read or parsed.
    #[error("failed to load certificate from {path}: {message}")]
    CertificateLoad {
        /// File path.
        path: String,
        /// Error message.
        message: String,
    },

    /// Private key file could not be read or parsed.
    #[error("failed to load private key from {path}: {message}")]
    PrivateKeyLoad {
        /// File path.
        path: String,
        /// Error message.
        message: String,
    },

    /// Certificate and key do not form a usable signing key.
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    /// No certificate is flagged as default.
    #[error("exactly one certificate must be the default, found none")]
    NoDefaultCertificate,

    /// More than one certificate is flagged as default.
    #[error("exactly one certificate must be the default, found {0}")]
    MultipleDefaultCertificates(usize),
}

/// Result type for TLS operations.
pub type TlsResult<T> = Result<T, TlsError>;
