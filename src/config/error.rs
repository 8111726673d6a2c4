//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading, validating or saving an ELB document.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No file at the given path.
    #[error("configuration file not found: {0}")]
    NotFound(PathBuf),

    /// The file exists but could not be read.
    #[error("cannot read '{path}': {source}")]
    Read {
        /// Document path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The document could not be written.
    #[error("cannot write '{path}': {source}")]
    Write {
        /// Document path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Malformed TOML or a value of the wrong shape.
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The document could not be rendered back to TOML.
    #[error("cannot serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// One or more validators rejected the document.
    #[error("invalid configuration ({count} error(s)): {problems}")]
    Invalid {
        /// Number of errors found.
        count: usize,
        /// `field: message` pairs joined with `; `.
        problems: String,
    },
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
