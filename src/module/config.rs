//! Configuration handed to a component at init/reload time.

use super::{ModuleError, ModuleResult};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Configuration source for a component.
///
/// Components receive either an inline TOML document or a path to one; the
/// component decides how to parse it.
#[derive(Debug, Clone, Default)]
pub struct ModuleConfig {
    /// Inline TOML document.
    raw: Option<String>,

    /// Path to a TOML document on disk.
    path: Option<PathBuf>,
}

impl ModuleConfig {
    /// Creates an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration from an inline TOML document.
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self {
            raw: Some(raw.into()),
            path: None,
        }
    }

    /// Creates a configuration that points at a file.
    #[must_use]
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            raw: None,
            path: Some(path.into()),
        }
    }

    /// Gets the inline document, if any.
    #[must_use]
    pub fn raw_config(&self) -> Option<&str> {
        self.raw.as_deref()
    }

    /// Gets the file path, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns `true` if neither an inline document nor a path was given.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.raw.is_none() && self.path.is_none()
    }

    /// Parses the document, preferring the inline one.
    ///
    /// # Errors
    ///
    /// Returns `ModuleError::ConfigError` if no document was given, the file
    /// cannot be read, or the TOML does not match `T`.
    pub fn parse<T: DeserializeOwned>(&self) -> ModuleResult<T> {
        let document = match (&self.raw, &self.path) {
            (Some(raw), _) => raw.clone(),
            (None, Some(path)) => std::fs::read_to_string(path).map_err(|e| {
                ModuleError::ConfigError(format!("failed to read {}: {e}", path.display()))
            })?,
            (None, None) => {
                return Err(ModuleError::ConfigError(
                    "no configuration given".to_string(),
                ))
            },
        };

        toml::from_str(&document).map_err(|e| ModuleError::ConfigError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sources() {
        assert!(ModuleConfig::new().is_empty());

        let inline = ModuleConfig::from_raw("[load_balancer]");
        assert_eq!(inline.raw_config(), Some("[load_balancer]"));
        assert!(inline.path().is_none());

        let file = ModuleConfig::from_path("/etc/r0n-elb/lb.toml");
        assert_eq!(file.path(), Some(Path::new("/etc/r0n-elb/lb.toml")));
        assert!(!file.is_empty());
    }

    #[test]
    fn test_parse() {
        #[derive(serde::Deserialize)]
        struct Doc {
            name: String,
        }

        let doc: Doc = ModuleConfig::from_raw("name = \"edge\"").parse().unwrap();
        assert_eq!(doc.name, "edge");

        assert!(ModuleConfig::new().parse::<Doc>().is_err());
        assert!(ModuleConfig::from_path("/nonexistent/lb.toml")
            .parse::<Doc>()
            .is_err());
        assert!(ModuleConfig::from_raw("name = 1").parse::<Doc>().is_err());
    }
}
