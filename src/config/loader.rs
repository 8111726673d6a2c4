//! Configuration file loader.

use super::error::{ConfigError, ConfigResult};
use super::types::ElbConfig;
use super::validation::{
    BasicValidator, ListenerValidator, PortConflictValidator, TargetGroupValidator,
    ValidationResult, Validator,
};
use std::path::Path;
use tracing::warn;

/// Configuration loader with validation support.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    /// Validators to run on loaded configuration.
    validators: Vec<Box<dyn Validator>>,
}

impl ConfigLoader {
    /// Create a new configuration loader.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a loader with every built-in validator.
    #[must_use]
    pub fn standard() -> Self {
        Self::new()
            .with_validator(BasicValidator::new())
            .with_validator(PortConflictValidator::new())
            .with_validator(TargetGroupValidator::new())
            .with_validator(ListenerValidator::new())
    }

    /// Add a validator to the loader.
    #[must_use]
    pub fn with_validator<V: Validator + 'static>(mut self, validator: V) -> Self {
        self.validators.push(Box::new(validator));
        self
    }

    /// Load configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file does not exist
    /// - The file cannot be read
    /// - The TOML is malformed
    /// - Validation fails
    pub fn load<P: AsRef<Path>>(&self, path: P) -> ConfigResult<ElbConfig> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;

        self.load_str(&content)
    }

    /// Load configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The TOML is malformed
    /// - Validation fails
    pub fn load_str(&self, content: &str) -> ConfigResult<ElbConfig> {
        let config: ElbConfig = toml::from_str(content)?;
        self.validate(&config)?;
        Ok(config)
    }

    /// Run all registered validators. Warnings are logged; errors from every
    /// validator are joined into one `ValidationError`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if any validator reports an error.
    pub fn validate(&self, config: &ElbConfig) -> ConfigResult<()> {
        let mut result = ValidationResult::new();
        for validator in &self.validators {
            result.merge(validator.validate(config));
        }

        for warning in result.warnings() {
            warn!(field = %warning.field, "{}", warning.message);
        }

        if result.is_valid() {
            return Ok(());
        }
        let errors: Vec<String> = result
            .errors_only()
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect();
        Err(ConfigError::Invalid {
            count: errors.len(),
            problems: errors.join("; "),
        })
    }

    /// Load configuration or return default if file doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_or_default<P: AsRef<Path>>(&self, path: P) -> ConfigResult<ElbConfig> {
        let path = path.as_ref();
        if path.exists() {
            self.load(path)
        } else {
            Ok(ElbConfig::default())
        }
    }

    /// Save configuration to a file.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn save<P: AsRef<Path>>(&self, config: &ElbConfig, path: P) -> ConfigResult<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(config)?;
        std::fs::write(path, content).map_err(|e| ConfigError::Write {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(())
    }
}
