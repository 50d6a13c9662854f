//! Config loading, parsing, serialization and validation.

use super::model::Config;
use crate::error::{AtomicError, Result};
use crate::fs::with_suffix;
use std::path::{Path, PathBuf};

impl Config {
    /// Load config from a YAML file.
    ///
    /// # Returns
    ///
    /// * `Ok(Config)` - Successfully loaded and validated config
    /// * `Err(AtomicError::UserError)` - Read error, parse error or validation failure
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path).map_err(|e| {
            AtomicError::UserError(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse config from a YAML string.
    ///
    /// Unknown fields in the YAML are silently ignored for forward compatibility.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        // An empty document deserializes to unit, not to an empty mapping.
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = serde_yaml::from_str(yaml)
            .map_err(|e| AtomicError::UserError(format!("failed to parse config YAML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize config to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| {
            AtomicError::UserError(format!("failed to serialize config to YAML: {}", e))
        })
    }

    /// Validate config values and return error on invalid values.
    ///
    /// Validation rules:
    /// - `lock.timeout` must be finite and not negative
    /// - `lock.retry_interval` must be finite and positive
    /// - `lock.marker_prefix` must be non-empty and contain no path separators
    /// - `lock_ext` and `transaction.tmp_ext` must be non-empty and distinct
    pub fn validate(&self) -> Result<()> {
        let lock = &self.lock;

        if !lock.timeout.is_finite() || lock.timeout < 0.0 {
            return Err(invalid(format!(
                "lock.timeout must be a non-negative number of seconds (found {})",
                lock.timeout
            )));
        }

        if !lock.retry_interval.is_finite() || lock.retry_interval <= 0.0 {
            return Err(invalid(format!(
                "lock.retry_interval must be greater than 0 (found {})",
                lock.retry_interval
            )));
        }

        if lock.marker_prefix.is_empty() {
            return Err(invalid("lock.marker_prefix must be non-empty".to_string()));
        }
        if lock.marker_prefix.contains(['/', '\\']) {
            return Err(invalid(format!(
                "lock.marker_prefix must not contain path separators (found '{}')",
                lock.marker_prefix
            )));
        }

        if self.lock_ext.is_empty() {
            return Err(invalid("lock_ext must be non-empty".to_string()));
        }
        if self.transaction.tmp_ext.is_empty() {
            return Err(invalid("transaction.tmp_ext must be non-empty".to_string()));
        }
        if self.lock_ext == self.transaction.tmp_ext {
            return Err(invalid(format!(
                "lock_ext and transaction.tmp_ext must differ (both are '{}')",
                self.lock_ext
            )));
        }

        Ok(())
    }

    /// The lock directory guarding `target` (`<target><lock_ext>`).
    pub fn lock_path_for(&self, target: &Path) -> PathBuf {
        with_suffix(target, &self.lock_ext)
    }

    /// The staging file used when committing `target` (`<target><tmp_ext>`).
    pub fn temp_path_for(&self, target: &Path) -> PathBuf {
        with_suffix(target, &self.transaction.tmp_ext)
    }
}

fn invalid(message: String) -> AtomicError {
    AtomicError::UserError(format!("config validation failed: {}", message))
}
