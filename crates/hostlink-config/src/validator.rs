//! Configuration validation.

use crate::error::ConfigError;
use crate::schema::Config;

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// Turn the first error into a [`ConfigError`].
    pub fn into_result(self) -> Result<Vec<ValidationWarning>, ConfigError> {
        match self.errors.into_iter().next() {
            Some(error) => Err(ConfigError::InvalidValue {
                field: error.path,
                message: error.message,
            }),
            None => Ok(self.warnings),
        }
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_registry(config, &mut result);
        Self::validate_connection(config, &mut result);
        Self::validate_health(config, &mut result);
        Self::validate_executor(config, &mut result);
        Self::validate_classification(config, &mut result);
        Self::validate_memory(config, &mut result);

        result
    }

    fn validate_registry(config: &Config, result: &mut ValidationResult) {
        if config.registry.signature_prefix.trim().is_empty() {
            result.add_error(ValidationError::new(
                "registry.signature_prefix",
                "Signature prefix cannot be empty",
            ));
        }
    }

    fn validate_connection(config: &Config, result: &mut ValidationResult) {
        if config.connection.registry_timeout_ms == 0 {
            result.add_error(ValidationError::new(
                "connection.registry_timeout_ms",
                "registry_timeout_ms must be greater than 0",
            ));
        }

        if config.connection.metadata_timeout_ms == 0 {
            result.add_error(ValidationError::new(
                "connection.metadata_timeout_ms",
                "metadata_timeout_ms must be greater than 0",
            ));
        }
    }

    fn validate_health(config: &Config, result: &mut ValidationResult) {
        if config.health.interval_secs == 0 {
            result.add_error(ValidationError::new(
                "health.interval_secs",
                "interval_secs must be greater than 0",
            ));
        } else if config.health.interval_secs < 5 {
            result.add_warning(ValidationWarning::new(
                "health.interval_secs",
                "Health interval below 5 seconds adds constant load on the host",
            ));
        }

        if config.health.probe_timeout_ms == 0 {
            result.add_error(ValidationError::new(
                "health.probe_timeout_ms",
                "probe_timeout_ms must be greater than 0",
            ));
        }

        if config.health.probe_property.trim().is_empty() {
            result.add_error(ValidationError::new(
                "health.probe_property",
                "Probe property cannot be empty",
            ));
        }
    }

    fn validate_executor(config: &Config, result: &mut ValidationResult) {
        if config.executor.default_timeout_ms == 0 {
            result.add_error(ValidationError::new(
                "executor.default_timeout_ms",
                "default_timeout_ms must be greater than 0",
            ));
        }

        let retry = &config.executor.retry;
        if retry.backoff_multiplier < 1.0 {
            result.add_error(ValidationError::new(
                "executor.retry.backoff_multiplier",
                "backoff_multiplier must be at least 1.0",
            ));
        }

        if retry.max_delay_ms < retry.initial_delay_ms {
            result.add_warning(ValidationWarning::new(
                "executor.retry.max_delay_ms",
                "max_delay_ms is below initial_delay_ms, every retry waits max_delay_ms",
            ));
        }

        if retry.max_retries > 10 {
            result.add_warning(ValidationWarning::new(
                "executor.retry.max_retries",
                "max_retries is very high (>10), a busy host may stall callers for long",
            ));
        }
    }

    fn validate_classification(config: &Config, result: &mut ValidationResult) {
        if config.classification.general_failure_is_transient {
            result.add_warning(ValidationWarning::new(
                "classification.general_failure_is_transient",
                "General failures will be retried, including genuinely fatal ones",
            ));
        }
    }

    fn validate_memory(config: &Config, result: &mut ValidationResult) {
        let memory = &config.memory;
        if memory.hard_limit_mb > 0 && memory.hard_limit_mb < memory.soft_limit_mb {
            result.add_error(ValidationError::new(
                "memory.hard_limit_mb",
                "hard_limit_mb must not be below soft_limit_mb",
            ));
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
