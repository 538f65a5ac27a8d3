//! Configuration schema definitions.

use std::path::PathBuf;
use std::time::Duration;

use hostlink_protocols::RetryPolicy;
use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub classification: ClassificationConfig,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Registry scanning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Display-name prefix identifying the host application.
    #[serde(default = "default_signature_prefix")]
    pub signature_prefix: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            signature_prefix: default_signature_prefix(),
        }
    }
}

fn default_signature_prefix() -> String {
    "!VisualStudio.DTE".to_string()
}

/// Connection setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Property path read to fill in the active solution name.
    #[serde(default = "default_active_solution_property")]
    pub active_solution_property: String,

    /// Upper bound on registry enumeration and on a single bind (in milliseconds).
    #[serde(default = "default_registry_timeout")]
    pub registry_timeout_ms: u64,

    /// Upper bound on reading instance metadata from the host (in milliseconds).
    #[serde(default = "default_metadata_timeout")]
    pub metadata_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            active_solution_property: default_active_solution_property(),
            registry_timeout_ms: default_registry_timeout(),
            metadata_timeout_ms: default_metadata_timeout(),
        }
    }
}

impl ConnectionConfig {
    pub fn registry_timeout(&self) -> Duration {
        Duration::from_millis(self.registry_timeout_ms)
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_millis(self.metadata_timeout_ms)
    }
}

fn default_active_solution_property() -> String {
    "Solution.FullName".to_string()
}

fn default_registry_timeout() -> u64 {
    10_000
}

fn default_metadata_timeout() -> u64 {
    5_000
}

/// Background health monitoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Interval between health passes (in seconds).
    #[serde(default = "default_health_interval")]
    pub interval_secs: u64,

    /// Upper bound on a single probe (in milliseconds).
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,

    /// Property read by the probe.
    #[serde(default = "default_probe_property")]
    pub probe_property: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_health_interval(),
            probe_timeout_ms: default_probe_timeout(),
            probe_property: default_probe_property(),
        }
    }
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

fn default_true() -> bool {
    true
}

fn default_health_interval() -> u64 {
    30
}

fn default_probe_timeout() -> u64 {
    5_000
}

fn default_probe_property() -> String {
    "Version".to_string()
}

/// Operation execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Timeout applied when a caller does not pass one (in milliseconds).
    #[serde(default = "default_timeout")]
    pub default_timeout_ms: u64,

    /// Serialize commands sent to the same process.
    #[serde(default = "default_true")]
    pub serialize_commands: bool,

    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout(),
            serialize_commands: true,
            retry: RetryPolicy::default(),
        }
    }
}

impl ExecutorConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

fn default_timeout() -> u64 {
    30_000
}

/// Error classification overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassificationConfig {
    /// Treat the general failure code (`E_FAIL`) as transient.
    #[serde(default)]
    pub general_failure_is_transient: bool,

    /// Additional raw codes to retry, written as unsigned HRESULTs.
    #[serde(default)]
    pub extra_transient_codes: Vec<u32>,
}

/// Memory-pressure guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Resident size above which a cleanup pass runs (in MiB, 0 = off).
    #[serde(default = "default_soft_limit")]
    pub soft_limit_mb: u64,

    /// Resident size above which calls are refused (in MiB, 0 = off).
    #[serde(default)]
    pub hard_limit_mb: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            soft_limit_mb: default_soft_limit(),
            hard_limit_mb: 0,
        }
    }
}

impl MemoryConfig {
    pub fn soft_limit_bytes(&self) -> Option<u64> {
        (self.soft_limit_mb > 0).then(|| self.soft_limit_mb * 1024 * 1024)
    }

    pub fn hard_limit_bytes(&self) -> Option<u64> {
        (self.hard_limit_mb > 0).then(|| self.hard_limit_mb * 1024 * 1024)
    }
}

fn default_soft_limit() -> u64 {
    1024
}

/// Logging output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for rolling log files.
    #[serde(default = "default_log_dir")]
    pub directory: PathBuf,

    /// Emit JSON lines on the console.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: default_log_dir(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".hostlink")
        .join("logs")
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
