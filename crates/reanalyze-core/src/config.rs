use anyhow::Context;
use config as cfg;
use globset::Glob;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::ConfigError;

/// Top-level configuration. Every policy value is a runtime parameter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReanalyzeConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub classifier: ClassifierConfig,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Debounce and fan-out policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Delay between the first change of a burst and the job launch (ms)
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Batches larger than this are dropped instead of analyzed
    #[serde(default = "default_max_files_per_incremental_batch")]
    pub max_files_per_incremental_batch: usize,

    /// Wall-clock bound for one analysis job (seconds)
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,

    /// Jobs allowed to run at the same time across all scopes
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            max_files_per_incremental_batch: default_max_files_per_incremental_batch(),
            job_timeout_secs: default_job_timeout_secs(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
        }
    }
}

impl SchedulerConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }
}

/// Freshness windows of the scope cache providers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_file_listing_ttl_secs")]
    pub file_listing_ttl_secs: u64,

    #[serde(default = "default_structural_ttl_secs")]
    pub structural_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            file_listing_ttl_secs: default_file_listing_ttl_secs(),
            structural_ttl_secs: default_structural_ttl_secs(),
        }
    }
}

impl CacheConfig {
    pub fn file_listing_ttl(&self) -> Duration {
        Duration::from_secs(self.file_listing_ttl_secs)
    }

    pub fn structural_ttl(&self) -> Duration {
        Duration::from_secs(self.structural_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Globs marking generated output
    #[serde(default = "default_derived_patterns")]
    pub derived_patterns: Vec<String>,

    /// File names whose edits change a scope's structure
    #[serde(default = "default_structural_file_names")]
    pub structural_file_names: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            derived_patterns: default_derived_patterns(),
            structural_file_names: default_structural_file_names(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Consecutive BackendUnavailable outcomes before escalating to the user
    #[serde(default = "default_escalation_threshold")]
    pub escalation_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            escalation_threshold: default_escalation_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "pretty", "json", "compact"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl ReanalyzeConfig {
    /// Layered load: default.toml, {env}.toml, local.toml, then
    /// `REANALYZE__*` environment variables.
    pub fn load_from_sources(config_dir: &Path, env_name: &str) -> anyhow::Result<Self> {
        let config: ReanalyzeConfig = cfg::Config::builder()
            .add_source(cfg::File::from(config_dir.join("default.toml")).required(false))
            .add_source(
                cfg::File::from(config_dir.join(format!("{}.toml", env_name))).required(false),
            )
            .add_source(cfg::File::from(config_dir.join("local.toml")).required(false))
            .add_source(cfg::Environment::with_prefix("REANALYZE").separator("__"))
            .build()
            .context("building configuration")?
            .try_deserialize()
            .context("deserializing configuration")?;

        config.validate()?;
        info!(
            "Loaded configuration from {:?} (env: {})",
            config_dir, env_name
        );
        Ok(config)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: ReanalyzeConfig =
            toml::from_str(s).map_err(|e| ConfigError::LoadError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.max_files_per_incremental_batch == 0 {
            return Err(ConfigError::ValidationError(
                "scheduler.max_files_per_incremental_batch must be at least 1".to_string(),
            ));
        }
        if self.scheduler.job_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "scheduler.job_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.scheduler.max_concurrent_jobs == 0 {
            return Err(ConfigError::ValidationError(
                "scheduler.max_concurrent_jobs must be at least 1".to_string(),
            ));
        }
        if self.cache.file_listing_ttl_secs == 0 || self.cache.structural_ttl_secs == 0 {
            return Err(ConfigError::ValidationError(
                "cache durations must be greater than 0".to_string(),
            ));
        }
        if self.health.escalation_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "health.escalation_threshold must be at least 1".to_string(),
            ));
        }
        for pattern in &self.classifier.derived_patterns {
            Glob::new(pattern).map_err(|e| {
                ConfigError::ValidationError(format!(
                    "Invalid derived pattern {:?}: {}",
                    pattern, e
                ))
            })?;
        }

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    other
                )))
            }
        }
        match self.logging.format.as_str() {
            "pretty" | "json" | "compact" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log format: {}. Must be one of: pretty, json, compact",
                    other
                )))
            }
        }

        Ok(())
    }
}

// Default value functions
fn default_debounce_ms() -> u64 {
    500
}
fn default_max_files_per_incremental_batch() -> usize {
    10
}
fn default_job_timeout_secs() -> u64 {
    120
}
fn default_max_concurrent_jobs() -> usize {
    4
}
fn default_file_listing_ttl_secs() -> u64 {
    30
}
fn default_structural_ttl_secs() -> u64 {
    60
}
fn default_derived_patterns() -> Vec<String> {
    ["**/target/**", "**/build/**", "**/out/**", "**/node_modules/**"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_structural_file_names() -> Vec<String> {
    [
        "Cargo.toml",
        "pom.xml",
        "build.gradle",
        "build.gradle.kts",
        "settings.gradle",
        "package.json",
        "pyproject.toml",
        "go.mod",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_escalation_threshold() -> u32 {
    3
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ReanalyzeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.max_files_per_incremental_batch, 10);
        assert_eq!(config.cache.file_listing_ttl(), Duration::from_secs(30));
        assert_eq!(config.cache.structural_ttl(), Duration::from_secs(60));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = ReanalyzeConfig::from_toml_str(
            r#"
            [scheduler]
            debounce_ms = 0
            max_files_per_incremental_batch = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.scheduler.debounce(), Duration::ZERO);
        assert_eq!(config.scheduler.max_files_per_incremental_batch, 3);
        assert_eq!(config.scheduler.job_timeout_secs, 120);
        assert_eq!(config.health.escalation_threshold, 3);
    }

    #[test]
    fn test_rejects_zero_batch_size() {
        let err = ReanalyzeConfig::from_toml_str(
            r#"
            [scheduler]
            max_files_per_incremental_batch = 0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_rejects_bad_glob_and_log_level() {
        let mut config = ReanalyzeConfig::default();
        config.classifier.derived_patterns = vec!["[".to_string()];
        assert!(config.validate().is_err());

        let mut config = ReanalyzeConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }
}
