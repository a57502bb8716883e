use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{ConfigError, LoggingConfig};

/// Install the global tracing subscriber. `RUST_LOG` wins over the
/// configured level. Returns `Ok(false)` when a subscriber was already set.
pub fn init_tracing(config: &LoggingConfig) -> Result<bool, ConfigError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive(&config.level)))
        .map_err(|e| ConfigError::ValidationError(format!("log filter: {}", e)))?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format.as_str() {
        "json" => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .is_ok(),
        "compact" => registry
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init()
            .is_ok(),
        _ => registry
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .is_ok(),
    };
    Ok(installed)
}

fn default_directive(level: &str) -> String {
    format!(
        "reanalyze_core={level},reanalyze_cache={level},reanalyze_reconcile={level},reanalyze_scheduler={level}",
        level = level
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive_covers_all_crates() {
        let d = default_directive("debug");
        assert!(d.contains("reanalyze_scheduler=debug"));
        assert!(d.contains("reanalyze_cache=debug"));
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig::default();
        assert!(init_tracing(&config).is_ok());
        assert_eq!(init_tracing(&config).unwrap(), false);
    }
}
