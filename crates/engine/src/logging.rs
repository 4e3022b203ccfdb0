//! Logging setup
//!
//! Library code only emits `tracing` events under `pgvault::*` targets.
//! Binaries and tests call [`init`] once to print them.

use pgvault_core::{ConfigError, LoggingConfig};
use tracing::level_filters::LevelFilter;

/// Install a formatted subscriber at the configured level
///
/// Returns `Ok(false)` when a global subscriber was already installed.
pub fn init(config: &LoggingConfig) -> Result<bool, ConfigError> {
    config.validate()?;
    let level: LevelFilter = config
        .level
        .to_ascii_lowercase()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("unknown log level '{}'", config.level)))?;

    let installed = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true)
        .try_init()
        .is_ok();
    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig::default();
        init(&config).unwrap();
        assert!(!init(&config).unwrap());
    }

    #[test]
    fn test_rejects_unknown_level() {
        let config = LoggingConfig {
            level: "loud".to_string(),
        };
        assert!(init(&config).is_err());
    }
}
