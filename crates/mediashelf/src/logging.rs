use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use crate::config::LoggingConfig;
use crate::error::ConfigError;

/// Overrides the configured level, e.g. `MEDIASHELF_LOG=mediashelf=debug`.
pub const LOG_ENV_VAR: &str = "MEDIASHELF_LOG";

fn filter(config: &LoggingConfig) -> Result<EnvFilter, ConfigError> {
    match std::env::var(LOG_ENV_VAR) {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(&directives)
            .map_err(|e| ConfigError::Logging(format!("{}: {}", LOG_ENV_VAR, e))),
        _ => EnvFilter::try_new(&config.level)
            .map_err(|e| ConfigError::Logging(format!("level '{}': {}", config.level, e))),
    }
}

/// Installs the global subscriber and routes `log` records into it.
/// Fails if a subscriber or logger is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), ConfigError> {
    let filter = filter(config)?;

    let installed = if config.json {
        let subscriber = Registry::default()
            .with(filter)
            .with(fmt::layer().json().with_current_span(true));
        tracing::subscriber::set_global_default(subscriber)
    } else {
        let subscriber = Registry::default()
            .with(filter)
            .with(fmt::layer().with_target(true));
        tracing::subscriber::set_global_default(subscriber)
    };
    installed.map_err(|e| ConfigError::Logging(e.to_string()))?;

    tracing_log::LogTracer::init().map_err(|e| ConfigError::Logging(e.to_string()))?;
    Ok(())
}
