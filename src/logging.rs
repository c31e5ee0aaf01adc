//! Structured logging setup
//!
//! Provides JSON-formatted and human-readable logging. `RUST_LOG` takes
//! precedence over the configured level.

use crate::config::LoggingConfig;
use crate::error::{RelayError, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used by `--verbose`.
pub const VERBOSE_LEVEL: &str = "tokenrelay=debug,tower_http=debug";

/// Initialize the global tracing subscriber.
///
/// # Arguments
///
/// * `config` - Logging configuration
/// * `verbose` - Use [`VERBOSE_LEVEL`] instead of the configured level
///
/// # Errors
///
/// Returns [`RelayError::Config`] if the level is not a valid filter or a
/// subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig, verbose: bool) -> Result<()> {
    let env_filter = build_filter(config, verbose)?;
    let registry = tracing_subscriber::registry().with(env_filter);

    let result = if config.json {
        let layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true);
        registry.with(layer).try_init()
    } else {
        let layer = fmt::layer().with_target(true).with_level(true);
        registry.with(layer).try_init()
    };

    result.map_err(|e| RelayError::Config(format!("failed to initialize logging: {e}")))
}

fn build_filter(config: &LoggingConfig, verbose: bool) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let level = if verbose { VERBOSE_LEVEL } else { config.level.as_str() };
    EnvFilter::try_new(level)
        .map_err(|e| RelayError::Config(format!("invalid logging.level '{level}': {e}")))
}
