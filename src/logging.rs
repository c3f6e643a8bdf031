//! Logging configuration for the wallet sync engine.
//!
//! Thin wrapper over `tracing-subscriber`: console output with an
//! environment-driven filter. Hosts embedding this crate may install their
//! own subscriber instead; nothing here is required for operation.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{LoggingError, LoggingResult};

/// Initialize console logging with the given level.
///
/// When `level` is `None`, the filter is taken from `RUST_LOG`, falling back
/// to INFO. Fails if a global subscriber is already installed.
pub fn init_console_logging(level: Option<LevelFilter>) -> LoggingResult<()> {
    let env_filter = match level {
        Some(level) => EnvFilter::new(level.to_string()),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(LevelFilter::INFO.to_string())),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .try_init()
        .map_err(|e| LoggingError::SubscriberInit(e.to_string()))
}
