//! Process-wide log setup.
//!
//! Installs a `tracing` subscriber (text or JSON) and routes records from the
//! `log` facade, which the mail and database layers use, into it.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use crate::config::{LogFormat, LoggingSettings};
use crate::error::{InboxMinerError, Result};

/// Builds the level filter: `RUST_LOG` when set and valid, else the configured
/// level.
pub fn env_filter(settings: &LoggingSettings) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(settings.level.to_lowercase()).map_err(|e| {
        InboxMinerError::Logging(format!("Invalid log level '{}': {}", settings.level, e))
    })
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init(settings: &LoggingSettings) -> Result<()> {
    let filter = env_filter(settings)?;
    let registry = Registry::default().with(filter);

    let installed = match settings.format {
        LogFormat::Text => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().with_writer(std::io::stderr).with_target(true)),
        ),
        LogFormat::Json => tracing::subscriber::set_global_default(
            registry.with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(true)
                    .with_span_list(false),
            ),
        ),
    };
    installed.map_err(|e| InboxMinerError::Logging(e.to_string()))?;

    tracing_log::LogTracer::init().map_err(|e| InboxMinerError::Logging(e.to_string()))?;
    Ok(())
}
