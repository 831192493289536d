//! Process-wide log setup for binaries.
//!
//! Library code logs through `log` macros (database, worker pool, retry) and
//! `tracing` spans (pipeline). Both end up in one `tracing-subscriber` fmt
//! layer filtered by `RUST_LOG`.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use crate::error::ConfigError;

/// Builds the filter from `RUST_LOG`, falling back to `default_filter`.
pub fn env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

/// Installs the global subscriber and bridges `log` records into it.
/// Call once, at startup.
pub fn init_logging(default_filter: &str) -> Result<(), ConfigError> {
    tracing_log::LogTracer::init().map_err(|e| ConfigError::Setup {
        component: "log bridge",
        message: e.to_string(),
    })?;

    let subscriber = Registry::default()
        .with(env_filter(default_filter))
        .with(fmt::layer().with_target(true));

    tracing::subscriber::set_global_default(subscriber).map_err(|e| ConfigError::Setup {
        component: "tracing subscriber",
        message: e.to_string(),
    })
}
