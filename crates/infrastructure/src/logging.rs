use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{ConfigError, LogFormat, LogLevel};

pub const SERVICE_NAME: &str = "xfrmgate";

/// Initialize structured logging to stdout.
///
/// - `LogFormat::Json`: flattened JSON for log aggregators.
/// - `LogFormat::Text`: human-readable colored output.
///
/// `RUST_LOG` wins over `level` when set. Must be called exactly once at
/// startup; a second call fails instead of panicking.
pub fn init_logging(level: LogLevel, format: LogFormat) -> Result<(), ConfigError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = match format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_ansi(false),
            )
            .try_init(),
        LogFormat::Text => registry
            .with(fmt::layer().pretty().with_target(true).with_ansi(true))
            .try_init(),
    };

    result.map_err(|e| ConfigError::Validation {
        field: "agent.log_format".to_string(),
        message: format!("logging already initialized: {e}"),
    })
}

/// Span every agent task runs under.
pub fn root_span() -> tracing::Span {
    tracing::info_span!(
        "agent",
        service.name = SERVICE_NAME,
        service.version = env!("CARGO_PKG_VERSION"),
    )
}
