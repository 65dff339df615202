//! Tracing subscriber setup for hosts embedding the kernel.

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Environment variable selecting the log format.
pub const ENV_LOG_FORMAT: &str = "LOG_FORMAT";

const DEFAULT_FILTER: &str = "artifact_kernel=info";

/// Telemetry setup errors.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Unrecognized `LOG_FORMAT` value.
    #[error("unknown log format `{0}` (expected `json` or `pretty`)")]
    UnknownFormat(String),

    /// A global subscriber is already installed.
    #[error("failed to install tracing subscriber: {0}")]
    Install(String),
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Structured JSON, one event per line.
    #[default]
    Json,
    /// Human-readable output for local development.
    Pretty,
}

impl LogFormat {
    /// Parse a format name.
    pub fn parse(raw: &str) -> Result<Self, TelemetryError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(TelemetryError::UnknownFormat(other.to_string())),
        }
    }

    /// Read `LOG_FORMAT`, defaulting to JSON when unset.
    pub fn from_env() -> Result<Self, TelemetryError> {
        match std::env::var(ENV_LOG_FORMAT) {
            Ok(raw) => Self::parse(&raw),
            Err(_) => Ok(LogFormat::Json),
        }
    }
}

/// Install a global subscriber honouring `RUST_LOG`.
///
/// Computation spans are closed with timing, so each `compute` span logs
/// its duration.
pub fn init_tracing(format: LogFormat) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());

    let result = match format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .flatten_event(true),
            )
            .try_init(),
    };

    result.map_err(|e| TelemetryError::Install(e.to_string()))
}
