//! Logging initialization.
//!
//! Every camhub process installs one `tracing-subscriber` fmt subscriber at
//! startup. `RUST_LOG` takes precedence over the configured level, and
//! `CAMHUB_LOG_FORMAT=json` switches the output to JSON lines.

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

const LOG_FORMAT_ENV: &str = "CAMHUB_LOG_FORMAT";

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    /// `json` (any case) selects JSON; anything else is compact text.
    pub fn from_env_value(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "json" => Self::Json,
            _ => Self::Compact,
        }
    }

    fn from_env() -> Self {
        Self::from_env_value(std::env::var(LOG_FORMAT_ENV).ok().as_deref())
    }
}

/// Initialize logging for the `camhub` service.
///
/// ```ignore
/// init_logging("info");
/// tracing::info!("Hub started");
/// ```
pub fn init_logging(level: &str) {
    init_logging_for_service("camhub", level);
}

/// Initialize logging with a custom service name.
///
/// Later calls are no-ops once a global subscriber is installed.
pub fn init_logging_for_service(service_name: &str, level: &str) {
    let format = LogFormat::from_env();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::default().add_directive(LevelFilter::from_level(parse_level(level)).into())
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    let installed = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
    };

    if installed.is_ok() {
        tracing::info!(
            service = service_name,
            level,
            format = ?format,
            "Logging initialized"
        );
    }
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.trim().to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
