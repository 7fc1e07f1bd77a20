//! Logging setup for applications embedding the push manager.
//!
//! The library only emits `tracing` events. Hosts that don't install their own
//! subscriber can call [`init_logging`] once at startup.

use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Environment variable overriding the log filter
pub const LOG_LEVEL_ENV: &str = "ONVIF_PUSH_LOG_LEVEL";

/// Environment variable selecting the mode for [`init_logging_from_env`]
pub const LOG_MODE_ENV: &str = "ONVIF_PUSH_LOG_MODE";

/// Output style
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// No subscriber is installed
    Silent,
    /// Compact stderr output at `info`
    Development,
    /// Pretty output at `debug` with source locations
    Debug,
    /// One JSON object per line at `info`, for log collectors
    Json,
}

impl LoggingMode {
    /// Parse a mode name as used in [`LOG_MODE_ENV`].
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "silent" | "off" => Some(LoggingMode::Silent),
            "development" | "dev" => Some(LoggingMode::Development),
            "debug" => Some(LoggingMode::Debug),
            "json" => Some(LoggingMode::Json),
            _ => None,
        }
    }

    fn default_level(self) -> &'static str {
        match self {
            LoggingMode::Debug => "debug",
            _ => "info",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracingInit(String),

    #[error("Invalid environment variable: {0}")]
    InvalidEnv(String),
}

/// Install a global subscriber for `mode`.
///
/// The filter comes from `ONVIF_PUSH_LOG_LEVEL`, then `RUST_LOG`, then the
/// mode's default level.
///
/// ```rust,ignore
/// onvif_push::logging::init_logging(LoggingMode::Development)?;
/// ```
pub fn init_logging(mode: LoggingMode) -> Result<(), LoggingError> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    if mode == LoggingMode::Silent {
        return Ok(());
    }

    let filter = create_env_filter(mode.default_level())?;
    let registry = Registry::default().with(filter);

    let result = match mode {
        LoggingMode::Development => registry
            .with(fmt::layer().with_target(false).compact())
            .try_init(),
        LoggingMode::Debug => registry
            .with(
                fmt::layer()
                    .pretty()
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init(),
        LoggingMode::Json => registry
            .with(fmt::layer().json().with_current_span(false))
            .try_init(),
        LoggingMode::Silent => Ok(()),
    };

    result.map_err(|e| LoggingError::TracingInit(e.to_string()))
}

/// Install a subscriber chosen by `ONVIF_PUSH_LOG_MODE`. Unset means silent.
pub fn init_logging_from_env() -> Result<(), LoggingError> {
    let mode = match std::env::var(LOG_MODE_ENV) {
        Ok(name) => LoggingMode::from_name(&name)
            .ok_or_else(|| LoggingError::InvalidEnv(format!("{LOG_MODE_ENV}={name}")))?,
        Err(_) => LoggingMode::Silent,
    };
    init_logging(mode)
}

fn create_env_filter(default_level: &str) -> Result<EnvFilter, LoggingError> {
    let directives = std::env::var(LOG_LEVEL_ENV)
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| default_level.to_string());

    EnvFilter::try_new(&directives)
        .map_err(|e| LoggingError::InvalidEnv(format!("{directives}: {e}")))
}

pub fn is_initialized() -> bool {
    tracing::dispatcher::has_been_set()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_mode_installs_nothing() {
        assert!(init_logging(LoggingMode::Silent).is_ok());
    }

    #[test]
    fn test_mode_names() {
        assert_eq!(LoggingMode::from_name("JSON"), Some(LoggingMode::Json));
        assert_eq!(LoggingMode::from_name(" dev "), Some(LoggingMode::Development));
        assert_eq!(LoggingMode::from_name("off"), Some(LoggingMode::Silent));
        assert_eq!(LoggingMode::from_name("loud"), None);
    }

    #[test]
    fn test_default_levels() {
        assert_eq!(LoggingMode::Debug.default_level(), "debug");
        assert_eq!(LoggingMode::Json.default_level(), "info");
    }
}
