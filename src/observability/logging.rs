//! Tracing subscriber setup for the reminder client
//!
//! Output is JSON unless `LOG_FORMAT` asks for `pretty` or `compact`.
//! `LOG_LEVEL` picks the level for this crate while rumqttc and tokio stay at
//! warn. `LOG_SPANS=true` adds span close events, and a non-empty `RUST_LOG`
//! replaces the whole filter.
//!
//! ```bash
//! LOG_FORMAT=pretty LOG_LEVEL=debug itemreminder-client run
//! RUST_LOG=itemreminder_mqtt::session=trace itemreminder-client run
//! ```

use std::env;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Subscriber output style
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event
    Json,
    /// Multi-line, colored
    Pretty,
    /// Single-line, colored, no targets
    Compact,
}

impl LogFormat {
    /// Case-insensitive; anything unrecognised falls back to JSON
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Json,
        }
    }
}

/// Parse a log level name; unknown names mean INFO
pub fn parse_level(s: &str) -> Level {
    match s.to_uppercase().as_str() {
        "ERROR" => Level::ERROR,
        "WARN" => Level::WARN,
        "INFO" => Level::INFO,
        "DEBUG" => Level::DEBUG,
        "TRACE" => Level::TRACE,
        _ => Level::INFO,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoggingOptions {
    pub level: Level,
    pub format: LogFormat,
    pub include_spans: bool,
    /// Full filter override (`RUST_LOG`)
    pub filter_override: Option<String>,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Json,
            include_spans: false,
            filter_override: None,
        }
    }
}

impl LoggingOptions {
    /// Read `LOG_LEVEL`, `LOG_FORMAT`, `LOG_SPANS` and `RUST_LOG`
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            level: lookup("LOG_LEVEL")
                .map(|level| parse_level(&level))
                .unwrap_or(Level::INFO),
            format: lookup("LOG_FORMAT")
                .map(|format| LogFormat::parse(&format))
                .unwrap_or(LogFormat::Json),
            include_spans: lookup("LOG_SPANS")
                .map(|spans| spans.to_lowercase() == "true")
                .unwrap_or(false),
            filter_override: lookup("RUST_LOG").filter(|filter| !filter.trim().is_empty()),
        }
    }

    /// Filter directives; rumqttc is kept at warn unless overridden
    pub fn filter_directives(&self) -> String {
        match &self.filter_override {
            Some(filter) => filter.clone(),
            None => format!("{},rumqttc=warn,tokio=warn", self.level),
        }
    }

    fn span_events(&self) -> FmtSpan {
        if self.include_spans {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(options: &LoggingOptions) -> Result<(), TryInitError> {
    let filter = EnvFilter::new(options.filter_directives());
    let subscriber = tracing_subscriber::registry().with(filter);

    match options.format {
        LogFormat::Json => {
            let fmt_layer = fmt::layer().json().with_span_events(options.span_events());
            subscriber.with(fmt_layer).try_init()
        }
        LogFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .pretty()
                .with_ansi(true)
                .with_span_events(options.span_events());
            subscriber.with(fmt_layer).try_init()
        }
        LogFormat::Compact => {
            let fmt_layer = fmt::layer()
                .compact()
                .with_ansi(true)
                .with_target(false)
                .with_span_events(options.span_events());
            subscriber.with(fmt_layer).try_init()
        }
    }
}

/// Initialize logging from environment variables
pub fn init_default_logging() -> Result<(), TryInitError> {
    init_logging(&LoggingOptions::from_env())
}

/// Create a session operation span
#[macro_export]
macro_rules! session_span {
    ($($field:tt)*) => {
        tracing::info_span!("mqtt_session", $($field)*)
    };
}

/// Create a reminder schedule span
#[macro_export]
macro_rules! schedule_span {
    ($($field:tt)*) => {
        tracing::info_span!("scheduled_publish", $($field)*)
    };
}

pub use {schedule_span, session_span};
