//! Observability for the client: structured logging and span macros
//!
//! Session health numbers live in [`crate::session::SessionMetrics`].

pub mod logging;

pub use logging::{init_default_logging, init_logging, parse_level, LogFormat, LoggingOptions};

// Span macros for structured logging
pub use logging::{schedule_span, session_span};
