//! Telemetry: structured logging and sensitive data redaction.
//!
//! Metrics are emitted through the `metrics` facade at their call sites; the
//! embedding process decides which recorder, if any, to install.
//!
//! # Example
//!
//! ```rust,no_run
//! use aegis_core::telemetry::{init_logging, LoggingConfig};
//!
//! init_logging(&LoggingConfig::default()).expect("Failed to initialize logging");
//! ```

pub mod logging;

pub use logging::{
    init_logging, LogFormat, LoggingConfig, RedactionConfig, RedactionPattern,
    SensitiveFieldRedactor,
};

/// Redact `value` with the global redactor.
pub fn redact_json(value: &serde_json::Value) -> serde_json::Value {
    SensitiveFieldRedactor::global().redact_json(value)
}
