//! Error handling for Aegis Core.
//!
//! Every failure surfaced by the command engine or the PAR cache is an
//! [`AegisError`] carrying:
//! - an [`ErrorKind`] the caller maps onto a protocol status
//! - a stable diagnostic code (e.g. `META-983dF`) for support and log search
//! - a localizable message key (e.g. `Errors.IDMissing`)
//! - an optional internal message and source error, kept out of `Display`
//!
//! # Usage
//!
//! ```rust,ignore
//! use aegis_core::error::{AegisError, ErrorContext, Result};
//!
//! fn decode(bytes: &[u8]) -> Result<Request> {
//!     serde_json::from_slice(bytes).internal_err("CACHE-mvAP3X")
//! }
//! ```

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for Aegis operations.
pub type Result<T> = std::result::Result<T, AegisError>;

/// Message key used for every internal failure.
pub const INTERNAL_MESSAGE_KEY: &str = "Errors.Internal";

// ═══════════════════════════════════════════════════════════════════════════════
// Error Kinds
// ═══════════════════════════════════════════════════════════════════════════════

/// The closed set of failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Malformed input, rejected before any I/O.
    InvalidArgument,
    /// Invalid call shape or missing owning resource.
    PreconditionFailed,
    /// A specific keyed item is absent.
    NotFound,
    /// Concurrent modification detected by the event log.
    Conflict,
    /// Serialization or I/O failure.
    Internal,
}

impl ErrorKind {
    /// Only conflicts are worth retrying; the caller re-reads and tries again.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict)
    }

    /// Stable lowercase label used in logs and metrics.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid_argument",
            Self::PreconditionFailed => "precondition_failed",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity levels, used to pick the log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Caller errors (bad input, unknown keys)
    Low,
    /// Operational contention
    Medium,
    /// Storage or serialization failures
    High,
}

impl ErrorSeverity {
    /// Get severity based on error kind.
    pub const fn from_kind(kind: &ErrorKind) -> Self {
        match kind {
            ErrorKind::InvalidArgument | ErrorKind::PreconditionFailed | ErrorKind::NotFound => {
                Self::Low
            }
            ErrorKind::Conflict => Self::Medium,
            ErrorKind::Internal => Self::High,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for Aegis Core.
#[derive(Error, Debug)]
pub struct AegisError {
    kind: ErrorKind,

    /// Stable diagnostic id
    code: &'static str,

    /// Localizable message key (safe to expose to clients)
    message_key: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Structured context attached at the failure site
    context: HashMap<String, serde_json::Value>,

    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for AegisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {}] {}", self.kind, self.code, self.message_key)
    }
}

impl AegisError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with kind, diagnostic code and message key.
    ///
    /// Counted once in `aegis_errors_total`.
    pub fn new(
        kind: ErrorKind,
        code: &'static str,
        message_key: impl Into<Cow<'static, str>>,
    ) -> Self {
        let error = Self::build(kind, code, message_key.into());
        error.record_metrics();
        error
    }

    /// Re-code an error that was already counted as `Internal` under `code`.
    ///
    /// Keeps the internal message and chains `source`; the metric is not
    /// incremented again.
    pub fn wrapping(code: &'static str, source: AegisError) -> Self {
        let mut error = Self::build(ErrorKind::Internal, code, INTERNAL_MESSAGE_KEY.into());
        error.internal_message = source.internal_message.clone();
        error.with_source(source)
    }

    fn build(kind: ErrorKind, code: &'static str, message_key: Cow<'static, str>) -> Self {
        Self {
            kind,
            code,
            message_key,
            internal_message: None,
            context: HashMap::new(),
            source: None,
        }
    }

    pub fn invalid_argument(code: &'static str, message_key: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::InvalidArgument, code, message_key)
    }

    pub fn precondition_failed(
        code: &'static str,
        message_key: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::new(ErrorKind::PreconditionFailed, code, message_key)
    }

    pub fn not_found(code: &'static str, message_key: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::NotFound, code, message_key)
    }

    pub fn conflict(code: &'static str, message_key: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Conflict, code, message_key)
    }

    /// Create an internal error with a detail message for the logs.
    pub fn internal(code: &'static str, internal_message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, code, INTERNAL_MESSAGE_KEY)
            .with_internal_message(internal_message)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    pub fn with_internal_message(mut self, message: impl Into<String>) -> Self {
        self.internal_message = Some(message.into());
        self
    }

    /// Add structured context.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Get the stable diagnostic code.
    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message_key(&self) -> &str {
        &self.message_key
    }

    /// Get the internal message (if any).
    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    pub fn context(&self) -> &HashMap<String, serde_json::Value> {
        &self.context
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_kind(&self.kind)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        match self.severity() {
            ErrorSeverity::High => {
                error!(
                    kind = self.kind.as_str(),
                    code = self.code,
                    message_key = %self.message_key,
                    internal_message = ?self.internal_message,
                    context = ?self.context,
                    source = ?self.source,
                    "Internal error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    kind = self.kind.as_str(),
                    code = self.code,
                    message_key = %self.message_key,
                    "Concurrent modification"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    kind = self.kind.as_str(),
                    code = self.code,
                    message_key = %self.message_key,
                    "Request rejected"
                );
            }
        }
    }

    fn record_metrics(&self) {
        counter!(
            "aegis_errors_total",
            "kind" => self.kind.as_str(),
            "code" => self.code,
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Context Extension Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Extension trait for wrapping foreign errors under a stable code.
pub trait ErrorContext<T> {
    /// Wrap the error as `Internal` under `code`.
    fn internal_err(self, code: &'static str) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn internal_err(self, code: &'static str) -> Result<T> {
        self.map_err(|e| AegisError::internal(code, e.to_string()).with_source(e))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<sqlx::Error> for AegisError {
    fn from(error: sqlx::Error) -> Self {
        let code = match &error {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => "DB-p00lT",
            sqlx::Error::Database(_) => "DB-q3ry1",
            _ => "DB-0x1ra",
        };
        Self::internal(code, error.to_string()).with_source(error)
    }
}

impl From<serde_json::Error> for AegisError {
    fn from(error: serde_json::Error) -> Self {
        Self::internal("JSON-d3c0d", error.to_string()).with_source(error)
    }
}

impl From<tokio::time::error::Elapsed> for AegisError {
    fn from(error: tokio::time::error::Elapsed) -> Self {
        Self::internal("TIMEOUT-eL4ps", error.to_string()).with_source(error)
    }
}

impl From<config::ConfigError> for AegisError {
    fn from(error: config::ConfigError) -> Self {
        let code = match &error {
            config::ConfigError::NotFound(_) => "CONFIG-n0tF1",
            config::ConfigError::PathParse(_) | config::ConfigError::FileParse { .. } => {
                "CONFIG-p4rsE"
            }
            _ => "CONFIG-3rr0r",
        };
        Self::internal(code, error.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
