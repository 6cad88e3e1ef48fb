//! Structured logging with sensitive-field redaction.
//!
//! - JSON output for deployed services, pretty or compact output for local runs
//! - Global level plus per-module directives
//! - Redaction of authorization secrets before request payloads reach a log line

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Global redactor instance for sensitive data.
static REDACTOR: OnceLock<SensitiveFieldRedactor> = OnceLock::new();

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Global log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    /// Per-module log levels, e.g. `aegis_core::cache = "debug"`
    #[serde(default)]
    pub module_levels: HashMap<String, String>,

    /// Whether to include file/line information
    #[serde(default)]
    pub include_location: bool,

    #[serde(default = "default_true")]
    pub include_target: bool,

    /// Emit an event with timings when each span closes
    #[serde(default)]
    pub span_close_events: bool,

    #[serde(default)]
    pub redaction: RedactionConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            module_levels: HashMap::new(),
            include_location: false,
            include_target: true,
            span_close_events: false,
            redaction: RedactionConfig::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
    Compact,
}

/// Configuration for sensitive data redaction.
#[derive(Debug, Clone, Deserialize)]
pub struct RedactionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_redaction_patterns")]
    pub patterns: Vec<RedactionPattern>,

    #[serde(default = "default_redaction_replacement")]
    pub replacement: String,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            patterns: default_redaction_patterns(),
            replacement: default_redaction_replacement(),
        }
    }
}

/// A pattern for identifying sensitive data to redact.
#[derive(Debug, Clone, Deserialize)]
pub struct RedactionPattern {
    pub name: String,

    /// Field names to match (case-insensitive substring)
    #[serde(default)]
    pub field_names: Vec<String>,

    /// Regex matched against values
    #[serde(default)]
    pub value_pattern: Option<String>,
}

/// Redactor for sensitive fields in log output.
#[derive(Debug, Clone)]
pub struct SensitiveFieldRedactor {
    field_names: Vec<String>,
    value_regexes: Vec<regex::Regex>,
    replacement: String,
    enabled: bool,
}

impl SensitiveFieldRedactor {
    /// Create a new redactor from configuration. Invalid regexes are skipped.
    pub fn new(config: &RedactionConfig) -> Self {
        Self {
            field_names: config
                .patterns
                .iter()
                .flat_map(|p| p.field_names.iter().map(|f| f.to_lowercase()))
                .collect(),
            value_regexes: config
                .patterns
                .iter()
                .filter_map(|p| p.value_pattern.as_deref())
                .filter_map(|pattern| regex::Regex::new(pattern).ok())
                .collect(),
            replacement: config.replacement.clone(),
            enabled: config.enabled,
        }
    }

    /// Get the global redactor instance.
    pub fn global() -> &'static SensitiveFieldRedactor {
        REDACTOR.get_or_init(|| SensitiveFieldRedactor::new(&RedactionConfig::default()))
    }

    pub fn should_redact_field(&self, field_name: &str) -> bool {
        if !self.enabled {
            return false;
        }
        let lower = field_name.to_lowercase();
        self.field_names.iter().any(|f| lower.contains(f))
    }

    /// Replace every value-pattern match in `value`.
    pub fn redact_value(&self, value: &str) -> String {
        if !self.enabled {
            return value.to_string();
        }
        self.value_regexes
            .iter()
            .fold(value.to_string(), |acc, regex| {
                regex.replace_all(&acc, self.replacement.as_str()).into_owned()
            })
    }

    /// Copy of `value` with sensitive object fields and string matches masked.
    pub fn redact_json(&self, value: &serde_json::Value) -> serde_json::Value {
        use serde_json::Value;

        match value {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(field, v)| {
                        let redacted = if self.should_redact_field(field) {
                            Value::String(self.replacement.clone())
                        } else {
                            self.redact_json(v)
                        };
                        (field.clone(), redacted)
                    })
                    .collect(),
            ),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.redact_json(v)).collect()),
            Value::String(s) => Value::String(self.redact_value(s)),
            other => other.clone(),
        }
    }
}

fn default_log_level() -> String {
    std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string())
}

fn default_true() -> bool {
    true
}

fn default_redaction_replacement() -> String {
    "[REDACTED]".to_string()
}

fn default_redaction_patterns() -> Vec<RedactionPattern> {
    vec![
        RedactionPattern {
            name: "client_credentials".to_string(),
            field_names: vec![
                "client_secret".to_string(),
                "client_assertion".to_string(),
                "password".to_string(),
            ],
            value_pattern: None,
        },
        RedactionPattern {
            name: "pkce".to_string(),
            field_names: vec!["code_verifier".to_string()],
            value_pattern: None,
        },
        RedactionPattern {
            name: "tokens".to_string(),
            field_names: vec![
                "id_token_hint".to_string(),
                "access_token".to_string(),
                "refresh_token".to_string(),
            ],
            value_pattern: Some(r"eyJ[a-zA-Z0-9_-]+\.[a-zA-Z0-9_-]+\.[a-zA-Z0-9_-]+".to_string()),
        },
    ]
}

/// Initialize the global tracing subscriber.
///
/// # Errors
///
/// Returns an error if a level directive is malformed or a subscriber is
/// already installed.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let _ = REDACTOR.set(SensitiveFieldRedactor::new(&config.redaction));

    let mut filter = EnvFilter::try_new(&config.level)?;
    for (module, level) in &config.module_levels {
        filter = filter.add_directive(format!("{}={}", module, level).parse()?);
    }

    let span_events = if config.span_close_events {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer = fmt::layer()
        .with_span_events(span_events)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_target(config.include_target);

    match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .try_init()?,
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(layer.pretty())
            .try_init()?,
        LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(layer.compact())
            .try_init()?,
    }

    Ok(())
}
