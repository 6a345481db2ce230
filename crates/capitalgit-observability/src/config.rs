//! Logging configuration.
//!
//! A [`LogConfig`] is either built explicitly or read from the
//! `CAPITALGIT_LOG*` environment variables. `RUST_LOG` is honoured as a
//! fallback filter so the usual tooling keeps working.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Environment variable holding the filter directive (e.g. `capitalgit_versioning=debug`).
pub const LOG_ENV: &str = "CAPITALGIT_LOG";
/// Environment variable selecting the output format.
pub const LOG_FORMAT_ENV: &str = "CAPITALGIT_LOG_FORMAT";
/// Environment variable disabling ANSI colors when set to `0`/`false`.
pub const LOG_COLOR_ENV: &str = "CAPITALGIT_LOG_COLOR";

/// Errors raised while configuring or installing the subscriber
#[derive(Error, Debug)]
pub enum LogError {
    /// The filter directive could not be parsed
    #[error("Invalid log filter '{filter}': {reason}")]
    InvalidFilter {
        /// The rejected directive
        filter: String,
        /// Parser message
        reason: String,
    },

    /// Unknown output format name
    #[error("Unknown log format: {0}. Expected one of: pretty, compact, json")]
    UnknownFormat(String),

    /// A global subscriber was installed earlier in this process
    #[error("A global tracing subscriber is already installed")]
    AlreadyInitialized,
}

/// Output format for logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, human readable
    #[default]
    Pretty,
    /// Single line per event
    Compact,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(LogError::UnknownFormat(other.to_string())),
        }
    }
}

/// Log output destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    /// Standard error
    #[default]
    Stderr,
    /// Standard output
    Stdout,
}

/// Subscriber configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Output format
    pub format: LogFormat,

    /// Filter directive; `None` defers to the environment
    pub level: Option<String>,

    /// ANSI colors (ignored for JSON)
    pub use_color: bool,

    /// Prefix events with a timestamp
    pub use_timestamps: bool,

    /// Include thread ids
    pub include_thread_ids: bool,

    /// Include the module path of each event
    pub include_targets: bool,

    /// Destination stream
    pub output: LogOutput,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            format: LogFormat::Pretty,
            level: None,
            use_color: true,
            use_timestamps: true,
            include_thread_ids: false,
            include_targets: true,
            output: LogOutput::Stderr,
        }
    }
}

impl LogConfig {
    /// Default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a configuration from the process environment.
    ///
    /// Unknown format names fall back to the default format.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(filter) = lookup(LOG_ENV).filter(|f| !f.trim().is_empty()) {
            config.level = Some(filter);
        }
        if let Some(format) = lookup(LOG_FORMAT_ENV).and_then(|f| f.parse().ok()) {
            config.format = format;
        }
        if let Some(color) = lookup(LOG_COLOR_ENV) {
            config.use_color = !matches!(color.trim(), "0" | "false" | "no" | "off");
        }

        config
    }

    /// Set the output format
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the filter directive
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = Some(level.into());
        self
    }

    /// Enable or disable colors
    pub fn with_color(mut self, use_color: bool) -> Self {
        self.use_color = use_color;
        self
    }

    /// Enable or disable timestamps
    pub fn with_timestamps(mut self, use_timestamps: bool) -> Self {
        self.use_timestamps = use_timestamps;
        self
    }

    /// Enable or disable thread ids
    pub fn with_thread_ids(mut self, include_thread_ids: bool) -> Self {
        self.include_thread_ids = include_thread_ids;
        self
    }

    /// Enable or disable targets
    pub fn with_targets(mut self, include_targets: bool) -> Self {
        self.include_targets = include_targets;
        self
    }

    /// Set the destination stream
    pub fn with_output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    /// The filter directive that will be installed.
    ///
    /// Explicit level, then `RUST_LOG`, then `info`.
    pub fn effective_level(&self) -> String {
        self.level
            .clone()
            .or_else(|| std::env::var("RUST_LOG").ok().filter(|v| !v.trim().is_empty()))
            .unwrap_or_else(|| "info".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!(" Compact ".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!(matches!(
            "yaml".parse::<LogFormat>(),
            Err(LogError::UnknownFormat(name)) if name == "yaml"
        ));
    }

    #[test]
    fn test_from_lookup_reads_all_variables() {
        let config = LogConfig::from_lookup(lookup_from(&[
            (LOG_ENV, "capitalgit_versioning=debug"),
            (LOG_FORMAT_ENV, "json"),
            (LOG_COLOR_ENV, "false"),
        ]));

        assert_eq!(config.level.as_deref(), Some("capitalgit_versioning=debug"));
        assert_eq!(config.format, LogFormat::Json);
        assert!(!config.use_color);
    }

    #[test]
    fn test_from_lookup_ignores_bad_format() {
        let config = LogConfig::from_lookup(lookup_from(&[(LOG_FORMAT_ENV, "xml")]));
        assert_eq!(config.format, LogFormat::Pretty);
        assert!(config.level.is_none());
        assert!(config.use_color);
    }

    #[test]
    fn test_explicit_level_wins() {
        let config = LogConfig::new().with_level("warn");
        assert_eq!(config.effective_level(), "warn");
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: LogConfig = serde_json::from_str(r#"{"format":"compact"}"#).unwrap();
        assert_eq!(config.format, LogFormat::Compact);
        assert_eq!(config.output, LogOutput::Stderr);
        assert!(config.include_targets);
    }
}
