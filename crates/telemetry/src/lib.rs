//! Structured logging for Scaffold tools
//!
//! This crate installs the process-wide `tracing` subscriber:
//! - Console output in compact, pretty or JSON form
//! - Optional daily-rotated JSON log files
//! - A session ID for correlating every log line of one process

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt as stdfmt;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer, Registry};
use uuid::Uuid;

/// Global session ID for correlating logs
static SESSION_ID: Lazy<String> = Lazy::new(|| Uuid::new_v4().to_string());

/// File name prefix for rotated log files
pub const LOG_FILE_PREFIX: &str = "scaffold.log";

/// Initialize logging from the environment
pub fn init() -> anyhow::Result<TelemetryGuard> {
    init_with_config(TelemetryConfig::from_env())
}

/// Initialize with custom configuration
///
/// `RUST_LOG` takes precedence over [`TelemetryConfig::log_level`]. The
/// returned guard must be kept alive for buffered file output to be flushed.
pub fn init_with_config(config: TelemetryConfig) -> anyhow::Result<TelemetryGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = vec![console_layer(&config)];

    let file_guard = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            layers.push(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .json()
                    .boxed(),
            );
            Some(guard)
        }
        None => None,
    };

    let subscriber = tracing_subscriber::registry().with(layers).with(filter);

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set tracing subscriber: {}", e))?;

    tracing::info!(
        session_id = %session_id(),
        version = env!("CARGO_PKG_VERSION"),
        format = %config.format,
        log_dir = ?config.log_dir,
        "Telemetry initialized"
    );

    Ok(TelemetryGuard {
        _file_guard: file_guard,
    })
}

fn console_layer<S>(config: &TelemetryConfig) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let layer = fmt::layer()
        .with_writer(io::stderr)
        .with_target(config.show_target)
        .with_thread_ids(config.show_thread_ids)
        .with_file(config.show_file)
        .with_line_number(config.show_line_number);

    match config.format {
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}

/// Get the current session ID
pub fn session_id() -> &'static str {
    &SESSION_ID
}

/// Keeps background log writers alive
///
/// Dropping the guard flushes and stops the file writer.
#[must_use = "dropping the guard stops file logging"]
#[derive(Debug)]
pub struct TelemetryGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Console log layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Single-line human output
    #[default]
    Compact,
    /// Multi-line human output for development
    Pretty,
    /// One JSON object per line
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => anyhow::bail!("Unknown log format: {other}"),
        }
    }
}

impl stdfmt::Display for LogFormat {
    fn fmt(&self, f: &mut stdfmt::Formatter<'_>) -> stdfmt::Result {
        f.write_str(match self {
            Self::Compact => "compact",
            Self::Pretty => "pretty",
            Self::Json => "json",
        })
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub log_level: String,
    /// Console layout
    pub format: LogFormat,
    /// Include the event target
    pub show_target: bool,
    /// Include thread IDs
    pub show_thread_ids: bool,
    /// Include source file names
    pub show_file: bool,
    /// Include source line numbers
    pub show_line_number: bool,
    /// Directory for daily-rotated JSON log files
    pub log_dir: Option<PathBuf>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            format: LogFormat::Compact,
            show_target: false,
            show_thread_ids: false,
            show_file: false,
            show_line_number: false,
            log_dir: None,
        }
    }
}

impl TelemetryConfig {
    /// Load configuration from environment variables
    ///
    /// Reads `LOG_LEVEL`, `LOG_FORMAT`, `LOG_DIR` and `APP_ENV`.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    ///
    /// Production environments default to JSON output and everything else
    /// to pretty output. An unrecognised `LOG_FORMAT` keeps that default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let production = var("APP_ENV").is_some_and(|env| env.eq_ignore_ascii_case("production"));
        let default_format = if production {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        };

        let format = var("LOG_FORMAT")
            .and_then(|f| f.parse().ok())
            .unwrap_or(default_format);

        Self {
            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            format,
            show_target: production,
            log_dir: var("LOG_DIR").map(PathBuf::from),
            ..Self::default()
        }
    }

    /// Set the filter directive
    #[must_use]
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Set the console layout
    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Write rotated log files into `dir`
    #[must_use]
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_development_defaults_to_pretty() {
        let config = TelemetryConfig::from_lookup(lookup(&[]));
        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.log_level, "info");
        assert!(config.log_dir.is_none());
        assert!(!config.show_target);
    }

    #[test]
    fn test_production_defaults_to_json() {
        let config = TelemetryConfig::from_lookup(lookup(&[("APP_ENV", "Production")]));
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.show_target);
    }

    #[test]
    fn test_explicit_variables_win() {
        let config = TelemetryConfig::from_lookup(lookup(&[
            ("APP_ENV", "production"),
            ("LOG_FORMAT", "compact"),
            ("LOG_LEVEL", "scaffold_api_client=debug"),
            ("LOG_DIR", "/var/log/scaffold"),
        ]));
        assert_eq!(config.format, LogFormat::Compact);
        assert_eq!(config.log_level, "scaffold_api_client=debug");
        assert_eq!(config.log_dir, Some(PathBuf::from("/var/log/scaffold")));
    }

    #[test]
    fn test_unknown_format_keeps_default() {
        let config = TelemetryConfig::from_lookup(lookup(&[("LOG_FORMAT", "xml")]));
        assert_eq!(config.format, LogFormat::Pretty);
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!(" pretty ".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("yaml".parse::<LogFormat>().is_err());
        assert_eq!(LogFormat::Compact.to_string(), "compact");
    }

    #[test]
    fn test_session_id() {
        let id = session_id();
        assert!(!id.is_empty());
        assert!(Uuid::parse_str(id).is_ok());
        assert_eq!(id, session_id());
    }

    // The only test that installs the global subscriber
    #[test]
    fn test_file_output_is_flushed_on_guard_drop() {
        let dir = tempfile::tempdir().unwrap();
        let config = TelemetryConfig::default()
            .with_log_level("info")
            .with_log_dir(dir.path());

        let guard = init_with_config(config).unwrap();
        tracing::info!(marker = "file-output-check", "hello from test");
        drop(guard);

        let contents: String = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter_map(|entry| std::fs::read_to_string(entry.path()).ok())
            .collect();
        assert!(contents.contains("file-output-check"));
        assert!(contents.contains(session_id()));
    }
}
