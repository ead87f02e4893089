//! Logging initialization.
//!
//! Console output goes to stderr so stdout stays free. Level, format and an
//! optional rolling log file are taken from the environment:
//! - `DDM_LOG_LEVEL` (trace|debug|info|warn|error|off)
//! - `DDM_LOG_FORMAT` (pretty|json|compact)
//! - `DDM_LOG_FILE` (path; rotated daily)
//! - `DDM_LOG_TARGETS` (comma-separated `target=level` list)
//!
//! `RUST_LOG`, when set and valid, replaces the computed filter.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, fmt,
    fmt::writer::{BoxMakeWriter, MakeWriterExt},
    util::SubscriberInitExt,
};

const DEFAULT_LOG_FILE_NAME: &str = "ddmetrics.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
    Compact,
}

impl LogFormat {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "pretty" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            "compact" => Some(Self::Compact),
            _ => None,
        }
    }
}

/// Configuration for logging initialization.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Base log level.
    pub level: String,
    pub format: LogFormat,
    /// Optional file path for daily-rotated logs.
    pub file_path: Option<PathBuf>,
    /// Per-target level overrides.
    pub targets: BTreeMap<String, String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            file_path: None,
            targets: BTreeMap::new(),
        }
    }
}

impl LogConfig {
    /// Build a logging configuration from `DDM_LOG_*` variables.
    pub fn from_env(default_level: &str) -> Self {
        Self::from_lookup(default_level, |key| std::env::var(key).ok())
    }

    fn from_lookup(default_level: &str, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self {
            level: lookup("DDM_LOG_LEVEL").unwrap_or_else(|| default_level.to_string()),
            ..Self::default()
        };

        if let Some(format) = lookup("DDM_LOG_FORMAT").as_deref().and_then(LogFormat::parse) {
            config.format = format;
        }

        if let Some(path) = lookup("DDM_LOG_FILE") {
            if !path.trim().is_empty() {
                config.file_path = Some(PathBuf::from(path));
            }
        }

        if let Some(targets) = lookup("DDM_LOG_TARGETS") {
            config.targets = parse_target_overrides(&targets);
        }

        config
    }

    /// Override the base log level.
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Directive string for the base level plus target overrides.
    fn directives(&self) -> String {
        std::iter::once(self.level.clone())
            .chain(self.targets.iter().map(|(target, level)| format!("{target}={level}")))
            .collect::<Vec<_>>()
            .join(",")
    }

    fn env_filter(&self) -> EnvFilter {
        std::env::var_os("RUST_LOG")
            .and_then(|_| EnvFilter::try_from_default_env().ok())
            .unwrap_or_else(|| EnvFilter::new(self.directives()))
    }
}

/// Keeps the background file writer alive; hold it for the process lifetime.
pub struct LoggingGuards {
    _file_guard: Option<WorkerGuard>,
}

/// Install the global subscriber. A subscriber that is already installed
/// (as in tests) is left in place.
pub fn init_logging(config: &LogConfig) -> Result<LoggingGuards> {
    let filter = config.env_filter();
    let (writer, file_guard) = build_writer(config);
    let ansi = file_guard.is_none();

    let builder = fmt::Subscriber::builder()
        .with_writer(writer)
        .with_env_filter(filter);

    match config.format {
        LogFormat::Pretty => finish(builder.with_ansi(ansi).pretty().finish(), file_guard),
        LogFormat::Json => finish(builder.with_ansi(false).json().finish(), file_guard),
        LogFormat::Compact => finish(builder.with_ansi(ansi).compact().finish(), file_guard),
    }
}

fn build_writer(config: &LogConfig) -> (BoxMakeWriter, Option<WorkerGuard>) {
    let console = BoxMakeWriter::new(std::io::stderr);
    let Some(path) = config.file_path.as_ref() else {
        return (console, None);
    };

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .unwrap_or_else(|| OsStr::new(DEFAULT_LOG_FILE_NAME));
    let appender = tracing_appender::rolling::daily(dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
    (BoxMakeWriter::new(console.and(non_blocking)), Some(guard))
}

fn finish<S>(subscriber: S, file_guard: Option<WorkerGuard>) -> Result<LoggingGuards>
where
    S: Subscriber + Send + Sync + 'static,
{
    if let Err(err) = subscriber.try_init() {
        if !err.to_string().contains("already initialized") {
            return Err(err.into());
        }
    }
    Ok(LoggingGuards {
        _file_guard: file_guard,
    })
}

fn parse_target_overrides(value: &str) -> BTreeMap<String, String> {
    value
        .split(',')
        .filter_map(|entry| entry.trim().split_once('='))
        .map(|(target, level)| (target.trim(), level.trim().to_lowercase()))
        .filter(|(target, level)| !target.is_empty() && is_valid_level(level))
        .map(|(target, level)| (target.to_string(), level))
        .collect()
}

fn is_valid_level(level: &str) -> bool {
    matches!(level, "trace" | "debug" | "info" | "warn" | "error" | "off")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_parse_targets() {
        let targets = parse_target_overrides("ddmetrics::runner=debug,hyper=WARN,invalid,x=loud");
        assert_eq!(targets.get("ddmetrics::runner"), Some(&"debug".to_string()));
        assert_eq!(targets.get("hyper"), Some(&"warn".to_string()));
        assert!(!targets.contains_key("invalid"));
        assert!(!targets.contains_key("x"));
    }

    #[test]
    fn test_from_lookup() {
        let config = LogConfig::from_lookup(
            "info",
            lookup(&[
                ("DDM_LOG_LEVEL", "warn"),
                ("DDM_LOG_FORMAT", "json"),
                ("DDM_LOG_FILE", "/var/log/ddmetrics.log"),
            ]),
        );
        assert_eq!(config.level, "warn");
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.file_path, Some(PathBuf::from("/var/log/ddmetrics.log")));
    }

    #[test]
    fn test_from_lookup_defaults() {
        let config = LogConfig::from_lookup("debug", lookup(&[("DDM_LOG_FORMAT", "fancy")]));
        assert_eq!(config.level, "debug");
        assert_eq!(config.format, LogFormat::Compact);
        assert!(config.file_path.is_none());
    }

    #[test]
    fn test_directives_include_overrides() {
        let config = LogConfig::from_lookup(
            "info",
            lookup(&[("DDM_LOG_TARGETS", "ddmetrics::driver=debug,hyper=warn")]),
        );
        assert_eq!(config.directives(), "info,ddmetrics::driver=debug,hyper=warn");
        assert_eq!(LogConfig::default().with_level("trace").directives(), "trace");
    }
}
