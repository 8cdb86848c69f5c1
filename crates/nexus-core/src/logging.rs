//! Logging bootstrap built on tracing-subscriber.
//!
//! Components log through `tracing` with their manager name as the target;
//! this module wires the global subscriber from the `logging` config
//! section (console and rolling-file sinks, text or JSON format).

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

type LogSubscriber = Layered<EnvFilter, Registry>;

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    pub fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(Error::configuration_key(
                format!("unsupported log format '{other}'"),
                "logging.format",
            )),
        }
    }
}

/// Resolved logging options
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Level directive, e.g. `info` or `nexus=debug,info`
    pub level: String,
    pub format: LogFormat,
    pub console: bool,
    /// Rolling file sink, when enabled
    pub file: Option<PathBuf>,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            console: true,
            file: None,
        }
    }
}

/// Keeps the non-blocking file writer alive for the process lifetime
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

fn console_layer(format: LogFormat) -> Box<dyn Layer<LogSubscriber> + Send + Sync> {
    match format {
        LogFormat::Json => fmt::layer().json().with_ansi(false).boxed(),
        LogFormat::Text => fmt::layer().boxed(),
    }
}

fn file_layer(
    format: LogFormat,
    writer: NonBlocking,
) -> Box<dyn Layer<LogSubscriber> + Send + Sync> {
    match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_ansi(false)
            .with_writer(writer)
            .boxed(),
        LogFormat::Text => fmt::layer().with_ansi(false).with_writer(writer).boxed(),
    }
}

fn rolling_writer(path: &Path) -> Result<(NonBlocking, WorkerGuard)> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| {
            Error::configuration_key("log file path has no file name", "logging.file.path")
        })?
        .to_string_lossy()
        .to_string();
    std::fs::create_dir_all(dir).map_err(|e| {
        Error::configuration_key(
            format!("cannot create log directory {}: {e}", dir.display()),
            "logging.file.path",
        )
    })?;
    let appender = tracing_appender::rolling::daily(dir, file_name);
    Ok(tracing_appender::non_blocking(appender))
}

/// Install the global subscriber from the given options.
///
/// Safe to call more than once: if a subscriber is already installed (test
/// harnesses do this) the existing one stays and the call still succeeds.
pub fn init_logging(options: &LogOptions) -> Result<LoggingGuard> {
    let filter = EnvFilter::try_new(&options.level).map_err(|e| {
        Error::configuration_key(
            format!("invalid log level '{}': {e}", options.level),
            "logging.level",
        )
    })?;

    let mut layers: Vec<Box<dyn Layer<LogSubscriber> + Send + Sync>> = Vec::new();
    if options.console {
        layers.push(console_layer(options.format));
    }

    let mut file_guard = None;
    if let Some(path) = &options.file {
        let (writer, guard) = rolling_writer(path)?;
        layers.push(file_layer(options.format, writer));
        file_guard = Some(guard);
    }

    if tracing_subscriber::registry()
        .with(filter)
        .with(layers)
        .try_init()
        .is_err()
    {
        tracing::debug!("global subscriber already installed, keeping existing one");
    }

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}
