//! `log_kit` provides colorized, human-readable logging built on the [`tracing`] ecosystem.
//!
//! It offers:
//! - A [`Logger`] that writes `[timestamp] [LEVEL] [caller] message` lines to the console, to a
//!   `<base>-out.log` file, and error lines additionally to a `<base>-err.log` file.
//! - An [`AccessLogger`] that writes one columnar line per HTTP request to the console and to a
//!   `<base>-api.log` file once the response has been sent, with a `tower` middleware (`http`
//!   feature) to drive it.
//! - A [`TextFormattingLayer`] and the [`build_logging_components`] function for consumers that
//!   want to combine the sinks with their own [`tracing_subscriber::Registry`] and layers.
//!
//! ```no_run
//! use log_kit::{Logger, LoggerConfig};
//!
//! # fn main() -> Result<(), log_kit::LoggerError> {
//! let logger = Logger::new(LoggerConfig {
//!     log_file_base_name: "billing".to_string(),
//!     ..LoggerConfig::default()
//! })?;
//!
//! logger.info("service started");
//! logger.error("payment provider unreachable");
//! # Ok(())
//! # }
//! ```

mod access_log;
pub mod caller;
mod config;
mod formatter;
mod logger;
#[cfg(feature = "http")]
mod middleware;
mod storage;
mod timestamp;

use std::sync::{Mutex, OnceLock, PoisonError};

pub use tracing::Level;
use tracing_appender::{non_blocking::NonBlocking, rolling::RollingFileAppender};
use tracing_subscriber::{
    filter::{LevelFilter, Targets},
    EnvFilter, Layer,
};

#[cfg(feature = "http")]
pub use self::middleware::{AccessLogBody, AccessLogLayer, AccessLogService};
pub use self::{
    access_log::{level_for_status, size_kb, status_color, AccessLogEntry, AccessLogger},
    caller::CallerSource,
    config::{
        parse_level, AccessLoggerConfig, ColorMode, FileRotation, LoggerConfig,
        DEFAULT_DATE_TIME_FORMAT, DEFAULT_LOG_PATH,
    },
    formatter::{format_line, level_tag, LineKind, LogRecord, TextFormattingLayer},
    logger::{global_logger, Logger},
    timestamp::DateTimeFormat,
};

mod keys {
    pub(crate) const MESSAGE: &str = "message";
    pub(crate) const CALLER: &str = "caller";
    pub(crate) const ERROR: &str = "error";

    pub(crate) const ACCESS_TARGET: &str = "access_log";
    pub(crate) const IP: &str = "ip";
    pub(crate) const METHOD: &str = "method";
    pub(crate) const URL: &str = "url";
    pub(crate) const STATUS: &str = "status";
    pub(crate) const ELAPSED_MS: &str = "elapsed_ms";
    pub(crate) const SIZE_KB: &str = "size_kb";
}

type BoxedLayer = Box<dyn Layer<tracing_subscriber::Registry> + Send + Sync + 'static>;

/// Holds the constructed logging layers and their associated worker guards.
/// These components can be combined with other layers and a [`tracing_subscriber::Registry`]
/// before initializing the global subscriber.
#[allow(missing_debug_implementations)] // Layers are `dyn Trait` objects
pub struct LoggingComponents {
    /// One layer per sink, each with its own filter.
    pub layers: Vec<BoxedLayer>,

    /// Worker guards of the sinks.
    /// Logs would be written as long as these guards are in scope.
    pub guards: Vec<tracing_appender::non_blocking::WorkerGuard>,
}

/// Errors that can occur within the logger.
#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    /// Represents an error in configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Represents an invalid timestamp pattern.
    #[error("Invalid date time format: {0}")]
    InvalidDateTimeFormat(#[from] time::error::InvalidFormatDescription),

    /// Represents an error during initialization of the rolling file appender.
    #[error("Failed to initialize rolling file appender: {0}")]
    FileAppenderInitialization(#[from] tracing_appender::rolling::InitError),

    /// Represents an error due to an invalid filtering directive.
    #[error("Failed to parse filtering directive: {0}")]
    InvalidFilteringDirective(#[from] tracing_subscriber::filter::ParseError),
}

/// Constructs the sinks of a [`Logger`] based on the provided [`LoggerConfig`].
///
/// The components consist of:
/// - a console layer (if enabled) and a `<base>-out.log` layer, both filtered by
///   [`LoggerConfig::level`] and [`LoggerConfig::filtering_directive`];
/// - a `<base>-err.log` layer that only receives `ERROR` events.
///
/// # Example
///
/// ```no_run
/// use log_kit::{build_logging_components, LoggerConfig};
/// use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
///
/// match build_logging_components(&LoggerConfig::default()) {
///     Ok(components) => {
///         let _guards = components.guards; // Keep guards in scope
///         tracing_subscriber::registry().with(components.layers).init();
///
///         tracing::info!("Logging initialized successfully!");
///     }
///     Err(e) => eprintln!("Failed to initialize logging: {e}"),
/// }
/// ```
///
/// # Errors
///
/// Returns [`LoggerError`] if any part of the component building fails
/// (e.g., due to an invalid timestamp pattern, invalid filter directives, etc.).
pub fn build_logging_components(config: &LoggerConfig) -> Result<LoggingComponents, LoggerError> {
    let mut layers = Vec::new();
    let mut guards = Vec::new();

    let date_time_format = DateTimeFormat::parse(&config.date_time_format)?;
    let kind = LineKind::Application(config.caller_source);
    let file_sink = FileSink {
        directory: &config.log_path,
        base_name: &config.log_file_base_name,
        rotation: config.file_rotation,
        max_log_files: config.max_log_files,
    };

    if config.console_output {
        let (non_blocking_stdout, guard) = tracing_appender::non_blocking(std::io::stdout());
        guards.push(guard);

        let layer = TextFormattingLayer::new(
            kind,
            date_time_format.clone(),
            non_blocking_stdout,
            config.color.resolve(),
        )
        .with_filter(level_filter(config.level, config.filtering_directive.as_deref())?)
        .boxed();
        layers.push(layer);
    }

    let (out_writer, guard) = file_sink.writer("out")?;
    guards.push(guard);
    let layer = TextFormattingLayer::new(kind, date_time_format.clone(), out_writer, false)
        .with_filter(level_filter(config.level, config.filtering_directive.as_deref())?)
        .boxed();
    layers.push(layer);

    let (err_writer, guard) = file_sink.writer("err")?;
    guards.push(guard);
    let layer = TextFormattingLayer::new(kind, date_time_format, err_writer, false)
        .with_filter(LevelFilter::ERROR)
        .boxed();
    layers.push(layer);

    Ok(LoggingComponents { layers, guards })
}

/// Constructs the sinks of an [`AccessLogger`] based on the provided [`AccessLoggerConfig`]:
/// a console layer (if enabled) and a `<base>-api.log` layer.
///
/// Both layers only accept access events at or above [`AccessLoggerConfig::level`].
///
/// # Errors
///
/// Returns [`LoggerError`] if the timestamp pattern is invalid or the log file cannot be
/// created.
pub fn build_access_log_components(
    config: &AccessLoggerConfig,
) -> Result<LoggingComponents, LoggerError> {
    let mut layers = Vec::new();
    let mut guards = Vec::new();

    let date_time_format = DateTimeFormat::parse(&config.date_time_format)?;
    let filter = Targets::new().with_target(keys::ACCESS_TARGET, config.level);
    let file_sink = FileSink {
        directory: &config.log_path,
        base_name: &config.log_file_base_name,
        rotation: config.file_rotation,
        max_log_files: config.max_log_files,
    };

    if config.console_output {
        let (non_blocking_stdout, guard) = tracing_appender::non_blocking(std::io::stdout());
        guards.push(guard);

        let layer = TextFormattingLayer::new(
            LineKind::Access,
            date_time_format.clone(),
            non_blocking_stdout,
            config.color.resolve(),
        )
        .with_filter(filter.clone())
        .boxed();
        layers.push(layer);
    }

    let (api_writer, guard) = file_sink.writer("api")?;
    guards.push(guard);
    let layer = TextFormattingLayer::new(LineKind::Access, date_time_format, api_writer, false)
        .with_filter(filter)
        .boxed();
    layers.push(layer);

    Ok(LoggingComponents { layers, guards })
}

/// Location and naming of the log files of one logger.
struct FileSink<'a> {
    directory: &'a std::path::Path,
    base_name: &'a str,
    rotation: FileRotation,
    max_log_files: Option<std::num::NonZeroUsize>,
}

impl FileSink<'_> {
    /// Opens a non-blocking writer for `<directory>/<base>-<suffix>.log`.
    fn writer(
        &self,
        suffix: &str,
    ) -> Result<(NonBlocking, tracing_appender::non_blocking::WorkerGuard), LoggerError> {
        let mut file_appender_builder = RollingFileAppender::builder()
            .rotation(self.rotation.into())
            .filename_prefix(format!("{}-{suffix}", self.base_name))
            .filename_suffix("log");

        if let Some(max_log_files) = self.max_log_files {
            file_appender_builder = file_appender_builder.max_log_files(usize::from(max_log_files));
        }

        let file_appender = file_appender_builder.build(self.directory)?;
        Ok(tracing_appender::non_blocking(file_appender))
    }
}

/// Builds the filter of a sink: `level` as the default directive, refined by `directive`.
fn level_filter(level: Level, directive: Option<&str>) -> Result<EnvFilter, LoggerError> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .parse(directive.unwrap_or_default())?; // Using an empty string causes it to use the default directive
    Ok(filter)
}

/// Returns the value of `cell`, creating it with `init` if the cell is still empty.
///
/// Creation is serialized by `lock`: concurrent first calls wait for each other, and `init` is
/// not run once a value exists.
fn get_or_try_init<T>(
    cell: &'static OnceLock<T>,
    lock: &Mutex<()>,
    init: impl FnOnce() -> Result<T, LoggerError>,
) -> Result<&'static T, LoggerError> {
    if let Some(value) = cell.get() {
        return Ok(value);
    }

    let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(value) = cell.get() {
        return Ok(value);
    }
    let value = init()?;
    Ok(cell.get_or_init(|| value))
}
