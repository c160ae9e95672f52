//! HTTP access logging: one columnar line per completed request, written to the console and to
//! `<base>-api.log`.

use std::{
    fmt,
    sync::{Arc, Mutex, OnceLock},
};

use colored::Color;
use tracing::{Dispatch, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;

use super::{
    build_access_log_components, config::AccessLoggerConfig, formatter::paint, get_or_try_init,
    keys, storage::Storage, LoggerError,
};

static GLOBAL_ACCESS_LOGGER: OnceLock<AccessLogger> = OnceLock::new();
static GLOBAL_ACCESS_LOGGER_INIT: Mutex<()> = Mutex::new(());

/// The data of one completed request/response pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessLogEntry {
    /// Address of the client, or `-` if unknown.
    pub ip: String,

    /// Request method.
    pub method: String,

    /// Original request path including the query string.
    pub url: String,

    /// Response status code.
    pub status: u16,

    /// Time taken to produce the response, in milliseconds.
    pub elapsed_ms: u64,

    /// Response size from the `Content-Length` header, in kilobytes.
    pub size_kb: u64,
}

impl AccessLogEntry {
    /// The level this entry is logged at, see [`level_for_status`].
    pub fn level(&self) -> Level {
        level_for_status(self.status)
    }

    /// Formats the entry as fixed-width columns.
    ///
    /// ```
    /// use log_kit::AccessLogEntry;
    ///
    /// let entry = AccessLogEntry {
    ///     ip: "10.0.0.7".to_string(),
    ///     method: "GET".to_string(),
    ///     url: "/health".to_string(),
    ///     status: 200,
    ///     elapsed_ms: 3,
    ///     size_kb: 0,
    /// };
    /// assert_eq!(
    ///     entry.format(false),
    ///     format!("{:<30} {:<7} {:<30} 200 {:>8} {:>8}", "10.0.0.7", "GET", "/health", "3ms", "0kB")
    /// );
    /// ```
    pub fn format(&self, colored: bool) -> String {
        [
            paint(&format!("{:<30}", self.ip), Color::Cyan, colored),
            paint(&format!("{:<7}", self.method), Color::Magenta, colored),
            paint(&format!("{:<30}", self.url), Color::White, colored),
            paint(
                &format!("{:>3}", self.status),
                status_color(self.status),
                colored,
            ),
            paint(
                &format!("{:>8}", format!("{}ms", self.elapsed_ms)),
                Color::White,
                colored,
            ),
            paint(
                &format!("{:>8}", format!("{}kB", self.size_kb)),
                Color::White,
                colored,
            ),
        ]
        .join(" ")
    }

    /// Rebuilds an entry from the fields recorded on an access event.
    pub(crate) fn from_storage(storage: &Storage<'_>) -> Self {
        let text = |key: &str| {
            storage
                .value(key)
                .and_then(serde_json::Value::as_str)
                .unwrap_or("-")
                .to_string()
        };
        let number = |key: &str| {
            storage
                .value(key)
                .and_then(serde_json::Value::as_u64)
                .unwrap_or(0)
        };

        Self {
            ip: text(keys::IP),
            method: text(keys::METHOD),
            url: text(keys::URL),
            status: u16::try_from(number(keys::STATUS)).unwrap_or(0),
            elapsed_ms: number(keys::ELAPSED_MS),
            size_kb: number(keys::SIZE_KB),
        }
    }
}

/// `WARN` for client errors (4xx), `ERROR` for server errors (5xx and above), `INFO` otherwise.
pub fn level_for_status(status: u16) -> Level {
    match status {
        400..=499 => Level::WARN,
        500.. => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Red for server errors, yellow for client errors, green otherwise.
pub fn status_color(status: u16) -> Color {
    match status {
        500.. => Color::Red,
        400.. => Color::Yellow,
        _ => Color::Green,
    }
}

/// Converts a `Content-Length` value to kilobytes, rounding halves up.
/// Missing or malformed values count as zero bytes.
pub fn size_kb(content_length: Option<&str>) -> u64 {
    content_length
        .and_then(|length| length.trim().parse::<u64>().ok())
        .map_or(0, |bytes| bytes.saturating_add(512) / 1024)
}

/// Writes [`AccessLogEntry`] lines to the console and to `<base>-api.log`.
///
/// Cloning is cheap, clones share the same sinks. Lines are flushed once the last clone is
/// dropped.
#[derive(Clone)]
pub struct AccessLogger {
    inner: Arc<Inner>,
}

struct Inner {
    dispatch: Dispatch,
    _guards: Vec<WorkerGuard>,
}

impl fmt::Debug for AccessLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessLogger").finish_non_exhaustive()
    }
}

impl AccessLogger {
    /// Creates an access logger with its own sinks.
    ///
    /// # Errors
    ///
    /// Returns [`LoggerError`] if the timestamp pattern is invalid or the log file cannot be
    /// created.
    pub fn new(config: AccessLoggerConfig) -> Result<Self, LoggerError> {
        let components = build_access_log_components(&config)?;
        let dispatch = Dispatch::new(tracing_subscriber::registry().with(components.layers));

        Ok(Self {
            inner: Arc::new(Inner {
                dispatch,
                _guards: components.guards,
            }),
        })
    }

    /// Returns the process-wide access logger, creating it from `config` on the first call.
    ///
    /// The configuration passed on later calls is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`LoggerError`] if the access logger has to be created and creation fails.
    pub fn global(config: AccessLoggerConfig) -> Result<&'static Self, LoggerError> {
        get_or_try_init(&GLOBAL_ACCESS_LOGGER, &GLOBAL_ACCESS_LOGGER_INIT, || {
            Self::new(config)
        })
    }

    /// Logs an entry at the level derived from its status code.
    pub fn log(&self, entry: &AccessLogEntry) {
        macro_rules! access_event {
            ($level:expr) => {
                tracing::event!(
                    target: keys::ACCESS_TARGET,
                    $level,
                    ip = entry.ip.as_str(),
                    method = entry.method.as_str(),
                    url = entry.url.as_str(),
                    status = u64::from(entry.status),
                    elapsed_ms = entry.elapsed_ms,
                    size_kb = entry.size_kb
                )
            };
        }

        tracing::dispatcher::with_default(&self.inner.dispatch, || match entry.level() {
            Level::ERROR => access_event!(Level::ERROR),
            Level::WARN => access_event!(Level::WARN),
            _ => access_event!(Level::INFO),
        });
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use super::*;
    use crate::{config::ColorMode, FileRotation};

    fn entry(status: u16) -> AccessLogEntry {
        AccessLogEntry {
            ip: "127.0.0.1".to_string(),
            method: "POST".to_string(),
            url: "/orders?page=2".to_string(),
            status,
            elapsed_ms: 1234,
            size_kb: 15,
        }
    }

    #[test]
    fn levels_by_status_bucket() {
        assert_eq!(level_for_status(200), Level::INFO);
        assert_eq!(level_for_status(304), Level::INFO);
        assert_eq!(level_for_status(404), Level::WARN);
        assert_eq!(level_for_status(499), Level::WARN);
        assert_eq!(level_for_status(500), Level::ERROR);
        assert_eq!(level_for_status(503), Level::ERROR);
    }

    #[test]
    fn colors_by_status_bucket() {
        assert_eq!(status_color(201), Color::Green);
        assert_eq!(status_color(404), Color::Yellow);
        assert_eq!(status_color(502), Color::Red);
    }

    #[test]
    fn size_from_content_length() {
        assert_eq!(size_kb(None), 0);
        assert_eq!(size_kb(Some("not a number")), 0);
        assert_eq!(size_kb(Some("511")), 0);
        assert_eq!(size_kb(Some("512")), 1);
        assert_eq!(size_kb(Some("4096")), 4);
        assert_eq!(size_kb(Some("1535")), 1);
        assert_eq!(size_kb(Some("1536")), 2);
    }

    #[test]
    fn plain_columns() {
        let line = entry(404).format(false);
        assert_eq!(
            line,
            concat!(
                "127.0.0.1                      POST    ",
                "/orders?page=2                 404   1234ms     15kB"
            )
        );
    }

    #[test]
    fn colored_status_column() {
        let line = entry(503).format(true);
        assert!(line.contains("\x1b[31m503\x1b[0m"));
        assert!(line.contains("\x1b[35mPOST   \x1b[0m"));
    }

    #[test]
    fn writes_api_log_file() {
        let dir = tempfile::tempdir().expect("temporary directory");
        let logger = AccessLogger::new(AccessLoggerConfig {
            log_path: dir.path().to_path_buf(),
            log_file_base_name: "gateway".to_string(),
            color: ColorMode::Never,
            console_output: false,
            file_rotation: FileRotation::Never,
            ..AccessLoggerConfig::default()
        })
        .expect("access logger");

        logger.log(&entry(200));
        logger.log(&entry(404));
        logger.log(&entry(500));
        drop(logger);

        let contents = std::fs::read_to_string(dir.path().join("gateway-api.log"))
            .expect("api log file exists");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines.iter().all(|line| line.contains("/orders?page=2")));
        assert!(lines.first().is_some_and(|line| line.contains("[INFO]")));
        assert!(lines.get(1).is_some_and(|line| line.contains("[WARN]")));
        assert!(lines.get(2).is_some_and(|line| line.contains("[ERROR]")));
        assert!(!contents.contains('\x1b'));
    }

    #[test]
    fn level_threshold_applies_to_file() {
        let dir = tempfile::tempdir().expect("temporary directory");
        let logger = AccessLogger::new(AccessLoggerConfig {
            level: Level::WARN,
            log_path: dir.path().to_path_buf(),
            log_file_base_name: "gateway".to_string(),
            console_output: false,
            ..AccessLoggerConfig::default()
        })
        .expect("access logger");

        logger.log(&entry(200));
        logger.log(&entry(404));
        drop(logger);

        let contents = std::fs::read_to_string(dir.path().join("gateway-api.log"))
            .expect("api log file exists");
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains(" 404 "));
    }

    #[test]
    fn global_access_logger_is_created_once() {
        let dir = tempfile::tempdir().expect("temporary directory");
        let config = |base_name: &str| AccessLoggerConfig {
            log_path: dir.path().to_path_buf(),
            log_file_base_name: base_name.to_string(),
            console_output: false,
            ..AccessLoggerConfig::default()
        };

        let (first, second) = std::thread::scope(|scope| {
            let first = scope.spawn(|| AccessLogger::global(config("edge")));
            let second = scope.spawn(|| AccessLogger::global(config("internal")));
            (
                first.join().expect("thread finished").expect("access logger"),
                second.join().expect("thread finished").expect("access logger"),
            )
        });

        assert!(std::ptr::eq(first, second));
        let created = ["edge-api.log", "internal-api.log"]
            .iter()
            .filter(|file_name| dir.path().join(file_name).exists())
            .count();
        assert_eq!(created, 1);
    }
}
