//! The application [`Logger`].

use std::{
    error::Error,
    fmt,
    panic::Location,
    sync::{Arc, Mutex, OnceLock},
};

use tracing::{Dispatch, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;

use super::{build_logging_components, config::LoggerConfig, get_or_try_init, LoggerError};

static GLOBAL_LOGGER: OnceLock<Logger> = OnceLock::new();
static GLOBAL_LOGGER_INIT: Mutex<()> = Mutex::new(());

/// Emits an event at a level only known at runtime.
macro_rules! dispatch_event {
    ($dispatch:expr, $level:expr, $($fields:tt)+) => {
        tracing::dispatcher::with_default($dispatch, || match $level {
            Level::ERROR => tracing::error!($($fields)+),
            Level::WARN => tracing::warn!($($fields)+),
            Level::INFO => tracing::info!($($fields)+),
            Level::DEBUG => tracing::debug!($($fields)+),
            _ => tracing::trace!($($fields)+),
        })
    };
}

/// A logger writing to the console, to `<base>-out.log` and, for errors, to `<base>-err.log`.
///
/// Every line is tagged with the base name of the source file that issued it.
///
/// The logger owns its own [`Dispatch`] and does not touch the global `tracing` subscriber.
/// It is meant to be created once at startup and handed to the parts of the application that
/// log; cloning is cheap and clones share the same sinks. Pending lines are written out when
/// the last clone is dropped.
#[derive(Clone)]
pub struct Logger {
    inner: Arc<Inner>,
}

struct Inner {
    dispatch: Dispatch,
    _guards: Vec<WorkerGuard>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").finish_non_exhaustive()
    }
}

impl Logger {
    /// Creates a logger with the sinks described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`LoggerError`] if the timestamp pattern or filtering directive is invalid, or
    /// if a log file cannot be created.
    pub fn new(config: LoggerConfig) -> Result<Self, LoggerError> {
        let components = build_logging_components(&config)?;
        let dispatch = Dispatch::new(tracing_subscriber::registry().with(components.layers));

        Ok(Self {
            inner: Arc::new(Inner {
                dispatch,
                _guards: components.guards,
            }),
        })
    }

    /// The dispatcher of this logger.
    ///
    /// It can be installed as the global default with
    /// [`tracing::dispatcher::set_global_default`], so that events emitted through the `tracing`
    /// macros are written to the same sinks.
    pub fn dispatch(&self) -> &Dispatch {
        &self.inner.dispatch
    }

    /// Logs a message at the `DEBUG` level.
    #[track_caller]
    pub fn debug(&self, message: impl fmt::Display) {
        self.log(Level::DEBUG, message);
    }

    /// Logs a message at the `INFO` level.
    #[track_caller]
    pub fn info(&self, message: impl fmt::Display) {
        self.log(Level::INFO, message);
    }

    /// Logs a message at the `WARN` level.
    #[track_caller]
    pub fn warn(&self, message: impl fmt::Display) {
        self.log(Level::WARN, message);
    }

    /// Logs a message at the `ERROR` level.
    #[track_caller]
    pub fn error(&self, message: impl fmt::Display) {
        self.log(Level::ERROR, message);
    }

    /// Logs a message at the given level.
    #[track_caller]
    pub fn log(&self, level: Level, message: impl fmt::Display) {
        let caller = Location::caller().file();
        dispatch_event!(&self.inner.dispatch, level, caller, "{message}");
    }

    /// Logs an error at the `ERROR` level, followed by the chain of its sources.
    #[track_caller]
    pub fn report(&self, error: &(dyn Error + 'static)) {
        let caller = Location::caller().file();
        tracing::dispatcher::with_default(&self.inner.dispatch, || {
            tracing::error!(caller, error);
        });
    }
}

/// Returns the process-wide logger, creating it from `config` on the first call.
///
/// Every later call returns the same logger and ignores its `config`, including calls racing
/// with the first one. Prefer creating a
/// [`Logger`] with [`Logger::new`] and passing it around explicitly.
///
/// # Errors
///
/// Returns [`LoggerError`] if the logger has to be created and creation fails.
pub fn global_logger(config: LoggerConfig) -> Result<&'static Logger, LoggerError> {
    get_or_try_init(&GLOBAL_LOGGER, &GLOBAL_LOGGER_INIT, || Logger::new(config))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use std::{
        fs, io,
        path::Path,
        sync::Barrier,
        thread,
    };

    use super::*;
    use crate::config::ColorMode;

    fn config(directory: &Path, base_name: &str) -> LoggerConfig {
        LoggerConfig {
            log_path: directory.to_path_buf(),
            log_file_base_name: base_name.to_string(),
            color: ColorMode::Never,
            console_output: false,
            ..LoggerConfig::default()
        }
    }

    fn read(directory: &Path, file_name: &str) -> String {
        fs::read_to_string(directory.join(file_name)).expect("log file exists")
    }

    #[test]
    fn routes_levels_to_files() {
        let dir = tempfile::tempdir().expect("temporary directory");
        let logger = Logger::new(config(dir.path(), "test-log")).expect("logger");

        logger.debug("This is a debug message");
        logger.info("This is an info message");
        logger.warn("This is a warning message");
        logger.error("This is an error message");
        drop(logger);

        let out = read(dir.path(), "test-log-out.log");
        assert!(out.contains("[DEBUG] [logger.rs] This is a debug message"));
        assert!(out.contains("[INFO] [logger.rs] This is an info message"));
        assert!(out.contains("[WARN] [logger.rs] This is a warning message"));
        assert!(out.contains("[ERROR] [logger.rs] This is an error message"));

        let err = read(dir.path(), "test-log-err.log");
        assert!(err.contains("This is an error message"));
        assert!(!err.contains("This is an info message"));
        assert!(!err.contains("This is a warning message"));
        assert_eq!(err.lines().count(), 1);
    }

    #[test]
    fn level_threshold_drops_lower_levels() {
        let dir = tempfile::tempdir().expect("temporary directory");
        let logger = Logger::new(LoggerConfig {
            level: Level::WARN,
            ..config(dir.path(), "quiet")
        })
        .expect("logger");

        logger.debug("cache miss");
        logger.info("request served");
        logger.warn("slow response");
        drop(logger);

        let out = read(dir.path(), "quiet-out.log");
        assert!(!out.contains("cache miss"));
        assert!(!out.contains("request served"));
        assert!(out.contains("slow response"));
    }

    #[test]
    fn clones_share_sinks() {
        let dir = tempfile::tempdir().expect("temporary directory");
        let logger = Logger::new(config(dir.path(), "shared")).expect("logger");
        let worker = logger.clone();

        logger.info("from main");
        worker.info("from worker");
        drop(logger);
        drop(worker);

        let out = read(dir.path(), "shared-out.log");
        assert!(out.contains("from main"));
        assert!(out.contains("from worker"));
    }

    #[test]
    fn reports_error_chains() {
        let dir = tempfile::tempdir().expect("temporary directory");
        let logger = Logger::new(config(dir.path(), "report")).expect("logger");

        let error = io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused");
        logger.report(&error);
        drop(logger);

        let err = read(dir.path(), "report-err.log");
        assert!(err.contains("[ERROR] [logger.rs] connection refused"));
    }

    #[test]
    fn invalid_filtering_directive_is_rejected() {
        let dir = tempfile::tempdir().expect("temporary directory");
        let result = Logger::new(LoggerConfig {
            filtering_directive: Some("my_crate=loud".to_string()),
            ..config(dir.path(), "invalid")
        });
        assert!(matches!(
            result,
            Err(LoggerError::InvalidFilteringDirective(_))
        ));
    }

    #[test]
    fn file_sinks_stay_plain_when_console_is_colored() {
        let dir = tempfile::tempdir().expect("temporary directory");
        let logger = Logger::new(LoggerConfig {
            color: ColorMode::Always,
            console_output: true,
            ..config(dir.path(), "colored")
        })
        .expect("logger");

        logger.warn("disk almost full");
        logger.error("disk full");
        drop(logger);

        let out = read(dir.path(), "colored-out.log");
        assert!(out.contains("[WARN] [logger.rs] disk almost full"));
        assert!(!out.contains('\x1b'));
        assert!(!read(dir.path(), "colored-err.log").contains('\x1b'));
    }

    #[test]
    fn global_logger_is_created_once() {
        let dir = tempfile::tempdir().expect("temporary directory");
        let base_names = ["first", "second", "third", "fourth"];
        let barrier = Barrier::new(base_names.len());

        let loggers: Vec<&'static Logger> = thread::scope(|scope| {
            let handles: Vec<_> = base_names
                .iter()
                .map(|base_name| {
                    let barrier = &barrier;
                    let config = config(dir.path(), base_name);
                    scope.spawn(move || {
                        barrier.wait();
                        global_logger(config).expect("global logger")
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().expect("thread finished"))
                .collect()
        });

        assert!(loggers
            .windows(2)
            .all(|pair| matches!(pair, [a, b] if std::ptr::eq(*a, *b))));

        let created = base_names
            .iter()
            .filter(|base_name| dir.path().join(format!("{base_name}-out.log")).exists())
            .count();
        assert_eq!(created, 1);

        let later = global_logger(config(dir.path(), "later")).expect("global logger");
        assert!(loggers.first().is_some_and(|first| std::ptr::eq(*first, later)));
        assert!(!dir.path().join("later-out.log").exists());
    }
}
