//! Configuration for the application logger and the HTTP access logger.
//!
//! Both configurations can be deserialized from an options map with camelCase keys; keys that
//! are not provided take their default values.

use std::{num::NonZeroUsize, path::PathBuf, str::FromStr};

use colored::control::ShouldColorize;
use serde::{Deserialize, Deserializer};
use tracing::Level;
use tracing_appender::rolling::Rotation;

use super::{caller::CallerSource, LoggerError};

/// Default timestamp pattern of log lines.
pub const DEFAULT_DATE_TIME_FORMAT: &str = "YYYY-MM-DD HH:mm:ss";

/// Default directory for log files.
pub const DEFAULT_LOG_PATH: &str = "./logs/";

/// Configuration of the application [`Logger`][crate::Logger].
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoggerConfig {
    /// Minimum level written to the console and to the `-out.log` file.
    #[serde(deserialize_with = "deserialize_level")]
    pub level: Level,

    /// Directory where log files will be stored.
    pub log_path: PathBuf,

    /// Prefix for log file names: `<base>-out.log` and `<base>-err.log`.
    pub log_file_base_name: String,

    /// Timestamp pattern, e.g. `YYYY-MM-DD HH:mm:ss`.
    pub date_time_format: String,

    /// Whether console output is colored.
    pub color: ColorMode,

    /// How the caller file of each line is determined.
    pub caller_source: CallerSource,

    /// Whether lines are also written to standard output.
    pub console_output: bool,

    /// Rotation strategy for log files.
    pub file_rotation: FileRotation,

    /// Maximum number of rotated log files to keep. If `None`, all files are kept.
    pub max_log_files: Option<NonZeroUsize>,

    /// [`EnvFilter`][tracing_subscriber::EnvFilter] directive (e.g. `"info,my_crate=debug"`)
    /// for the console and `-out.log` sinks, with `level` as the default directive.
    pub filtering_directive: Option<String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: Level::DEBUG,
            log_path: PathBuf::from(DEFAULT_LOG_PATH),
            log_file_base_name: "out".to_string(),
            date_time_format: DEFAULT_DATE_TIME_FORMAT.to_string(),
            color: ColorMode::default(),
            caller_source: CallerSource::default(),
            console_output: true,
            file_rotation: FileRotation::default(),
            max_log_files: None,
            filtering_directive: None,
        }
    }
}

/// Configuration of the [`AccessLogger`][crate::AccessLogger].
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AccessLoggerConfig {
    /// Minimum level written to the console and to the `-api.log` file.
    #[serde(deserialize_with = "deserialize_level")]
    pub level: Level,

    /// Directory where the log file will be stored.
    pub log_path: PathBuf,

    /// Prefix for the log file name: `<base>-api.log`.
    pub log_file_base_name: String,

    /// Timestamp pattern, e.g. `YYYY-MM-DD HH:mm:ss`.
    pub date_time_format: String,

    /// Whether console output is colored.
    pub color: ColorMode,

    /// Whether lines are also written to standard output.
    pub console_output: bool,

    /// Rotation strategy for the log file.
    pub file_rotation: FileRotation,

    /// Maximum number of rotated log files to keep. If `None`, all files are kept.
    pub max_log_files: Option<NonZeroUsize>,
}

impl Default for AccessLoggerConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            log_path: PathBuf::from(DEFAULT_LOG_PATH),
            log_file_base_name: "app".to_string(),
            date_time_format: DEFAULT_DATE_TIME_FORMAT.to_string(),
            color: ColorMode::default(),
            console_output: true,
            file_rotation: FileRotation::default(),
            max_log_files: None,
        }
    }
}

/// Controls the use of ANSI colors on the console. Files are never colored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    /// Follow the environment: `CLICOLOR`, `CLICOLOR_FORCE`, `NO_COLOR` and whether standard
    /// output is a terminal.
    #[default]
    Auto,

    /// Always emit colors.
    Always,

    /// Never emit colors.
    Never,
}

impl ColorMode {
    /// Resolves whether console output should be colored.
    pub fn resolve(self) -> bool {
        match self {
            Self::Auto => ShouldColorize::from_env().should_colorize(),
            Self::Always => true,
            Self::Never => false,
        }
    }
}

/// Rotation strategy for log files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileRotation {
    /// A single file that is appended to forever.
    #[default]
    Never,

    /// A new file every minute.
    Minutely,

    /// A new file every hour.
    Hourly,

    /// A new file every day.
    Daily,
}

impl From<FileRotation> for Rotation {
    fn from(rotation: FileRotation) -> Self {
        match rotation {
            FileRotation::Never => Self::NEVER,
            FileRotation::Minutely => Self::MINUTELY,
            FileRotation::Hourly => Self::HOURLY,
            FileRotation::Daily => Self::DAILY,
        }
    }
}

/// Parses a level name such as `"debug"` or `"WARN"`.
///
/// # Errors
///
/// Returns [`LoggerError::Configuration`] if the name is not a known level.
pub fn parse_level(level: &str) -> Result<Level, LoggerError> {
    Level::from_str(level.trim())
        .map_err(|_| LoggerError::Configuration(format!("Unknown log level `{level}`")))
}

fn deserialize_level<'de, D>(deserializer: D) -> Result<Level, D::Error>
where
    D: Deserializer<'de>,
{
    let level = String::deserialize(deserializer)?;
    parse_level(&level).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use serde_json::json;

    use super::*;

    #[test]
    fn logger_defaults() {
        let config = LoggerConfig::default();
        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.log_path, PathBuf::from("./logs/"));
        assert_eq!(config.log_file_base_name, "out");
        assert_eq!(config.date_time_format, "YYYY-MM-DD HH:mm:ss");
        assert_eq!(config.caller_source, CallerSource::Callsite);
    }

    #[test]
    fn access_logger_defaults() {
        let config = AccessLoggerConfig::default();
        assert_eq!(config.level, Level::INFO);
        assert_eq!(config.log_file_base_name, "app");
    }

    #[test]
    fn options_map_fills_unset_keys_with_defaults() {
        let config: LoggerConfig = serde_json::from_value(json!({
            "level": "warn",
            "logFileBaseName": "billing",
            "color": "never",
        }))
        .expect("valid options");

        assert_eq!(config.level, Level::WARN);
        assert_eq!(config.log_file_base_name, "billing");
        assert_eq!(config.color, ColorMode::Never);
        assert_eq!(config.log_path, PathBuf::from(DEFAULT_LOG_PATH));
        assert_eq!(config.date_time_format, DEFAULT_DATE_TIME_FORMAT);
        assert!(config.console_output);
    }

    #[test]
    fn unknown_level_is_rejected() {
        let result = serde_json::from_value::<AccessLoggerConfig>(json!({ "level": "verbose" }));
        assert!(result.is_err());
        assert!(matches!(
            parse_level("verbose"),
            Err(LoggerError::Configuration(_))
        ));
    }

    #[test]
    fn explicit_color_modes() {
        assert!(ColorMode::Always.resolve());
        assert!(!ColorMode::Never.resolve());
    }
}
