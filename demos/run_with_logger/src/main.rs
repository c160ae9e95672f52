//! Writes a greeting through a [`log_kit::Logger`] into `./logs/test-log-out.log`.

use log_kit::{Level, Logger, LoggerConfig, LoggerError};

fn main() -> Result<(), LoggerError> {
    let logger = Logger::new(LoggerConfig {
        level: Level::DEBUG,
        log_path: "./logs/".into(),
        log_file_base_name: "test-log".to_string(),
        date_time_format: "YYYY-MM-DD HH:mm:ss".to_string(),
        ..LoggerConfig::default()
    })?;

    logger.debug("Hello World!");
    Ok(())
}
