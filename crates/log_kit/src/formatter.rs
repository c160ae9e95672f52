//! Provides the [`format_line`] function and a [`tracing_subscriber::Layer`]
//! ([`TextFormattingLayer`]) that writes one formatted line per event.

use std::{fmt::Write as _, io::Write};

use colored::Color;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::{fmt::MakeWriter, layer::Context, Layer};

use super::{
    access_log::AccessLogEntry,
    caller::{self, CallerSource},
    storage::Storage,
    timestamp::DateTimeFormat,
};

/// A log record, ready to be formatted.
#[derive(Debug, Clone, Copy)]
pub struct LogRecord<'a> {
    /// Severity of the record.
    pub level: Level,

    /// The message text.
    pub message: &'a str,

    /// The formatted timestamp.
    pub timestamp: &'a str,

    /// Base name of the file that issued the record. `None` omits the caller segment.
    pub caller_file: Option<&'a str>,
}

/// Formats a record as `[timestamp] [LEVEL] [caller] message`, or `[timestamp] [LEVEL] message`
/// if the record has no caller file.
///
/// ```
/// use log_kit::{format_line, Level, LogRecord};
///
/// let record = LogRecord {
///     level: Level::WARN,
///     message: "disk almost full",
///     timestamp: "2024-03-09 07:05:01",
///     caller_file: Some("main.rs"),
/// };
/// assert_eq!(
///     format_line(&record, false),
///     "[2024-03-09 07:05:01] [WARN] [main.rs] disk almost full"
/// );
/// ```
pub fn format_line(record: &LogRecord<'_>, colored: bool) -> String {
    let timestamp = paint(&format!("[{}]", record.timestamp), Color::White, colored);
    let level = level_tag(record.level, colored);

    match record.caller_file {
        Some(file) => format!(
            "{timestamp} {level} {} {}",
            paint(&format!("[{file}]"), Color::Cyan, colored),
            record.message
        ),
        None => format!("{timestamp} {level} {}", record.message),
    }
}

/// The bracketed tag of a level. Levels without a tag are rendered as their plain name.
pub fn level_tag(level: Level, colored: bool) -> String {
    match level {
        Level::DEBUG => paint("[DEBUG]", Color::BrightBlack, colored),
        Level::INFO => paint("[INFO]", Color::White, colored),
        Level::WARN => paint("[WARN]", Color::Yellow, colored),
        Level::ERROR => paint("[ERROR]", Color::Red, colored),
        _ => level.as_str().to_ascii_lowercase(),
    }
}

/// Wraps `text` in the escape sequences of `color` if `colored` is set.
///
/// `colored::Colorize` obeys a process-wide override, while each sink decides on its own here.
pub(crate) fn paint(text: &str, color: Color, colored: bool) -> String {
    if colored {
        format!("\x1b[{}m{text}\x1b[0m", color.to_fg_str())
    } else {
        text.to_string()
    }
}

/// Describes which kind of line a [`TextFormattingLayer`] produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineKind {
    /// Application lines, tagged with the caller file resolved using the given source.
    Application(CallerSource),

    /// HTTP access lines built from the fields of access events, without caller tag.
    Access,
}

/// A [`tracing_subscriber::Layer`] that formats each event into a single text line and writes it
/// to the destination obtained from a [`MakeWriter`].
#[derive(Debug)]
pub struct TextFormattingLayer<W>
where
    W: for<'a> MakeWriter<'a> + 'static,
{
    dst_writer: W,
    kind: LineKind,
    date_time_format: DateTimeFormat,
    colored: bool,
}

impl<W> TextFormattingLayer<W>
where
    W: for<'a> MakeWriter<'a> + 'static,
{
    /// Creates a new [`TextFormattingLayer`] writing lines of the given kind.
    pub fn new(
        kind: LineKind,
        date_time_format: DateTimeFormat,
        dst_writer: W,
        colored: bool,
    ) -> Self {
        Self {
            dst_writer,
            kind,
            date_time_format,
            colored,
        }
    }

    fn format_event(&self, event: &Event<'_>) -> String {
        let mut storage = Storage::default();
        event.record(&mut storage);

        let timestamp = self.date_time_format.now();

        match self.kind {
            LineKind::Access => {
                let entry = AccessLogEntry::from_storage(&storage);
                let message = entry.format(self.colored);
                format_line(
                    &LogRecord {
                        level: *event.metadata().level(),
                        message: &message,
                        timestamp: &timestamp,
                        caller_file: None,
                    },
                    self.colored,
                )
            }
            LineKind::Application(caller_source) => {
                let caller_file = match caller_source {
                    CallerSource::Callsite => storage
                        .caller()
                        .or(event.metadata().file())
                        .map_or(caller::UNKNOWN, caller::base_name)
                        .to_string(),
                    CallerSource::Backtrace => caller::capture(),
                };
                let message = Self::event_message(event, &storage);
                format_line(
                    &LogRecord {
                        level: *event.metadata().level(),
                        message: &message,
                        timestamp: &timestamp,
                        caller_file: Some(&caller_file),
                    },
                    self.colored,
                )
            }
        }
    }

    /// The event message followed by any additional fields as `key=value` pairs.
    ///
    /// Events without a message use their target instead.
    fn event_message(event: &Event<'_>, storage: &Storage<'_>) -> String {
        let mut message = storage
            .message()
            .unwrap_or_else(|| event.metadata().target().to_string());

        for (key, value) in storage.values() {
            let _ = match value {
                serde_json::Value::String(text) => write!(message, " {key}={text}"),
                other => write!(message, " {key}={other}"),
            };
        }

        message
    }

    /// Writes the line with a trailing newline.
    ///
    /// Should be done by a single `write_all` call to avoid fragmentation of log because of
    /// multithreading.
    fn flush(&self, line: String) -> Result<(), std::io::Error> {
        let mut buffer = line.into_bytes();
        buffer.push(b'\n');
        self.dst_writer.make_writer().write_all(&buffer)
    }
}

impl<S, W> Layer<S> for TextFormattingLayer<W>
where
    S: Subscriber,
    W: for<'a> MakeWriter<'a> + 'static,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let line = self.format_event(event);
        let _ = self.flush(line);
    }
}
