//! Resolution of the source file that issued a log call.
//!
//! The file name is normally taken from the call site itself: [`Logger`][crate::Logger] methods
//! are `#[track_caller]` and record their caller's location, and events emitted through the
//! `tracing` macros carry their file in their metadata. As an alternative, the caller can be
//! found by scraping a captured backtrace, see [`CallerSource::Backtrace`].

use std::{backtrace::Backtrace, sync::LazyLock};

use regex::Regex;
use serde::Deserialize;

/// Caller tag used when no file name could be determined.
pub const UNKNOWN: &str = "unknown";

/// `at function (path:line:column)`
static FRAME_WITH_FUNCTION: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"^\s*at\s+(.*?)\s+\((.*):(\d+):(\d+)\)\s*$").expect("frame pattern is valid")
});

/// `at path:line:column`
static FRAME_WITH_PATH: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"^\s*at\s+(.*):(\d+):(\d+)\s*$").expect("frame pattern is valid")
});

/// Symbol line of a rendered Rust backtrace, e.g. `  12: my_app::handlers::run`
static FRAME_SYMBOL: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"^\s*\d+:\s+(.+?)\s*$").expect("symbol pattern is valid")
});

/// Symbol prefixes of frames that belong to the logging machinery rather than to the caller.
const INTERNAL_PREFIXES: &[&str] = &[
    "std::",
    "core::",
    "alloc::",
    "backtrace::",
    "tracing::",
    "tracing_core::",
    "tracing_subscriber::",
    concat!(env!("CARGO_CRATE_NAME"), "::"),
];

/// Strategy used to attribute a log line to its origin file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallerSource {
    /// Use the location of the call site: an explicit `caller` event field if present, the
    /// event's metadata otherwise.
    #[default]
    Callsite,

    /// Capture a backtrace on every event and pick the first frame outside the logging
    /// machinery. Requires debug info and is considerably slower.
    Backtrace,
}

/// A stack frame description parsed from a single line of a stack trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    /// The function name, if it was part of the frame line.
    pub function: Option<&'a str>,

    /// The source path of the frame.
    pub path: &'a str,
}

/// Parses a frame line of the form `at function (path:line:column)` or `at path:line:column`.
pub fn parse_frame(line: &str) -> Option<Frame<'_>> {
    if let Some(captures) = FRAME_WITH_FUNCTION.captures(line) {
        return Some(Frame {
            function: captures.get(1).map(|m| m.as_str()),
            path: captures.get(2)?.as_str(),
        });
    }

    FRAME_WITH_PATH.captures(line).and_then(|captures| {
        Some(Frame {
            function: None,
            path: captures.get(1)?.as_str(),
        })
    })
}

/// Returns the last component of a `/` or `\` separated path, or [`UNKNOWN`] if there is none.
pub fn base_name(path: &str) -> &str {
    path.rsplit(['/', '\\'])
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or(UNKNOWN)
}

/// Finds the caller's file name in a rendered stack trace.
///
/// Frames are visited innermost first. Frames whose function belongs to the standard library,
/// the `tracing` crates or this crate are skipped, the base name of the first remaining frame is
/// returned. Yields [`UNKNOWN`] if no frame qualifies.
pub fn resolve_from_trace(trace: &str) -> String {
    let mut symbol = None;

    for line in trace.lines() {
        if let Some(frame) = parse_frame(line) {
            let function = frame.function.or(symbol);
            if !function.is_some_and(is_logging_internal) && !frame.path.starts_with("/rustc/") {
                return base_name(frame.path).to_owned();
            }
        } else if let Some(captures) = FRAME_SYMBOL.captures(line) {
            symbol = captures.get(1).map(|m| m.as_str());
        }
    }

    UNKNOWN.to_owned()
}

/// Captures a backtrace of the current thread and resolves the caller's file name from it.
pub fn capture() -> String {
    resolve_from_trace(&Backtrace::force_capture().to_string())
}

fn is_logging_internal(function: &str) -> bool {
    let function = function.trim_start_matches('<');
    INTERNAL_PREFIXES
        .iter()
        .any(|prefix| function.starts_with(prefix))
}
