//! Timestamp rendering for log lines.
//!
//! Patterns are written in the familiar `YYYY-MM-DD HH:mm:ss` token style and compiled once into
//! a [`time`] format description.

use time::{
    format_description::{self, OwnedFormatItem},
    OffsetDateTime, UtcOffset,
};

use super::LoggerError;

/// Token translations, longest tokens first so that `YYYY` wins over `YY`.
const TOKENS: &[(&str, &str)] = &[
    ("YYYY", "[year]"),
    ("SSS", "[subsecond digits:3]"),
    ("YY", "[year repr:last_two]"),
    ("MM", "[month]"),
    ("DD", "[day]"),
    ("HH", "[hour]"),
    ("hh", "[hour repr:12]"),
    ("mm", "[minute]"),
    ("ss", "[second]"),
    ("ZZ", "[offset_hour sign:mandatory][offset_minute]"),
    ("Z", "[offset_hour sign:mandatory]:[offset_minute]"),
    ("A", "[period]"),
];

/// A compiled timestamp pattern.
#[derive(Debug, Clone)]
pub struct DateTimeFormat {
    pattern: String,
    description: OwnedFormatItem,
    offset: UtcOffset,
}

impl DateTimeFormat {
    /// Compiles a `YYYY-MM-DD HH:mm:ss` style pattern.
    ///
    /// Text enclosed in square brackets is copied verbatim, e.g. `YYYY-MM-DD[T]HH:mm`.
    ///
    /// The local UTC offset is determined here, once. It falls back to UTC when it cannot be
    /// determined, which some platforms do as soon as the process has several threads, so
    /// formats are best compiled early during startup.
    ///
    /// # Errors
    ///
    /// Returns [`LoggerError::InvalidDateTimeFormat`] if the translated pattern is rejected by
    /// the [`time`] crate.
    pub fn parse(pattern: &str) -> Result<Self, LoggerError> {
        let description = format_description::parse_owned::<1>(&translate(pattern))?;
        Ok(Self {
            pattern: pattern.to_owned(),
            description,
            offset: UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC),
        })
    }

    /// The pattern this format was compiled from.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Formats the given date and time. Formatting failures yield an empty string.
    pub fn format(&self, date_time: OffsetDateTime) -> String {
        date_time.format(&self.description).unwrap_or_default()
    }

    /// The UTC offset used by [`DateTimeFormat::now`].
    pub fn offset(&self) -> UtcOffset {
        self.offset
    }

    /// Formats the current time in the offset resolved by [`DateTimeFormat::parse`].
    pub fn now(&self) -> String {
        self.format(OffsetDateTime::now_utc().to_offset(self.offset))
    }
}

/// Translates a token-style pattern into a version 1 `time` format description.
fn translate(pattern: &str) -> String {
    let mut translated = String::with_capacity(pattern.len() * 2);
    let mut rest = pattern;

    'outer: while let Some(ch) = rest.chars().next() {
        for (token, replacement) in TOKENS {
            if let Some(remaining) = rest.strip_prefix(token) {
                translated.push_str(replacement);
                rest = remaining;
                continue 'outer;
            }
        }

        if ch == '[' {
            // Bracketed literal text, e.g. `[T]`
            let literal_end = rest.find(']');
            let (literal, remaining) = match literal_end {
                Some(end) => (rest.get(1..end).unwrap_or_default(), rest.get(end + 1..)),
                None => (rest.get(1..).unwrap_or_default(), None),
            };
            push_literal(&mut translated, literal);
            rest = remaining.unwrap_or_default();
            continue;
        }

        let (literal, remaining) = rest.split_at(ch.len_utf8());
        push_literal(&mut translated, literal);
        rest = remaining;
    }

    translated
}

fn push_literal(translated: &mut String, literal: &str) {
    // An opening bracket starts a component in version 1 descriptions and is escaped by doubling
    translated.push_str(&literal.replace('[', "[["));
}
