//! Capturing of event fields into a [`Storage`] that the formatting layer renders from.

use std::{collections::BTreeMap, error::Error, fmt, fmt::Write as _};

use tracing::field::{Field, Visit};

use super::keys;

/// Holds the key-value data recorded for an event.
#[derive(Clone, Debug, Default)]
pub(crate) struct Storage<'a> {
    /// Additional fields, ordered by key.
    values: BTreeMap<&'a str, serde_json::Value>,

    /// The primary message of the event, if captured.
    message: Option<String>,

    /// The caller file explicitly recorded on the event, if any.
    caller: Option<String>,

    /// An error value recorded on the event, rendered with its chain of sources.
    error: Option<String>,
}

impl<'a> Storage<'a> {
    fn record_value(&mut self, key: &'a str, value: serde_json::Value) {
        self.values.insert(key, value);
    }

    pub(crate) fn values(&self) -> &BTreeMap<&'a str, serde_json::Value> {
        &self.values
    }

    pub(crate) fn value(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    pub(crate) fn caller(&self) -> Option<&str> {
        self.caller.as_deref()
    }

    /// The rendered message: the event message, the recorded error, or both joined by `: `.
    pub(crate) fn message(&self) -> Option<String> {
        match (&self.message, &self.error) {
            (Some(message), Some(error)) => Some(format!("{message}: {error}")),
            (Some(message), None) => Some(message.clone()),
            (None, Some(error)) => Some(error.clone()),
            (None, None) => None,
        }
    }

    fn record_message(&mut self, field: &Field, value: impl fmt::Display) -> bool {
        match field.name() {
            keys::MESSAGE => {
                if self.message.is_none() {
                    self.message = Some(value.to_string());
                }
                true
            }
            keys::CALLER => {
                self.caller = Some(value.to_string());
                true
            }
            _ => false,
        }
    }
}

/// Renders an error followed by one `caused by:` line per source in its chain.
pub(crate) fn render_error_chain(error: &(dyn Error + 'static)) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let _ = write!(rendered, "\n    caused by: {cause}");
        source = cause.source();
    }
    rendered
}

impl Visit for Storage<'_> {
    fn record_f64(&mut self, field: &Field, value: f64) {
        if !self.record_message(field, value) {
            self.record_value(field.name(), serde_json::Value::from(value));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        if !self.record_message(field, value) {
            self.record_value(field.name(), serde_json::Value::from(value));
        }
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        if !self.record_message(field, value) {
            self.record_value(field.name(), serde_json::Value::from(value));
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        if !self.record_message(field, value) {
            self.record_value(field.name(), serde_json::Value::from(value));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == keys::MESSAGE {
            self.message = Some(value.to_string()); // `record_str()` is preferred for `message`
        } else if !self.record_message(field, value) {
            self.record_value(field.name(), serde_json::Value::from(value));
        }
    }

    fn record_error(&mut self, field: &Field, value: &(dyn Error + 'static)) {
        let rendered = render_error_chain(value);
        if field.name() == keys::ERROR {
            self.error = Some(rendered);
        } else {
            self.record_value(field.name(), serde_json::Value::from(rendered));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == keys::MESSAGE {
            if self.message.is_none() {
                // Only use debug if `record_str()` hasn't set it
                self.message = Some(format!("{value:?}"));
            }
            return;
        }

        match field.name() {
            keys::CALLER => self.caller = Some(format!("{value:?}")),
            // Skip fields which are already handled
            name if name.starts_with("log.") => (),
            name => {
                let name = name.strip_prefix("r#").unwrap_or(name);
                self.record_value(name, serde_json::Value::from(format!("{value:?}")));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[derive(Debug)]
    struct Outer(io::Error);

    impl fmt::Display for Outer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("failed to load settings")
        }
    }

    impl Error for Outer {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn renders_error_sources() {
        let error = Outer(io::Error::new(io::ErrorKind::NotFound, "settings.toml missing"));
        assert_eq!(
            render_error_chain(&error),
            "failed to load settings\n    caused by: settings.toml missing"
        );
    }

    #[test]
    fn message_combines_text_and_error() {
        let storage = Storage {
            message: Some("startup aborted".to_string()),
            error: Some("disk full".to_string()),
            ..Storage::default()
        };
        assert_eq!(
            storage.message().as_deref(),
            Some("startup aborted: disk full")
        );

        let storage = Storage::default();
        assert_eq!(storage.message(), None);
    }
}
