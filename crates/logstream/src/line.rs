// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Values flowing through the pipeline: lines, batches, sink entries and the
//! sink's ordering token.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use derive_more::{Display, From, Into};

use crate::constants::EVENT_OVERHEAD_BYTES;

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

/// A single line of workload output and the time it entered the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    text: String,
    timestamp_ms: i64,
}

impl LogLine {
    pub fn new(text: impl Into<String>) -> Self {
        Self::with_timestamp(text, now_millis())
    }

    pub fn with_timestamp(text: impl Into<String>, timestamp_ms: i64) -> Self {
        Self {
            text: text.into(),
            timestamp_ms,
        }
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    /// Size of the line in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.text.len()
    }
}

/// Consecutive lines merged into one sink entry. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogBatch {
    lines: Vec<LogLine>,
}

#[allow(clippy::len_without_is_empty)]
impl LogBatch {
    /// Returns `None` for an empty set of lines.
    #[must_use]
    pub fn new(lines: Vec<LogLine>) -> Option<Self> {
        if lines.is_empty() {
            None
        } else {
            Some(Self { lines })
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Lines joined with `\n`.
    #[must_use]
    pub fn message(&self) -> String {
        let mut message = String::with_capacity(self.message_size());
        for (i, line) in self.lines.iter().enumerate() {
            if i > 0 {
                message.push('\n');
            }
            message.push_str(line.text());
        }
        message
    }

    /// Byte size of [`LogBatch::message`] without building it.
    #[must_use]
    pub fn message_size(&self) -> usize {
        self.lines.iter().map(LogLine::size).sum::<usize>() + self.lines.len() - 1
    }

    /// Byte size the batch occupies in a write request.
    #[must_use]
    pub fn entry_size(&self) -> usize {
        self.message_size() + EVENT_OVERHEAD_BYTES
    }

    pub fn into_entry(self, timestamp_ms: i64) -> SinkEntry {
        SinkEntry {
            message: self.message(),
            timestamp_ms,
        }
    }
}

/// One timestamped event as submitted to the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkEntry {
    pub message: String,
    pub timestamp_ms: i64,
}

/// Opaque value the sink hands out after each write and expects on the next.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, From, Into)]
pub struct OrderingToken(String);

impl OrderingToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OrderingToken {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

/// A log group and stream pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    pub group: String,
    pub stream: String,
}

impl Destination {
    pub fn new(group: impl Into<String>, stream: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            stream: stream.into(),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(lines: &[&str]) -> LogBatch {
        LogBatch::new(lines.iter().map(|l| LogLine::with_timestamp(*l, 1)).collect())
            .expect("non-empty batch")
    }

    #[test]
    fn test_empty_batch_is_never_built() {
        assert!(LogBatch::new(Vec::new()).is_none());
    }

    #[test]
    fn test_message_joins_lines_with_newlines() {
        let batch = batch(&["a", "b", "c"]);
        assert_eq!(batch.message(), "a\nb\nc");
        assert_eq!(batch.message_size(), 5);
        assert_eq!(batch.entry_size(), 5 + EVENT_OVERHEAD_BYTES);
    }

    #[test]
    fn test_single_line_message_has_no_separator() {
        let batch = batch(&["only"]);
        assert_eq!(batch.message(), "only");
        assert_eq!(batch.message_size(), 4);
    }

    #[test]
    fn test_empty_lines_are_preserved() {
        let batch = batch(&["", "x", ""]);
        assert_eq!(batch.message(), "\nx\n");
        assert_eq!(batch.message_size(), 3);
    }

    #[test]
    fn test_into_entry_uses_given_timestamp() {
        let entry = batch(&["a", "b"]).into_entry(42);
        assert_eq!(
            entry,
            SinkEntry {
                message: "a\nb".to_string(),
                timestamp_ms: 42,
            }
        );
    }

    #[test]
    fn test_ordering_token_display_and_conversion() {
        let token = OrderingToken::from("4960");
        assert_eq!(token.to_string(), "4960");
        assert_eq!(token.as_str(), "4960");
        let raw: String = token.into();
        assert_eq!(raw, "4960");
    }

    #[test]
    fn test_destination_display() {
        assert_eq!(Destination::new("app", "web-1").to_string(), "app/web-1");
    }

    #[test]
    fn test_now_millis_is_after_2020() {
        assert!(now_millis() > 1_577_836_800_000);
    }
}
