//! Bounded history of connection and message events.
//!
//! This is the user-facing log shown by the dashboard. Entries are kept
//! newest-first and the log never holds more than [`CAPACITY`] of them.

use std::collections::VecDeque;
use std::fmt;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Serialize;

/// Maximum number of entries retained
pub const CAPACITY: usize = 50;

/// What kind of event an entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LogCategory {
    /// A command published to the broker
    Sent,
    /// A message delivered by the broker
    Received,
    /// Connection lifecycle and failures
    System,
}

/// A single immutable log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    /// Unix-millisecond timestamp plus a random disambiguator
    pub id: String,
    /// Unix timestamp in milliseconds
    pub timestamp_ms: u64,
    pub message: String,
    pub category: LogCategory,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)
    }
}

#[derive(Debug, Clone, Default)]
pub struct EventLog {
    entries: VecDeque<LogEntry>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event, evicting the oldest entry once the log is full
    ///
    /// Every entry is mirrored to tracing so the operator log carries the
    /// same history.
    pub fn append(&mut self, message: impl Into<String>, category: LogCategory) -> &LogEntry {
        let message = message.into();
        match category {
            LogCategory::System => tracing::info!(category = %category, "{}", message),
            _ => tracing::debug!(category = %category, "{}", message),
        }

        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        let entry = LogEntry {
            id: format!("{}-{:08x}", timestamp_ms, rand::random::<u32>()),
            timestamp_ms,
            message,
            category,
        };

        self.entries.push_front(entry);
        self.entries.truncate(CAPACITY);
        &self.entries[0]
    }

    /// Entries, newest first
    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&LogEntry> {
        self.entries.front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_vec(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_is_newest_first() {
        let mut log = EventLog::new();
        log.append("first", LogCategory::System);
        log.append("second", LogCategory::Sent);

        let messages: Vec<_> = log.entries().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["second", "first"]);
        assert_eq!(log.latest().unwrap().category, LogCategory::Sent);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut log = EventLog::new();
        for i in 0..CAPACITY {
            log.append(format!("event {}", i), LogCategory::Received);
        }
        assert_eq!(log.len(), CAPACITY);
        assert!(log.entries().any(|e| e.message == "event 0"));

        log.append("event 50", LogCategory::Received);
        assert_eq!(log.len(), CAPACITY);
        assert!(!log.entries().any(|e| e.message == "event 0"));
        assert_eq!(log.entries().last().unwrap().message, "event 1");
        assert_eq!(log.latest().unwrap().message, "event 50");
    }

    #[test]
    fn test_ids_are_distinct() {
        let mut log = EventLog::new();
        for _ in 0..20 {
            log.append("burst", LogCategory::System);
        }
        let mut ids: Vec<_> = log.entries().map(|e| e.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 20);
    }

    #[test]
    fn test_entry_display() {
        let mut log = EventLog::new();
        let entry = log.append("casa/sala/luz: ON", LogCategory::Sent);
        insta::assert_snapshot!(entry.to_string(), @"[sent] casa/sala/luz: ON");
    }

    #[test]
    fn test_category_serializes_lowercase() {
        let json = serde_json::to_string(&LogCategory::Received).unwrap();
        assert_eq!(json, "\"received\"");
    }
}
