use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Token counts attached to a single usage event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub cache_create: u64,
    pub cache_read: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input + self.output + self.cache_create + self.cache_read
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Where an event came from. Primary data always wins over supplementary
/// roll-ups when both describe the same period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOrigin {
    /// One line of a raw per-message log.
    Primary,
    /// An hourly aggregate for one project.
    Supplementary,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimestampedEvent {
    pub ts: DateTime<Utc>,
    pub project: String,
    pub usage: TokenUsage,
    pub model: Option<String>,
    /// Log line type (`assistant`, `system`, `user`, ...).
    pub event_type: String,
    pub origin: EventOrigin,
    /// Message text.
    pub content: Option<String>,
    /// Provider-generated line (API error or system message). Only these are
    /// scanned for rate-limit notifications.
    pub is_notice: bool,
}

impl TimestampedEvent {
    pub fn is_hour_granularity(&self) -> bool {
        self.origin == EventOrigin::Supplementary
    }
}

/// A raw log record as handed over by the ingestion layer. The timestamp is
/// still the ISO-8601 string found on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawMessage {
    pub timestamp: String,
    pub project: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub usage: TokenUsage,
    #[serde(default = "default_event_type")]
    pub event_type: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub is_notice: bool,
}

/// Usage rolled up per project and hour.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HourlyAggregate {
    /// Start of the hour, ISO-8601.
    pub hour: String,
    pub project: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub usage: TokenUsage,
}

fn default_event_type() -> String {
    "assistant".to_string()
}
