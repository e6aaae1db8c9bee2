use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Evidence a window was derived from. The set is closed: each variant has
/// exactly one detection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowSource {
    HistoryLimit,
    LimitMessage,
    ContinuousActivity,
    HistoryAccount,
    ActiveWindow,
    Gap,
    FirstMessage,
}

impl WindowSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            WindowSource::HistoryLimit => "history_limit",
            WindowSource::LimitMessage => "limit_message",
            WindowSource::ContinuousActivity => "continuous_activity",
            WindowSource::HistoryAccount => "history_account",
            WindowSource::ActiveWindow => "active_window",
            WindowSource::Gap => "gap",
            WindowSource::FirstMessage => "first_message",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "history_limit" => WindowSource::HistoryLimit,
            "limit_message" => WindowSource::LimitMessage,
            "continuous_activity" => WindowSource::ContinuousActivity,
            "history_account" => WindowSource::HistoryAccount,
            "active_window" => WindowSource::ActiveWindow,
            "gap" => WindowSource::Gap,
            "first_message" => WindowSource::FirstMessage,
            _ => return None,
        })
    }

    /// Base priority of the strategy. Unexpired limit messages are raised
    /// to 10 by the strategy itself.
    pub fn base_priority(&self) -> u8 {
        match self {
            WindowSource::HistoryLimit => 10,
            WindowSource::LimitMessage => 9,
            WindowSource::ContinuousActivity => 8,
            WindowSource::HistoryAccount => 7,
            WindowSource::ActiveWindow => 6,
            WindowSource::Gap => 5,
            WindowSource::FirstMessage => 3,
        }
    }

    /// Fallback anchors are guesses rather than detections.
    pub fn is_detected(&self) -> bool {
        !matches!(self, WindowSource::FirstMessage | WindowSource::ActiveWindow)
    }
}

impl fmt::Display for WindowSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowCandidate {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub source: WindowSource,
    pub priority: u8,
    pub is_limit: bool,
    pub metadata: BTreeMap<String, String>,
}

impl WindowCandidate {
    /// Candidate anchored at `start`, spanning exactly `duration`.
    pub fn new(start: DateTime<Utc>, duration: TimeDelta, source: WindowSource) -> Self {
        Self {
            start,
            end: start + duration,
            source,
            priority: source.base_priority(),
            is_limit: matches!(source, WindowSource::LimitMessage | WindowSource::HistoryLimit),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Re-anchor at `start` keeping the fixed duration.
    pub fn move_to(&mut self, start: DateTime<Utc>, duration: TimeDelta) {
        self.start = start;
        self.end = start + duration;
    }

    /// Recompute `end` if the raw span disagrees with `duration`.
    pub fn normalize(&mut self, duration: TimeDelta) {
        if self.end - self.start != duration {
            self.end = self.start + duration;
        }
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t < self.end
    }
}
