use chrono::{DateTime, Utc};
use serde::Serialize;

/// How a limit notification was recognized, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    /// `limit reached|<epoch>` with a provider-supplied reset time.
    ExplicitReset,
    /// "rate limit ... wait N minutes".
    WaitTime,
    /// Keyword match only, no reset time.
    Keyword,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LimitSignal {
    pub timestamp: DateTime<Utc>,
    /// When present, pins the end of the quota window exactly.
    pub reset_time: Option<DateTime<Utc>>,
    pub content: String,
    pub confidence: f64,
    pub kind: LimitKind,
}
