use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::WindowSource;

/// A previously established window, persisted in the history file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowRecord {
    pub session_id: String,
    pub source: WindowSource,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_limit_reached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_message: Option<String>,
    #[serde(default)]
    pub is_account_level: bool,
}

impl WindowRecord {
    pub fn new(
        session_id: impl Into<String>,
        source: WindowSource,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            source,
            start,
            end,
            created_at,
            is_limit_reached: false,
            limit_message: None,
            is_account_level: false,
        }
    }

    /// Half-open overlap with `[start, end)`.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start < end && start < self.end
    }

    /// Limit-backed records are confirmed by a provider reset time.
    pub fn is_confirmed(&self) -> bool {
        self.is_limit_reached
    }
}
