use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::models::{TokenUsage, WindowSource};

/// Project name used when a window spans more than one project.
pub const MULTIPLE_PROJECTS: &str = "Multiple";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TokenCounts {
    pub input: u64,
    pub output: u64,
    pub cache_create: u64,
    pub cache_read: u64,
}

impl TokenCounts {
    pub fn add(&mut self, usage: &TokenUsage) {
        self.input += usage.input;
        self.output += usage.output;
        self.cache_create += usage.cache_create;
        self.cache_read += usage.cache_read;
    }

    pub fn merge(&mut self, other: &TokenCounts) {
        self.input += other.input;
        self.output += other.output;
        self.cache_create += other.cache_create;
        self.cache_read += other.cache_read;
    }

    pub fn total(&self) -> u64 {
        self.input + self.output + self.cache_create + self.cache_read
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct UsageStats {
    pub tokens: TokenCounts,
    pub cost: f64,
    pub messages: u64,
}

impl UsageStats {
    pub fn merge(&mut self, other: &UsageStats) {
        self.tokens.merge(&other.tokens);
        self.cost += other.cost;
        self.messages += other.messages;
    }
}

/// Detection metadata written back per session id so a later run can seed
/// its history without re-reading raw logs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowDetectionInfo {
    pub window_start: DateTime<Utc>,
    pub is_detected: bool,
    pub source: WindowSource,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BurnRate {
    pub tokens_per_minute: f64,
    pub cost_per_hour: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Projection {
    pub projected_tokens: u64,
    pub projected_cost: f64,
    pub remaining_minutes: f64,
    /// Share of the plan token limit already used; may exceed 100.
    pub usage_percent: Option<f64>,
    pub projected_percent: Option<f64>,
    /// Minutes until the plan token limit is hit at the current burn rate.
    pub minutes_to_limit: Option<f64>,
}

/// Materialized usage for one selected window.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub reset_time: DateTime<Utc>,
    /// Timestamp of the last assigned event.
    pub actual_end: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub is_gap: bool,
    pub project_name: String,
    pub projects: BTreeMap<String, UsageStats>,
    pub tokens: TokenCounts,
    pub total_cost: f64,
    pub message_count: u64,
    pub models: BTreeMap<String, UsageStats>,
    pub is_account_level: bool,
    pub limit_message: Option<String>,
    pub window: WindowDetectionInfo,
    pub burn_rate: Option<BurnRate>,
    pub projection: Option<Projection>,
}

impl Session {
    pub fn total_tokens(&self) -> u64 {
        self.tokens.total()
    }

    pub fn source(&self) -> WindowSource {
        self.window.source
    }

    pub fn is_empty(&self) -> bool {
        self.message_count == 0
    }
}
