//! # Config Module
//!
//! Tunables for window detection. Defaults match the provider's 5-hour quota
//! period; every value can be overridden through `CLAUDE_*` environment
//! variables and, in the binary, through CLI flags.

use anyhow::{Context, Result, bail};
use chrono::TimeDelta;
use std::path::PathBuf;

use crate::utils::{default_history_path, parse_i64_env};

pub const DEFAULT_SESSION_HOURS: i64 = 5;
pub const DEFAULT_LIMIT_RETENTION_HOURS: i64 = 24;
pub const DEFAULT_HISTORY_RETENTION_DAYS: i64 = 30;
pub const DEFAULT_LIMIT_HISTORY_RETENTION_DAYS: i64 = 90;
pub const DEFAULT_SCAN_LOOKBACK_HOURS: i64 = 48;
/// Window for the `history_account` strategy.
pub const ACCOUNT_WINDOW_LOOKBACK_HOURS: i64 = 24;
/// Upper bound for every hour-based setting (one year).
pub const MAX_CONFIG_HOURS: i64 = 366 * 24;
/// Upper bound for the retention settings (ten years).
pub const MAX_RETENTION_DAYS: i64 = 3660;

fn hours(value: i64, name: &str) -> Result<TimeDelta> {
    TimeDelta::try_hours(value).with_context(|| format!("{name} out of range: {value} hours"))
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Length of one quota window.
    pub session_duration: TimeDelta,
    /// How long a confirmed limit window stays acceptable as history.
    pub limit_window_retention: TimeDelta,
    /// Furthest a non-limit window may reach past "now".
    pub max_future_window: TimeDelta,
    pub history_retention_days: i64,
    pub limit_history_retention_days: i64,
    pub scan_lookback: TimeDelta,
    pub history_path: Option<PathBuf>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        let session_duration = TimeDelta::hours(DEFAULT_SESSION_HOURS);
        Self {
            session_duration,
            limit_window_retention: TimeDelta::hours(DEFAULT_LIMIT_RETENTION_HOURS),
            max_future_window: session_duration,
            history_retention_days: DEFAULT_HISTORY_RETENTION_DAYS,
            limit_history_retention_days: DEFAULT_LIMIT_HISTORY_RETENTION_DAYS,
            scan_lookback: TimeDelta::hours(DEFAULT_SCAN_LOOKBACK_HOURS),
            history_path: default_history_path(),
        }
    }
}

impl DetectorConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Same as the default but with a custom window length; the future bound
    /// follows the window length.
    pub fn with_session_hours(session_hours: i64) -> Result<Self> {
        let mut config = Self::default();
        config.set_session_hours(session_hours)?;
        Ok(config)
    }

    pub fn set_session_hours(&mut self, session_hours: i64) -> Result<()> {
        self.session_duration = hours(session_hours, "session duration")?;
        self.max_future_window = self.session_duration;
        Ok(())
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(h) = parse_i64_env("CLAUDE_SESSION_HOURS") {
            self.set_session_hours(h)?;
        }
        if let Some(h) = parse_i64_env("CLAUDE_LIMIT_RETENTION_HOURS") {
            self.limit_window_retention = hours(h, "CLAUDE_LIMIT_RETENTION_HOURS")?;
        }
        if let Some(h) = parse_i64_env("CLAUDE_MAX_FUTURE_HOURS") {
            self.max_future_window = hours(h, "CLAUDE_MAX_FUTURE_HOURS")?;
        }
        if let Some(d) = parse_i64_env("CLAUDE_HISTORY_RETENTION_DAYS") {
            self.history_retention_days = d;
        }
        if let Some(d) = parse_i64_env("CLAUDE_LIMIT_HISTORY_RETENTION_DAYS") {
            self.limit_history_retention_days = d;
        }
        if let Some(h) = parse_i64_env("CLAUDE_SCAN_LOOKBACK_HOURS") {
            self.scan_lookback = hours(h, "CLAUDE_SCAN_LOOKBACK_HOURS")?;
        }
        if let Ok(p) = std::env::var("CLAUDE_WINDOW_HISTORY_PATH") {
            let p = p.trim();
            if !p.is_empty() {
                self.history_path = Some(PathBuf::from(p));
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.session_duration <= TimeDelta::zero() {
            bail!("session duration must be positive");
        }
        if self.limit_window_retention <= TimeDelta::zero() {
            bail!("limit window retention must be positive");
        }
        if self.max_future_window < TimeDelta::zero() {
            bail!("max future window cannot be negative");
        }
        if self.history_retention_days <= 0 || self.limit_history_retention_days <= 0 {
            bail!("history retention must be at least one day");
        }
        let max = TimeDelta::hours(MAX_CONFIG_HOURS);
        for (name, value) in [
            ("session duration", self.session_duration),
            ("limit window retention", self.limit_window_retention),
            ("max future window", self.max_future_window),
            ("scan lookback", self.scan_lookback),
        ] {
            if value > max {
                bail!("{name} exceeds {MAX_CONFIG_HOURS} hours");
            }
        }
        if self.history_retention_days > MAX_RETENTION_DAYS
            || self.limit_history_retention_days > MAX_RETENTION_DAYS
        {
            bail!("history retention exceeds {MAX_RETENTION_DAYS} days");
        }
        if self.limit_history_retention_days < self.history_retention_days {
            tracing::warn!(
                limit_days = self.limit_history_retention_days,
                days = self.history_retention_days,
                "limit windows are retained for less time than regular windows"
            );
        }
        Ok(())
    }
}
