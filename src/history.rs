//! # History Module
//!
//! Persistent store of previously established windows. Later runs consult it
//! to keep new windows from colliding with ones already reported, and the
//! `history_*` strategies re-propose confirmed windows from it.
//!
//! Writes are serialized by a single mutex; reads go through an `RwLock` so
//! display paths never wait on each other. Persistence is a JSON file
//! written atomically (temp file + rename).

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

use crate::config::DetectorConfig;
use crate::models::WindowRecord;

/// Bounds applied when accepting records and validating proposals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryPolicy {
    pub session_duration: TimeDelta,
    pub limit_window_retention: TimeDelta,
    pub max_future_window: TimeDelta,
    pub retention_days: i64,
    pub limit_retention_days: i64,
}

impl From<&DetectorConfig> for HistoryPolicy {
    fn from(c: &DetectorConfig) -> Self {
        Self {
            session_duration: c.session_duration,
            limit_window_retention: c.limit_window_retention,
            max_future_window: c.max_future_window,
            retention_days: c.history_retention_days,
            limit_retention_days: c.limit_history_retention_days,
        }
    }
}

impl Default for HistoryPolicy {
    fn default() -> Self {
        Self::from(&DetectorConfig::default())
    }
}

/// Why `add_or_update` refused a record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordRejection {
    #[error("window end {end} is not after its start {start}")]
    InvalidSpan {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[error("limit window ending {end} has not been reached yet")]
    LimitInFuture { end: DateTime<Utc> },
    #[error("limit window ending {end} is older than the retention horizon")]
    LimitExpired { end: DateTime<Utc> },
    #[error("window ending {end} reaches past {horizon}")]
    TooFarInFuture {
        end: DateTime<Utc>,
        horizon: DateTime<Utc>,
    },
    #[error("record {session_id} is limit-confirmed and cannot be downgraded")]
    DowngradeRefused { session_id: String },
}

/// Why `validate` refused a proposed window.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowRejection {
    #[error("window end {end} is not after its start {start}")]
    InvalidSpan {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[error("window ending {end} reaches past {horizon}")]
    TooFarInFuture {
        end: DateTime<Utc>,
        horizon: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationOutcome {
    /// No stored window conflicts with the proposal.
    Unchanged,
    /// Shifted forward past conflicting stored windows.
    Adjusted,
    /// The shift would have crossed the future bound; the proposal is
    /// returned as given.
    FellBack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub outcome: ValidationOutcome,
}

impl ValidatedWindow {
    pub fn was_adjusted(&self) -> bool {
        self.outcome == ValidationOutcome::Adjusted
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryFile<'a> {
    windows: &'a [WindowRecord],
    last_updated: DateTime<Utc>,
}

pub struct WindowHistoryStore {
    path: Option<PathBuf>,
    policy: HistoryPolicy,
    records: RwLock<BTreeMap<String, WindowRecord>>,
    write_lock: Mutex<()>,
    dirty: AtomicBool,
}

impl WindowHistoryStore {
    /// Store backed by `path`, loaded immediately. A missing file is an
    /// empty history.
    pub fn open(path: impl Into<PathBuf>, policy: HistoryPolicy) -> Result<Self> {
        let store = Self {
            path: Some(path.into()),
            ..Self::in_memory(policy)
        };
        store.load()?;
        Ok(store)
    }

    /// Store that never touches disk; `save` is a no-op.
    pub fn in_memory(policy: HistoryPolicy) -> Self {
        Self {
            path: None,
            policy,
            records: RwLock::new(BTreeMap::new()),
            write_lock: Mutex::new(()),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn policy(&self) -> &HistoryPolicy {
        &self.policy
    }

    fn write_guard(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn read_records(&self) -> RwLockReadGuard<'_, BTreeMap<String, WindowRecord>> {
        self.records.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_records(&self) -> RwLockWriteGuard<'_, BTreeMap<String, WindowRecord>> {
        self.records.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace in-memory records with the file contents. Returns the number
    /// of records loaded.
    pub fn load(&self) -> Result<usize> {
        let Some(path) = self.path.as_deref() else {
            return Ok(0);
        };
        let _guard = self.write_guard();
        if !path.exists() {
            self.write_records().clear();
            return Ok(0);
        }

        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read window history {}", path.display()))?;
        let loaded = parse_history(&text)
            .with_context(|| format!("Failed to parse window history {}", path.display()))?;

        let count = loaded.len();
        *self.write_records() = loaded
            .into_iter()
            .map(|r| (r.session_id.clone(), r))
            .collect();
        self.dirty.store(false, Ordering::SeqCst);
        tracing::debug!(count, path = %path.display(), "loaded window history");
        Ok(count)
    }

    /// Write all records atomically. On failure the store stays dirty so the
    /// next cycle retries.
    pub fn save(&self) -> Result<()> {
        let Some(path) = self.path.as_deref() else {
            self.dirty.store(false, Ordering::SeqCst);
            return Ok(());
        };
        let _guard = self.write_guard();
        let windows = self.snapshot();
        let body = HistoryFile {
            windows: &windows,
            last_updated: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&body)?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let tmp_path = path.with_extension("json.tmp");
        {
            let mut tmp = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)
                .with_context(|| format!("Failed to open {}", tmp_path.display()))?;
            tmp.write_all(json.as_bytes())?;
            tmp.sync_all()?;
        }
        if let Err(err) = fs::rename(&tmp_path, path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(err)
                .with_context(|| format!("Failed to replace window history {}", path.display()));
        }

        self.dirty.store(false, Ordering::SeqCst);
        tracing::debug!(count = windows.len(), path = %path.display(), "saved window history");
        Ok(())
    }

    /// Insert or replace the record with the same session id.
    pub fn add_or_update(
        &self,
        mut record: WindowRecord,
        now: DateTime<Utc>,
    ) -> Result<(), RecordRejection> {
        self.check_acceptance(&record, now)?;

        let _guard = self.write_guard();
        let mut records = self.write_records();
        if let Some(existing) = records.get(&record.session_id) {
            if existing.is_confirmed() && !record.is_confirmed() {
                return Err(RecordRejection::DowngradeRefused {
                    session_id: record.session_id,
                });
            }
            record.created_at = existing.created_at;
            if existing == &record {
                return Ok(());
            }
        }
        records.insert(record.session_id.clone(), record);
        self.dirty.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn check_acceptance(
        &self,
        record: &WindowRecord,
        now: DateTime<Utc>,
    ) -> Result<(), RecordRejection> {
        if record.end <= record.start {
            return Err(RecordRejection::InvalidSpan {
                start: record.start,
                end: record.end,
            });
        }
        if record.is_limit_reached {
            if record.end > now {
                return Err(RecordRejection::LimitInFuture { end: record.end });
            }
            if record.end < now - self.policy.limit_window_retention {
                return Err(RecordRejection::LimitExpired { end: record.end });
            }
        } else {
            let horizon = now + self.policy.max_future_window;
            if record.end > horizon {
                return Err(RecordRejection::TooFarInFuture {
                    end: record.end,
                    horizon,
                });
            }
        }
        Ok(())
    }

    /// Check a proposed window against stored ones and shift it forward past
    /// any conflict.
    ///
    /// Same-day limit windows are resolved first since they carry provider
    /// reset times; every other stored window is checked afterwards. The
    /// result always spans exactly one session duration.
    pub fn validate(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ValidatedWindow, WindowRejection> {
        if end <= start {
            return Err(WindowRejection::InvalidSpan { start, end });
        }
        let horizon = now + self.policy.max_future_window;
        if end > horizon {
            return Err(WindowRejection::TooFarInFuture { end, horizon });
        }

        let duration = self.policy.session_duration;
        let day = start.date_naive();
        let records = self.snapshot();

        let (mut same_day_limits, mut others): (Vec<&WindowRecord>, Vec<&WindowRecord>) = records
            .iter()
            .partition(|r| r.is_limit_reached && r.start.date_naive() == day);
        same_day_limits.sort_by_key(|r| r.start);
        others.sort_by_key(|r| r.start);

        let mut cur_start = start;
        let mut cur_end = start + duration;

        for r in same_day_limits {
            if r.overlaps(cur_start, cur_end) {
                cur_start = r.end;
                cur_end = cur_start + duration;
            }
        }
        for r in others {
            if r.start == cur_start && r.end == cur_end {
                continue;
            }
            if r.overlaps(cur_start, cur_end) {
                cur_start = r.end;
                cur_end = cur_start + duration;
            }
        }

        if cur_start == start {
            return Ok(ValidatedWindow {
                start,
                end: cur_end,
                outcome: ValidationOutcome::Unchanged,
            });
        }
        if cur_end > horizon {
            tracing::warn!(
                start = %start,
                adjusted_start = %cur_start,
                horizon = %horizon,
                "adjusted window would pass the future bound, keeping the original"
            );
            return Ok(ValidatedWindow {
                start,
                end,
                outcome: ValidationOutcome::FellBack,
            });
        }
        Ok(ValidatedWindow {
            start: cur_start,
            end: cur_end,
            outcome: ValidationOutcome::Adjusted,
        })
    }

    /// Drop records past their retention. Limit-confirmed records are kept
    /// longer. Returns the number removed.
    pub fn cleanup(&self, now: DateTime<Utc>) -> usize {
        let regular_cutoff = days_before(now, self.policy.retention_days);
        let limit_cutoff = days_before(now, self.policy.limit_retention_days);

        let _guard = self.write_guard();
        let mut records = self.write_records();
        let before = records.len();
        records.retain(|_, r| {
            let cutoff = if r.is_limit_reached {
                limit_cutoff
            } else {
                regular_cutoff
            };
            r.end >= cutoff
        });
        let removed = before - records.len();
        if removed > 0 {
            self.dirty.store(true, Ordering::SeqCst);
            tracing::debug!(removed, "pruned old window history");
        }
        removed
    }

    pub fn account_level_windows(&self) -> Vec<WindowRecord> {
        self.filtered(|r| r.is_account_level)
    }

    /// Records ending no earlier than `now - within`.
    pub fn recent_windows(&self, within: TimeDelta, now: DateTime<Utc>) -> Vec<WindowRecord> {
        let cutoff = now - within;
        self.filtered(|r| r.end >= cutoff)
    }

    pub fn limit_reached_windows(&self) -> Vec<WindowRecord> {
        self.filtered(|r| r.is_limit_reached)
    }

    fn filtered(&self, keep: impl Fn(&WindowRecord) -> bool) -> Vec<WindowRecord> {
        let mut out: Vec<WindowRecord> =
            self.read_records().values().filter(|r| keep(r)).cloned().collect();
        out.sort_by_key(|r| r.start);
        out
    }

    /// All records ordered by start.
    pub fn snapshot(&self) -> Vec<WindowRecord> {
        self.filtered(|_| true)
    }

    pub fn get(&self, session_id: &str) -> Option<WindowRecord> {
        self.read_records().get(session_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.read_records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when in-memory records differ from what was last persisted.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }
}

/// Accepts `{"windows": [...]}` or a bare array. Records that fail to
/// deserialize are skipped.
/// `now` minus whole days, clamped to the earliest representable instant.
fn days_before(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    TimeDelta::try_days(days)
        .and_then(|d| now.checked_sub_signed(d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn parse_history(text: &str) -> Result<Vec<WindowRecord>> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let value: serde_json::Value = serde_json::from_str(text)?;
    let items = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut obj) => match obj.remove("windows") {
            Some(serde_json::Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };

    let mut skipped = 0usize;
    let records: Vec<WindowRecord> = items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<WindowRecord>(item) {
            Ok(r) => Some(r),
            Err(_) => {
                skipped += 1;
                None
            }
        })
        .collect();
    if skipped > 0 {
        tracing::warn!(skipped, "skipped malformed window history records");
    }
    Ok(records)
}
