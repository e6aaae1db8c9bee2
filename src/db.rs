//! SQLite cache of per-session window detection results.
//!
//! Each run writes back how every session's window was established so a
//! later run (or another process) can seed its window history without
//! re-deriving it from raw logs.
//!
//! - Schema versioning via the `metadata` table
//! - Concurrent access via WAL mode and a busy timeout
//! - Short-lived connections per call

use anyhow::{Context, Result, bail};
use chrono::{DateTime, TimeDelta, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use crate::history::WindowHistoryStore;
use crate::models::{Session, WindowDetectionInfo, WindowRecord, WindowSource};

const SCHEMA_VERSION: &str = "1";

/// Metadata value with optional timestamp
#[derive(Debug, Clone)]
pub struct MetadataEntry {
    pub value: String,
    pub updated_at: Option<i64>,
}

/// Get the database file path
///
/// Checks `CLAUDE_WINDOW_DB_PATH` environment variable first,
/// falls back to `~/.claude/window_detection.db`
fn get_db_path() -> Result<PathBuf> {
    if let Ok(custom_path) = env::var("CLAUDE_WINDOW_DB_PATH") {
        return Ok(PathBuf::from(custom_path));
    }

    let base_dirs = directories::BaseDirs::new().context("Failed to find home directory")?;
    let claude_dir = base_dirs.home_dir().join(".claude");

    if !claude_dir.exists() {
        fs::create_dir_all(&claude_dir)
            .with_context(|| format!("Failed to create {}", claude_dir.display()))?;
    }

    Ok(claude_dir.join("window_detection.db"))
}

/// Open database connection with WAL mode and retry logic
///
/// Retries "database locked" errors with a growing backoff.
pub fn open_db() -> Result<Connection> {
    let db_path = get_db_path()?;

    let mut attempts = 0;
    let max_attempts = 3;

    loop {
        match Connection::open(&db_path) {
            Ok(conn) => {
                conn.pragma_update(None, "journal_mode", "WAL")?;
                conn.pragma_update(None, "busy_timeout", 5000)?;
                init_schema(&conn)?;
                check_schema_version(&conn)?;
                return Ok(conn);
            }
            Err(e) if e.to_string().contains("locked") && attempts < max_attempts => {
                attempts += 1;
                thread::sleep(Duration::from_millis(100 * attempts));
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to open {}", db_path.display()));
            }
        }
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS window_detection (
            session_id TEXT PRIMARY KEY,
            window_start TEXT NOT NULL,
            is_detected INTEGER NOT NULL,
            source TEXT NOT NULL,
            detected_at TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_window_start ON window_detection(window_start);
        CREATE TABLE IF NOT EXISTS metadata (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER
        );
        INSERT OR IGNORE INTO metadata (key, value) VALUES ('schema_version', '1');",
    )?;
    Ok(())
}

/// Refuse databases written by a newer layout instead of misreading them.
fn check_schema_version(conn: &Connection) -> Result<()> {
    match get_metadata(conn, "schema_version")? {
        Some(entry) if entry.value == SCHEMA_VERSION => Ok(()),
        Some(entry) => bail!("unsupported detection cache schema version {}", entry.value),
        None => set_metadata(conn, "schema_version", SCHEMA_VERSION),
    }
}

/// Fetch metadata value and optional timestamp
pub fn get_metadata(conn: &Connection, key: &str) -> Result<Option<MetadataEntry>> {
    let mut stmt = conn.prepare("SELECT value, updated_at FROM metadata WHERE key = ?1")?;
    let result = stmt
        .query_row(params![key], |row| {
            let value: String = row.get(0)?;
            let updated_at: Option<i64> = row.get::<_, Option<i64>>(1).unwrap_or(None);
            Ok(MetadataEntry { value, updated_at })
        })
        .optional()?;
    Ok(result)
}

/// Set metadata value with current timestamp
pub fn set_metadata(conn: &Connection, key: &str, value: &str) -> Result<()> {
    let now = Utc::now().timestamp();
    conn.execute(
        "INSERT INTO metadata (key, value, updated_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![key, value, now],
    )?;
    Ok(())
}

fn upsert_detection(conn: &Connection, session_id: &str, info: &WindowDetectionInfo) -> Result<()> {
    let now = Utc::now().timestamp();
    conn.execute(
        "INSERT INTO window_detection (session_id, window_start, is_detected, source, detected_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(session_id) DO UPDATE SET
             window_start = excluded.window_start,
             is_detected = excluded.is_detected,
             source = excluded.source,
             detected_at = excluded.detected_at,
             updated_at = excluded.updated_at",
        params![
            session_id,
            info.window_start.to_rfc3339(),
            info.is_detected,
            info.source.as_str(),
            info.detected_at.to_rfc3339(),
            now
        ],
    )?;
    Ok(())
}

/// Persist detection info for every non-gap session in one transaction.
pub fn store_detection_info(sessions: &[Session]) -> Result<usize> {
    let mut conn = open_db()?;
    let tx = conn.transaction()?;
    let mut stored = 0;
    for s in sessions.iter().filter(|s| !s.is_gap) {
        upsert_detection(&tx, &s.id, &s.window)?;
        stored += 1;
    }
    tx.commit()?;
    set_metadata(&conn, "last_detection_write", &Utc::now().to_rfc3339())?;
    Ok(stored)
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Load cached detection info, optionally only windows starting at or after
/// `since`. Rows that no longer parse are skipped.
pub fn load_detection_info(
    since: Option<DateTime<Utc>>,
) -> Result<Vec<(String, WindowDetectionInfo)>> {
    let conn = open_db()?;
    let mut stmt = conn.prepare(
        "SELECT session_id, window_start, is_detected, source, detected_at
         FROM window_detection ORDER BY window_start",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, bool>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
        ))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (session_id, start, is_detected, source, detected_at) = row?;
        let (Some(window_start), Some(source), Some(detected_at)) = (
            parse_ts(&start),
            WindowSource::parse(&source),
            parse_ts(&detected_at),
        ) else {
            tracing::debug!(%session_id, "skipping unreadable detection row");
            continue;
        };
        if since.is_some_and(|t| window_start < t) {
            continue;
        }
        out.push((
            session_id,
            WindowDetectionInfo {
                window_start,
                is_detected,
                source,
                detected_at,
            },
        ));
    }
    Ok(out)
}

/// Add cached detections to the history store as plain (non-limit) windows.
/// Fallback detections are skipped. Returns the number accepted.
pub fn seed_history(
    store: &WindowHistoryStore,
    infos: &[(String, WindowDetectionInfo)],
    session_duration: TimeDelta,
    now: DateTime<Utc>,
) -> usize {
    let mut accepted = 0;
    for (session_id, info) in infos.iter().filter(|(_, i)| i.is_detected) {
        if store.get(session_id).is_some() {
            continue;
        }
        let record = WindowRecord::new(
            session_id.clone(),
            info.source,
            info.window_start,
            info.window_start + session_duration,
            info.detected_at,
        );
        match store.add_or_update(record, now) {
            Ok(()) => accepted += 1,
            Err(reason) => tracing::debug!(%session_id, %reason, "cached detection not seeded"),
        }
    }
    accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HistoryPolicy;
    use crate::models::WindowCandidate;
    use crate::sessions::build_session;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn session(h: u32, source: WindowSource) -> Session {
        let start = Utc.with_ymd_and_hms(2024, 1, 15, h, 0, 0).unwrap();
        let w = WindowCandidate::new(start, TimeDelta::hours(5), source);
        build_session(&w, start + TimeDelta::hours(1))
    }

    #[test]
    #[serial_test::serial]
    fn test_db_init() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        // SAFETY: Test runs serially, no concurrent env access
        unsafe { env::set_var("CLAUDE_WINDOW_DB_PATH", db_path.to_str().unwrap()) };

        let conn = open_db().unwrap();
        let version = get_metadata(&conn, "schema_version").unwrap().unwrap();
        assert_eq!(version.value, "1");
        unsafe { env::remove_var("CLAUDE_WINDOW_DB_PATH") };
    }

    #[test]
    #[serial_test::serial]
    fn test_newer_schema_is_refused() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("newer.db");
        // SAFETY: Test runs serially, no concurrent env access
        unsafe { env::set_var("CLAUDE_WINDOW_DB_PATH", db_path.to_str().unwrap()) };

        let conn = open_db().unwrap();
        set_metadata(&conn, "schema_version", "2").unwrap();
        drop(conn);
        let err = open_db().unwrap_err();
        assert!(err.to_string().contains("schema version 2"));
        assert!(store_detection_info(&[]).is_err());
        unsafe { env::remove_var("CLAUDE_WINDOW_DB_PATH") };
    }

    #[test]
    #[serial_test::serial]
    fn test_store_and_load_detection_info() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("detections.db");
        // SAFETY: Test runs serially, no concurrent env access
        unsafe { env::set_var("CLAUDE_WINDOW_DB_PATH", db_path.to_str().unwrap()) };

        let mut gap = session(15, WindowSource::Gap);
        gap.is_gap = true;
        gap.id = "gap-x".into();
        let sessions = vec![
            session(4, WindowSource::LimitMessage),
            gap,
            session(20, WindowSource::FirstMessage),
        ];
        assert_eq!(store_detection_info(&sessions).unwrap(), 2);
        // Second write updates in place
        assert_eq!(store_detection_info(&sessions).unwrap(), 2);

        let all = load_detection_info(None).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].1.source, WindowSource::LimitMessage);
        assert!(all[0].1.is_detected);
        assert!(!all[1].1.is_detected);

        let since = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        let later = load_detection_info(Some(since)).unwrap();
        assert_eq!(later.len(), 1);
        assert_eq!(later[0].0, "2024-01-15T20:00:00Z");

        unsafe { env::remove_var("CLAUDE_WINDOW_DB_PATH") };
    }

    #[test]
    fn test_seed_history_skips_fallbacks() {
        let store = WindowHistoryStore::in_memory(HistoryPolicy::default());
        let now = Utc.with_ymd_and_hms(2024, 1, 16, 0, 0, 0).unwrap();
        let infos: Vec<_> = [
            session(4, WindowSource::ContinuousActivity),
            session(10, WindowSource::FirstMessage),
        ]
        .into_iter()
        .map(|s| (s.id.clone(), s.window.clone()))
        .collect();

        assert_eq!(seed_history(&store, &infos, TimeDelta::hours(5), now), 1);
        let seeded = store.get("2024-01-15T04:00:00Z").unwrap();
        assert_eq!(seeded.end - seeded.start, TimeDelta::hours(5));
        assert!(!seeded.is_limit_reached);
        // Already present
        assert_eq!(seed_history(&store, &infos, TimeDelta::hours(5), now), 0);
    }
}
