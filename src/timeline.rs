//! # Timeline Module
//!
//! Normalizes raw per-message records and hourly aggregates into one
//! time-ordered event sequence.
//!
//! Raw records are primary data. Hourly aggregates are supplementary: they
//! roll up the same usage, so an aggregate is dropped whenever primary data
//! already covers its period. Two keys decide that:
//!
//! - exact key: timestamp truncated to the second, project, event type
//! - coarse key: 5-minute bucket (1 hour for hourly records) and project

use chrono::{DateTime, DurationRound, NaiveDateTime, TimeDelta, Utc};
use std::collections::HashSet;

use crate::models::{EventOrigin, HourlyAggregate, RawMessage, TimestampedEvent};
use crate::utils::floor_to;

const MINUTE_BUCKET: TimeDelta = TimeDelta::minutes(5);
const HOUR_BUCKET: TimeDelta = TimeDelta::hours(1);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ExactKey {
    second: i64,
    project: String,
    event_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CoarseKey {
    bucket_start: i64,
    bucket_secs: i64,
    project: String,
}

fn exact_key(e: &TimestampedEvent) -> ExactKey {
    ExactKey {
        second: e.ts.timestamp(),
        project: e.project.clone(),
        event_type: e.event_type.clone(),
    }
}

fn coarse_key(e: &TimestampedEvent, bucket: TimeDelta) -> CoarseKey {
    CoarseKey {
        bucket_start: floor_to(e.ts, bucket).timestamp(),
        bucket_secs: bucket.num_seconds(),
        project: e.project.clone(),
    }
}

/// Parse an ISO-8601 timestamp. Accepts RFC 3339 (with `Z` or an offset) and
/// naive `YYYY-MM-DDTHH:MM:SS[.f]`, which is taken as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Build a deduplicated, time-ordered timeline.
pub fn build(raw: &[RawMessage], hourly: &[HourlyAggregate]) -> Vec<TimestampedEvent> {
    let mut events = Vec::with_capacity(raw.len() + hourly.len());
    let mut skipped = 0usize;

    for r in raw {
        let Some(ts) = parse_timestamp(&r.timestamp) else {
            skipped += 1;
            continue;
        };
        events.push(TimestampedEvent {
            ts,
            project: r.project.clone(),
            usage: r.usage,
            model: r.model.clone(),
            event_type: r.event_type.clone(),
            origin: EventOrigin::Primary,
            content: r.content.clone(),
            is_notice: r.is_notice,
        });
    }

    for h in hourly {
        let Some(ts) = parse_timestamp(&h.hour) else {
            skipped += 1;
            continue;
        };
        events.push(TimestampedEvent {
            ts: ts.duration_trunc(HOUR_BUCKET).unwrap_or(ts),
            project: h.project.clone(),
            usage: h.usage,
            model: h.model.clone(),
            event_type: "assistant".to_string(),
            origin: EventOrigin::Supplementary,
            content: None,
            is_notice: false,
        });
    }

    if skipped > 0 {
        tracing::debug!(skipped, "skipped records with malformed timestamps");
    }

    let mut events = deduplicate(events);
    events.sort_by_key(|e| e.ts);
    events
}

/// Drop supplementary events whose period is already covered by primary
/// events. Primary events are always kept; relative order is preserved.
pub fn deduplicate(events: Vec<TimestampedEvent>) -> Vec<TimestampedEvent> {
    let mut exact: HashSet<ExactKey> = HashSet::new();
    let mut coarse: HashSet<CoarseKey> = HashSet::new();
    for e in events.iter().filter(|e| e.origin == EventOrigin::Primary) {
        exact.insert(exact_key(e));
        coarse.insert(coarse_key(e, MINUTE_BUCKET));
        coarse.insert(coarse_key(e, HOUR_BUCKET));
    }

    let before = events.len();
    let kept: Vec<TimestampedEvent> = events
        .into_iter()
        .filter(|e| {
            if e.origin == EventOrigin::Primary {
                return true;
            }
            let bucket = if e.is_hour_granularity() {
                HOUR_BUCKET
            } else {
                MINUTE_BUCKET
            };
            !exact.contains(&exact_key(e)) && !coarse.contains(&coarse_key(e, bucket))
        })
        .collect();

    let dropped = before - kept.len();
    if dropped > 0 {
        tracing::debug!(dropped, "dropped supplementary events covered by raw data");
    }
    kept
}

/// Keep events no older than `max_age` relative to `now`.
pub fn filter_by_age(
    events: Vec<TimestampedEvent>,
    max_age: TimeDelta,
    now: DateTime<Utc>,
) -> Vec<TimestampedEvent> {
    let cutoff = now - max_age;
    events.into_iter().filter(|e| e.ts >= cutoff).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TokenUsage;
    use chrono::TimeZone;

    fn raw(ts: &str, project: &str, input: u64) -> RawMessage {
        RawMessage {
            timestamp: ts.to_string(),
            project: project.to_string(),
            model: Some("claude-sonnet-4".to_string()),
            usage: TokenUsage {
                input,
                ..Default::default()
            },
            event_type: "assistant".to_string(),
            content: None,
            is_notice: false,
        }
    }

    fn hourly(hour: &str, project: &str, input: u64) -> HourlyAggregate {
        HourlyAggregate {
            hour: hour.to_string(),
            project: project.to_string(),
            model: None,
            usage: TokenUsage {
                input,
                ..Default::default()
            },
        }
    }

    #[test]
    fn build_sorts_and_skips_malformed() {
        let events = build(
            &[
                raw("2024-01-15T12:00:00Z", "a", 1),
                raw("not-a-date", "a", 2),
                raw("2024-01-15T10:00:00.500+00:00", "a", 3),
            ],
            &[],
        );
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].usage.input, 3);
        assert_eq!(events[1].usage.input, 1);
    }

    #[test]
    fn naive_timestamp_is_utc() {
        let ts = parse_timestamp("2024-01-15T10:15:00").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 1, 15, 10, 15, 0).unwrap());
    }

    #[test]
    fn hourly_aggregate_covered_by_raw_is_dropped() {
        let events = build(
            &[raw("2024-01-15T10:42:00Z", "a", 100)],
            &[hourly("2024-01-15T10:00:00Z", "a", 100)],
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].origin, EventOrigin::Primary);
    }

    #[test]
    fn hourly_aggregate_for_other_project_or_hour_is_kept() {
        let events = build(
            &[raw("2024-01-15T10:42:00Z", "a", 100)],
            &[
                hourly("2024-01-15T10:00:00Z", "b", 50),
                hourly("2024-01-15T11:00:00Z", "a", 70),
            ],
        );
        assert_eq!(events.len(), 3);
        let supplementary: u64 = events
            .iter()
            .filter(|e| e.origin == EventOrigin::Supplementary)
            .map(|e| e.usage.input)
            .sum();
        assert_eq!(supplementary, 120);
    }

    #[test]
    fn primary_duplicates_are_kept() {
        let events = build(
            &[
                raw("2024-01-15T10:00:00Z", "a", 1),
                raw("2024-01-15T10:00:00Z", "a", 1),
            ],
            &[],
        );
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn filter_by_age_drops_old_events() {
        let now = Utc.with_ymd_and_hms(2024, 1, 16, 0, 0, 0).unwrap();
        let events = build(
            &[
                raw("2024-01-13T10:00:00Z", "a", 1),
                raw("2024-01-15T10:00:00Z", "a", 2),
            ],
            &[],
        );
        let kept = filter_by_age(events, TimeDelta::hours(48), now);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].usage.input, 2);
    }
}
