//! # Sessions Module
//!
//! Materializes selected windows into sessions: events are assigned to the
//! window containing them (`start <= t < end`), totals accumulate per
//! project and per model, and idle stretches become synthetic gap sessions.

use chrono::{DateTime, TimeDelta, Utc};
use std::cmp::Ordering;

use crate::models::{
    MULTIPLE_PROJECTS, Session, TimestampedEvent, TokenCounts, UsageStats, WindowCandidate,
    WindowDetectionInfo, WindowSource,
};
use crate::pricing::CostCalculator;

const UNKNOWN_MODEL: &str = "unknown";
/// Relative difference between raw and assigned token sums worth a warning.
pub const DRIFT_WARN_RATIO: f64 = 0.01;

pub fn session_id_for(start: DateTime<Utc>) -> String {
    start.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Empty session for a selected window.
pub fn build_session(window: &WindowCandidate, detected_at: DateTime<Utc>) -> Session {
    let limit_message = if window.is_limit {
        window.metadata.get("message").cloned()
    } else {
        None
    };
    Session {
        id: session_id_for(window.start),
        start: window.start,
        end: window.end,
        reset_time: window.end,
        actual_end: None,
        is_active: false,
        is_gap: false,
        project_name: String::new(),
        projects: Default::default(),
        tokens: TokenCounts::default(),
        total_cost: 0.0,
        message_count: 0,
        models: Default::default(),
        is_account_level: false,
        limit_message,
        window: WindowDetectionInfo {
            window_start: window.start,
            is_detected: window.source.is_detected(),
            source: window.source,
            detected_at,
        },
        burn_rate: None,
        projection: None,
    }
}

/// Add one event to the session totals.
pub fn assign_event(session: &mut Session, event: &TimestampedEvent, cost: &dyn CostCalculator) {
    let event_cost = cost.compute(event.model.as_deref(), &event.usage);

    session.tokens.add(&event.usage);
    session.total_cost += event_cost;
    session.message_count += 1;
    if session.actual_end.is_none_or(|t| event.ts > t) {
        session.actual_end = Some(event.ts);
    }

    let mut stats = UsageStats {
        cost: event_cost,
        messages: 1,
        ..Default::default()
    };
    stats.tokens.add(&event.usage);

    session
        .projects
        .entry(event.project.clone())
        .or_default()
        .merge(&stats);
    let model = event.model.as_deref().unwrap_or(UNKNOWN_MODEL);
    session
        .models
        .entry(model.to_string())
        .or_default()
        .merge(&stats);
}

/// Resolve the display project. Windows spanning several projects belong to
/// the whole account.
pub fn finalize_session(session: &mut Session) {
    let mut names = session.projects.keys();
    match (names.next(), names.next()) {
        (Some(only), None) => {
            session.project_name = only.clone();
            session.is_account_level = false;
        }
        (Some(_), Some(_)) => {
            session.project_name = MULTIPLE_PROJECTS.to_string();
            session.is_account_level = true;
        }
        _ => session.project_name.clear(),
    }
}

/// Build one session per window from time-ordered events. Windows must be
/// sorted and non-overlapping. Windows without events are dropped unless
/// they are still open at `now`.
pub fn build_sessions(
    windows: &[WindowCandidate],
    events: &[TimestampedEvent],
    cost: &dyn CostCalculator,
    now: DateTime<Utc>,
) -> Vec<Session> {
    let mut sessions: Vec<Session> = windows.iter().map(|w| build_session(w, now)).collect();

    let mut w = 0;
    let mut unassigned = 0usize;
    for event in events {
        while w < sessions.len() && sessions[w].end <= event.ts {
            w += 1;
        }
        match sessions.get_mut(w) {
            Some(s) if s.start <= event.ts => assign_event(s, event, cost),
            _ => unassigned += 1,
        }
    }
    if unassigned > 0 {
        tracing::debug!(unassigned, "events outside every selected window");
    }

    sessions.retain(|s| !s.is_empty() || s.end > now);
    for s in &mut sessions {
        finalize_session(s);
    }
    sessions
}

fn gap_session(after: &Session, next: &Session, detected_at: DateTime<Utc>) -> Session {
    let start = after.actual_end.unwrap_or(after.start);
    Session {
        id: format!("gap-{}", start.to_rfc3339()),
        start,
        end: next.start,
        reset_time: next.start,
        actual_end: None,
        is_active: false,
        is_gap: true,
        project_name: String::new(),
        projects: Default::default(),
        tokens: TokenCounts::default(),
        total_cost: 0.0,
        message_count: 0,
        models: Default::default(),
        is_account_level: false,
        limit_message: None,
        window: WindowDetectionInfo {
            window_start: start,
            is_detected: false,
            source: WindowSource::Gap,
            detected_at,
        },
        burn_rate: None,
        projection: None,
    }
}

/// Insert zero-usage gap sessions where the last activity of one session and
/// the start of the next are at least `session_duration` apart.
pub fn insert_gap_sessions(mut sessions: Vec<Session>, session_duration: TimeDelta) -> Vec<Session> {
    sessions.sort_by_key(|s| s.start);
    let mut out: Vec<Session> = Vec::with_capacity(sessions.len());
    for s in sessions {
        if let Some(prev) = out.last()
            && !prev.is_gap
            && !s.is_gap
        {
            let idle_from = prev.actual_end.unwrap_or(prev.start);
            if s.start - idle_from >= session_duration {
                let gap = gap_session(prev, &s, prev.window.detected_at);
                out.push(gap);
            }
        }
        out.push(s);
    }
    out
}

fn authority(s: &Session) -> (u8, u8) {
    let source = s.window.source;
    let rank = if source == WindowSource::LimitMessage {
        2
    } else if s.window.is_detected {
        1
    } else {
        0
    };
    (rank, source.base_priority())
}

fn merge_into(target: &mut Session, other: Session) {
    if authority(&other).cmp(&authority(target)) == Ordering::Greater {
        target.id = other.id.clone();
        target.window = other.window.clone();
        target.reset_time = other.reset_time;
        if other.limit_message.is_some() {
            target.limit_message = other.limit_message.clone();
        }
    } else if target.limit_message.is_none() {
        target.limit_message = other.limit_message.clone();
    }

    target.tokens.merge(&other.tokens);
    target.total_cost += other.total_cost;
    target.message_count += other.message_count;
    target.actual_end = match (target.actual_end, other.actual_end) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    };
    for (name, stats) in other.projects {
        target.projects.entry(name).or_default().merge(&stats);
    }
    for (name, stats) in other.models {
        target.models.entry(name).or_default().merge(&stats);
    }
    finalize_session(target);
}

/// Merge sessions covering the identical `[start, end)`. Window metadata of
/// the more authoritative session wins: a limit message beats any other
/// source, detected beats fallback, then source priority decides.
pub fn deduplicate_sessions(sessions: Vec<Session>) -> Vec<Session> {
    let mut out: Vec<Session> = Vec::with_capacity(sessions.len());
    let mut merged = 0usize;
    for s in sessions {
        match out
            .iter_mut()
            .find(|o| o.start == s.start && o.end == s.end && o.is_gap == s.is_gap)
        {
            Some(existing) => {
                merge_into(existing, s);
                merged += 1;
            }
            None => out.push(s),
        }
    }
    if merged > 0 {
        tracing::debug!(merged, "merged sessions with identical windows");
    }
    out
}

pub fn mark_active(sessions: &mut [Session], now: DateTime<Utc>) {
    for s in sessions {
        s.is_active = !s.is_gap && s.end > now;
    }
}

/// Relative drift between raw event tokens and tokens assigned to sessions.
/// Logs a warning above [`DRIFT_WARN_RATIO`]; never fails.
pub fn check_token_drift(events: &[TimestampedEvent], sessions: &[Session]) -> f64 {
    let raw: u64 = events.iter().map(|e| e.usage.total()).sum();
    let assigned: u64 = sessions.iter().map(|s| s.total_tokens()).sum();
    if raw == 0 {
        return 0.0;
    }
    let drift = (raw as f64 - assigned as f64).abs() / raw as f64;
    if drift > DRIFT_WARN_RATIO {
        tracing::warn!(
            raw,
            assigned,
            drift_percent = drift * 100.0,
            "session token totals drift from raw events"
        );
    }
    drift
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventOrigin, TokenUsage};
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, h, m, 0).unwrap()
    }

    fn event(ts: DateTime<Utc>, project: &str, input: u64) -> TimestampedEvent {
        TimestampedEvent {
            ts,
            project: project.into(),
            usage: TokenUsage {
                input,
                ..Default::default()
            },
            model: Some("claude-sonnet-4".into()),
            event_type: "assistant".into(),
            origin: EventOrigin::Primary,
            content: None,
            is_notice: false,
        }
    }

    fn window(h: u32, source: WindowSource) -> WindowCandidate {
        WindowCandidate::new(at(h, 0), TimeDelta::hours(5), source)
    }

    fn flat_cost() -> impl Fn(Option<&str>, &TokenUsage) -> f64 {
        |_: Option<&str>, u: &TokenUsage| u.total() as f64 / 1000.0
    }

    #[test]
    fn boundary_event_belongs_to_later_window() {
        let windows = [
            window(9, WindowSource::ContinuousActivity),
            window(14, WindowSource::ContinuousActivity),
        ];
        let events = [event(at(13, 59), "p", 1), event(at(14, 0), "p", 2)];
        let sessions = build_sessions(&windows, &events, &flat_cost(), at(20, 0));
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].tokens.input, 1);
        assert_eq!(sessions[1].tokens.input, 2);
    }

    #[test]
    fn empty_past_windows_are_dropped() {
        let windows = [window(3, WindowSource::Gap), window(9, WindowSource::FirstMessage)];
        let events = [event(at(10, 0), "p", 5)];
        let sessions = build_sessions(&windows, &events, &flat_cost(), at(12, 0));
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].start, at(9, 0));
    }

    #[test]
    fn multi_project_session_is_account_level() {
        let windows = [window(9, WindowSource::FirstMessage)];
        let events = [event(at(9, 5), "a", 1), event(at(9, 6), "b", 1)];
        let sessions = build_sessions(&windows, &events, &flat_cost(), at(12, 0));
        assert_eq!(sessions[0].project_name, MULTIPLE_PROJECTS);
        assert!(sessions[0].is_account_level);
        assert_eq!(sessions[0].projects.len(), 2);
        assert_eq!(sessions[0].models["claude-sonnet-4"].messages, 2);
    }

    #[test]
    fn gap_session_spans_idle_time() {
        let windows = [window(9, WindowSource::FirstMessage), window(17, WindowSource::Gap)];
        let events = [event(at(10, 30), "p", 1), event(at(17, 30), "p", 1)];
        let sessions = build_sessions(&windows, &events, &flat_cost(), at(18, 0));
        let all = insert_gap_sessions(sessions, TimeDelta::hours(5));
        assert_eq!(all.len(), 3);
        assert!(all[1].is_gap);
        assert_eq!(all[1].start, at(10, 30));
        assert_eq!(all[1].end, at(17, 0));
        assert_eq!(all[1].total_tokens(), 0);
        assert!(all[1].id.starts_with("gap-"));
    }

    #[test]
    fn short_idle_time_has_no_gap() {
        let windows = [window(9, WindowSource::FirstMessage), window(14, WindowSource::Gap)];
        let events = [event(at(13, 30), "p", 1), event(at(14, 30), "p", 1)];
        let sessions = build_sessions(&windows, &events, &flat_cost(), at(18, 0));
        assert_eq!(insert_gap_sessions(sessions, TimeDelta::hours(5)).len(), 2);
    }

    #[test]
    fn identical_windows_merge_with_authoritative_metadata() {
        let cost = flat_cost();
        let mut a = build_sessions(
            &[window(10, WindowSource::FirstMessage)],
            &[event(at(10, 10), "a", 100)],
            &cost,
            at(16, 0),
        );
        let limit = window(10, WindowSource::LimitMessage).with_meta("message", "limit reached|1705330800");
        let b = build_sessions(&[limit], &[event(at(11, 0), "b", 50)], &cost, at(16, 0));
        a.extend(b);

        let merged = deduplicate_sessions(a);
        assert_eq!(merged.len(), 1);
        let s = &merged[0];
        assert_eq!(s.total_tokens(), 150);
        assert_eq!(s.message_count, 2);
        assert_eq!(s.source(), WindowSource::LimitMessage);
        assert!(s.window.is_detected);
        assert_eq!(s.project_name, MULTIPLE_PROJECTS);
        assert!(s.limit_message.is_some());
        assert!((s.total_cost - 0.15).abs() < 1e-9);
    }

    #[test]
    fn active_means_open_and_not_gap() {
        let windows = [window(9, WindowSource::FirstMessage), window(15, WindowSource::Gap)];
        let events = [event(at(9, 30), "p", 1), event(at(15, 30), "p", 1)];
        let mut sessions = build_sessions(&windows, &events, &flat_cost(), at(16, 0));
        mark_active(&mut sessions, at(16, 0));
        assert!(!sessions[0].is_active);
        assert!(sessions[1].is_active);
    }

    #[test]
    fn drift_reports_unassigned_tokens() {
        let windows = [window(9, WindowSource::FirstMessage)];
        let events = [event(at(9, 30), "p", 90), event(at(20, 0), "p", 10)];
        let sessions = build_sessions(&windows, &events, &flat_cost(), at(21, 0));
        let drift = check_token_drift(&events, &sessions);
        assert!((drift - 0.1).abs() < 1e-9);
    }
}
