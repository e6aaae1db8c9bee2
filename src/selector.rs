//! # Selector Module
//!
//! Resolves competing candidates into a sorted, non-overlapping window set.
//! Live limit windows carry the provider's own reset time and win every
//! conflict; everything else is taken by priority, then start time, and
//! checked against the window history.

use chrono::{DateTime, TimeDelta, Utc};

use crate::history::{ValidationOutcome, WindowHistoryStore};
use crate::models::WindowCandidate;

/// Half-open overlap, matching how events are assigned: a window ending at
/// `t` and one starting at `t` can both stand.
pub fn conflicts(a: &WindowCandidate, b: &WindowCandidate) -> bool {
    a.start < b.end && b.start < a.end
}

fn by_priority_then_start(a: &WindowCandidate, b: &WindowCandidate) -> std::cmp::Ordering {
    b.priority.cmp(&a.priority).then(a.start.cmp(&b.start))
}

pub struct WindowSelector<'a> {
    history: &'a WindowHistoryStore,
    session_duration: TimeDelta,
}

impl<'a> WindowSelector<'a> {
    pub fn new(history: &'a WindowHistoryStore, session_duration: TimeDelta) -> Self {
        Self {
            history,
            session_duration,
        }
    }

    pub fn select(
        &self,
        candidates: Vec<WindowCandidate>,
        now: DateTime<Utc>,
    ) -> Vec<WindowCandidate> {
        let d = self.session_duration;
        let (mut live_limits, mut rest): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .map(|mut c| {
                c.normalize(d);
                c
            })
            .partition(|c| c.is_limit && c.end > now);
        live_limits.sort_by(by_priority_then_start);
        rest.sort_by(by_priority_then_start);

        let mut accepted: Vec<WindowCandidate> = Vec::new();

        for limit in live_limits {
            let before = accepted.len();
            accepted.retain(|a| !conflicts(a, &limit));
            let evicted = before - accepted.len();
            if evicted > 0 {
                tracing::debug!(start = %limit.start, evicted, "limit window evicted overlapping windows");
            }
            accepted.push(limit);
        }

        for mut c in rest {
            if accepted.iter().any(|a| conflicts(a, &c)) {
                continue;
            }
            if !c.is_limit {
                match self.history.validate(c.start, c.end, now) {
                    Err(reason) => {
                        tracing::debug!(source = %c.source, start = %c.start, %reason, "candidate rejected");
                        continue;
                    }
                    Ok(v) if v.outcome == ValidationOutcome::Adjusted => {
                        let from = c.start.to_rfc3339();
                        c = c.with_meta("adjusted_from", from);
                        c.move_to(v.start, d);
                        if accepted.iter().any(|a| conflicts(a, &c)) {
                            tracing::debug!(source = %c.source, start = %c.start, "adjusted candidate overlaps, dropped");
                            continue;
                        }
                    }
                    Ok(v) if v.outcome == ValidationOutcome::FellBack => {
                        c = c.with_meta("validation", "fell_back");
                    }
                    Ok(_) => {}
                }
            }
            accepted.push(c);
        }

        accepted.sort_by_key(|c| c.start);
        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HistoryPolicy;
    use crate::models::{WindowRecord, WindowSource};
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, h, m, 0).unwrap()
    }

    fn cand(h: u32, m: u32, source: WindowSource) -> WindowCandidate {
        WindowCandidate::new(at(h, m), TimeDelta::hours(5), source)
    }

    fn select(candidates: Vec<WindowCandidate>, now: DateTime<Utc>) -> Vec<WindowCandidate> {
        let store = WindowHistoryStore::in_memory(HistoryPolicy::default());
        WindowSelector::new(&store, TimeDelta::hours(5)).select(candidates, now)
    }

    #[test]
    fn higher_priority_wins_overlap() {
        let out = select(
            vec![
                cand(10, 0, WindowSource::FirstMessage),
                cand(11, 0, WindowSource::ContinuousActivity),
            ],
            at(20, 0),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].source, WindowSource::ContinuousActivity);
    }

    #[test]
    fn continuous_tiles_may_touch() {
        let out = select(
            vec![
                cand(9, 0, WindowSource::ContinuousActivity),
                cand(14, 0, WindowSource::ContinuousActivity),
            ],
            at(20, 0),
        );
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn touching_windows_do_not_conflict() {
        let out = select(
            vec![cand(14, 0, WindowSource::Gap), cand(9, 0, WindowSource::FirstMessage)],
            at(20, 0),
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].source, WindowSource::FirstMessage);
        assert_eq!(out[1].source, WindowSource::Gap);
    }

    #[test]
    fn overlap_by_one_minute_conflicts() {
        let out = select(
            vec![cand(13, 59, WindowSource::Gap), cand(9, 0, WindowSource::FirstMessage)],
            at(20, 0),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].source, WindowSource::Gap);
    }

    #[test]
    fn live_limit_evicts_and_survives() {
        let limit = cand(8, 25, WindowSource::LimitMessage).with_priority(10);
        let out = select(
            vec![
                cand(9, 0, WindowSource::ContinuousActivity),
                cand(10, 0, WindowSource::Gap),
                limit.clone(),
            ],
            at(13, 20),
        );
        assert_eq!(out, vec![limit]);
    }

    #[test]
    fn output_is_sorted_and_fixed_length() {
        let out = select(
            vec![
                cand(20, 0, WindowSource::Gap),
                cand(9, 0, WindowSource::FirstMessage),
            ],
            at(22, 0),
        );
        assert_eq!(out.len(), 2);
        assert!(out[0].start < out[1].start);
        assert!(out.iter().all(|c| c.end - c.start == TimeDelta::hours(5)));
    }

    #[test]
    fn candidate_shifted_by_history_is_rechecked() {
        let store = WindowHistoryStore::in_memory(HistoryPolicy::default());
        let now = at(23, 0);
        let prev = WindowRecord::new("prev", WindowSource::Gap, at(6, 0), at(11, 0), at(6, 0));
        store.add_or_update(prev, now).unwrap();

        let selector = WindowSelector::new(&store, TimeDelta::hours(5));
        let out = selector.select(vec![cand(9, 0, WindowSource::FirstMessage)], now);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].start, at(11, 0));
        assert!(out[0].metadata.contains_key("adjusted_from"));

        let out = selector.select(
            vec![
                cand(15, 0, WindowSource::ContinuousActivity),
                cand(9, 0, WindowSource::FirstMessage),
            ],
            now,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].source, WindowSource::ContinuousActivity);
    }

    #[test]
    fn shift_past_horizon_keeps_original_span() {
        let store = WindowHistoryStore::in_memory(HistoryPolicy::default());
        let now = at(12, 0);
        let prev =
            WindowRecord::new("prev", WindowSource::ActiveWindow, at(11, 0), at(16, 0), at(11, 0));
        store.add_or_update(prev, now).unwrap();

        let out = WindowSelector::new(&store, TimeDelta::hours(5))
            .select(vec![cand(12, 0, WindowSource::FirstMessage)], now);
        assert_eq!(out.len(), 1);
        assert_eq!((out[0].start, out[0].end), (at(12, 0), at(17, 0)));
        assert!(!out[0].metadata.contains_key("adjusted_from"));
        assert_eq!(out[0].metadata.get("validation").map(String::as_str), Some("fell_back"));
    }
}
