//! # Strategies Module
//!
//! Each strategy turns one kind of evidence into window candidates. The set
//! is closed; every [`WindowSource`] has exactly one strategy. Strategies
//! are pure functions of a [`DetectionContext`], which holds a snapshot of
//! the window history rather than the store itself.

use chrono::{DateTime, TimeDelta, Utc};
use std::collections::BTreeMap;

use crate::config::ACCOUNT_WINDOW_LOOKBACK_HOURS;
use crate::models::{LimitSignal, TimestampedEvent, WindowCandidate, WindowRecord, WindowSource};
use crate::utils::floor_to_hour;

/// Inputs shared by all strategies for one detection run.
#[derive(Debug, Clone, Copy)]
pub struct DetectionContext<'a> {
    /// Time-ordered events.
    pub events: &'a [TimestampedEvent],
    pub signals: &'a [LimitSignal],
    pub history: &'a [WindowRecord],
    pub now: DateTime<Utc>,
    pub session_duration: TimeDelta,
}

impl DetectionContext<'_> {
    fn first_ts(&self) -> Option<DateTime<Utc>> {
        self.events.first().map(|e| e.ts)
    }

    fn candidate(&self, start: DateTime<Utc>, source: WindowSource) -> WindowCandidate {
        WindowCandidate::new(start, self.session_duration, source)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectionStrategy {
    HistoryLimit,
    LimitMessage,
    ContinuousActivity,
    HistoryAccount,
    ActiveWindow,
    Gap,
    FirstMessage,
}

impl DetectionStrategy {
    pub fn source(&self) -> WindowSource {
        match self {
            Self::HistoryLimit => WindowSource::HistoryLimit,
            Self::LimitMessage => WindowSource::LimitMessage,
            Self::ContinuousActivity => WindowSource::ContinuousActivity,
            Self::HistoryAccount => WindowSource::HistoryAccount,
            Self::ActiveWindow => WindowSource::ActiveWindow,
            Self::Gap => WindowSource::Gap,
            Self::FirstMessage => WindowSource::FirstMessage,
        }
    }

    pub fn name(&self) -> &'static str {
        self.source().as_str()
    }

    pub fn priority(&self) -> u8 {
        self.source().base_priority()
    }

    /// Candidates for this strategy. `prior` holds whatever earlier
    /// strategies in the registry produced.
    pub fn detect(
        &self,
        ctx: &DetectionContext<'_>,
        prior: &[WindowCandidate],
    ) -> Vec<WindowCandidate> {
        match self {
            Self::HistoryLimit => history_limit(ctx),
            Self::LimitMessage => limit_message(ctx),
            Self::ContinuousActivity => continuous_activity(ctx),
            Self::HistoryAccount => history_account(ctx),
            Self::ActiveWindow => active_window(ctx, prior),
            Self::Gap => gap(ctx),
            Self::FirstMessage => first_message(ctx),
        }
    }
}

/// Limit windows implied by the current signals: one per distinct reset
/// time, described by the latest message announcing it.
fn signal_windows<'a>(ctx: &DetectionContext<'a>) -> BTreeMap<DateTime<Utc>, &'a LimitSignal> {
    let mut by_reset: BTreeMap<DateTime<Utc>, &'a LimitSignal> = BTreeMap::new();
    for s in ctx.signals {
        let Some(reset) = s.reset_time else { continue };
        if by_reset.get(&reset).is_none_or(|prev| prev.timestamp < s.timestamp) {
            by_reset.insert(reset, s);
        }
    }
    by_reset
}

fn history_limit(ctx: &DetectionContext<'_>) -> Vec<WindowCandidate> {
    let Some(first) = ctx.first_ts() else {
        return Vec::new();
    };
    // Windows the logs still announce are proposed by `limit_message`.
    let announced: Vec<DateTime<Utc>> = signal_windows(ctx).into_keys().collect();

    ctx.history
        .iter()
        .filter(|r| r.is_limit_reached)
        .filter(|r| r.overlaps(first, ctx.now))
        .filter(|r| !announced.contains(&r.end))
        .map(|r| {
            let mut c = ctx
                .candidate(r.start, WindowSource::HistoryLimit)
                .with_meta("session_id", r.session_id.clone());
            if let Some(msg) = &r.limit_message {
                c = c.with_meta("message", msg.clone());
            }
            c
        })
        .collect()
}

fn limit_message(ctx: &DetectionContext<'_>) -> Vec<WindowCandidate> {
    signal_windows(ctx)
        .into_iter()
        .filter_map(|(reset, s)| {
            let start = reset.checked_sub_signed(ctx.session_duration)?;
            let priority = if reset > ctx.now { 10 } else { 9 };
            Some(
                ctx.candidate(start, WindowSource::LimitMessage)
                    .with_priority(priority)
                    .with_meta("reset_time", reset.to_rfc3339())
                    .with_meta("message", s.content.clone())
                    .with_meta("confidence", format!("{:.2}", s.confidence)),
            )
        })
        .collect()
}

/// Split into runs of activity separated by idle gaps of at least one
/// session duration.
fn activity_runs(events: &[TimestampedEvent], duration: TimeDelta) -> Vec<&[TimestampedEvent]> {
    let mut runs = Vec::new();
    let mut begin = 0;
    for i in 1..events.len() {
        if events[i].ts - events[i - 1].ts >= duration {
            runs.push(&events[begin..i]);
            begin = i;
        }
    }
    if begin < events.len() {
        runs.push(&events[begin..]);
    }
    runs
}

fn continuous_activity(ctx: &DetectionContext<'_>) -> Vec<WindowCandidate> {
    let d = ctx.session_duration;
    let mut out = Vec::new();
    for run in activity_runs(ctx.events, d) {
        let (Some(first), Some(last)) = (run.first(), run.last()) else {
            continue;
        };
        let origin = floor_to_hour(first.ts);
        if last.ts < origin + d {
            continue;
        }

        let mut start = origin;
        let mut idx = 0;
        while start <= last.ts {
            let end = start + d;
            while idx < run.len() && run[idx].ts < start {
                idx += 1;
            }
            if idx < run.len() && run[idx].ts < end {
                out.push(ctx.candidate(start, WindowSource::ContinuousActivity));
            }
            start = end;
        }
    }
    out
}

fn history_account(ctx: &DetectionContext<'_>) -> Vec<WindowCandidate> {
    let cutoff = ctx.now - TimeDelta::hours(ACCOUNT_WINDOW_LOOKBACK_HOURS);
    ctx.history
        .iter()
        .filter(|r| r.is_account_level && !r.is_limit_reached)
        .filter(|r| r.end >= cutoff && r.end <= ctx.now + ctx.session_duration)
        .map(|r| {
            ctx.candidate(r.start, WindowSource::HistoryAccount)
                .with_meta("session_id", r.session_id.clone())
        })
        .collect()
}

fn active_window(ctx: &DetectionContext<'_>, prior: &[WindowCandidate]) -> Vec<WindowCandidate> {
    let d = ctx.session_duration;
    let now = ctx.now;
    let Some(last) = ctx.events.last() else {
        return Vec::new();
    };
    if last.ts < now - d || prior.iter().any(|c| c.contains(now)) {
        return Vec::new();
    }

    let nearest_end = prior.iter().map(|c| c.end).filter(|end| *end <= now).max();
    let start = match nearest_end {
        Some(end) if end + d > now => end,
        _ => floor_to_hour(now),
    };
    vec![ctx.candidate(start, WindowSource::ActiveWindow)]
}

fn gap(ctx: &DetectionContext<'_>) -> Vec<WindowCandidate> {
    ctx.events
        .windows(2)
        .filter(|pair| pair[1].ts - pair[0].ts >= ctx.session_duration)
        .map(|pair| {
            ctx.candidate(floor_to_hour(pair[1].ts), WindowSource::Gap)
                .with_meta("idle_minutes", (pair[1].ts - pair[0].ts).num_minutes().to_string())
        })
        .collect()
}

fn first_message(ctx: &DetectionContext<'_>) -> Vec<WindowCandidate> {
    ctx.first_ts()
        .map(|ts| vec![ctx.candidate(floor_to_hour(ts), WindowSource::FirstMessage)])
        .unwrap_or_default()
}

/// Ordered strategy list. Results are concatenated in order; the active
/// window strategy must come last since it looks at everything before it.
#[derive(Debug, Clone)]
pub struct StrategyRegistry {
    strategies: Vec<DetectionStrategy>,
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new(vec![
            DetectionStrategy::HistoryLimit,
            DetectionStrategy::LimitMessage,
            DetectionStrategy::ContinuousActivity,
            DetectionStrategy::HistoryAccount,
            DetectionStrategy::Gap,
            DetectionStrategy::FirstMessage,
            DetectionStrategy::ActiveWindow,
        ])
    }
}

impl StrategyRegistry {
    pub fn new(strategies: Vec<DetectionStrategy>) -> Self {
        Self { strategies }
    }

    pub fn strategies(&self) -> &[DetectionStrategy] {
        &self.strategies
    }

    pub fn candidates(&self, ctx: &DetectionContext<'_>) -> Vec<WindowCandidate> {
        let mut all: Vec<WindowCandidate> = Vec::new();
        for strategy in &self.strategies {
            let found = strategy.detect(ctx, &all);
            if !found.is_empty() {
                tracing::debug!(strategy = strategy.name(), count = found.len(), "candidates");
            }
            all.extend(found);
        }
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits;
    use crate::models::{EventOrigin, TokenUsage};
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, h, m, 0).unwrap()
    }

    fn event(ts: DateTime<Utc>) -> TimestampedEvent {
        TimestampedEvent {
            ts,
            project: "proj".into(),
            usage: TokenUsage {
                input: 10,
                ..Default::default()
            },
            model: None,
            event_type: "assistant".into(),
            origin: EventOrigin::Primary,
            content: None,
            is_notice: false,
        }
    }

    fn ctx<'a>(
        events: &'a [TimestampedEvent],
        signals: &'a [LimitSignal],
        history: &'a [WindowRecord],
        now: DateTime<Utc>,
    ) -> DetectionContext<'a> {
        DetectionContext {
            events,
            signals,
            history,
            now,
            session_duration: TimeDelta::hours(5),
        }
    }

    #[test]
    fn first_message_aligns_to_hour() {
        let events = [event(at(10, 15))];
        let c = DetectionStrategy::FirstMessage.detect(&ctx(&events, &[], &[], at(11, 0)), &[]);
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].start, at(10, 0));
        assert_eq!(c[0].end, at(15, 0));
        assert_eq!(c[0].priority, 3);
    }

    #[test]
    fn continuous_activity_skips_runs_inside_one_window() {
        let events = [event(at(10, 15)), event(at(12, 0))];
        let c = DetectionStrategy::ContinuousActivity
            .detect(&ctx(&events, &[], &[], at(13, 0)), &[]);
        assert!(c.is_empty());
    }

    #[test]
    fn continuous_activity_tiles_long_runs() {
        let events: Vec<_> = (0..13)
            .map(|i| event(at(9, 40) + TimeDelta::minutes(30 * i)))
            .chain([event(at(16, 8))])
            .collect();
        let c = DetectionStrategy::ContinuousActivity
            .detect(&ctx(&events, &[], &[], at(16, 30)), &[]);
        let spans: Vec<_> = c.iter().map(|c| (c.start, c.end)).collect();
        assert_eq!(spans, vec![(at(9, 0), at(14, 0)), (at(14, 0), at(19, 0))]);
    }

    #[test]
    fn gap_proposes_window_at_later_event() {
        let events = [event(at(9, 10)), event(at(17, 30))];
        let c = DetectionStrategy::Gap.detect(&ctx(&events, &[], &[], at(18, 0)), &[]);
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].start, at(17, 0));
    }

    #[test]
    fn unexpired_limit_message_gets_top_priority() {
        let mut e = event(at(13, 15));
        e.content = Some("rate limit exceeded, please wait 10 minutes".into());
        e.is_notice = true;
        let events = [e];
        let signals = limits::parse(&events);

        let live = DetectionStrategy::LimitMessage.detect(&ctx(&events, &signals, &[], at(13, 20)), &[]);
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].start, at(8, 25));
        assert_eq!(live[0].priority, 10);
        assert!(live[0].is_limit);

        let expired = DetectionStrategy::LimitMessage.detect(&ctx(&events, &signals, &[], at(14, 0)), &[]);
        assert_eq!(expired[0].priority, 9);
    }

    #[test]
    fn reset_before_representable_start_is_skipped() {
        let events = [event(at(10, 0))];
        let signals = [LimitSignal {
            timestamp: at(10, 0),
            reset_time: Some(DateTime::<Utc>::MIN_UTC),
            content: "limit reached|0".into(),
            confidence: 1.0,
            kind: crate::models::LimitKind::ExplicitReset,
        }];
        let c = DetectionStrategy::LimitMessage.detect(&ctx(&events, &signals, &[], at(11, 0)), &[]);
        assert!(c.is_empty());
    }

    #[test]
    fn history_limit_needs_overlap_with_activity() {
        let mut old = WindowRecord::new("old", WindowSource::LimitMessage, at(1, 0), at(6, 0), at(6, 0));
        old.is_limit_reached = true;
        let mut hit = WindowRecord::new("hit", WindowSource::LimitMessage, at(8, 0), at(13, 0), at(13, 0));
        hit.is_limit_reached = true;
        let history = [old, hit];
        let events = [event(at(9, 0))];
        let c = DetectionStrategy::HistoryLimit.detect(&ctx(&events, &[], &history, at(14, 0)), &[]);
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].start, at(8, 0));
        assert_eq!(c[0].metadata.get("session_id").map(String::as_str), Some("hit"));
    }

    #[test]
    fn history_account_uses_recent_multi_project_windows() {
        let mut acct = WindowRecord::new("a", WindowSource::FirstMessage, at(9, 0), at(14, 0), at(9, 0));
        acct.is_account_level = true;
        let single = WindowRecord::new("s", WindowSource::FirstMessage, at(3, 0), at(8, 0), at(3, 0));
        let history = [acct, single];
        let events = [event(at(9, 30))];
        let c = DetectionStrategy::HistoryAccount.detect(&ctx(&events, &[], &history, at(15, 0)), &[]);
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].source, WindowSource::HistoryAccount);
    }

    #[test]
    fn active_window_only_when_now_uncovered() {
        let events = [event(at(9, 10)), event(at(14, 20))];
        let context = ctx(&events, &[], &[], at(14, 30));
        let prior = vec![WindowCandidate::new(at(9, 0), TimeDelta::hours(5), WindowSource::FirstMessage)];
        let c = DetectionStrategy::ActiveWindow.detect(&context, &prior);
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].start, at(14, 0));
        assert_eq!(c[0].priority, 6);

        let covering = vec![WindowCandidate::new(at(10, 0), TimeDelta::hours(5), WindowSource::FirstMessage)];
        assert!(DetectionStrategy::ActiveWindow.detect(&context, &covering).is_empty());
    }

    #[test]
    fn active_window_needs_recent_activity() {
        let events = [event(at(3, 0))];
        let c = DetectionStrategy::ActiveWindow.detect(&ctx(&events, &[], &[], at(14, 30)), &[]);
        assert!(c.is_empty());
    }

    #[test]
    fn registry_puts_active_window_last() {
        let registry = StrategyRegistry::default();
        assert_eq!(registry.strategies().len(), 7);
        assert_eq!(registry.strategies().last(), Some(&DetectionStrategy::ActiveWindow));
    }
}
