//! # Limits Module
//!
//! Recognizes rate-limit notifications in the event stream. Detectors are
//! tried strongest first and the first match wins for a given event:
//!
//! 1. `limit reached|<epoch>` carries the provider's reset time
//! 2. "rate limit ... wait N minutes" is relative to the message time
//! 3. plain keywords mark a limit without a reset time

use chrono::{DateTime, TimeDelta, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{LimitKind, LimitSignal, TimestampedEvent, WindowSource};

static EXPLICIT_RESET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)limit\s+reached\s*\|\s*(\d+)").unwrap());

static WAIT_TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)rate\s+limit.*?wait\s+(\d+)\s+minutes?").unwrap());

static KEYWORD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(rate\s+limit|usage\s+limit|limit\s+reached|limit\s+exceeded)").unwrap()
});

// Epoch values above this are milliseconds.
const MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

/// Normalize a provider epoch (seconds or milliseconds) to a UTC instant.
pub fn epoch_to_utc(n: i64) -> Option<DateTime<Utc>> {
    let secs = if n > MILLIS_THRESHOLD { n / 1000 } else { n };
    DateTime::<Utc>::from_timestamp(secs, 0)
}

fn explicit_reset(ts: DateTime<Utc>, text: &str) -> Option<LimitSignal> {
    let caps = EXPLICIT_RESET_RE.captures(text)?;
    let n: i64 = caps.get(1)?.as_str().parse().ok()?;
    let reset = epoch_to_utc(n)?;
    Some(LimitSignal {
        timestamp: ts,
        reset_time: Some(reset),
        content: text.to_string(),
        confidence: 1.0,
        kind: LimitKind::ExplicitReset,
    })
}

fn wait_time(ts: DateTime<Utc>, text: &str) -> Option<LimitSignal> {
    let caps = WAIT_TIME_RE.captures(text)?;
    let minutes: i64 = caps.get(1)?.as_str().parse().ok()?;
    let reset = ts.checked_add_signed(TimeDelta::try_minutes(minutes)?)?;
    Some(LimitSignal {
        timestamp: ts,
        reset_time: Some(reset),
        content: text.to_string(),
        confidence: 0.9,
        kind: LimitKind::WaitTime,
    })
}

fn keyword(ts: DateTime<Utc>, text: &str) -> Option<LimitSignal> {
    KEYWORD_RE.is_match(text).then(|| LimitSignal {
        timestamp: ts,
        reset_time: None,
        content: text.to_string(),
        confidence: 0.5,
        kind: LimitKind::Keyword,
    })
}

/// Interpret one message text.
pub fn parse_message(ts: DateTime<Utc>, text: &str) -> Option<LimitSignal> {
    explicit_reset(ts, text)
        .or_else(|| wait_time(ts, text))
        .or_else(|| keyword(ts, text))
}

/// Scan provider notices for limit messages. Prompt and reply text is never
/// trusted, a user typing "rate limit" must not move a window.
pub fn parse(events: &[TimestampedEvent]) -> Vec<LimitSignal> {
    let signals: Vec<LimitSignal> = events
        .iter()
        .filter(|e| e.is_notice)
        .filter_map(|e| {
            let text = e.content.as_deref()?;
            parse_message(e.ts, text)
        })
        .collect();
    if !signals.is_empty() {
        tracing::debug!(count = signals.len(), "limit notifications found");
    }
    signals
}

/// Window start implied by the most recent limit message with a reset time.
/// Ties on the message timestamp go to the later reset.
pub fn detect_window_from_limits(
    signals: &[LimitSignal],
    session_duration: TimeDelta,
) -> Option<(DateTime<Utc>, WindowSource)> {
    signals
        .iter()
        .filter_map(|s| s.reset_time.map(|r| (s.timestamp, r)))
        .max()
        .and_then(|(_, reset)| reset.checked_sub_signed(session_duration))
        .map(|start| (start, WindowSource::LimitMessage))
}
