//! # Detector Module
//!
//! End-to-end window detection for one snapshot of events:
//!
//! 1. parse limit notifications
//! 2. collect candidates from every strategy
//! 3. select a non-overlapping window set
//! 4. build, merge and gap-fill sessions, then compute metrics
//! 5. record the selected windows in the history store
//!
//! The pipeline is synchronous. Apart from the injected history store it
//! keeps no state between calls.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::borrow::Cow;

use crate::cache::EventCache;
use crate::config::DetectorConfig;
use crate::history::WindowHistoryStore;
use crate::limits;
use crate::metrics::{PlanLimits, calculate_session_metrics};
use crate::models::{
    LimitSignal, Session, TimestampedEvent, WindowCandidate, WindowDetectionInfo, WindowRecord,
    WindowSource,
};
use crate::pricing::CostCalculator;
use crate::selector::WindowSelector;
use crate::sessions::{
    build_sessions, check_token_drift, deduplicate_sessions, insert_gap_sessions, mark_active,
};
use crate::strategies::{DetectionContext, StrategyRegistry};

#[derive(Debug, Clone, Serialize)]
pub struct DetectionOutput {
    /// Sessions ordered by start, gap sessions included.
    pub sessions: Vec<Session>,
    /// Windows chosen by the selector.
    pub windows: Vec<WindowCandidate>,
    pub signals: Vec<LimitSignal>,
    /// Detection metadata per non-gap session id.
    pub detection_info: Vec<(String, WindowDetectionInfo)>,
    /// Relative difference between raw and assigned tokens.
    pub token_drift: f64,
}

impl DetectionOutput {
    pub fn active_session(&self) -> Option<&Session> {
        self.sessions.iter().rev().find(|s| s.is_active)
    }
}

pub struct WindowDetector<'a> {
    config: DetectorConfig,
    history: &'a WindowHistoryStore,
    cost: &'a dyn CostCalculator,
    registry: StrategyRegistry,
    plan: PlanLimits,
    record_windows: bool,
}

impl<'a> WindowDetector<'a> {
    pub fn new(
        config: DetectorConfig,
        history: &'a WindowHistoryStore,
        cost: &'a dyn CostCalculator,
    ) -> Self {
        Self {
            config,
            history,
            cost,
            registry: StrategyRegistry::default(),
            plan: PlanLimits::default(),
            record_windows: true,
        }
    }

    pub fn with_plan_limits(mut self, plan: PlanLimits) -> Self {
        self.plan = plan;
        self
    }

    pub fn with_registry(mut self, registry: StrategyRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// When false, selected windows are not written to the history store.
    pub fn with_recording(mut self, record: bool) -> Self {
        self.record_windows = record;
        self
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Detect over the cache's committed snapshot. A refresh in flight does
    /// not affect the result.
    pub fn detect_cached(&self, cache: &EventCache, now: DateTime<Utc>) -> DetectionOutput {
        let events = cache.snapshot();
        self.detect(&events, now)
    }

    pub fn detect(&self, events: &[TimestampedEvent], now: DateTime<Utc>) -> DetectionOutput {
        let d = self.config.session_duration;
        let events: Cow<'_, [TimestampedEvent]> = if events.is_sorted_by_key(|e| e.ts) {
            Cow::Borrowed(events)
        } else {
            let mut owned = events.to_vec();
            owned.sort_by_key(|e| e.ts);
            Cow::Owned(owned)
        };
        let events = events.as_ref();

        let signals = limits::parse(events);
        let history = self.history.snapshot();
        let ctx = DetectionContext {
            events,
            signals: &signals,
            history: &history,
            now,
            session_duration: d,
        };
        let candidates = self.registry.candidates(&ctx);
        let candidate_count = candidates.len();

        let windows = WindowSelector::new(self.history, d).select(candidates, now);

        let sessions = build_sessions(&windows, events, self.cost, now);
        let sessions = deduplicate_sessions(sessions);
        let mut sessions = insert_gap_sessions(sessions, d);
        mark_active(&mut sessions, now);
        for s in &mut sessions {
            calculate_session_metrics(s, now, &self.plan);
        }
        let token_drift = check_token_drift(events, &sessions);

        if self.record_windows {
            self.record(&sessions, now);
        }

        tracing::debug!(
            events = events.len(),
            candidates = candidate_count,
            windows = windows.len(),
            sessions = sessions.len(),
            "window detection finished"
        );

        let detection_info = sessions
            .iter()
            .filter(|s| !s.is_gap)
            .map(|s| (s.id.clone(), s.window.clone()))
            .collect();

        DetectionOutput {
            sessions,
            windows,
            signals,
            detection_info,
            token_drift,
        }
    }

    /// Write selected windows back to history. A limit window counts as
    /// reached once its reset time has passed.
    fn record(&self, sessions: &[Session], now: DateTime<Utc>) {
        for s in sessions.iter().filter(|s| !s.is_gap) {
            let source = s.source();
            let mut record = WindowRecord::new(s.id.clone(), source, s.start, s.end, now);
            let is_limit = matches!(
                source,
                WindowSource::LimitMessage | WindowSource::HistoryLimit
            );
            record.is_limit_reached = is_limit && s.end <= now;
            record.limit_message = s.limit_message.clone();
            record.is_account_level = s.is_account_level;

            if let Err(reason) = self.history.add_or_update(record, now) {
                tracing::debug!(session_id = %s.id, %reason, "window not recorded");
            }
        }
    }
}
