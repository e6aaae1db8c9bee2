//! # Metrics Module
//!
//! Burn rate, plan utilization and end-of-window projection for sessions.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::models::{BurnRate, Projection, Session};
use crate::utils::tier_token_limit;

/// Per-window plan caps. Either may be unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PlanLimits {
    pub token_limit: Option<f64>,
    pub cost_limit: Option<f64>,
}

impl PlanLimits {
    /// Explicit max tokens wins over the tier name.
    pub fn resolve(tier: Option<&str>, max_tokens: Option<f64>) -> Self {
        let token_limit = max_tokens
            .filter(|v| v.is_finite() && *v > 0.0)
            .or_else(|| tier.and_then(tier_token_limit));
        Self {
            token_limit,
            cost_limit: None,
        }
    }
}

fn elapsed_minutes(session: &Session, now: DateTime<Utc>) -> f64 {
    let elapsed = now.min(session.end) - session.start;
    let elapsed = elapsed.max(TimeDelta::minutes(1));
    elapsed.num_seconds() as f64 / 60.0
}

pub fn burn_rate(session: &Session, now: DateTime<Utc>) -> BurnRate {
    let minutes = elapsed_minutes(session, now);
    BurnRate {
        tokens_per_minute: session.total_tokens() as f64 / minutes,
        cost_per_hour: session.total_cost / minutes * 60.0,
    }
}

/// Totals extrapolated to the end of the window at the current burn rate.
pub fn project(session: &Session, now: DateTime<Utc>, limits: &PlanLimits) -> Projection {
    let tokens = session.total_tokens() as f64;
    let rate = burn_rate(session, now);

    let remaining_minutes = if session.is_active {
        ((session.end - now).num_seconds().max(0) as f64) / 60.0
    } else {
        0.0
    };

    let mut projected_tokens = tokens + rate.tokens_per_minute * remaining_minutes;
    let mut projected_cost = session.total_cost + rate.cost_per_hour / 60.0 * remaining_minutes;
    if let Some(limit) = limits.token_limit
        && projected_tokens > limit
    {
        // Scale cost with the capped tokens.
        let extra = projected_tokens - tokens;
        let allowed = (limit - tokens).max(0.0);
        let grown_cost = projected_cost - session.total_cost;
        projected_cost = session.total_cost
            + if extra > 0.0 {
                grown_cost * allowed / extra
            } else {
                0.0
            };
        projected_tokens = limit.max(tokens);
    }
    if let Some(cap) = limits.cost_limit {
        projected_cost = projected_cost.min(cap.max(session.total_cost));
    }

    let usage_percent = limits.token_limit.map(|l| tokens * 100.0 / l);
    let projected_percent = limits.token_limit.map(|l| projected_tokens * 100.0 / l);
    let minutes_to_limit = match limits.token_limit {
        Some(l) if rate.tokens_per_minute > 0.0 => {
            Some(((l - tokens) / rate.tokens_per_minute).max(0.0))
        }
        _ => None,
    };

    Projection {
        projected_tokens: projected_tokens.round() as u64,
        projected_cost,
        remaining_minutes,
        usage_percent,
        projected_percent,
        minutes_to_limit,
    }
}

/// Fill `burn_rate` and `projection` on a non-gap session.
pub fn calculate_session_metrics(session: &mut Session, now: DateTime<Utc>, limits: &PlanLimits) {
    if session.is_gap {
        session.burn_rate = None;
        session.projection = None;
        return;
    }
    session.burn_rate = Some(burn_rate(session, now));
    session.projection = Some(project(session, now, limits));
}
