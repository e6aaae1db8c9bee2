use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use std::env;
use std::path::PathBuf;

// Pro plan tokens per 5-hour window; Max tiers are derived as 5x and 20x.
// Override with CLAUDE_5H_BASE_TOKENS, or set a hard number with
// CLAUDE_PLAN_MAX_TOKENS.
pub const BASE_TOKEN_LIMIT: f64 = 200_000.0;

pub fn claude_paths(override_env: Option<&str>) -> Vec<PathBuf> {
    let mut paths = vec![];
    if let Some(list) = override_env {
        let list = list.trim();
        if !list.is_empty() {
            for p in list.split(',') {
                let p = p.trim();
                if p.is_empty() {
                    continue;
                }
                let pb = PathBuf::from(p);
                if pb.join("projects").is_dir() {
                    paths.push(pb);
                }
            }
            if !paths.is_empty() {
                return paths;
            }
        }
    }
    let basedirs = directories::BaseDirs::new();
    let home = basedirs
        .as_ref()
        .map(|b| b.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("~"));
    let xdg_config = basedirs
        .as_ref()
        .map(|b| b.config_dir().to_path_buf())
        .unwrap_or_else(|| home.join(".config"));
    // Prefer ~/.claude, then XDG config
    for base in [home.join(".claude"), xdg_config.join("claude")].into_iter() {
        if base.join("projects").is_dir() {
            paths.push(base);
        }
    }
    paths
}

/// `~/.claude/history/window_history.json`
pub fn default_history_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| {
        b.home_dir()
            .join(".claude")
            .join("history")
            .join("window_history.json")
    })
}


pub fn format_currency(v: f64) -> String {
    format!("{v:.2}")
}

pub fn format_tokens(n: u64) -> String {
    if n >= 1_000_000_000 {
        format!("{:.1}B", n as f64 / 1e9)
    } else if n >= 1_000_000 {
        format!("{:.1}M", n as f64 / 1e6)
    } else if n >= 1_000 {
        format!("{:.1}K", n as f64 / 1e3)
    } else {
        n.to_string()
    }
}

pub fn format_duration_minutes(minutes: f64) -> String {
    let total = minutes.max(0.0).round() as i64;
    let (h, m) = (total / 60, total % 60);
    if h > 0 { format!("{h}h {m:02}m") } else { format!("{m}m") }
}


/// Start of the UTC hour containing `ts`.
pub fn floor_to_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    floor_to(ts, TimeDelta::hours(1))
}

/// Start of the `bucket`-sized slot containing `ts`, counted from the epoch.
pub fn floor_to(ts: DateTime<Utc>, bucket: TimeDelta) -> DateTime<Utc> {
    ts.duration_trunc(bucket).unwrap_or(ts)
}

pub fn parse_i64_env(var: &str) -> Option<i64> {
    env::var(var)
        .ok()
        .and_then(|v| v.trim().parse::<i64>().ok())
}

/// Read the base five-hour token limit for Pro (defaults to 200k). Max 5x/20x
/// caps are derived from it when exact caps are not known.
pub fn five_hour_base_tokens() -> f64 {
    if let Ok(s) = env::var("CLAUDE_5H_BASE_TOKENS")
        && let Ok(v) = s.parse::<f64>()
        && v.is_finite()
        && v > 0.0
    {
        return v;
    }
    BASE_TOKEN_LIMIT
}

/// Token cap for a plan tier name, `None` when the tier is unknown.
pub fn tier_token_limit(tier: &str) -> Option<f64> {
    let mult = match tier.to_lowercase().as_str() {
        "pro" => 1.0,
        "max5x" | "max_5x" | "5x" => 5.0,
        "max20x" | "max_20x" | "20x" => 20.0,
        _ => return None,
    };
    Some(five_hour_base_tokens() * mult)
}

// Per-window max tokens for utilization.
// Priority:
// 1) CLAUDE_PLAN_MAX_TOKENS (explicit numeric)
// 2) CLAUDE_PLAN_TIER in {pro,max5x,max20x}
pub fn plan_from_env() -> (Option<String>, Option<f64>) {
    let tier = env::var("CLAUDE_PLAN_TIER").ok();
    if let Ok(s) = env::var("CLAUDE_PLAN_MAX_TOKENS")
        && let Ok(v) = s.parse::<f64>()
    {
        return (tier, Some(v.max(0.0)));
    }
    let max = tier.as_deref().and_then(tier_token_limit);
    (tier, max)
}
