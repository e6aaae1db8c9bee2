use anyhow::Result;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::time::Duration;

use claude_windows::cache::{EventCache, cache_ttl};
use claude_windows::cli::Args;
use claude_windows::config::DetectorConfig;
use claude_windows::db::{load_detection_info, seed_history, store_detection_info};
use claude_windows::detector::WindowDetector;
use claude_windows::display::{print_json_output, print_text_output};
use claude_windows::history::{HistoryPolicy, WindowHistoryStore};
use claude_windows::ingest::scan_messages;
use claude_windows::logging::{LogFormat, default_level, init_logging};
use claude_windows::metrics::PlanLimits;
use claude_windows::pricing::StaticPricing;
use claude_windows::timeline;
use claude_windows::utils::{claude_paths, plan_from_env};

fn open_history(config: &DetectorConfig) -> WindowHistoryStore {
    let policy = HistoryPolicy::from(config);
    let Some(path) = config.history_path.clone() else {
        return WindowHistoryStore::in_memory(policy);
    };
    match WindowHistoryStore::open(&path, policy) {
        Ok(store) => store,
        Err(err) => {
            tracing::warn!(error = %err, path = %path.display(), "window history unreadable, starting empty");
            WindowHistoryStore::in_memory(policy)
        }
    }
}

/// Re-scan transcripts into the cache. On failure the previous snapshot
/// stays in place.
fn refresh_events(
    cache: &EventCache,
    paths: &[PathBuf],
    config: &DetectorConfig,
    now: DateTime<Utc>,
) {
    cache.begin_refresh();
    match scan_messages(paths, now - config.scan_lookback) {
        Ok(raw) => {
            let events = timeline::build(&raw, &[]);
            cache.stage(timeline::filter_by_age(events, config.scan_lookback, now));
            cache.commit(now);
        }
        Err(err) => {
            tracing::warn!(error = %err, "transcript scan failed");
            cache.cancel();
        }
    }
}

fn resolve_plan(args: &Args) -> PlanLimits {
    match (args.plan_tier, args.plan_max_tokens) {
        (None, None) => {
            let (tier, max_tokens) = plan_from_env();
            PlanLimits::resolve(tier.as_deref(), max_tokens)
        }
        (tier, max_tokens) => PlanLimits::resolve(
            tier.map(|t| t.as_str()),
            max_tokens.map(|v| v as f64),
        ),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&default_level(args.debug), LogFormat::from_env());

    let mut config = DetectorConfig::from_env()?;
    if let Some(hours) = args.session_hours {
        config.set_session_hours(hours)?;
    }
    if let Some(path) = args.history_path.clone() {
        config.history_path = Some(path);
    }
    config.validate()?;

    let history = open_history(&config);

    // Detections cached by earlier runs fill in windows the history file lost
    let started = Utc::now();
    match load_detection_info(Some(started - config.scan_lookback)) {
        Ok(infos) => {
            let seeded = seed_history(&history, &infos, config.session_duration, started);
            tracing::debug!(seeded, "seeded history from detection cache");
        }
        Err(err) => tracing::debug!(error = %err, "detection cache unavailable"),
    }

    let paths = claude_paths(args.claude_config_dir.as_deref());
    let plan = resolve_plan(&args);
    let pricing = StaticPricing::default();
    let detector = WindowDetector::new(config.clone(), &history, &pricing)
        .with_plan_limits(plan)
        .with_recording(!args.no_save);

    let cache = EventCache::new();
    let ttl = cache_ttl();
    let pause = ttl.to_std().unwrap_or_default().max(Duration::from_secs(1));

    loop {
        let now = Utc::now();
        if cache.is_stale(now, ttl) {
            refresh_events(&cache, &paths, &config, now);
        }
        let output = detector.detect_cached(&cache, now);

        if args.json {
            print_json_output(&output, now, &plan)?;
        } else {
            print_text_output(&output, now);
        }

        if !args.no_save {
            let removed = history.cleanup(now);
            if removed > 0 {
                tracing::debug!(removed, "expired window history records");
            }
            if let Err(err) = history.save() {
                tracing::warn!(error = %err, "failed to save window history");
            }
            if let Err(err) = store_detection_info(&output.sessions) {
                tracing::warn!(error = %err, "failed to store detection info");
            }
        }

        if !args.watch {
            break;
        }
        std::thread::sleep(pause);
    }

    Ok(())
}
