use chrono::{TimeZone, Utc};
use claude_windows::config::DetectorConfig;
use claude_windows::detector::WindowDetector;
use claude_windows::display::build_json_output;
use claude_windows::history::{HistoryPolicy, WindowHistoryStore};
use claude_windows::ingest::scan_messages;
use claude_windows::metrics::PlanLimits;
use claude_windows::pricing::StaticPricing;
use claude_windows::timeline;
use std::fs;
use tempfile::TempDir;

fn assistant_line(ts: &str, id: &str, input: u64, output: u64) -> String {
    format!(
        r#"{{"type":"assistant","timestamp":"{ts}","requestId":"req_{id}","message":{{"id":"msg_{id}","model":"claude-sonnet-4-20250514","usage":{{"input_tokens":{input},"output_tokens":{output}}}}}}}"#
    )
}

#[test]
fn test_transcripts_to_json() {
    let dir = TempDir::new().unwrap();
    let web = dir.path().join("projects").join("-home-me-web");
    let api = dir.path().join("projects").join("-home-me-api");
    fs::create_dir_all(&web).unwrap();
    fs::create_dir_all(&api).unwrap();

    fs::write(
        web.join("a.jsonl"),
        [
            assistant_line("2024-01-15T10:15:00Z", "1", 1000, 500),
            assistant_line("2024-01-15T10:15:00Z", "1", 1000, 500),
            assistant_line("2024-01-15T11:30:00.250Z", "2", 2000, 1000),
        ]
        .join("\n"),
    )
    .unwrap();
    fs::write(
        api.join("b.jsonl"),
        assistant_line("2024-01-15T12:05:00Z", "3", 4000, 2000),
    )
    .unwrap();

    let now = Utc.with_ymd_and_hms(2024, 1, 15, 12, 30, 0).unwrap();
    let cutoff = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
    let raw = scan_messages(&[dir.path().to_path_buf()], cutoff).unwrap();
    assert_eq!(raw.len(), 3);

    let events = timeline::build(&raw, &[]);
    let store = WindowHistoryStore::in_memory(HistoryPolicy::default());
    let pricing = StaticPricing::default();
    let plan = PlanLimits {
        token_limit: Some(200_000.0),
        cost_limit: None,
    };
    let out = WindowDetector::new(DetectorConfig::default(), &store, &pricing)
        .with_plan_limits(plan)
        .detect(&events, now);

    let json = build_json_output(&out, now, &plan);
    let active = &json["active"];
    assert_eq!(active["start"], "2024-01-15T10:00:00+00:00");
    assert_eq!(active["source"], "first_message");
    assert_eq!(active["project"], "Multiple");
    assert_eq!(active["is_account_level"], true);
    assert_eq!(active["message_count"], 3);
    assert_eq!(active["tokens"]["total_tokens"], 10_500);
    assert_eq!(active["projection"]["remaining_minutes"], 150);
    assert_eq!(active["projection"]["usage_percent"], 5.3);
    assert!(active["cost_usd"].as_f64().unwrap() > 0.0);
    assert_eq!(json["sessions"].as_array().unwrap().len(), 1);
    assert_eq!(json["token_drift"], 0.0);
}
