//! # Ingest Module
//!
//! Reads Claude Code transcripts (`<config>/projects/<project>/*.jsonl`) into
//! [`RawMessage`]s for the timeline builder. Only the fields the detector
//! needs are extracted; everything else on a line is ignored.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::models::{RawMessage, TokenUsage};

fn u64_field(v: &Value, key: &str) -> u64 {
    v.get(key).and_then(|x| x.as_u64()).unwrap_or(0)
}

fn usage_from(v: &Value) -> TokenUsage {
    TokenUsage {
        input: u64_field(v, "input_tokens"),
        output: u64_field(v, "output_tokens"),
        cache_create: u64_field(v, "cache_creation_input_tokens"),
        cache_read: u64_field(v, "cache_read_input_tokens"),
    }
}

/// Plain string content, or the text items of array content joined by
/// newlines.
fn text_from(content: &Value) -> Option<String> {
    match content {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Array(items) => {
            let parts: Vec<&str> = items
                .iter()
                .filter(|i| i.get("type").and_then(|t| t.as_str()) == Some("text"))
                .filter_map(|i| i.get("text").and_then(|t| t.as_str()))
                .collect();
            (!parts.is_empty()).then(|| parts.join("\n"))
        }
        _ => None,
    }
}

/// One transcript line. Returns the dedup key (`message.id:requestId`) when
/// both ids are present. Lines with neither usage nor text are dropped.
pub fn parse_line(line: &str, project: &str) -> Option<(Option<String>, RawMessage)> {
    let v: Value = serde_json::from_str(line.trim()).ok()?;
    let timestamp = v.get("timestamp").and_then(|t| t.as_str())?.to_string();
    let event_type = v
        .get("type")
        .and_then(|t| t.as_str())
        .unwrap_or("assistant")
        .to_string();

    let message = v.get("message");
    let usage = message
        .and_then(|m| m.get("usage"))
        .map(usage_from)
        .unwrap_or_default();
    let model = message
        .and_then(|m| m.get("model"))
        .and_then(|m| m.as_str())
        .filter(|m| *m != "<synthetic>")
        .map(str::to_string);
    let content = message
        .and_then(|m| m.get("content"))
        .and_then(text_from)
        .or_else(|| v.get("content").and_then(text_from));

    let is_notice = event_type == "system"
        || v.get("isApiErrorMessage").and_then(|f| f.as_bool()) == Some(true);

    if usage.is_empty() && content.is_none() {
        return None;
    }

    let key = match (
        message.and_then(|m| m.get("id")).and_then(|i| i.as_str()),
        v.get("requestId").and_then(|r| r.as_str()),
    ) {
        (Some(mid), Some(rid)) => Some(format!("{mid}:{rid}")),
        _ => None,
    };

    Some((
        key,
        RawMessage {
            timestamp,
            project: project.to_string(),
            model,
            usage,
            event_type,
            content,
            is_notice,
        },
    ))
}

/// Project directory name directly under `projects/`.
fn project_for(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .ok()
        .and_then(|rel| rel.components().next())
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .unwrap_or_else(|| "unknown".to_string())
}

fn modified_since(path: &Path, cutoff: DateTime<Utc>) -> bool {
    match fs::metadata(path).and_then(|m| m.modified()) {
        Ok(modified) => DateTime::<Utc>::from(modified) >= cutoff,
        Err(_) => true,
    }
}

/// Scan every `projects/**/*.jsonl` below the given config dirs. Files not
/// modified since `cutoff` are skipped, as are unreadable lines.
pub fn scan_messages(paths: &[PathBuf], cutoff: DateTime<Utc>) -> Result<Vec<RawMessage>> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();
    let mut files = 0usize;

    for base in paths {
        let root = base.join("projects");
        if !root.is_dir() {
            continue;
        }
        for entry in WalkDir::new(&root).follow_links(true).into_iter().flatten() {
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().and_then(|e| e.to_str()) != Some("jsonl")
                || !modified_since(path, cutoff)
            {
                continue;
            }
            let file = match File::open(path) {
                Ok(f) => f,
                Err(err) => {
                    tracing::debug!(error = %err, path = %path.display(), "cannot open transcript");
                    continue;
                }
            };
            files += 1;
            let project = project_for(&root, path);
            for line in BufReader::new(file).lines().map_while(Result::ok) {
                if line.trim().is_empty() {
                    continue;
                }
                let Some((key, msg)) = parse_line(&line, &project) else {
                    continue;
                };
                if let Some(k) = key
                    && !seen.insert(k)
                {
                    continue;
                }
                out.push(msg);
            }
        }
    }

    tracing::debug!(files, messages = out.len(), "scanned transcripts");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;
    use tempfile::TempDir;

    const ASSISTANT: &str = r#"{"type":"assistant","timestamp":"2024-01-15T10:15:00Z","requestId":"req_1","message":{"id":"msg_1","model":"claude-sonnet-4-20250514","usage":{"input_tokens":100,"output_tokens":50,"cache_creation_input_tokens":10,"cache_read_input_tokens":5},"content":[{"type":"text","text":"hello"}]}}"#;

    #[test]
    fn parses_assistant_usage() {
        let (key, msg) = parse_line(ASSISTANT, "proj").unwrap();
        assert_eq!(key.as_deref(), Some("msg_1:req_1"));
        assert_eq!(msg.usage.total(), 165);
        assert_eq!(msg.model.as_deref(), Some("claude-sonnet-4-20250514"));
        assert_eq!(msg.content.as_deref(), Some("hello"));
        assert!(!msg.is_notice);
    }

    #[test]
    fn api_error_lines_are_notices() {
        let line = r#"{"type":"assistant","isApiErrorMessage":true,"timestamp":"2024-01-15T13:15:00Z","message":{"content":[{"type":"text","text":"Claude AI usage limit reached|1705330800"}]}}"#;
        let (_, msg) = parse_line(line, "proj").unwrap();
        assert!(msg.is_notice);

        let prompt = r#"{"type":"user","timestamp":"2024-01-15T13:16:00Z","message":{"role":"user","content":"why do I hit the usage limit reached|1705330800 so often?"}}"#;
        let (_, msg) = parse_line(prompt, "proj").unwrap();
        assert!(!msg.is_notice);
    }

    #[test]
    fn keeps_limit_text_without_usage() {
        let line = r#"{"type":"system","timestamp":"2024-01-15T13:15:00Z","content":"Claude AI usage limit reached|1705330800"}"#;
        let (key, msg) = parse_line(line, "proj").unwrap();
        assert!(key.is_none());
        assert!(msg.usage.is_empty());
        assert_eq!(msg.event_type, "system");
        assert!(msg.is_notice);
        assert!(msg.content.unwrap().contains("limit reached"));
    }

    #[test]
    fn drops_lines_without_signal() {
        assert!(parse_line(r#"{"type":"user","timestamp":"2024-01-15T10:00:00Z"}"#, "p").is_none());
        assert!(parse_line("not json", "p").is_none());
    }

    #[test]
    fn scan_dedups_and_names_projects() {
        let dir = TempDir::new().unwrap();
        let proj = dir.path().join("projects").join("-home-me-app");
        fs::create_dir_all(&proj).unwrap();
        let mut f = File::create(proj.join("s1.jsonl")).unwrap();
        writeln!(f, "{ASSISTANT}").unwrap();
        writeln!(f, "{ASSISTANT}").unwrap();
        writeln!(f, "garbage").unwrap();

        let cutoff = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        let msgs = scan_messages(&[dir.path().to_path_buf()], cutoff).unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].project, "-home-me-app");
    }
}
