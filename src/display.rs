use chrono::{DateTime, Local, Utc};

#[cfg(feature = "colors")]
use owo_colors::OwoColorize;

// Provide a no-op color shim when "colors" feature is disabled
#[cfg(not(feature = "colors"))]
pub mod color_shim {
    use std::fmt::{self, Display, Formatter};

    #[derive(Clone)]
    pub struct Plain(pub String);

    impl Display for Plain {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            f.write_str(&self.0)
        }
    }

    pub trait ColorizeShim {
        fn as_str(&self) -> &str;

        fn bright_black(&self) -> Plain {
            Plain(self.as_str().to_string())
        }
        fn bright_white(&self) -> Plain {
            Plain(self.as_str().to_string())
        }
        fn bright_cyan(&self) -> Plain {
            Plain(self.as_str().to_string())
        }
        fn bright_magenta(&self) -> Plain {
            Plain(self.as_str().to_string())
        }
        fn red(&self) -> Plain {
            Plain(self.as_str().to_string())
        }
        fn yellow(&self) -> Plain {
            Plain(self.as_str().to_string())
        }
        fn green(&self) -> Plain {
            Plain(self.as_str().to_string())
        }
        fn white(&self) -> Plain {
            Plain(self.as_str().to_string())
        }
        fn bold(&self) -> Plain {
            Plain(self.as_str().to_string())
        }
        fn dimmed(&self) -> Plain {
            Plain(self.as_str().to_string())
        }
        fn cyan(&self) -> Plain {
            Plain(self.as_str().to_string())
        }
    }

    impl ColorizeShim for &str {
        fn as_str(&self) -> &str {
            self
        }
    }
    impl ColorizeShim for String {
        fn as_str(&self) -> &str {
            self.as_str()
        }
    }
    impl ColorizeShim for Plain {
        fn as_str(&self) -> &str {
            &self.0
        }
    }
}

#[cfg(not(feature = "colors"))]
use color_shim::ColorizeShim as OwoColorize;

use crate::detector::DetectionOutput;
use crate::metrics::PlanLimits;
use crate::models::{Session, WindowSource};
use crate::utils::{format_currency, format_duration_minutes, format_tokens};

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn colorize_percent(pct: f64) -> String {
    if pct >= 95.0 {
        format!("{pct:.1}%").red().bold().to_string()
    } else if pct >= 80.0 {
        format!("{pct:.1}%").yellow().bold().to_string()
    } else {
        format!("{pct:.1}%").green().to_string()
    }
}

fn colorize_source(source: WindowSource) -> String {
    let label = source.as_str();
    match source {
        WindowSource::LimitMessage | WindowSource::HistoryLimit => {
            label.bright_magenta().bold().to_string()
        }
        WindowSource::Gap => label.bright_black().dimmed().to_string(),
        s if s.is_detected() => label.cyan().to_string(),
        _ => label.white().to_string(),
    }
}

fn local_hm(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%m-%d %H:%M").to_string()
}

fn session_line(s: &Session) -> String {
    let span = format!("{} → {}", local_hm(s.start), s.end.with_timezone(&Local).format("%H:%M"));
    if s.is_gap {
        return format!(
            "  {} {}",
            span.bright_black().dimmed(),
            "idle".bright_black().dimmed()
        );
    }
    let marker = if s.is_active {
        "●".green().bold().to_string()
    } else {
        " ".to_string()
    };
    format!(
        "{marker} {} {} {} {} {}{} {}",
        span.bright_white(),
        colorize_source(s.source()),
        s.project_name.white(),
        format_tokens(s.total_tokens()).bright_white(),
        "$".white(),
        format_currency(s.total_cost).bright_white(),
        format!("({} msgs)", s.message_count).bright_black().dimmed(),
    )
}

fn active_summary(s: &Session, now: DateTime<Utc>) -> String {
    let mut parts = vec![format!(
        "{} {}",
        "resets".bright_black().dimmed(),
        local_hm(s.reset_time).bright_white()
    )];
    let left = (s.end - now).num_seconds() as f64 / 60.0;
    parts.push(format!(
        "{} {}",
        "left".bright_black().dimmed(),
        format_duration_minutes(left).bright_white()
    ));
    if let Some(br) = s.burn_rate {
        parts.push(format!(
            "{} {}{}",
            "burn".bright_black().dimmed(),
            format_tokens(br.tokens_per_minute.round() as u64).bright_white(),
            "/min".bright_black().dimmed()
        ));
        parts.push(format!(
            "{}{}{}",
            "$".white(),
            format_currency(br.cost_per_hour).bright_white(),
            "/h".bright_black().dimmed()
        ));
    }
    if let Some(p) = s.projection {
        if let Some(pct) = p.usage_percent {
            parts.push(format!("{} {}", "used".bright_black().dimmed(), colorize_percent(pct)));
        }
        if let Some(pct) = p.projected_percent {
            parts.push(format!("{} {}", "proj".bright_black().dimmed(), colorize_percent(pct)));
        }
        if let Some(m) = p.minutes_to_limit {
            parts.push(format!(
                "{} {}",
                "limit in".bright_black().dimmed(),
                format_duration_minutes(m).yellow()
            ));
        }
    }
    let sep = format!(" {} ", "·".bright_black().dimmed());
    parts.join(sep.as_str())
}

pub fn print_text_output(output: &DetectionOutput, now: DateTime<Utc>) {
    println!("{} {}", "❯".bright_cyan(), "quota windows".bold());
    if output.sessions.is_empty() {
        println!("  {}", "[no activity in range]".dimmed());
        return;
    }
    for s in &output.sessions {
        println!("{}", session_line(s));
    }
    if let Some(active) = output.active_session() {
        println!("{} {}", "❯".bright_cyan(), active_summary(active, now));
    }
    if let Some(signal) = output.signals.last() {
        let reset = signal
            .reset_time
            .map(local_hm)
            .unwrap_or_else(|| "unknown".to_string());
        println!(
            "{} {} {}",
            "!".red().bold(),
            "last limit hit, reset".bright_black().dimmed(),
            reset.red()
        );
    }
}

fn session_json(s: &Session) -> serde_json::Value {
    serde_json::json!({
        "id": s.id,
        "start": s.start.to_rfc3339(),
        "end": s.end.to_rfc3339(),
        "end_epoch": s.end.timestamp(),
        "reset_time": s.reset_time.to_rfc3339(),
        "actual_end": s.actual_end.map(|d| d.to_rfc3339()),
        "is_active": s.is_active,
        "is_gap": s.is_gap,
        "project": s.project_name,
        "is_account_level": s.is_account_level,
        "limit_message": s.limit_message,
        "source": s.source().as_str(),
        "is_detected": s.window.is_detected,
        "message_count": s.message_count,
        "cost_usd": round2(s.total_cost),
        "tokens": {
            "input_tokens": s.tokens.input,
            "output_tokens": s.tokens.output,
            "cache_creation_input_tokens": s.tokens.cache_create,
            "cache_read_input_tokens": s.tokens.cache_read,
            "total_tokens": s.total_tokens(),
        },
        "models": s.models.iter().map(|(m, u)| (m.clone(), serde_json::json!({
            "tokens": u.tokens.total(),
            "cost_usd": round2(u.cost),
            "messages": u.messages,
        }))).collect::<serde_json::Map<_, _>>(),
        "projects": s.projects.iter().map(|(p, u)| (p.clone(), serde_json::json!({
            "tokens": u.tokens.total(),
            "cost_usd": round2(u.cost),
            "messages": u.messages,
        }))).collect::<serde_json::Map<_, _>>(),
        "burn_rate": s.burn_rate.map(|b| serde_json::json!({
            "tokens_per_minute": round1(b.tokens_per_minute),
            "cost_per_hour": round2(b.cost_per_hour),
        })),
        "projection": s.projection.map(|p| serde_json::json!({
            "projected_tokens": p.projected_tokens,
            "projected_cost_usd": round2(p.projected_cost),
            "remaining_minutes": (p.remaining_minutes as i64).max(0),
            "usage_percent": p.usage_percent.map(round1),
            "usage_percent_left": p.usage_percent.map(|v| round1((100.0 - v).max(0.0))),
            "projected_percent": p.projected_percent.map(round1),
            "minutes_to_limit": p.minutes_to_limit.map(|m| m.round() as i64),
        })),
    })
}

pub fn build_json_output(
    output: &DetectionOutput,
    now: DateTime<Utc>,
    plan: &PlanLimits,
) -> serde_json::Value {
    let active = output.active_session();
    serde_json::json!({
        "generated_at": now.to_rfc3339(),
        "plan": {
            "token_limit": plan.token_limit.map(|v| v as u64),
            "cost_limit_usd": plan.cost_limit.map(round2),
        },
        "active": active.map(session_json),
        "sessions": output.sessions.iter().map(session_json).collect::<Vec<_>>(),
        "limits": output.signals.iter().map(|sig| serde_json::json!({
            "timestamp": sig.timestamp.to_rfc3339(),
            "reset_time": sig.reset_time.map(|d| d.to_rfc3339()),
            "kind": sig.kind,
            "confidence": sig.confidence,
        })).collect::<Vec<_>>(),
        "token_drift": (output.token_drift * 10_000.0).round() / 10_000.0,
    })
}

pub fn print_json_output(
    output: &DetectionOutput,
    now: DateTime<Utc>,
    plan: &PlanLimits,
) -> anyhow::Result<()> {
    let json = build_json_output(output, now, plan);
    println!("{}", serde_json::to_string(&json)?);
    Ok(())
}
