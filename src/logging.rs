//! Structured logging setup for the binary.
//!
//! Output goes to stderr so stdout stays a clean report. The filter comes
//! from `RUST_LOG` when set, else from `CLAUDE_LOG_LEVEL`, else the level
//! passed in. `CLAUDE_LOG_FORMAT=json` switches to JSON lines.

use std::env;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    pub fn from_env() -> Self {
        match env::var("CLAUDE_LOG_FORMAT") {
            Ok(v) if v.trim().eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

/// Level used when neither `RUST_LOG` nor `CLAUDE_LOG_LEVEL` is set.
pub fn default_level(debug: bool) -> String {
    if debug {
        return "debug".to_string();
    }
    env::var("CLAUDE_LOG_LEVEL")
        .ok()
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "warn".to_string())
}

/// Install the global subscriber. Safe to call more than once; later calls
/// are ignored.
pub fn init_logging(level: &str, format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::registry().with(env_filter);

    let _ = match format {
        LogFormat::Json => subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true),
            )
            .try_init(),
        LogFormat::Text => subscriber
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .with_ansi(false),
            )
            .try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn debug_flag_wins() {
        unsafe { env::set_var("CLAUDE_LOG_LEVEL", "error") };
        assert_eq!(default_level(true), "debug");
        assert_eq!(default_level(false), "error");
        unsafe { env::remove_var("CLAUDE_LOG_LEVEL") };
        assert_eq!(default_level(false), "warn");
    }

    #[test]
    #[serial]
    fn json_format_from_env() {
        unsafe { env::set_var("CLAUDE_LOG_FORMAT", "JSON") };
        assert_eq!(LogFormat::from_env(), LogFormat::Json);
        unsafe { env::remove_var("CLAUDE_LOG_FORMAT") };
        assert_eq!(LogFormat::from_env(), LogFormat::Text);
    }
}
