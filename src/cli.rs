use std::path::PathBuf;

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanTierArg {
    Pro,
    Max5x,
    Max20x,
}

impl PlanTierArg {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTierArg::Pro => "pro",
            PlanTierArg::Max5x => "max5x",
            PlanTierArg::Max20x => "max20x",
        }
    }
}

#[derive(clap::Parser, Debug)]
#[command(name = "claude-windows", about = "Detect quota windows from Claude Code usage logs")]
pub struct Args {
    /// Force Claude data path(s), comma-separated. Defaults to ~/.claude and ~/.config/claude
    #[arg(long, env = "CLAUDE_CONFIG_DIR")]
    pub claude_config_dir: Option<String>,

    /// Emit JSON instead of colored text
    #[arg(long)]
    pub json: bool,

    /// Quota window length in hours (default 5)
    #[arg(long, env = "CLAUDE_SESSION_HOURS")]
    pub session_hours: Option<i64>,

    /// Window history file (default ~/.claude/history/window_history.json)
    #[arg(long, env = "CLAUDE_WINDOW_HISTORY_PATH")]
    pub history_path: Option<PathBuf>,

    /// Plan tier: pro|max5x|max20x (overrides env)
    #[arg(long, value_enum)]
    pub plan_tier: Option<PlanTierArg>,

    /// Plan max tokens per window (overrides tier/env)
    #[arg(long)]
    pub plan_max_tokens: Option<u64>,

    /// Do not write window history or detection info
    #[arg(long)]
    pub no_save: bool,

    /// Keep running and re-detect every CLAUDE_CACHE_TTL seconds
    #[arg(long)]
    pub watch: bool,

    /// Debug mode: verbose logging to stderr
    #[arg(long, env = "CLAUDE_DEBUG")]
    pub debug: bool,
}

impl Args {
    pub fn parse() -> Self {
        <Args as clap::Parser>::parse()
    }
}
