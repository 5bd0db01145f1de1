//! Startup banner and session summary display.

use std::path::Path;

use crate::consts::{AUTHOR, REPO, format_number};
use crate::thinker::TokenUsage;

/// Session configuration for display in the startup banner.
pub struct BannerInfo<'a> {
    pub provider: &'a str,
    pub model: &'a str,
    pub shell_mode: &'a str,
    pub working_dir: &'a Path,
    pub max_research_loops: usize,
    pub stage_timeout_secs: u64,
}

pub fn render_banner(info: &BannerInfo) -> String {
    format!(
        r#"
   ╔═══════════════════════════════════════╗
   ║            T R I A G E                ║
   ║   router → researcher / static / dyn  ║
   ╚═══════════════════════════════════════╝

   version   {}
   by        {}
   repo      {}
   provider  {} ({})
   shell     {}
   workdir   {}
   guard     {} research rounds, {}s per stage
"#,
        env!("CARGO_PKG_VERSION"),
        AUTHOR,
        REPO,
        info.provider,
        info.model,
        info.shell_mode,
        info.working_dir.display(),
        info.max_research_loops,
        info.stage_timeout_secs,
    )
}

pub fn print_banner(info: &BannerInfo) {
    println!("{}", render_banner(info));
}

/// Token usage line (if any tokens were spent) and farewell.
pub fn render_session_summary(usage: TokenUsage) -> String {
    let mut out = String::new();
    if usage.total() > 0 {
        out.push_str(&format!(
            "session: {:>6} input + {:>6} output = {:>6} tokens\n",
            format_number(usage.input_tokens),
            format_number(usage.output_tokens),
            format_number(usage.total()),
        ));
    }
    out.push_str("goodbye.");
    out
}

pub fn print_session_summary(usage: TokenUsage) {
    println!("{}", render_session_summary(usage));
}
