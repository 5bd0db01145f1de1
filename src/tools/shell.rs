use anyhow::{Result, bail};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{Tool, required_arg, truncate};

const MAX_OUTPUT_BYTES: usize = 50_000;

/// Never allowed, whatever the mode.
const BLOCKED_COMMANDS: &[&str] = &[
    "rm -rf /",
    "rm -rf /*",
    "mkfs",
    "dd if=",
    ":(){ :|:& };:",
    "> /dev/sda",
    "chmod -R 777 /",
    "shutdown",
    "reboot",
    "halt",
    "init 0",
    "init 6",
];

/// Leading words of commands that modify the system.
const WRITE_COMMANDS: &[&str] = &[
    "rm", "rmdir", "mv", "cp", "mkdir", "touch", "chmod", "chown", "chgrp", "ln", "install",
    "dd", "mount", "umount", "kill", "killall", "pkill", "tee", "truncate", "wget",
];

/// Subcommand prefixes that modify the system.
const WRITE_PREFIXES: &[&str] = &[
    "apt ",
    "apt-get ",
    "pip install",
    "npm install",
    "cargo install",
    "git push",
    "git commit",
    "git reset",
    "git checkout",
    "sed -i",
    "systemctl start",
    "systemctl stop",
    "systemctl restart",
    "docker rm",
    "docker stop",
    "docker kill",
];

const SAFE_ENV_VARS: &[&str] = &["PATH", "HOME", "USER", "SHELL", "LANG", "LC_ALL", "TERM", "TZ"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ShellMode {
    /// Analysis only: write commands are refused.
    ReadOnly,
    /// Everything except the block list.
    ReadWrite,
}

#[derive(Debug, Clone)]
pub struct ShellConfig {
    pub mode: ShellMode,
    pub working_dir: PathBuf,
    pub max_output_bytes: usize,
    pub require_confirmation: bool,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            mode: ShellMode::ReadOnly,
            working_dir: std::env::temp_dir().join("triage-sandbox"),
            max_output_bytes: MAX_OUTPUT_BYTES,
            require_confirmation: true,
        }
    }
}

/// Runs `sh -c <command>` in a sanitized environment.
/// The child is killed if the call is dropped (stage timeout or abort).
pub struct ShellTool {
    config: ShellConfig,
}

impl ShellTool {
    pub fn new(config: ShellConfig) -> Self {
        Self { config }
    }

    fn is_blocked(cmd: &str) -> bool {
        let lower = cmd.to_lowercase();
        BLOCKED_COMMANDS.iter().any(|pat| lower.contains(pat))
    }

    /// True if any segment of a pipeline or command chain writes.
    fn is_write_command(cmd: &str) -> bool {
        cmd.split(['|', ';', '&'])
            .map(|seg| seg.trim().to_lowercase())
            .any(|seg| Self::segment_is_write(&seg))
    }

    fn segment_is_write(segment: &str) -> bool {
        if segment.contains('>') {
            return true;
        }
        let segment = segment.strip_prefix("sudo ").unwrap_or(segment);
        let first = segment.split_whitespace().next().unwrap_or("");
        WRITE_COMMANDS.contains(&first) || WRITE_PREFIXES.iter().any(|p| segment.starts_with(p))
    }

    fn filtered_env() -> Vec<(String, String)> {
        SAFE_ENV_VARS
            .iter()
            .filter_map(|key| std::env::var(key).ok().map(|val| (key.to_string(), val)))
            .collect()
    }

    fn confirm(cmd: &str) -> Result<bool> {
        print!("  Execute: {} [y/N] ", cmd);
        io::stdout().flush()?;
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        Ok(input.trim().eq_ignore_ascii_case("y"))
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        match self.config.mode {
            ShellMode::ReadOnly => {
                "Run a read-only shell command (grep, find, cat, linters, scanners). Args: {\"command\": \"<shell command>\"}. Write operations are blocked."
            }
            ShellMode::ReadWrite => {
                "Run a shell command. Args: {\"command\": \"<shell command>\"}. Write operations are allowed."
            }
        }
    }

    async fn execute(&self, args: &HashMap<String, String>) -> Result<String> {
        let cmd = required_arg(args, "command")?;

        if Self::is_blocked(cmd) {
            warn!(cmd, "blocked shell command");
            bail!("blocked: command is on the deny list");
        }
        if self.config.mode == ShellMode::ReadOnly && Self::is_write_command(cmd) {
            bail!(
                "blocked: write operation not allowed in read-only mode. \
                 Start triage with --allow-write to enable write operations."
            );
        }
        if self.config.require_confirmation && !Self::confirm(cmd)? {
            bail!("cancelled by user");
        }

        let work_dir = &self.config.working_dir;
        if !work_dir.exists() {
            tokio::fs::create_dir_all(work_dir).await?;
        }

        debug!(cmd, dir = %work_dir.display(), "running shell command");
        let output = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .current_dir(work_dir)
            .env_clear()
            .envs(Self::filtered_env())
            .kill_on_drop(true)
            .output()
            .await?;

        let max = self.config.max_output_bytes;
        let stdout = truncate(&String::from_utf8_lossy(&output.stdout), max);
        let stderr = truncate(&String::from_utf8_lossy(&output.stderr), max);

        if output.status.success() {
            // Many scanners report on stderr only.
            Ok(if stdout.trim().is_empty() { stderr } else { stdout })
        } else {
            bail!(
                "exit code {}\nstdout: {}\nstderr: {}",
                output.status.code().unwrap_or(-1),
                stdout,
                stderr
            )
        }
    }
}
