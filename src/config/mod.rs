//! Persistent preferences and runtime settings.
//!
//! [`Config`] is a key/value table in SQLite. [`Settings`] is what the
//! pipeline actually runs with, resolved as: command-line override, then
//! stored preference, then built-in default.

use anyhow::{Context, Result, anyhow, bail};
use rusqlite::Connection;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::consts::{
    DEFAULT_MAX_RESEARCH_LOOPS, DEFAULT_MAX_STEPS, DEFAULT_MODEL, DEFAULT_STAGE_TIMEOUT_SECS,
    DEFAULT_TOOL_TIMEOUT_SECS,
};
use crate::dispatch::Stage;

pub const KEY_MODEL: &str = "model";
pub const KEY_MAX_RESEARCH_LOOPS: &str = "max_research_loops";
pub const KEY_STAGE_TIMEOUT: &str = "stage_timeout_secs";
pub const KEY_TOOL_TIMEOUT: &str = "tool_timeout_secs";
pub const KEY_MAX_STEPS: &str = "max_steps";

/// Per-stage model key, e.g. `model.researcher`.
pub fn stage_model_key(stage: Stage) -> String {
    format!("{}.{}", KEY_MODEL, stage)
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| anyhow!("invalid value for `{}`: {:?}", key, raw))
}

/// Check a preference before it is stored, so a bad value can never
/// stop [`Settings::resolve`] at the next start.
pub fn validate(key: &str, value: &str) -> Result<()> {
    match key {
        KEY_MAX_RESEARCH_LOOPS | KEY_MAX_STEPS => parse_value::<usize>(key, value).map(drop),
        KEY_STAGE_TIMEOUT | KEY_TOOL_TIMEOUT => parse_value::<u64>(key, value).map(drop),
        KEY_MODEL => {
            if value.trim().is_empty() {
                bail!("`{}` must not be empty", key);
            }
            Ok(())
        }
        _ => {
            let stage = key
                .strip_prefix("model.")
                .and_then(Stage::from_name)
                .filter(|s| Stage::EXECUTABLE.contains(s) && stage_model_key(*s) == key);
            match stage {
                Some(_) if !value.trim().is_empty() => Ok(()),
                Some(_) => bail!("`{}` must not be empty", key),
                None => bail!("unknown config key `{}`", key),
            }
        }
    }
}

/// Persistent key-value configuration store.
pub struct Config {
    conn: Mutex<Connection>,
}

impl Config {
    /// Open or create the config table in the given database.
    /// Use `":memory:"` for tests.
    pub fn open(path: &str) -> Result<Self> {
        if path != ":memory:"
            && let Some(parent) = Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let conn = Connection::open(path).context("failed to open config database")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS config (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
        )
        .context("failed to create config table")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("config connection lock poisoned"))
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT value FROM config WHERE key = ?1")?;
        let mut rows = stmt.query([key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// Set a config value (upsert).
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO config (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [key, value],
        )?;
        Ok(())
    }

    /// [`validate`] then [`set`](Self::set). A rejected value leaves the
    /// stored one untouched.
    pub fn set_checked(&self, key: &str, value: &str) -> Result<()> {
        validate(key, value)?;
        self.set(key, value)
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        self.conn()?.execute("DELETE FROM config WHERE key = ?1", [key])?;
        Ok(())
    }

    /// All stored pairs, sorted by key.
    pub fn list(&self) -> Result<Vec<(String, String)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT key, value FROM config ORDER BY key")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn parsed<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key)? {
            Some(raw) => parse_value(key, &raw).map(Some),
            None => Ok(None),
        }
    }
}

/// Command-line values that win over stored preferences.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub model: Option<String>,
    pub max_research_loops: Option<usize>,
    pub stage_timeout_secs: Option<u64>,
    pub tool_timeout_secs: Option<u64>,
    pub max_steps: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub model: String,
    /// Per-stage model overrides, only for stages that have one.
    pub stage_models: Vec<(Stage, String)>,
    pub max_research_loops: usize,
    pub stage_timeout: Duration,
    pub tool_timeout: Duration,
    pub max_steps: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            stage_models: Vec::new(),
            max_research_loops: DEFAULT_MAX_RESEARCH_LOOPS,
            stage_timeout: Duration::from_secs(DEFAULT_STAGE_TIMEOUT_SECS),
            tool_timeout: Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS),
            max_steps: DEFAULT_MAX_STEPS,
        }
    }
}

impl Settings {
    pub fn resolve(config: &Config, overrides: &Overrides) -> Result<Self> {
        let defaults = Self::default();

        let model = match &overrides.model {
            Some(model) => model.clone(),
            None => config.get(KEY_MODEL)?.unwrap_or(defaults.model),
        };

        // An explicit --model applies to every stage.
        let mut stage_models = Vec::new();
        if overrides.model.is_none() {
            for stage in Stage::EXECUTABLE {
                if let Some(m) = config.get(&stage_model_key(stage))? {
                    stage_models.push((stage, m));
                }
            }
        }

        let stage_timeout_secs = match overrides.stage_timeout_secs {
            Some(secs) => secs,
            None => config
                .parsed(KEY_STAGE_TIMEOUT)?
                .unwrap_or(DEFAULT_STAGE_TIMEOUT_SECS),
        };
        let tool_timeout_secs = match overrides.tool_timeout_secs {
            Some(secs) => secs,
            None => config
                .parsed(KEY_TOOL_TIMEOUT)?
                .unwrap_or(DEFAULT_TOOL_TIMEOUT_SECS),
        };

        Ok(Self {
            model,
            stage_models,
            max_research_loops: match overrides.max_research_loops {
                Some(n) => n,
                None => config
                    .parsed(KEY_MAX_RESEARCH_LOOPS)?
                    .unwrap_or(defaults.max_research_loops),
            },
            stage_timeout: Duration::from_secs(stage_timeout_secs),
            tool_timeout: Duration::from_secs(tool_timeout_secs),
            max_steps: match overrides.max_steps {
                Some(n) => n,
                None => config.parsed(KEY_MAX_STEPS)?.unwrap_or(defaults.max_steps),
            },
        })
    }

    pub fn model_for(&self, stage: Stage) -> &str {
        self.stage_models
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, m)| m.as_str())
            .unwrap_or(&self.model)
    }
}
