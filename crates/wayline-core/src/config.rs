use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, WaylineError};

/// Top-level Wayline configuration (`wayline.toml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Runtime JSONL logging.
    #[serde(default)]
    pub log: Option<LogConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_workspace")]
    pub workspace: String,
    /// Directory of `<workflow-id>.json` definitions. Default: <workspace>/workflows
    #[serde(default)]
    pub workflows_dir: Option<String>,
    /// SQLite database file. Default: <workspace>/wayline.db
    #[serde(default)]
    pub database: Option<String>,
    /// Capacity of the event bus broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            workflows_dir: None,
            database: None,
            event_capacity: default_event_capacity(),
        }
    }
}

fn default_workspace() -> String { "~/.wayline".to_string() }
fn default_event_capacity() -> usize { 256 }

/// Trigger scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Run the background scheduler (default: true).
    #[serde(default = "default_scheduler_enabled")]
    pub enabled: bool,
    /// Upper bound on how long the scheduler sleeps between ticks.
    #[serde(default = "default_max_tick_secs")]
    pub max_tick_secs: u64,
    /// Queue depth for keyword/state events reported by the host.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_scheduler_enabled(),
            max_tick_secs: default_max_tick_secs(),
            event_buffer: default_event_buffer(),
        }
    }
}

fn default_scheduler_enabled() -> bool { true }
fn default_max_tick_secs() -> u64 { 5 }
fn default_event_buffer() -> usize { 64 }

/// JSONL runtime logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Enable runtime logging (default: true when section is present).
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// Directory for log files. Default: <workspace>/logs
    #[serde(default)]
    pub log_dir: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_dir: None,
        }
    }
}

fn default_log_enabled() -> bool { true }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| WaylineError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| WaylineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    fn validate(&self) -> Result<()> {
        if self.scheduler.max_tick_secs == 0 {
            return Err(WaylineError::Config(
                "scheduler.max_tick_secs must be at least 1".to_string(),
            ));
        }
        if self.engine.event_capacity == 0 || self.scheduler.event_buffer == 0 {
            return Err(WaylineError::Config(
                "channel capacities must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the workspace directory (expand ~).
    pub fn workspace_dir(&self) -> PathBuf {
        expand_home(&self.engine.workspace)
    }

    pub fn workflows_dir(&self) -> PathBuf {
        match self.engine.workflows_dir {
            Some(ref dir) => expand_home(dir),
            None => self.workspace_dir().join("workflows"),
        }
    }

    pub fn database_path(&self) -> PathBuf {
        match self.engine.database {
            Some(ref db) => expand_home(db),
            None => self.workspace_dir().join("wayline.db"),
        }
    }

    /// Directory for JSONL run logs, or `None` when logging is disabled.
    pub fn log_dir(&self) -> Option<PathBuf> {
        let log = self.log.as_ref()?;
        if !log.enabled {
            return None;
        }
        Some(match log.log_dir {
            Some(ref dir) => expand_home(dir),
            None => self.workspace_dir().join("logs"),
        })
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
