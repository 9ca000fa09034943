use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};
use crate::types::{timestamp, DEFAULT_MAX_VISITS};

/// Top-level pipegraph configuration (`pipegraph.toml`). Every section is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub layout: LayoutConfig,
    #[serde(default)]
    pub hub: HubLocation,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Visit cap for nodes without their own `max_visits`.
    #[serde(default = "default_max_visits")]
    pub max_visits_default: u32,
    /// Percentage of a node's cap at which status reports a warning.
    #[serde(default = "default_visit_warning_pct")]
    pub visit_warning_pct: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_visits_default: default_max_visits(),
            visit_warning_pct: default_visit_warning_pct(),
        }
    }
}

fn default_max_visits() -> u32 { DEFAULT_MAX_VISITS }
fn default_visit_warning_pct() -> u8 { 80 }

/// Project-relative directories the engine and the external CLI share.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutConfig {
    #[serde(default = "default_pipeline_dir")]
    pub pipeline_dir: String,
    #[serde(default = "default_agents_dir")]
    pub agents_dir: String,
    #[serde(default = "default_skills_dir")]
    pub skills_dir: String,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            pipeline_dir: default_pipeline_dir(),
            agents_dir: default_agents_dir(),
            skills_dir: default_skills_dir(),
        }
    }
}

fn default_pipeline_dir() -> String { ".claude/pipeline".to_string() }
fn default_agents_dir() -> String { ".claude/agents".to_string() }
fn default_skills_dir() -> String { ".claude/skills".to_string() }

/// Where to find the hub config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HubLocation {
    /// Default: `~/.pipegraph/config.json`
    #[serde(default)]
    pub config_path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default)]
    pub filter: Option<String>,
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| PipelineError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| PipelineError::Config(e.to_string()))
    }

    /// Like [`AppConfig::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(PipelineError::ConfigNotFound(_)) => {
                debug!(path = %path.display(), "No config file, using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Resolve the hub config path (expand ~).
    pub fn hub_config_path(&self, home: &Path) -> PathBuf {
        match &self.hub.config_path {
            Some(p) => expand_home(p, home),
            None => home.join(".pipegraph").join("config.json"),
        }
    }
}

/// Shared hub layout, read from the hub config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubConfig {
    pub hub_dir: PathBuf,
    #[serde(default = "default_hub_pipelines_dir")]
    pub pipelines_dir: String,
    #[serde(default = "default_hub_states_dir")]
    pub states_dir: String,
    #[serde(default = "default_agents_dir")]
    pub agents_dir: String,
    #[serde(default = "default_skills_dir")]
    pub skills_dir: String,
}

fn default_hub_pipelines_dir() -> String { ".claude/pipelines".to_string() }
fn default_hub_states_dir() -> String { ".pipegraph/states".to_string() }

impl HubConfig {
    pub fn new(hub_dir: impl Into<PathBuf>) -> Self {
        Self {
            hub_dir: hub_dir.into(),
            pipelines_dir: default_hub_pipelines_dir(),
            states_dir: default_hub_states_dir(),
            agents_dir: default_agents_dir(),
            skills_dir: default_skills_dir(),
        }
    }

    /// Read the hub config JSON. `hub_dir` may start with `~/`.
    pub fn load(path: &Path, home: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| PipelineError::NotFound(path.display().to_string()))?;
        let mut config: HubConfig = serde_json::from_str(&content)
            .map_err(|e| PipelineError::Config(format!("{}: {}", path.display(), e)))?;
        config.hub_dir = expand_home(&config.hub_dir.to_string_lossy(), home);
        Ok(config)
    }

    pub fn pipelines_path(&self) -> PathBuf {
        self.hub_dir.join(&self.pipelines_dir)
    }

    pub fn states_path(&self) -> PathBuf {
        self.hub_dir.join(&self.states_dir)
    }

    pub fn agents_path(&self) -> PathBuf {
        self.hub_dir.join(&self.agents_dir)
    }

    pub fn skills_path(&self) -> PathBuf {
        self.hub_dir.join(&self.skills_dir)
    }
}

/// Per-project enable flag (`config.json` beside the state file).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnforcerConfig {
    #[serde(default = "default_enforcer_enabled")]
    pub enforcer_enabled: bool,
    #[serde(default, with = "timestamp::option", skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    /// Keys written by other tools are carried through untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for EnforcerConfig {
    fn default() -> Self {
        Self {
            enforcer_enabled: true,
            last_updated: None,
            extra: BTreeMap::new(),
        }
    }
}

fn default_enforcer_enabled() -> bool { true }

/// Everything the engine needs to know about the host, resolved once at
/// process start and handed to every component.
#[derive(Debug, Clone)]
pub struct Environment {
    pub home: PathBuf,
    /// `None` means project-local-only mode.
    pub hub: Option<HubConfig>,
    pub layout: LayoutConfig,
    pub engine: EngineConfig,
}

impl Environment {
    pub fn new(home: impl Into<PathBuf>, hub: Option<HubConfig>) -> Self {
        Self {
            home: home.into(),
            hub,
            layout: LayoutConfig::default(),
            engine: EngineConfig::default(),
        }
    }

    /// Resolve the home directory and read the hub config exactly once.
    pub fn from_config(config: &AppConfig) -> Self {
        let home = dirs_home().unwrap_or_else(|| PathBuf::from("."));
        Self::resolve(config, home)
    }

    /// [`Environment::from_config`] with an explicit home directory.
    pub fn resolve(config: &AppConfig, home: PathBuf) -> Self {
        let hub_path = config.hub_config_path(&home);

        let hub = match HubConfig::load(&hub_path, &home) {
            Ok(hub) => {
                debug!(hub_dir = %hub.hub_dir.display(), "Hub config loaded");
                Some(hub)
            }
            Err(PipelineError::NotFound(_)) => {
                debug!(path = %hub_path.display(), "No hub config, using project-local storage");
                None
            }
            Err(e) => {
                warn!(error = %e, "Unreadable hub config, using project-local storage");
                None
            }
        };

        Self {
            home,
            hub,
            layout: config.layout.clone(),
            engine: config.engine.clone(),
        }
    }

    pub fn with_layout(mut self, layout: LayoutConfig) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
/// Replace `${NAME}` with the variable's value. Unset names and an
/// unterminated `${` are left as written.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(open) = rest.find("${") {
        result.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let Some(close) = after.find('}') else {
            result.push_str(&rest[open..]);
            return result;
        };
        let name = &after[..close];
        match std::env::var(name) {
            Ok(value) => result.push_str(&value),
            Err(_) => result.push_str(&rest[open..open + close + 3]),
        }
        rest = &after[close + 1..];
    }
    result.push_str(rest);
    result
}

fn expand_home(path: &str, home: &Path) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => home.join(rest),
        None => PathBuf::from(path),
    }
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
