//! Agent configuration stored in `agent.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Default config location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "agent.toml";

/// Agent configuration (TOML).
///
/// Every table is optional. Missing fields default to the values the agent
/// ships with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct AgentConfig {
    pub llm: LlmConfig,
    pub workflow: WorkflowConfig,
    pub shell: ShellConfig,
    pub code: CodeConfig,
    pub browser: BrowserConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of the Ollama server.
    pub endpoint: String,
    /// Model used for planning and corrections.
    pub planner_model: String,
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            planner_model: "llama3:latest".to_string(),
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Corrections allowed per step; a step makes at most `max_retries + 1` attempts.
    pub max_retries: u32,
    /// Steps executed per run before the run stops with `LimitReached`.
    pub max_workflow_steps: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            max_workflow_steps: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ShellConfig {
    /// Program names the shell tool may run.
    pub allowed_commands: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
    /// Working directory for commands. Defaults to the process cwd.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workdir: Option<PathBuf>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        let allowed = [
            "ls", "pwd", "echo", "cat", "grep", "mkdir", "rmdir", "touch", "head", "tail", "date",
            "python", "python3", "pip", "pip3",
        ];
        Self {
            allowed_commands: allowed.iter().map(|cmd| cmd.to_string()).collect(),
            timeout_secs: 15,
            output_limit_bytes: 100_000,
            workdir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CodeConfig {
    /// Interpreter invoked with the script path.
    pub interpreter: String,
    pub timeout_secs: u64,
    /// Install a missing module with pip and rerun once.
    pub auto_install: bool,
    pub output_limit_bytes: usize,
}

impl Default for CodeConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            timeout_secs: 30,
            auto_install: true,
            output_limit_bytes: 100_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BrowserConfig {
    pub interpreter: String,
    /// Helper script that drives the browser and prints one JSON object.
    /// Not bundled; a relative path is resolved from the working directory.
    /// See the crate docs for the helper contract.
    pub helper_script: PathBuf,
    /// Model the helper uses internally.
    pub model: String,
    pub timeout_secs: u64,
    /// Action budget hinted to the browser agent.
    pub max_actions: u32,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            helper_script: PathBuf::from("run_browser_task.py"),
            model: "qwen2.5:7b".to_string(),
            timeout_secs: 240,
            max_actions: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Static frontend served at `/` when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frontend_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8000,
            frontend_dir: None,
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.llm.endpoint.trim().is_empty() {
            return Err(anyhow!("llm.endpoint must not be empty"));
        }
        if self.llm.planner_model.trim().is_empty() {
            return Err(anyhow!("llm.planner_model must not be empty"));
        }
        if self.llm.request_timeout_secs == 0 {
            return Err(anyhow!("llm.request_timeout_secs must be > 0"));
        }
        if self.shell.allowed_commands.is_empty() {
            return Err(anyhow!("shell.allowed_commands must be a non-empty array"));
        }
        for (name, secs) in [
            ("shell.timeout_secs", self.shell.timeout_secs),
            ("code.timeout_secs", self.code.timeout_secs),
            ("browser.timeout_secs", self.browser.timeout_secs),
        ] {
            if secs == 0 {
                return Err(anyhow!("{name} must be > 0"));
            }
        }
        if self.workflow.max_workflow_steps == 0 {
            return Err(anyhow!("workflow.max_workflow_steps must be > 0"));
        }
        if self.browser.max_actions == 0 {
            return Err(anyhow!("browser.max_actions must be > 0"));
        }
        if self.shell.output_limit_bytes == 0 || self.code.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.code.interpreter.trim().is_empty() || self.browser.interpreter.trim().is_empty() {
            return Err(anyhow!("interpreter must not be empty"));
        }
        Ok(())
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides using `lookup` for variable values. Empty values are ignored.
    pub fn apply_overrides_from<F: Fn(&str) -> Option<String>>(&mut self, lookup: F) {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(endpoint) = get("OLLAMA_ENDPOINT") {
            self.llm.endpoint = endpoint;
        }
        if let Some(model) = get("PLANNING_TOOLING_MODEL") {
            self.llm.planner_model = model;
        }
        if let Some(model) = get("BROWSER_AGENT_INTERNAL_MODEL") {
            self.browser.model = model;
        }
    }
}

/// Load config from a TOML file and apply environment overrides.
///
/// If the file is missing, starts from `AgentConfig::default()`.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    let mut cfg = read_config_file(path)?;
    cfg.apply_env_overrides();
    cfg.validate()?;
    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        return Ok(AgentConfig::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AgentConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
