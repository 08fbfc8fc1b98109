//! Wiring of the real collaborators for one query, shared by the CLI and the
//! server.

use anyhow::{Result, anyhow};
use serde::Deserialize;
use tracing::info;

use crate::cancel::CancelToken;
use crate::core::types::{Step, WorkflowRun};
use crate::dispatch::ToolDispatcher;
use crate::io::config::AgentConfig;
use crate::io::llm::OllamaClient;
use crate::io::progress::ProgressSink;
use crate::io::tools::{BrowserTool, CodeTool, ShellTool};
use crate::workflow::{EngineSettings, WorkflowEngine};

/// Per-session model choices. Empty or missing values fall back to config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SessionModels {
    #[serde(default)]
    pub planner_model: Option<String>,
    #[serde(default)]
    pub browser_model: Option<String>,
}

impl SessionModels {
    /// Config with this session's overrides applied.
    pub fn apply(&self, config: &AgentConfig) -> AgentConfig {
        let mut config = config.clone();
        if let Some(model) = non_empty(self.planner_model.as_deref()) {
            config.llm.planner_model = model.to_string();
        }
        if let Some(model) = non_empty(self.browser_model.as_deref()) {
            config.browser.model = model.to_string();
        }
        config
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

type RealDispatcher = ToolDispatcher<ShellTool, CodeTool, BrowserTool>;

fn dispatcher(config: &AgentConfig) -> RealDispatcher {
    ToolDispatcher::new(
        ShellTool::new(config.shell.clone()),
        CodeTool::new(config.code.clone()),
        BrowserTool::new(config.browser.clone()),
        config.browser.max_actions,
    )
}

fn settings(config: &AgentConfig) -> EngineSettings {
    EngineSettings {
        planner_model: config.llm.planner_model.clone(),
        max_retries: config.workflow.max_retries,
        max_workflow_steps: config.workflow.max_workflow_steps,
    }
}

/// Plan and execute `query` against Ollama and the local tools.
///
/// Blocking; call from a plain thread or `spawn_blocking`. A cancelled run
/// yields an error that downcasts to [`crate::cancel::Cancelled`].
pub fn run_query(
    config: &AgentConfig,
    models: &SessionModels,
    query: &str,
    sink: &dyn ProgressSink,
    cancel: CancelToken,
) -> Result<WorkflowRun> {
    let config = models.apply(config);
    info!(
        planner_model = %config.llm.planner_model,
        browser_model = %config.browser.model,
        "starting session run"
    );
    let llm = OllamaClient::new(&config.llm)?;
    let engine = WorkflowEngine::new(&llm, dispatcher(&config), settings(&config), cancel)?;
    Ok(engine.run(query, sink)?)
}

/// Ask the planner for steps without executing them.
pub fn plan_query(config: &AgentConfig, models: &SessionModels, query: &str) -> Result<Vec<Step>> {
    let config = models.apply(config);
    let llm = OllamaClient::new(&config.llm)?;
    let engine = WorkflowEngine::new(
        &llm,
        dispatcher(&config),
        settings(&config),
        CancelToken::new(),
    )?;
    engine
        .plan(query)
        .map_err(|reason| anyhow!("planning failed: {reason}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_only_non_empty_models() {
        let models = SessionModels {
            planner_model: Some("qwen3:8b".to_string()),
            browser_model: Some("  ".to_string()),
        };
        let config = models.apply(&AgentConfig::default());
        assert_eq!(config.llm.planner_model, "qwen3:8b");
        assert_eq!(config.browser.model, "qwen2.5:7b");
    }

    #[test]
    fn models_deserialize_from_partial_json() {
        let models: SessionModels =
            serde_json::from_str(r#"{"planner_model": "llama3"}"#).expect("json");
        assert_eq!(models.planner_model.as_deref(), Some("llama3"));
        assert_eq!(models.browser_model, None);
    }

    #[test]
    fn settings_follow_workflow_config() {
        let mut config = AgentConfig::default();
        config.workflow.max_workflow_steps = 4;
        config.workflow.max_retries = 1;
        let settings = settings(&config);
        assert_eq!(settings.max_workflow_steps, 4);
        assert_eq!(settings.max_retries, 1);
    }
}
