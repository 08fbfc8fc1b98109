//! Routing a step to its tool executor.

use anyhow::Result;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::core::types::{Step, ToolKind};
use crate::io::progress::{ProgressEvent, ProgressSink, emit};
use crate::io::prompt::PromptEngine;
use crate::io::tools::ToolExecutor;
use crate::io::tools::shell::join_command;

/// Turns a step into raw result text.
pub trait Dispatcher {
    /// Execute `step`. Implementations should report failures as `Error: ...`
    /// text; `Err` aborts the step's retry loop.
    fn dispatch(&self, step: &Step, sink: &dyn ProgressSink) -> Result<String>;
}

impl<T: Dispatcher + ?Sized> Dispatcher for &T {
    fn dispatch(&self, step: &Step, sink: &dyn ProgressSink) -> Result<String> {
        (**self).dispatch(step, sink)
    }
}

/// Dispatcher over the fixed shell/code/browser tool set.
pub struct ToolDispatcher<S, C, B> {
    shell: S,
    code: C,
    browser: B,
    prompts: PromptEngine,
    browser_max_actions: u32,
}

impl<S: ToolExecutor, C: ToolExecutor, B: ToolExecutor> ToolDispatcher<S, C, B> {
    pub fn new(shell: S, code: C, browser: B, browser_max_actions: u32) -> Self {
        Self {
            shell,
            code,
            browser,
            prompts: PromptEngine::new(),
            browser_max_actions,
        }
    }

    fn route(&self, step: &Step, sink: &dyn ProgressSink) -> Result<String> {
        match step.kind() {
            ToolKind::Shell => match shell_command(step) {
                Some(command) => self.shell.run(&command, sink),
                None => Ok(missing_field(step, "command")),
            },
            ToolKind::Code => match string_param(step, &["code"]) {
                Some(code) => self.code.run(code, sink),
                None => Ok(missing_field(step, "code")),
            },
            ToolKind::Browser => match string_param(step, &["input", "browser_input"]) {
                Some(instruction) => {
                    let instructions = self
                        .prompts
                        .browser_instructions(instruction, self.browser_max_actions)?;
                    self.browser.run(&instructions, sink)
                }
                None => Ok(missing_field(step, "input")),
            },
            ToolKind::Unrecognized(name) => {
                warn!(tool = %name, "unknown tool");
                Ok(format!("Error: Unknown tool '{name}'"))
            }
        }
    }
}

impl<S: ToolExecutor, C: ToolExecutor, B: ToolExecutor> Dispatcher for ToolDispatcher<S, C, B> {
    #[instrument(skip_all, fields(tool = %step.tool))]
    fn dispatch(&self, step: &Step, sink: &dyn ProgressSink) -> Result<String> {
        info!(description = %step.description, "dispatching step");
        match self.route(step, sink) {
            Ok(result) => Ok(result),
            Err(err) => {
                let message = format!("Error: {err:#}");
                warn!(err = %message, "tool executor failed");
                emit(sink, ProgressEvent::error(message.clone()));
                Ok(message)
            }
        }
    }
}

/// The shell command line: a `command` array joined with quoting, or a plain string.
fn shell_command(step: &Step) -> Option<String> {
    match step.param("command")? {
        Value::String(line) if !line.trim().is_empty() => Some(line.clone()),
        Value::Array(items) if !items.is_empty() => {
            let words: Vec<String> = items
                .iter()
                .map(|item| match item {
                    Value::String(word) => word.clone(),
                    other => other.to_string(),
                })
                .collect();
            Some(join_command(&words))
        }
        _ => None,
    }
}

fn string_param<'a>(step: &'a Step, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|key| step.param(key))
        .filter_map(Value::as_str)
        .find(|text| !text.trim().is_empty())
}

fn missing_field(step: &Step, field: &str) -> String {
    format!(
        "Error: Missing '{field}' parameter for {} step.",
        step.tool
    )
}
