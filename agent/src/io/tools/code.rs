//! Script execution in a subprocess, with one automatic install-and-rerun
//! when the script fails on a missing module.

use std::io::Write;
use std::path::Path;
use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{info, instrument, warn};

use crate::io::config::CodeConfig;
use crate::io::process::{CommandOutput, is_spawn_not_found, run_command_with_timeout};
use crate::io::progress::{ProgressEvent, ProgressSink, emit};
use crate::io::tools::ToolExecutor;

const MISSING_MODULE_MARKER: &str = "ModuleNotFoundError: No module named";
const INSTALL_TIMEOUT: Duration = Duration::from_secs(300);

static MISSING_MODULE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"No module named ['"](.+?)['"]"#).expect("missing-module regex should be valid")
});

/// Runs source text with the configured interpreter.
#[derive(Debug, Clone)]
pub struct CodeTool {
    config: CodeConfig,
}

enum ScriptRun {
    Finished(CommandOutput),
    TimedOut,
    InterpreterMissing,
}

impl CodeTool {
    pub fn new(config: CodeConfig) -> Self {
        Self { config }
    }

    fn run_script(&self, script: &Path) -> Result<ScriptRun> {
        let mut cmd = Command::new(&self.config.interpreter);
        cmd.arg(script);
        let timeout = Duration::from_secs(self.config.timeout_secs);
        match run_command_with_timeout(cmd, None, timeout, self.config.output_limit_bytes) {
            Ok(output) if output.timed_out => Ok(ScriptRun::TimedOut),
            Ok(output) => Ok(ScriptRun::Finished(output)),
            Err(err) if is_spawn_not_found(&err) => Ok(ScriptRun::InterpreterMissing),
            Err(err) => Err(err.context("run script")),
        }
    }

    fn install(&self, package: &str) {
        let mut cmd = Command::new(&self.config.interpreter);
        cmd.args(["-m", "pip", "install", package]);
        match run_command_with_timeout(cmd, None, INSTALL_TIMEOUT, self.config.output_limit_bytes) {
            Ok(output) => info!(package, exit_code = output.exit_code(), "package install finished"),
            Err(err) => warn!(package, err = %format!("{err:#}"), "package install failed"),
        }
    }

    fn interpret(&self, run: ScriptRun, sink: &dyn ProgressSink) -> String {
        match run {
            ScriptRun::Finished(output) => output.render(),
            ScriptRun::TimedOut => {
                let message = format!(
                    "Error: Python execution timed out after {}s.",
                    self.config.timeout_secs
                );
                emit(sink, ProgressEvent::error(message.clone()));
                message
            }
            ScriptRun::InterpreterMissing => {
                let message = "Error: Python interpreter not found.".to_string();
                emit(sink, ProgressEvent::error(message.clone()));
                message
            }
        }
    }
}

impl ToolExecutor for CodeTool {
    #[instrument(skip_all, fields(code_bytes = input.len()))]
    fn run(&self, input: &str, sink: &dyn ProgressSink) -> Result<String> {
        let mut script = tempfile::Builder::new()
            .prefix("agent-script-")
            .suffix(".py")
            .tempfile()
            .context("create script file")?;
        script
            .write_all(input.as_bytes())
            .context("write script file")?;
        script.flush().context("flush script file")?;

        let name = script
            .path()
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        emit(
            sink,
            ProgressEvent::activity(format!("Running Python script {name}...")),
        );

        let first = self.run_script(script.path())?;
        let package = match &first {
            ScriptRun::Finished(output) if self.config.auto_install => missing_module(output),
            _ => None,
        };
        let Some(package) = package else {
            return Ok(self.interpret(first, sink));
        };

        emit(
            sink,
            ProgressEvent::activity(format!("Installing missing package '{package}'...")),
        );
        self.install(&package);
        let rerun = self.run_script(script.path())?;
        Ok(match rerun {
            ScriptRun::Finished(output) => format!("After install -> {}", output.render()),
            other => self.interpret(other, sink),
        })
    }
}

/// Name of the module a failed run could not import.
fn missing_module(output: &CommandOutput) -> Option<String> {
    if output.exit_code() == 0 {
        return None;
    }
    let stderr = output.stderr_text();
    if !stderr.contains(MISSING_MODULE_MARKER) {
        return None;
    }
    MISSING_MODULE_RE
        .captures(&stderr)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
