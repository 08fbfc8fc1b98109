//! Browser automation delegated to an isolated helper process.
//!
//! The helper receives `{"instructions": .., "model": ..}` as its single
//! argument and prints one JSON object: `{"result": ..}` or `{"error": ..}`.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use crate::io::config::BrowserConfig;
use crate::io::process::{is_spawn_not_found, run_command_with_timeout};
use crate::io::progress::{ProgressEvent, ProgressSink, emit};
use crate::io::tools::ToolExecutor;

const OUTPUT_LIMIT_BYTES: usize = 1_000_000;
const ERROR_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Serialize)]
struct HelperPayload<'a> {
    instructions: &'a str,
    model: &'a str,
}

/// Launches the browser helper for one instruction.
#[derive(Debug, Clone)]
pub struct BrowserTool {
    config: BrowserConfig,
}

impl BrowserTool {
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }
}

impl ToolExecutor for BrowserTool {
    #[instrument(skip_all, fields(model = %self.config.model))]
    fn run(&self, input: &str, sink: &dyn ProgressSink) -> Result<String> {
        let helper = &self.config.helper_script;
        if !helper.exists() {
            let message = format!("Error: helper script not found at {}", helper.display());
            emit(sink, ProgressEvent::error(message.clone()));
            return Ok(message);
        }

        let payload = serde_json::to_string(&HelperPayload {
            instructions: input,
            model: &self.config.model,
        })
        .context("encode browser payload")?;

        emit(sink, ProgressEvent::activity("launching browser subprocess…"));
        let mut cmd = Command::new(&self.config.interpreter);
        cmd.arg(helper)
            .arg(payload)
            .env("PYTHONIOENCODING", "utf-8");
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let output = match run_command_with_timeout(cmd, None, timeout, OUTPUT_LIMIT_BYTES) {
            Ok(output) => output,
            Err(err) if is_spawn_not_found(&err) => {
                let message = format!(
                    "Error: browser interpreter '{}' not found.",
                    self.config.interpreter
                );
                emit(sink, ProgressEvent::error(message.clone()));
                return Ok(message);
            }
            Err(err) => return Err(err.context("run browser helper")),
        };

        if output.timed_out {
            let secs = self.config.timeout_secs;
            emit(
                sink,
                ProgressEvent::error(format!("browser subprocess hard-timeout ({secs} s).")),
            );
            return Ok(format!("Error: browser subprocess exceeded {secs} s."));
        }

        let code = output.exit_code();
        if code != 0 {
            let stderr = output.stderr_text();
            warn!(exit_code = code, stderr = %stderr.trim(), "browser helper failed");
            emit(
                sink,
                ProgressEvent::error(format!("browser subprocess exit {code}")),
            );
            return Ok(format!("Error: browser subprocess exit {code}."));
        }

        let stdout = output.stdout_text();
        Ok(interpret_helper_output(stdout.trim(), sink))
    }
}

fn interpret_helper_output(stdout: &str, sink: &dyn ProgressSink) -> String {
    let source = if stdout.is_empty() { "{}" } else { stdout };
    let object = match serde_json::from_str::<Map<String, Value>>(source) {
        Ok(object) => object,
        Err(err) => {
            debug!(err = %err, stdout, "browser helper printed non-JSON output");
            emit(
                sink,
                ProgressEvent::error("malformed JSON from browser task."),
            );
            return "Error: browser task returned malformed JSON.".to_string();
        }
    };

    if let Some(error) = object.get("error") {
        let error = value_text(error);
        let preview: String = error.chars().take(ERROR_PREVIEW_CHARS).collect();
        emit(sink, ProgressEvent::error(preview));
        return format!("Error: {error}");
    }

    emit(sink, ProgressEvent::activity("browser action completed."));
    object
        .get("result")
        .map(value_text)
        .unwrap_or_else(|| "Browser task finished (no result key).".to_string())
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
