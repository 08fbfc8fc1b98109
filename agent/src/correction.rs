//! Asking the language model for a replacement of a failed step.

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::classifier::is_failure;
use crate::core::json_repair::parse_lenient;
use crate::core::plan::step_with_default_description;
use crate::core::types::Step;
use crate::io::llm::LanguageModel;
use crate::io::progress::{ProgressEvent, ProgressSink, emit};
use crate::io::prompt::PromptEngine;

/// Requests corrected steps from a language model.
pub struct CorrectionRequester<L> {
    llm: L,
    model: String,
    prompts: PromptEngine,
    system: Option<String>,
    max_retries: u32,
}

impl<L: LanguageModel> CorrectionRequester<L> {
    pub fn new(llm: L, model: impl Into<String>, max_retries: u32) -> Self {
        Self {
            llm,
            model: model.into(),
            prompts: PromptEngine::new(),
            system: None,
            max_retries,
        }
    }

    /// System message sent with every correction request.
    pub fn with_system_prompt(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Ask for one step replacing `failed`, whose attempt `attempt`
    /// (zero-based) produced `failure`.
    ///
    /// Returns `None` when the result is not a failure, the retry budget is
    /// spent, the model gives no answer, or the answer is not a usable step.
    #[instrument(skip_all, fields(tool = %failed.tool, attempt))]
    pub fn request_correction(
        &self,
        failed: &Step,
        failure: &str,
        attempt: u32,
        sink: &dyn ProgressSink,
    ) -> Option<Step> {
        if !is_failure(failure) || attempt >= self.max_retries {
            debug!("correction not applicable");
            return None;
        }
        emit(
            sink,
            ProgressEvent::activity("Reviewing failure and attempting to resolve..."),
        );

        let prompt = match self
            .prompts
            .correction(failed, failure, attempt, self.max_retries)
        {
            Ok(prompt) => prompt,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "failed to render correction prompt");
                emit(sink, ProgressEvent::warning("Could not build a correction request."));
                return None;
            }
        };

        let Some(raw) = self
            .llm
            .complete(&self.model, &prompt, self.system.as_deref())
        else {
            emit(
                sink,
                ProgressEvent::warning("No correction received from the language model."),
            );
            return None;
        };

        match parse_correction(&raw, failed) {
            Some(corrected) => {
                info!(tool = %corrected.tool, "received corrected step");
                emit(
                    sink,
                    ProgressEvent::activity(format!(
                        "Retrying with corrected step: {}",
                        corrected.to_json()
                    )),
                );
                Some(corrected)
            }
            None => {
                warn!(raw = %raw, "correction was not a usable step");
                emit(
                    sink,
                    ProgressEvent::warning("Correction could not be parsed into a valid step."),
                );
                None
            }
        }
    }
}

/// Decode a correction answer into a step. The description falls back to
/// the failed step's own. A one-element array is accepted in place of an
/// object.
pub fn parse_correction(raw: &str, original: &Step) -> Option<Step> {
    let (value, _) = parse_lenient(raw).ok()?;
    let map = match value {
        Value::Object(map) => map,
        Value::Array(mut items) if items.len() == 1 => match items.pop() {
            Some(Value::Object(map)) => map,
            _ => return None,
        },
        _ => return None,
    };
    step_with_default_description(map, |_| original.description.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingSink, ScriptedLlm};
    use serde_json::json;

    fn failed_step() -> Step {
        Step::new("shell_terminal", "List files").with_param("command", json!(["lss"]))
    }

    #[test]
    fn parse_accepts_fenced_object_and_keeps_description() {
        let raw = "```json\n{\"tool\": \"shell_terminal\", \"command\": [\"ls\"]}\n```";
        let step = parse_correction(raw, &failed_step()).expect("step");
        assert_eq!(step.tool, "shell_terminal");
        assert_eq!(step.description, "List files");
        assert_eq!(step.param("command"), Some(&json!(["ls"])));
    }

    #[test]
    fn parse_accepts_single_element_array() {
        let raw = r#"[{"tool": "code_interpreter", "description": "Use python", "code": "print(1)"}]"#;
        let step = parse_correction(raw, &failed_step()).expect("step");
        assert_eq!(step.description, "Use python");
    }

    #[test]
    fn parse_rejects_prose_and_missing_tool() {
        assert!(parse_correction("I cannot help with that.", &failed_step()).is_none());
        assert!(parse_correction(r#"{"description": "x"}"#, &failed_step()).is_none());
        assert!(parse_correction(r#"[{"tool": "a"}, {"tool": "b"}]"#, &failed_step()).is_none());
    }

    #[test]
    fn returns_corrected_step_and_announces_it() {
        let llm = ScriptedLlm::new([Some(r#"{"tool": "shell_terminal", "command": ["ls"]}"#)]);
        let requester = CorrectionRequester::new(&llm, "planner", 2);
        let sink = RecordingSink::default();
        let step = requester
            .request_correction(&failed_step(), "Error: Command 'lss' not allowed.", 0, &sink)
            .expect("correction");
        assert_eq!(step.param("command"), Some(&json!(["ls"])));

        let frames = sink.frames();
        assert_eq!(frames[0], "Agent: Reviewing failure and attempting to resolve...");
        assert!(frames[1].starts_with("Agent: Retrying with corrected step:"));
        assert!(llm.prompts()[0].contains("Error: Command 'lss' not allowed."));
    }

    #[test]
    fn skips_request_when_not_failed_or_budget_spent() {
        let llm = ScriptedLlm::new([Some("unused")]);
        let requester = CorrectionRequester::new(&llm, "planner", 2);
        let sink = RecordingSink::default();
        assert!(requester.request_correction(&failed_step(), "Exit Code: 0", 0, &sink).is_none());
        assert!(requester.request_correction(&failed_step(), "Error: x", 2, &sink).is_none());
        assert!(llm.prompts().is_empty());
        assert!(sink.frames().is_empty());
    }

    #[test]
    fn silent_model_or_garbage_yields_warning() {
        let llm = ScriptedLlm::new([None, Some("not json at all")]);
        let requester = CorrectionRequester::new(&llm, "planner", 2);
        let sink = RecordingSink::default();
        assert!(requester.request_correction(&failed_step(), "Error: x", 0, &sink).is_none());
        assert!(requester.request_correction(&failed_step(), "Error: x", 1, &sink).is_none());
        let warnings: Vec<String> = sink
            .frames()
            .into_iter()
            .filter(|frame| frame.starts_with("Agent Warning:"))
            .collect();
        assert_eq!(warnings.len(), 2);
    }
}
