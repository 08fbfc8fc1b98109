//! Driving one planned step through dispatch, classification and bounded
//! correction retries.

use tracing::{debug, info, instrument, warn};

use crate::cancel::{CancelToken, Cancelled};
use crate::core::classifier::is_failure;
use crate::core::step_machine::{StepEvent, StepState, transition};
use crate::core::types::{Step, StepExecution, StepStatus};
use crate::correction::CorrectionRequester;
use crate::dispatch::Dispatcher;
use crate::io::llm::LanguageModel;
use crate::io::progress::{ProgressEvent, ProgressSink, emit};

/// Runs single steps with the retry budget of its correction requester.
pub struct StepRunner<D, L> {
    dispatcher: D,
    corrector: CorrectionRequester<L>,
    cancel: CancelToken,
}

impl<D: Dispatcher, L: LanguageModel> StepRunner<D, L> {
    pub fn new(dispatcher: D, corrector: CorrectionRequester<L>, cancel: CancelToken) -> Self {
        Self {
            dispatcher,
            corrector,
            cancel,
        }
    }

    /// Execute `planned` until it succeeds, exhausts its retries, or cannot be
    /// corrected. The returned record has status `Done` or `Error` and holds
    /// every attempt in order.
    ///
    /// Fails only when the run is cancelled.
    #[instrument(skip_all, fields(tool = %planned.tool))]
    pub fn run(&self, planned: Step, sink: &dyn ProgressSink) -> Result<StepExecution, Cancelled> {
        let max_retries = self.corrector.max_retries();
        let mut execution = StepExecution::pending(planned.clone());
        let mut current = planned;
        let mut state = StepState::initial();

        loop {
            state = match state {
                StepState::Attempting(k) => {
                    self.cancel.check()?;
                    if k > 0 {
                        emit(
                            sink,
                            ProgressEvent::activity(format!(
                                "Retrying step (attempt {} of {}): {}",
                                k + 1,
                                max_retries + 1,
                                current.description
                            )),
                        );
                    }
                    let (result, event) = match self.dispatcher.dispatch(&current, sink) {
                        Ok(result) => {
                            let failed = is_failure(&result);
                            (result, StepEvent::Dispatched { failed })
                        }
                        Err(err) => {
                            warn!(err = %format!("{err:#}"), "dispatch aborted");
                            (format!("Error: {err:#}"), StepEvent::Aborted)
                        }
                    };
                    self.cancel.check()?;
                    let failed = event != StepEvent::Dispatched { failed: false };
                    debug!(attempt = k, failed, "attempt finished");
                    execution.record(current.clone(), result, failed);
                    transition(state, event, max_retries)
                }
                StepState::AwaitingCorrection(k) => {
                    let failure = execution.result().unwrap_or_default();
                    let event = match self
                        .corrector
                        .request_correction(&current, failure, k, sink)
                    {
                        Some(corrected) => {
                            current = corrected;
                            StepEvent::Corrected
                        }
                        None => StepEvent::CorrectionUnavailable,
                    };
                    self.cancel.check()?;
                    transition(state, event, max_retries)
                }
                StepState::Succeeded => {
                    execution.status = StepStatus::Done;
                    break;
                }
                StepState::Failed => {
                    execution.status = StepStatus::Error;
                    break;
                }
            };
        }

        info!(
            attempts = execution.attempts.len(),
            status = ?execution.status,
            "step finished"
        );
        Ok(execution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingSink, ScriptedDispatcher, ScriptedLlm, shell_step};

    fn runner<'a>(
        dispatcher: &'a ScriptedDispatcher,
        llm: &'a ScriptedLlm,
        cancel: CancelToken,
    ) -> StepRunner<&'a ScriptedDispatcher, &'a ScriptedLlm> {
        StepRunner::new(dispatcher, CorrectionRequester::new(llm, "planner", 2), cancel)
    }

    #[test]
    fn success_on_first_attempt_makes_one_attempt() {
        let dispatcher = ScriptedDispatcher::new([Ok("Exit Code: 0\nOutput:\nfoo.txt")]);
        let llm = ScriptedLlm::new(Vec::<Option<&str>>::new());
        let execution = runner(&dispatcher, &llm, CancelToken::new())
            .run(shell_step("List files", &["ls"]), &RecordingSink::default())
            .expect("run");
        assert_eq!(execution.status, StepStatus::Done);
        assert_eq!(execution.attempts.len(), 1);
        assert_eq!(execution.result(), Some("Exit Code: 0\nOutput:\nfoo.txt"));
        assert!(llm.prompts().is_empty());
    }

    #[test]
    fn corrected_step_replaces_the_original() {
        let dispatcher = ScriptedDispatcher::new([
            Ok("Error: Command 'lss' not allowed."),
            Ok("Exit Code: 0\nOutput:\nfoo.txt"),
        ]);
        let llm = ScriptedLlm::new([Some(
            r#"{"tool": "shell_terminal", "description": "List files again", "command": ["ls"]}"#,
        )]);
        let execution = runner(&dispatcher, &llm, CancelToken::new())
            .run(shell_step("List files", &["lss"]), &RecordingSink::default())
            .expect("run");
        assert_eq!(execution.status, StepStatus::Done);
        assert_eq!(execution.attempts.len(), 2);
        assert!(execution.attempts[0].failed);
        let final_task = execution.final_executed_task().expect("final");
        assert_eq!(final_task.description, "List files again");
        assert_eq!(execution.description(), "List files again");
        assert_eq!(dispatcher.dispatched()[1].description, "List files again");
    }

    #[test]
    fn exhausted_retries_end_in_error_with_last_result() {
        let dispatcher = ScriptedDispatcher::repeating("Error: still broken");
        let correction = r#"{"tool": "shell_terminal", "command": ["ls"]}"#;
        let llm = ScriptedLlm::new([Some(correction), Some(correction)]);
        let execution = runner(&dispatcher, &llm, CancelToken::new())
            .run(shell_step("List files", &["lss"]), &RecordingSink::default())
            .expect("run");
        assert_eq!(execution.status, StepStatus::Error);
        assert_eq!(execution.attempts.len(), 3);
        assert_eq!(llm.prompts().len(), 2);
        assert_eq!(execution.result(), Some("Error: still broken"));
    }

    #[test]
    fn missing_correction_fails_without_spending_retries() {
        let dispatcher = ScriptedDispatcher::repeating("Error: Unknown tool 'sql_runner'");
        let llm = ScriptedLlm::new([Some("Sorry, I am not sure.")]);
        let execution = runner(&dispatcher, &llm, CancelToken::new())
            .run(crate::core::types::Step::new("sql_runner", "Query"), &RecordingSink::default())
            .expect("run");
        assert_eq!(execution.status, StepStatus::Error);
        assert_eq!(execution.attempts.len(), 1);
    }

    #[test]
    fn dispatch_error_aborts_immediately() {
        let dispatcher = ScriptedDispatcher::new([Err("executor crashed")]);
        let llm = ScriptedLlm::new([Some(r#"{"tool": "shell"}"#)]);
        let execution = runner(&dispatcher, &llm, CancelToken::new())
            .run(shell_step("List files", &["ls"]), &RecordingSink::default())
            .expect("run");
        assert_eq!(execution.status, StepStatus::Error);
        assert_eq!(execution.result(), Some("Error: executor crashed"));
        assert!(llm.prompts().is_empty());
    }

    #[test]
    fn cancelled_before_dispatch_stops_without_attempts() {
        let dispatcher = ScriptedDispatcher::repeating("Exit Code: 0");
        let llm = ScriptedLlm::new(Vec::<Option<&str>>::new());
        let cancel = CancelToken::new();
        cancel.cancel();
        let outcome = runner(&dispatcher, &llm, cancel)
            .run(shell_step("List files", &["ls"]), &RecordingSink::default());
        assert_eq!(outcome, Err(Cancelled));
        assert!(dispatcher.dispatched().is_empty());
    }
}
