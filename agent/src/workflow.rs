//! Top-level run of one user query: plan, execute steps in order, stop on
//! the first failed step or when the step budget runs out.

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::cancel::{CancelToken, Cancelled};
use crate::core::budget::StepBudget;
use crate::core::plan::parse_plan;
use crate::core::types::{Step, StepExecution, StepStatus, WorkflowRun, WorkflowState};
use crate::correction::CorrectionRequester;
use crate::dispatch::Dispatcher;
use crate::io::llm::LanguageModel;
use crate::io::progress::{ProgressEvent, ProgressSink, emit};
use crate::io::prompt::PromptEngine;
use crate::step::StepRunner;

/// Limits and model choice for one engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub planner_model: String,
    pub max_retries: u32,
    pub max_workflow_steps: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            planner_model: "llama3:latest".to_string(),
            max_retries: 2,
            max_workflow_steps: 10,
        }
    }
}

/// Plans and executes one query at a time.
pub struct WorkflowEngine<'a, D, L> {
    llm: &'a L,
    planner_model: String,
    planner_system: String,
    prompts: PromptEngine,
    budget: StepBudget,
    runner: StepRunner<D, &'a L>,
    cancel: CancelToken,
}

impl<'a, D: Dispatcher, L: LanguageModel> WorkflowEngine<'a, D, L> {
    pub fn new(
        llm: &'a L,
        dispatcher: D,
        settings: EngineSettings,
        cancel: CancelToken,
    ) -> Result<Self> {
        let prompts = PromptEngine::new();
        let planner_system = prompts.planner_system(settings.max_workflow_steps)?;
        let corrector = CorrectionRequester::new(llm, settings.planner_model.clone(), settings.max_retries)
            .with_system_prompt(planner_system.clone());
        Ok(Self {
            llm,
            planner_model: settings.planner_model,
            planner_system,
            prompts,
            budget: StepBudget::new(settings.max_workflow_steps),
            runner: StepRunner::new(dispatcher, corrector, cancel.clone()),
            cancel,
        })
    }

    /// Run `query` to a terminal state.
    ///
    /// Every terminal state is announced with exactly one final event. A
    /// cancelled run returns `Err(Cancelled)` and sends nothing further.
    #[instrument(skip_all, fields(model = %self.planner_model))]
    pub fn run(&self, query: &str, sink: &dyn ProgressSink) -> Result<WorkflowRun, Cancelled> {
        let mut run = WorkflowRun::new();
        self.cancel.check()?;
        emit(sink, ProgressEvent::activity("Planning steps..."));

        let plan = self.plan(query);
        self.cancel.check()?;
        let plan = match plan {
            Ok(plan) => plan,
            Err(reason) => {
                return Ok(self.finish(
                    run,
                    WorkflowState::Failed,
                    format!("Planning failed: {reason}"),
                    sink,
                ));
            }
        };
        if plan.is_empty() {
            return Ok(self.finish(
                run,
                WorkflowState::Completed,
                "The plan contained no actionable steps.".to_string(),
                sink,
            ));
        }

        let total = plan.len();
        info!(steps = total, "plan accepted");
        run.begin(plan);
        emit(
            sink,
            ProgressEvent::activity(format!("Plan ready with {total} step(s).")),
        );
        publish(&run, sink);

        for index in 0..total {
            self.cancel.check()?;
            if self.budget.is_exhausted(run.executed_count) {
                let skipped = total - index;
                let max = self.budget.max_steps();
                emit(
                    sink,
                    ProgressEvent::warning(format!(
                        "Step limit of {max} reached; {skipped} step(s) were not executed."
                    )),
                );
                return Ok(self.finish(
                    run,
                    WorkflowState::LimitReached,
                    format!("Stopped after {max} steps; {skipped} step(s) left pending."),
                    sink,
                ));
            }

            update(&mut run, index, StepChange::Status(StepStatus::Running), sink);
            let planned = run.steps[index].planned.clone();
            emit(
                sink,
                ProgressEvent::activity(format!(
                    "Executing step {}/{total}: {}",
                    index + 1,
                    planned.description
                )),
            );

            let execution = self.runner.run(planned, sink)?;
            let status = execution.status;
            let attempts = execution.attempts.len();
            let result = execution.result().unwrap_or_default().to_string();
            update(&mut run, index, StepChange::Completed(execution), sink);

            if status == StepStatus::Error {
                emit(
                    sink,
                    ProgressEvent::error(format!("Step {} failed:\n{result}", index + 1)),
                );
                return Ok(self.finish(
                    run,
                    WorkflowState::Failed,
                    format!(
                        "Step {} of {total} failed after {attempts} attempt(s):\n{result}",
                        index + 1
                    ),
                    sink,
                ));
            }
            emit(
                sink,
                ProgressEvent::activity(format!("Step {} result:\n{result}", index + 1)),
            );
        }

        Ok(self.finish(
            run,
            WorkflowState::Completed,
            format!("Workflow complete. {total} step(s) done."),
            sink,
        ))
    }

    /// Ask the planner for steps. The error is a human-readable reason.
    pub fn plan(&self, query: &str) -> std::result::Result<Vec<Step>, String> {
        let prompt = self
            .prompts
            .plan_request(query)
            .map_err(|err| format!("{err:#}"))?;
        let raw = self
            .llm
            .complete(&self.planner_model, &prompt, Some(&self.planner_system))
            .ok_or_else(|| "the language model returned no plan".to_string())?;
        parse_plan(&raw).map_err(|err| {
            warn!(err = %err, raw = %err.raw, "planner output rejected");
            err.to_string()
        })
    }

    fn finish(
        &self,
        mut run: WorkflowRun,
        state: WorkflowState,
        message: String,
        sink: &dyn ProgressSink,
    ) -> WorkflowRun {
        if run.finish(state, message.clone()) {
            info!(state = ?state, executed = run.executed_count, "workflow finished");
            emit(sink, ProgressEvent::Final(message));
        }
        run
    }
}

enum StepChange {
    Status(StepStatus),
    Completed(StepExecution),
}

/// Apply a step change and send the resulting full snapshot.
fn update(run: &mut WorkflowRun, index: usize, change: StepChange, sink: &dyn ProgressSink) {
    match change {
        StepChange::Status(status) => run.set_status(index, status),
        StepChange::Completed(execution) => run.complete_step(index, execution),
    }
    publish(run, sink);
}

fn publish(run: &WorkflowRun, sink: &dyn ProgressSink) {
    emit(sink, ProgressEvent::Steps(run.snapshot()));
}
