//! Shared deterministic types for the plan execution core.
//!
//! These types define stable contracts between core components. They carry no
//! I/O handles; orchestration code owns them and decides when they are reported.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One planned unit of work.
///
/// `tool` keeps the name exactly as the plan spelled it so that unknown tools
/// survive parsing and fail later at dispatch. Every field other than `tool` and
/// `description` is a tool-specific parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub tool: String,
    pub description: String,
    #[serde(flatten)]
    pub parameters: Map<String, Value>,
}

impl Step {
    pub fn new(tool: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            description: description.into(),
            parameters: Map::new(),
        }
    }

    /// Builder-style helper for attaching a tool parameter.
    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }

    pub fn kind(&self) -> ToolKind {
        ToolKind::from_name(&self.tool)
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key)
    }

    /// Compact JSON form used in prompts and diagnostics.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{{\"tool\":\"{}\"}}", self.tool))
    }
}

/// Closed set of tool capabilities, plus the name of anything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolKind {
    Shell,
    Code,
    Browser,
    Unrecognized(String),
}

impl ToolKind {
    /// Map a plan's tool name onto a known capability.
    ///
    /// Accepts the names advertised to the planner (`shell_terminal`,
    /// `code_interpreter`, `browser`) and their short forms.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "shell_terminal" | "shell" => ToolKind::Shell,
            "code_interpreter" | "code" => ToolKind::Code,
            "browser" => ToolKind::Browser,
            _ => ToolKind::Unrecognized(name.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ToolKind::Shell => "shell_terminal",
            ToolKind::Code => "code_interpreter",
            ToolKind::Browser => "browser",
            ToolKind::Unrecognized(name) => name,
        }
    }
}

/// Externally visible status of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Done,
    Error,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, StepStatus::Done | StepStatus::Error)
    }
}

/// One dispatch of a step and its classified result.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempt {
    pub step: Step,
    pub result: String,
    pub failed: bool,
}

/// Runtime record of one planned step and every attempt made for it.
#[derive(Debug, Clone, PartialEq)]
pub struct StepExecution {
    /// The step as planned.
    pub planned: Step,
    pub status: StepStatus,
    /// Ordered attempts; at most `max_retries + 1` entries.
    pub attempts: Vec<Attempt>,
}

impl StepExecution {
    pub fn pending(planned: Step) -> Self {
        Self {
            planned,
            status: StepStatus::Pending,
            attempts: Vec::new(),
        }
    }

    pub fn record(&mut self, step: Step, result: String, failed: bool) {
        self.attempts.push(Attempt {
            step,
            result,
            failed,
        });
    }

    /// Step used by the last attempt made, if any attempt was made.
    pub fn final_executed_task(&self) -> Option<&Step> {
        self.attempts.last().map(|attempt| &attempt.step)
    }

    /// Raw result text of the last attempt made.
    pub fn result(&self) -> Option<&str> {
        self.attempts.last().map(|attempt| attempt.result.as_str())
    }

    /// Label shown to observers: the last executed step's description once a
    /// correction has replaced the planned step, the planned one before that.
    pub fn description(&self) -> &str {
        self.final_executed_task()
            .map(|step| step.description.as_str())
            .unwrap_or(&self.planned.description)
    }

    pub fn snapshot(&self) -> StepSnapshot {
        StepSnapshot {
            description: self.description().to_string(),
            status: self.status,
        }
    }
}

/// Entry of the step-update event sent to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSnapshot {
    pub description: String,
    pub status: StepStatus,
}

/// Top-level workflow state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Planning,
    Executing,
    Completed,
    Failed,
    LimitReached,
}

impl WorkflowState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowState::Completed | WorkflowState::Failed | WorkflowState::LimitReached
        )
    }
}

/// The whole execution of one user query.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowRun {
    pub state: WorkflowState,
    /// Fixed length once planning completes.
    pub steps: Vec<StepExecution>,
    /// Steps that completed an attempt cycle; checked against the step budget.
    pub executed_count: usize,
    terminal_message: Option<String>,
}

impl Default for WorkflowRun {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowRun {
    pub fn new() -> Self {
        Self {
            state: WorkflowState::Planning,
            steps: Vec::new(),
            executed_count: 0,
            terminal_message: None,
        }
    }

    /// Install the parsed plan and enter `Executing`.
    pub fn begin(&mut self, plan: Vec<Step>) {
        self.steps = plan.into_iter().map(StepExecution::pending).collect();
        self.state = WorkflowState::Executing;
    }

    pub fn set_status(&mut self, index: usize, status: StepStatus) {
        if let Some(step) = self.steps.get_mut(index) {
            step.status = status;
        }
    }

    /// Store a finished step cycle and count it against the budget.
    pub fn complete_step(&mut self, index: usize, execution: StepExecution) {
        if let Some(slot) = self.steps.get_mut(index) {
            *slot = execution;
            self.executed_count += 1;
        }
    }

    /// Enter a terminal state. Only the first call has any effect; returns
    /// whether this call set the terminal message.
    pub fn finish(&mut self, state: WorkflowState, message: impl Into<String>) -> bool {
        if self.terminal_message.is_some() {
            return false;
        }
        debug_assert!(state.is_terminal());
        self.state = state;
        self.terminal_message = Some(message.into());
        true
    }

    pub fn terminal_message(&self) -> Option<&str> {
        self.terminal_message.as_deref()
    }

    pub fn snapshot(&self) -> Vec<StepSnapshot> {
        self.steps.iter().map(StepExecution::snapshot).collect()
    }

    pub fn count_with_status(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|step| step.status == status).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_kind_accepts_advertised_and_short_names() {
        assert_eq!(ToolKind::from_name("shell_terminal"), ToolKind::Shell);
        assert_eq!(ToolKind::from_name("Shell"), ToolKind::Shell);
        assert_eq!(ToolKind::from_name("code_interpreter"), ToolKind::Code);
        assert_eq!(ToolKind::from_name("browser"), ToolKind::Browser);
        assert_eq!(
            ToolKind::from_name("sql_runner"),
            ToolKind::Unrecognized("sql_runner".to_string())
        );
    }

    #[test]
    fn step_serializes_parameters_inline() {
        let step = Step::new("shell_terminal", "List files").with_param("command", vec!["ls"]);
        let json: Value = serde_json::from_str(&step.to_json()).expect("json");
        assert_eq!(json["tool"], "shell_terminal");
        assert_eq!(json["description"], "List files");
        assert_eq!(json["command"][0], "ls");
    }

    #[test]
    fn execution_description_follows_last_attempt() {
        let mut execution = StepExecution::pending(Step::new("shell", "planned"));
        assert_eq!(execution.description(), "planned");
        execution.record(Step::new("shell", "planned"), "Error: x".to_string(), true);
        execution.record(Step::new("shell", "corrected"), "ok".to_string(), false);
        assert_eq!(execution.description(), "corrected");
        assert_eq!(execution.result(), Some("ok"));
    }

    #[test]
    fn finish_sets_terminal_message_once() {
        let mut run = WorkflowRun::new();
        assert!(run.finish(WorkflowState::Completed, "first"));
        assert!(!run.finish(WorkflowState::Failed, "second"));
        assert_eq!(run.state, WorkflowState::Completed);
        assert_eq!(run.terminal_message(), Some("first"));
    }

    #[test]
    fn snapshot_serializes_lowercase_status() {
        let mut run = WorkflowRun::new();
        run.begin(vec![Step::new("shell", "a"), Step::new("code", "b")]);
        run.set_status(0, StepStatus::Running);
        let json = serde_json::to_string(&run.snapshot()).expect("json");
        assert_eq!(
            json,
            r#"[{"description":"a","status":"running"},{"description":"b","status":"pending"}]"#
        );
    }
}
